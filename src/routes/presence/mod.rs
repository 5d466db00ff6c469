mod handler;
mod model;

pub use handler::update_presence;
pub use model::{PresenceAck, UpdatePresenceRequest};
