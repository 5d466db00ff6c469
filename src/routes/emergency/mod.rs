mod handler;
mod model;

pub use handler::{activate, active, by_id, deactivate, respond, toggle, update_location};
pub use model::{ActivateRequest, IdQuery, LocationRequest, RespondRequest};
