mod handler;
mod model;

pub use handler::{snapshot, stream};
pub use model::VisibilityQuery;
