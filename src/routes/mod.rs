pub mod emergency;
pub mod presence;
pub mod visibility;
