pub mod emergency;
pub mod presence;

pub use emergency::{
    Emergency, EmergencyStatus, ResolutionState, ResponseEvent, ResponseStatus, Transition,
    VolunteerResponse,
};
pub use presence::{Coordinates, Role, UserPresence};
