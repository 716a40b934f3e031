//! Session lifecycle
//!
//! The state machine driving one pairing attempt from request to terminal
//! cleanup, and the registry that guarantees a single live session per
//! scope.

mod controller;
mod registry;

pub use controller::{
    format_pairing_code, PairingRequest, PairingTicket, Phase, SessionController, SessionState,
};
pub use registry::{SessionLease, SessionRegistry};
