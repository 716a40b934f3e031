//! Pairway - pairing-code gateway for messaging account linking
//!
//! One HTTP request drives one pairing attempt: issue a one-time pairing
//! code for a phone number, wait for the remote peer to confirm the link,
//! archive the captured credentials durably, and destroy every local trace
//! of the session.
//!
//! ## Components
//!
//! - **Session controller**: the lifecycle state machine, from request to
//!   terminal cleanup ([`session`])
//! - **Phone normalizer**: E.164 canonicalization and validation ([`phone`])
//! - **Ephemeral store**: per-session scope directories with guaranteed
//!   teardown ([`store`])
//! - **Socket provider**: the messenger engine adapter and its event
//!   contract ([`provider`])
//! - **Credential archivist**: idempotent snapshot upload to the remote
//!   store ([`archive`])

pub mod archive;
pub mod config;
pub mod fault;
pub mod logging;
pub mod phone;
pub mod provider;
pub mod routes;
pub mod server;
pub mod session;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{PairwayError, Result};
