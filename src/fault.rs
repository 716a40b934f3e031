//! Process-level fault policy
//!
//! Session driver tasks run detached; a fault inside one must never take the
//! host process down. Known-transient provider faults are logged at debug,
//! everything else at error, and panics from background tasks are logged by
//! a hook instead of disappearing into the join handle.

use tracing::{debug, error};

/// Substrings of provider faults that are expected transient conditions.
/// These show up when the remote drops, throttles, or restarts a stream and
/// are not worth more than a debug line.
const BENIGN_FAULTS: &[&str] = &[
    "conflict",
    "not-authorized",
    "Socket connection timeout",
    "rate-overlimit",
    "Connection Closed",
    "Timed Out",
    "Value not found",
    "Stream Errored",
    "statusCode: 515",
    "statusCode: 503",
];

/// Whether a fault message matches a known-benign transient condition.
pub fn is_benign(message: &str) -> bool {
    BENIGN_FAULTS.iter().any(|needle| message.contains(needle))
}

/// Log a fault at the severity its classification deserves.
pub fn report(context: &str, message: &str) {
    if is_benign(message) {
        debug!("{}: suppressed transient fault: {}", context, message);
    } else {
        error!("{}: {}", context, message);
    }
}

/// Install a panic hook that logs panics from background tasks.
///
/// Tokio catches panics at task boundaries, so the process survives either
/// way; without the hook the payload is only visible to whoever joins the
/// task, which nobody does for detached session drivers.
pub fn install() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let message = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        if is_benign(&message) {
            debug!("suppressed benign panic: {}", message);
        } else {
            error!("panic in task: {} ({:?})", message, info.location());
            default_hook(info);
        }
    }));
}
