pub mod events;
pub mod logging;
pub mod roster;
pub mod session;
pub mod transport;
pub mod voice;

pub use events::{ClientEvent, EventMailbox};
pub use session::{VoiceClient, VoiceClientConfig};
pub use transport::{Transport, TransportEvent};
pub use voice::{VoiceMode, VoiceSendOptions};

use tracing::warn;

/// Run a fallible teardown step, logging instead of propagating.
///
/// Disposal paths must make progress past individual failures — a dead
/// transport must not keep audio devices open.
pub fn try_best_effort<T, E: std::fmt::Display>(label: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{label}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_best_effort_passes_ok_through() {
        let value = try_best_effort::<_, String>("step", Ok(42));
        assert_eq!(value, Some(42));
    }

    #[test]
    fn try_best_effort_swallows_errors() {
        let value = try_best_effort::<i32, _>("step", Err("boom"));
        assert_eq!(value, None);
    }
}
