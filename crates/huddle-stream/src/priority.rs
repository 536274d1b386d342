use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::warn;

/// Raise the current thread to the given cross-platform priority (0–100).
/// Failure is logged and ignored — elevated priorities often need OS
/// capabilities the process may not have.
pub fn raise_thread_priority(value: u8, label: &str) {
    match ThreadPriorityValue::try_from(value) {
        Ok(v) => {
            if let Err(e) = set_current_thread_priority(ThreadPriority::Crossplatform(v)) {
                warn!("{label}: failed to set thread priority {value}: {e:?}");
            }
        }
        Err(e) => warn!("{label}: invalid thread priority {value}: {e:?}"),
    }
}

/// Raise the current thread to the platform maximum. Reserved for the
/// audio send thread — audio glitches are more perceptible than video
/// stutter, so the priority ladder keeps it on top.
pub fn raise_thread_priority_max(label: &str) {
    if let Err(e) = set_current_thread_priority(ThreadPriority::Max) {
        warn!("{label}: failed to set max thread priority: {e:?}");
    }
}

/// Capture runs above the encode stage so grabs stay on schedule even when
/// encoding saturates a core.
pub const CAPTURE_PRIORITY: u8 = 75;
pub const ENCODE_PRIORITY: u8 = 50;
/// Voice frame assembly sits between capture and encode.
pub const AUDIO_FRAME_PRIORITY: u8 = 75;
