//! Translation keys for user-facing feedback.

/// A previously unreachable volume came back.
pub const DRIVE_DETECTED: &str = "recovery.drive_detected";
/// A torrent was resumed.
pub const RESUMED: &str = "recovery.resumed";
/// Resume was accepted but the torrent never reported an active state.
pub const RESUME_PENDING: &str = "recovery.resume_pending";
/// Recovery is waiting for the user to act.
pub const BLOCKED: &str = "recovery.blocked";
/// Recovery failed.
pub const FAILED: &str = "recovery.failed";
/// A verify pass was started.
pub const VERIFY_STARTED: &str = "recovery.verify_started";
/// Trackers were re-announced.
pub const REANNOUNCE_STARTED: &str = "recovery.reannounce_started";
/// A new location was applied.
pub const LOCATION_APPLIED: &str = "recovery.location_applied";
/// No browse capability is available; the inline editor must be used.
pub const INLINE_EDITOR_REQUIRED: &str = "recovery.inline_editor_required";
/// Every item in a bulk resume succeeded.
pub const BULK_RESUME_SUCCESS: &str = "bulk.resume.success";
/// At least one item in a bulk resume failed.
pub const BULK_RESUME_FAILED: &str = "bulk.resume.failed";
