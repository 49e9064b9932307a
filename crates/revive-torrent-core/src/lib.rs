#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

//! Daemon-agnostic torrent DTOs, recovery fingerprints, and the collaborator
//! traits the recovery engine talks through.
//!
//! Layout: `model/` (snapshots, error envelopes, fingerprints, capabilities),
//! `service/` (transport, browse, and feedback traits), `error.rs` (typed
//! failures recovered from transport errors).

pub mod error;
pub mod model;
pub mod service;

pub use error::{TorrentError, TorrentResult};
pub use model::{
    EnvironmentCapabilities, ErrorClass, ErrorEnvelope, ExecutionModel, Feedback, FeedbackTone,
    FreeSpace, RecoveryFingerprint, TorrentDetail, TorrentFileDetail, TorrentId, TorrentSnapshot,
    TorrentState, UNIDENTIFIED_FINGERPRINT, fingerprint_of,
};
pub use service::{DirectoryBrowser, FeedbackSink, TorrentTransport};
