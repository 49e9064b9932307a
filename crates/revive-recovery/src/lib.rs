#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

//! Recovery orchestration for torrents halted on storage errors.
//!
//! Layout: `probe.rs` (TTL probe cache with shared in-flight probes),
//! `classification.rs` (diagnosis and the classification registry),
//! `sequencer.rs` (corrective steps for one torrent), `gate.rs` (single-flight
//! session gate and FIFO queue), `poller.rs` (volume reattach detection),
//! `bulk.rs` (bounded worker pool), `inline_editor.rs` (manual path entry),
//! and `controller.rs` (the entry points the UI calls).

pub mod bulk;
pub mod classification;
pub mod controller;
pub mod error;
pub mod gate;
pub mod inline_editor;
pub mod keys;
pub mod outcome;
pub mod poller;
pub mod probe;
pub mod sequencer;

pub use bulk::{
    BatchFailureReason, BatchOutcome, BatchReport, BulkScheduler, ItemOutcome, ItemReport,
};
pub use classification::{
    Classification, ClassificationEvidence, ClassificationRegistry, Classifier, classify,
};
pub use controller::{LocationPick, RecoveryController, ResumeOptions, ResumeOutcome};
pub use error::{EditorError, RecoveryError, RecoveryResult};
pub use gate::{GateSnapshot, QueuedView, RecoveryGate, RecoverySessionView};
pub use inline_editor::{
    ConfirmOutcome, EditorStatus, InlineEditorState, InlineLocationEditor, InlineOwner,
    LocationApplier,
};
pub use outcome::{
    PathNeededReason, RecoveryAction, RecoveryGateOutcome, RecoveryLog, RecoveryOutcome,
};
pub use poller::{PollReport, VolumeLossPoller};
pub use probe::{ProbeCache, ProbeKind, ProbeResult, Prober};
pub use sequencer::{SequenceOptions, SequenceResult, Sequencer};
