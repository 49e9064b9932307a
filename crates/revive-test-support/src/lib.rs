#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (torrent and detail builders), mocks.rs (scripted
//! transport, recording feedback sink, canned directory browser).

pub mod fixtures;
pub mod mocks;

pub use fixtures::{detail, errored_torrent, healthy_torrent, missing_files_torrent};
pub use mocks::{RecordingFeedback, ScriptedTransport, StaticBrowser, TransportCall};
