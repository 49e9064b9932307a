#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

//! Tunables for the recovery engine: probe expiry, polling cadence, bulk
//! concurrency, and resume confirmation timing.
//!
//! Layout: `model.rs` (the `RecoveryConfig` document), `defaults.rs`
//! (shipped values), `loader.rs` (JSON and environment sources),
//! `validate.rs` (range checks), `error.rs` (`ConfigError`).

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ENV_PREFIX, load_from_env, load_from_json};
pub use model::RecoveryConfig;
pub use validate::MAX_BULK_CONCURRENCY;
