//! Parfetch Core Library
//!
//! This library provides a concurrent content-fetch engine: a bounded worker
//! pool that executes many independent downloads (HTTP/HTTPS, local files,
//! FTP) in parallel, streams each body through integrity validators, and
//! gives every download a bounded self-repair opportunity before declaring
//! terminal failure.
//!
//! # Architecture
//!
//! Everything lives under the [`download`] module:
//! - [`download::Writer`] - scoped byte sink streaming chunks through validators
//! - [`download::Validation`] - post-download size and digest checks
//! - [`download::Download`] - one fetch unit with a retry/repair state machine
//! - [`download::Batch`] - bounded concurrent executor feeding a completion
//!   iterator
//!
//! The crate owns no listener, CLI, or persisted format; callers supply the
//! stream of downloads and consume validated files or in-memory bodies.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;

// Re-export commonly used types
pub use download::{
    Batch, BatchError, BatchStats, BasicAuth, Completion, Completions, Destination, Download,
    DownloadDelegate, DownloadError, DownloadOptions, Repair, State, Transport, Validation,
    ValidationError, Writer, DEFAULT_BACKLOG, DEFAULT_CONCURRENCY,
};
