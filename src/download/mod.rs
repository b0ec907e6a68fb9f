//! Concurrent download engine with streaming validation and bounded repair.
//!
//! This module provides everything needed to fetch many artifacts in
//! parallel: a [`Download`] unit that knows how to fetch and validate one
//! artifact, protocol adapters for HTTP(S)/local files and FTP, and a
//! [`Batch`] executor that runs downloads through a bounded worker pool and
//! delivers them to a single consumer in completion order.
//!
//! # Overview
//!
//! A download streams its body into a [`Writer`] (file-backed or in-memory),
//! feeding every chunk through the registered [`Validation`]s. On failure the
//! download enters a bounded repair loop driven by its [`DownloadDelegate`]:
//! the delegate decides whether a retry is worth attempting (refreshed token,
//! rotated mirror), and the retry budget only ever decreases.
//!
//! # Example
//!
//! ```no_run
//! use parfetch::download::{Batch, Destination, Download};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloads = (0..3)
//!     .map(|i| {
//!         Download::new(
//!             &format!("https://content.example/pkg-{i}.rpm"),
//!             Destination::File(format!("/tmp/working/pkg-{i}.rpm").into()),
//!         )
//!     })
//!     .collect::<Result<Vec<_>, _>>()?;
//!
//! let mut batch = Batch::from_downloads(downloads, 2)?;
//! let mut completions = batch.download()?;
//! while let Some(result) = completions.next().await {
//!     match result {
//!         Ok(completion) if completion.succeeded() => {
//!             // Use the downloaded file \o/
//!         }
//!         Ok(completion) => eprintln!("download failed: {:?}", completion.error()),
//!         Err(fatal) => eprintln!("batch failed: {fatal}"),
//!     }
//! }
//! batch.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod batch;
mod context;
mod core;
mod error;
mod ftp;
mod http;
mod iterator;
mod options;
mod validation;
mod writer;

pub use batch::{Batch, BatchError, BatchStats, Completion, DEFAULT_BACKLOG, DEFAULT_CONCURRENCY};
pub use context::{Context, SharedResources};
pub use self::core::{Download, DownloadDelegate, Repair, Reply, State, Transport, DEFAULT_RETRIES};
pub use error::DownloadError;
pub use ftp::FtpTransport;
pub use http::HttpTransport;
pub use iterator::Completions;
pub use options::{BasicAuth, DownloadOptions, TlsOptions, CONNECT_TIMEOUT, READ_TIMEOUT};
pub use validation::{DigestValidation, SizeValidation, Validation, ValidationError, ALGORITHMS};
pub use writer::{Destination, Writer};

// Note: no module-local Result aliases. Use `Result<T, DownloadError>`
// explicitly in function signatures.
