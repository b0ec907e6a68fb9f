//! Shared download context.
//!
//! Every download carries a [`Context`]: a small string property map seeded
//! by the caller (shared auth headers, mirror hints) plus typed slots for
//! expensive shared resources. A batch merges its context into each download
//! it feeds — the batch wins on key conflicts — so all downloads in a batch
//! observe the same shared slots.
//!
//! The pooled HTTP client lives behind a once-cell: concurrent first use
//! races to exactly one winning construction, and every later caller gets
//! the same instance.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::debug;

use super::error::DownloadError;
use super::http;
use super::options::DownloadOptions;

/// Typed shared slots, one per batch.
#[derive(Debug, Default)]
pub struct SharedResources {
    client: OnceCell<Client>,
}

impl SharedResources {
    /// The pooled HTTP client, built lazily from the first caller's options.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Configuration`] when the client cannot be
    /// built from the options (bad proxy URL, unreadable CA bundle).
    pub async fn http_client(
        &self,
        options: &DownloadOptions,
    ) -> Result<&Client, DownloadError> {
        self.client
            .get_or_try_init(|| async {
                debug!("building pooled HTTP client");
                http::build_client(options)
            })
            .await
    }
}

/// Caller-seeded properties plus shared resource slots.
#[derive(Debug, Clone, Default)]
pub struct Context {
    properties: HashMap<String, String>,
    shared: Arc<SharedResources>,
}

impl Context {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context seeded with properties.
    #[must_use]
    pub fn with_properties(properties: HashMap<String, String>) -> Self {
        Self {
            properties,
            shared: Arc::default(),
        }
    }

    /// Sets a property, replacing any existing value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Looks up a property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The seeded properties.
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// The shared resource slots.
    #[must_use]
    pub fn shared(&self) -> &SharedResources {
        &self.shared
    }

    /// Merges a batch context into this one: batch properties win on key
    /// conflicts, keys unique to this context survive, and the shared slots
    /// become the batch's so pooled resources are visible to every download.
    pub(crate) fn merge_from(&mut self, batch: &Context) {
        for (key, value) in &batch.properties {
            self.properties.insert(key.clone(), value.clone());
        }
        self.shared = Arc::clone(&batch.shared);
    }
}
