//! The download unit: a retry/repair state machine with pluggable hooks.
//!
//! A [`Download`] fetches one artifact: it opens a [`Writer`] for the
//! destination, asks its protocol [`Transport`] to send, streams every chunk
//! through the registered validators, and verifies the result. On failure it
//! enters a bounded repair loop: the [`DownloadDelegate`]'s `on_error` hook
//! decides whether a repair action was taken (refreshed token, rotated
//! mirror) and a retry is worth attempting. The retry budget only ever
//! decreases, and the base delegate never retries unsupervised.
//!
//! # Example
//!
//! ```no_run
//! use parfetch::download::{Destination, Download, Validation};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut download = Download::new(
//!     "https://content.example/dog.rpm",
//!     Destination::File("/tmp/working/dog.rpm".into()),
//! )?
//! .with_validation(Validation::size(2048))
//! .with_retries(2);
//!
//! download.execute().await?;
//! assert!(download.succeeded());
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};
use url::Url;

use super::context::Context;
use super::error::DownloadError;
use super::ftp::FtpTransport;
use super::http::HttpTransport;
use super::options::DownloadOptions;
use super::validation::Validation;
use super::writer::{Destination, Writer};

/// Default retry budget for a new download.
pub const DEFAULT_RETRIES: u32 = 1;

/// Lifecycle states of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Constructed, not yet executed.
    Created,
    /// The prepare hook is running.
    Preparing,
    /// An attempt is streaming the body.
    Sending,
    /// A failed attempt is consulting the `on_error` hook.
    Repairing,
    /// Terminal success.
    Succeeded,
    /// Terminal failure (or a failed attempt awaiting repair).
    Failed,
}

/// Outcome of the `on_error` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repair {
    /// A repair action was taken; rerunning the attempt is worthwhile.
    Repaired,
    /// Nothing was repaired; stop retrying.
    NotRepaired,
}

/// What the server said about the artifact.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    /// Protocol status (HTTP status code; 200 for file and FTP transfers).
    pub status: u16,
    /// Body length announced by the server, when known.
    pub content_length: Option<u64>,
}

/// A protocol adapter. Implementations provide only `send`: issue the
/// transfer and stream the body through [`Download::append`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs the transfer for `download`.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] describing the transport failure.
    async fn send(&self, download: &mut Download) -> Result<(), DownloadError>;
}

/// Lifecycle hooks for a download.
///
/// Every method has a default, so a delegate implements only the hooks it
/// needs and is chosen at construction via [`Download::with_delegate`].
#[async_trait]
pub trait DownloadDelegate: Send + Sync {
    /// Runs before the first attempt.
    ///
    /// # Errors
    ///
    /// A prepare failure aborts the download without entering the repair
    /// loop.
    async fn prepare(&self, download: &mut Download) -> Result<(), DownloadError> {
        let _ = download;
        Ok(())
    }

    /// Runs after the transport replied and the body has streamed, while the
    /// writer is still open. The reply is available via [`Download::reply`].
    ///
    /// # Errors
    ///
    /// A reply-hook failure fails the attempt like a transport error.
    async fn on_reply(&self, download: &mut Download) -> Result<(), DownloadError> {
        let _ = download;
        Ok(())
    }

    /// Runs after a successful attempt. Default: run the validators.
    ///
    /// # Errors
    ///
    /// A failure here fails the attempt like a transport error.
    async fn on_succeeded(&self, download: &mut Download) -> Result<(), DownloadError> {
        self.validate(download).await
    }

    /// Runs exactly once when the download terminally fails.
    async fn on_failed(&self, download: &mut Download, error: &DownloadError) {
        let _ = (download, error);
    }

    /// Decides whether a failed attempt is worth retrying. Default: nothing
    /// was repaired, so the base implementation never retries unsupervised.
    ///
    /// # Errors
    ///
    /// An error from this hook is logged by the repair loop and the original
    /// failure is surfaced instead; it never reaches the caller.
    async fn on_error(
        &self,
        download: &mut Download,
        error: &DownloadError,
    ) -> Result<Repair, DownloadError> {
        let _ = (download, error);
        Ok(Repair::NotRepaired)
    }

    /// Verifies the completed download. Default: apply the registered
    /// validators in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    async fn validate(&self, download: &mut Download) -> Result<(), DownloadError> {
        download.validate().await
    }
}

/// The built-in delegate: every hook keeps its default behavior.
struct DefaultDelegate;

impl DownloadDelegate for DefaultDelegate {}

/// One unit of work: an artifact to fetch and validate.
pub struct Download {
    url: Url,
    destination: Destination,
    options: DownloadOptions,
    context: Context,
    validations: Vec<Validation>,
    retries: u32,
    state: State,
    transport: Arc<dyn Transport>,
    delegate: Option<Arc<dyn DownloadDelegate>>,
    attachment: Option<Box<dyn Any + Send + Sync>>,
    writer: Option<Writer>,
    reply: Option<Reply>,
}

impl Download {
    /// Creates a download for the URL, choosing the protocol adapter from
    /// the scheme (`http`/`https`/`file` or `ftp`).
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::InvalidUrl`] for unparseable URLs and
    /// [`DownloadError::UnsupportedScheme`] for schemes without an adapter.
    pub fn new(url: &str, destination: Destination) -> Result<Self, DownloadError> {
        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let transport: Arc<dyn Transport> = match parsed.scheme() {
            "http" | "https" | "file" => Arc::new(HttpTransport),
            "ftp" => Arc::new(FtpTransport),
            scheme => return Err(DownloadError::unsupported_scheme(url, scheme)),
        };
        Ok(Self {
            url: parsed,
            destination,
            options: DownloadOptions::default(),
            context: Context::new(),
            validations: Vec::new(),
            retries: DEFAULT_RETRIES,
            state: State::Created,
            transport,
            delegate: None,
            attachment: None,
            writer: None,
            reply: None,
        })
    }

    /// Registers a validator. Validators run in registration order.
    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validations.push(validation);
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the download options.
    #[must_use]
    pub fn with_options(mut self, options: DownloadOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the delegate providing hook overrides.
    #[must_use]
    pub fn with_delegate(mut self, delegate: Arc<dyn DownloadDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Replaces the protocol adapter chosen from the scheme.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// The URL being fetched.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Where the body is being written.
    #[must_use]
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// The download options.
    #[must_use]
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Mutable access to the download options.
    pub fn options_mut(&mut self) -> &mut DownloadOptions {
        &mut self.options
    }

    /// The shared context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Mutable access to the shared context.
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The remaining retry budget. Monotonically decreasing.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether the download reached terminal success.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.state == State::Succeeded
    }

    /// The reply from the most recent attempt, if the transport got far
    /// enough to produce one.
    #[must_use]
    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }

    /// Records the transport's reply. Called by protocol adapters.
    pub fn set_reply(&mut self, reply: Reply) {
        self.reply = Some(reply);
    }

    /// The fetched body for in-memory destinations.
    #[must_use]
    pub fn body(&self) -> Option<&[u8]> {
        self.writer.as_ref().and_then(Writer::buffered)
    }

    /// Attaches an opaque caller object, replacing any existing one.
    pub fn attach<T>(&mut self, value: T)
    where
        T: Any + Send + Sync,
    {
        self.attachment = Some(Box::new(value));
    }

    /// The attachment, if one of type `T` is present.
    #[must_use]
    pub fn attachment<T>(&self) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        self.attachment.as_ref().and_then(|a| a.downcast_ref())
    }

    /// Merges the batch context into this download's. Batch wins on key
    /// conflicts.
    pub(crate) fn merge_context(&mut self, batch: &Context) {
        self.context.merge_from(batch);
    }

    /// Appends a streamed chunk: validators first, then the sink. This is
    /// the chunked-write primitive protocol adapters use.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when no attempt is in flight or the
    /// write fails.
    pub async fn append(&mut self, data: &[u8]) -> Result<usize, DownloadError> {
        match self.writer.as_mut() {
            Some(writer) => writer.append(data).await,
            None => Err(DownloadError::io(
                std::path::PathBuf::from(self.url.path()),
                std::io::Error::other("no attempt in flight"),
            )),
        }
    }

    /// Applies the registered validators in registration order; the first
    /// failure aborts the remaining checks.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`](super::ValidationError) wrapped
    /// as a [`DownloadError`].
    pub async fn validate(&mut self) -> Result<(), DownloadError> {
        let destination = self.destination.clone();
        for validation in &mut self.validations {
            validation.apply(&destination).await?;
        }
        Ok(())
    }

    /// Removes a partially written destination file, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Io`] when the file exists but cannot be
    /// removed.
    pub async fn discard(&mut self) -> Result<(), DownloadError> {
        match self.writer.as_mut() {
            Some(writer) => writer.discard().await,
            None => {
                let mut writer = Writer::new(self.destination.clone(), Vec::new());
                writer.discard().await
            }
        }
    }

    /// Executes the download: prepare, attempt, and on failure the bounded
    /// repair loop.
    ///
    /// # Errors
    ///
    /// Returns the last captured failure once the repair loop gives up.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn execute(&mut self) -> Result<(), DownloadError> {
        let delegate = self.delegate();
        self.state = State::Preparing;
        delegate.prepare(self).await?;
        match self.attempt(&delegate).await {
            Ok(()) => {
                self.state = State::Succeeded;
                debug!("download succeeded");
                Ok(())
            }
            Err(error) => self.repair(&delegate, error).await,
        }
    }

    /// The bounded repair loop: each iteration consumes budget and asks the
    /// delegate whether a retry is worth attempting.
    async fn repair(
        &mut self,
        delegate: &Arc<dyn DownloadDelegate>,
        mut error: DownloadError,
    ) -> Result<(), DownloadError> {
        self.state = State::Failed;
        while self.retries > 0 {
            self.retries -= 1;
            self.state = State::Repairing;
            debug!(remaining = self.retries, %error, "consulting on_error hook");
            match delegate.on_error(self, &error).await {
                Ok(Repair::Repaired) => match self.attempt(delegate).await {
                    Ok(()) => {
                        self.state = State::Succeeded;
                        debug!("download succeeded after repair");
                        return Ok(());
                    }
                    Err(next) => {
                        self.state = State::Failed;
                        error = next;
                    }
                },
                Ok(Repair::NotRepaired) => break,
                Err(repair_error) => {
                    // Repair-path failures never reach the caller.
                    warn!(%repair_error, "on_error hook failed; keeping original failure");
                    break;
                }
            }
        }
        self.state = State::Failed;
        delegate.on_failed(self, &error).await;
        Err(error)
    }

    /// One core attempt: open writer, send, reply hook, close writer,
    /// succeeded hook.
    async fn attempt(
        &mut self,
        delegate: &Arc<dyn DownloadDelegate>,
    ) -> Result<(), DownloadError> {
        self.state = State::Sending;
        self.reply = None;
        self.open_writer().await?;
        let transport = Arc::clone(&self.transport);
        let sent = match transport.send(self).await {
            Ok(()) => delegate.on_reply(self).await,
            Err(error) => Err(error),
        };
        // The writer closes on every exit path.
        self.close_writer().await;
        match sent {
            Ok(()) => delegate.on_succeeded(self).await,
            Err(error) => Err(error),
        }
    }

    async fn open_writer(&mut self) -> Result<(), DownloadError> {
        let mut writer = Writer::new(
            self.destination.clone(),
            std::mem::take(&mut self.validations),
        );
        if let Err(error) = writer.open().await {
            self.validations = writer.take_validations();
            return Err(error);
        }
        self.writer = Some(writer);
        Ok(())
    }

    async fn close_writer(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            writer.close().await;
            self.validations = writer.take_validations();
        }
    }

    fn delegate(&self) -> Arc<dyn DownloadDelegate> {
        self.delegate
            .clone()
            .unwrap_or_else(|| Arc::new(DefaultDelegate))
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("url", &self.url.as_str())
            .field("destination", &self.destination)
            .field("state", &self.state)
            .field("retries", &self.retries)
            .field("validations", &self.validations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::super::validation::ValidationError;
    use super::*;

    /// Delegate that counts hook invocations and answers `on_error` from a
    /// fixed script.
    #[derive(Default)]
    struct CountingDelegate {
        repaired: bool,
        prepared: AtomicUsize,
        replied: AtomicUsize,
        succeeded: AtomicUsize,
        failed: AtomicUsize,
        errored: AtomicUsize,
    }

    impl CountingDelegate {
        fn repairing() -> Self {
            Self {
                repaired: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl DownloadDelegate for CountingDelegate {
        async fn prepare(&self, _download: &mut Download) -> Result<(), DownloadError> {
            self.prepared.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_reply(&self, _download: &mut Download) -> Result<(), DownloadError> {
            self.replied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_succeeded(&self, download: &mut Download) -> Result<(), DownloadError> {
            self.succeeded.fetch_add(1, Ordering::SeqCst);
            self.validate(download).await
        }

        async fn on_failed(&self, _download: &mut Download, _error: &DownloadError) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_error(
            &self,
            _download: &mut Download,
            _error: &DownloadError,
        ) -> Result<Repair, DownloadError> {
            self.errored.fetch_add(1, Ordering::SeqCst);
            if self.repaired {
                Ok(Repair::Repaired)
            } else {
                Ok(Repair::NotRepaired)
            }
        }
    }

    /// Delegate whose repair path itself fails.
    struct BrokenRepairDelegate;

    #[async_trait]
    impl DownloadDelegate for BrokenRepairDelegate {
        async fn on_error(
            &self,
            download: &mut Download,
            _error: &DownloadError,
        ) -> Result<Repair, DownloadError> {
            Err(DownloadError::invalid_url(download.url().as_str()))
        }
    }

    async fn serve(status: u16, body: &[u8]) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dog.rpm"))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_unsupported_scheme_is_rejected() {
        let result = Download::new("gopher://content.example/dog", Destination::Memory);
        assert!(matches!(
            result,
            Err(DownloadError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let result = Download::new("not a url", Destination::Memory);
        assert!(matches!(result, Err(DownloadError::InvalidUrl { .. })));
    }

    #[test]
    fn test_attachment_round_trip() {
        let mut download =
            Download::new("https://content.example/dog.rpm", Destination::Memory).unwrap();
        download.attach(42usize);
        assert_eq!(download.attachment::<usize>(), Some(&42));
        assert_eq!(download.attachment::<String>(), None);
    }

    #[tokio::test]
    async fn test_successful_execute_reaches_succeeded_state() {
        let server = serve(200, b"dog bytes").await;
        let url = format!("{}/dog.rpm", server.uri());

        let mut download = Download::new(&url, Destination::Memory).unwrap();
        download.execute().await.unwrap();

        assert_eq!(download.state(), State::Succeeded);
        assert!(download.succeeded());
        assert_eq!(download.body(), Some(&b"dog bytes"[..]));
        assert_eq!(download.reply().unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_default_delegate_runs_validators() {
        let server = serve(200, b"dog bytes").await;
        let url = format!("{}/dog.rpm", server.uri());

        // 9 bytes served, 5 expected: the default on_succeeded must fail.
        let mut download = Download::new(&url, Destination::Memory)
            .unwrap()
            .with_validation(Validation::size(5))
            .with_retries(0);

        let error = download.execute().await.unwrap_err();
        assert!(matches!(
            error,
            DownloadError::Validation(ValidationError::Size { expected: 5, actual: 9, .. })
        ));
        assert_eq!(download.state(), State::Failed);
    }

    #[tokio::test]
    async fn test_always_failing_send_invokes_on_failed_once() {
        let server = serve(500, b"").await;
        let url = format!("{}/dog.rpm", server.uri());

        let delegate = Arc::new(CountingDelegate::default());
        let mut download = Download::new(&url, Destination::Memory)
            .unwrap()
            .with_delegate(delegate.clone());

        let error = download.execute().await.unwrap_err();
        assert!(matches!(error, DownloadError::HttpStatus { status: 500, .. }));
        assert_eq!(delegate.failed.load(Ordering::SeqCst), 1);
        assert_eq!(delegate.succeeded.load(Ordering::SeqCst), 0);
        assert_eq!(download.retries(), 0, "budget must be consumed to zero");
        assert_eq!(download.state(), State::Failed);
    }

    #[tokio::test]
    async fn test_repaired_retry_succeeds_with_remaining_budget() {
        let server = MockServer::start().await;
        // First request fails, the retry succeeds.
        Mock::given(method("GET"))
            .and(path("/dog.rpm"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dog.rpm"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"dog bytes".to_vec()))
            .with_priority(u8::MAX)
            .mount(&server)
            .await;

        let delegate = Arc::new(CountingDelegate::repairing());
        let mut download = Download::new(
            &format!("{}/dog.rpm", server.uri()),
            Destination::Memory,
        )
        .unwrap()
        .with_delegate(delegate.clone())
        .with_retries(2);

        download.execute().await.unwrap();

        assert_eq!(delegate.succeeded.load(Ordering::SeqCst), 1);
        assert_eq!(delegate.failed.load(Ordering::SeqCst), 0);
        assert_eq!(delegate.errored.load(Ordering::SeqCst), 1);
        assert_eq!(download.retries(), 1, "one retry consumed from a budget of 2");
        assert!(download.succeeded());
    }

    #[tokio::test]
    async fn test_repair_hook_failure_surfaces_original_error() {
        let server = serve(500, b"").await;
        let url = format!("{}/dog.rpm", server.uri());

        let mut download = Download::new(&url, Destination::Memory)
            .unwrap()
            .with_delegate(Arc::new(BrokenRepairDelegate))
            .with_retries(3);

        let error = download.execute().await.unwrap_err();
        // The original HTTP failure, not the InvalidUrl from the hook.
        assert!(matches!(error, DownloadError::HttpStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_renewed_failure_is_remembered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/dog.rpm"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/dog.rpm"))
            .respond_with(ResponseTemplate::new(404))
            .with_priority(u8::MAX)
            .mount(&server)
            .await;

        let delegate = Arc::new(CountingDelegate::repairing());
        let mut download = Download::new(
            &format!("{}/dog.rpm", server.uri()),
            Destination::Memory,
        )
        .unwrap()
        .with_delegate(delegate.clone())
        .with_retries(1);

        let error = download.execute().await.unwrap_err();
        // The last captured failure is the 404 from the retry.
        assert!(matches!(error, DownloadError::HttpStatus { status: 404, .. }));
        assert_eq!(delegate.failed.load(Ordering::SeqCst), 1);
        assert_eq!(download.retries(), 0);
    }

    #[tokio::test]
    async fn test_file_scheme_streams_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("dog.rpm");
        std::fs::write(&source, b"local dog bytes").unwrap();

        let url = Url::from_file_path(&source).unwrap();
        let mut download = Download::new(url.as_str(), Destination::Memory).unwrap();
        download.execute().await.unwrap();

        assert_eq!(download.body(), Some(&b"local dog bytes"[..]));
        assert_eq!(download.reply().unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_reply_hook_sees_status() {
        let server = serve(200, b"dog bytes").await;
        let delegate = Arc::new(CountingDelegate::default());
        let mut download = Download::new(
            &format!("{}/dog.rpm", server.uri()),
            Destination::Memory,
        )
        .unwrap()
        .with_delegate(delegate.clone());

        download.execute().await.unwrap();
        assert_eq!(delegate.prepared.load(Ordering::SeqCst), 1);
        assert_eq!(delegate.replied.load(Ordering::SeqCst), 1);
    }
}
