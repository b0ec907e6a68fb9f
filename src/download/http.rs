//! HTTP(S) and local-file protocol adapter.
//!
//! Issues a GET for the download's URL, maps any non-200 reply to a failure,
//! and streams the body through the download's chunked-write primitive. The
//! underlying `reqwest` client is built lazily from the first download's
//! options and cached in the shared context, so every download in a batch
//! reuses one connection pool. The `file://` scheme is handled here as well:
//! the path is opened directly and reported as status 200.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::USER_AGENT;
use reqwest::{Certificate, Client, Proxy};
use tokio::io::AsyncReadExt;
use tracing::debug;
use url::Url;

use super::core::{Download, Reply, Transport};
use super::error::DownloadError;
use super::options::DownloadOptions;

/// Read block size for local-file streaming.
const FILE_BLOCK: usize = 65_536;

/// The HTTP(S)/local-file implementation of [`Transport`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransport;

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, download: &mut Download) -> Result<(), DownloadError> {
        if download.url().scheme() == "file" {
            return send_file(download).await;
        }

        let url = download.url().clone();
        let client = download
            .context()
            .shared()
            .http_client(download.options())
            .await?
            .clone();

        let mut request = client.get(url.as_str());
        if let Some(user_agent) = &download.options().user_agent {
            request = request.header(USER_AGENT, user_agent);
        }
        for (name, value) in &download.options().headers {
            request = request.header(name, value);
        }
        if let Some(auth) = &download.options().basic_auth {
            request = request.basic_auth(&auth.username, auth.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error(&url, e))?;
        let status = response.status().as_u16();
        download.set_reply(Reply {
            status,
            content_length: response.content_length(),
        });
        if status != 200 {
            return Err(DownloadError::http_status(url.as_str(), status));
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| request_error(&url, e))?;
            download.append(&chunk).await?;
        }
        debug!(url = %url, "body streamed");
        Ok(())
    }
}

/// Streams a `file://` URL from the local filesystem, reporting status 200.
async fn send_file(download: &mut Download) -> Result<(), DownloadError> {
    let url = download.url().clone();
    let path = url
        .to_file_path()
        .map_err(|()| DownloadError::invalid_url(url.as_str()))?;

    let mut file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| DownloadError::io(path.clone(), e))?;
    let content_length = tokio::fs::metadata(&path).await.ok().map(|m| m.len());
    download.set_reply(Reply {
        status: 200,
        content_length,
    });

    let mut buffer = vec![0u8; FILE_BLOCK];
    loop {
        let count = file
            .read(&mut buffer)
            .await
            .map_err(|e| DownloadError::io(path.clone(), e))?;
        if count == 0 {
            break;
        }
        download.append(&buffer[..count]).await?;
    }
    Ok(())
}

/// Maps a reqwest failure onto the download error taxonomy.
fn request_error(url: &Url, source: reqwest::Error) -> DownloadError {
    if source.is_timeout() {
        DownloadError::timeout(url.as_str())
    } else {
        DownloadError::network(url.as_str(), source)
    }
}

/// Builds the pooled client from one download's options.
pub(crate) fn build_client(options: &DownloadOptions) -> Result<Client, DownloadError> {
    let mut builder = Client::builder()
        .connect_timeout(options.connect_timeout)
        .read_timeout(options.read_timeout)
        .gzip(true);
    if let Some(proxy_url) = &options.proxy_url {
        let proxy = Proxy::all(proxy_url).map_err(DownloadError::configuration)?;
        builder = builder.proxy(proxy);
    }
    if let Some(ca_path) = &options.tls.ca_certificate {
        let pem = std::fs::read(ca_path).map_err(|e| DownloadError::io(ca_path.clone(), e))?;
        let certificate = Certificate::from_pem(&pem).map_err(DownloadError::configuration)?;
        builder = builder.add_root_certificate(certificate);
    }
    if options.tls.accept_invalid_certs {
        builder = builder.danger_accept_invalid_certs(true);
    }
    builder.build().map_err(DownloadError::configuration)
}
