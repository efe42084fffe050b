// src/fetch/client.rs

//! Source transports
//!
//! A [`Transport`] streams one URL into a writer and classifies failures as
//! transient (worth another attempt) or permanent. [`HttpTransport`] covers
//! `http`, `https` and local `file` URLs.

use reqwest::blocking::Client;
use std::fs::File;
use std::io::{self, Read, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// A single failed download attempt
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failures, timeouts, 5xx responses
    #[error("{0}")]
    Transient(String),

    /// 4xx responses, missing local files, unsupported schemes
    #[error("{0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Downloads a URL into a writer
pub trait Transport: Send + Sync {
    /// Stream the resource at `url` into `dest`, returning the byte count
    fn download(&self, url: &Url, dest: &mut dyn Write) -> Result<u64, TransportError>;
}

/// reqwest-backed transport with `file://` support
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("formulary/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                TransportError::Permanent(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client })
    }

    fn download_http(&self, url: &Url, dest: &mut dyn Write) -> Result<u64, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| TransportError::Transient(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(TransportError::Permanent(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(TransportError::Transient(format!("HTTP {status}")));
        }

        stream(response, dest)
    }

    fn download_file(&self, url: &Url, dest: &mut dyn Write) -> Result<u64, TransportError> {
        let path = url
            .to_file_path()
            .map_err(|_| TransportError::Permanent(format!("Invalid file URL: {url}")))?;

        let file = File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                TransportError::Permanent(format!("{}: {e}", path.display()))
            }
            _ => TransportError::Transient(format!("{}: {e}", path.display())),
        })?;

        stream(file, dest)
    }
}

impl Transport for HttpTransport {
    fn download(&self, url: &Url, dest: &mut dyn Write) -> Result<u64, TransportError> {
        debug!("Downloading {}", url);
        match url.scheme() {
            "http" | "https" => self.download_http(url, dest),
            "file" => self.download_file(url, dest),
            other => Err(TransportError::Permanent(format!(
                "Unsupported URL scheme '{other}'"
            ))),
        }
    }
}

/// Copy in fixed-size chunks so large archives never sit in memory
fn stream<R: Read>(mut reader: R, dest: &mut dyn Write) -> Result<u64, TransportError> {
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        let read = reader
            .read(&mut buffer)
            .map_err(|e| TransportError::Transient(format!("Failed to read response: {e}")))?;
        if read == 0 {
            break;
        }
        dest.write_all(&buffer[..read])
            .map_err(|e| TransportError::Permanent(format!("Failed to write data: {e}")))?;
        total += read as u64;
    }

    Ok(total)
}
