use std::fs::File;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION, USER_AGENT};
use serde_json::Value;

use crate::domain::item_id_level_token;
use crate::error::MirrorError;

/// Expected properties of a download, taken from the archive listing.
///
/// When set, the client verifies the served file against them.
#[derive(Debug, Clone, Default)]
pub struct Expected {
    pub file_name: Option<String>,
    pub file_size: Option<i64>,
}

/// A completed download: where it landed and how many bytes were written.
#[derive(Debug, Clone)]
pub struct Download {
    pub path: Utf8PathBuf,
    pub bytes: u64,
}

/// Capability to query and download from the archive.
///
/// The sync driver depends only on this trait; production uses
/// [`SoarHttpClient`], tests inject mocks.
pub trait ArchiveClient: Send + Sync {
    /// Fetches the public file table restricted to one instrument.
    ///
    /// The per-instrument restriction is load-bearing: an unrestricted
    /// query is silently truncated by the archive's server-side time limit.
    fn listing(&self, instrument: &str) -> Result<Value, MirrorError>;

    /// Downloads the latest version of one item into `directory`.
    fn download_latest(
        &self,
        item_id: &str,
        directory: &Utf8Path,
        expected: Option<&Expected>,
    ) -> Result<Download, MirrorError>;
}

#[derive(Clone)]
pub struct SoarHttpClient {
    client: Client,
    base_url: String,
}

impl SoarHttpClient {
    pub fn new() -> Result<Self, MirrorError> {
        Self::with_base_url("https://soar.esac.esa.int/soar-sl-tap".to_string())
    }

    pub fn with_base_url(base_url: String) -> Result<Self, MirrorError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("solo-mirror/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MirrorError::ArchiveHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| MirrorError::ArchiveHttp(err.to_string()))?;
        Ok(Self { client, base_url })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, MirrorError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(MirrorError::ArchiveHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, MirrorError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "archive request failed".to_string());
        Err(MirrorError::ArchiveStatus { status, message })
    }
}

impl ArchiveClient for SoarHttpClient {
    fn listing(&self, instrument: &str) -> Result<Value, MirrorError> {
        let url = format!("{}/tap/sync", self.base_url);
        let query = format!(
            "SELECT * FROM v_public_files WHERE instrument='{instrument}'"
        );
        let response = self.send_with_retries(|| {
            self.client.get(&url).query(&[
                ("REQUEST", "doQuery"),
                ("LANG", "ADQL"),
                ("FORMAT", "json"),
                ("QUERY", query.as_str()),
            ])
        })?;
        let response = Self::handle_status(response)?;
        let value: Value = response
            .json()
            .map_err(|err| MirrorError::Protocol(format!("non-JSON listing: {err}")))?;
        if !value.is_object() {
            return Err(MirrorError::Protocol(
                "listing root is not a JSON object".to_string(),
            ));
        }
        Ok(value)
    }

    fn download_latest(
        &self,
        item_id: &str,
        directory: &Utf8Path,
        expected: Option<&Expected>,
    ) -> Result<Download, MirrorError> {
        let product_type = product_type(item_id)?;
        let url = format!("{}/data", self.base_url);
        let response = self.send_with_retries(|| {
            self.client.get(&url).query(&[
                ("data_item_id", item_id),
                ("retrieval_type", "LAST_PRODUCT"),
                ("product_type", product_type),
            ])
        })?;
        if matches!(response.status().as_u16(), 400 | 404) {
            return Err(MirrorError::ItemNotFound(item_id.to_string()));
        }
        let mut response = Self::handle_status(response)?;

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|value| value.to_str().ok())
            .and_then(content_disposition_filename)
            .ok_or_else(|| {
                MirrorError::Protocol(format!(
                    "download response for {item_id} carries no filename"
                ))
            })?;

        if let Some(expected_name) = expected.and_then(|exp| exp.file_name.as_deref()) {
            if expected_name != file_name {
                return Err(MirrorError::NameMismatch {
                    expected: expected_name.to_string(),
                    actual: file_name,
                });
            }
        }

        let destination = directory.join(&file_name);
        let mut file = File::create(destination.as_std_path())
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?;
        let written = std::io::copy(&mut response, &mut file)
            .map_err(|err| MirrorError::Filesystem(err.to_string()))?;

        if let Some(expected_size) = expected.and_then(|exp| exp.file_size) {
            if expected_size != written as i64 {
                return Err(MirrorError::SizeMismatch {
                    expected: expected_size,
                    actual: written as i64,
                });
            }
        }

        Ok(Download {
            path: destination,
            bytes: written,
        })
    }
}

/// Download endpoint routing: low-latency item identifiers go to the
/// `LOW_LATENCY` product endpoint, everything else to `SCIENCE`.
pub fn product_type(item_id: &str) -> Result<&'static str, MirrorError> {
    let level = item_id_level_token(item_id)?;
    Ok(if matches!(level.as_str(), "LL01" | "LL02") {
        "LOW_LATENCY"
    } else {
        "SCIENCE"
    })
}

/// Extracts the `filename=` attribute, stripping surrounding quotes.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    let re = Regex::new(r#"filename="?([^";]+)"?"#).unwrap();
    re.captures(header)
        .map(|caps| caps[1].trim_matches('"').to_string())
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
