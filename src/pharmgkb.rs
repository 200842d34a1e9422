use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};

use crate::config::ResolvedConfig;
use crate::error::PgxError;

/// Upstream resources one synchronization run pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// `clinicalAnnotations.zip` bulk download.
    ClinicalAnnotations,
    /// Full guideline annotation documents.
    Guidelines,
}

impl Resource {
    pub fn name(&self) -> &'static str {
        match self {
            Resource::ClinicalAnnotations => "clinical-annotations",
            Resource::Guidelines => "guidelines",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub trait Fetcher: Send + Sync {
    fn fetch(&self, resource: Resource) -> Result<Vec<u8>, PgxError>;
}

#[derive(Clone)]
pub struct PharmGkbHttpClient {
    client: Client,
    api_base_url: String,
    clinical_annotations_url: String,
}

impl PharmGkbHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, PgxError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-pgx/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| PgxError::InvalidHeader(err.to_string()))?,
        );
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| PgxError::InvalidHeader(format!("{name}: {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| PgxError::InvalidHeader(format!("{name}: {err}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| PgxError::PharmGkbHttp(err.to_string()))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.clone(),
            clinical_annotations_url: config.clinical_annotations_url.clone(),
        })
    }

    pub fn resource_url(&self, resource: Resource) -> String {
        match resource {
            Resource::ClinicalAnnotations => self.clinical_annotations_url.clone(),
            Resource::Guidelines => format!("{}/data/guideline?view=max", self.api_base_url),
        }
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, PgxError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        std::thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(PgxError::PharmGkbHttp(err.to_string()));
                }
            }
        }
    }
}

impl Fetcher for PharmGkbHttpClient {
    fn fetch(&self, resource: Resource) -> Result<Vec<u8>, PgxError> {
        let url = self.resource_url(resource);
        tracing::debug!(%resource, %url, "pharmgkb.request");
        let response = self.send_with_retries(|| self.client.get(&url))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "PharmGKB request failed".to_string());
            return Err(PgxError::PharmGkbStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| PgxError::PharmGkbHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
