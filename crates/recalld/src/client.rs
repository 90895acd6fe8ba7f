//! HTTP clients for the recognize and summary endpoints.
//!
//! Both are thin: one request, no retries, every failure mapped onto the
//! coordinator's error taxonomy.

use anyhow::{Context, Result};
use recall_core::{
    Frame, PersonProfile, RecognitionResult, RecognitionService, RecognitionUnavailable,
    SummaryService, SummaryUnavailable,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

/// Build the shared HTTP client. `api_key`, when set, is sent the way hosted
/// function gateways expect it: as a bearer token and as an `apikey` header.
pub fn http_client(timeout: Duration, api_key: Option<&str>) -> Result<Client> {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {key}")).context("invalid API key")?,
        );
        headers.insert("apikey", HeaderValue::from_str(key).context("invalid API key")?);
    }
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .context("failed to create HTTP client")
}

/// Append path segments to `base`, keeping any path the base already has.
fn endpoint(base: &Url, segments: &[&str]) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(segments);
    Some(url)
}

pub struct HttpRecognitionClient {
    http: Client,
    url: Url,
}

impl HttpRecognitionClient {
    pub fn new(http: Client, base: &Url) -> Result<Self> {
        let url = endpoint(base, &["recognize"])
            .with_context(|| format!("API URL cannot take a path: {base}"))?;
        Ok(Self { http, url })
    }
}

impl RecognitionService for HttpRecognitionClient {
    async fn recognize(&self, frame: Frame) -> Result<RecognitionResult, RecognitionUnavailable> {
        let part = Part::bytes(frame.data)
            .file_name("frame.jpg")
            .mime_str(frame.mime)
            .map_err(|e| RecognitionUnavailable(format!("invalid frame mime type: {e}")))?;
        let form = Form::new().part("image", part);

        let response = self
            .http
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| RecognitionUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecognitionUnavailable(format!("HTTP {status}: {body}")));
        }

        response
            .json::<RecognitionResult>()
            .await
            .map_err(|e| RecognitionUnavailable(format!("malformed response: {e}")))
    }
}

pub struct HttpSummaryClient {
    http: Client,
    base: Url,
}

impl HttpSummaryClient {
    pub fn new(http: Client, base: &Url) -> Result<Self> {
        endpoint(base, &["summary"])
            .with_context(|| format!("API URL cannot take a path: {base}"))?;
        Ok(Self {
            http,
            base: base.clone(),
        })
    }
}

impl SummaryService for HttpSummaryClient {
    async fn fetch_summary(&self, person_id: &str) -> Result<PersonProfile, SummaryUnavailable> {
        let url = endpoint(&self.base, &["summary", person_id])
            .ok_or_else(|| SummaryUnavailable::Service(format!("bad API URL: {}", self.base)))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| SummaryUnavailable::Service(format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SummaryUnavailable::NotFound(person_id.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummaryUnavailable::Service(format!("HTTP {status}: {body}")));
        }

        let mut profile = response
            .json::<PersonProfile>()
            .await
            .map_err(|e| SummaryUnavailable::Service(format!("malformed response: {e}")))?;
        profile.person_id = person_id.to_string();
        Ok(profile)
    }
}
