//! Forwards images to an upstream face matcher.

use recall_core::RecognitionResult;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use thiserror::Error;

pub const NO_FACE_MESSAGE: &str = "No face detected";

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("matcher request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("matcher returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Uploaded image as received from the client.
#[derive(Debug, Clone)]
pub struct Image {
    pub data: Vec<u8>,
    pub mime: String,
}

pub struct Matcher {
    http: Client,
    url: Option<String>,
}

impl Matcher {
    pub fn new(http: Client, url: Option<String>) -> Self {
        if url.is_none() {
            tracing::warn!("no face matcher configured; every image answers \"{NO_FACE_MESSAGE}\"");
        }
        Self { http, url }
    }

    /// Identify who is in `image`. A missing image, an unconfigured matcher,
    /// or an upstream "no match" all answer a null person.
    pub async fn recognize(&self, image: Option<Image>) -> Result<RecognitionResult, MatchError> {
        let (Some(url), Some(image)) = (&self.url, image) else {
            return Ok(no_face());
        };
        tracing::debug!(bytes = image.data.len(), mime = %image.mime, "forwarding image to matcher");

        let part = Part::bytes(image.data)
            .file_name("frame.jpg")
            .mime_str(&image.mime)?;
        let response = self
            .http
            .post(url)
            .multipart(Form::new().part("image", part))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MatchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result: RecognitionResult = response.json().await?;
        Ok(normalize(result))
    }
}

fn no_face() -> RecognitionResult {
    RecognitionResult {
        message: Some(NO_FACE_MESSAGE.to_string()),
        ..RecognitionResult::no_match()
    }
}

/// Blank ids become null and a null person always carries a message.
fn normalize(result: RecognitionResult) -> RecognitionResult {
    match result.person() {
        Some(id) => RecognitionResult::matched(id, result.confidence),
        None => RecognitionResult {
            message: result.message.or_else(|| Some(NO_FACE_MESSAGE.to_string())),
            ..RecognitionResult::no_match()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve_once;

    fn jpeg() -> Option<Image> {
        Some(Image {
            data: vec![0xFF, 0xD8, 0xFF, 0xD9],
            mime: "image/jpeg".into(),
        })
    }

    #[tokio::test]
    async fn test_unconfigured_reports_no_face() {
        let matcher = Matcher::new(Client::new(), None);
        let result = matcher.recognize(jpeg()).await.unwrap();
        assert_eq!(result.person(), None);
        assert_eq!(result.message.as_deref(), Some(NO_FACE_MESSAGE));
    }

    #[tokio::test]
    async fn test_missing_image_is_not_forwarded() {
        let matcher = Matcher::new(Client::new(), Some("http://127.0.0.1:9/never".into()));
        let result = matcher.recognize(None).await.unwrap();
        assert_eq!(result.person(), None);
    }

    #[tokio::test]
    async fn test_forwards_and_normalizes_match() {
        let (url, request) = serve_once("200 OK", r#"{"personId":"p1","confidence":0.91}"#).await;
        let matcher = Matcher::new(Client::new(), Some(url));
        let result = matcher.recognize(jpeg()).await.unwrap();
        assert_eq!(result.person(), Some("p1"));
        assert_eq!(result.confidence, Some(0.91));

        let request = request.await.unwrap();
        assert!(request.contains(r#"name="image""#));
        assert!(request.contains("image/jpeg"));
    }

    #[tokio::test]
    async fn test_blank_person_id_is_no_match() {
        let (url, _request) = serve_once("200 OK", r#"{"personId":"","confidence":0.2}"#).await;
        let matcher = Matcher::new(Client::new(), Some(url));
        let result = matcher.recognize(jpeg()).await.unwrap();
        assert_eq!(result.person_id, None);
        assert_eq!(result.message.as_deref(), Some(NO_FACE_MESSAGE));
    }

    #[tokio::test]
    async fn test_upstream_error() {
        let (url, _request) = serve_once("503 Service Unavailable", "busy").await;
        let matcher = Matcher::new(Client::new(), Some(url));
        match matcher.recognize(jpeg()).await {
            Err(MatchError::Status { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }
}
