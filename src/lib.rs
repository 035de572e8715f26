use label_detect::{AnalysisRecord, AnalysisResult, Face};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// HTTP client for a running `label-detect-server`
#[derive(Clone, Debug)]
pub struct AnalysisClient {
    http_client: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_labels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_confidence: Option<f32>,
}

#[derive(Debug, Serialize)]
struct FaceRequest<'a> {
    image: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attribute: Option<&'a str>,
}

impl AnalysisClient {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, ClientError> {
        let raw = base_url.as_ref();
        let base_url =
            Url::parse(raw).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", raw, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(format!("{}: not a base URL", raw)));
        }

        let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Analyze a reference and return the server's JSON untouched
    pub async fn request_analysis_json(
        &self,
        image: &str,
        max_labels: Option<u32>,
        min_confidence: Option<f32>,
    ) -> Result<String, ClientError> {
        let response = self
            .http_client
            .post(self.endpoint(["api", "request_analysis"])?)
            .json(&AnalysisRequest {
                image,
                max_labels,
                min_confidence,
            })
            .send()
            .await?;

        Ok(check(response).await?.text().await?)
    }

    pub async fn request_analysis(
        &self,
        image: &str,
        max_labels: Option<u32>,
        min_confidence: Option<f32>,
    ) -> Result<AnalysisResult, ClientError> {
        let body = self
            .request_analysis_json(image, max_labels, min_confidence)
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Detect faces and return the server's JSON untouched: whole faces, or
    /// one value per face when `attribute` is given
    pub async fn detect_faces_json(
        &self,
        image: &str,
        attribute: Option<&str>,
    ) -> Result<String, ClientError> {
        let response = self
            .http_client
            .post(self.endpoint(["api", "detect_faces"])?)
            .json(&FaceRequest { image, attribute })
            .send()
            .await?;

        Ok(check(response).await?.text().await?)
    }

    pub async fn detect_faces(&self, image: &str) -> Result<Vec<Face>, ClientError> {
        let body = self.detect_faces_json(image, None).await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn face_attribute(
        &self,
        image: &str,
        attribute: &str,
    ) -> Result<Vec<Value>, ClientError> {
        let body = self.detect_faces_json(image, Some(attribute)).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Store `body` as `bucket/object`, returning a presigned URL to it
    pub async fn upload(
        &self,
        bucket: &str,
        object: &str,
        body: Vec<u8>,
    ) -> Result<String, ClientError> {
        let response = self
            .http_client
            .post(self.object_url("upload", bucket, object)?)
            .body(body)
            .send()
            .await?;

        Ok(check(response).await?.json::<UploadResponse>().await?.url)
    }

    pub async fn download(&self, bucket: &str, object: &str) -> Result<Vec<u8>, ClientError> {
        let response = self
            .http_client
            .get(self.object_url("download", bucket, object)?)
            .send()
            .await?;

        Ok(check(response).await?.bytes().await?.to_vec())
    }

    pub async fn object_exists(&self, bucket: &str, object: &str) -> Result<bool, ClientError> {
        let response = self
            .http_client
            .get(self.object_url("exists", bucket, object)?)
            .send()
            .await?;

        Ok(check(response).await?.json::<ExistsResponse>().await?.exists)
    }

    pub async fn remove(&self, bucket: &str, object: &str) -> Result<(), ClientError> {
        let response = self
            .http_client
            .delete(self.object_url("delete", bucket, object)?)
            .send()
            .await?;

        check(response).await?;
        Ok(())
    }

    pub async fn generate_sql(&self, record: &AnalysisRecord) -> Result<String, ClientError> {
        let response = self
            .http_client
            .post(self.endpoint(["api", "generate", "sql"])?)
            .json(record)
            .send()
            .await?;

        Ok(check(response).await?.text().await?)
    }

    /// Keys keep their `/` hierarchy; every other reserved character is
    /// percent-encoded within its segment.
    fn object_url(&self, action: &str, bucket: &str, object: &str) -> Result<Url, ClientError> {
        self.endpoint(["api", action, bucket].into_iter().chain(object.split('/')))
    }

    fn endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn check(response: Response) -> Result<Response, ClientError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status_code = response.status().as_u16();
    let text = response.text().await?;
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|body| body.error)
        .unwrap_or(text);

    Err(ClientError::Api {
        status_code,
        message,
    })
}

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status_code} - {message}")]
    Api { status_code: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}
