//! In-memory collaborators for exercising analyzers, bucket managers and
//! servers without AWS.

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::RwLock;

use crate::{
    detector::LabelDetector,
    error::Error,
    faces::{Face, FaceDetector},
    storage::ObjectStore,
    types::{AnalysisResult, ImageSource},
};

/// Object store keeping everything in a map
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the given buckets already created
    pub fn with_buckets<I, S>(buckets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            buckets: RwLock::new(
                buckets
                    .into_iter()
                    .map(|name| (name.into(), HashMap::new()))
                    .collect(),
            ),
        }
    }

    pub async fn object_count(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map_or(0, |objects| objects.len())
    }

    fn missing_bucket(bucket: &str) -> Error {
        Error::Service(format!("NoSuchBucket: {}", bucket))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), Error> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, Error> {
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, Error> {
        Ok(self
            .buckets
            .read()
            .await
            .get(bucket)
            .map_or(false, |objects| objects.contains_key(key)))
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, Error> {
        Ok(self.buckets.read().await.contains_key(bucket))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::missing_bucket(bucket))?;
        objects.remove(key);
        Ok(())
    }

    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, Error> {
        if !self.object_exists(bucket, key).await? {
            return Err(Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(format!(
            "memory://{}/{}?expires_in={}",
            bucket,
            key,
            expires_in.as_secs()
        ))
    }
}

/// Failure a [`ScriptedDetector`] answers with instead of labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Unavailable,
    Rejected,
}

/// Label and face detector answering from tables keyed by image bytes.
///
/// Bucket objects are looked up in the attached store, so the same bytes
/// produce the same labels whether sent inline or through a bucket. It
/// returns every scripted label regardless of `max_labels`.
pub struct ScriptedDetector {
    responses: HashMap<Vec<u8>, AnalysisResult>,
    faces: HashMap<Vec<u8>, Vec<Face>>,
    store: Option<Arc<dyn ObjectStore>>,
    failure: Option<ScriptedFailure>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            faces: HashMap::new(),
            store: None,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_response(mut self, image: impl Into<Vec<u8>>, result: AnalysisResult) -> Self {
        self.responses.insert(image.into(), result);
        self
    }

    pub fn with_faces(mut self, image: impl Into<Vec<u8>>, faces: Vec<Face>) -> Self {
        self.faces.insert(image.into(), faces);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn failing(mut self, failure: ScriptedFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Number of detection calls received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Count the call, apply the scripted failure and fetch the image bytes
    async fn receive(&self, image: &ImageSource) -> Result<Vec<u8>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match self.failure {
            Some(ScriptedFailure::Unavailable) => {
                return Err(Error::ServiceUnavailable("dispatch failure".into()))
            }
            Some(ScriptedFailure::Rejected) => {
                return Err(Error::Service("InvalidImageFormatException".into()))
            }
            None => {}
        }

        match image {
            ImageSource::Bytes(bytes) => Ok(bytes.clone()),
            ImageSource::S3Object { bucket, key } => {
                let store = self.store.as_ref().ok_or_else(|| {
                    Error::Service(format!("no store attached for s3://{}/{}", bucket, key))
                })?;
                store
                    .get_object(bucket, key)
                    .await
                    .map_err(|e| Error::Service(e.to_string()))
            }
        }
    }
}

impl Default for ScriptedDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LabelDetector for ScriptedDetector {
    async fn detect_labels(
        &self,
        image: &ImageSource,
        _max_labels: u32,
        _min_confidence: Option<f32>,
    ) -> Result<AnalysisResult, Error> {
        let bytes = self.receive(image).await?;

        self.responses
            .get(&bytes)
            .cloned()
            .ok_or_else(|| Error::Service("InvalidImageFormatException".into()))
    }
}

#[async_trait]
impl FaceDetector for ScriptedDetector {
    async fn detect_faces(&self, image: &ImageSource) -> Result<Vec<Face>, Error> {
        let bytes = self.receive(image).await?;

        Ok(self.faces.get(&bytes).cloned().unwrap_or_default())
    }
}
