use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::{presigning::PresigningConfig, primitives::ByteStream, Client};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::{
    error::{service_error, Error},
    reference::ImageReference,
};

/// Lifetime of URLs returned by [`BucketManager::upload_file`]
pub const PRESIGNED_URL_EXPIRY: Duration = Duration::from_secs(3600);

/// Object-level access to a bucket store. Buckets themselves are managed
/// out of band.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), Error>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, Error>;

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, Error>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, Error>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error>;

    /// Time-limited GET URL for the object
    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, Error>;
}

/// [`ObjectStore`] on Amazon S3
#[derive(Clone, Debug)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }

    /// Path-style addressing, needed by most S3 emulators behind a custom endpoint
    pub fn with_path_style(sdk_config: &SdkConfig) -> Self {
        let config = aws_sdk_s3::config::Builder::from(sdk_config)
            .force_path_style(true)
            .build();
        Self {
            client: Client::from_conf(config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), Error> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, Error> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map_or(false, |se| se.is_no_such_key()) {
                    Error::ObjectNotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    service_error(e)
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, Error> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map_or(false, |se| se.is_not_found()) => Ok(false),
            Err(e) => Err(service_error(e)),
        }
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, Error> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map_or(false, |se| se.is_not_found()) => Ok(false),
            Err(e) => Err(service_error(e)),
        }
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(service_error)?;
        Ok(())
    }

    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, Error> {
        let presigning =
            PresigningConfig::expires_in(expires_in).map_err(|e| Error::Configuration(e.to_string()))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(service_error)?;
        Ok(request.uri().to_string())
    }
}

/// Moves images between the local storage folder and buckets
#[derive(Clone)]
pub struct BucketManager {
    store: Arc<dyn ObjectStore>,
    storage_folder: PathBuf,
}

impl BucketManager {
    pub fn new(store: Arc<dyn ObjectStore>, storage_folder: impl Into<PathBuf>) -> Self {
        Self {
            store,
            storage_folder: storage_folder.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn storage_folder(&self) -> &Path {
        &self.storage_folder
    }

    /// Upload a local file under its file name and return a presigned URL to it
    pub async fn upload_file(&self, bucket: &str, path: &Path) -> Result<String, Error> {
        let key = file_name(path)?;
        let body = fs::read(path).await?;

        self.store.put_object(bucket, &key, body).await?;
        info!("Uploaded {} to {}/{}", path.display(), bucket, key);

        self.store
            .presigned_url(bucket, &key, PRESIGNED_URL_EXPIRY)
            .await
    }

    /// Download an object into the storage folder, returning the written path
    pub async fn download_object(&self, bucket: &str, key: &str) -> Result<PathBuf, Error> {
        let file_name = Path::new(key)
            .file_name()
            .ok_or_else(|| Error::Storage(format!("'{}' has no file name", key)))?;
        let destination = self.storage_folder.join(file_name);

        let body = self.store.get_object(bucket, key).await?;
        fs::create_dir_all(&self.storage_folder).await?;
        fs::write(&destination, body).await?;

        info!("Downloaded {}/{} to {}", bucket, key, destination.display());
        Ok(destination)
    }

    pub async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, Error> {
        self.store.object_exists(bucket, key).await
    }

    pub async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), Error> {
        self.store.delete_object(bucket, key).await?;
        debug!("Removed {}/{}", bucket, key);
        Ok(())
    }

    /// Copy a local image into the bucket under a unique key, for as long as
    /// the returned [`StagedObject`] lives.
    pub async fn stage(&self, bucket: &str, path: &Path) -> Result<StagedObject, Error> {
        let key = format!("staged/{}-{}", uuid::Uuid::new_v4(), file_name(path)?);
        let body = fs::read(path).await?;

        self.store.put_object(bucket, &key, body).await?;
        debug!("Staged {} as {}/{}", path.display(), bucket, key);

        Ok(StagedObject {
            store: Some(self.store.clone()),
            bucket: bucket.to_string(),
            key,
        })
    }
}

/// Remote copy of a local image that is deleted when released or dropped.
///
/// Prefer [`StagedObject::release`], which reports deletion failures. On
/// drop the deletion is spawned onto the current tokio runtime and failures
/// are only logged.
pub struct StagedObject {
    store: Option<Arc<dyn ObjectStore>>,
    bucket: String,
    key: String,
}

impl StagedObject {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn reference(&self) -> ImageReference {
        ImageReference::remote(self.bucket.clone(), self.key.clone())
    }

    pub async fn release(mut self) -> Result<(), Error> {
        match self.store.take() {
            Some(store) => store.delete_object(&self.bucket, &self.key).await,
            None => Ok(()),
        }
    }
}

impl Drop for StagedObject {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };

        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.delete_object(&bucket, &key).await {
                        error!("Failed to remove staged object {}/{}: {}", bucket, key, e);
                    }
                });
            }
            Err(_) => warn!(
                "No runtime to remove staged object {}/{}, it is left behind",
                bucket, key
            ),
        }
    }
}

fn file_name(path: &Path) -> Result<String, Error> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Storage(format!("'{}' has no file name", path.display())))
}
