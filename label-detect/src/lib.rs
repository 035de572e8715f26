//! # Label Detect
//!
//! A thin client for cloud image label detection. An image is referenced
//! either as a local file or as an object in a bucket, sent to Amazon
//! Rekognition, and the detected labels are kept and rendered as JSON in
//! the service's own schema.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use label_detect::{AnalyzerConfig, ImageAnalyzerHelper, ImageReference, RekognitionDetector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AnalyzerConfig::new(1)?.with_region("eu-central-1");
//!     let detector = RekognitionDetector::new(&config.load_sdk_config().await);
//!
//!     let mut helper = ImageAnalyzerHelper::new(Arc::new(detector), config);
//!     let reference: ImageReference = "aws.rekognition.actualit.info//emiratesa380.jpg".parse()?;
//!     helper.request_analysis(&reference).await?;
//!
//!     println!("{}", helper.to_json()?);
//!     Ok(())
//! }
//! ```
//!
//! ## References
//!
//! References use the `authority//object` form. The authority is a local
//! directory (`/srv/images//plane.jpg`, `testdata//plane.jpg`) or a
//! host-style bucket name (`images.example.com//plane.jpg`). Parsing decides
//! once; malformed references fail before any network call.
//!
//! ## Faces
//!
//! [`FaceAnalyzer`] detects the first [`MAX_FACES`] faces of a reference with
//! all facial attributes; [`select_attribute`] projects one attribute out of
//! each face.
//!
//! ## Storage
//!
//! [`BucketManager`] uploads, downloads and removes objects and can stage a
//! local image in a bucket for the lifetime of a [`StagedObject`]. Buckets
//! are never created or deleted here.
//!
//! ## Testing
//!
//! The `testing` feature exposes in-memory implementations of
//! [`LabelDetector`] and [`ObjectStore`].

mod analyzer;
mod config;
mod detector;
mod error;
mod faces;
mod reference;
pub mod sql;
mod storage;
mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use analyzer::ImageAnalyzerHelper;
pub use config::{AnalyzerConfig, StorageConfig, DEFAULT_MAX_LABELS};
pub use detector::{LabelDetector, RekognitionDetector};
pub use error::Error;
pub use faces::{
    select_attribute, AgeRange, Emotion, Face, FaceAnalyzer, FaceDetector, FACE_ATTRIBUTES,
    MAX_FACES,
};
pub use reference::ImageReference;
pub use sql::{generate_insert_script, AnalysisRecord};
pub use storage::{BucketManager, ObjectStore, S3ObjectStore, StagedObject, PRESIGNED_URL_EXPIRY};
pub use types::*;

/// Result type for label detection operations
pub type Result<T> = std::result::Result<T, Error>;
