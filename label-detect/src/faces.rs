//! Face detection.
//!
//! Faces are detected with every facial attribute requested and only the
//! first [`MAX_FACES`] are kept. A single attribute can be projected out of
//! each kept face with [`select_attribute`].

use async_trait::async_trait;
use aws_sdk_rekognition::types::{self as rekognition, Attribute};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    analyzer::resolve,
    detector::{to_sdk_image, RekognitionDetector},
    error::{service_error, Error},
    reference::ImageReference,
    types::{BoundingBox, ImageSource},
};

/// Faces kept per detection
pub const MAX_FACES: usize = 3;

/// Attribute names accepted by [`select_attribute`]
pub const FACE_ATTRIBUTES: [&str; 12] = [
    "BoundingBox",
    "Confidence",
    "AgeRange",
    "Gender",
    "Emotions",
    "Smile",
    "Eyeglasses",
    "Sunglasses",
    "Beard",
    "Mustache",
    "EyesOpen",
    "MouthOpen",
];

/// One detected face. Attributes the service did not report are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Face {
    pub bounding_box: Option<BoundingBox>,
    pub confidence: f32,
    pub age_range: Option<AgeRange>,
    pub gender: Option<String>,
    #[serde(default)]
    pub emotions: Vec<Emotion>,
    pub smile: Option<bool>,
    pub eyeglasses: Option<bool>,
    pub sunglasses: Option<bool>,
    pub beard: Option<bool>,
    pub mustache: Option<bool>,
    pub eyes_open: Option<bool>,
    pub mouth_open: Option<bool>,
}

impl Face {
    pub fn new(confidence: f32) -> Self {
        Self {
            bounding_box: None,
            confidence,
            age_range: None,
            gender: None,
            emotions: Vec::new(),
            smile: None,
            eyeglasses: None,
            sunglasses: None,
            beard: None,
            mustache: None,
            eyes_open: None,
            mouth_open: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AgeRange {
    pub low: i32,
    pub high: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Emotion {
    #[serde(rename = "Type")]
    pub kind: String,
    pub confidence: f32,
}

/// Remote face detection capability
#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// Every face found, in service order
    async fn detect_faces(&self, image: &ImageSource) -> Result<Vec<Face>, Error>;
}

#[async_trait]
impl FaceDetector for RekognitionDetector {
    async fn detect_faces(&self, image: &ImageSource) -> Result<Vec<Face>, Error> {
        let response = self
            .client()
            .detect_faces()
            .image(to_sdk_image(image))
            .attributes(Attribute::All)
            .send()
            .await
            .map_err(|e| {
                let err = service_error(e);
                error!("Couldn't detect faces in {}: {}", image.describe(), err);
                err
            })?;

        let faces: Vec<Face> = response.face_details().iter().map(from_sdk_face).collect();
        info!("Detected {} faces in {}", faces.len(), image.describe());
        Ok(faces)
    }
}

/// Detects the first [`MAX_FACES`] faces of a referenced image
#[derive(Clone)]
pub struct FaceAnalyzer {
    detector: Arc<dyn FaceDetector>,
}

impl FaceAnalyzer {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self { detector }
    }

    pub async fn detect(&self, reference: &ImageReference) -> Result<Vec<Face>, Error> {
        let source = resolve(reference).await?;
        let mut faces = self.detector.detect_faces(&source).await?;
        faces.truncate(MAX_FACES);
        Ok(faces)
    }
}

/// Project one attribute out of every face
pub fn select_attribute(faces: &[Face], attribute: &str) -> Result<Vec<Value>, Error> {
    if !FACE_ATTRIBUTES.contains(&attribute) {
        return Err(Error::UnknownAttribute(format!(
            "'{}', expected one of {}",
            attribute,
            FACE_ATTRIBUTES.join(", ")
        )));
    }

    faces
        .iter()
        .map(|face| -> Result<Value, Error> {
            let mut fields = match serde_json::to_value(face)? {
                Value::Object(fields) => fields,
                _ => return Ok(Value::Null),
            };
            Ok(fields.remove(attribute).unwrap_or(Value::Null))
        })
        .collect()
}

fn from_sdk_face(face: &rekognition::FaceDetail) -> Face {
    Face {
        bounding_box: face.bounding_box().map(|b| BoundingBox {
            width: b.width().unwrap_or_default(),
            height: b.height().unwrap_or_default(),
            left: b.left().unwrap_or_default(),
            top: b.top().unwrap_or_default(),
        }),
        confidence: face.confidence().unwrap_or_default(),
        age_range: face.age_range().map(|range| AgeRange {
            low: range.low().unwrap_or_default(),
            high: range.high().unwrap_or_default(),
        }),
        gender: face
            .gender()
            .and_then(|gender| gender.value())
            .map(|value| value.as_str().to_string()),
        emotions: face
            .emotions()
            .iter()
            .map(|emotion| Emotion {
                kind: emotion
                    .r#type()
                    .map(|kind| kind.as_str().to_string())
                    .unwrap_or_default(),
                confidence: emotion.confidence().unwrap_or_default(),
            })
            .collect(),
        smile: face.smile().map(|a| a.value()),
        eyeglasses: face.eyeglasses().map(|a| a.value()),
        sunglasses: face.sunglasses().map(|a| a.value()),
        beard: face.beard().map(|a| a.value()),
        mustache: face.mustache().map(|a| a.value()),
        eyes_open: face.eyes_open().map(|a| a.value()),
        mouth_open: face.mouth_open().map(|a| a.value()),
    }
}
