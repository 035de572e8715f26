use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_rekognition::{
    primitives::Blob,
    types::{self as rekognition, Image, S3Object},
    Client,
};
use tracing::{debug, error, info};

use crate::{
    error::{service_error, Error},
    types::{Alias, AnalysisResult, BoundingBox, Category, ImageSource, Instance, Label, Parent},
};

/// Remote label detection capability
#[async_trait]
pub trait LabelDetector: Send + Sync {
    /// Detect at most `max_labels` labels, ranked by the service.
    async fn detect_labels(
        &self,
        image: &ImageSource,
        max_labels: u32,
        min_confidence: Option<f32>,
    ) -> Result<AnalysisResult, Error>;
}

/// Label detection through Amazon Rekognition `DetectLabels`
#[derive(Clone, Debug)]
pub struct RekognitionDetector {
    client: Client,
}

impl RekognitionDetector {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl LabelDetector for RekognitionDetector {
    async fn detect_labels(
        &self,
        image: &ImageSource,
        max_labels: u32,
        min_confidence: Option<f32>,
    ) -> Result<AnalysisResult, Error> {
        let max_labels = i32::try_from(max_labels).map_err(|_| {
            Error::Configuration(format!("max_labels {} is out of range", max_labels))
        })?;

        debug!("Detecting labels in {}", image.describe());

        let response = self
            .client
            .detect_labels()
            .image(to_sdk_image(image))
            .max_labels(max_labels)
            .set_min_confidence(min_confidence)
            .send()
            .await
            .map_err(|e| {
                let err = service_error(e);
                error!("Couldn't detect labels in {}: {}", image.describe(), err);
                err
            })?;

        let result = AnalysisResult {
            labels: response.labels().iter().map(from_sdk_label).collect(),
            label_model_version: response.label_model_version().map(str::to_string),
        };
        info!("Found {} labels in {}", result.len(), image.describe());

        Ok(result)
    }
}

pub(crate) fn to_sdk_image(image: &ImageSource) -> Image {
    match image {
        ImageSource::Bytes(bytes) => Image::builder().bytes(Blob::new(bytes.clone())).build(),
        ImageSource::S3Object { bucket, key } => Image::builder()
            .s3_object(S3Object::builder().bucket(bucket).name(key).build())
            .build(),
    }
}

fn from_sdk_label(label: &rekognition::Label) -> Label {
    Label {
        name: label.name().unwrap_or_default().to_string(),
        confidence: label.confidence().unwrap_or_default(),
        instances: label
            .instances()
            .iter()
            .map(|instance| Instance {
                bounding_box: instance.bounding_box().map(|b| BoundingBox {
                    width: b.width().unwrap_or_default(),
                    height: b.height().unwrap_or_default(),
                    left: b.left().unwrap_or_default(),
                    top: b.top().unwrap_or_default(),
                }),
                confidence: instance.confidence().unwrap_or_default(),
            })
            .collect(),
        parents: label
            .parents()
            .iter()
            .map(|parent| Parent {
                name: parent.name().unwrap_or_default().to_string(),
            })
            .collect(),
        aliases: label
            .aliases()
            .iter()
            .map(|alias| Alias {
                name: alias.name().unwrap_or_default().to_string(),
            })
            .collect(),
        categories: label
            .categories()
            .iter()
            .map(|category| Category {
                name: category.name().unwrap_or_default().to_string(),
            })
            .collect(),
    }
}
