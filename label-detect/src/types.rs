use serde::{Deserialize, Serialize};

/// Image payload handed to the labeling service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Raw image bytes read from a local file
    Bytes(Vec<u8>),
    /// Object the service reads from the bucket itself
    S3Object { bucket: String, key: String },
}

impl ImageSource {
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Bytes(bytes) => format!("{} bytes", bytes.len()),
            ImageSource::S3Object { bucket, key } => format!("s3://{}/{}", bucket, key),
        }
    }
}

/// Labels detected in one image, in the order the service ranked them.
///
/// Field names follow the `DetectLabels` response so that the rendered JSON
/// can be compared against recorded service output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnalysisResult {
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_model_version: Option<String>,
}

impl AnalysisResult {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Keep the first `max_labels` labels, preserving service order
    pub fn truncate(&mut self, max_labels: usize) {
        self.labels.truncate(max_labels);
    }

    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|label| label.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Label {
    pub name: String,
    pub confidence: f32,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub parents: Vec<Parent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<Alias>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<Category>,
}

impl Label {
    pub fn new(name: impl Into<String>, confidence: f32) -> Self {
        Self {
            name: name.into(),
            confidence,
            instances: Vec::new(),
            parents: Vec::new(),
            aliases: Vec::new(),
            categories: Vec::new(),
        }
    }

    pub fn with_instance(mut self, instance: Instance) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn with_parent(mut self, name: impl Into<String>) -> Self {
        self.parents.push(Parent { name: name.into() });
        self
    }

    pub fn with_category(mut self, name: impl Into<String>) -> Self {
        self.categories.push(Category { name: name.into() });
        self
    }
}

/// One occurrence of a label inside the image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    pub confidence: f32,
}

/// Ratios of the overall image size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BoundingBox {
    pub width: f32,
    pub height: f32,
    pub left: f32,
    pub top: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parent {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Alias {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Category {
    pub name: String,
}
