use aws_config::{BehaviorVersion, Region, SdkConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Error;

/// Labels kept per analysis when nothing else is configured
pub const DEFAULT_MAX_LABELS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Maximum number of labels kept from a single analysis
    pub max_labels: u32,

    /// Labels below this confidence (0-100) are not returned by the service
    pub min_confidence: Option<f32>,

    /// AWS region; the default provider chain is used when unset
    pub region: Option<String>,

    /// Endpoint override, for local emulators or VPC endpoints
    pub endpoint_url: Option<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_labels: DEFAULT_MAX_LABELS,
            min_confidence: None,
            region: None,
            endpoint_url: None,
        }
    }
}

impl AnalyzerConfig {
    pub fn new(max_labels: u32) -> Result<Self, Error> {
        Self::default().with_max_labels(max_labels)
    }

    pub fn with_max_labels(mut self, max_labels: u32) -> Result<Self, Error> {
        if max_labels == 0 {
            return Err(Error::Configuration(
                "max_labels must be at least 1".into(),
            ));
        }
        self.max_labels = max_labels;
        Ok(self)
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Result<Self, Error> {
        if !(0.0..=100.0).contains(&min_confidence) {
            return Err(Error::Configuration(format!(
                "min_confidence must be within 0..=100, got {}",
                min_confidence
            )));
        }
        self.min_confidence = Some(min_confidence);
        Ok(self)
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }

    /// Read `LABEL_MAX_LABELS`, `LABEL_MIN_CONFIDENCE`, `AWS_DEFAULT_REGION`
    /// and `REKOGNITION_ENDPOINT_URL` from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AnalyzerConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_labels = match non_empty(&lookup, "LABEL_MAX_LABELS") {
            Some(raw) => raw.parse::<u32>().map_err(|e| {
                Error::Configuration(format!("LABEL_MAX_LABELS '{}': {}", raw, e))
            })?,
            None => DEFAULT_MAX_LABELS,
        };

        let mut config = Self::new(max_labels)?;

        if let Some(raw) = non_empty(&lookup, "LABEL_MIN_CONFIDENCE") {
            let min_confidence = raw.parse::<f32>().map_err(|e| {
                Error::Configuration(format!("LABEL_MIN_CONFIDENCE '{}': {}", raw, e))
            })?;
            config = config.with_min_confidence(min_confidence)?;
        }
        if let Some(region) = non_empty(&lookup, "AWS_DEFAULT_REGION") {
            config = config.with_region(region);
        }
        if let Some(endpoint_url) = non_empty(&lookup, "REKOGNITION_ENDPOINT_URL") {
            config = config.with_endpoint_url(endpoint_url);
        }

        Ok(config)
    }

    /// Load the shared AWS SDK configuration honouring the region and
    /// endpoint overrides.
    pub async fn load_sdk_config(&self) -> SdkConfig {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &self.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        loader.load().await
    }
}

/// Variables making up a [`StorageConfig`]
const STORAGE_VARS: [&str; 4] = ["BUCKET_NAME", "DOMAIN", "BUCKET_URL", "STORAGE_FOLDER"];

/// Bucket settings of a deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub bucket_name: String,
    pub domain: String,
    /// Always `{bucket_name}.{domain}`
    pub bucket_url: String,
    /// Local folder downloads are written to
    pub storage_folder: PathBuf,
}

impl StorageConfig {
    pub fn new(
        bucket_name: impl Into<String>,
        domain: impl Into<String>,
        storage_folder: impl Into<PathBuf>,
    ) -> Self {
        let bucket_name = bucket_name.into();
        let domain = domain.into();
        Self {
            bucket_url: format!("{}.{}", bucket_name, domain),
            bucket_name,
            domain,
            storage_folder: storage_folder.into(),
        }
    }

    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `None` when none of the storage variables is set; a partial or
    /// inconsistent set is still an error.
    pub fn try_from_env() -> Result<Option<Self>, Error> {
        Self::try_from_lookup(|key| std::env::var(key).ok())
    }

    pub fn try_from_lookup<F>(lookup: F) -> Result<Option<Self>, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if STORAGE_VARS
            .iter()
            .all(|key| non_empty(&lookup, key).is_none())
        {
            return Ok(None);
        }
        Self::from_lookup(lookup).map(Some)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            non_empty(&lookup, key).ok_or_else(|| Error::MissingEnvVar(key.to_string()))
        };

        let [bucket_name, domain, bucket_url, storage_folder] = STORAGE_VARS;
        let bucket_name = required(bucket_name)?;
        let domain = required(domain)?;
        let bucket_url = required(bucket_url)?;
        let storage_folder = required(storage_folder)?;

        let config = Self::new(bucket_name, domain, storage_folder);
        if config.bucket_url != bucket_url {
            return Err(Error::Configuration(format!(
                "BUCKET_URL '{}' does not match ${{BUCKET_NAME}}.${{DOMAIN}} ('{}')",
                bucket_url, config.bucket_url
            )));
        }

        Ok(config)
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_analyzer_defaults_without_env() {
        let config = AnalyzerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, AnalyzerConfig::default());
        assert_eq!(config.max_labels, DEFAULT_MAX_LABELS);
    }

    #[test]
    fn test_analyzer_reads_env() {
        let config = AnalyzerConfig::from_lookup(lookup(&[
            ("LABEL_MAX_LABELS", "1"),
            ("LABEL_MIN_CONFIDENCE", "80"),
            ("AWS_DEFAULT_REGION", "eu-central-1"),
            ("REKOGNITION_ENDPOINT_URL", "http://localhost:4566"),
        ]))
        .unwrap();

        assert_eq!(config.max_labels, 1);
        assert_eq!(config.min_confidence, Some(80.0));
        assert_eq!(config.region.as_deref(), Some("eu-central-1"));
        assert_eq!(config.endpoint_url.as_deref(), Some("http://localhost:4566"));
    }

    #[test]
    fn test_analyzer_rejects_zero_max_labels() {
        assert!(matches!(AnalyzerConfig::new(0), Err(Error::Configuration(_))));
        assert!(matches!(
            AnalyzerConfig::from_lookup(lookup(&[("LABEL_MAX_LABELS", "0")])),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_analyzer_rejects_bad_confidence() {
        let result = AnalyzerConfig::new(5).unwrap().with_min_confidence(120.0);
        assert!(matches!(result, Err(Error::Configuration(_))));

        let result = AnalyzerConfig::from_lookup(lookup(&[("LABEL_MIN_CONFIDENCE", "high")]));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_storage_from_env() {
        let config = StorageConfig::from_lookup(lookup(&[
            ("BUCKET_NAME", "aws"),
            ("DOMAIN", "rekognition.actualit.info"),
            ("BUCKET_URL", "aws.rekognition.actualit.info"),
            ("STORAGE_FOLDER", "/tmp/images/"),
        ]))
        .unwrap();

        assert_eq!(config.bucket_url, "aws.rekognition.actualit.info");
        assert_eq!(config.storage_folder, PathBuf::from("/tmp/images/"));
    }

    #[test]
    fn test_storage_missing_variable() {
        let result = StorageConfig::from_lookup(lookup(&[
            ("BUCKET_NAME", "aws"),
            ("BUCKET_URL", "aws.rekognition.actualit.info"),
            ("STORAGE_FOLDER", "/tmp/images/"),
        ]));

        assert!(matches!(result, Err(Error::MissingEnvVar(key)) if key == "DOMAIN"));
    }

    #[test]
    fn test_storage_bucket_url_format() {
        let result = StorageConfig::from_lookup(lookup(&[
            ("BUCKET_NAME", "aws"),
            ("DOMAIN", "rekognition.actualit.info"),
            ("BUCKET_URL", "rekognition.actualit.info"),
            ("STORAGE_FOLDER", "/tmp/images/"),
        ]));

        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_storage_is_optional_only_when_unset() {
        assert_eq!(StorageConfig::try_from_lookup(lookup(&[])).unwrap(), None);

        let config = StorageConfig::try_from_lookup(lookup(&[
            ("BUCKET_NAME", "aws"),
            ("DOMAIN", "rekognition.actualit.info"),
            ("BUCKET_URL", "aws.rekognition.actualit.info"),
            ("STORAGE_FOLDER", "/tmp/images/"),
        ]))
        .unwrap();
        assert_eq!(
            config.map(|c| c.bucket_url),
            Some("aws.rekognition.actualit.info".to_string())
        );

        let result = StorageConfig::try_from_lookup(lookup(&[("STORAGE_FOLDER", "/tmp/images/")]));
        assert!(matches!(result, Err(Error::MissingEnvVar(key)) if key == "BUCKET_NAME"));
    }
}
