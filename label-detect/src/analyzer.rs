use std::{path::Path, sync::Arc};
use tokio::fs;
use tracing::{debug, error, info};

use crate::{
    config::AnalyzerConfig,
    detector::LabelDetector,
    error::Error,
    reference::ImageReference,
    storage::BucketManager,
    types::{AnalysisResult, ImageSource},
};

/// Runs label analyses and keeps the latest result.
///
/// Each successful [`request_analysis`](ImageAnalyzerHelper::request_analysis)
/// replaces the stored result; a failed one leaves it untouched.
pub struct ImageAnalyzerHelper {
    detector: Arc<dyn LabelDetector>,
    config: AnalyzerConfig,
    result: Option<AnalysisResult>,
}

impl ImageAnalyzerHelper {
    pub fn new(detector: Arc<dyn LabelDetector>, config: AnalyzerConfig) -> Self {
        Self {
            detector,
            config,
            result: None,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Analyze the referenced image and store the result
    pub async fn request_analysis(
        &mut self,
        reference: &ImageReference,
    ) -> Result<&AnalysisResult, Error> {
        let source = resolve(reference).await?;

        debug!(
            "Requesting analysis of {} (max_labels={})",
            reference, self.config.max_labels
        );

        let mut result = self
            .detector
            .detect_labels(&source, self.config.max_labels, self.config.min_confidence)
            .await?;
        result.truncate(self.config.max_labels as usize);

        info!("Analysis of {} returned {} labels", reference, result.len());

        Ok(self.result.insert(result))
    }

    /// Analyze a local image through a temporary copy in `bucket`.
    ///
    /// The copy is removed whatever the outcome. An analysis failure is
    /// reported ahead of a failure to remove the copy.
    pub async fn request_staged_analysis(
        &mut self,
        manager: &BucketManager,
        bucket: &str,
        path: &Path,
    ) -> Result<&AnalysisResult, Error> {
        let staged = manager.stage(bucket, path).await?;
        let reference = staged.reference();
        info!("Analyzing staged copy {}", reference);

        let analysis = self.request_analysis(&reference).await.map(|_| ());
        let released = staged.release().await;
        if let (Err(_), Err(e)) = (&analysis, &released) {
            error!("Failed to remove staged copy {}: {}", reference, e);
        }
        analysis?;
        released?;

        self.result.as_ref().ok_or(Error::NoResultYet)
    }

    /// Latest result, `None` until the first successful analysis
    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<AnalysisResult> {
        self.result
    }

    /// Render the latest result as pretty-printed JSON.
    ///
    /// Fails with [`Error::NoResultYet`] before any successful analysis.
    pub fn to_json(&self) -> Result<String, Error> {
        let result = self.result.as_ref().ok_or(Error::NoResultYet)?;
        Ok(serde_json::to_string_pretty(result)?)
    }
}

pub(crate) async fn resolve(reference: &ImageReference) -> Result<ImageSource, Error> {
    match reference {
        ImageReference::Local {
            directory,
            file_name,
        } => {
            let path = directory.join(file_name);
            let bytes = fs::read(&path).await.map_err(|e| {
                Error::InvalidReference(format!("cannot read {}: {}", path.display(), e))
            })?;
            if bytes.is_empty() {
                return Err(Error::InvalidReference(format!(
                    "{} is empty",
                    path.display()
                )));
            }
            Ok(ImageSource::Bytes(bytes))
        }
        ImageReference::Remote { bucket, key } => Ok(ImageSource::S3Object {
            bucket: bucket.clone(),
            key: key.clone(),
        }),
    }
}
