use aws_sdk_rekognition::error::{DisplayErrorContext, SdkError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    #[error("Label service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Label service error: {0}")]
    Service(String),

    #[error("No analysis result available")]
    NoResultYet,

    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unknown face attribute: {0}")]
    UnknownAttribute(String),

    #[error("Invalid analysis record: {0}")]
    InvalidRecord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Classify an AWS SDK failure. Requests that never got a response are
/// `ServiceUnavailable`; anything the service answered is `Service`.
pub(crate) fn service_error<E, R>(err: SdkError<E, R>) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            Error::ServiceUnavailable(message)
        }
        _ => Error::Service(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_rekognition::{
        operation::detect_labels::DetectLabelsError, types::error::InvalidImageFormatException,
    };
    use aws_smithy_runtime_api::client::result::ConnectorError;

    type DetectLabelsSdkError = SdkError<DetectLabelsError, ()>;

    #[test]
    fn test_unanswered_requests_are_unavailable() {
        let timeout = DetectLabelsSdkError::timeout_error("request timed out");
        assert!(matches!(service_error(timeout), Error::ServiceUnavailable(_)));

        let dispatch =
            DetectLabelsSdkError::dispatch_failure(ConnectorError::io("connection refused".into()));
        assert!(matches!(service_error(dispatch), Error::ServiceUnavailable(_)));
    }

    #[test]
    fn test_answered_requests_are_service_errors() {
        let rejected = DetectLabelsSdkError::service_error(
            DetectLabelsError::InvalidImageFormatException(
                InvalidImageFormatException::builder()
                    .message("Request has invalid image format")
                    .build(),
            ),
            (),
        );
        assert!(matches!(
            service_error(rejected),
            Error::Service(message) if message.contains("InvalidImageFormatException")
        ));

        let construction = DetectLabelsSdkError::construction_failure("missing image");
        assert!(matches!(service_error(construction), Error::Service(_)));
    }
}
