use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;

use crate::error::Error;

/// Separator between the authority (directory or bucket host) and the object
pub const SEPARATOR: &str = "//";

/// Where an image lives.
///
/// References are written `authority//object`. The authority is either a
/// local directory or a host-style bucket name such as
/// `aws.rekognition.actualit.info`; parsing decides which, once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageReference {
    Local { directory: PathBuf, file_name: String },
    Remote { bucket: String, key: String },
}

impl ImageReference {
    pub fn local(directory: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        ImageReference::Local {
            directory: directory.into(),
            file_name: file_name.into(),
        }
    }

    pub fn remote(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        ImageReference::Remote {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Full path of a local reference
    pub fn path(&self) -> Option<PathBuf> {
        match self {
            ImageReference::Local {
                directory,
                file_name,
            } => Some(directory.join(file_name)),
            ImageReference::Remote { .. } => None,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ImageReference::Remote { .. })
    }

    /// Object part of the reference: the file name or the bucket key
    pub fn object_name(&self) -> &str {
        match self {
            ImageReference::Local { file_name, .. } => file_name,
            ImageReference::Remote { key, .. } => key,
        }
    }
}

impl ImageReference {
    /// Resolve a local reference under `root`, rejecting anything that does
    /// not exist inside it once symlinks and `..` are resolved. Relative
    /// directories are taken relative to `root`. Remote references pass
    /// through unchanged.
    pub async fn confine_to(&self, root: &Path) -> Result<ImageReference, Error> {
        let ImageReference::Local {
            directory,
            file_name,
        } = self
        else {
            return Ok(self.clone());
        };

        // Same error for missing and escaping paths
        let outside = || {
            Error::InvalidReference(format!("{} is not an image of the storage folder", self))
        };

        let root = fs::canonicalize(root).await.map_err(|e| {
            Error::Storage(format!("storage folder {}: {}", root.display(), e))
        })?;
        let directory = if directory.is_absolute() {
            directory.clone()
        } else {
            root.join(directory)
        };

        let path = fs::canonicalize(directory.join(file_name))
            .await
            .map_err(|_| outside())?;
        let is_file = fs::metadata(&path)
            .await
            .map(|metadata| metadata.is_file())
            .unwrap_or(false);
        if !path.starts_with(&root) || !is_file {
            return Err(outside());
        }

        match (path.parent(), path.file_name().and_then(|name| name.to_str())) {
            (Some(parent), Some(name)) => Ok(ImageReference::local(parent, name)),
            _ => Err(outside()),
        }
    }
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (authority, object) = s.rsplit_once(SEPARATOR).ok_or_else(|| {
            Error::InvalidReference(format!("'{}' has no '{}' separator", s, SEPARATOR))
        })?;

        if authority.is_empty() {
            return Err(Error::InvalidReference(format!(
                "'{}' has no directory or bucket before '{}'",
                s, SEPARATOR
            )));
        }
        if object.is_empty() || object.starts_with('/') {
            return Err(Error::InvalidReference(format!(
                "'{}' has no object name after '{}'",
                s, SEPARATOR
            )));
        }

        if authority.contains("://") {
            return Err(Error::InvalidReference(format!(
                "'{}' is a URL, expected a directory or a bucket host",
                authority
            )));
        }
        if looks_like_path(authority) {
            return Ok(ImageReference::local(authority, object));
        }
        if is_bucket_host(authority) {
            return Ok(ImageReference::remote(authority, object));
        }
        if !authority.contains('.') && !authority.contains(':') {
            return Ok(ImageReference::local(authority, object));
        }

        Err(Error::InvalidReference(format!(
            "'{}' is neither a local directory nor a bucket host",
            authority
        )))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageReference::Local {
                directory,
                file_name,
            } => write!(f, "{}{}{}", directory.display(), SEPARATOR, file_name),
            ImageReference::Remote { bucket, key } => write!(f, "{}{}{}", bucket, SEPARATOR, key),
        }
    }
}

fn looks_like_path(authority: &str) -> bool {
    if authority.contains('/') || authority.contains('\\') {
        return true;
    }
    if authority.starts_with('.') || authority.starts_with('~') {
        return true;
    }

    let mut chars = authority.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(drive), Some(':')) if drive.is_ascii_alphabetic()
    ) || Path::new(authority).is_absolute()
}

/// S3 naming rules for buckets addressed virtual-host style
fn is_bucket_host(authority: &str) -> bool {
    let valid_chars = authority
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-');
    let edges_alphanumeric = authority
        .chars()
        .next()
        .zip(authority.chars().last())
        .map_or(false, |(first, last)| {
            first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric()
        });

    (3..=63).contains(&authority.len())
        && valid_chars
        && edges_alphanumeric
        && authority.contains('.')
        && !authority.contains("..")
        && authority.parse::<Ipv4Addr>().is_err()
}
