use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use image_label_analysis::AnalysisClient;
use label_detect::{
    generate_insert_script, select_attribute, AnalysisRecord, AnalyzerConfig, BucketManager,
    FaceAnalyzer, ImageAnalyzerHelper, ImageReference, RekognitionDetector, S3ObjectStore,
    StorageConfig,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Send requests to a label-detect-server instead of calling AWS directly
    #[arg(long, global = true, env = "LABEL_SERVER_URL")]
    server: Option<String>,

    /// AWS region of the Rekognition and S3 endpoints
    #[arg(long, global = true, env = "AWS_DEFAULT_REGION")]
    region: Option<String>,

    /// Endpoint override for both services
    #[arg(long, global = true, env = "REKOGNITION_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Address buckets path-style instead of virtual-host style
    #[arg(long, global = true)]
    path_style: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect labels of an `authority//object` image reference and print them as JSON
    Analyze {
        reference: String,

        /// Maximum number of labels to print
        #[arg(short, long)]
        max_labels: Option<u32>,

        /// Minimum confidence (0-100) of printed labels
        #[arg(long)]
        min_confidence: Option<f32>,

        /// Copy a local image into a bucket for the duration of the analysis
        /// (`--stage=<bucket>`, or `--stage` alone for the configured bucket)
        #[arg(long, num_args = 0..=1, require_equals = true)]
        stage: Option<Option<String>>,
    },
    /// Detect the first faces of an image reference and print them as JSON
    Faces {
        reference: String,

        /// Print only this attribute of each face, e.g. `Gender` or `AgeRange`
        #[arg(short, long)]
        attribute: Option<String>,
    },
    /// Upload a file to a bucket and print a presigned URL to it
    Upload {
        file: PathBuf,

        /// Defaults to the configured bucket
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Download an object into the storage folder
    Download {
        #[command(flatten)]
        object: ObjectArgs,

        /// Defaults to the configured storage folder, then the current directory
        #[arg(long)]
        storage_folder: Option<PathBuf>,
    },
    /// Print whether an object exists
    Exists {
        #[command(flatten)]
        object: ObjectArgs,
    },
    /// Delete an object
    Remove {
        #[command(flatten)]
        object: ObjectArgs,
    },
    /// Print the MySQL insert script of an analysis record read from a JSON file
    Sql { record: PathBuf },
}

#[derive(Args, Debug)]
struct ObjectArgs {
    key: String,

    /// Defaults to the configured bucket
    #[arg(long)]
    bucket: Option<String>,
}

/// Fallbacks for arguments left out on the command line, taken from the
/// storage variables when they are set
#[derive(Debug, Default)]
struct Defaults {
    storage: Option<StorageConfig>,
}

impl Defaults {
    fn bucket(&self, bucket: Option<&str>) -> anyhow::Result<String> {
        bucket
            .map(String::from)
            .or_else(|| self.storage.as_ref().map(|s| s.bucket_url.clone()))
            .context(
                "No bucket given: pass --bucket or set BUCKET_NAME, DOMAIN, BUCKET_URL and STORAGE_FOLDER",
            )
    }

    fn storage_folder(&self, storage_folder: Option<&Path>) -> PathBuf {
        storage_folder
            .map(Path::to_path_buf)
            .or_else(|| self.storage.as_ref().map(|s| s.storage_folder.clone()))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn stage(&self, stage: Option<&Option<String>>) -> anyhow::Result<Option<String>> {
        stage.map(|bucket| self.bucket(bucket.as_deref())).transpose()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let defaults = Defaults {
        storage: StorageConfig::try_from_env()?,
    };

    match &cli.server {
        Some(url) => run_remote(AnalysisClient::new(url)?, cli.command, &defaults).await,
        None => run_local(&cli, &defaults).await,
    }
}

async fn run_remote(
    client: AnalysisClient,
    command: Command,
    defaults: &Defaults,
) -> anyhow::Result<()> {
    match command {
        Command::Analyze {
            reference,
            max_labels,
            min_confidence,
            stage,
        } => {
            if stage.is_some() {
                bail!("--stage is not available together with --server");
            }
            let json = client
                .request_analysis_json(&reference, max_labels, min_confidence)
                .await?;
            println!("{}", json);
        }
        Command::Faces {
            reference,
            attribute,
        } => {
            println!(
                "{}",
                client
                    .detect_faces_json(&reference, attribute.as_deref())
                    .await?
            );
        }
        Command::Upload { file, bucket } => {
            let bucket = defaults.bucket(bucket.as_deref())?;
            let key = file
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("'{}' has no file name", file.display()))?
                .to_string();
            let body = fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            println!("{}", client.upload(&bucket, &key, body).await?);
        }
        Command::Download {
            object,
            storage_folder,
        } => {
            let Some(file_name) = PathBuf::from(&object.key).file_name().map(PathBuf::from) else {
                bail!("'{}' has no file name", object.key);
            };
            let bucket = defaults.bucket(object.bucket.as_deref())?;
            let storage_folder = defaults.storage_folder(storage_folder.as_deref());
            let body = client.download(&bucket, &object.key).await?;
            fs::create_dir_all(&storage_folder).await?;
            let destination = storage_folder.join(file_name);
            fs::write(&destination, body).await?;
            println!("{}", destination.display());
        }
        Command::Exists { object } => {
            let bucket = defaults.bucket(object.bucket.as_deref())?;
            println!("{}", client.object_exists(&bucket, &object.key).await?);
        }
        Command::Remove { object } => {
            let bucket = defaults.bucket(object.bucket.as_deref())?;
            client.remove(&bucket, &object.key).await?;
        }
        Command::Sql { record } => {
            print!("{}", client.generate_sql(&read_record(&record).await?).await?);
        }
    }

    Ok(())
}

async fn run_local(cli: &Cli, defaults: &Defaults) -> anyhow::Result<()> {
    let mut config = AnalyzerConfig::from_env()?;
    if let Some(region) = &cli.region {
        config = config.with_region(region.clone());
    }
    if let Some(endpoint_url) = &cli.endpoint_url {
        config = config.with_endpoint_url(endpoint_url.clone());
    }

    let sdk_config = config.load_sdk_config().await;
    let store = Arc::new(if cli.path_style {
        S3ObjectStore::with_path_style(&sdk_config)
    } else {
        S3ObjectStore::new(&sdk_config)
    });
    let manager = |storage_folder: PathBuf| BucketManager::new(store.clone(), storage_folder);

    match &cli.command {
        Command::Analyze {
            reference,
            max_labels,
            min_confidence,
            stage,
        } => {
            if let Some(max_labels) = max_labels {
                config = config.with_max_labels(*max_labels)?;
            }
            if let Some(min_confidence) = min_confidence {
                config = config.with_min_confidence(*min_confidence)?;
            }

            let reference: ImageReference = reference.parse()?;
            let mut helper =
                ImageAnalyzerHelper::new(Arc::new(RekognitionDetector::new(&sdk_config)), config);

            match (defaults.stage(stage.as_ref())?, reference.path()) {
                (Some(bucket), Some(path)) => {
                    let manager = manager(defaults.storage_folder(None));
                    helper
                        .request_staged_analysis(&manager, &bucket, &path)
                        .await?;
                }
                (Some(_), None) => bail!("Only local images can be staged, got {}", reference),
                (None, _) => {
                    helper.request_analysis(&reference).await?;
                }
            }

            println!("{}", helper.to_json()?);
        }
        Command::Faces {
            reference,
            attribute,
        } => {
            let analyzer = FaceAnalyzer::new(Arc::new(RekognitionDetector::new(&sdk_config)));
            let faces = analyzer
                .detect(&reference.parse::<ImageReference>()?)
                .await?;
            let json = match attribute {
                Some(attribute) => {
                    serde_json::to_string_pretty(&select_attribute(&faces, attribute)?)?
                }
                None => serde_json::to_string_pretty(&faces)?,
            };
            println!("{}", json);
        }
        Command::Upload { file, bucket } => {
            let bucket = defaults.bucket(bucket.as_deref())?;
            let manager = manager(defaults.storage_folder(None));
            println!("{}", manager.upload_file(&bucket, file).await?);
        }
        Command::Download {
            object,
            storage_folder,
        } => {
            let bucket = defaults.bucket(object.bucket.as_deref())?;
            let manager = manager(defaults.storage_folder(storage_folder.as_deref()));
            let destination = manager.download_object(&bucket, &object.key).await?;
            println!("{}", destination.display());
        }
        Command::Exists { object } => {
            let bucket = defaults.bucket(object.bucket.as_deref())?;
            let manager = manager(defaults.storage_folder(None));
            println!("{}", manager.object_exists(&bucket, &object.key).await?);
        }
        Command::Remove { object } => {
            let bucket = defaults.bucket(object.bucket.as_deref())?;
            let manager = manager(defaults.storage_folder(None));
            manager.remove_object(&bucket, &object.key).await?;
        }
        Command::Sql { record } => {
            print!("{}", generate_insert_script(&read_record(record).await?)?);
        }
    }

    Ok(())
}

async fn read_record(path: &Path) -> anyhow::Result<AnalysisRecord> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Defaults {
        Defaults {
            storage: Some(StorageConfig::new(
                "aws",
                "rekognition.actualit.info",
                "/srv/images",
            )),
        }
    }

    #[test]
    fn test_configured_storage_fills_missing_arguments() {
        let defaults = configured();

        assert_eq!(
            defaults.bucket(None).unwrap(),
            "aws.rekognition.actualit.info"
        );
        assert_eq!(defaults.bucket(Some("other.example.com")).unwrap(), "other.example.com");
        assert_eq!(defaults.storage_folder(None), PathBuf::from("/srv/images"));
        assert_eq!(
            defaults.storage_folder(Some(Path::new("downloads"))),
            PathBuf::from("downloads")
        );
        assert_eq!(
            defaults.stage(Some(&None)).unwrap().as_deref(),
            Some("aws.rekognition.actualit.info")
        );
        assert_eq!(defaults.stage(None).unwrap(), None);
    }

    #[test]
    fn test_missing_bucket_names_storage_variables() {
        let defaults = Defaults::default();

        let err = defaults.bucket(None).unwrap_err().to_string();
        assert!(err.contains("BUCKET_URL"));
        assert!(defaults.stage(Some(&None)).is_err());
        assert_eq!(defaults.storage_folder(None), PathBuf::from("."));
    }

    fn stage_of(args: &[&str]) -> Option<Option<String>> {
        match Cli::try_parse_from(args).unwrap().command {
            Command::Analyze { stage, .. } => stage,
            command => panic!("unexpected command {:?}", command),
        }
    }

    #[test]
    fn test_stage_flag_forms() {
        assert_eq!(stage_of(&["cli", "analyze", "images//a.jpg"]), None);
        assert_eq!(
            stage_of(&["cli", "analyze", "--stage", "images//a.jpg"]),
            Some(None)
        );
        assert_eq!(
            stage_of(&["cli", "analyze", "--stage=bucket.example.com", "images//a.jpg"]),
            Some(Some("bucket.example.com".to_string()))
        );
    }

    #[test]
    fn test_object_commands_take_optional_bucket() {
        let cli = Cli::try_parse_from(["cli", "exists", "2024/duck.jpg"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Exists { object: ObjectArgs { ref key, bucket: None } } if key == "2024/duck.jpg"
        ));

        let cli =
            Cli::try_parse_from(["cli", "faces", "images//group.jpg", "-a", "Gender"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Faces { attribute: Some(ref attribute), .. } if attribute == "Gender"
        ));
    }
}
