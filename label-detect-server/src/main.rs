use clap::Parser;
use label_detect::{AnalyzerConfig, StorageConfig, DEFAULT_MAX_LABELS};
use label_detect_server::{create_app, run_server, AppState};
use std::net::SocketAddr;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to listen on
    #[arg(short, long, default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// Maximum number of labels returned per analysis
    #[arg(short, long, env = "LABEL_MAX_LABELS", default_value_t = DEFAULT_MAX_LABELS)]
    max_labels: u32,

    /// Minimum confidence (0-100) of returned labels
    #[arg(long, env = "LABEL_MIN_CONFIDENCE")]
    min_confidence: Option<f32>,

    /// AWS region of the Rekognition and S3 endpoints
    #[arg(long, env = "AWS_DEFAULT_REGION")]
    region: Option<String>,

    /// Endpoint override for both services
    #[arg(long, env = "REKOGNITION_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Address buckets path-style instead of virtual-host style
    #[arg(long)]
    path_style: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = AnalyzerConfig::new(args.max_labels)?;
    if let Some(min_confidence) = args.min_confidence {
        config = config.with_min_confidence(min_confidence)?;
    }
    if let Some(region) = args.region {
        config = config.with_region(region);
    }
    if let Some(endpoint_url) = args.endpoint_url {
        config = config.with_endpoint_url(endpoint_url);
    }

    let mut state = AppState::from_aws(config, args.path_style).await;
    match StorageConfig::try_from_env()? {
        Some(storage) => {
            info!(
                "Serving local images of {} for bucket {}",
                storage.storage_folder.display(),
                storage.bucket_url
            );
            state = state.with_storage(storage);
        }
        None => warn!("No storage folder configured, local image references are refused"),
    }

    let app = create_app(state);
    run_server(app, args.addr).await?;

    Ok(())
}
