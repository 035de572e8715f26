use image_label_analysis::{AnalysisClient, ClientError};
use label_detect::{
    testing::{MemoryObjectStore, ScriptedDetector},
    AnalysisRecord, AnalysisResult, AnalyzerConfig, Face, Label, ObjectStore,
};
use label_detect_server::{create_app, serve, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;

const BUCKET: &str = "aws.rekognition.actualit.info";
const EMIRATES: &[u8] = b"\xff\xd8emirates a380\xff\xd9";

fn emirates_labels() -> AnalysisResult {
    AnalysisResult {
        labels: vec![
            Label::new("Airliner", 99.1).with_parent("Airplane"),
            Label::new("Airplane", 99.1).with_parent("Aircraft"),
            Label::new("Aircraft", 99.1),
        ],
        label_model_version: Some("3.0".into()),
    }
}

fn crew() -> Vec<Face> {
    ["Female", "Male", "Male", "Female"]
        .into_iter()
        .map(|gender| Face {
            gender: Some(gender.to_string()),
            ..Face::new(99.5)
        })
        .collect()
}

async fn start_server() -> color_eyre::Result<(AnalysisClient, Arc<MemoryObjectStore>)> {
    let store = Arc::new(MemoryObjectStore::with_buckets([BUCKET]));
    let detector = ScriptedDetector::new()
        .with_response(EMIRATES, emirates_labels())
        .with_faces(EMIRATES, crew())
        .with_store(store.clone());
    let state = AppState::new(Arc::new(detector), store.clone(), AnalyzerConfig::default());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    // Start server in background
    tokio::spawn(async move {
        if let Err(e) = serve(listener, create_app(state)).await {
            eprintln!("Server error: {}", e);
        }
    });

    let client = AnalysisClient::new(format!("http://{}", addr))?;
    Ok((client, store))
}

#[tokio::test]
async fn test_upload_then_analyze() -> color_eyre::Result<()> {
    let (client, store) = start_server().await?;

    let url = client
        .upload(BUCKET, "emiratesa380.jpg", EMIRATES.to_vec())
        .await?;
    assert!(url.contains("emiratesa380.jpg"));
    assert!(store.object_exists(BUCKET, "emiratesa380.jpg").await?);

    let reference = format!("{}//emiratesa380.jpg", BUCKET);
    let result = client.request_analysis(&reference, Some(1), None).await?;
    assert_eq!(result.label_names(), ["Airliner"]);

    let json = client.request_analysis_json(&reference, None, None).await?;
    let parsed: AnalysisResult = serde_json::from_str(&json)?;
    assert_eq!(parsed, emirates_labels());

    Ok(())
}

#[tokio::test]
async fn test_object_round_trip() -> color_eyre::Result<()> {
    let (client, _store) = start_server().await?;

    client
        .upload(BUCKET, "2024/duck.jpg", b"duck".to_vec())
        .await?;
    assert!(client.object_exists(BUCKET, "2024/duck.jpg").await?);
    assert_eq!(client.download(BUCKET, "2024/duck.jpg").await?, b"duck");

    client.remove(BUCKET, "2024/duck.jpg").await?;
    assert!(!client.object_exists(BUCKET, "2024/duck.jpg").await?);

    let missing = client.download(BUCKET, "2024/duck.jpg").await;
    assert!(matches!(
        missing,
        Err(ClientError::Api {
            status_code: 404,
            ..
        })
    ));

    Ok(())
}

#[tokio::test]
async fn test_keys_with_reserved_characters() -> color_eyre::Result<()> {
    let (client, store) = start_server().await?;

    for key in ["a.jpg#v2", "2024/a b?.jpg", "100%.jpg"] {
        client.upload(BUCKET, key, key.as_bytes().to_vec()).await?;
        assert!(store.object_exists(BUCKET, key).await?, "key: {:?}", key);
        assert!(client.object_exists(BUCKET, key).await?);
        assert_eq!(client.download(BUCKET, key).await?, key.as_bytes());

        client.remove(BUCKET, key).await?;
        assert!(!store.object_exists(BUCKET, key).await?);
    }

    Ok(())
}

#[tokio::test]
async fn test_detect_faces_of_bucket_object() -> color_eyre::Result<()> {
    let (client, _store) = start_server().await?;
    client
        .upload(BUCKET, "crew.jpg", EMIRATES.to_vec())
        .await?;
    let reference = format!("{}//crew.jpg", BUCKET);

    let faces = client.detect_faces(&reference).await?;
    assert_eq!(faces, crew()[..3].to_vec());

    let genders = client.face_attribute(&reference, "Gender").await?;
    assert_eq!(genders, ["Female", "Male", "Male"]);

    Ok(())
}

#[tokio::test]
async fn test_local_reference_is_refused() -> color_eyre::Result<()> {
    let (client, _store) = start_server().await?;

    let result = client.request_analysis("/etc//passwd", None, None).await;
    assert!(matches!(
        result,
        Err(ClientError::Api { status_code: 400, ref message }) if !message.contains("os error")
    ));

    Ok(())
}

#[tokio::test]
async fn test_rejected_reference_is_reported() -> color_eyre::Result<()> {
    let (client, _store) = start_server().await?;

    let result = client.request_analysis("emiratesa380.jpg", None, None).await;
    assert!(matches!(
        result,
        Err(ClientError::Api {
            status_code: 400,
            ..
        })
    ));

    Ok(())
}

#[tokio::test]
async fn test_generate_sql_for_analysis() -> color_eyre::Result<()> {
    let (client, _store) = start_server().await?;

    let record = AnalysisRecord::from_result(
        &emirates_labels(),
        format!("s3://{}/emiratesa380.jpg", BUCKET),
        "emirates",
        "5683b32d9da3fe83cef1e284dc210e768d02b7cf",
        "8.8.8.8",
        "2018-12-25 09:27:53",
    )?;
    let script = client.generate_sql(&record).await?;

    assert!(script.starts_with("INSERT INTO `image`"));
    assert_eq!(script.matches("SET @OBJECT").count(), 3);

    let incomplete = AnalysisRecord {
        created_at: String::new(),
        ..record
    };
    let result = client.generate_sql(&incomplete).await;
    assert!(matches!(
        result,
        Err(ClientError::Api { status_code: 400, ref message }) if message.contains("created_at")
    ));

    Ok(())
}
