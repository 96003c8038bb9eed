//! Router-level tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use reelstream_core::catalog::Movie;
use reelstream_core::subtitles::{NoSubtitles, SubtitleError, SubtitleProvider, SubtitleTrack};
use reelstream_core::testing::{
    ScriptedControl, ScriptedSwarmEngine, ScriptedTorrent, StubTranscoder, fixture_hash,
    fixture_movie, pattern_bytes,
};
use reelstream_core::{DocumentStore, DownloadKey, DownloadState, MemoryStore, ReelstreamConfig};
use reelstream_web::{AppState, router};
use serde_json::Value;
use tower::ServiceExt;

const MP4_ID: &str = "tt0133093";
const MKV_ID: &str = "tt0062622";

struct TestApp {
    app: Router,
    store: Arc<MemoryStore>,
    engine: Arc<ScriptedSwarmEngine>,
    mp4: ScriptedTorrent,
    mkv: ScriptedTorrent,
}

struct FailingSubtitles;

#[async_trait]
impl SubtitleProvider for FailingSubtitles {
    async fn subtitles(&self, _imdb_id: &str) -> Result<Vec<SubtitleTrack>, SubtitleError> {
        Err(SubtitleError::Status { status: 502 })
    }
}

fn test_app_with(subtitles: Arc<dyn SubtitleProvider>) -> TestApp {
    let mp4 = ScriptedTorrent::new("The Matrix", 16).with_file("matrix/matrix.mp4", pattern_bytes(160));
    let mkv = ScriptedTorrent::new("2001", 16).with_file("2001/2001.mkv", pattern_bytes(64));

    let mut movies = vec![
        fixture_movie(MP4_ID, &[("720p", &mp4.hash_hex()), ("1080p", &fixture_hash(9))]),
        fixture_movie(MKV_ID, &[("720p", &mkv.hash_hex())]),
        fixture_movie("tt0000003", &[("720p", "not-a-hash")]),
    ];
    movies.extend((10..35).map(|i| fixture_movie(&format!("tt00001{i}"), &[])));

    let store = Arc::new(MemoryStore::with_movies(movies));
    let engine = Arc::new(
        ScriptedSwarmEngine::new()
            .with_torrent(mp4.clone())
            .with_torrent(mkv.clone()),
    );

    let state = AppState::from_parts(
        &ReelstreamConfig::for_testing(),
        store.clone(),
        engine.clone(),
        Arc::new(StubTranscoder::default()),
        subtitles,
    );

    TestApp {
        app: router(state),
        store,
        engine,
        mp4,
        mkv,
    }
}

fn test_app() -> TestApp {
    test_app_with(Arc::new(NoSubtitles))
}

async fn get(app: &Router, uri: &str, range: Option<&str>) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    let mut request = Request::builder().uri(uri);
    if let Some(range) = range {
        request = request.header(header::RANGE, range);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, _, body) = get(app, uri, None).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn start_and_finish(t: &TestApp, id: &str, torrent: &ScriptedTorrent) -> ScriptedControl {
    let (status, body) = get_json(&t.app, &format!("/download-video/{id}/720p")).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "LOADING");

    let control = t.engine.control(&torrent.info_hash).unwrap();
    control.release_all().await;
    control
}

#[tokio::test]
async fn test_videos_are_paginated() {
    let t = test_app();

    let (status, body) = get_json(&t.app, "/videos").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 28);
    assert_eq!(body["limit"], 20);
    assert_eq!(body["movies"].as_array().unwrap().len(), 20);

    let (_, body) = get_json(&t.app, "/videos?offset=20&limit=500").await;
    assert_eq!(body["limit"], 100);
    assert_eq!(body["movies"].as_array().unwrap().len(), 8);
}

#[tokio::test]
async fn test_video_detail() {
    let t = test_app();

    let (status, body) = get_json(&t.app, &format!("/video/{MP4_ID}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imdb_id"], MP4_ID);
    assert_eq!(body["torrents"].as_array().unwrap().len(), 2);
    assert_eq!(body["subtitles"], Value::Array(Vec::new()));

    let (status, body) = get_json(&t.app, "/video/tt9999999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("tt9999999"));
}

#[tokio::test]
async fn test_subtitle_failure_degrades_to_empty_list() {
    let t = test_app_with(Arc::new(FailingSubtitles));

    let (status, body) = get_json(&t.app, &format!("/video/{MP4_ID}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subtitles"], Value::Array(Vec::new()));
}

#[tokio::test]
async fn test_download_errors_map_to_status_codes() {
    let t = test_app();

    let (status, body) = get_json(&t.app, "/download-video/tt9999999/720p").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let (status, _) = get_json(&t.app, &format!("/download-video/{MP4_ID}/1080p")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = get_json(&t.app, "/download-video/tt0000003/720p").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = get_json(&t.app, "/video/status/tt9999999/720p").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_chunks_before_start_is_conflict() {
    let t = test_app();

    let (status, _, body) = get(&t.app, &format!("/video/chunks/{MP4_ID}/720p"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["error"].as_str().unwrap().contains("start"));
}

#[tokio::test]
async fn test_live_range_delivery() {
    let t = test_app();
    start_and_finish(&t, MP4_ID, &t.mp4).await;

    let (status, headers, body) = get(
        &t.app,
        &format!("/video/chunks/{MP4_ID}/720p"),
        Some("bytes=100-"),
    )
    .await;

    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 100-159/160");
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(headers[header::CONTENT_LENGTH], "60");
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(body, pattern_bytes(160)[100..].to_vec());
}

#[tokio::test]
async fn test_range_waits_for_missing_pieces() {
    let t = test_app();
    let (status, _) = get_json(&t.app, &format!("/download-video/{MP4_ID}/720p")).await;
    assert_eq!(status, StatusCode::OK);
    let control = t.engine.control(&t.mp4.info_hash).unwrap();

    let app = t.app.clone();
    let request = tokio::spawn(async move {
        get(&app, &format!("/video/chunks/{MP4_ID}/720p"), Some("bytes=0-")).await
    });

    control.release_in(&[9, 8, 7, 6, 5]).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!request.is_finished());

    control.release_in(&[0, 1, 2, 3, 4]).await;
    let (status, headers, body) = tokio::time::timeout(Duration::from_secs(5), request)
        .await
        .expect("range never completed")
        .unwrap();

    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-159/160");
    assert_eq!(body, pattern_bytes(160));
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let t = test_app();
    start_and_finish(&t, MP4_ID, &t.mp4).await;

    let (status, headers, _) = get(
        &t.app,
        &format!("/video/chunks/{MP4_ID}/720p"),
        Some("bytes=500-"),
    )
    .await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(headers[header::CONTENT_RANGE], "bytes */160");
}

#[tokio::test]
async fn test_non_passthrough_is_transcoded() {
    let t = test_app();
    start_and_finish(&t, MKV_ID, &t.mkv).await;

    let (status, headers, body) = get(
        &t.app,
        &format!("/video/chunks/{MKV_ID}/720p"),
        Some("bytes=10-"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "video/webm");
    assert_eq!(headers[header::ACCEPT_RANGES], "none");
    assert!(headers.get(header::CONTENT_LENGTH).is_none());
    assert!(body.starts_with(StubTranscoder::MARKER));
    assert_eq!(&body[StubTranscoder::MARKER.len()..], &pattern_bytes(64)[..]);
}

#[tokio::test]
async fn test_status_follows_download() {
    let t = test_app();
    let control = start_and_finish(&t, MP4_ID, &t.mp4).await;
    control.drain().await;

    let key = DownloadKey::new(MP4_ID, "720p");
    tokio::time::timeout(Duration::from_secs(5), async {
        while t.store.variant(&key).await.unwrap().variant.status != DownloadState::Loaded {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let (status, body) = get_json(&t.app, &format!("/video/status/{MP4_ID}/720p")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "LOADED");
    assert_eq!(body["fs_path"], "matrix/matrix.mp4");
    assert_eq!(body["stale"], false);

    let (_, body) = get_json(&t.app, &format!("/download-video/{MP4_ID}/720p")).await;
    assert_eq!(body["status"], "LOADED");
    assert_eq!(body["path"], "matrix/matrix.mp4");
    assert_eq!(t.engine.opens(), 1);
}

#[tokio::test]
async fn test_stale_lock_is_conflict_with_diagnostics() {
    let t = test_app();
    let mut movie: Movie = t.store.find_movie(MP4_ID).await.unwrap().unwrap();
    let variant = movie.variant_mut("720p").unwrap();
    variant.status = DownloadState::Loading;
    variant.locked_at = Some(chrono_hours_ago(3));
    t.store.upsert_movie(movie).await.unwrap();

    let (status, body) = get_json(&t.app, &format!("/download-video/{MP4_ID}/720p")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "LOADING");
    assert!(body["locked_at"].is_string());
    assert_eq!(t.engine.opens(), 0);
}

fn chrono_hours_ago(hours: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now() - chrono::Duration::hours(hours)
}
