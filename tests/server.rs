mod common;

use common::{mono_tone_wav, processor_in};
use reqwest::{multipart, StatusCode};
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc};
use stem_splitter_service::{server::router, ServiceConfig};
use tempfile::TempDir;

struct TestServer {
    base: String,
    work: TempDir,
}

async fn spawn_server() -> TestServer {
    spawn_server_with(ServiceConfig::default()).await
}

async fn spawn_server_with(cfg: ServiceConfig) -> TestServer {
    let work = tempfile::tempdir().unwrap();
    let cfg = ServiceConfig {
        work_dir: work.path().to_path_buf(),
        ..cfg
    };
    let processor = Arc::new(processor_in(work.path(), cfg.clone()));
    let app = router(processor, &cfg);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{addr}"),
        work,
    }
}

fn form(bytes: Vec<u8>, lane: Option<&str>) -> multipart::Form {
    let file = multipart::Part::bytes(bytes).file_name("mix.wav");
    let form = multipart::Form::new().part("file", file);
    match lane {
        Some(lane) => form.text("lane", lane.to_string()),
        None => form,
    }
}

async fn post_process(server: &TestServer, form: multipart::Form) -> (StatusCode, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}/process", server.base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

#[tokio::test(flavor = "multi_thread")]
async fn process_returns_addressable_stems() {
    let server = spawn_server().await;

    let (status, body) = post_process(&server, form(mono_tone_wav(0.5, 440.0, 0.4), Some("default"))).await;

    assert_eq!(status, StatusCode::OK);
    let stems = body["stems"].as_array().unwrap();
    let names: Vec<_> = stems.iter().map(|s| s["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["drums", "bass", "other", "vocals"]);

    for stem in stems {
        let url = stem["url"].as_str().unwrap();
        assert!(url.starts_with("/files/"));
        assert!(stem["path"].as_str().unwrap().ends_with(".wav"));

        let resp = reqwest::get(format!("{}{url}", server.base)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "audio/wav");
        let bytes = resp.bytes().await.unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn reduction_lane_over_http() {
    let server = spawn_server().await;

    let (status, body) = post_process(&server, form(mono_tone_wav(0.25, 330.0, 0.4), Some("acca"))).await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body["stems"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["vocals", "instrumental"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_lane_is_a_bad_request() {
    let server = spawn_server().await;

    let (status, body) = post_process(&server, form(mono_tone_wav(0.1, 440.0, 0.4), None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_request");
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_file_is_a_bad_request() {
    let server = spawn_server().await;

    let (status, body) = post_process(&server, form(Vec::new(), Some("default"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "upload");
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_upload_is_payload_too_large() {
    let server = spawn_server_with(ServiceConfig {
        max_upload_bytes: 4 * 1024,
        ..ServiceConfig::default()
    })
    .await;

    // 0.25 s of 16-bit mono is ~22 KB
    let (status, body) = post_process(&server, form(mono_tone_wav(0.25, 440.0, 0.4), Some("default"))).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"]["kind"], "payload_too_large");
    assert_eq!(std::fs::read_dir(server.work.path()).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_file_is_unprocessable() {
    let server = spawn_server().await;

    let (status, body) = post_process(&server, form(b"not audio".to_vec(), Some("default"))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["kind"], "decode");
}

#[tokio::test(flavor = "multi_thread")]
async fn file_route_rejects_unknown_and_traversing_paths() {
    let server = spawn_server().await;

    for path in [
        "/files/not-a-uuid/vocals.wav",
        "/files/0b6f8e4e-7f4c-4a53-9d1e-0f1c2a3b4c5d/vocals.wav",
        "/files/0b6f8e4e-7f4c-4a53-9d1e-0f1c2a3b4c5d/..%2F..%2Fsecret",
    ] {
        let resp = reqwest::get(format!("{}{path}", server.base)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_the_model() {
    let server = spawn_server().await;

    let resp = reqwest::get(format!("{}/health", server.base)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["sample_rate"], 44_100);
    assert_eq!(body["sources"].as_array().unwrap().len(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn preflight_is_answered() {
    let server = spawn_server().await;

    let resp = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("{}/process", server.base))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(resp.headers()["access-control-allow-methods"], "*");
}
