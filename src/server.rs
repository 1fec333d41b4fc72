use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::{
    config::ServiceConfig,
    error::{Result, StemError},
    pipeline::Processor,
    types::{ProcessResponse, Upload},
    workspace::Workspace,
};

#[derive(Clone)]
struct AppState {
    processor: Arc<Processor>,
    jobs: Arc<Semaphore>,
}

/// Builds the HTTP surface: `POST /process`, `GET <prefix>/:request_id/:file_name`
/// and `GET /health`.
pub fn router(processor: Arc<Processor>, cfg: &ServiceConfig) -> Router {
    let files_route = format!(
        "{}/:request_id/:file_name",
        cfg.public_prefix.trim_end_matches('/')
    );
    let state = AppState {
        processor,
        jobs: Arc::new(Semaphore::new(cfg.max_concurrent_jobs)),
    };

    Router::new()
        .route("/process", post(process))
        .route(&files_route, get(serve_file))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(cfg.max_upload_bytes))
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

pub async fn run_server(processor: Arc<Processor>, cfg: &ServiceConfig) -> Result<()> {
    let addr: SocketAddr = cfg
        .listen_addr
        .parse()
        .map_err(|e| StemError::Config(format!("invalid listen_addr: {e}")))?;

    if let Some(secs) = cfg.retention_secs {
        spawn_sweeper(processor.workspace().clone(), Duration::from_secs(secs));
    }

    let app = router(processor, cfg);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "stem splitter listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn spawn_sweeper(workspace: Workspace, retention: Duration) {
    let period = retention.clamp(Duration::from_secs(1), Duration::from_secs(3600));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            let ws = workspace.clone();
            match tokio::task::spawn_blocking(move || ws.sweep(retention)).await {
                Ok(Ok(0)) => {}
                Ok(Ok(removed)) => info!(removed, "swept expired request dirs"),
                Ok(Err(e)) => warn!(error = %e, "workspace sweep failed"),
                Err(e) => warn!(error = %e, "workspace sweep task failed"),
            }
        }
    });
}

// ═══════════════════════════════════════════════════════════════
// POST /process
// ═══════════════════════════════════════════════════════════════

async fn process(State(st): State<AppState>, mut multipart: Multipart) -> Response {
    let (upload, lane) = match read_form(&mut multipart).await {
        Ok(form) => form,
        Err(e) => return error_response(e),
    };

    let permit = match st.jobs.clone().acquire_owned().await {
        Ok(p) => p,
        Err(e) => return error_response(StemError::Anyhow(e.into())),
    };

    let processor = st.processor.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        processor.handle(upload, &lane)
    })
    .await;

    match joined {
        Ok(Ok(stems)) => (StatusCode::OK, Json(ProcessResponse { stems })).into_response(),
        Ok(Err(e)) => error_response(e),
        Err(e) => error_response(StemError::Anyhow(anyhow::anyhow!(
            "processing task failed: {e}"
        ))),
    }
}

async fn read_form(multipart: &mut Multipart) -> Result<(Upload, String)> {
    let mut upload = None;
    let mut lane = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| form_error(e, StemError::InvalidRequest))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| form_error(e, StemError::Upload))?;
                upload = Some(Upload {
                    file_name,
                    bytes: bytes.to_vec(),
                });
            }
            "lane" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| form_error(e, StemError::InvalidRequest))?;
                lane = Some(text);
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| StemError::InvalidRequest("missing `file` field".into()))?;
    let lane = lane.ok_or_else(|| StemError::InvalidRequest("missing `lane` field".into()))?;
    Ok((upload, lane))
}

/// Body-limit hits keep their own kind; anything else is `other`.
fn form_error(e: MultipartError, other: fn(String) -> StemError) -> StemError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        StemError::PayloadTooLarge(e.body_text())
    } else {
        other(e.body_text())
    }
}

// ═══════════════════════════════════════════════════════════════
// GET <prefix>/:request_id/:file_name
// ═══════════════════════════════════════════════════════════════

async fn serve_file(
    State(st): State<AppState>,
    Path((request_id, file_name)): Path<(String, String)>,
) -> Response {
    let Some(path) = st
        .processor
        .workspace()
        .output_file(&request_id, &file_name)
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "audio/wav")], bytes).into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(e.into()),
    }
}

// ═══════════════════════════════════════════════════════════════
// GET /health
// ═══════════════════════════════════════════════════════════════

async fn health(State(st): State<AppState>) -> impl IntoResponse {
    let engine = st.processor.engine();
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "model": engine.model_info(),
            "sources": engine.sources(),
            "sample_rate": engine.sample_rate(),
        })),
    )
}

pub fn status_for(e: &StemError) -> StatusCode {
    match e {
        StemError::Upload(_) | StemError::InvalidRequest(_) | StemError::UnknownLane(_) => {
            StatusCode::BAD_REQUEST
        }
        StemError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        StemError::Decode(_) | StemError::UnsupportedSampleRate { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: StemError) -> Response {
    let status = status_for(&e);
    if e.is_client_error() {
        info!(kind = e.kind(), error = %e, "request rejected");
    } else {
        error!(kind = e.kind(), error = %e, "request failed");
    }
    let body = json!({"error": {"kind": e.kind(), "message": e.to_string()}});
    (status, Json(body)).into_response()
}

async fn cors(req: Request, next: Next) -> Response {
    let mut res = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };
    let headers = res.headers_mut();
    let any = HeaderValue::from_static("*");
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, any.clone());
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, any.clone());
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, any);
    res
}
