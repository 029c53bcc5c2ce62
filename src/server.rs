// 该文件是 AeroVision 项目的一部分。
// src/server.rs - HTTP 接口
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{path::Path as FsPath, sync::Arc};

use axum::{
  Json, Router,
  extract::{
    DefaultBodyLimit, Multipart, Path, State,
    multipart::{MultipartError, MultipartRejection},
  },
  http::{StatusCode, header},
  response::{IntoResponse, Response},
  routing::{get, post},
};
use image::ImageFormat;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::{
  pipeline::{DetectionPipeline, ErrorResponse, PipelineError},
  storage::{ArtifactKind, StorageError},
  upload::FilePart,
};

/// 上传表单中的文件字段名
pub const FILE_FIELD: &str = "file";
/// 默认上传大小上限
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
  pipeline: Arc<DetectionPipeline>,
}

impl AppState {
  pub fn new(pipeline: DetectionPipeline) -> Self {
    AppState {
      pipeline: Arc::new(pipeline),
    }
  }
}

/// 失败响应：状态码加 `{success: false, error}`
struct ApiErrorResponse(StatusCode, String);

impl IntoResponse for ApiErrorResponse {
  fn into_response(self) -> Response {
    (self.0, Json(ErrorResponse::new(self.1))).into_response()
  }
}

pub fn create_app(state: AppState, max_upload_bytes: usize) -> Router {
  Router::new()
    .route("/upload", post(upload_handler))
    .route("/uploads/:filename", get(upload_file_handler))
    .route("/results/:filename", get(result_file_handler))
    .route("/health", get(health_handler))
    .layer(DefaultBodyLimit::max(max_upload_bytes))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
  if let Ok(addr) = listener.local_addr() {
    info!("HTTP 服务监听于 {}", addr);
  }
  axum::serve(listener, app).await
}

/// 取出第一个带文件名的 `file` 字段，普通表单字段与其余字段忽略
async fn read_file_part(multipart: &mut Multipart) -> Result<Option<FilePart>, ApiErrorResponse> {
  let bad_request = |e: MultipartError| {
    ApiErrorResponse(e.status(), format!("Malformed upload: {}", e.body_text()))
  };

  while let Some(field) = multipart.next_field().await.map_err(bad_request)? {
    if field.name() != Some(FILE_FIELD) {
      continue;
    }
    let Some(file_name) = field.file_name().map(str::to_string) else {
      debug!("忽略不带文件名的 {} 字段", FILE_FIELD);
      continue;
    };
    let bytes = field.bytes().await.map_err(bad_request)?;
    debug!("收到上传字段: {:?}, {} 字节", file_name, bytes.len());
    return Ok(Some(FilePart {
      file_name: Some(file_name),
      bytes: bytes.to_vec(),
    }));
  }

  Ok(None)
}

async fn upload_handler(
  State(state): State<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Response {
  // 与流水线一致：模型不可用时先于任何请求体检查拒绝
  if !state.pipeline.model_loaded() {
    let e = PipelineError::ModelUnavailable;
    error!("拒绝上传: {}", e);
    return ApiErrorResponse(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
  }

  let mut multipart = match multipart {
    Ok(multipart) => multipart,
    Err(e) => {
      return ApiErrorResponse(e.status(), format!("Malformed upload: {}", e.body_text()))
        .into_response();
    }
  };

  let part = match read_file_part(&mut multipart).await {
    Ok(part) => part,
    Err(e) => return e.into_response(),
  };

  let pipeline = state.pipeline.clone();
  match tokio::task::spawn_blocking(move || pipeline.run(part)).await {
    Ok(Ok(response)) => Json(response).into_response(),
    Ok(Err(e)) => {
      let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
      (status, Json(ErrorResponse::from(&e))).into_response()
    }
    Err(e) => {
      error!("检测任务异常退出: {}", e);
      ApiErrorResponse(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Detection process failed: {}. Please try another image.", e),
      )
      .into_response()
    }
  }
}

async fn upload_file_handler(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
  serve_artifact(state, ArtifactKind::Upload, filename).await
}

async fn result_file_handler(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
  serve_artifact(state, ArtifactKind::Result, filename).await
}

fn content_type_of(filename: &str) -> &'static str {
  FsPath::new(filename)
    .extension()
    .and_then(ImageFormat::from_extension)
    .map(|format| format.to_mime_type())
    .unwrap_or("application/octet-stream")
}

async fn serve_artifact(state: AppState, kind: ArtifactKind, filename: String) -> Response {
  let pipeline = state.pipeline.clone();
  let name = filename.clone();
  let read = tokio::task::spawn_blocking(move || pipeline.storage().open_artifact(kind, &name)).await;

  match read {
    Ok(Ok(bytes)) => (
      StatusCode::OK,
      [(header::CONTENT_TYPE, content_type_of(&filename))],
      bytes,
    )
      .into_response(),
    Ok(Err(StorageError::NotFound(name))) => {
      ApiErrorResponse(StatusCode::NOT_FOUND, format!("File not found: {}", name)).into_response()
    }
    Ok(Err(e)) => {
      error!("读取文件失败: {}", e);
      ApiErrorResponse(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
    }
    Err(e) => ApiErrorResponse(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
  }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
  let loaded = state.pipeline.model_loaded();
  Json(json!({
    "status": if loaded { "ok" } else { "degraded" },
    "model_loaded": loaded,
  }))
}
