// 该文件是 AeroVision 项目的一部分。
// src/pipeline.rs - 单次检测请求的处理流程
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

use std::{fmt, time::Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  model::{
    Detection, DetectorError, LIVE_CONFIDENCE_THRESHOLD, LIVE_IOU_THRESHOLD, ModelState,
  },
  storage::{Storage, StorageError},
  summary::{ThreatLevel, summarize, to_detection_list},
  upload::{FilePart, ValidationError, validate},
};

/// 请求所处阶段，任一阶段失败即终止
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Idle,
  Validating,
  Storing,
  Inferring,
  Assembling,
  Responding,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Stage::Idle => "idle",
      Stage::Validating => "validating",
      Stage::Storing => "storing",
      Stage::Inferring => "inferring",
      Stage::Assembling => "assembling",
      Stage::Responding => "responding",
    })
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("AI model not loaded. System is offline.")]
  ModelUnavailable,
  #[error(transparent)]
  InvalidUpload(#[from] ValidationError),
  #[error("Failed to save uploaded file: {0}")]
  StorageWrite(StorageError),
  #[error("Failed to save result image: {0}")]
  ResultWrite(StorageError),
  #[error("Failed to encode images to base64.")]
  Encoding(StorageError),
  #[error("Detection process failed: {0}. Please try another image.")]
  Inference(DetectorError),
}

impl PipelineError {
  /// 客户端输入错误为 400，其余一律 500
  pub fn status_code(&self) -> u16 {
    match self {
      PipelineError::InvalidUpload(_) => 400,
      _ => 500,
    }
  }
}

impl From<DetectorError> for PipelineError {
  fn from(err: DetectorError) -> Self {
    match err {
      DetectorError::ModelUnavailable(_) => PipelineError::ModelUnavailable,
      err => PipelineError::Inference(err),
    }
  }
}

/// `POST /upload` 成功时的响应体
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResponse {
  pub success: bool,
  pub original_image: String,
  pub result_image: String,
  pub detections: Vec<Detection>,
  pub detection_count: usize,
  pub average_confidence: f32,
  pub threat_level: ThreatLevel,
  pub inference_ms: f64,
  pub filename: String,
  pub result_filename: String,
}

/// 所有失败路径共用的响应体
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
  pub success: bool,
  pub error: String,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    ErrorResponse {
      success: false,
      error: error.into(),
    }
  }
}

impl From<&PipelineError> for ErrorResponse {
  fn from(err: &PipelineError) -> Self {
    ErrorResponse::new(err.to_string())
  }
}

/// 校验 → 存储 → 推理 → 统计 → 响应
#[derive(Debug, Clone)]
pub struct DetectionPipeline {
  model: ModelState,
  storage: Storage,
  confidence_threshold: f32,
  iou_threshold: f32,
}

impl DetectionPipeline {
  pub fn new(model: ModelState, storage: Storage) -> Self {
    DetectionPipeline {
      model,
      storage,
      confidence_threshold: LIVE_CONFIDENCE_THRESHOLD,
      iou_threshold: LIVE_IOU_THRESHOLD,
    }
  }

  pub fn model_loaded(&self) -> bool {
    self.model.is_loaded()
  }

  pub fn storage(&self) -> &Storage {
    &self.storage
  }

  pub fn run(&self, part: Option<FilePart>) -> Result<DetectionResponse, PipelineError> {
    let mut stage = Stage::Idle;
    let result = self.run_stages(part, &mut stage);
    match &result {
      Ok(response) => info!(
        "请求完成: {}，检测到 {} 个目标",
        response.filename, response.detection_count
      ),
      Err(e) if e.status_code() == 400 => warn!("请求在 {} 阶段被拒绝: {}", stage, e),
      Err(e) => error!("请求在 {} 阶段失败: {}", stage, e),
    }
    result
  }

  fn run_stages(
    &self,
    part: Option<FilePart>,
    stage: &mut Stage,
  ) -> Result<DetectionResponse, PipelineError> {
    let mut enter = |next: Stage| {
      debug!("{} -> {}", stage, next);
      *stage = next;
    };

    // 模型不可用时直接拒绝，不触碰存储
    let detector = self.model.detector().ok_or(PipelineError::ModelUnavailable)?;

    enter(Stage::Validating);
    let file = validate(part)?;

    enter(Stage::Storing);
    let asset = self
      .storage
      .save_original(&file)
      .map_err(PipelineError::StorageWrite)?;

    enter(Stage::Inferring);
    let now = Instant::now();
    let result = detector.infer(
      &asset.stored_path,
      self.confidence_threshold,
      self.iou_threshold,
    )?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);

    enter(Stage::Storing);
    let result_path = self
      .storage
      .save_result(&asset.stored_name, &result.annotated_image)
      .map_err(PipelineError::ResultWrite)?;

    enter(Stage::Assembling);
    let summary = summarize(&result);
    let detections = to_detection_list(&result);
    let original_image = self
      .storage
      .read_as_transport_encoding(&asset.stored_path)
      .map_err(PipelineError::Encoding)?;
    let result_image = self
      .storage
      .read_as_transport_encoding(&result_path)
      .map_err(PipelineError::Encoding)?;
    let result_filename = result_path
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or_default()
      .to_string();

    enter(Stage::Responding);
    Ok(DetectionResponse {
      success: true,
      original_image,
      result_image,
      detections,
      detection_count: summary.detection_count,
      average_confidence: summary.average_confidence,
      threat_level: summary.threat_level,
      inference_ms: elapsed.as_secs_f64() * 1000.0,
      filename: asset.stored_name,
      result_filename,
    })
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;

  use super::*;
  use crate::model::{Detector, InferenceResult};

  #[test]
  fn client_errors_map_to_400_and_the_rest_to_500() {
    assert_eq!(PipelineError::InvalidUpload(ValidationError::MissingFilePart).status_code(), 400);
    assert_eq!(PipelineError::ModelUnavailable.status_code(), 500);
    assert_eq!(
      PipelineError::Inference(DetectorError::Inference("oom".to_string())).status_code(),
      500
    );
  }

  #[test]
  fn adapter_unavailability_becomes_the_offline_error() {
    let err = PipelineError::from(DetectorError::ModelUnavailable("gone".to_string()));
    assert!(matches!(err, PipelineError::ModelUnavailable));
    assert_eq!(err.to_string(), "AI model not loaded. System is offline.");

    let err = PipelineError::from(DetectorError::Inference("corrupt image".to_string()));
    assert_eq!(
      err.to_string(),
      "Detection process failed: corrupt image. Please try another image."
    );
  }

  #[test]
  fn offline_pipeline_rejects_before_validation() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path().join("uploads"), dir.path().join("results"));
    let pipeline = DetectionPipeline::new(ModelState::unavailable("no weights"), storage);

    let err = pipeline.run(None).unwrap_err();
    assert!(matches!(err, PipelineError::ModelUnavailable));
    assert!(!pipeline.storage().upload_dir().exists());
  }

  struct Blank;

  impl Detector for Blank {
    fn infer(&self, _: &Path, _: f32, _: f32) -> Result<InferenceResult, DetectorError> {
      Ok(InferenceResult {
        detections: Vec::new(),
        annotated_image: image::RgbImage::new(2, 2),
      })
    }
  }

  #[test]
  fn result_write_failure_is_attributed_to_storing() {
    let dir = tempfile::tempdir().unwrap();
    let upload_dir = dir.path().join("uploads");
    std::fs::create_dir_all(&upload_dir).unwrap();
    // 结果目录不存在，结果图像无法落盘
    let storage = Storage::new(&upload_dir, dir.path().join("results"));
    let pipeline = DetectionPipeline::new(ModelState::ready(Blank), storage);

    let part = FilePart {
      file_name: Some("scene.png".to_string()),
      bytes: b"png".to_vec(),
    };
    let mut stage = Stage::Idle;
    let err = pipeline.run_stages(Some(part), &mut stage).unwrap_err();

    assert!(matches!(err, PipelineError::ResultWrite(_)));
    assert_eq!(stage, Stage::Storing);
    assert!(err.to_string().starts_with("Failed to save result image: "));
  }

  #[test]
  fn error_response_echoes_the_message() {
    let body = ErrorResponse::from(&PipelineError::InvalidUpload(ValidationError::EmptyFilename));
    let json = serde_json::to_value(&body).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "No selected file. Please choose an image to upload.");
  }
}
