// 该文件是 AeroVision 项目的一部分。
// src/model/yolo.rs - ONNX YOLO 模型定义
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

use std::{
  path::{Path, PathBuf},
  sync::Mutex,
};

use ndarray::Array4;
use ort::{
  execution_providers::CPUExecutionProvider,
  session::{Session, builder::GraphOptimizationLevel},
  value::Value,
};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::LetterboxFrame,
  model::{
    Detection, Detector, DetectorError, InferenceResult, Labels, decode_image,
    postprocess::{OutputLayout, decode_predictions, non_max_suppression},
  },
  output::{Draw, Render},
};

const YOLO_INPUT_W: u32 = 640;
const YOLO_INPUT_H: u32 = 640;
const YOLO_MAX_DETECTIONS: usize = 300;
const YOLO_INTRA_THREADS: usize = 4;

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(String),
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
}

impl YoloError {
  fn runtime(e: impl std::fmt::Display) -> Self {
    YoloError::Runtime(e.to_string())
  }
}

impl From<YoloError> for DetectorError {
  fn from(err: YoloError) -> Self {
    match err {
      YoloError::ModelNotFound(_) | YoloError::ModelInvalid(_) => {
        DetectorError::ModelUnavailable(err.to_string())
      }
      YoloError::Runtime(msg) => DetectorError::Inference(msg),
    }
  }
}

pub struct YoloBuilder {
  model_path: PathBuf,
  labels: Labels,
  draw: Draw,
}

impl YoloBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    YoloBuilder {
      model_path: model_path.into(),
      labels: Labels::default(),
      draw: Draw::default(),
    }
  }

  pub fn labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  pub fn draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    if !self.model_path.exists() {
      return Err(YoloError::ModelNotFound(self.model_path.display().to_string()));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let session = Session::builder()
      .map_err(YoloError::runtime)?
      .with_execution_providers([CPUExecutionProvider::default().build()])
      .map_err(YoloError::runtime)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(YoloError::runtime)?
      .with_intra_threads(YOLO_INTRA_THREADS)
      .map_err(YoloError::runtime)?
      .commit_from_file(&self.model_path)
      .map_err(YoloError::runtime)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .ok_or_else(|| YoloError::ModelInvalid("模型没有输入".to_string()))?;

    if session.outputs.is_empty() {
      error!("模型没有输出");
      return Err(YoloError::ModelInvalid("模型没有输出".to_string()));
    }

    debug!("模型输入: {}", input_name);
    debug!("模型输出数量: {}", session.outputs.len());
    info!("模型加载完成，类别数: {}", self.labels.len());

    Ok(Yolo {
      session: Mutex::new(session),
      input_name,
      labels: self.labels,
      draw: self.draw,
    })
  }
}

/// YOLOv8 布局的 ONNX 检测器，会话在进程内共享
pub struct Yolo {
  session: Mutex<Session>,
  input_name: String,
  labels: Labels,
  draw: Draw,
}

impl Yolo {
  pub fn builder(model_path: impl Into<PathBuf>) -> YoloBuilder {
    YoloBuilder::new(model_path)
  }

  fn run(
    &self,
    frame: &LetterboxFrame<YOLO_INPUT_W, YOLO_INPUT_H>,
  ) -> Result<(Vec<usize>, Vec<f32>), YoloError> {
    let input = Array4::from_shape_vec(
      frame.shape(),
      frame.as_nchw().to_vec(),
    )
    .map_err(YoloError::runtime)?;
    let input_value = Value::from_array(input).map_err(YoloError::runtime)?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| YoloError::Runtime("推理会话锁已损坏".to_string()))?;

    debug!("执行模型推理");
    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => input_value])
      .map_err(YoloError::runtime)?;

    let tensor = outputs[0]
      .try_extract_array::<f32>()
      .map_err(YoloError::runtime)?;
    let shape = tensor.shape().to_vec();
    let data = tensor.iter().copied().collect();
    Ok((shape, data))
  }
}

impl Detector for Yolo {
  fn infer(
    &self,
    image_path: &Path,
    confidence_threshold: f32,
    iou_threshold: f32,
  ) -> Result<InferenceResult, DetectorError> {
    let image = decode_image(image_path)?;
    debug!("输入图像: {}x{}", image.width(), image.height());

    let frame = LetterboxFrame::<YOLO_INPUT_W, YOLO_INPUT_H>::from(&image);
    let (shape, data) = self.run(&frame)?;
    debug!("模型输出形状: {:?}", shape);

    let (layout, num_attrs, num_anchors) = match shape.as_slice() {
      [1, d1, d2] => OutputLayout::infer(*d1, *d2),
      other => {
        return Err(DetectorError::Inference(format!(
          "unexpected output shape {:?}",
          other
        )));
      }
    };

    let candidates = decode_predictions(
      &data,
      num_attrs,
      num_anchors,
      layout,
      confidence_threshold,
    );
    let kept = non_max_suppression(candidates, iou_threshold, YOLO_MAX_DETECTIONS);

    let detections: Vec<Detection> = kept
      .into_iter()
      .filter_map(|candidate| {
        let bbox = frame.to_source_bbox(candidate.bbox);
        (bbox[0] < bbox[2] && bbox[1] < bbox[3]).then(|| Detection {
          class_id: candidate.class_id,
          class_name: self.labels.name_of(candidate.class_id),
          confidence: candidate.score,
          bbox,
        })
      })
      .collect();

    debug!("检测到 {} 个目标", detections.len());

    let annotated_image = self.draw.render(&image, &detections);
    Ok(InferenceResult {
      detections,
      annotated_image,
    })
  }
}
