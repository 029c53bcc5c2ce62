// 该文件是 AeroVision 项目的一部分。
// src/model.rs - 检测模型接口
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

use std::{fmt, path::Path, sync::Arc};

use image::{ImageError, ImageReader, RgbImage};
use serde::Serialize;
use thiserror::Error;

/// 在线服务使用的置信度阈值
pub const LIVE_CONFIDENCE_THRESHOLD: f32 = 0.25;
/// 在线服务使用的 NMS IoU 阈值
pub const LIVE_IOU_THRESHOLD: f32 = 0.7;

/// 单个检测目标，bbox 为原图像素坐标 [x1, y1, x2, y2]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub class_id: u32,
  pub class_name: String,
  pub confidence: f32,
  pub bbox: [f32; 4],
}

/// 一次推理的结果，仅属于单个请求
#[derive(Debug, Clone)]
pub struct InferenceResult {
  pub detections: Vec<Detection>,
  pub annotated_image: RgbImage,
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("model unavailable: {0}")]
  ModelUnavailable(String),
  #[error("image decode failed: {0}")]
  Decode(#[from] image::ImageError),
  #[error("{0}")]
  Inference(String),
}

/// 按文件内容而非扩展名识别格式并解码为 RGB
pub fn decode_image(path: &Path) -> Result<RgbImage, DetectorError> {
  let image = ImageReader::open(path)
    .map_err(ImageError::IoError)?
    .with_guessed_format()
    .map_err(ImageError::IoError)?
    .decode()?;
  Ok(image.to_rgb8())
}

/// 检测模型适配器
///
/// 对流水线而言推理是幂等且无副作用的：给定图像路径与两个阈值，
/// 返回检测列表以及绘制好的标注图像。
pub trait Detector: Send + Sync {
  fn infer(
    &self,
    image_path: &Path,
    confidence_threshold: f32,
    iou_threshold: f32,
  ) -> Result<InferenceResult, DetectorError>;
}

/// 进程级模型状态，启动时构造一次，之后只读
#[derive(Clone)]
pub enum ModelState {
  Ready(Arc<dyn Detector>),
  Unavailable(Arc<str>),
}

impl ModelState {
  pub fn ready<D: Detector + 'static>(detector: D) -> Self {
    ModelState::Ready(Arc::new(detector))
  }

  pub fn unavailable(reason: impl Into<String>) -> Self {
    ModelState::Unavailable(Arc::from(reason.into()))
  }

  pub fn detector(&self) -> Option<&Arc<dyn Detector>> {
    match self {
      ModelState::Ready(detector) => Some(detector),
      ModelState::Unavailable(_) => None,
    }
  }

  pub fn is_loaded(&self) -> bool {
    matches!(self, ModelState::Ready(_))
  }
}

impl fmt::Debug for ModelState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelState::Ready(_) => f.write_str("ModelState::Ready"),
      ModelState::Unavailable(reason) => write!(f, "ModelState::Unavailable({reason})"),
    }
  }
}

/// 类别名称表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: Box<[String]>,
}

impl Default for Labels {
  fn default() -> Self {
    Labels::new(["aircraft"])
  }
}

impl Labels {
  pub fn new<I, S>(names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Labels {
      names: names.into_iter().map(Into::into).collect(),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name_of(&self, class_id: u32) -> String {
    self
      .names
      .get(class_id as usize)
      .cloned()
      .unwrap_or_else(|| format!("class_{}", class_id))
  }
}

pub mod postprocess;

#[cfg(feature = "model_yolo_onnx")]
mod yolo;
#[cfg(feature = "model_yolo_onnx")]
pub use self::yolo::{Yolo, YoloBuilder, YoloError};

#[cfg(test)]
mod tests {
  use super::*;

  struct Never;

  impl Detector for Never {
    fn infer(&self, _: &Path, _: f32, _: f32) -> Result<InferenceResult, DetectorError> {
      Err(DetectorError::Inference("never".to_string()))
    }
  }

  #[test]
  fn labels_fall_back_to_class_id() {
    let labels = Labels::new(["aircraft", "ship"]);
    assert_eq!(labels.name_of(1), "ship");
    assert_eq!(labels.name_of(7), "class_7");
    assert_eq!(Labels::default().name_of(0), "aircraft");
  }

  #[test]
  fn model_state_records_load_outcome() {
    let ready = ModelState::ready(Never);
    assert!(ready.is_loaded());
    assert!(ready.detector().is_some());

    let offline = ModelState::unavailable("weights missing");
    assert!(!offline.is_loaded());
    assert!(offline.detector().is_none());
    assert_eq!(format!("{:?}", offline), "ModelState::Unavailable(weights missing)");
  }

  #[test]
  fn decoder_follows_content_not_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.jpg");
    RgbImage::from_pixel(5, 3, image::Rgb([9, 8, 7]))
      .save_with_format(&path, image::ImageFormat::Png)
      .unwrap();

    let image = decode_image(&path).unwrap();
    assert_eq!(image.dimensions(), (5, 3));
    assert_eq!(image.get_pixel(0, 0), &image::Rgb([9, 8, 7]));

    std::fs::write(&path, b"not an image").unwrap();
    assert!(matches!(decode_image(&path), Err(DetectorError::Decode(_))));
  }
}
