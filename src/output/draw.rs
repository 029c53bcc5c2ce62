// 该文件是 AeroVision 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::model::Detection;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255]; // 白色
const BOX_THICKNESS: i32 = 2;
const PALETTE_SIZE: usize = 20;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  InvalidFont(String),
}

/// 标注绘制器，未配置字体时只画边框
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  thickness: i32,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    // 生成不同类别的颜色
    let colors = (0..PALETTE_SIZE)
      .map(|i| {
        let hue = (i as f32 / PALETTE_SIZE as f32) * 360.0;
        hsv_to_rgb(hue, 0.8, 0.95)
      })
      .collect();

    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      thickness: BOX_THICKNESS,
      colors,
    }
  }
}

impl std::fmt::Debug for Draw {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Draw")
      .field("font", &self.font.is_some())
      .field("font_size", &self.font_size)
      .field("thickness", &self.thickness)
      .finish_non_exhaustive()
  }
}

/// HSV 转 RGB
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw {
  /// 从 TTF/OTF 文件加载标签字体
  pub fn with_font_file(mut self, path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("加载标签字体: {}", path.display());
    self.font = Some(font);
    Ok(self)
  }

  pub fn color_of(&self, class_id: u32) -> Rgb<u8> {
    self.colors[class_id as usize % self.colors.len()]
  }

  /// 在图像上绘制检测结果
  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      self.draw_bbox_with_label(image, detection);
    }
  }

  // bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }
    let (w, h) = (image.width() as i32, image.height() as i32);
    let bbox = &detection.bbox;

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = self.color_of(detection.class_id);

    // 逐层向内绘制以加粗边框
    for t in 0..self.thickness {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", detection.class_name, detection.confidence);
    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, &label);

    // 标签放在边框上方，空间不足时贴着图像上沿
    let label_h = text_h as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;
    let label_y = (y_min - label_h).max(0);
    let label_w = (text_w as i32).min(w - x_min);

    if label_w > 0 && label_h > 0 {
      let rect = Rect::at(x_min, label_y).of_size(label_w as u32, label_h as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb(LABEL_TEXT_COLOR),
        x_min,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        scale,
        font,
        &label,
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(bbox: [f32; 4]) -> Detection {
    Detection {
      class_id: 0,
      class_name: "aircraft".to_string(),
      confidence: 0.9,
      bbox,
    }
  }

  #[test]
  fn no_detections_leaves_image_untouched() {
    let draw = Draw::default();
    let original = RgbImage::from_pixel(32, 32, Rgb([10, 20, 30]));
    let mut image = original.clone();
    draw.draw_detections(&mut image, &[]);
    assert_eq!(image, original);
  }

  #[test]
  fn draws_a_thick_border_inside_the_box() {
    let draw = Draw::default();
    let mut image = RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]));
    draw.draw_detections(&mut image, &[detection([4.0, 4.0, 20.0, 20.0])]);

    let color = draw.color_of(0);
    assert_eq!(*image.get_pixel(4, 4), color);
    assert_eq!(*image.get_pixel(5, 12), color);
    assert_eq!(*image.get_pixel(20, 12), color);
    // 边框内部与外部保持原样
    assert_eq!(*image.get_pixel(12, 12), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(25, 25), Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_and_out_of_bounds_boxes_are_skipped() {
    let draw = Draw::default();
    let original = RgbImage::new(16, 16);
    let mut image = original.clone();
    draw.draw_detections(
      &mut image,
      &[detection([8.0, 8.0, 8.0, 12.0]), detection([40.0, 40.0, 60.0, 60.0])],
    );
    assert_eq!(image, original);
  }

  #[test]
  fn missing_font_file_is_an_io_error() {
    let err = Draw::default()
      .with_font_file("/nonexistent/font.ttf")
      .unwrap_err();
    assert!(matches!(err, DrawError::IoError(_)));
  }
}
