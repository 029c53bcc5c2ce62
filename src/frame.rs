// 该文件是 AeroVision 项目的一部分。
// src/frame.rs - Letterbox NCHW 帧定义
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

use image::{Rgb, RgbImage, imageops::FilterType};

const RGB_CHANNELS: usize = 3;
const LETTERBOX_FILL: u8 = 114;

/// 等比缩放并填充到 W x H 的模型输入帧，数据为 NCHW 排布的 [0, 1] 浮点数
#[derive(Debug, Clone)]
pub struct LetterboxFrame<const W: u32, const H: u32> {
  data: Box<[f32]>,
  scale: f32,
  pad_x: f32,
  pad_y: f32,
  source_width: u32,
  source_height: u32,
}

impl<const W: u32, const H: u32> From<&RgbImage> for LetterboxFrame<W, H> {
  fn from(image: &RgbImage) -> Self {
    let (source_width, source_height) = image.dimensions();
    let scale = (W as f32 / source_width.max(1) as f32).min(H as f32 / source_height.max(1) as f32);

    let resized_w = ((source_width as f32 * scale).round() as u32).clamp(1, W);
    let resized_h = ((source_height as f32 * scale).round() as u32).clamp(1, H);
    let offset_x = (W - resized_w) / 2;
    let offset_y = (H - resized_h) / 2;

    let mut canvas = RgbImage::from_pixel(W, H, Rgb([LETTERBOX_FILL; 3]));
    let resized = image::imageops::resize(image, resized_w, resized_h, FilterType::Triangle);
    image::imageops::replace(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    // 将 HWC 转为 NCHW
    let plane_size = (W * H) as usize;
    let mut data = vec![0f32; plane_size * RGB_CHANNELS];
    for (x, y, pixel) in canvas.enumerate_pixels() {
      let idx = (y * W + x) as usize;
      for c in 0..RGB_CHANNELS {
        data[c * plane_size + idx] = pixel[c] as f32 / 255.0;
      }
    }

    Self {
      data: data.into_boxed_slice(),
      scale,
      pad_x: offset_x as f32,
      pad_y: offset_y as f32,
      source_width,
      source_height,
    }
  }
}

impl<const W: u32, const H: u32> LetterboxFrame<W, H> {
  pub fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, H as usize, W as usize]
  }

  pub fn as_nchw(&self) -> &[f32] {
    &self.data
  }

  pub fn scale(&self) -> f32 {
    self.scale
  }

  /// 把模型输入坐标系的 [x1, y1, x2, y2] 映射回原图像素坐标并裁剪到图像范围
  pub fn to_source_bbox(&self, bbox: [f32; 4]) -> [f32; 4] {
    let w = self.source_width as f32;
    let h = self.source_height as f32;
    [
      ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, w),
      ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, h),
      ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, w),
      ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, h),
    ]
  }
}
