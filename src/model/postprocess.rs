// 该文件是 AeroVision 项目的一部分。
// src/model/postprocess.rs - YOLO 输出解码与 NMS
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

use tracing::debug;

/// 每个候选框的前 4 个属性是 cx, cy, w, h，之后是各类别分数
pub const BOX_ATTRS: usize = 4;

/// 候选框，bbox 位于模型输入坐标系 [x1, y1, x2, y2]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4],
}

/// 输出张量 [1, A, N] 或 [1, N, A] 的排布
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
  /// [1, 4 + nc, N]，YOLOv8 导出的默认形式
  AttributesFirst,
  /// [1, N, 4 + nc]
  AnchorsFirst,
}

impl OutputLayout {
  /// 根据两个维度推断排布，属性维通常远小于锚点维
  pub fn infer(dim1: usize, dim2: usize) -> (Self, usize, usize) {
    if dim1 <= dim2 {
      (OutputLayout::AttributesFirst, dim1, dim2)
    } else {
      (OutputLayout::AnchorsFirst, dim2, dim1)
    }
  }
}

/// 解码原始输出，保留最高类别分数大于阈值的候选框
pub fn decode_predictions(
  output: &[f32],
  num_attrs: usize,
  num_anchors: usize,
  layout: OutputLayout,
  confidence_threshold: f32,
) -> Vec<Candidate> {
  if num_attrs <= BOX_ATTRS || output.len() < num_attrs * num_anchors {
    debug!(
      "输出大小不匹配: 长度 {}, 属性 {}, 锚点 {}",
      output.len(),
      num_attrs,
      num_anchors
    );
    return Vec::new();
  }

  let at = |attr: usize, anchor: usize| match layout {
    OutputLayout::AttributesFirst => output[attr * num_anchors + anchor],
    OutputLayout::AnchorsFirst => output[anchor * num_attrs + attr],
  };

  let mut candidates = Vec::new();
  for anchor in 0..num_anchors {
    let (score, class_id) = (BOX_ATTRS..num_attrs)
      .map(|attr| (at(attr, anchor), (attr - BOX_ATTRS) as u32))
      .fold((f32::MIN, 0u32), |best, cur| if cur.0 > best.0 { cur } else { best });

    if score <= confidence_threshold {
      continue;
    }

    let cx = at(0, anchor);
    let cy = at(1, anchor);
    let w = at(2, anchor);
    let h = at(3, anchor);

    candidates.push(Candidate {
      class_id,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }

  candidates
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix1 = a[0].max(b[0]);
  let iy1 = a[1].max(b[1]);
  let ix2 = a[2].min(b[2]);
  let iy2 = a[3].min(b[3]);

  let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;

  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 按类别的贪心 NMS，结果按分数降序，最多保留 `max_detections` 个
pub fn non_max_suppression(
  mut candidates: Vec<Candidate>,
  iou_threshold: f32,
  max_detections: usize,
) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len().min(max_detections));
  for candidate in candidates {
    if kept.len() >= max_detections {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.class_id == candidate.class_id && iou(&k.bbox, &candidate.bbox) > iou_threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }

  debug!("NMS 后保留 {} 个候选框", kept.len());
  kept
}
