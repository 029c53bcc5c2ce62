// 该文件是 AeroVision 项目的一部分。
// src/summary.rs - 检测结果统计
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

use std::fmt;

use serde::Serialize;

use crate::model::{Detection, InferenceResult};

const HIGH_THREAT_COUNT: usize = 5;
const MEDIUM_THREAT_COUNT: usize = 2;

/// 仅由检测数量决定的三级威胁等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
  Low,
  Medium,
  High,
}

impl ThreatLevel {
  pub fn from_count(count: usize) -> Self {
    if count >= HIGH_THREAT_COUNT {
      ThreatLevel::High
    } else if count >= MEDIUM_THREAT_COUNT {
      ThreatLevel::Medium
    } else {
      ThreatLevel::Low
    }
  }
}

impl fmt::Display for ThreatLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      ThreatLevel::Low => "LOW",
      ThreatLevel::Medium => "MEDIUM",
      ThreatLevel::High => "HIGH",
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnalysisSummary {
  pub detection_count: usize,
  pub average_confidence: f32,
  pub threat_level: ThreatLevel,
}

/// 空序列为 0
pub fn average_confidence(confidences: &[f32]) -> f32 {
  if confidences.is_empty() {
    return 0.0;
  }
  let sum: f64 = confidences.iter().map(|&c| c as f64).sum();
  (sum / confidences.len() as f64) as f32
}

pub fn summarize(result: &InferenceResult) -> AnalysisSummary {
  let confidences: Vec<f32> = result.detections.iter().map(|d| d.confidence).collect();
  let detection_count = confidences.len();

  AnalysisSummary {
    detection_count,
    average_confidence: average_confidence(&confidences),
    threat_level: ThreatLevel::from_count(detection_count),
  }
}

/// 原样透传模型给出的框与置信度
pub fn to_detection_list(result: &InferenceResult) -> Vec<Detection> {
  result.detections.clone()
}
