// 该文件是 AeroVision 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;

use aerovision::storage::{RESULTS_FOLDER, UPLOAD_FOLDER};

/// AeroVision SAR 飞机检测服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, env = "AEROVISION_HOST", default_value = "0.0.0.0")]
  pub host: String,

  /// 监听端口
  #[arg(long, env = "AEROVISION_PORT", default_value = "5000")]
  pub port: u16,

  /// ONNX 模型文件路径
  #[arg(
    long,
    env = "AEROVISION_MODEL",
    value_name = "FILE",
    default_value = "runs/detect/sar_aircraft_detector/weights/best.onnx"
  )]
  pub model: PathBuf,

  /// 类别名称，按类别编号顺序，以逗号分隔
  #[arg(long, env = "AEROVISION_LABELS", value_delimiter = ',', default_value = "aircraft")]
  pub labels: Vec<String>,

  /// 标签字体（TTF/OTF），不指定时只绘制边框
  #[arg(long, env = "AEROVISION_FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 上传图像目录
  #[arg(long, env = "AEROVISION_UPLOAD_DIR", default_value = UPLOAD_FOLDER)]
  pub upload_dir: PathBuf,

  /// 检测结果目录
  #[arg(long, env = "AEROVISION_RESULT_DIR", default_value = RESULTS_FOLDER)]
  pub result_dir: PathBuf,

  /// 单次上传大小上限（MB）
  #[arg(long, env = "AEROVISION_MAX_UPLOAD_MB", default_value = "64")]
  pub max_upload_mb: usize,
}
