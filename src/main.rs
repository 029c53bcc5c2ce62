// 该文件是 AeroVision 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use aerovision::{
  model::ModelState,
  pipeline::DetectionPipeline,
  server::{AppState, create_app, serve},
  storage::Storage,
};

#[cfg(feature = "model_yolo_onnx")]
fn load_draw(args: &args::Args) -> aerovision::output::Draw {
  let draw = aerovision::output::Draw::default();
  match &args.font {
    Some(path) => match draw.clone().with_font_file(path) {
      Ok(draw) => draw,
      Err(e) => {
        warn!("无法加载字体 {}: {}，仅绘制边框", path.display(), e);
        draw
      }
    },
    None => draw,
  }
}

#[cfg(feature = "model_yolo_onnx")]
fn load_model(args: &args::Args) -> ModelState {
  use aerovision::model::{Labels, Yolo};

  info!("正在加载模型...");
  match Yolo::builder(&args.model)
    .labels(Labels::new(args.labels.iter().cloned()))
    .draw(load_draw(args))
    .build()
  {
    Ok(model) => {
      info!("模型加载完成: {}", args.model.display());
      ModelState::ready(model)
    }
    Err(e) => {
      error!("加载模型失败 {}: {}", args.model.display(), e);
      ModelState::unavailable(e.to_string())
    }
  }
}

#[cfg(not(feature = "model_yolo_onnx"))]
fn load_model(_args: &args::Args) -> ModelState {
  error!("未启用任何模型后端，服务以离线模式运行");
  ModelState::unavailable("no model backend compiled in")
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("AeroVision SAR 飞机检测服务");
  info!("模型文件路径: {}", args.model.display());
  info!("上传目录: {}", args.upload_dir.display());
  info!("结果目录: {}", args.result_dir.display());

  let storage = Storage::new(&args.upload_dir, &args.result_dir);
  storage
    .ensure_directories()
    .context("无法创建存储目录")?;

  // 模型在启动时加载一次，失败时服务以降级状态继续运行
  let model = load_model(&args);
  if !model.is_loaded() {
    warn!("模型不可用，所有检测请求都将被拒绝");
  }

  let state = AppState::new(DetectionPipeline::new(model, storage));
  let app = create_app(state, args.max_upload_mb.saturating_mul(1024 * 1024));

  let addr = format!("{}:{}", args.host, args.port);
  let listener = TcpListener::bind(&addr)
    .await
    .with_context(|| format!("无法监听 {}", addr))?;

  serve(listener, app).await?;

  Ok(())
}
