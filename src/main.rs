// 该文件是 Shihuo （识货） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, warn};

use shihuo::calibration::CalibrationTable;
use shihuo::frame::CameraFrame;
use shihuo::labels::LabelTable;
use shihuo::model::{ReplayModelBuilder, TensorShape};
use shihuo::worker::{Scanner, SubmitOutcome};
use shihuo::PipelineConfig;

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  println!("Shihuo 货架商品识别");
  println!("==================");
  println!("回放张量目录: {}", args.tensors.display());
  println!("帧图片目录: {}", args.frames.display());
  println!("输出形状: {}x{}", args.attributes, args.slots);
  println!();

  let mut config = match &args.config {
    Some(path) => PipelineConfig::from_json_file(path)?,
    None => PipelineConfig::default(),
  };
  if let Some(path) = &args.calibration {
    config.calibration = CalibrationTable::from_json_file(path)?;
  }
  let pace = config.worker.interval();
  let labels = LabelTable::from_file_or_default(args.labels.as_deref());

  info!("正在构建回放模型...");
  let builder = ReplayModelBuilder::new(
    TensorShape::new(args.attributes, args.slots),
    (args.input_size, args.input_size),
  )
  .with_tensor_dir(&args.tensors)?;

  let mut scanner = Scanner::spawn(builder, labels, config)?;
  let batches = scanner.batches();

  let frame_paths = collect_frame_paths(&args.frames)?;
  info!("找到 {} 张帧图片", frame_paths.len());

  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .expect("Error setting Ctrl-C handler");

  let mut round = 0u64;
  let mut submitted = 0u64;
  let mut reported = 0usize;
  'scan: loop {
    round += 1;
    debug!("第 {} 轮扫描", round);
    for path in &frame_paths {
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出扫描循环");
        break 'scan;
      }
      let image = match image::open(path) {
        Ok(image) => image.to_rgb8(),
        Err(e) => {
          warn!("无法读取帧 {}: {}", path.display(), e);
          continue;
        }
      };
      match scanner.submit(CameraFrame::from(image)) {
        Ok(SubmitOutcome::Accepted) => submitted += 1,
        Ok(SubmitOutcome::Busy) => debug!("工作线程忙, 丢帧 {}", path.display()),
        Ok(SubmitOutcome::Throttled) => {}
        Err(e) => {
          error!("帧投递失败: {}", e);
          break 'scan;
        }
      }
      while let Ok(batch) = batches.try_recv() {
        reported += batch.len();
        for det in batch.iter() {
          println!("{det}");
        }
      }
      thread::sleep(pace);
    }
    if args.rounds > 0 && round >= args.rounds {
      info!("完成 {} 轮扫描", round);
      break;
    }
  }

  println!();
  print!("{}", scanner.diagnostics());
  scanner.shutdown()?;

  // 工作线程退出后通道里可能还留有最后一批
  while let Ok(batch) = batches.try_recv() {
    reported += batch.len();
    for det in batch.iter() {
      println!("{det}");
    }
  }

  println!();
  println!("处理完成!");
  println!("已投递帧数: {}", submitted);
  println!("已上报检测: {}", reported);

  Ok(())
}

fn collect_frame_paths(dir: &Path) -> Result<Vec<PathBuf>> {
  let entries =
    std::fs::read_dir(dir).with_context(|| format!("无法读取帧目录 {}", dir.display()))?;
  let mut paths = Vec::new();
  for entry in entries {
    let path = entry?.path();
    let matched = path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"));
    if matched {
      paths.push(path);
    }
  }
  paths.sort();
  anyhow::ensure!(!paths.is_empty(), "目录中没有帧图片: {}", dir.display());
  Ok(paths)
}
