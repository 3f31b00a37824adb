// 该文件是 Shihuo （识货） 项目的一部分。
// src/bin/simple_oneshot.rs - 单帧检测演示
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
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use shihuo::frame::{CameraFrame, FrameStamp};
use shihuo::labels::LabelTable;
use shihuo::model::{ModelBuilder, ReplayModelBuilder, TensorShape};
use shihuo::pipeline::DetectionPipeline;
use shihuo::PipelineConfig;

/// Shihuo 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 帧图片路径
  #[arg(long, value_name = "IMAGE")]
  pub image: PathBuf,

  /// 回放张量文件（小端 f32 *.bin）
  #[arg(long, value_name = "TENSOR")]
  pub tensor: PathBuf,

  /// 标签文件路径，缺省使用内置类别
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 输出张量属性行数
  #[arg(long, default_value = "11", value_name = "ROWS")]
  pub attributes: usize,

  /// 输出张量槽位数
  #[arg(long, default_value = "8400", value_name = "SLOTS")]
  pub slots: usize,

  /// 模型输入边长（像素）
  #[arg(long, default_value = "640", value_name = "SIZE")]
  pub input_size: u32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("帧图片: {}", args.image.display());
  info!("回放张量: {}", args.tensor.display());

  let image = image::open(&args.image)?.to_rgb8();
  let labels = LabelTable::from_file_or_default(args.labels.as_deref());
  let model = ReplayModelBuilder::new(
    TensorShape::new(args.attributes, args.slots),
    (args.input_size, args.input_size),
  )
  .with_tensor_file(&args.tensor)
  .build()?;
  let mut pipeline = DetectionPipeline::new(model, labels, &PipelineConfig::default())?;

  info!("输入帧获取成功，开始推理...");
  let now = Instant::now();
  let batch = pipeline.process_frame(&CameraFrame::from(image), FrameStamp::now())?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  match batch {
    Some(batch) => {
      for det in &batch {
        println!("{det}");
      }
    }
    None => println!("本帧没有可上报的检测"),
  }

  Ok(())
}
