// 该文件是 Shihuo （识货） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::Parser;

/// Shihuo 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 回放张量目录（*.bin, 小端 f32, 按文件名排序循环）
  #[arg(long, value_name = "DIR")]
  pub tensors: PathBuf,

  /// 帧图片目录
  /// 支持格式: *.jpg, *.jpeg, *.png
  #[arg(long, value_name = "DIR")]
  pub frames: PathBuf,

  /// 标签文件路径（每行一个类别名），缺省使用内置类别
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 流水线配置文件（JSON），缺省使用出厂调参
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 校准表文件（JSON），覆盖配置文件中的校准表
  #[arg(long, value_name = "FILE")]
  pub calibration: Option<PathBuf>,

  /// 输出张量属性行数
  #[arg(long, default_value = "11", value_name = "ROWS")]
  pub attributes: usize,

  /// 输出张量槽位数
  #[arg(long, default_value = "8400", value_name = "SLOTS")]
  pub slots: usize,

  /// 模型输入边长（像素）
  #[arg(long, default_value = "640", value_name = "SIZE")]
  pub input_size: u32,

  /// 扫描轮数（0 表示循环直到中断）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub rounds: u64,
}
