// 该文件是 Shihuo （识货） 项目的一部分。
// src/config.rs - 流水线配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::calibration::CalibrationTable;
use crate::decoder::OutputFormat;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("配置文件解析失败: {0}")]
  Parse(#[from] serde_json::Error),
}

/// 解码与框筛选参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
  /// 输出张量布局，默认按形状自动判断
  pub output_format: OutputFormat,
  /// 非极大值抑制的交并比阈值
  pub iou_threshold: f32,
  /// 抑制之后的置信度下限，低于它的框被丢弃
  pub min_confidence: f32,
}

impl Default for DecodeConfig {
  fn default() -> Self {
    Self {
      output_format: OutputFormat::Auto,
      iou_threshold: 0.45,
      min_confidence: 0.15,
    }
  }
}

/// 时序稳定窗口参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StabilityConfig {
  pub window_ms: u64,
  /// 窗口内需要的最少目击次数
  pub min_count: usize,
}

impl Default for StabilityConfig {
  fn default() -> Self {
    Self {
      window_ms: 500,
      min_count: 1,
    }
  }
}

impl StabilityConfig {
  pub fn window(&self) -> Duration {
    Duration::from_millis(self.window_ms)
  }
}

/// 上报节流与类别冷却参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
  /// 两次批量上报之间的最小间隔
  pub min_interval_ms: u64,
  /// 同一类别两次上报之间的最小间隔
  pub cooldown_ms: u64,
}

impl Default for ThrottleConfig {
  fn default() -> Self {
    Self {
      min_interval_ms: 2000,
      cooldown_ms: 3000,
    }
  }
}

impl ThrottleConfig {
  pub fn min_interval(&self) -> Duration {
    Duration::from_millis(self.min_interval_ms)
  }

  pub fn cooldown(&self) -> Duration {
    Duration::from_millis(self.cooldown_ms)
  }
}

/// 工作线程节奏与故障恢复参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// 两帧之间的最小间隔
  pub interval_ms: u64,
  /// 单帧推理耗时预算，超出仅告警
  pub latency_budget_ms: u64,
  /// 单帧内推理失败的最大重试次数
  pub max_retries: u32,
  /// 重试退避基数，实际等待为基数乘以当前次数
  pub retry_backoff_ms: u64,
  /// 连续失败多少帧后触发引擎重建
  pub max_consecutive_failures: u32,
  /// 引擎重建前的退避
  pub recovery_backoff_ms: u64,
  /// 重建尝试次数上限，超过后进入不可用状态
  pub max_recovery_attempts: u32,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      interval_ms: 100,
      latency_budget_ms: 1000,
      max_retries: 3,
      retry_backoff_ms: 100,
      max_consecutive_failures: 3,
      recovery_backoff_ms: 1000,
      max_recovery_attempts: 3,
    }
  }
}

impl WorkerConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_millis(self.interval_ms)
  }

  pub fn latency_budget(&self) -> Duration {
    Duration::from_millis(self.latency_budget_ms)
  }

  pub fn retry_backoff(&self, attempt: u32) -> Duration {
    Duration::from_millis(self.retry_backoff_ms * attempt as u64)
  }

  pub fn recovery_backoff(&self) -> Duration {
    Duration::from_millis(self.recovery_backoff_ms)
  }
}

/// 整条流水线的配置，各分组缺省值即出厂调参
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub decode: DecodeConfig,
  pub calibration: CalibrationTable,
  pub stability: StabilityConfig,
  pub throttle: ThrottleConfig,
  pub worker: WorkerConfig,
}

impl PipelineConfig {
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|e| ConfigError::Io {
      path: path.to_path_buf(),
      source: e,
    })?;
    let config: Self = serde_json::from_str(&raw)?;
    info!("已加载配置文件 {}", path.display());
    Ok(config)
  }
}
