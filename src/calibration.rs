// 该文件是 Shihuo （识货） 项目的一部分。
// src/calibration.rs - 置信度校准表
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::detection::Candidate;
use crate::stats::DetectionStats;

#[derive(Error, Debug)]
pub enum CalibrationError {
  #[error("无法读取校准文件 {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("校准文件解析失败: {0}")]
  Parse(#[from] serde_json::Error),
}

fn default_boost() -> f32 {
  1.0
}

/// 单个类别的校准参数
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationEntry {
  pub threshold: f32,
  #[serde(default = "default_boost")]
  pub boost_factor: f32,
}

fn default_min_total() -> u64 {
  10
}

fn default_trigger_ratio() -> f32 {
  0.6
}

fn default_pivot_ratio() -> f32 {
  0.4
}

fn default_gain() -> f32 {
  0.5
}

/// 当某一类别在统计中占比过高时，动态抬高其阈值。
///
/// 占比超过 `trigger_ratio` 且总数超过 `min_total` 时生效，
/// 罚值为 `(占比 - pivot_ratio) * gain`，叠加在基础阈值之上。
#[derive(Debug, Clone, Deserialize)]
pub struct DominancePenalty {
  pub class: String,
  #[serde(default = "default_min_total")]
  pub min_total: u64,
  #[serde(default = "default_trigger_ratio")]
  pub trigger_ratio: f32,
  #[serde(default = "default_pivot_ratio")]
  pub pivot_ratio: f32,
  #[serde(default = "default_gain")]
  pub gain: f32,
}

fn default_threshold() -> f32 {
  0.25
}

/// 置信度校准表，决定每个类别的接受阈值与增益
#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationTable {
  #[serde(default = "default_threshold")]
  pub default_threshold: f32,
  #[serde(default)]
  pub entries: HashMap<String, CalibrationEntry>,
  #[serde(default)]
  pub dominance: Option<DominancePenalty>,
}

impl Default for CalibrationTable {
  /// 针对货架商品模型调参后的出厂校准表
  fn default() -> Self {
    fn entry(threshold: f32, boost_factor: f32) -> CalibrationEntry {
      CalibrationEntry {
        threshold,
        boost_factor,
      }
    }
    let mut entries = HashMap::new();
    entries.insert("7up".to_string(), entry(0.20, 1.10));
    entries.insert("Mirinda".to_string(), entry(0.20, 1.10));
    entries.insert("Squirt".to_string(), entry(0.20, 1.10));
    entries.insert("Pepsi".to_string(), entry(0.20, 1.0));
    entries.insert("Manzanita Sol".to_string(), entry(0.20, 1.0));
    entries.insert("Pepsi Black".to_string(), entry(0.25, 0.95));
    entries.insert("Cheetos".to_string(), entry(0.25, 1.0));
    Self {
      default_threshold: 0.25,
      entries,
      dominance: Some(DominancePenalty {
        class: "Pepsi Black".to_string(),
        min_total: default_min_total(),
        trigger_ratio: default_trigger_ratio(),
        pivot_ratio: default_pivot_ratio(),
        gain: default_gain(),
      }),
    }
  }
}

impl CalibrationTable {
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|e| CalibrationError::Io {
      path: path.to_path_buf(),
      source: e,
    })?;
    let table: Self = serde_json::from_str(&raw)?;
    info!("已加载校准表 {}, 共 {} 个类别", path.display(), table.entries.len());
    Ok(table)
  }

  pub fn boost_for(&self, class_name: &str) -> f32 {
    self
      .entries
      .get(class_name)
      .map(|e| e.boost_factor)
      .unwrap_or(1.0)
  }

  /// 类别的当前有效阈值，含动态抬高部分
  pub fn threshold_for(&self, class_name: &str, stats: &DetectionStats) -> f32 {
    let base = self
      .entries
      .get(class_name)
      .map(|e| e.threshold)
      .unwrap_or(self.default_threshold);
    if let Some(dominance) = &self.dominance {
      if dominance.class == class_name && stats.total() > dominance.min_total {
        let ratio = stats.ratio_for(class_name);
        if ratio > dominance.trigger_ratio {
          return base + (ratio - dominance.pivot_ratio) * dominance.gain;
        }
      }
    }
    base
  }

  /// 对候选应用增益并按阈值筛选，接受时计入统计。
  ///
  /// 增益后的置信度封顶为 1.0；低于或等于阈值的候选被丢弃。
  pub fn calibrate<'a>(
    &self,
    mut candidate: Candidate<'a>,
    stats: &mut DetectionStats,
  ) -> Option<Candidate<'a>> {
    let boosted = (candidate.confidence * self.boost_for(candidate.name)).min(1.0);
    let threshold = self.threshold_for(candidate.name, stats);
    if boosted <= threshold {
      return None;
    }
    candidate.confidence = boosted;
    stats.record(candidate.name);
    Some(candidate)
  }
}
