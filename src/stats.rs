// 该文件是 Shihuo （识货） 项目的一部分。
// src/stats.rs - 检测统计
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

use std::collections::HashMap;

/// 按类别累计的检测计数，只增不减，直到显式重置
#[derive(Debug, Default, Clone)]
pub struct DetectionStats {
  counts: HashMap<String, u64>,
  total: u64,
}

impl DetectionStats {
  pub fn record(&mut self, class_name: &str) {
    *self.counts.entry(class_name.to_string()).or_insert(0) += 1;
    self.total += 1;
  }

  pub fn count_for(&self, class_name: &str) -> u64 {
    self.counts.get(class_name).copied().unwrap_or(0)
  }

  pub fn total(&self) -> u64 {
    self.total
  }

  /// 某类别占总检测数的比例，总数为 0 时返回 0
  pub fn ratio_for(&self, class_name: &str) -> f32 {
    if self.total == 0 {
      return 0.0;
    }
    self.count_for(class_name) as f32 / self.total as f32
  }

  pub fn reset(&mut self) {
    self.counts.clear();
    self.total = 0;
  }

  /// 按类别名排序的快照，供诊断输出使用
  pub fn entries_sorted(&self) -> Vec<(String, u64)> {
    let mut entries: Vec<_> = self
      .counts
      .iter()
      .map(|(name, count)| (name.clone(), *count))
      .collect();
    entries.sort();
    entries
  }
}
