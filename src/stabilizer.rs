// 该文件是 Shihuo （识货） 项目的一部分。
// src/stabilizer.rs - 时序稳定器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// 类别在滑动窗口内的稳定程度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityState {
  /// 窗口内没有任何目击
  Unseen,
  /// 有目击但次数还不够
  Accumulating,
  /// 窗口内目击次数达到要求
  Stable,
}

/// 按类别累计滑动窗口内的目击次数，压制一闪而过的误检。
///
/// 每次目击都会先剔除窗口外的旧记录再计数，次数达到
/// `min_count` 的类别进入稳定态，允许继续向下游传递。
#[derive(Debug)]
pub struct TemporalStabilizer {
  window: Duration,
  min_count: usize,
  sightings: HashMap<String, VecDeque<Instant>>,
}

impl TemporalStabilizer {
  pub fn new(window: Duration, min_count: usize) -> Self {
    Self {
      window,
      min_count: min_count.max(1),
      sightings: HashMap::new(),
    }
  }

  /// 记录一次目击并返回该类别记录后的状态。
  /// 顺带清走所有类别中超过两倍窗口的旧记录，清空的类别随之移除。
  pub fn observe(&mut self, class_name: &str, now: Instant) -> StabilityState {
    let horizon = self.window * 2;
    self.sightings.retain(|_, times| {
      while times
        .front()
        .is_some_and(|t| now.duration_since(*t) > horizon)
      {
        times.pop_front();
      }
      !times.is_empty()
    });

    let sightings = self.sightings.entry(class_name.to_string()).or_default();
    while sightings
      .front()
      .is_some_and(|t| now.duration_since(*t) > self.window)
    {
      sightings.pop_front();
    }
    sightings.push_back(now);
    if sightings.len() >= self.min_count {
      StabilityState::Stable
    } else {
      StabilityState::Accumulating
    }
  }

  /// 只读查询当前状态，不计入目击
  pub fn state(&self, class_name: &str, now: Instant) -> StabilityState {
    let Some(sightings) = self.sightings.get(class_name) else {
      return StabilityState::Unseen;
    };
    let recent = sightings
      .iter()
      .filter(|t| now.duration_since(**t) <= self.window)
      .count();
    if recent == 0 {
      StabilityState::Unseen
    } else if recent < self.min_count {
      StabilityState::Accumulating
    } else {
      StabilityState::Stable
    }
  }

  /// 仍在跟踪的类别数，供测试与诊断使用
  pub fn tracked(&self) -> usize {
    self.sightings.len()
  }

  /// 所有类别的历史记录总条数
  pub fn sighting_count(&self) -> usize {
    self.sightings.values().map(VecDeque::len).sum()
  }

  pub fn reset(&mut self) {
    self.sightings.clear();
  }
}
