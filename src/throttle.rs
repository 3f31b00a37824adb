// 该文件是 Shihuo （识货） 项目的一部分。
// src/throttle.rs - 检测上报节流与类别冷却
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

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::detection::Candidate;

/// 同一帧内每个类别只保留最先出现的候选，类别名不区分大小写
pub fn dedupe_within_frame(candidates: Vec<Candidate<'_>>) -> Vec<Candidate<'_>> {
  let mut seen = HashSet::new();
  candidates
    .into_iter()
    .filter(|c| seen.insert(c.name.to_lowercase()))
    .collect()
}

/// 批次级上报节流。
///
/// 距上次放行不足最小间隔的批次被整批丢弃而不是排队，
/// 空批次不参与节流也不影响计时。首个非空批次总是放行。
#[derive(Debug)]
pub struct EmissionThrottle {
  min_interval: Duration,
  last_flush: Option<Instant>,
}

impl EmissionThrottle {
  pub fn new(min_interval: Duration) -> Self {
    Self {
      min_interval,
      last_flush: None,
    }
  }

  pub fn should_flush(&mut self, batch_len: usize, now: Instant) -> bool {
    if batch_len == 0 {
      return false;
    }
    match self.last_flush {
      Some(prev) if now.duration_since(prev) < self.min_interval => {
        debug!("距上次上报不足 {:?}, 丢弃 {} 条检测", self.min_interval, batch_len);
        false
      }
      _ => {
        self.last_flush = Some(now);
        true
      }
    }
  }

  pub fn reset(&mut self) {
    self.last_flush = None;
  }
}

/// 按类别的冷却窗口，避免同一商品在短时间内反复上报。
/// 键不区分大小写，放行时顺带清理超过两倍冷却期的旧记录。
#[derive(Debug)]
pub struct ClassCooldown {
  cooldown: Duration,
  last_emitted: HashMap<String, Instant>,
}

impl ClassCooldown {
  pub fn new(cooldown: Duration) -> Self {
    Self {
      cooldown,
      last_emitted: HashMap::new(),
    }
  }

  /// 冷却期内的类别被拒绝，放行时刷新该类别的时间戳
  pub fn admit(&mut self, class_name: &str, now: Instant) -> bool {
    let key = class_name.to_lowercase();
    if let Some(prev) = self.last_emitted.get(&key) {
      if now.duration_since(*prev) < self.cooldown {
        return false;
      }
    }
    self.last_emitted.insert(key, now);
    self.purge(now);
    true
  }

  fn purge(&mut self, now: Instant) {
    let horizon = self.cooldown * 2;
    self
      .last_emitted
      .retain(|_, t| now.duration_since(*t) <= horizon);
  }

  /// 仍在跟踪的类别数，供诊断输出使用
  pub fn tracked(&self) -> usize {
    self.last_emitted.len()
  }

  pub fn reset(&mut self) {
    self.last_emitted.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detection::BoundingBox;

  fn candidate(name: &'static str, confidence: f32) -> Candidate<'static> {
    Candidate {
      class_id: 0,
      name,
      confidence,
      bbox: BoundingBox::from_center(50.0, 50.0, 20.0, 20.0, 100.0, 100.0),
    }
  }

  #[test]
  fn test_dedupe_first_seen_wins() {
    let kept = dedupe_within_frame(vec![
      candidate("Pepsi", 0.9),
      candidate("pepsi", 0.8),
      candidate("7up", 0.7),
    ]);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].name, "Pepsi");
    assert_eq!(kept[0].confidence, 0.9);
    assert_eq!(kept[1].name, "7up");
  }

  #[test]
  fn test_first_batch_always_flushes() {
    let mut throttle = EmissionThrottle::new(Duration::from_secs(2));
    assert!(throttle.should_flush(3, Instant::now()));
  }

  #[test]
  fn test_batch_within_interval_dropped() {
    let mut throttle = EmissionThrottle::new(Duration::from_secs(2));
    let t0 = Instant::now();

    assert!(throttle.should_flush(1, t0));
    assert!(!throttle.should_flush(1, t0 + Duration::from_secs(1)));
    assert!(throttle.should_flush(1, t0 + Duration::from_secs(3)));
  }

  #[test]
  fn test_dropped_batch_does_not_reset_timer() {
    let mut throttle = EmissionThrottle::new(Duration::from_secs(2));
    let t0 = Instant::now();

    assert!(throttle.should_flush(1, t0));
    assert!(!throttle.should_flush(1, t0 + Duration::from_millis(1500)));
    // 被丢弃的批次不推迟下一次放行
    assert!(throttle.should_flush(1, t0 + Duration::from_secs(2)));
  }

  #[test]
  fn test_empty_batch_ignored() {
    let mut throttle = EmissionThrottle::new(Duration::from_secs(2));
    let t0 = Instant::now();

    assert!(!throttle.should_flush(0, t0));
    // 空批次没有占用首个放行名额
    assert!(throttle.should_flush(1, t0));
  }

  #[test]
  fn test_cooldown_blocks_then_releases() {
    let mut cooldown = ClassCooldown::new(Duration::from_secs(3));
    let t0 = Instant::now();

    assert!(cooldown.admit("Pepsi", t0));
    assert!(!cooldown.admit("Pepsi", t0 + Duration::from_secs(1)));
    assert!(cooldown.admit("Pepsi", t0 + Duration::from_secs(3)));
  }

  #[test]
  fn test_cooldown_case_insensitive() {
    let mut cooldown = ClassCooldown::new(Duration::from_secs(3));
    let t0 = Instant::now();

    assert!(cooldown.admit("Pepsi", t0));
    assert!(!cooldown.admit("PEPSI", t0 + Duration::from_secs(1)));
  }

  #[test]
  fn test_cooldown_purges_stale_entries() {
    let mut cooldown = ClassCooldown::new(Duration::from_secs(3));
    let t0 = Instant::now();

    assert!(cooldown.admit("Pepsi", t0));
    assert_eq!(cooldown.tracked(), 1);
    // 7 秒后 Pepsi 的记录已超过两倍冷却期, 放行新类别时被清走
    assert!(cooldown.admit("7up", t0 + Duration::from_secs(7)));
    assert_eq!(cooldown.tracked(), 1);
  }
}
