// 该文件是 Shihuo （识货） 项目的一部分。
// src/nms.rs - 非极大值抑制
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::detection::{BoundingBox, Candidate};

/// 两个框的交并比。不相交或任一框退化（面积为零）时为 0
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
  let left = a.x.max(b.x);
  let top = a.y.max(b.y);
  let right = a.right().min(b.right());
  let bottom = a.bottom().min(b.bottom());
  if right <= left || bottom <= top {
    return 0.0;
  }
  let intersection = (right - left) * (bottom - top);
  let union = a.area() + b.area() - intersection;
  if union <= 0.0 {
    return 0.0;
  }
  intersection / union
}

/// 贪心非极大值抑制，跨类别比较框
#[derive(Debug, Clone)]
pub struct NonMaxSuppressor {
  iou_threshold: f32,
}

impl NonMaxSuppressor {
  pub fn new(iou_threshold: f32) -> Self {
    Self { iou_threshold }
  }

  /// 按置信度从高到低保留候选，与已保留框交并比超过阈值的被抑制。
  /// 返回结果保持置信度降序。
  pub fn suppress<'a>(&self, mut candidates: Vec<Candidate<'a>>) -> Vec<Candidate<'a>> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Candidate<'a>> = Vec::new();
    for candidate in candidates {
      let suppressed = kept
        .iter()
        .any(|k| iou(&k.bbox, &candidate.bbox) > self.iou_threshold);
      if !suppressed {
        kept.push(candidate);
      }
    }
    kept
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
    BoundingBox {
      x,
      y,
      width: w,
      height: h,
    }
  }

  fn candidate(confidence: f32, b: BoundingBox) -> Candidate<'static> {
    Candidate {
      class_id: 0,
      name: "Pepsi",
      confidence,
      bbox: b,
    }
  }

  #[test]
  fn test_iou_identical_and_disjoint() {
    let a = bbox(0.0, 0.0, 100.0, 100.0);
    let b = bbox(200.0, 200.0, 50.0, 50.0);
    assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn test_iou_degenerate_is_zero() {
    let a = bbox(0.0, 0.0, 100.0, 100.0);
    let degenerate = bbox(50.0, 50.0, 0.0, 80.0);
    assert_eq!(iou(&a, &degenerate), 0.0);
  }

  #[test]
  fn test_heavy_overlap_suppressed() {
    // 交并比 2/3, 超过 0.45, 低分框被抑制
    let nms = NonMaxSuppressor::new(0.45);
    let kept = nms.suppress(vec![
      candidate(0.8, bbox(20.0, 0.0, 100.0, 100.0)),
      candidate(0.9, bbox(0.0, 0.0, 100.0, 100.0)),
    ]);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].confidence, 0.9);
  }

  #[test]
  fn test_light_overlap_kept() {
    // 交并比 1/3, 未超阈值, 两者都保留
    let nms = NonMaxSuppressor::new(0.45);
    let kept = nms.suppress(vec![
      candidate(0.9, bbox(0.0, 0.0, 100.0, 100.0)),
      candidate(0.8, bbox(50.0, 0.0, 100.0, 100.0)),
    ]);
    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn test_output_sorted_descending() {
    let nms = NonMaxSuppressor::new(0.45);
    let kept = nms.suppress(vec![
      candidate(0.3, bbox(0.0, 0.0, 10.0, 10.0)),
      candidate(0.9, bbox(200.0, 0.0, 10.0, 10.0)),
      candidate(0.6, bbox(400.0, 0.0, 10.0, 10.0)),
    ]);
    let confs: Vec<_> = kept.iter().map(|c| c.confidence).collect();
    assert_eq!(confs, vec![0.9, 0.6, 0.3]);
  }
}
