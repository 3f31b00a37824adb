// 该文件是 Shihuo （识货） 项目的一部分。
// src/detection.rs - 候选框与检测结果
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt::{self, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::frame::FrameStamp;

static NEXT_DETECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_detection_id() -> String {
  let n = NEXT_DETECTION_ID.fetch_add(1, Ordering::Relaxed);
  format!("det-{n}")
}

/// 以像素为单位的检测框，原点在左上角
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  /// 由中心点与宽高构造，并裁剪到帧边界内
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, frame_w: f32, frame_h: f32) -> Self {
    let x = (cx - w / 2.0).clamp(0.0, frame_w);
    let y = (cy - h / 2.0).clamp(0.0, frame_h);
    let right = (cx + w / 2.0).clamp(0.0, frame_w);
    let bottom = (cy + h / 2.0).clamp(0.0, frame_h);
    Self {
      x,
      y,
      width: right - x,
      height: bottom - y,
    }
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    if self.width <= 0.0 || self.height <= 0.0 {
      return 0.0;
    }
    self.width * self.height
  }

  pub fn center(&self) -> (f32, f32) {
    (self.x + self.width / 2.0, self.y + self.height / 2.0)
  }
}

/// 解码后尚未最终确认的候选检测，生命周期内借用标签表
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
  pub class_id: usize,
  pub name: &'a str,
  pub confidence: f32,
  pub bbox: BoundingBox,
}

impl<'a> Candidate<'a> {
  pub fn into_detection(self, stamp: &FrameStamp) -> Detection {
    Detection {
      id: next_detection_id(),
      name: self.name.to_string(),
      confidence: self.confidence,
      captured_at: stamp.captured_at,
    }
  }
}

/// 对外发布的最终检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub id: String,
  pub name: String,
  pub confidence: f32,
  pub captured_at: DateTime<Utc>,
}

impl Display for Detection {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[{}] {} ({:.2}) @ {}",
      self.id,
      self.name,
      self.confidence,
      self.captured_at.format("%Y-%m-%d %H:%M:%S%.3f")
    )
  }
}
