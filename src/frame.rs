// 该文件是 Shihuo （识货） 项目的一部分。
// src/frame.rs - 帧与输入张量定义
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

use std::time::Instant;

use chrono::{DateTime, Utc};
use image::RgbImage;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 采集到的相机帧，分辨率任意
#[derive(Debug, Clone)]
pub struct CameraFrame {
  image: RgbImage,
}

impl CameraFrame {
  /// 由原始 RGB 字节构造，长度必须为 width * height * 3
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    // 长度已校验，from_raw 不会失败
    let image = RgbImage::from_raw(width, height, data).ok_or(FrameError::LengthMismatch {
      expected,
      actual: 0,
    })?;
    Ok(Self { image })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }
}

impl From<RgbImage> for CameraFrame {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}

/// 归一化后的模型输入张量，NHWC 排列，取值范围 [0, 1]
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
  data: Box<[f32]>,
  width: u32,
  height: u32,
}

impl NormalizedFrame {
  pub fn new(width: u32, height: u32, data: Vec<f32>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      data: data.into_boxed_slice(),
      width,
      height,
    })
  }

  /// 全零张量，用于引擎自检
  pub fn zeroed(width: u32, height: u32) -> Self {
    let size = RGB_CHANNELS * width as usize * height as usize;
    Self {
      data: vec![0.0; size].into_boxed_slice(),
      width,
      height,
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[f32] {
    &self.data
  }
}

/// 帧时间戳：对外输出用采集时刻的墙钟时间，流水线内部只用单调时钟
#[derive(Debug, Clone, Copy)]
pub struct FrameStamp {
  /// 采集时刻（墙钟）
  pub captured_at: DateTime<Utc>,
  /// 采集时刻（单调时钟）
  pub monotonic: Instant,
}

impl FrameStamp {
  pub fn now() -> Self {
    Self {
      captured_at: Utc::now(),
      monotonic: Instant::now(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_camera_frame_from_raw() {
    let frame = CameraFrame::from_raw(4, 2, vec![0u8; 4 * 2 * 3]).unwrap();
    assert_eq!(frame.width(), 4);
    assert_eq!(frame.height(), 2);
  }

  #[test]
  fn test_camera_frame_length_mismatch() {
    let err = CameraFrame::from_raw(4, 2, vec![0u8; 5]).unwrap_err();
    match err {
      FrameError::LengthMismatch { expected, actual } => {
        assert_eq!(expected, 24);
        assert_eq!(actual, 5);
      }
    }
  }

  #[test]
  fn test_normalized_frame_new() {
    let frame = NormalizedFrame::new(2, 2, vec![0.5; 12]).unwrap();
    assert_eq!(frame.as_nhwc().len(), 12);
    assert_eq!(frame.channels(), 3);
  }

  #[test]
  fn test_normalized_frame_zeroed() {
    let frame = NormalizedFrame::zeroed(3, 3);
    assert_eq!(frame.as_nhwc().len(), 27);
    assert!(frame.as_nhwc().iter().all(|&v| v == 0.0));
  }
}
