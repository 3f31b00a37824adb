// 该文件是 Shihuo （识货） 项目的一部分。
// src/preprocess.rs - 图像预处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::debug;

use crate::frame::{CameraFrame, NormalizedFrame};

#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("无效图像尺寸: {width}x{height}")]
  InvalidImage { width: u32, height: u32 },
  #[error("图像缩放缓冲区分配失败: {width}x{height}")]
  ResourceExhaustion { width: u32, height: u32 },
}

/// 把任意分辨率的相机帧缩放成模型输入张量
pub struct Preprocessor {
  input_width: u32,
  input_height: u32,
}

impl Preprocessor {
  pub fn new(input_width: u32, input_height: u32) -> Self {
    Self {
      input_width,
      input_height,
    }
  }

  pub fn input_size(&self) -> (u32, u32) {
    (self.input_width, self.input_height)
  }

  /// 缩放到模型输入尺寸并归一化到 [0, 1]
  pub fn run(&self, frame: &CameraFrame) -> Result<NormalizedFrame, PreprocessError> {
    if frame.width() == 0 || frame.height() == 0 {
      return Err(PreprocessError::InvalidImage {
        width: frame.width(),
        height: frame.height(),
      });
    }

    let elements = (self.input_width as usize)
      .checked_mul(self.input_height as usize)
      .and_then(|n| n.checked_mul(3))
      .ok_or(PreprocessError::ResourceExhaustion {
        width: self.input_width,
        height: self.input_height,
      })?;

    debug!(
      "预处理: {}x{} -> {}x{}",
      frame.width(),
      frame.height(),
      self.input_width,
      self.input_height
    );

    // 缩放到模型输入尺寸
    let resized = image::imageops::resize(
      frame.image(),
      self.input_width,
      self.input_height,
      image::imageops::FilterType::Triangle,
    );

    let mut data = Vec::with_capacity(elements);
    data.extend(resized.into_raw().into_iter().map(|v| v as f32 / 255.0));

    NormalizedFrame::new(self.input_width, self.input_height, data).map_err(|_| {
      PreprocessError::ResourceExhaustion {
        width: self.input_width,
        height: self.input_height,
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn test_preprocess_output_size() {
    let image = RgbImage::from_pixel(128, 96, image::Rgb([255, 0, 128]));
    let frame = CameraFrame::from(image);
    let pre = Preprocessor::new(64, 64);

    let tensor = pre.run(&frame).unwrap();
    assert_eq!(tensor.width(), 64);
    assert_eq!(tensor.height(), 64);
    assert_eq!(tensor.as_nhwc().len(), 64 * 64 * 3);
  }

  #[test]
  fn test_preprocess_normalizes_to_unit_range() {
    let image = RgbImage::from_pixel(32, 32, image::Rgb([255, 127, 0]));
    let frame = CameraFrame::from(image);
    let pre = Preprocessor::new(16, 16);

    let tensor = pre.run(&frame).unwrap();
    assert!(tensor.as_nhwc().iter().all(|&v| (0.0..=1.0).contains(&v)));
    // 纯色图像缩放后通道值不变
    assert!((tensor.as_nhwc()[0] - 1.0).abs() < 1e-6);
  }

  #[test]
  fn test_preprocess_rejects_empty_frame() {
    let frame = CameraFrame::from(RgbImage::new(0, 10));
    let pre = Preprocessor::new(64, 64);

    match pre.run(&frame) {
      Err(PreprocessError::InvalidImage { width, height }) => {
        assert_eq!(width, 0);
        assert_eq!(height, 10);
      }
      other => panic!("预期 InvalidImage, 实际 {:?}", other.map(|_| ())),
    }
  }
}
