// 该文件是 Shihuo （识货） 项目的一部分。
// src/model.rs - 推理模型接口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt;

use thiserror::Error;

use crate::frame::NormalizedFrame;

/// 输出张量形状：属性数 x 候选槽数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
  pub attributes: usize,
  pub slots: usize,
}

impl TensorShape {
  pub fn new(attributes: usize, slots: usize) -> Self {
    Self { attributes, slots }
  }

  pub fn len(&self) -> usize {
    self.attributes * self.slots
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.attributes, self.slots)
  }
}

#[derive(Error, Debug)]
pub enum TensorShapeError {
  #[error("输出缓冲区大小不匹配: 形状 {shape} 需要 {expected} 个元素, 实际 {actual} 个")]
  BufferSizeMismatch {
    shape: TensorShape,
    expected: usize,
    actual: usize,
  },
  #[error("输出形状不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
}

/// 推理引擎产出的原始输出张量，构造后不可变
#[derive(Debug, Clone)]
pub struct RawOutput {
  data: Box<[f32]>,
  shape: TensorShape,
}

impl RawOutput {
  pub fn new(data: Vec<f32>, shape: TensorShape) -> Result<Self, TensorShapeError> {
    if data.len() != shape.len() {
      return Err(TensorShapeError::BufferSizeMismatch {
        shape,
        expected: shape.len(),
        actual: data.len(),
      });
    }
    Ok(Self {
      data: data.into_boxed_slice(),
      shape,
    })
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  /// 按 属性 x 槽位 取值，属性为行、槽位为列
  #[inline]
  pub fn at(&self, attribute: usize, slot: usize) -> f32 {
    self.data[attribute * self.shape.slots + slot]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

/// 推理引擎抽象。引擎在加载时声明固定的输入尺寸和输出形状，
/// 每帧同步推理一次。
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 引擎声明的输入尺寸 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  /// 引擎声明的输出形状
  fn output_shape(&self) -> TensorShape;

  fn infer(&mut self, input: &NormalizedFrame) -> Result<RawOutput, Self::Error>;
}

/// 推理会话构建器。恢复流程会用它重建会话，所以与会话分离。
pub trait ModelBuilder {
  type Model: Model;
  type Error: std::error::Error + Send + Sync + 'static;

  fn build(&self) -> Result<Self::Model, Self::Error>;
}

#[cfg(feature = "model_replay")]
mod replay;
#[cfg(feature = "model_replay")]
pub use self::replay::{ReplayModel, ReplayModelBuilder, ReplayModelError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_raw_output_indexing() {
    // 2 属性 x 3 槽: 第一行 [1,2,3], 第二行 [4,5,6]
    let raw = RawOutput::new(
      vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
      TensorShape::new(2, 3),
    )
    .unwrap();

    assert_eq!(raw.at(0, 0), 1.0);
    assert_eq!(raw.at(0, 2), 3.0);
    assert_eq!(raw.at(1, 0), 4.0);
    assert_eq!(raw.at(1, 2), 6.0);
  }

  #[test]
  fn test_raw_output_buffer_mismatch() {
    let err = RawOutput::new(vec![0.0; 5], TensorShape::new(2, 3)).unwrap_err();
    match err {
      TensorShapeError::BufferSizeMismatch {
        expected, actual, ..
      } => {
        assert_eq!(expected, 6);
        assert_eq!(actual, 5);
      }
      other => panic!("预期 BufferSizeMismatch, 实际 {other:?}"),
    }
  }

  #[test]
  fn test_tensor_shape_display() {
    assert_eq!(TensorShape::new(11, 8400).to_string(), "11x8400");
  }
}
