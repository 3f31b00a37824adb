// 该文件是 Shihuo （识货） 项目的一部分。
// src/model/replay.rs - 回放模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::frame::NormalizedFrame;
use crate::model::{Model, ModelBuilder, RawOutput, TensorShape, TensorShapeError};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("回放张量读取失败: {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("回放张量 {path} 大小错误: 期望 {expected} 个 f32, 实际 {actual} 个")]
  TensorSizeMismatch {
    path: PathBuf,
    expected: usize,
    actual: usize,
  },
  #[error("没有回放张量文件")]
  NoTensors,
  #[error(transparent)]
  Shape(#[from] TensorShapeError),
}

/// 回放模型构建器：从 f32 小端 .bin 文件提供输出张量
pub struct ReplayModelBuilder {
  shape: TensorShape,
  input_size: (u32, u32),
  paths: Vec<PathBuf>,
}

impl ReplayModelBuilder {
  pub fn new(shape: TensorShape, input_size: (u32, u32)) -> Self {
    Self {
      shape,
      input_size,
      paths: Vec::new(),
    }
  }

  pub fn with_tensor_file(mut self, path: impl Into<PathBuf>) -> Self {
    self.paths.push(path.into());
    self
  }

  /// 扫描目录下的 *.bin 文件，按文件名排序
  pub fn with_tensor_dir(mut self, dir: impl AsRef<Path>) -> Result<Self, ReplayModelError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|source| ReplayModelError::Io {
      path: dir.to_path_buf(),
      source,
    })?;

    let mut found = Vec::new();
    for entry in entries {
      let entry = entry.map_err(|source| ReplayModelError::Io {
        path: dir.to_path_buf(),
        source,
      })?;
      let path = entry.path();
      if path.extension().is_some_and(|ext| ext == "bin") {
        found.push(path);
      }
    }
    found.sort();

    info!("在 {} 下找到 {} 个回放张量文件", dir.display(), found.len());
    self.paths.extend(found);
    Ok(self)
  }

  fn read_tensor(&self, path: &Path) -> Result<Box<[f32]>, ReplayModelError> {
    let bytes = std::fs::read(path).map_err(|source| ReplayModelError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    debug!("张量文件 {}: {} 字节", path.display(), bytes.len());

    let values: Vec<f32> = bytes
      .chunks_exact(4)
      .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
      .collect();

    if values.len() != self.shape.len() || bytes.len() % 4 != 0 {
      return Err(ReplayModelError::TensorSizeMismatch {
        path: path.to_path_buf(),
        expected: self.shape.len(),
        actual: values.len(),
      });
    }
    Ok(values.into_boxed_slice())
  }
}

impl ModelBuilder for ReplayModelBuilder {
  type Model = ReplayModel;
  type Error = ReplayModelError;

  fn build(&self) -> Result<ReplayModel, ReplayModelError> {
    if self.paths.is_empty() {
      return Err(ReplayModelError::NoTensors);
    }

    info!("加载 {} 个回放张量, 形状 {}", self.paths.len(), self.shape);
    let mut tensors = Vec::with_capacity(self.paths.len());
    for path in &self.paths {
      tensors.push(self.read_tensor(path)?);
    }

    Ok(ReplayModel {
      tensors,
      cursor: 0,
      shape: self.shape,
      input_size: self.input_size,
    })
  }
}

/// 按顺序循环回放预先录制的输出张量，用于无 NPU 环境下的演示与测试
#[derive(Debug)]
pub struct ReplayModel {
  tensors: Vec<Box<[f32]>>,
  cursor: usize,
  shape: TensorShape,
  input_size: (u32, u32),
}

impl Model for ReplayModel {
  type Error = ReplayModelError;

  fn input_size(&self) -> (u32, u32) {
    self.input_size
  }

  fn output_shape(&self) -> TensorShape {
    self.shape
  }

  fn infer(&mut self, _input: &NormalizedFrame) -> Result<RawOutput, ReplayModelError> {
    let data = self.tensors[self.cursor].to_vec();
    self.cursor = (self.cursor + 1) % self.tensors.len();
    Ok(RawOutput::new(data, self.shape)?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_tensor(name: &str, values: &[f32]) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("shihuo-replay-{}-{}.bin", std::process::id(), name));
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    std::fs::write(&path, bytes).unwrap();
    path
  }

  #[test]
  fn test_replay_cycles_tensors() {
    let shape = TensorShape::new(2, 2);
    let p1 = write_tensor("cycle-a", &[1.0, 1.0, 1.0, 1.0]);
    let p2 = write_tensor("cycle-b", &[2.0, 2.0, 2.0, 2.0]);

    let mut model = ReplayModelBuilder::new(shape, (4, 4))
      .with_tensor_file(&p1)
      .with_tensor_file(&p2)
      .build()
      .unwrap();

    let input = NormalizedFrame::zeroed(4, 4);
    assert_eq!(model.infer(&input).unwrap().at(0, 0), 1.0);
    assert_eq!(model.infer(&input).unwrap().at(0, 0), 2.0);
    assert_eq!(model.infer(&input).unwrap().at(0, 0), 1.0);

    std::fs::remove_file(p1).unwrap();
    std::fs::remove_file(p2).unwrap();
  }

  #[test]
  fn test_replay_rejects_short_tensor() {
    let shape = TensorShape::new(2, 2);
    let path = write_tensor("short", &[1.0, 2.0]);

    let err = ReplayModelBuilder::new(shape, (4, 4))
      .with_tensor_file(&path)
      .build()
      .unwrap_err();
    match err {
      ReplayModelError::TensorSizeMismatch {
        expected, actual, ..
      } => {
        assert_eq!(expected, 4);
        assert_eq!(actual, 2);
      }
      other => panic!("预期 TensorSizeMismatch, 实际 {other:?}"),
    }

    std::fs::remove_file(path).unwrap();
  }

  #[test]
  fn test_replay_requires_tensors() {
    let err = ReplayModelBuilder::new(TensorShape::new(1, 1), (4, 4))
      .build()
      .unwrap_err();
    assert!(matches!(err, ReplayModelError::NoTensors));
  }
}
