// 该文件是 Shihuo （识货） 项目的一部分。
// src/labels.rs - 类别标签表
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

/// 内置类别名称，标签文件缺失时使用
pub const DEFAULT_LABELS: [&str; 7] = [
  "7up",
  "Cheetos",
  "Manzanita Sol",
  "Mirinda",
  "Pepsi",
  "Pepsi Black",
  "Squirt",
];

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件读取失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("标签文件为空")]
  Empty,
}

/// 类别标签表，行序即类别编号
#[derive(Debug, Clone)]
pub struct LabelTable {
  names: Box<[String]>,
}

impl LabelTable {
  /// 从文本文件加载，一行一个类别，空行忽略
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let names: Vec<String> = content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(str::to_string)
      .collect();

    if names.is_empty() {
      return Err(LabelError::Empty);
    }

    debug!("加载 {} 个类别标签", names.len());
    Ok(Self {
      names: names.into_boxed_slice(),
    })
  }

  /// 加载标签文件，失败时退回内置列表
  pub fn from_file_or_default(path: Option<&Path>) -> Self {
    match path {
      Some(path) => match Self::from_file(path) {
        Ok(table) => table,
        Err(e) => {
          warn!("无法加载标签文件 {}: {}, 使用内置类别", path.display(), e);
          Self::default()
        }
      },
      None => Self::default(),
    }
  }

  pub fn name(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}

impl Default for LabelTable {
  fn default() -> Self {
    Self {
      names: DEFAULT_LABELS
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .into_boxed_slice(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_labels() {
    let table = LabelTable::default();
    assert_eq!(table.len(), 7);
    assert_eq!(table.name(0), Some("7up"));
    assert_eq!(table.name(5), Some("Pepsi Black"));
    assert_eq!(table.name(7), None);
  }

  #[test]
  fn test_from_file_skips_blank_lines() {
    let mut path = std::env::temp_dir();
    path.push(format!("shihuo-labels-{}.txt", std::process::id()));
    std::fs::write(&path, "Pepsi\n\n  \nCheetos\n").unwrap();

    let table = LabelTable::from_file(&path).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.name(0), Some("Pepsi"));
    assert_eq!(table.name(1), Some("Cheetos"));

    std::fs::remove_file(path).unwrap();
  }

  #[test]
  fn test_missing_file_falls_back() {
    let table = LabelTable::from_file_or_default(Some(Path::new("/不存在/labels.txt")));
    assert_eq!(table.len(), DEFAULT_LABELS.len());
  }

  #[test]
  fn test_empty_file_is_error() {
    let mut path = std::env::temp_dir();
    path.push(format!("shihuo-labels-empty-{}.txt", std::process::id()));
    std::fs::write(&path, "\n\n").unwrap();

    assert!(matches!(LabelTable::from_file(&path), Err(LabelError::Empty)));

    std::fs::remove_file(path).unwrap();
  }
}
