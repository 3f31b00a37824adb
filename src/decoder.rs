// 该文件是 Shihuo （识货） 项目的一部分。
// src/decoder.rs - 输出张量解码
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use serde::Deserialize;
use tracing::{error, warn};

use crate::detection::{BoundingBox, Candidate};
use crate::labels::LabelTable;
use crate::model::{RawOutput, TensorShape, TensorShapeError};

/// 模型输出的属性布局。
///
/// 两种常见布局按属性行数区分：带目标置信度的布局为
/// `[cx, cy, w, h, obj, 类别...]`，不带的为 `[cx, cy, w, h, 类别...]`。
/// `Auto` 在行数能对上类别数时于加载期确定布局，否则逐槽位
/// 双布局求值并取置信度较高者。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
  #[default]
  Auto,
  WithObjectness,
  ClassesOnly,
}

impl OutputFormat {
  /// 按属性行数与类别数确定布局，无法确定时保持 `Auto`
  pub fn resolve(self, attributes: usize, num_classes: usize) -> OutputFormat {
    match self {
      OutputFormat::Auto if attributes == num_classes + 5 => OutputFormat::WithObjectness,
      OutputFormat::Auto if attributes == num_classes + 4 => OutputFormat::ClassesOnly,
      other => other,
    }
  }
}

/// 将模型输出张量展开为候选检测序列
#[derive(Debug, Clone)]
pub struct TensorDecoder {
  input_width: u32,
  input_height: u32,
  num_classes: usize,
  format: OutputFormat,
}

impl TensorDecoder {
  pub fn new(input_width: u32, input_height: u32, num_classes: usize, format: OutputFormat) -> Self {
    Self {
      input_width,
      input_height,
      num_classes,
      format,
    }
  }

  /// 校验模型声明的输出形状能否按当前布局解码
  pub fn check_shape(&self, shape: TensorShape) -> Result<(), TensorShapeError> {
    let expected = match self.format {
      OutputFormat::WithObjectness => self.num_classes + 5,
      OutputFormat::ClassesOnly => self.num_classes + 4,
      OutputFormat::Auto => {
        if shape.attributes < 5 {
          let msg = format!(
            "输出张量属性数不足: 实际 {}, 至少需要 5 (4 框 + 1 分数)",
            shape.attributes
          );
          error!("{}", msg);
          return Err(TensorShapeError::ShapeMismatch {
            expected: TensorShape::new(self.num_classes + 4, shape.slots),
            actual: shape,
          });
        }
        if shape.attributes != self.num_classes + 4 && shape.attributes != self.num_classes + 5 {
          warn!(
            "输出张量属性数 {} 与类别数 {} 不对应, 将逐槽位判断布局",
            shape.attributes, self.num_classes
          );
        }
        return Ok(());
      }
    };
    if shape.attributes != expected {
      error!(
        "输出张量形状不匹配: 期望 {}x{}, 实际 {}",
        expected, shape.slots, shape
      );
      return Err(TensorShapeError::ShapeMismatch {
        expected: TensorShape::new(expected, shape.slots),
        actual: shape,
      });
    }
    Ok(())
  }

  /// 惰性解码：逐槽位还原类别与像素坐标框。
  ///
  /// 归一化坐标先乘模型输入尺寸，再按帧与输入的比例缩放到帧空间，
  /// 框会被裁剪到帧边界内。类别编号超出标签表的槽位被丢弃。
  pub fn decode<'a>(
    &self,
    output: &'a RawOutput,
    labels: &'a LabelTable,
    frame_width: u32,
    frame_height: u32,
  ) -> impl Iterator<Item = Candidate<'a>> + 'a {
    let shape = output.shape();
    let format = self.format.resolve(shape.attributes, self.num_classes);
    let scale_x = frame_width as f32 / self.input_width as f32;
    let scale_y = frame_height as f32 / self.input_height as f32;
    let input_w = self.input_width as f32;
    let input_h = self.input_height as f32;
    let frame_w = frame_width as f32;
    let frame_h = frame_height as f32;
    (0..shape.slots).filter_map(move |slot| {
      let (class_id, confidence) = score_slot(output, slot, format)?;
      let name = labels.name(class_id)?;
      let cx = output.at(0, slot) * input_w * scale_x;
      let cy = output.at(1, slot) * input_h * scale_y;
      let w = output.at(2, slot) * input_w * scale_x;
      let h = output.at(3, slot) * input_h * scale_y;
      Some(Candidate {
        class_id,
        name,
        confidence,
        bbox: BoundingBox::from_center(cx, cy, w, h, frame_w, frame_h),
      })
    })
  }
}

/// 从 `first_row` 起在类别行中取最高分，返回 (类别编号, 分数)
fn best_class(output: &RawOutput, slot: usize, first_row: usize) -> Option<(usize, f32)> {
  let attributes = output.shape().attributes;
  let mut best: Option<(usize, f32)> = None;
  for row in first_row..attributes {
    let score = output.at(row, slot);
    match best {
      Some((_, s)) if s >= score => {}
      _ => best = Some((row - first_row, score)),
    }
  }
  best
}

fn score_slot(output: &RawOutput, slot: usize, format: OutputFormat) -> Option<(usize, f32)> {
  let attributes = output.shape().attributes;
  match format {
    OutputFormat::WithObjectness => {
      if attributes < 5 {
        return None;
      }
      let objectness = output.at(4, slot);
      best_class(output, slot, 5).map(|(id, score)| (id, objectness * score))
    }
    OutputFormat::ClassesOnly => best_class(output, slot, 4),
    OutputFormat::Auto => {
      let with_objectness = if attributes >= 5 {
        let objectness = output.at(4, slot);
        best_class(output, slot, 5).map(|(id, score)| (id, objectness * score))
      } else {
        None
      };
      let classes_only = best_class(output, slot, 4);
      match (with_objectness, classes_only) {
        (Some((id_a, conf_a)), Some((id_b, conf_b))) => {
          if conf_a > conf_b {
            Some((id_a, conf_a))
          } else {
            Some((id_b, conf_b))
          }
        }
        (a, b) => a.or(b),
      }
    }
  }
}
