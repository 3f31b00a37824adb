// 该文件是 Shihuo （识货） 项目的一部分。
// src/pipeline.rs - 检测流水线
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationTable;
use crate::config::{PipelineConfig, WorkerConfig};
use crate::decoder::TensorDecoder;
use crate::detection::{Candidate, Detection};
use crate::frame::{CameraFrame, FrameStamp, NormalizedFrame};
use crate::labels::LabelTable;
use crate::model::{Model, RawOutput, TensorShape, TensorShapeError};
use crate::nms::NonMaxSuppressor;
use crate::preprocess::{PreprocessError, Preprocessor};
use crate::stabilizer::{StabilityState, TemporalStabilizer};
use crate::stats::DetectionStats;
use crate::throttle::{dedupe_within_frame, ClassCooldown, EmissionThrottle};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("预处理失败: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("张量形状错误: {0}")]
  Shape(#[from] TensorShapeError),
  #[error("推理失败 (尝试 {attempts} 次后): {source}")]
  Inference {
    attempts: u32,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

impl PipelineError {
  pub fn inference(attempts: u32, source: impl std::error::Error + Send + Sync + 'static) -> Self {
    PipelineError::Inference {
      attempts,
      source: Box::new(source),
    }
  }
}

/// 初始化后不再变化的流水线参数快照，供诊断输出使用
#[derive(Debug, Clone)]
pub struct PipelineInfo {
  pub input_width: u32,
  pub input_height: u32,
  pub output_shape: TensorShape,
  pub labels: Vec<String>,
  pub default_threshold: f32,
  pub stability_window_ms: u64,
  pub stability_min_count: usize,
}

/// 单帧检测流水线。
///
/// 持有推理会话与全部决策阶段的状态，顺序执行
/// 预处理、推理、解码、校准、抑制、稳定、去重、节流与冷却。
/// 本身不涉及线程，由上层的扫描器放入工作线程驱动。
pub struct DetectionPipeline<M: Model> {
  model: M,
  labels: LabelTable,
  preprocessor: Preprocessor,
  decoder: TensorDecoder,
  calibration: CalibrationTable,
  nms: NonMaxSuppressor,
  stabilizer: TemporalStabilizer,
  throttle: EmissionThrottle,
  cooldown: ClassCooldown,
  stats: Arc<Mutex<DetectionStats>>,
  info: PipelineInfo,
  min_confidence: f32,
  worker: WorkerConfig,
}

impl<M: Model> DetectionPipeline<M> {
  /// 校验引擎声明的形状、跑一次空帧自检，然后装配各阶段。
  /// 形状不匹配导致初始化失败；自检失败只告警。
  pub fn new(mut model: M, labels: LabelTable, config: &PipelineConfig) -> Result<Self, PipelineError> {
    let (input_width, input_height) = model.input_size();
    let output_shape = model.output_shape();
    let decoder = TensorDecoder::new(
      input_width,
      input_height,
      labels.len(),
      config.decode.output_format,
    );
    decoder.check_shape(output_shape)?;
    info!(
      "推理引擎就绪: 输入 {}x{}, 输出 {}, 类别 {}",
      input_width,
      input_height,
      output_shape,
      labels.len()
    );

    match model.infer(&NormalizedFrame::zeroed(input_width, input_height)) {
      Ok(_) => debug!("空帧自检通过"),
      Err(e) => warn!("空帧自检失败: {}", e),
    }

    let info = PipelineInfo {
      input_width,
      input_height,
      output_shape,
      labels: labels.names().map(str::to_string).collect(),
      default_threshold: config.calibration.default_threshold,
      stability_window_ms: config.stability.window_ms,
      stability_min_count: config.stability.min_count,
    };

    Ok(Self {
      preprocessor: Preprocessor::new(input_width, input_height),
      decoder,
      calibration: config.calibration.clone(),
      nms: NonMaxSuppressor::new(config.decode.iou_threshold),
      stabilizer: TemporalStabilizer::new(config.stability.window(), config.stability.min_count),
      throttle: EmissionThrottle::new(config.throttle.min_interval()),
      cooldown: ClassCooldown::new(config.throttle.cooldown()),
      stats: Arc::new(Mutex::new(DetectionStats::default())),
      info,
      min_confidence: config.decode.min_confidence,
      worker: config.worker.clone(),
      model,
      labels,
    })
  }

  pub fn info(&self) -> &PipelineInfo {
    &self.info
  }

  /// 统计的共享句柄，扫描器用它在线程外读取
  pub fn stats(&self) -> Arc<Mutex<DetectionStats>> {
    Arc::clone(&self.stats)
  }

  /// 处理一帧。返回 `None` 表示本帧没有要上报的检测
  /// （无候选、被节流或全部处于冷却中）。
  /// 稳定、节流与冷却窗口均以帧的采集时刻（单调时钟）为基准。
  pub fn process_frame(
    &mut self,
    frame: &CameraFrame,
    stamp: FrameStamp,
  ) -> Result<Option<Vec<Detection>>, PipelineError> {
    let input = self.preprocessor.run(frame)?;
    let output = self.infer_with_retry(&input)?;
    let now = stamp.monotonic;

    let decoder = &self.decoder;
    let labels = &self.labels;
    let calibration = &self.calibration;
    let stabilizer = &mut self.stabilizer;
    let throttle = &mut self.throttle;
    let cooldown = &mut self.cooldown;

    let calibrated: Vec<Candidate<'_>> = {
      let mut stats = self.stats.lock().unwrap();
      decoder
        .decode(&output, labels, frame.width(), frame.height())
        .filter_map(|c| calibration.calibrate(c, &mut stats))
        .collect()
    };
    let n_calibrated = calibrated.len();

    let suppressed = self.nms.suppress(calibrated);
    let floored: Vec<Candidate<'_>> = suppressed
      .into_iter()
      .filter(|c| c.confidence >= self.min_confidence)
      .collect();
    let n_suppressed = floored.len();

    let stable: Vec<Candidate<'_>> = floored
      .into_iter()
      .filter(|c| stabilizer.observe(c.name, now) == StabilityState::Stable)
      .collect();
    let n_stable = stable.len();

    let unique = dedupe_within_frame(stable);
    debug!(
      "帧处理完成: 采集后 {:?}, 校准 {} -> 抑制 {} -> 稳定 {} -> 去重 {}",
      stamp.monotonic.elapsed(),
      n_calibrated,
      n_suppressed,
      n_stable,
      unique.len()
    );

    if !throttle.should_flush(unique.len(), now) {
      return Ok(None);
    }

    let batch: Vec<Detection> = unique
      .into_iter()
      .filter(|c| cooldown.admit(c.name, now))
      .map(|c| c.into_detection(&stamp))
      .collect();
    if batch.is_empty() {
      return Ok(None);
    }
    Ok(Some(batch))
  }

  /// 推理失败时在帧内重试，退避随次数递增；超时只告警不重试
  fn infer_with_retry(&mut self, input: &NormalizedFrame) -> Result<RawOutput, PipelineError> {
    let mut attempt = 0u32;
    loop {
      attempt += 1;
      let started = Instant::now();
      match self.model.infer(input) {
        Ok(output) => {
          let elapsed = started.elapsed();
          if elapsed > self.worker.latency_budget() {
            warn!("推理耗时 {:?} 超出预算 {:?}", elapsed, self.worker.latency_budget());
          }
          return Ok(output);
        }
        Err(e) if attempt < self.worker.max_retries => {
          let backoff = self.worker.retry_backoff(attempt);
          warn!("推理失败 (第 {} 次): {}, {:?} 后重试", attempt, e, backoff);
          thread::sleep(backoff);
        }
        Err(e) => return Err(PipelineError::inference(attempt, e)),
      }
    }
  }

  /// 恢复流程用重建好的会话替换当前会话，重新校验形状并自检
  pub fn replace_model(&mut self, mut model: M) -> Result<(), PipelineError> {
    self.decoder.check_shape(model.output_shape())?;
    match model.infer(&NormalizedFrame::zeroed(
      self.info.input_width,
      self.info.input_height,
    )) {
      Ok(_) => debug!("新会话空帧自检通过"),
      Err(e) => warn!("新会话空帧自检失败: {}", e),
    }
    self.model = model;
    info!("推理会话已更换");
    Ok(())
  }

  /// 清空检测统计与稳定历史
  pub fn reset_stats(&mut self) {
    self.stats.lock().unwrap().reset();
    self.stabilizer.reset();
    info!("检测统计与稳定历史已重置");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::VecDeque;
  use std::time::Duration;

  #[derive(Error, Debug)]
  #[error("模拟推理失败")]
  struct FakeError;

  /// 按脚本依次返回预设输出的内存模型
  struct ScriptedModel {
    shape: TensorShape,
    outputs: VecDeque<Result<Vec<f32>, FakeError>>,
  }

  impl ScriptedModel {
    fn new(shape: TensorShape, outputs: Vec<Result<Vec<f32>, FakeError>>) -> Self {
      Self {
        shape,
        outputs: outputs.into(),
      }
    }
  }

  impl Model for ScriptedModel {
    type Error = FakeError;

    fn input_size(&self) -> (u32, u32) {
      (640, 640)
    }

    fn output_shape(&self) -> TensorShape {
      self.shape
    }

    fn infer(&mut self, _input: &NormalizedFrame) -> Result<RawOutput, FakeError> {
      match self.outputs.pop_front() {
        Some(Ok(data)) => Ok(RawOutput::new(data, self.shape).unwrap()),
        Some(Err(e)) => Err(e),
        None => Err(FakeError),
      }
    }
  }

  /// 11 行 1 槽位: 一个归一化中心框, Pepsi (类别 4) 得分 0.72
  fn pepsi_tensor() -> Vec<f32> {
    vec![0.5, 0.5, 0.2, 0.2, 0.0, 0.0, 0.0, 0.0, 0.72, 0.0, 0.0]
  }

  fn blank_tensor() -> Vec<f32> {
    vec![0.0; 11]
  }

  fn frame() -> CameraFrame {
    CameraFrame::from_raw(64, 48, vec![128; 64 * 48 * 3]).unwrap()
  }

  fn stamp_at(monotonic: Instant) -> FrameStamp {
    FrameStamp {
      captured_at: chrono::Utc::now(),
      monotonic,
    }
  }

  fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.worker.retry_backoff_ms = 1;
    config
  }

  fn pipeline_with(
    outputs: Vec<Result<Vec<f32>, FakeError>>,
    config: &PipelineConfig,
  ) -> DetectionPipeline<ScriptedModel> {
    // 首个输出被初始化自检消耗
    let model = ScriptedModel::new(TensorShape::new(11, 1), outputs);
    DetectionPipeline::new(model, LabelTable::default(), config).unwrap()
  }

  #[test]
  fn test_accepted_frame_emits_batch() {
    let config = fast_config();
    let mut pipeline = pipeline_with(vec![Ok(blank_tensor()), Ok(pepsi_tensor())], &config);

    let batch = pipeline
      .process_frame(&frame(), FrameStamp::now())
      .unwrap()
      .unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].name, "Pepsi");
    assert!((batch[0].confidence - 0.72).abs() < 1e-5);
    assert_eq!(pipeline.stats().lock().unwrap().count_for("Pepsi"), 1);
  }

  #[test]
  fn test_back_to_back_frames_throttled() {
    let config = fast_config();
    let mut pipeline = pipeline_with(
      vec![Ok(blank_tensor()), Ok(pepsi_tensor()), Ok(pepsi_tensor())],
      &config,
    );

    assert!(pipeline
      .process_frame(&frame(), FrameStamp::now())
      .unwrap()
      .is_some());
    // 距首次上报不足最小间隔, 第二帧被节流
    assert!(pipeline
      .process_frame(&frame(), FrameStamp::now())
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_retry_recovers_within_frame() {
    let config = fast_config();
    let mut pipeline = pipeline_with(
      vec![Ok(blank_tensor()), Err(FakeError), Ok(pepsi_tensor())],
      &config,
    );

    let batch = pipeline.process_frame(&frame(), FrameStamp::now()).unwrap();
    assert!(batch.is_some());
  }

  #[test]
  fn test_retries_exhausted_propagates() {
    let config = fast_config();
    let mut pipeline = pipeline_with(
      vec![Ok(blank_tensor()), Err(FakeError), Err(FakeError), Err(FakeError)],
      &config,
    );

    let err = pipeline
      .process_frame(&frame(), FrameStamp::now())
      .unwrap_err();
    match err {
      PipelineError::Inference { attempts, .. } => assert_eq!(attempts, 3),
      other => panic!("意外错误: {other}"),
    }
  }

  #[test]
  fn test_confidence_floor_after_suppression() {
    let mut config = fast_config();
    config
      .calibration
      .entries
      .get_mut("Pepsi")
      .unwrap()
      .threshold = 0.01;
    // 0.10 能过校准阈值但低于抑制后下限
    let mut weak = pepsi_tensor();
    weak[8] = 0.10;
    let mut pipeline = pipeline_with(vec![Ok(blank_tensor()), Ok(weak)], &config);

    assert!(pipeline
      .process_frame(&frame(), FrameStamp::now())
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_shape_mismatch_fails_init() {
    let model = ScriptedModel::new(TensorShape::new(3, 1), vec![]);
    let result = DetectionPipeline::new(model, LabelTable::default(), &PipelineConfig::default());
    assert!(matches!(result, Err(PipelineError::Shape(_))));
  }

  #[test]
  fn test_windows_follow_capture_time() {
    let mut config = fast_config();
    config.stability.min_count = 2;
    let mut pipeline = pipeline_with(
      vec![
        Ok(blank_tensor()),
        Ok(pepsi_tensor()),
        Ok(pepsi_tensor()),
        Ok(pepsi_tensor()),
      ],
      &config,
    );

    let t0 = Instant::now();
    // 前两帧的采集间隔超出稳定窗口, 即使处理是背靠背完成的
    let early = stamp_at(t0 - Duration::from_millis(700));
    assert!(pipeline.process_frame(&frame(), early).unwrap().is_none());
    assert!(pipeline
      .process_frame(&frame(), stamp_at(t0))
      .unwrap()
      .is_none());
    // 第三帧与第二帧采集于同一时刻, 凑足窗口内两次目击
    assert!(pipeline
      .process_frame(&frame(), stamp_at(t0))
      .unwrap()
      .is_some());
  }

  #[test]
  fn test_reset_stats() {
    let config = fast_config();
    let mut pipeline = pipeline_with(vec![Ok(blank_tensor()), Ok(pepsi_tensor())], &config);

    pipeline
      .process_frame(&frame(), FrameStamp::now())
      .unwrap();
    assert_eq!(pipeline.stats().lock().unwrap().total(), 1);

    pipeline.reset_stats();
    assert_eq!(pipeline.stats().lock().unwrap().total(), 0);
  }
}
