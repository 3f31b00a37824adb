// 该文件是 Shihuo （识货） 项目的一部分。
// src/worker.rs - 扫描工作线程
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{PipelineConfig, WorkerConfig};
use crate::detection::Detection;
use crate::frame::{CameraFrame, FrameStamp};
use crate::labels::LabelTable;
use crate::model::ModelBuilder;
use crate::pipeline::{DetectionPipeline, PipelineError, PipelineInfo};
use crate::stats::DetectionStats;

#[derive(Error, Debug)]
pub enum ScannerError {
  #[error("推理引擎构建失败: {0}")]
  Build(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("流水线初始化失败: {0}")]
  Init(#[from] PipelineError),
  #[error("扫描器已关闭")]
  ShutDown,
  #[error("扫描器不可用")]
  Unavailable,
}

/// 扫描器的健康状态，可随时从句柄查询
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
  Running,
  /// 正在重建推理会话，期间到达的帧被丢弃
  Recovering,
  /// 会话重建多次失败，不再接收帧
  Unavailable,
  Stopped,
}

impl fmt::Display for HealthState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let text = match self {
      HealthState::Running => "运行中",
      HealthState::Recovering => "恢复中",
      HealthState::Unavailable => "不可用",
      HealthState::Stopped => "已停止",
    };
    f.write_str(text)
  }
}

/// 帧提交的结果。被丢弃的帧不会排队，也不会阻塞提交方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
  Accepted,
  /// 上一帧仍在处理中，或会话正在恢复
  Busy,
  /// 距上一次接收不足最小帧间隔
  Throttled,
}

#[derive(Clone)]
struct Shared {
  health: Arc<Mutex<HealthState>>,
  latest: Arc<Mutex<Option<Arc<Vec<Detection>>>>>,
  reset_requested: Arc<AtomicBool>,
}

/// 检测扫描器句柄。
///
/// 背后是一条独占推理会话的工作线程，帧经零容量通道交接，
/// 工作线程未就绪则当场丢弃。批次从通道送出，同时保留
/// 最近一批的快照供轮询。关闭或析构时回收线程与会话。
pub struct Scanner {
  frames_tx: Option<Sender<(CameraFrame, FrameStamp)>>,
  batches_rx: Receiver<Arc<Vec<Detection>>>,
  worker: Option<JoinHandle<()>>,
  shared: Shared,
  stats: Arc<Mutex<DetectionStats>>,
  info: PipelineInfo,
  interval: Duration,
  last_accept: Mutex<Option<Instant>>,
}

impl Scanner {
  /// 构建推理会话并启动工作线程
  pub fn spawn<B>(builder: B, labels: LabelTable, config: PipelineConfig) -> Result<Scanner, ScannerError>
  where
    B: ModelBuilder + Send + 'static,
    B::Model: Send + 'static,
  {
    let model = builder
      .build()
      .map_err(|e| ScannerError::Build(Box::new(e)))?;
    let pipeline = DetectionPipeline::new(model, labels, &config)?;
    let stats = pipeline.stats();
    let info = pipeline.info().clone();

    let shared = Shared {
      health: Arc::new(Mutex::new(HealthState::Running)),
      latest: Arc::new(Mutex::new(None)),
      reset_requested: Arc::new(AtomicBool::new(false)),
    };
    // 零容量交接通道: 只有工作线程正停在接收端时投递才会成功,
    // 上一帧仍在处理中的帧不会排队等待
    let (frames_tx, frames_rx) = bounded(0);
    let (batches_tx, batches_rx) = bounded(8);

    let thread_shared = shared.clone();
    let worker_config = config.worker.clone();
    let worker = thread::spawn(move || {
      run_worker(pipeline, builder, frames_rx, batches_tx, thread_shared, worker_config);
    });

    info!("扫描器已启动, 帧间隔 {} ms", config.worker.interval_ms);
    Ok(Scanner {
      frames_tx: Some(frames_tx),
      batches_rx,
      worker: Some(worker),
      shared,
      stats,
      info,
      interval: config.worker.interval(),
      last_accept: Mutex::new(None),
    })
  }

  /// 投递一帧。工作线程忙、会话恢复中或帧间隔未到时立即丢弃，绝不阻塞
  pub fn submit(&self, frame: CameraFrame) -> Result<SubmitOutcome, ScannerError> {
    let tx = self.frames_tx.as_ref().ok_or(ScannerError::ShutDown)?;
    match self.health() {
      HealthState::Unavailable => return Err(ScannerError::Unavailable),
      HealthState::Recovering => {
        debug!("会话恢复中, 丢弃当前帧");
        return Ok(SubmitOutcome::Busy);
      }
      _ => {}
    }
    let now = Instant::now();
    let mut last = self.last_accept.lock().unwrap();
    if let Some(prev) = *last {
      if now.duration_since(prev) < self.interval {
        return Ok(SubmitOutcome::Throttled);
      }
    }
    match tx.try_send((frame, FrameStamp::now())) {
      Ok(()) => {
        *last = Some(now);
        Ok(SubmitOutcome::Accepted)
      }
      Err(TrySendError::Full(_)) => Ok(SubmitOutcome::Busy),
      Err(TrySendError::Disconnected(_)) => Err(ScannerError::Unavailable),
    }
  }

  /// 批次接收端，可克隆给多个消费者
  pub fn batches(&self) -> Receiver<Arc<Vec<Detection>>> {
    self.batches_rx.clone()
  }

  /// 最近一次上报的批次快照
  pub fn latest_batch(&self) -> Option<Arc<Vec<Detection>>> {
    self.shared.latest.lock().unwrap().clone()
  }

  pub fn health(&self) -> HealthState {
    *self.shared.health.lock().unwrap()
  }

  pub fn stats_snapshot(&self) -> DetectionStats {
    self.stats.lock().unwrap().clone()
  }

  /// 清空统计与稳定历史。关闭后调用返回错误
  pub fn reset_stats(&self) -> Result<(), ScannerError> {
    if self.frames_tx.is_none() {
      return Err(ScannerError::ShutDown);
    }
    self.stats.lock().unwrap().reset();
    self.shared.reset_requested.store(true, Ordering::SeqCst);
    Ok(())
  }

  /// 文本形式的运行诊断
  pub fn diagnostics(&self) -> String {
    let mut out = String::new();
    let initialized = self.frames_tx.is_some();
    let _ = writeln!(out, "检测流水线诊断");
    let _ = writeln!(out, "  已初始化: {}", if initialized { "是" } else { "否" });
    let _ = writeln!(out, "  健康状态: {}", self.health());
    let _ = writeln!(out, "  模型输入: {}x{}", self.info.input_width, self.info.input_height);
    let _ = writeln!(out, "  输出形状: {}", self.info.output_shape);
    let _ = writeln!(
      out,
      "  标签 ({}): {}",
      self.info.labels.len(),
      self.info.labels.join(", ")
    );
    let _ = writeln!(out, "  默认阈值: {:.2}", self.info.default_threshold);
    let _ = writeln!(
      out,
      "  稳定窗口: {} ms, 最少目击 {}",
      self.info.stability_window_ms, self.info.stability_min_count
    );
    let stats = self.stats.lock().unwrap();
    let _ = writeln!(out, "  检测总数: {}", stats.total());
    for (name, count) in stats.entries_sorted() {
      let _ = writeln!(out, "    {name}: {count}");
    }
    out
  }

  /// 停止接收帧并回收工作线程。再次调用返回错误
  pub fn shutdown(&mut self) -> Result<(), ScannerError> {
    let tx = self.frames_tx.take().ok_or(ScannerError::ShutDown)?;
    drop(tx);
    if let Some(worker) = self.worker.take() {
      if worker.join().is_err() {
        error!("工作线程非正常退出");
      }
    }
    *self.shared.health.lock().unwrap() = HealthState::Stopped;
    info!("扫描器已关闭");
    Ok(())
  }
}

impl Drop for Scanner {
  fn drop(&mut self) {
    if self.frames_tx.is_some() {
      let _ = self.shutdown();
    }
  }
}

fn run_worker<B>(
  mut pipeline: DetectionPipeline<B::Model>,
  builder: B,
  frames: Receiver<(CameraFrame, FrameStamp)>,
  batches: Sender<Arc<Vec<Detection>>>,
  shared: Shared,
  config: WorkerConfig,
) where
  B: ModelBuilder,
{
  info!("扫描工作线程启动");
  let mut consecutive_failures = 0u32;
  loop {
    if shared.reset_requested.swap(false, Ordering::SeqCst) {
      pipeline.reset_stats();
    }
    let (frame, stamp) = match frames.recv_timeout(Duration::from_millis(50)) {
      Ok(msg) => msg,
      Err(RecvTimeoutError::Timeout) => continue,
      Err(RecvTimeoutError::Disconnected) => break,
    };
    match pipeline.process_frame(&frame, stamp) {
      Ok(Some(batch)) => {
        consecutive_failures = 0;
        info!("上报 {} 条检测", batch.len());
        let batch = Arc::new(batch);
        *shared.latest.lock().unwrap() = Some(Arc::clone(&batch));
        match batches.try_send(batch) {
          Ok(()) => {}
          Err(TrySendError::Full(_)) => debug!("消费者未及时取走批次, 本批仅保留快照"),
          Err(TrySendError::Disconnected(_)) => {}
        }
      }
      Ok(None) => consecutive_failures = 0,
      Err(e @ PipelineError::Inference { .. }) => {
        consecutive_failures += 1;
        error!("帧处理失败 (连续 {} 帧): {}", consecutive_failures, e);
        if consecutive_failures >= config.max_consecutive_failures {
          if !rebuild_session(&mut pipeline, &builder, &shared.health, &config) {
            break;
          }
          consecutive_failures = 0;
        }
      }
      Err(e) => warn!("丢弃异常帧: {}", e),
    }
  }
  info!("扫描工作线程退出");
}

/// 丢弃当前推理会话并用构建器重建，全部尝试失败则进入不可用态
fn rebuild_session<B: ModelBuilder>(
  pipeline: &mut DetectionPipeline<B::Model>,
  builder: &B,
  health: &Mutex<HealthState>,
  config: &WorkerConfig,
) -> bool {
  *health.lock().unwrap() = HealthState::Recovering;
  warn!("连续推理失败达到上限, 重建推理会话");
  for attempt in 1..=config.max_recovery_attempts {
    thread::sleep(config.recovery_backoff());
    match builder.build() {
      Ok(model) => match pipeline.replace_model(model) {
        Ok(()) => {
          *health.lock().unwrap() = HealthState::Running;
          warn!("推理会话重建成功 (第 {attempt} 次尝试)");
          return true;
        }
        Err(e) => error!("重建会话校验失败 (第 {attempt} 次): {e}"),
      },
      Err(e) => error!("重建会话失败 (第 {attempt} 次): {e}"),
    }
  }
  *health.lock().unwrap() = HealthState::Unavailable;
  error!("推理会话重建放弃, 扫描器不可用");
  false
}
