//! 点位事件下游：去重 + 批量写出。
//!
//! 写出失败的批次直接丢弃并计数，不重试；采集端按周期会产生新值。

use async_trait::async_trait;
use domain::{PointEvent, PointValueData};
use ems_telemetry::{record_event_dropped, record_events_forwarded};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// Pipeline 处理错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("writer error: {0}")]
    Writer(String),
}

/// Pipeline 参数。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// 记录最近值的点位数上限，0 表示不去重。
    pub dedup_cache_size: usize,
    /// `run` 模式下未满批次的最长停留时间。
    pub flush_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            dedup_cache_size: 10_000,
            flush_interval: Duration::from_millis(500),
        }
    }
}

/// 单个事件进入 pipeline 后的去向。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 进入缓冲区等待凑批。
    Queued,
    /// 凑满一批并已写出，携带批次大小。
    Flushed(usize),
    Duplicate,
    Invalid(&'static str),
}

/// 点位事件写出器抽象。
#[async_trait]
pub trait PointEventWriter: Send + Sync {
    async fn write_batch(&self, events: &[PointEvent]) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, PartialEq)]
struct LastValue {
    ts_ms: i64,
    value: PointValueData,
    is_alarm: bool,
}

impl LastValue {
    /// no-data 事件没有可比较的值。
    fn of(event: &PointEvent) -> Option<Self> {
        event.value.as_ref().map(|value| Self {
            ts_ms: event.ts_ms,
            value: value.clone(),
            is_alarm: event.is_alarm,
        })
    }

    fn same_as(&self, other: &Self) -> bool {
        self.ts_ms == other.ts_ms
            && self.is_alarm == other.is_alarm
            && match (&self.value, &other.value) {
                // NaN 已在校验阶段拒绝，按位比较等价于数值比较
                (PointValueData::F64(a), PointValueData::F64(b)) => a.to_bits() == b.to_bits(),
                (a, b) => a == b,
            }
    }
}

/// 每个点位最近一次写出的值。
///
/// 点位按首次出现的顺序淘汰；no-data 只清空该点位的记录，不改变其顺位。
struct LastValues {
    values: HashMap<String, Option<LastValue>>,
    arrival: VecDeque<String>,
    capacity: usize,
}

impl LastValues {
    fn new(capacity: usize) -> Self {
        Self {
            values: HashMap::new(),
            arrival: VecDeque::new(),
            capacity,
        }
    }

    /// 记录事件并返回它是否与该点位上一次的值完全相同。
    fn observe(&mut self, event: &PointEvent) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let incoming = LastValue::of(event);
        match self.values.get_mut(&event.point_id) {
            Some(slot) => {
                if let (Some(last), Some(next)) = (slot.as_ref(), incoming.as_ref()) {
                    if last.same_as(next) {
                        return true;
                    }
                }
                *slot = incoming;
            }
            None => {
                self.values.insert(event.point_id.clone(), incoming);
                self.arrival.push_back(event.point_id.clone());
                while self.arrival.len() > self.capacity {
                    if let Some(oldest) = self.arrival.pop_front() {
                        self.values.remove(&oldest);
                    }
                }
            }
        }
        false
    }
}

struct PipelineInner {
    writer: Arc<dyn PointEventWriter>,
    batch_size: usize,
    flush_interval: Duration,
    buffer: Mutex<Vec<PointEvent>>,
    last_values: std::sync::Mutex<LastValues>,
}

/// Pipeline 入口。
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn new(writer: Arc<dyn PointEventWriter>) -> Self {
        Self::with_config(writer, PipelineConfig::default())
    }

    pub fn with_config(writer: Arc<dyn PointEventWriter>, config: PipelineConfig) -> Self {
        let flush_interval = if config.flush_interval.is_zero() {
            Duration::from_millis(1)
        } else {
            config.flush_interval
        };
        Self {
            inner: Arc::new(PipelineInner {
                writer,
                batch_size: config.batch_size.max(1),
                flush_interval,
                buffer: Mutex::new(Vec::new()),
                last_values: std::sync::Mutex::new(LastValues::new(config.dedup_cache_size)),
            }),
        }
    }

    pub async fn handle(&self, event: PointEvent) -> Result<Admission, PipelineError> {
        if let Some(reason) = rejection(&event) {
            record_event_dropped();
            debug!(target: "ems.pipeline", point_id = %event.point_id, reason, "point event rejected");
            return Ok(Admission::Invalid(reason));
        }
        let duplicate = self
            .inner
            .last_values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(&event);
        if duplicate {
            record_event_dropped();
            return Ok(Admission::Duplicate);
        }

        let mut buffer = self.inner.buffer.lock().await;
        buffer.push(event);
        if buffer.len() < self.inner.batch_size {
            return Ok(Admission::Queued);
        }
        let batch = std::mem::take(&mut *buffer);
        drop(buffer);
        self.write_out(batch).await.map(Admission::Flushed)
    }

    /// 写出缓冲区中剩余的事件，返回写出数量。
    pub async fn flush(&self) -> Result<usize, PipelineError> {
        let batch = std::mem::take(&mut *self.inner.buffer.lock().await);
        if batch.is_empty() {
            return Ok(0);
        }
        self.write_out(batch).await
    }

    /// 持续消费事件直到发送端全部关闭，期间按 `flush_interval` 写出未满批次。
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<PointEvent>) {
        let mut ticker = tokio::time::interval(self.inner.flush_interval);
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    // 失败已在 write_out 中记录
                    Some(event) => {
                        let _ = self.handle(event).await;
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    let _ = self.flush().await;
                }
            }
        }
        let _ = self.flush().await;
        info!(target: "ems.pipeline", "event stream closed");
    }

    async fn write_out(&self, batch: Vec<PointEvent>) -> Result<usize, PipelineError> {
        let count = batch.len();
        match self.inner.writer.write_batch(&batch).await {
            Ok(()) => {
                record_events_forwarded(count);
                Ok(count)
            }
            Err(err) => {
                for _ in 0..count {
                    record_event_dropped();
                }
                warn!(target: "ems.pipeline", error = %err, events = count, "batch dropped");
                Err(err)
            }
        }
    }
}

fn rejection(event: &PointEvent) -> Option<&'static str> {
    if event.ts_ms <= 0 {
        return Some("invalid_ts");
    }
    match &event.value {
        Some(PointValueData::F64(v)) if !v.is_finite() => Some("invalid_value"),
        _ => None,
    }
}

/// 空写入器（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopWriter;

#[async_trait]
impl PointEventWriter for NoopWriter {
    async fn write_batch(&self, _events: &[PointEvent]) -> Result<(), PipelineError> {
        Ok(())
    }
}

/// 以日志形式输出点位更新。
#[derive(Debug, Default)]
pub struct TracingEventWriter;

#[async_trait]
impl PointEventWriter for TracingEventWriter {
    async fn write_batch(&self, events: &[PointEvent]) -> Result<(), PipelineError> {
        for event in events {
            match &event.value {
                Some(value) => info!(
                    target: "ems.pipeline",
                    point_id = %event.point_id,
                    value = %value,
                    ts_ms = event.ts_ms,
                    alarm = event.is_alarm,
                    "point update"
                ),
                None => info!(
                    target: "ems.pipeline",
                    point_id = %event.point_id,
                    ts_ms = event.ts_ms,
                    "point has no data"
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingWriter {
        batches: Mutex<Vec<Vec<PointEvent>>>,
        fail: AtomicBool,
    }

    impl RecordingWriter {
        async fn sizes(&self) -> Vec<usize> {
            self.batches.lock().await.iter().map(Vec::len).collect()
        }
    }

    #[async_trait]
    impl PointEventWriter for RecordingWriter {
        async fn write_batch(&self, events: &[PointEvent]) -> Result<(), PipelineError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PipelineError::Writer("sink offline".to_string()));
            }
            self.batches.lock().await.push(events.to_vec());
            Ok(())
        }
    }

    fn sample_event(ts_ms: i64, value: PointValueData) -> PointEvent {
        PointEvent::value("point-1", value, ts_ms)
    }

    fn config(batch_size: usize, dedup_cache_size: usize) -> PipelineConfig {
        PipelineConfig {
            batch_size,
            dedup_cache_size,
            flush_interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn pipeline_batches_events() {
        let writer = Arc::new(RecordingWriter::default());
        let pipeline = Pipeline::with_config(writer.clone(), config(2, 0));
        let first = pipeline
            .handle(sample_event(1, PointValueData::I64(1)))
            .await
            .expect("queued");
        let second = pipeline
            .handle(sample_event(2, PointValueData::I64(2)))
            .await
            .expect("written");
        assert_eq!(first, Admission::Queued);
        assert_eq!(second, Admission::Flushed(2));
        assert_eq!(writer.sizes().await, vec![2]);
    }

    #[tokio::test]
    async fn same_value_at_same_time_is_dropped() {
        let writer = Arc::new(RecordingWriter::default());
        let pipeline = Pipeline::with_config(writer.clone(), config(1, 10));
        let event = sample_event(1, PointValueData::F64(20.5));
        assert_eq!(pipeline.handle(event.clone()).await.expect("first"), Admission::Flushed(1));
        assert_eq!(pipeline.handle(event).await.expect("second"), Admission::Duplicate);
        // 时间戳不同的同值事件照常写出
        assert_eq!(
            pipeline
                .handle(sample_event(2, PointValueData::F64(20.5)))
                .await
                .expect("third"),
            Admission::Flushed(1)
        );
        assert_eq!(writer.sizes().await, vec![1, 1]);
    }

    #[tokio::test]
    async fn no_data_events_are_never_deduplicated() {
        let writer = Arc::new(RecordingWriter::default());
        let pipeline = Pipeline::with_config(writer.clone(), config(1, 10));
        for _ in 0..2 {
            let admission = pipeline
                .handle(PointEvent::no_data("point-1", 5))
                .await
                .expect("written");
            assert_eq!(admission, Admission::Flushed(1));
        }
        // no-data 之后相同的值重新写出
        pipeline
            .handle(sample_event(5, PointValueData::I64(1)))
            .await
            .expect("written");
        pipeline
            .handle(PointEvent::no_data("point-1", 5))
            .await
            .expect("written");
        let again = pipeline
            .handle(sample_event(5, PointValueData::I64(1)))
            .await
            .expect("written");
        assert_eq!(again, Admission::Flushed(1));
        assert_eq!(writer.sizes().await.len(), 5);
    }

    #[tokio::test]
    async fn oldest_point_is_evicted_when_cache_is_full() {
        let pipeline = Pipeline::with_config(Arc::new(RecordingWriter::default()), config(1, 2));
        for id in ["a", "b", "c"] {
            pipeline
                .handle(PointEvent::value(id, PointValueData::I64(1), 1))
                .await
                .expect("written");
        }
        // `a` 已被淘汰，`c` 仍在
        let a = pipeline
            .handle(PointEvent::value("a", PointValueData::I64(1), 1))
            .await
            .expect("a");
        let c = pipeline
            .handle(PointEvent::value("c", PointValueData::I64(1), 1))
            .await
            .expect("c");
        assert_eq!(a, Admission::Flushed(1));
        assert_eq!(c, Admission::Duplicate);
    }

    #[tokio::test]
    async fn invalid_events_are_rejected() {
        let writer = Arc::new(RecordingWriter::default());
        let pipeline = Pipeline::with_config(writer.clone(), config(1, 0));
        let admission = pipeline
            .handle(sample_event(0, PointValueData::I64(1)))
            .await
            .expect("admission");
        assert_eq!(admission, Admission::Invalid("invalid_ts"));
        let admission = pipeline
            .handle(sample_event(1, PointValueData::F64(f64::NAN)))
            .await
            .expect("admission");
        assert_eq!(admission, Admission::Invalid("invalid_value"));
        assert!(writer.sizes().await.is_empty());
    }

    #[tokio::test]
    async fn failed_batch_is_dropped_not_retried() {
        let writer = Arc::new(RecordingWriter::default());
        let pipeline = Pipeline::with_config(writer.clone(), config(2, 0));
        writer.fail.store(true, Ordering::SeqCst);
        pipeline
            .handle(sample_event(1, PointValueData::I64(1)))
            .await
            .expect("queued");
        let err = pipeline
            .handle(sample_event(2, PointValueData::I64(2)))
            .await
            .expect_err("writer offline");
        assert!(matches!(err, PipelineError::Writer(_)));

        writer.fail.store(false, Ordering::SeqCst);
        assert_eq!(pipeline.flush().await.expect("flush"), 0);
        pipeline
            .handle(sample_event(3, PointValueData::I64(3)))
            .await
            .expect("queued");
        assert_eq!(pipeline.flush().await.expect("flush"), 1);
        let batches = writer.batches.lock().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].ts_ms, 3);
    }

    #[tokio::test]
    async fn run_flushes_partial_batches_and_stops_on_close() {
        let writer = Arc::new(RecordingWriter::default());
        let pipeline = Pipeline::with_config(writer.clone(), config(100, 0));
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn({
            let pipeline = pipeline.clone();
            async move { pipeline.run(rx).await }
        });

        tx.send(sample_event(1, PointValueData::I64(1))).expect("send");
        tx.send(sample_event(2, PointValueData::I64(2))).expect("send");
        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), consumer)
            .await
            .expect("consumer finishes")
            .expect("join");

        let total: usize = writer.sizes().await.iter().sum();
        assert_eq!(total, 2);
    }
}
