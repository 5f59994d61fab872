//! 追踪、请求 ID 与采集指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 采集指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub collect_batches: u64,
    pub collected_points: u64,
    pub collect_failures: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub no_data_events: u64,
    pub async_dispatched: u64,
    pub async_returned: u64,
    pub async_expired: u64,
    pub write_requests: u64,
    pub write_failures: u64,
    pub events_forwarded: u64,
    pub events_dropped: u64,
    pub collect_latency_ms_total: u64,
    pub collect_latency_ms_count: u64,
}

/// 进程级采集指标。
pub struct TelemetryMetrics {
    collect_batches: AtomicU64,
    collected_points: AtomicU64,
    collect_failures: AtomicU64,
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    no_data_events: AtomicU64,
    async_dispatched: AtomicU64,
    async_returned: AtomicU64,
    async_expired: AtomicU64,
    write_requests: AtomicU64,
    write_failures: AtomicU64,
    events_forwarded: AtomicU64,
    events_dropped: AtomicU64,
    collect_latency_ms_total: AtomicU64,
    collect_latency_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            collect_batches: AtomicU64::new(0),
            collected_points: AtomicU64::new(0),
            collect_failures: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            connect_failures: AtomicU64::new(0),
            no_data_events: AtomicU64::new(0),
            async_dispatched: AtomicU64::new(0),
            async_returned: AtomicU64::new(0),
            async_expired: AtomicU64::new(0),
            write_requests: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            events_forwarded: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            collect_latency_ms_total: AtomicU64::new(0),
            collect_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            collect_batches: self.collect_batches.load(Ordering::Relaxed),
            collected_points: self.collected_points.load(Ordering::Relaxed),
            collect_failures: self.collect_failures.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            no_data_events: self.no_data_events.load(Ordering::Relaxed),
            async_dispatched: self.async_dispatched.load(Ordering::Relaxed),
            async_returned: self.async_returned.load(Ordering::Relaxed),
            async_expired: self.async_expired.load(Ordering::Relaxed),
            write_requests: self.write_requests.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            events_forwarded: self.events_forwarded.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            collect_latency_ms_total: self.collect_latency_ms_total.load(Ordering::Relaxed),
            collect_latency_ms_count: self.collect_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录一次成功的采集批次及其点位数。
pub fn record_collect_batch(points: usize) {
    let metrics = metrics();
    metrics.collect_batches.fetch_add(1, Ordering::Relaxed);
    metrics
        .collected_points
        .fetch_add(points as u64, Ordering::Relaxed);
}

/// 记录采集批次失败次数（驱动返回错误）。
pub fn record_collect_failure() {
    metrics().collect_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录采集批次耗时（毫秒）。
pub fn record_collect_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .collect_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .collect_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录连接尝试次数。
pub fn record_connect_attempt() {
    metrics().connect_attempts.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接失败次数。
pub fn record_connect_failure() {
    metrics().connect_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录“无数据”事件次数。
pub fn record_no_data_event() {
    metrics().no_data_events.fetch_add(1, Ordering::Relaxed);
}

/// 记录异步采集发起次数。
pub fn record_async_dispatched() {
    metrics().async_dispatched.fetch_add(1, Ordering::Relaxed);
}

/// 记录异步采集回调返回次数。
pub fn record_async_returned() {
    metrics().async_returned.fetch_add(1, Ordering::Relaxed);
}

/// 记录异步采集超时回收次数。
pub fn record_async_expired() {
    metrics().async_expired.fetch_add(1, Ordering::Relaxed);
}

/// 记录控制写入请求次数。
pub fn record_write_request() {
    metrics().write_requests.fetch_add(1, Ordering::Relaxed);
}

/// 记录控制写入失败次数。
pub fn record_write_failure() {
    metrics().write_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录下游转发的事件数。
pub fn record_events_forwarded(count: usize) {
    metrics()
        .events_forwarded
        .fetch_add(count as u64, Ordering::Relaxed);
}

/// 记录下游丢弃（重复）的事件数。
pub fn record_event_dropped() {
    metrics().events_dropped.fetch_add(1, Ordering::Relaxed);
}
