//! 通道调度器：连接状态机 + 到期批次采集循环。

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use domain::{PointValueData, now_epoch_ms};
use ems_telemetry::{
    record_async_expired, record_collect_batch, record_collect_failure,
    record_collect_latency_ms, record_connect_attempt, record_connect_failure,
    record_write_failure, record_write_request,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelShared, DriverContext};
use crate::driver::CollectorDriver;
use crate::error::DriverError;
use crate::point::ScheduledPoint;
use crate::sink::PointEventSink;

/// 单次空闲等待的上限，避免对“永不到期”的点位计算超长睡眠。
const MAX_IDLE_SLEEP_MS: i64 = 60_000;

type DriverSlot<P> = Arc<tokio::sync::Mutex<Box<dyn CollectorDriver<P>>>>;

/// 调度参数。
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 批次窗口：到期时间在 `now + batch_window_ms` 之内的点位合并为一批。
    pub batch_window_ms: i64,
    /// 断开状态下每轮发出 no-data 后的等待时间。
    pub disconnected_backoff: Duration,
    /// 异步在途超时；`None` 表示一直等待驱动归还。
    pub in_flight_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: 50,
            disconnected_backoff: Duration::from_secs(1),
            in_flight_timeout: None,
        }
    }
}

/// 通道连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通道状态快照。
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    pub name: String,
    pub driver: &'static str,
    pub state: ConnectionState,
    pub points: usize,
    pub queued: usize,
    pub in_flight: usize,
    pub transactions: u64,
    pub running: bool,
}

/// 单个通道的调度器。
///
/// 持有到期队列、连接状态与驱动；`start_collection` 后由一个独立的 tokio 任务
/// 驱动采集循环。所有驱动调用（循环内的 collect、外部的 connect/write）通过
/// 驱动锁串行执行。
pub struct Scheduler<P: ScheduledPoint> {
    shared: Arc<ChannelShared<P>>,
    driver: DriverSlot<P>,
    driver_kind: &'static str,
    config: SchedulerConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: ScheduledPoint> Scheduler<P> {
    pub fn new(
        name: impl Into<String>,
        driver: Box<dyn CollectorDriver<P>>,
        sink: Arc<dyn PointEventSink>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let driver_kind = driver.kind();
        Arc::new(Self {
            shared: Arc::new(ChannelShared::new(name.into(), sink)),
            driver: Arc::new(tokio::sync::Mutex::new(driver)),
            driver_kind,
            config,
            task: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn driver_kind(&self) -> &'static str {
        self.driver_kind
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// 驱动上下文（供测试或外部回调直接归还点位）。
    pub fn context(&self) -> DriverContext<P> {
        DriverContext::new(Arc::clone(&self.shared))
    }

    // --- 点位 ---

    /// 分配点位并立即按其到期时间入队；重复添加同一点位不会产生重复条目。
    pub fn add_point(&self, point: Arc<P>) {
        self.shared.add_points(std::iter::once(point));
    }

    pub fn add_points(&self, points: impl IntoIterator<Item = Arc<P>>) {
        self.shared.add_points(points);
    }

    pub fn remove_point(&self, point_id: &str) -> Option<Arc<P>> {
        self.shared.remove_point(point_id)
    }

    pub fn point(&self, point_id: &str) -> Option<Arc<P>> {
        self.shared.point(point_id)
    }

    pub fn num_points(&self) -> usize {
        self.shared.num_points()
    }

    pub fn num_queued(&self) -> usize {
        self.shared.num_queued()
    }

    pub fn is_queued(&self, point_id: &str) -> bool {
        self.shared.is_queued(point_id)
    }

    pub fn num_in_flight(&self) -> usize {
        self.shared.num_in_flight()
    }

    /// 自最近一次连接以来完成的采集事务数。
    pub fn num_transactions(&self) -> u64 {
        self.shared.num_transactions()
    }

    // --- 连接 ---

    pub fn connection_state(&self) -> ConnectionState {
        if self.shared.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// 连接通道。已连接时直接返回 `Ok(true)`，不调用驱动。
    pub async fn connect(&self) -> Result<bool, DriverError> {
        connect_channel(&self.shared, &self.driver).await
    }

    /// 断开通道。未连接时什么也不做。
    pub async fn disconnect(&self) -> Result<(), DriverError> {
        let mut driver = self.driver.lock().await;
        if !self.shared.is_connected() {
            return Ok(());
        }
        self.shared.set_connected(false);
        let ctx = self.context();
        driver.disconnect(&ctx).await?;
        info!(
            target: "ems.acquisition",
            channel = %self.name(),
            "channel disconnected"
        );
        Ok(())
    }

    /// 向本通道的点位下发控制值。
    pub async fn write(&self, point_id: &str, value: &PointValueData) -> Result<(), DriverError> {
        record_write_request();
        let Some(point) = self.shared.point(point_id) else {
            record_write_failure();
            return Err(DriverError::Transaction(format!(
                "point {point_id} is not assigned to channel {}",
                self.name()
            )));
        };
        let mut driver = self.driver.lock().await;
        if !self.shared.is_connected() {
            record_write_failure();
            return Err(DriverError::NotConnected);
        }
        let ctx = self.context();
        let result = driver.write(&point, value, &ctx).await;
        if let Err(err) = &result {
            record_write_failure();
            warn!(
                target: "ems.acquisition",
                channel = %self.name(),
                point_id = %point_id,
                error = %err,
                "control write failed"
            );
        }
        result
    }

    // --- 异步对账 ---

    pub fn asynch_collecting(&self, point: &Arc<P>) -> bool {
        self.context().asynch_collecting(point)
    }

    pub fn asynch_return(&self, point: &Arc<P>) {
        self.context().asynch_return(point);
    }

    // --- 运行控制 ---

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// 启动采集循环（需在 tokio 运行时内调用）。已在运行时忽略。
    pub fn start_collection(&self) {
        if self.shared.is_running() {
            warn!(
                target: "ems.acquisition",
                channel = %self.name(),
                "collection already running"
            );
            return;
        }
        let run_id = self.shared.begin_run();
        let collection = CollectionLoop {
            shared: Arc::clone(&self.shared),
            driver: Arc::clone(&self.driver),
            config: self.config.clone(),
            run_id,
        };
        let handle = tokio::spawn(collection.run());
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        drop(previous);
    }

    /// 请求停止采集循环。进行中的驱动调用会完成，之后不再发起新的 collect。
    pub fn stop_collection(&self) {
        self.shared.end_run();
    }

    /// 等待采集循环退出。
    pub async fn join(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(
                    target: "ems.acquisition",
                    channel = %self.name(),
                    error = %err,
                    "collection task aborted"
                );
            }
        }
    }

    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            name: self.name().to_string(),
            driver: self.driver_kind,
            state: self.connection_state(),
            points: self.shared.num_points(),
            queued: self.shared.num_queued(),
            in_flight: self.shared.num_in_flight(),
            transactions: self.shared.num_transactions(),
            running: self.shared.is_running(),
        }
    }
}

async fn connect_channel<P: ScheduledPoint>(
    shared: &Arc<ChannelShared<P>>,
    driver: &DriverSlot<P>,
) -> Result<bool, DriverError> {
    let mut driver = driver.lock().await;
    if shared.is_connected() {
        return Ok(true);
    }
    record_connect_attempt();
    let ctx = DriverContext::new(Arc::clone(shared));
    match driver.connect(&ctx).await {
        Ok(true) => {
            shared.set_connected(true);
            shared.reset_transactions();
            info!(
                target: "ems.acquisition",
                channel = %shared.name(),
                driver = %driver.kind(),
                "channel connected"
            );
            Ok(true)
        }
        Ok(false) => {
            record_connect_failure();
            debug!(
                target: "ems.acquisition",
                channel = %shared.name(),
                "channel not reachable"
            );
            Ok(false)
        }
        Err(err) => {
            record_connect_failure();
            Err(err)
        }
    }
}

/// 单轮运行的采集循环，`run_id` 过期或运行标记清除后退出。
struct CollectionLoop<P: ScheduledPoint> {
    shared: Arc<ChannelShared<P>>,
    driver: DriverSlot<P>,
    config: SchedulerConfig,
    run_id: u64,
}

impl<P: ScheduledPoint> CollectionLoop<P> {
    fn is_current(&self) -> bool {
        self.shared.is_current(self.run_id)
    }

    async fn run(self) {
        info!(
            target: "ems.acquisition",
            channel = %self.shared.name(),
            "collection_started"
        );
        while self.is_current() {
            if !self.shared.is_connected() {
                if let Err(err) = connect_channel(&self.shared, &self.driver).await {
                    warn!(
                        target: "ems.acquisition",
                        channel = %self.shared.name(),
                        error = %err,
                        "channel connect failed"
                    );
                }
            }

            if !self.wait_for_points().await {
                break;
            }

            let cutoff_ms = now_epoch_ms().saturating_add(self.config.batch_window_ms);
            let batch = self.shared.take_due_before(cutoff_ms);
            if !batch.is_empty() {
                if self.shared.is_connected() {
                    self.collect_batch(&batch).await;
                } else {
                    self.report_stale(&batch).await;
                }
                self.shared.reinsert(&batch, now_epoch_ms());
            }

            self.sweep_in_flight();

            if !self.is_current() {
                break;
            }
            self.wait_until_next_due().await;
        }
        info!(
            target: "ems.acquisition",
            channel = %self.shared.name(),
            "collection_stopped"
        );
    }

    fn in_flight_timeout_ms(&self) -> Option<i64> {
        self.config
            .in_flight_timeout
            .map(|timeout| i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX))
    }

    /// 等待队列非空。返回 `false` 表示本轮运行已停止。
    async fn wait_for_points(&self) -> bool {
        loop {
            if !self.is_current() {
                return false;
            }
            if !self.shared.is_queue_empty() {
                return true;
            }
            match self.config.in_flight_timeout {
                Some(timeout) if self.shared.num_in_flight() > 0 => {
                    tokio::select! {
                        _ = self.shared.wakeup_notified() => {}
                        _ = tokio::time::sleep(timeout) => {}
                    }
                    self.sweep_in_flight();
                }
                _ => self.shared.wakeup_notified().await,
            }
        }
    }

    async fn collect_batch(&self, batch: &[Arc<P>]) {
        let ctx = DriverContext::new(Arc::clone(&self.shared));
        let mut driver = self.driver.lock().await;
        // 等锁期间可能已停止；批次由调用方原样放回队列
        if !self.is_current() {
            debug!(
                target: "ems.acquisition",
                channel = %self.shared.name(),
                points = batch.len(),
                "collection stopped while waiting for driver, batch skipped"
            );
            return;
        }
        let started = Instant::now();
        let result = driver.collect(batch, &ctx).await;
        record_collect_latency_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        match result {
            Ok(()) => {
                self.shared.add_transaction();
                record_collect_batch(batch.len());
            }
            Err(err) => {
                record_collect_failure();
                error!(
                    target: "ems.acquisition",
                    channel = %self.shared.name(),
                    points = batch.len(),
                    error = %err,
                    "collect failed, dropping connection"
                );
                self.shared.release_in_flight(batch);
                self.shared.set_connected(false);
                if let Err(err) = driver.disconnect(&ctx).await {
                    warn!(
                        target: "ems.acquisition",
                        channel = %self.shared.name(),
                        error = %err,
                        "disconnect after collect failure failed"
                    );
                }
            }
        }
    }

    /// 断开状态：每个到期点位发出一条 no-data，然后退避（只被停止打断）。
    async fn report_stale(&self, batch: &[Arc<P>]) {
        let ts_ms = now_epoch_ms();
        for point in batch {
            self.shared
                .emit(domain::PointEvent::no_data(point.id(), ts_ms));
        }
        debug!(
            target: "ems.acquisition",
            channel = %self.shared.name(),
            points = batch.len(),
            "channel disconnected, reported stale points"
        );
        tokio::select! {
            _ = tokio::time::sleep(self.config.disconnected_backoff) => {}
            _ = self.shared.shutdown_notified() => {}
        }
    }

    /// 回收超时的异步在途点位：发出 no-data 并重新排期。
    fn sweep_in_flight(&self) {
        let Some(timeout_ms) = self.in_flight_timeout_ms() else {
            return;
        };
        let now_ms = now_epoch_ms();
        for point in self.shared.expire_in_flight(timeout_ms, now_ms) {
            record_async_expired();
            warn!(
                target: "ems.acquisition",
                channel = %self.shared.name(),
                point_id = %point.id(),
                timeout_ms,
                "in-flight point expired"
            );
            self.shared
                .emit(domain::PointEvent::no_data(point.id(), now_ms));
        }
    }

    /// 睡眠到最早到期时间，可被新点位入队或异步归还打断。
    async fn wait_until_next_due(&self) {
        let Some(due_ms) = self.shared.earliest_due_ms() else {
            return;
        };
        let mut sleep_ms = due_ms
            .saturating_sub(now_epoch_ms())
            .clamp(0, MAX_IDLE_SLEEP_MS);
        if sleep_ms == 0 {
            return;
        }
        if let Some(timeout_ms) = self.in_flight_timeout_ms() {
            if self.shared.num_in_flight() > 0 {
                sleep_ms = sleep_ms.min(timeout_ms.max(1));
            }
        }
        let sleep = Duration::from_millis(u64::try_from(sleep_ms).unwrap_or(0));
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = self.shared.wakeup_notified() => {}
        }
    }
}
