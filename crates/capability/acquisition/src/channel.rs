//! 通道共享状态与驱动上下文。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use domain::{PointEvent, PointValueData, now_epoch_ms};
use ems_telemetry::{record_async_dispatched, record_async_returned, record_no_data_event};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::due_queue::DueQueue;
use crate::point::ScheduledPoint;
use crate::sink::PointEventSink;

/// 受通道锁保护的调度数据。
struct ChannelState<P> {
    queue: DueQueue<P>,
    /// 已分配到本通道的全部点位（包括在途点位）。
    members: HashMap<String, Arc<P>>,
    /// 异步在途点位 → 发起时间（毫秒）。
    pending: HashMap<String, i64>,
}

/// 异步归还的处理结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Completion {
    /// 在途点位已重新排期。
    Returned,
    /// 在途标记已清除，但点位已不属于本通道。
    Detached,
    /// 点位不在途（已超时回收、已释放或从未发起）。
    NotPending,
}

/// 调度循环、驱动回调与外部调用方共享的通道状态。
pub(crate) struct ChannelShared<P> {
    name: String,
    sink: Arc<dyn PointEventSink>,
    state: Mutex<ChannelState<P>>,
    wakeup: Notify,
    shutdown: Notify,
    connected: AtomicBool,
    transactions: AtomicU64,
    running: AtomicBool,
    run_id: AtomicU64,
}

impl<P: ScheduledPoint> ChannelShared<P> {
    pub(crate) fn new(name: String, sink: Arc<dyn PointEventSink>) -> Self {
        Self {
            name,
            sink,
            state: Mutex::new(ChannelState {
                queue: DueQueue::new(),
                members: HashMap::new(),
                pending: HashMap::new(),
            }),
            wakeup: Notify::new(),
            shutdown: Notify::new(),
            connected: AtomicBool::new(false),
            transactions: AtomicU64::new(0),
            running: AtomicBool::new(false),
            run_id: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    // --- 点位分配 ---

    pub(crate) fn add_points(&self, points: impl IntoIterator<Item = Arc<P>>) {
        let mut state = self.lock();
        for point in points {
            let id = point.id().to_string();
            if !state.pending.contains_key(&id) {
                state.queue.insert(point.clone());
            }
            state.members.insert(id, point);
        }
        drop(state);
        self.wakeup.notify_one();
    }

    pub(crate) fn remove_point(&self, point_id: &str) -> Option<Arc<P>> {
        let mut state = self.lock();
        let point = state.members.remove(point_id)?;
        state.queue.remove(point_id);
        if state.pending.remove(point_id).is_some() {
            point.set_in_flight(false);
        }
        drop(state);
        self.wakeup.notify_one();
        Some(point)
    }

    pub(crate) fn point(&self, point_id: &str) -> Option<Arc<P>> {
        self.lock().members.get(point_id).cloned()
    }

    pub(crate) fn num_points(&self) -> usize {
        self.lock().members.len()
    }

    pub(crate) fn num_queued(&self) -> usize {
        self.lock().queue.len()
    }

    pub(crate) fn num_in_flight(&self) -> usize {
        self.lock().pending.len()
    }

    pub(crate) fn is_queued(&self, point_id: &str) -> bool {
        self.lock().queue.contains(point_id)
    }

    // --- 调度循环使用 ---

    pub(crate) fn is_queue_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub(crate) fn earliest_due_ms(&self) -> Option<i64> {
        self.lock().queue.earliest_due_ms()
    }

    pub(crate) fn take_due_before(&self, cutoff_ms: i64) -> Vec<Arc<P>> {
        self.lock().queue.take_due_before(cutoff_ms)
    }

    /// 批次结束后重新入队。
    ///
    /// 跳过：已被移除（或被同 id 新句柄替换）的点位、异步在途点位、
    /// 以及回调已先行返回并重新入队的点位。
    pub(crate) fn reinsert(&self, batch: &[Arc<P>], now_ms: i64) {
        let mut state = self.lock();
        for point in batch {
            let id = point.id();
            let is_member = state
                .members
                .get(id)
                .is_some_and(|member| Arc::ptr_eq(member, point));
            if !is_member || state.pending.contains_key(id) || state.queue.contains(id) {
                continue;
            }
            point.reschedule(now_ms);
            state.queue.insert(point.clone());
        }
    }

    /// 批次失败时收回本批次中的在途标记，使其随批次一起重新入队。
    pub(crate) fn release_in_flight(&self, batch: &[Arc<P>]) -> usize {
        let mut state = self.lock();
        let mut released = 0;
        for point in batch {
            if state.pending.remove(point.id()).is_some() {
                point.set_in_flight(false);
                released += 1;
            }
        }
        released
    }

    /// 回收超过 `timeout_ms` 仍未返回的在途点位，重新排期并返回它们。
    pub(crate) fn expire_in_flight(&self, timeout_ms: i64, now_ms: i64) -> Vec<Arc<P>> {
        let mut state = self.lock();
        let expired_ids: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, since_ms)| now_ms.saturating_sub(**since_ms) >= timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();
        let mut expired = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            state.pending.remove(&id);
            if let Some(point) = state.members.get(&id).cloned() {
                point.set_in_flight(false);
                point.reschedule(now_ms);
                state.queue.insert(point.clone());
                expired.push(point);
            }
        }
        expired
    }

    pub(crate) async fn wakeup_notified(&self) {
        self.wakeup.notified().await;
    }

    pub(crate) async fn shutdown_notified(&self) {
        self.shutdown.notified().await;
    }

    // --- 异步采集对账 ---

    pub(crate) fn mark_in_flight(&self, point: &Arc<P>) -> bool {
        let mut state = self.lock();
        let is_member = state
            .members
            .get(point.id())
            .is_some_and(|member| Arc::ptr_eq(member, point));
        if !is_member {
            return false;
        }
        point.set_in_flight(true);
        state.queue.remove(point.id());
        state.pending.insert(point.id().to_string(), now_epoch_ms());
        true
    }

    pub(crate) fn complete_in_flight(&self, point: &Arc<P>) -> Completion {
        let mut state = self.lock();
        if state.pending.remove(point.id()).is_none() {
            return Completion::NotPending;
        }
        point.set_in_flight(false);
        let now_ms = now_epoch_ms();
        let is_member = match state.members.get(point.id()).cloned() {
            Some(member) if Arc::ptr_eq(&member, point) => {
                point.reschedule(now_ms);
                state.queue.insert(member);
                true
            }
            // 在途期间被同 id 的新句柄替换：新句柄此前未入队
            Some(replacement) => {
                if !state.queue.contains(replacement.id()) {
                    replacement.reschedule(now_ms);
                    state.queue.insert(replacement);
                }
                false
            }
            None => false,
        };
        drop(state);
        self.wakeup.notify_one();
        if is_member {
            Completion::Returned
        } else {
            Completion::Detached
        }
    }

    // --- 事件 ---

    pub(crate) fn emit(&self, event: PointEvent) {
        if event.is_no_data() {
            record_no_data_event();
        }
        self.sink.emit(event);
    }

    // --- 连接状态与计数 ---

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub(crate) fn num_transactions(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    pub(crate) fn add_transaction(&self) {
        self.transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset_transactions(&self) {
        self.transactions.store(0, Ordering::Relaxed);
    }

    // --- 运行控制 ---

    /// 开始新一轮运行，返回本轮的运行编号。
    pub(crate) fn begin_run(&self) -> u64 {
        self.running.store(true, Ordering::Release);
        self.run_id.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// 协作式停止：只清除运行标记并唤醒等待，不中断进行中的驱动调用。
    pub(crate) fn end_run(&self) {
        self.running.store(false, Ordering::Release);
        self.run_id.fetch_add(1, Ordering::AcqRel);
        self.wakeup.notify_one();
        self.shutdown.notify_one();
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn is_current(&self, run_id: u64) -> bool {
        self.is_running() && self.run_id.load(Ordering::Acquire) == run_id
    }
}

/// 交给驱动的通道句柄。
///
/// 可克隆并移动到驱动自建的回调任务/线程中，用于发出点位事件、
/// 标记异步在途点位以及在回调到达后归还点位。
pub struct DriverContext<P> {
    shared: Arc<ChannelShared<P>>,
}

impl<P> Clone for DriverContext<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: ScheduledPoint> DriverContext<P> {
    pub(crate) fn new(shared: Arc<ChannelShared<P>>) -> Self {
        Self { shared }
    }

    pub fn channel_name(&self) -> &str {
        self.shared.name()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// 驱动在回调中检测到连接断开时调用，下一轮调度会重新连接。
    pub fn mark_disconnected(&self) {
        if self.shared.is_connected() {
            warn!(
                target: "ems.acquisition",
                channel = %self.shared.name(),
                "driver reported connection loss"
            );
        }
        self.shared.set_connected(false);
        self.shared.wakeup.notify_one();
    }

    pub fn emit(&self, event: PointEvent) {
        self.shared.emit(event);
    }

    pub fn emit_value(&self, point_id: &str, value: PointValueData) {
        self.shared
            .emit(PointEvent::value(point_id, value, now_epoch_ms()));
    }

    pub fn emit_no_data(&self, point_id: &str) {
        self.shared.emit(PointEvent::no_data(point_id, now_epoch_ms()));
    }

    /// 标记点位正在异步采集：本轮批次结束后不重新入队，直到 [`Self::asynch_return`]。
    ///
    /// 点位不属于本通道时返回 `false`，驱动不应再为其发起请求。
    pub fn asynch_collecting(&self, point: &Arc<P>) -> bool {
        let marked = self.shared.mark_in_flight(point);
        if marked {
            record_async_dispatched();
        } else {
            debug!(
                target: "ems.acquisition",
                channel = %self.shared.name(),
                point_id = %point.id(),
                "asynch_collecting ignored for detached point"
            );
        }
        marked
    }

    /// 异步结果到达（或连接断开）后归还点位：清除在途标记、重新排期、唤醒调度循环。
    pub fn asynch_return(&self, point: &Arc<P>) {
        match self.shared.complete_in_flight(point) {
            Completion::Returned => {
                record_async_returned();
                self.shared.add_transaction();
            }
            Completion::Detached => {
                record_async_returned();
                self.shared.add_transaction();
                debug!(
                    target: "ems.acquisition",
                    channel = %self.shared.name(),
                    point_id = %point.id(),
                    "asynch_return for detached point"
                );
            }
            Completion::NotPending => debug!(
                target: "ems.acquisition",
                channel = %self.shared.name(),
                point_id = %point.id(),
                "asynch_return ignored, point not in flight"
            ),
        }
    }

    pub fn num_in_flight(&self) -> usize {
        self.shared.num_in_flight()
    }
}
