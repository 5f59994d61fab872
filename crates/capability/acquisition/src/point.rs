use domain::MonitorPoint;

/// 调度器对点位句柄的最小要求。
///
/// 调度器只读写身份、到期时间与在途标记；到期时间的计算策略由点位自身决定。
/// 到期时间只能在点位不在队列中时修改（调度器在出队后、重新入队前调用 `reschedule`）。
pub trait ScheduledPoint: Send + Sync + 'static {
    /// 全局唯一的点位标识。
    fn id(&self) -> &str;

    /// 下次到期时间（毫秒时间戳）。
    fn next_due_ms(&self) -> i64;

    /// 一次采集结束后（无论成败）计算新的到期时间。
    fn reschedule(&self, now_ms: i64);

    fn is_in_flight(&self) -> bool;

    fn set_in_flight(&self, in_flight: bool);
}

impl ScheduledPoint for MonitorPoint {
    fn id(&self) -> &str {
        MonitorPoint::id(self)
    }

    fn next_due_ms(&self) -> i64 {
        MonitorPoint::next_due_ms(self)
    }

    fn reschedule(&self, now_ms: i64) {
        self.schedule_after(now_ms);
    }

    fn is_in_flight(&self) -> bool {
        self.is_collecting()
    }

    fn set_in_flight(&self, in_flight: bool) {
        self.set_collecting(in_flight);
    }
}
