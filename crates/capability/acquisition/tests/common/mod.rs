#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use domain::{MonitorPoint, PointEvent, PointValueData};
use ems_acquisition::{CollectorDriver, DriverContext, DriverError, PointEventSink};
use tokio::sync::{Notify, Semaphore};

/// 记录所有事件及其到达时刻。
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(PointEvent, Instant)>>,
}

impl RecordingSink {
    pub fn events_for(&self, point_id: &str) -> Vec<(PointEvent, Instant)> {
        self.events
            .lock()
            .expect("events")
            .iter()
            .filter(|(event, _)| event.point_id == point_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("events").len()
    }
}

impl PointEventSink for RecordingSink {
    fn emit(&self, event: PointEvent) {
        self.events
            .lock()
            .expect("events")
            .push((event, Instant::now()));
    }
}

/// 测试驱动的可观察状态。
pub struct MockState {
    pub connect_ok: AtomicBool,
    pub fail_next_collect: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub collects: AtomicUsize,
    pub successes_since_connect: AtomicUsize,
    /// 以异步方式采集的点位 id。
    pub async_ids: Mutex<HashSet<String>>,
    /// 已标记在途、等待测试手动归还的点位。
    pub parked: Mutex<Vec<Arc<MonitorPoint>>>,
    pub collected: Mutex<Vec<(String, Instant)>>,
    /// 每次 collect 收到的点位到期时间，按批次顺序记录。
    pub dues: Mutex<Vec<i64>>,
    pub writes: Mutex<Vec<(String, PointValueData)>>,
    pub collect_started: Notify,
    /// 设置后每次 collect 都要先拿到一个许可。
    pub gate: Option<Arc<Semaphore>>,
    pub write_started: Notify,
    /// 设置后每次 write 都要先拿到一个许可（期间持有驱动锁）。
    pub write_gate: Option<Arc<Semaphore>>,
}

impl MockState {
    pub fn new(connect_ok: bool) -> Arc<Self> {
        Arc::new(Self::build(connect_ok, None))
    }

    pub fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self::build(true, Some(gate)))
    }

    pub fn write_gated(write_gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            write_gate: Some(write_gate),
            ..Self::build(true, None)
        })
    }

    fn build(connect_ok: bool, gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            connect_ok: AtomicBool::new(connect_ok),
            fail_next_collect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            collects: AtomicUsize::new(0),
            successes_since_connect: AtomicUsize::new(0),
            async_ids: Mutex::new(HashSet::new()),
            parked: Mutex::new(Vec::new()),
            collected: Mutex::new(Vec::new()),
            dues: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            collect_started: Notify::new(),
            gate,
            write_started: Notify::new(),
            write_gate: None,
        }
    }

    pub fn mark_async(&self, point_id: &str) {
        self.async_ids
            .lock()
            .expect("async ids")
            .insert(point_id.to_string());
    }

    pub fn take_parked(&self) -> Vec<Arc<MonitorPoint>> {
        std::mem::take(&mut *self.parked.lock().expect("parked"))
    }

    pub fn times_collected(&self, point_id: &str) -> usize {
        self.collected
            .lock()
            .expect("collected")
            .iter()
            .filter(|(id, _)| id == point_id)
            .count()
    }
}

pub struct MockDriver {
    pub state: Arc<MockState>,
}

impl MockDriver {
    pub fn boxed(state: &Arc<MockState>) -> Box<dyn CollectorDriver<MonitorPoint>> {
        Box::new(Self {
            state: Arc::clone(state),
        })
    }
}

#[async_trait]
impl CollectorDriver<MonitorPoint> for MockDriver {
    fn kind(&self) -> &'static str {
        "mock"
    }

    async fn connect(&mut self, _ctx: &DriverContext<MonitorPoint>) -> Result<bool, DriverError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let ok = self.state.connect_ok.load(Ordering::SeqCst);
        if ok {
            self.state.successes_since_connect.store(0, Ordering::SeqCst);
        }
        Ok(ok)
    }

    async fn disconnect(&mut self, _ctx: &DriverContext<MonitorPoint>) -> Result<(), DriverError> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn collect(
        &mut self,
        points: &[Arc<MonitorPoint>],
        ctx: &DriverContext<MonitorPoint>,
    ) -> Result<(), DriverError> {
        self.state.collects.fetch_add(1, Ordering::SeqCst);
        self.state.collect_started.notify_one();
        if let Some(gate) = &self.state.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.state.fail_next_collect.swap(false, Ordering::SeqCst) {
            return Err(DriverError::Connection("link dropped".to_string()));
        }
        self.state
            .dues
            .lock()
            .expect("dues")
            .extend(points.iter().map(|point| point.next_due_ms()));
        let async_ids = self.state.async_ids.lock().expect("async ids").clone();
        for point in points {
            self.state
                .collected
                .lock()
                .expect("collected")
                .push((point.id().to_string(), Instant::now()));
            if async_ids.contains(point.id()) {
                if ctx.asynch_collecting(point) {
                    self.state.parked.lock().expect("parked").push(point.clone());
                }
            } else {
                ctx.emit_value(point.id(), PointValueData::I64(1));
            }
        }
        self.state
            .successes_since_connect
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write(
        &mut self,
        point: &Arc<MonitorPoint>,
        value: &PointValueData,
        _ctx: &DriverContext<MonitorPoint>,
    ) -> Result<(), DriverError> {
        if let Some(gate) = &self.state.write_gate {
            self.state.write_started.notify_one();
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.state
            .writes
            .lock()
            .expect("writes")
            .push((point.id().to_string(), value.clone()));
        Ok(())
    }
}

pub fn point(id: &str, period_ms: i64) -> Arc<MonitorPoint> {
    Arc::new(MonitorPoint::new(id, period_ms))
}

/// 轮询等待条件成立，超时返回 `false`。
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
