use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// 周期为 0 的点位不再参与轮询，下次到期时间固定为该值。
pub const NEVER_DUE_MS: i64 = i64::MAX;

/// 点位与通道之间的采集/控制关联。
///
/// `args` 的含义由通道驱动决定，例如 ASCII 查询串、Modbus 寄存器描述、MQTT 主题。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub channel: String,
    pub args: Vec<String>,
}

impl Transaction {
    pub fn new(channel: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            channel: channel.into(),
            args,
        }
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// 监控点位句柄。
///
/// 点位由配置创建并挂到唯一一个通道调度器上，调度器只调整其到期时间，
/// 从不销毁它。到期时间与采集中标记使用原子量保存，驱动回调线程可直接访问。
#[derive(Debug)]
pub struct MonitorPoint {
    id: String,
    period_ms: i64,
    inputs: Vec<Transaction>,
    outputs: Vec<Transaction>,
    next_due_ms: AtomicI64,
    collecting: AtomicBool,
}

impl MonitorPoint {
    /// 新建点位，立即到期。负周期按 0 处理。
    pub fn new(id: impl Into<String>, period_ms: i64) -> Self {
        Self {
            id: id.into(),
            period_ms: period_ms.max(0),
            inputs: Vec::new(),
            outputs: Vec::new(),
            next_due_ms: AtomicI64::new(0),
            collecting: AtomicBool::new(false),
        }
    }

    pub fn with_input(mut self, transaction: Transaction) -> Self {
        self.inputs.push(transaction);
        self
    }

    pub fn with_output(mut self, transaction: Transaction) -> Self {
        self.outputs.push(transaction);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn period_ms(&self) -> i64 {
        self.period_ms
    }

    pub fn input_transactions(&self) -> &[Transaction] {
        &self.inputs
    }

    pub fn output_transactions(&self) -> &[Transaction] {
        &self.outputs
    }

    /// 返回路由到指定通道的输入关联。
    pub fn input_transactions_for(&self, channel: &str) -> Vec<&Transaction> {
        self.inputs
            .iter()
            .filter(|transaction| transaction.channel == channel)
            .collect()
    }

    /// 返回路由到指定通道的输出（控制）关联。
    pub fn output_transactions_for(&self, channel: &str) -> Vec<&Transaction> {
        self.outputs
            .iter()
            .filter(|transaction| transaction.channel == channel)
            .collect()
    }

    /// 所有输入关联涉及的通道名（去重，保持声明顺序）。
    pub fn input_channels(&self) -> Vec<&str> {
        let mut channels: Vec<&str> = Vec::new();
        for transaction in &self.inputs {
            if !channels.contains(&transaction.channel.as_str()) {
                channels.push(transaction.channel.as_str());
            }
        }
        channels
    }

    pub fn next_due_ms(&self) -> i64 {
        self.next_due_ms.load(Ordering::Acquire)
    }

    pub fn set_next_due_ms(&self, due_ms: i64) {
        self.next_due_ms.store(due_ms, Ordering::Release);
    }

    /// 采集完成（无论成功与否）后按周期计算下次到期时间。
    pub fn schedule_after(&self, now_ms: i64) {
        let next = if self.period_ms > 0 {
            now_ms.saturating_add(self.period_ms)
        } else {
            NEVER_DUE_MS
        };
        self.set_next_due_ms(next);
    }

    pub fn is_collecting(&self) -> bool {
        self.collecting.load(Ordering::Acquire)
    }

    pub fn set_collecting(&self, collecting: bool) {
        self.collecting.store(collecting, Ordering::Release);
    }
}
