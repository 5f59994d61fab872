//! # 采集调度核心
//!
//! 每个外部通道（一个 host:port、一条总线、一个消息代理）对应一个 [`Scheduler`]，
//! 由它决定何时采集哪些点位，并调用协议相关的 [`CollectorDriver`] 完成实际 IO。
//!
//! ```text
//! 配置（通道声明 + 点位声明）
//!       │
//!       ▼
//! ChannelRegistry ── name → Scheduler
//!       │
//!       ▼
//! Scheduler（每通道一个任务）
//!       │  DueQueue：按到期时间排序的点位
//!       │  连接状态机：Disconnected ⇄ Connected
//!       ▼
//! CollectorDriver::collect(batch)
//!       │
//!       ▼
//! PointEventSink → Pipeline
//! ```
//!
//! 同步驱动在 `collect` 内完成采集；异步驱动通过
//! [`DriverContext::asynch_collecting`] 标记在途点位，回调到达后调用
//! [`DriverContext::asynch_return`] 重新排期并唤醒调度循环。

mod channel;
mod driver;
mod due_queue;
mod error;
mod point;
mod registry;
mod scheduler;
mod sink;

pub use channel::DriverContext;
pub use driver::CollectorDriver;
pub use due_queue::DueQueue;
pub use error::{DriverError, RegistryError};
pub use point::ScheduledPoint;
pub use registry::ChannelRegistry;
pub use scheduler::{ChannelStatus, ConnectionState, Scheduler, SchedulerConfig};
pub use sink::{ChannelSink, NoopSink, PointEventSink};
