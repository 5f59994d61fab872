//! 采集驱动契约。

use std::sync::Arc;

use async_trait::async_trait;
use domain::PointValueData;
use tracing::warn;

use crate::channel::DriverContext;
use crate::error::DriverError;
use crate::point::ScheduledPoint;

/// 协议驱动。
///
/// 调度器对每个通道持有一个驱动实例，所有调用串行执行（驱动本身不需要 `Sync`）。
///
/// `collect` 有两种完成方式：
/// - 同步：在返回前通过 `ctx.emit_*` 发出每个点位的事件；
/// - 异步：对点位调用 `ctx.asynch_collecting`，结果到达后在任意任务/线程中
///   调用 `ctx.asynch_return` 归还。
///
/// 返回 `Err` 视为连接已断开，调度器会断开驱动并在下一轮重新连接。
#[async_trait]
pub trait CollectorDriver<P: ScheduledPoint>: Send {
    fn kind(&self) -> &'static str;

    /// 建立连接。`Ok(false)` 表示本轮未能连接（不视为错误）。
    async fn connect(&mut self, ctx: &DriverContext<P>) -> Result<bool, DriverError>;

    async fn disconnect(&mut self, ctx: &DriverContext<P>) -> Result<(), DriverError>;

    async fn collect(&mut self, points: &[Arc<P>], ctx: &DriverContext<P>)
    -> Result<(), DriverError>;

    /// 下发控制值。默认不支持：记录告警并忽略。
    async fn write(
        &mut self,
        point: &Arc<P>,
        value: &PointValueData,
        ctx: &DriverContext<P>,
    ) -> Result<(), DriverError> {
        warn!(
            target: "ems.acquisition",
            channel = %ctx.channel_name(),
            driver = %self.kind(),
            point_id = %point.id(),
            value = %value,
            "unsupported control request"
        );
        Ok(())
    }
}
