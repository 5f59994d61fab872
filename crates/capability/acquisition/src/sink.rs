//! 点位事件出口。

use domain::PointEvent;
use tokio::sync::mpsc;
use tracing::debug;

/// 点位值更新事件的接收方。
///
/// 调度循环与驱动回调线程都会调用 `emit`，实现必须是非阻塞的。
pub trait PointEventSink: Send + Sync {
    fn emit(&self, event: PointEvent);
}

/// 空事件出口（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopSink;

impl PointEventSink for NoopSink {
    fn emit(&self, _event: PointEvent) {}
}

/// 基于无界通道的事件出口，接收端交给下游流水线消费。
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PointEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PointEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PointEventSink for ChannelSink {
    fn emit(&self, event: PointEvent) {
        if let Err(err) = self.tx.send(event) {
            debug!(
                target: "ems.acquisition",
                point_id = %err.0.point_id,
                "event receiver closed, dropping event"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(PointEvent::no_data("p1", 10));
        let event = rx.recv().await.expect("event");
        assert_eq!(event.point_id, "p1");
        assert!(event.is_no_data());
    }

    #[test]
    fn channel_sink_tolerates_closed_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(PointEvent::no_data("p1", 10));
    }
}
