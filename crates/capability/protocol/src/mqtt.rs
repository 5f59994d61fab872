//! MQTT 订阅驱动（异步采集）
//!
//! `collect` 只登记等待中的点位并按需订阅主题，真正的值由事件循环任务在
//! 收到主题消息时发出，随后归还点位。
//!
//! - 通道参数：`host:port[:client_id]`，通道名为 `mqtt:host:port`
//! - 输入 transaction：`topic`（精确匹配）

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use domain::{MonitorPoint, PointValueData};
use ems_acquisition::{CollectorDriver, DriverContext, DriverError};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ProtocolError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 主题 → 等待该主题下一条消息的点位
type Waiting = Arc<Mutex<HashMap<String, Vec<Arc<MonitorPoint>>>>>;

/// MQTT 订阅参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSubscriberConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

impl MqttSubscriberConfig {
    pub fn from_args(args: &[String]) -> Result<Self, ProtocolError> {
        let host = args
            .first()
            .map(|host| host.trim())
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ProtocolError::ConfigParse("missing host".to_string()))?;
        let port = match args.get(1) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ProtocolError::ConfigParse(format!("invalid port: {raw}")))?,
            None => 1883,
        };
        let client_id = args
            .get(2)
            .filter(|id| !id.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("ems-gateway-{}", uuid::Uuid::new_v4().simple()));
        Ok(Self {
            host: host.to_string(),
            port,
            client_id,
        })
    }
}

struct MqttSession {
    client: AsyncClient,
    subscribed: HashSet<String>,
    task: JoinHandle<()>,
}

/// MQTT 订阅采集驱动
pub struct MqttSubscriberDriver {
    config: MqttSubscriberConfig,
    waiting: Waiting,
    session: Option<MqttSession>,
}

impl MqttSubscriberDriver {
    pub fn new(config: MqttSubscriberConfig) -> Self {
        Self {
            config,
            waiting: Arc::new(Mutex::new(HashMap::new())),
            session: None,
        }
    }

    pub fn from_args(args: &[String]) -> Result<Self, ProtocolError> {
        Ok(Self::new(MqttSubscriberConfig::from_args(args)?))
    }

    pub fn channel_name(&self) -> String {
        format!("mqtt:{}:{}", self.config.host, self.config.port)
    }

    /// 登记点位等待 `topic` 的下一条消息。
    ///
    /// 同一点位只保留一条登记：在途超时后重新采集时替换旧登记。
    fn wait_for(&self, topic: &str, point: Arc<MonitorPoint>) {
        let mut waiting = self.waiting.lock().unwrap_or_else(PoisonError::into_inner);
        waiting.retain(|_, points| {
            points.retain(|waiter| waiter.id() != point.id());
            !points.is_empty()
        });
        waiting.entry(topic.to_string()).or_default().push(point);
    }
}

/// 归还所有等待中的点位，并为其发出 no-data。
fn release_waiting(waiting: &Waiting, ctx: &DriverContext<MonitorPoint>) {
    let drained: Vec<Arc<MonitorPoint>> = waiting
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .flat_map(|(_, points)| points)
        .collect();
    for point in drained {
        ctx.emit_no_data(point.id());
        ctx.asynch_return(&point);
    }
}

async fn run_event_loop(mut eventloop: EventLoop, waiting: Waiting, ctx: DriverContext<MonitorPoint>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let points = waiting
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(publish.topic.as_str())
                    .unwrap_or_default();
                if points.is_empty() {
                    continue;
                }
                let text = String::from_utf8_lossy(&publish.payload);
                let value = PointValueData::parse_text(&text);
                for point in points {
                    ctx.emit_value(point.id(), value.clone());
                    ctx.asynch_return(&point);
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    target: "ems.protocol",
                    channel = %ctx.channel_name(),
                    error = %err,
                    "mqtt event loop failed"
                );
                ctx.mark_disconnected();
                release_waiting(&waiting, &ctx);
                return;
            }
        }
    }
}

#[async_trait]
impl CollectorDriver<MonitorPoint> for MqttSubscriberDriver {
    fn kind(&self) -> &'static str {
        "mqtt_subscriber"
    }

    async fn connect(&mut self, ctx: &DriverContext<MonitorPoint>) -> Result<bool, DriverError> {
        if let Some(session) = &self.session {
            if !session.task.is_finished() {
                return Ok(true);
            }
            self.session = None;
        }
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(options, 64);

        // 等到 ConnAck 才视为已连接
        let connected = tokio::time::timeout(CONNECT_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(err) => return Err(ProtocolError::Connection(err.to_string())),
                }
            }
        })
        .await
        .map_err(|_| ProtocolError::Timeout("mqtt connack".to_string()))?;
        connected?;

        let task = tokio::spawn(run_event_loop(eventloop, Arc::clone(&self.waiting), ctx.clone()));
        self.session = Some(MqttSession {
            client,
            subscribed: HashSet::new(),
            task,
        });
        info!(
            target: "ems.protocol",
            host = %self.config.host,
            port = self.config.port,
            "connected to mqtt broker"
        );
        Ok(true)
    }

    async fn disconnect(&mut self, ctx: &DriverContext<MonitorPoint>) -> Result<(), DriverError> {
        if let Some(session) = self.session.take() {
            if let Err(err) = session.client.disconnect().await {
                debug!(target: "ems.protocol", error = %err, "mqtt disconnect failed");
            }
            session.task.abort();
        }
        release_waiting(&self.waiting, ctx);
        Ok(())
    }

    async fn collect(
        &mut self,
        points: &[Arc<MonitorPoint>],
        ctx: &DriverContext<MonitorPoint>,
    ) -> Result<(), DriverError> {
        match &self.session {
            Some(session) if !session.task.is_finished() => {}
            _ => {
                self.session = None;
                return Err(DriverError::NotConnected);
            }
        }
        for point in points {
            let topic = point
                .input_transactions_for(ctx.channel_name())
                .first()
                .and_then(|transaction| transaction.arg(0))
                .map(str::to_string);
            let Some(topic) = topic else {
                warn!(target: "ems.protocol", point_id = %point.id(), "no topic for point");
                ctx.emit_no_data(point.id());
                continue;
            };
            if !ctx.asynch_collecting(point) {
                continue;
            }
            self.wait_for(&topic, Arc::clone(point));

            let session = self.session.as_mut().ok_or(DriverError::NotConnected)?;
            if session.subscribed.insert(topic.clone()) {
                if let Err(err) = session.client.subscribe(topic.as_str(), QoS::AtMostOnce).await {
                    session.subscribed.remove(&topic);
                    return Err(ProtocolError::Mqtt(err.to_string()).into());
                }
                debug!(target: "ems.protocol", topic = %topic, "subscribed");
            }
        }
        Ok(())
    }
}
