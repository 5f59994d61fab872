//! 通道与点位装配
//!
//! 读取通道声明与点位声明，逐条创建驱动和调度器并注册到 [`ChannelRegistry`]。
//! 单条声明出错只记录日志并跳过，不影响其余通道。

use domain::{MonitorPoint, Transaction};
use ems_acquisition::{ChannelRegistry, PointEventSink, Scheduler, SchedulerConfig};
use ems_config::{
    AppConfig, ChannelDefinition, ConfigError, PointDefinition, load_channel_definitions,
    load_point_definitions,
};
use ems_protocol::DriverFactory;
use std::sync::Arc;
use tracing::{error, info, warn};

pub type Registry = ChannelRegistry<MonitorPoint>;

pub fn scheduler_config(config: &AppConfig) -> SchedulerConfig {
    SchedulerConfig {
        batch_window_ms: i64::try_from(config.batch_window_ms).unwrap_or(i64::MAX),
        disconnected_backoff: config.disconnected_backoff(),
        in_flight_timeout: config.in_flight_timeout(),
    }
}

/// 按配置文件构造注册表（尚未启动采集）。
pub fn load_registry(
    config: &AppConfig,
    sink: Arc<dyn PointEventSink>,
) -> Result<Arc<Registry>, ConfigError> {
    let channels = load_channel_definitions(&config.channels_file)?;
    let points = match &config.points_file {
        Some(path) => load_point_definitions(path)?,
        None => Vec::new(),
    };
    let registry = Arc::new(Registry::new());
    register_channels(&registry, &channels, sink, &scheduler_config(config));
    assign_points(&registry, &points);
    info!(
        target: "ems.gateway",
        channels = registry.num_channels(),
        "registry ready"
    );
    Ok(registry)
}

/// 为每条通道声明创建调度器；驱动自带的点位一并分配。
pub fn register_channels(
    registry: &Registry,
    definitions: &[ChannelDefinition],
    sink: Arc<dyn PointEventSink>,
    config: &SchedulerConfig,
) {
    let mut factory = DriverFactory::new();
    for definition in definitions {
        let built = match factory.build(definition) {
            Ok(built) => built,
            Err(err) => {
                error!(
                    target: "ems.gateway",
                    line = definition.line,
                    kind = %definition.kind,
                    error = %err,
                    "channel declaration rejected"
                );
                continue;
            }
        };
        let scheduler = Scheduler::new(
            built.name.clone(),
            built.driver,
            sink.clone(),
            config.clone(),
        );
        if let Err(err) = registry.register_channel(built.name.clone(), scheduler) {
            error!(
                target: "ems.gateway",
                line = definition.line,
                error = %err,
                "channel declaration rejected"
            );
            continue;
        }
        for point in built.points {
            if let Err(err) = registry.assign_point(&built.name, Arc::new(point)) {
                warn!(target: "ems.gateway", error = %err, "driver point not assigned");
            }
        }
    }
}

/// 把声明文件中的点位分配到其通道。
pub fn assign_points(registry: &Registry, definitions: &[PointDefinition]) {
    for definition in definitions {
        let point = monitor_point(definition);
        if let Err(err) = registry.assign_point(&definition.channel, Arc::new(point)) {
            warn!(
                target: "ems.gateway",
                point_id = %definition.id,
                error = %err,
                "point not assigned"
            );
        }
    }
}

fn monitor_point(definition: &PointDefinition) -> MonitorPoint {
    let mut point = MonitorPoint::new(definition.id.clone(), definition.period_ms);
    for args in definition.input_args() {
        point = point.with_input(Transaction::new(definition.channel.clone(), args));
    }
    for args in definition.output_args() {
        point = point.with_output(Transaction::new(definition.channel.clone(), args));
    }
    point
}

#[cfg(test)]
mod tests {
    use super::*;
    use ems_acquisition::NoopSink;
    use ems_config::{parse_channel_definitions, parse_point_definitions};

    const CHANNELS: &str = "\
# 两个模拟器 + 一个文本设备
Simulator    3:1:5
Simulator    1:1:1
ASCIISocket  127.0.0.1:4001
ASCIISocket  127.0.0.1:4001
Bogus        1:2
Sim$ulator   2:1:1
";

    const POINTS: &str = r#"[
        {"id": "room.temp", "period_ms": 2000, "channel": "127.0.0.1:4001",
         "input": ["TEMP?\\n"], "output": ["SET $V\\n"]},
        {"id": "orphan", "period_ms": 1000, "channel": "modbus:10.0.0.1:502"}
    ]"#;

    fn registry() -> Registry {
        let registry = Registry::new();
        let channels = parse_channel_definitions(CHANNELS);
        register_channels(&registry, &channels, Arc::new(NoopSink), &SchedulerConfig::default());
        registry
    }

    #[test]
    fn bad_and_duplicate_declarations_are_skipped() {
        let registry = registry();
        assert_eq!(
            registry.channel_names(),
            vec!["127.0.0.1:4001", "simulator0", "simulator1"]
        );
        let simulator = registry.lookup_channel("simulator0").expect("simulator");
        assert_eq!(simulator.num_points(), 3);
        assert_eq!(registry.point_owner("sim1.dummy.0").as_deref(), Some("simulator1"));
    }

    #[test]
    fn declared_points_are_routed_to_their_channel() {
        let registry = registry();
        let points = parse_point_definitions(POINTS).expect("points");
        assign_points(&registry, &points);

        assert_eq!(registry.point_owner("room.temp").as_deref(), Some("127.0.0.1:4001"));
        assert_eq!(registry.point_owner("orphan"), None);
        let channel = registry.lookup_channel("127.0.0.1:4001").expect("channel");
        let point = channel.point("room.temp").expect("point");
        assert_eq!(point.input_transactions_for("127.0.0.1:4001").len(), 1);
        assert_eq!(point.output_transactions_for("127.0.0.1:4001").len(), 1);
        assert_eq!(point.period_ms(), 2000);
    }

    #[test]
    fn scheduler_config_follows_app_config() {
        let config = AppConfig {
            http_addr: "127.0.0.1:0".to_string(),
            http_enabled: false,
            channels_file: "channels.txt".to_string(),
            points_file: None,
            batch_window_ms: 20,
            disconnected_backoff_ms: 250,
            in_flight_timeout_ms: Some(3000),
            pipeline_batch_size: 10,
            pipeline_dedup_cache_size: 10,
        };
        let scheduler = scheduler_config(&config);
        assert_eq!(scheduler.batch_window_ms, 20);
        assert_eq!(scheduler.disconnected_backoff.as_millis(), 250);
        assert_eq!(scheduler.in_flight_timeout.map(|t| t.as_millis()), Some(3000));
    }
}
