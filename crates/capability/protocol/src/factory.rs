//! 根据通道声明创建驱动。

use domain::MonitorPoint;
use ems_acquisition::CollectorDriver;
use ems_config::ChannelDefinition;

use crate::ascii_socket::AsciiSocketDriver;
use crate::error::ProtocolError;
use crate::modbus_tcp::ModbusTcpDriver;
use crate::mqtt::MqttSubscriberDriver;
use crate::simulator::{SimulatorConfig, SimulatorDriver};

/// 支持的驱动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    AsciiSocket,
    ModbusTcp,
    Simulator,
    MqttSubscriber,
}

impl DriverKind {
    /// 大小写不敏感，兼容 `ASCIISocket` 与 `ascii_socket` 两种写法。
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "asciisocket" => Some(Self::AsciiSocket),
            "modbustcp" | "modbus" => Some(Self::ModbusTcp),
            "simulator" => Some(Self::Simulator),
            "mqttsubscriber" | "mqtt" => Some(Self::MqttSubscriber),
            _ => None,
        }
    }
}

/// 创建完成的通道
pub struct BuiltChannel {
    /// 注册到通道表的名称
    pub name: String,
    pub driver: Box<dyn CollectorDriver<MonitorPoint>>,
    /// 驱动自带的点位（仅模拟器）
    pub points: Vec<MonitorPoint>,
}

impl std::fmt::Debug for BuiltChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltChannel")
            .field("name", &self.name)
            .field("driver", &self.driver.kind())
            .field("points", &self.points.len())
            .finish()
    }
}

/// 驱动工厂。模拟器按创建顺序编号（`simulator0`、`simulator1` …）。
#[derive(Debug, Default)]
pub struct DriverFactory {
    simulators: usize,
}

impl DriverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(&mut self, definition: &ChannelDefinition) -> Result<BuiltChannel, ProtocolError> {
        let kind = DriverKind::parse(&definition.kind)
            .ok_or_else(|| ProtocolError::UnknownKind(definition.kind.clone()))?;
        let args = &definition.args;
        let built = match kind {
            DriverKind::AsciiSocket => {
                let driver = AsciiSocketDriver::from_args(args)?;
                BuiltChannel {
                    name: driver.channel_name(),
                    driver: Box::new(driver),
                    points: Vec::new(),
                }
            }
            DriverKind::ModbusTcp => {
                let driver = ModbusTcpDriver::from_args(args)?;
                BuiltChannel {
                    name: driver.channel_name(),
                    driver: Box::new(driver),
                    points: Vec::new(),
                }
            }
            DriverKind::MqttSubscriber => {
                let driver = MqttSubscriberDriver::from_args(args)?;
                BuiltChannel {
                    name: driver.channel_name(),
                    driver: Box::new(driver),
                    points: Vec::new(),
                }
            }
            DriverKind::Simulator => {
                let config = SimulatorConfig::from_args(args)?;
                let driver = SimulatorDriver::new(self.simulators, config);
                self.simulators += 1;
                BuiltChannel {
                    name: driver.channel_name(),
                    points: driver.dummy_points(),
                    driver: Box::new(driver),
                }
            }
        };
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(kind: &str, args: &str) -> ChannelDefinition {
        ChannelDefinition {
            kind: kind.to_string(),
            args: args.split(':').map(str::to_string).collect(),
            line: 1,
        }
    }

    #[test]
    fn kind_parsing_is_flexible() {
        assert_eq!(DriverKind::parse("ASCIISocket"), Some(DriverKind::AsciiSocket));
        assert_eq!(DriverKind::parse("ascii_socket"), Some(DriverKind::AsciiSocket));
        assert_eq!(DriverKind::parse("ModbusTcp"), Some(DriverKind::ModbusTcp));
        assert_eq!(DriverKind::parse("mqtt_subscriber"), Some(DriverKind::MqttSubscriber));
        assert_eq!(DriverKind::parse("EPICS"), None);
    }

    #[test]
    fn builds_named_channels() {
        let mut factory = DriverFactory::new();
        let ascii = factory
            .build(&definition("ASCIISocket", "10.0.0.5:4001"))
            .expect("ascii");
        assert_eq!(ascii.name, "10.0.0.5:4001");
        assert_eq!(ascii.driver.kind(), "ascii_socket");

        let modbus = factory
            .build(&definition("modbus_tcp", "plc:502:1000"))
            .expect("modbus");
        assert_eq!(modbus.name, "modbus:plc:502");
    }

    #[test]
    fn simulators_are_numbered() {
        let mut factory = DriverFactory::new();
        let first = factory.build(&definition("Simulator", "2:1:3")).expect("sim");
        let second = factory.build(&definition("simulator", "1:1:3")).expect("sim");
        assert_eq!(first.name, "simulator0");
        assert_eq!(first.points.len(), 2);
        assert_eq!(second.name, "simulator1");
        assert_eq!(second.points[0].id(), "sim1.dummy.0");
    }

    #[test]
    fn rejects_unknown_kind_and_bad_args() {
        let mut factory = DriverFactory::new();
        assert!(matches!(
            factory.build(&definition("Telescope", "a:b")),
            Err(ProtocolError::UnknownKind(_))
        ));
        assert!(matches!(
            factory.build(&definition("ASCIISocket", "host")),
            Err(ProtocolError::ConfigParse(_))
        ));
    }
}
