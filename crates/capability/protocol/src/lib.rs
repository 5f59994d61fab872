//! # 采集驱动模块
//!
//! 提供 [`ems_acquisition::CollectorDriver`] 的具体实现：
//! - **ASCII Socket**：TCP 文本查询/响应（同步采集）
//! - **Modbus TCP**：读取从设备寄存器（同步采集）
//! - **MQTT 订阅**：等待主题消息（异步采集）
//! - **模拟器**：随机值
//!
//! ## 架构设计
//!
//! ```text
//! 通道声明（kind + args）
//!       │
//!       ▼
//! DriverFactory::build
//!       │
//!       ├── AsciiSocketDriver     →  host:port
//!       ├── ModbusTcpDriver       →  modbus:host:port
//!       ├── MqttSubscriberDriver  →  mqtt:host:port
//!       └── SimulatorDriver       →  simulatorN
//!       │
//!       ▼
//! Scheduler（每通道一个） → PointEventSink
//! ```
//!
//! ## Transaction 约定
//!
//! 点位通过 transaction 把参数路由到某个通道（通道名见上图）：
//!
//! | 驱动 | 输入 | 输出 |
//! |------|------|------|
//! | ASCII Socket | `query[:expected_lines]` | `command`（`$V` 为下发值） |
//! | Modbus TCP | `unit:fc:register[:count[:type]]` | `unit:register` |
//! | MQTT 订阅 | `topic` | - |

mod ascii_socket;
mod error;
mod factory;
mod modbus_tcp;
mod mqtt;
mod simulator;
mod types;

pub use ascii_socket::AsciiSocketDriver;
pub use error::ProtocolError;
pub use factory::{BuiltChannel, DriverFactory, DriverKind};
pub use modbus_tcp::{ModbusTcpDriver, decode_registers};
pub use mqtt::{MqttSubscriberConfig, MqttSubscriberDriver};
pub use simulator::{SimulatorConfig, SimulatorDriver};
pub use types::{
    DEFAULT_TIMEOUT_MS, Endpoint, ModbusDataType, ModbusFunctionCode, ModbusPointDetail,
    ModbusWriteTarget,
};
