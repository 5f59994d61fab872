//! 通道地址与 Modbus 点位参数

use std::str::FromStr;
use std::time::Duration;

use crate::error::ProtocolError;

/// 默认的连接/读取超时（毫秒）
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// 远端地址，来自通道声明参数：`host:port[:timeout_ms]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

impl Endpoint {
    pub fn from_args(args: &[String]) -> Result<Self, ProtocolError> {
        let host = args
            .first()
            .map(|host| host.trim())
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ProtocolError::ConfigParse("missing host".to_string()))?;
        let port = parse_field::<u16>(args, 1, "port")?;
        let timeout_ms = match args.get(2) {
            Some(_) => parse_field::<u64>(args, 2, "timeout_ms")?,
            None => DEFAULT_TIMEOUT_MS,
        };
        Ok(Self {
            host: host.to_string(),
            port,
            timeout_ms,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Modbus 寄存器数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModbusDataType {
    /// 16位有符号整数
    #[default]
    Int16,
    /// 16位无符号整数
    Uint16,
    /// 32位有符号整数（2个寄存器）
    Int32,
    /// 32位无符号整数（2个寄存器）
    Uint32,
    /// 32位浮点数（2个寄存器）
    Float32,
    /// 64位浮点数（4个寄存器）
    Float64,
}

impl ModbusDataType {
    /// 该类型占用的寄存器数量
    pub fn register_count(self) -> u16 {
        match self {
            Self::Int16 | Self::Uint16 => 1,
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
            Self::Float64 => 4,
        }
    }
}

impl FromStr for ModbusDataType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int16" | "i16" => Ok(Self::Int16),
            "uint16" | "u16" => Ok(Self::Uint16),
            "int32" | "i32" => Ok(Self::Int32),
            "uint32" | "u32" => Ok(Self::Uint32),
            "float32" | "f32" | "float" => Ok(Self::Float32),
            "float64" | "f64" | "double" => Ok(Self::Float64),
            other => Err(ProtocolError::ConfigParse(format!(
                "unknown modbus data type: {other}"
            ))),
        }
    }
}

/// Modbus 功能码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModbusFunctionCode {
    /// 读线圈状态 (0x01)
    ReadCoils = 1,
    /// 读离散输入 (0x02)
    ReadDiscreteInputs = 2,
    /// 读保持寄存器 (0x03)
    #[default]
    ReadHoldingRegisters = 3,
    /// 读输入寄存器 (0x04)
    ReadInputRegisters = 4,
}

impl TryFrom<u8> for ModbusFunctionCode {
    type Error = ProtocolError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::ReadCoils),
            2 => Ok(Self::ReadDiscreteInputs),
            3 => Ok(Self::ReadHoldingRegisters),
            4 => Ok(Self::ReadInputRegisters),
            other => Err(ProtocolError::ConfigParse(format!(
                "unsupported function code: {other}"
            ))),
        }
    }
}

/// 点位读取参数，来自输入 transaction：`unit_id:function_code:register[:count[:data_type]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusPointDetail {
    pub unit_id: u8,
    pub function_code: ModbusFunctionCode,
    pub register_address: u16,
    pub register_count: u16,
    pub data_type: ModbusDataType,
}

impl ModbusPointDetail {
    pub fn from_args(args: &[String]) -> Result<Self, ProtocolError> {
        let unit_id = parse_field::<u8>(args, 0, "unit_id")?;
        let function_code = ModbusFunctionCode::try_from(parse_field::<u8>(args, 1, "function_code")?)?;
        let register_address = parse_field::<u16>(args, 2, "register")?;
        let data_type = match args.get(4) {
            Some(raw) => raw.parse::<ModbusDataType>()?,
            None => ModbusDataType::default(),
        };
        let register_count = match args.get(3) {
            Some(_) => parse_field::<u16>(args, 3, "count")?,
            None => data_type.register_count(),
        };
        if register_count == 0 {
            return Err(ProtocolError::ConfigParse("register count must be > 0".to_string()));
        }
        Ok(Self {
            unit_id,
            function_code,
            register_address,
            register_count,
            data_type,
        })
    }
}

/// 控制写入目标，来自输出 transaction：`unit_id:register`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusWriteTarget {
    pub unit_id: u8,
    pub register_address: u16,
}

impl ModbusWriteTarget {
    pub fn from_args(args: &[String]) -> Result<Self, ProtocolError> {
        Ok(Self {
            unit_id: parse_field::<u8>(args, 0, "unit_id")?,
            register_address: parse_field::<u16>(args, 1, "register")?,
        })
    }
}

fn parse_field<T: FromStr>(args: &[String], index: usize, name: &str) -> Result<T, ProtocolError> {
    let raw = args
        .get(index)
        .ok_or_else(|| ProtocolError::ConfigParse(format!("missing {name}")))?;
    raw.trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigParse(format!("invalid {name}: {raw}")))
}
