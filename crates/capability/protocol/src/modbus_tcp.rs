//! Modbus TCP 驱动
//!
//! 每个批次内按点位依次读取寄存器。
//!
//! - 通道参数：`host:port[:timeout_ms]`，通道名为 `modbus:host:port`
//! - 输入 transaction：`unit_id:function_code:register[:count[:data_type]]`
//! - 输出 transaction：`unit_id:register`（写单个保持寄存器）
//!
//! 从站返回的异常码只影响对应点位（发出 no-data），传输层错误使整个批次失败。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{MonitorPoint, PointValueData};
use ems_acquisition::{CollectorDriver, DriverContext, DriverError};
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::types::{Endpoint, ModbusDataType, ModbusFunctionCode, ModbusPointDetail, ModbusWriteTarget};

/// 单个点位的读取结果
enum ReadOutcome {
    Value(PointValueData),
    /// 从站异常或数据无法解析
    NoData(String),
}

/// Modbus TCP 采集驱动
pub struct ModbusTcpDriver {
    endpoint: Endpoint,
    ctx: Option<Context>,
}

impl ModbusTcpDriver {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ctx: None,
        }
    }

    pub fn from_args(args: &[String]) -> Result<Self, ProtocolError> {
        Ok(Self::new(Endpoint::from_args(args)?))
    }

    pub fn channel_name(&self) -> String {
        format!("modbus:{}", self.endpoint.address())
    }

    fn context(&mut self) -> Result<&mut Context, ProtocolError> {
        self.ctx
            .as_mut()
            .ok_or_else(|| ProtocolError::Connection("not connected".to_string()))
    }

    /// 读取单个点位
    async fn read_point(&mut self, detail: &ModbusPointDetail) -> Result<ReadOutcome, ProtocolError> {
        let timeout = self.endpoint.timeout();
        let ctx = self.context()?;
        ctx.set_slave(Slave(detail.unit_id));

        let address = detail.register_address;
        let count = detail.register_count;
        let outcome = match detail.function_code {
            ModbusFunctionCode::ReadHoldingRegisters => {
                let response = tokio::time::timeout(timeout, ctx.read_holding_registers(address, count))
                    .await
                    .map_err(|_| ProtocolError::Timeout("read holding registers".to_string()))?
                    .map_err(|e| ProtocolError::Modbus(e.to_string()))?;
                registers_outcome(response, detail.data_type)
            }
            ModbusFunctionCode::ReadInputRegisters => {
                let response = tokio::time::timeout(timeout, ctx.read_input_registers(address, count))
                    .await
                    .map_err(|_| ProtocolError::Timeout("read input registers".to_string()))?
                    .map_err(|e| ProtocolError::Modbus(e.to_string()))?;
                registers_outcome(response, detail.data_type)
            }
            ModbusFunctionCode::ReadCoils => {
                let response = tokio::time::timeout(timeout, ctx.read_coils(address, count))
                    .await
                    .map_err(|_| ProtocolError::Timeout("read coils".to_string()))?
                    .map_err(|e| ProtocolError::Modbus(e.to_string()))?;
                bits_outcome(response)
            }
            ModbusFunctionCode::ReadDiscreteInputs => {
                let response = tokio::time::timeout(timeout, ctx.read_discrete_inputs(address, count))
                    .await
                    .map_err(|_| ProtocolError::Timeout("read discrete inputs".to_string()))?
                    .map_err(|e| ProtocolError::Modbus(e.to_string()))?;
                bits_outcome(response)
            }
        };
        Ok(outcome)
    }
}

fn registers_outcome<E: std::fmt::Debug>(
    response: Result<Vec<u16>, E>,
    data_type: ModbusDataType,
) -> ReadOutcome {
    match response {
        Ok(registers) => match decode_registers(&registers, data_type) {
            Ok(value) => ReadOutcome::Value(value),
            Err(err) => ReadOutcome::NoData(err.to_string()),
        },
        Err(exception) => ReadOutcome::NoData(format!("exception: {exception:?}")),
    }
}

fn bits_outcome<E: std::fmt::Debug>(response: Result<Vec<bool>, E>) -> ReadOutcome {
    match response {
        Ok(bits) => match bits.first() {
            Some(bit) => ReadOutcome::Value(PointValueData::Bool(*bit)),
            None => ReadOutcome::NoData("empty response".to_string()),
        },
        Err(exception) => ReadOutcome::NoData(format!("exception: {exception:?}")),
    }
}

/// 解析寄存器数据（高位寄存器在前）
pub fn decode_registers(
    registers: &[u16],
    data_type: ModbusDataType,
) -> Result<PointValueData, ProtocolError> {
    let needed = usize::from(data_type.register_count());
    if registers.len() < needed {
        return Err(ProtocolError::DataParse(format!(
            "need {needed} registers for {data_type:?}, got {}",
            registers.len()
        )));
    }

    let value = match data_type {
        ModbusDataType::Int16 => PointValueData::I64(i64::from(registers[0] as i16)),
        ModbusDataType::Uint16 => PointValueData::I64(i64::from(registers[0])),
        ModbusDataType::Int32 => {
            let bits = (u32::from(registers[0]) << 16) | u32::from(registers[1]);
            PointValueData::I64(i64::from(bits as i32))
        }
        ModbusDataType::Uint32 => {
            let bits = (u32::from(registers[0]) << 16) | u32::from(registers[1]);
            PointValueData::I64(i64::from(bits))
        }
        ModbusDataType::Float32 => {
            let bits = (u32::from(registers[0]) << 16) | u32::from(registers[1]);
            PointValueData::F64(f64::from(f32::from_bits(bits)))
        }
        ModbusDataType::Float64 => {
            let bits = registers[..4]
                .iter()
                .fold(0u64, |acc, register| (acc << 16) | u64::from(*register));
            PointValueData::F64(f64::from_bits(bits))
        }
    };

    Ok(value)
}

/// 控制值转换为单个寄存器值（负数按补码写入）
fn register_value(value: &PointValueData) -> Result<u16, ProtocolError> {
    let raw = value
        .as_f64()
        .ok_or_else(|| ProtocolError::DataParse(format!("not a number: {value}")))?
        .round();
    if !(f64::from(i16::MIN)..=f64::from(u16::MAX)).contains(&raw) {
        return Err(ProtocolError::DataParse(format!("out of register range: {raw}")));
    }
    let raw = raw as i32;
    Ok(if raw < 0 { raw as i16 as u16 } else { raw as u16 })
}

#[async_trait]
impl CollectorDriver<MonitorPoint> for ModbusTcpDriver {
    fn kind(&self) -> &'static str {
        "modbus_tcp"
    }

    async fn connect(&mut self, _ctx: &DriverContext<MonitorPoint>) -> Result<bool, DriverError> {
        if self.ctx.is_some() {
            return Ok(true);
        }
        let address = self.endpoint.address();
        let socket_addr = tokio::net::lookup_host(&address)
            .await
            .map_err(|e| ProtocolError::Connection(format!("{address}: {e}")))?
            .next()
            .ok_or_else(|| ProtocolError::Connection(format!("{address}: no address")))?;
        let ctx = tokio::time::timeout(self.endpoint.timeout(), tcp::connect(socket_addr))
            .await
            .map_err(|_| ProtocolError::Timeout(format!("connect {address}")))?
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        self.ctx = Some(ctx);
        info!(target: "ems.protocol", address = %address, "connected to modbus server");
        Ok(true)
    }

    async fn disconnect(&mut self, _ctx: &DriverContext<MonitorPoint>) -> Result<(), DriverError> {
        // 丢弃 Context 即关闭底层连接
        self.ctx = None;
        Ok(())
    }

    async fn collect(
        &mut self,
        points: &[Arc<MonitorPoint>],
        ctx: &DriverContext<MonitorPoint>,
    ) -> Result<(), DriverError> {
        for point in points {
            let detail = point
                .input_transactions_for(ctx.channel_name())
                .first()
                .ok_or_else(|| ProtocolError::ConfigParse("no input transaction".to_string()))
                .and_then(|transaction| ModbusPointDetail::from_args(&transaction.args));
            let detail = match detail {
                Ok(detail) => detail,
                Err(err) => {
                    warn!(target: "ems.protocol", point_id = %point.id(), error = %err, "invalid modbus point");
                    ctx.emit_no_data(point.id());
                    continue;
                }
            };

            match self.read_point(&detail).await? {
                ReadOutcome::Value(value) => {
                    debug!(
                        target: "ems.protocol",
                        point_id = %point.id(),
                        slave = detail.unit_id,
                        register = detail.register_address,
                        value = %value,
                        "read modbus point"
                    );
                    ctx.emit_value(point.id(), value);
                }
                ReadOutcome::NoData(reason) => {
                    warn!(
                        target: "ems.protocol",
                        point_id = %point.id(),
                        slave = detail.unit_id,
                        register = detail.register_address,
                        reason = %reason,
                        "modbus point unavailable"
                    );
                    ctx.emit_no_data(point.id());
                }
            }
        }
        Ok(())
    }

    async fn write(
        &mut self,
        point: &Arc<MonitorPoint>,
        value: &PointValueData,
        ctx: &DriverContext<MonitorPoint>,
    ) -> Result<(), DriverError> {
        let target = point
            .output_transactions_for(ctx.channel_name())
            .first()
            .ok_or_else(|| ProtocolError::ConfigParse("no output transaction".to_string()))
            .and_then(|transaction| ModbusWriteTarget::from_args(&transaction.args))?;
        let register = register_value(value)?;
        let timeout = self.endpoint.timeout();
        let modbus = self.context()?;
        modbus.set_slave(Slave(target.unit_id));
        tokio::time::timeout(timeout, modbus.write_single_register(target.register_address, register))
            .await
            .map_err(|_| ProtocolError::Timeout("write single register".to_string()))?
            .map_err(|e| ProtocolError::Modbus(e.to_string()))?
            .map_err(|e| ProtocolError::Modbus(format!("exception: {e:?}")))?;
        Ok(())
    }
}
