//! 模拟器驱动：为点位生成随机值，用于联调与压测。
//!
//! 通道参数：`count:min_period_s:max_period_s`，通道名为 `simulatorN`。

use std::sync::Arc;

use async_trait::async_trait;
use domain::{MonitorPoint, PointValueData, Transaction};
use ems_acquisition::{CollectorDriver, DriverContext, DriverError};
use rand_core::{OsRng, RngCore};

use crate::error::ProtocolError;

/// 模拟器参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatorConfig {
    /// 需要创建的模拟点位数量
    pub dummy_points: usize,
    pub min_period_s: u64,
    pub max_period_s: u64,
}

impl SimulatorConfig {
    pub fn from_args(args: &[String]) -> Result<Self, ProtocolError> {
        let field = |index: usize, name: &str| -> Result<u64, ProtocolError> {
            let raw = args
                .get(index)
                .ok_or_else(|| ProtocolError::ConfigParse(format!("missing {name}")))?;
            raw.trim()
                .parse::<u64>()
                .map_err(|_| ProtocolError::ConfigParse(format!("invalid {name}: {raw}")))
        };
        let dummy_points = usize::try_from(field(0, "count")?)
            .map_err(|_| ProtocolError::ConfigParse("count too large".to_string()))?;
        let min_period_s = field(1, "min_period_s")?;
        let max_period_s = field(2, "max_period_s")?;
        if min_period_s == 0 || max_period_s < min_period_s {
            return Err(ProtocolError::ConfigParse(format!(
                "invalid period range {min_period_s}..{max_period_s}"
            )));
        }
        Ok(Self {
            dummy_points,
            min_period_s,
            max_period_s,
        })
    }
}

/// 模拟器采集驱动
pub struct SimulatorDriver {
    index: usize,
    config: SimulatorConfig,
}

impl SimulatorDriver {
    pub fn new(index: usize, config: SimulatorConfig) -> Self {
        Self { index, config }
    }

    pub fn channel_name(&self) -> String {
        format!("simulator{}", self.index)
    }

    /// 生成本模拟器的模拟点位（`sim{N}.dummy.{i}`），周期在配置范围内随机。
    pub fn dummy_points(&self) -> Vec<MonitorPoint> {
        let channel = self.channel_name();
        let span = self.config.max_period_s - self.config.min_period_s;
        (0..self.config.dummy_points)
            .map(|i| {
                let jitter = if span == 0 { 0 } else { OsRng.next_u64() % span };
                let period_s = self.config.min_period_s + jitter;
                let period_ms = i64::try_from(period_s.saturating_mul(1000)).unwrap_or(i64::MAX);
                MonitorPoint::new(format!("sim{}.dummy.{i}", self.index), period_ms)
                    .with_input(Transaction::new(channel.clone(), Vec::new()))
            })
            .collect()
    }
}

/// [0, 1) 区间的随机数
fn random_unit() -> f64 {
    f64::from(OsRng.next_u32() >> 8) / f64::from(1u32 << 24)
}

#[async_trait]
impl CollectorDriver<MonitorPoint> for SimulatorDriver {
    fn kind(&self) -> &'static str {
        "simulator"
    }

    async fn connect(&mut self, _ctx: &DriverContext<MonitorPoint>) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn disconnect(&mut self, _ctx: &DriverContext<MonitorPoint>) -> Result<(), DriverError> {
        Ok(())
    }

    async fn collect(
        &mut self,
        points: &[Arc<MonitorPoint>],
        ctx: &DriverContext<MonitorPoint>,
    ) -> Result<(), DriverError> {
        for point in points {
            ctx.emit_value(point.id(), PointValueData::F64(random_unit()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &str) -> Vec<String> {
        raw.split(':').map(str::to_string).collect()
    }

    #[test]
    fn dummy_points_follow_period_range() {
        let config = SimulatorConfig::from_args(&args("4:2:5")).expect("config");
        let driver = SimulatorDriver::new(1, config);
        let points = driver.dummy_points();
        assert_eq!(points.len(), 4);
        assert_eq!(points[0].id(), "sim1.dummy.0");
        assert!(points
            .iter()
            .all(|p| (2000..5000).contains(&p.period_ms())));
        assert_eq!(points[3].input_channels(), vec!["simulator1"]);
    }

    #[test]
    fn rejects_inverted_period_range() {
        assert!(SimulatorConfig::from_args(&args("1:5:2")).is_err());
        assert!(SimulatorConfig::from_args(&args("1:0:2")).is_err());
        assert!(SimulatorConfig::from_args(&args("1")).is_err());
    }

    #[test]
    fn random_values_stay_in_unit_range() {
        for _ in 0..100 {
            let value = random_unit();
            assert!((0.0..1.0).contains(&value));
        }
    }
}
