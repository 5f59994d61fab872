//! 通道注册表：名称 → 调度器。

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use domain::PointValueData;
use tracing::info;

use crate::error::RegistryError;
use crate::point::ScheduledPoint;
use crate::scheduler::{ChannelStatus, Scheduler};

/// 进程内的通道注册表。
///
/// 启动时构造、停机时 `clear`；测试中可任意实例化。同时维护点位归属，
/// 保证一个点位同一时刻只属于一个调度器。
pub struct ChannelRegistry<P: ScheduledPoint> {
    channels: RwLock<HashMap<String, Arc<Scheduler<P>>>>,
    owners: RwLock<HashMap<String, String>>,
}

impl<P: ScheduledPoint> ChannelRegistry<P> {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// 注册通道。同名通道已存在时返回错误。
    pub fn register_channel(
        &self,
        name: impl Into<String>,
        scheduler: Arc<Scheduler<P>>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if channels.contains_key(&name) {
            return Err(RegistryError::DuplicateChannel(name));
        }
        info!(
            target: "ems.acquisition",
            channel = %name,
            driver = %scheduler.driver_kind(),
            "channel registered"
        );
        channels.insert(name, scheduler);
        Ok(())
    }

    pub fn lookup_channel(&self, name: &str) -> Option<Arc<Scheduler<P>>> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// 所有通道（按名称排序）。
    pub fn channels(&self) -> Vec<Arc<Scheduler<P>>> {
        let mut channels: Vec<_> = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.name().cmp(b.name()));
        channels
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels()
            .iter()
            .map(|scheduler| scheduler.name().to_string())
            .collect()
    }

    pub fn num_channels(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn start_all(&self) {
        for scheduler in self.channels() {
            info!(
                target: "ems.acquisition",
                channel = %scheduler.name(),
                points = scheduler.num_points(),
                "starting collection"
            );
            scheduler.start_collection();
        }
    }

    pub fn stop_all(&self) {
        for scheduler in self.channels() {
            info!(
                target: "ems.acquisition",
                channel = %scheduler.name(),
                "stopping collection"
            );
            scheduler.stop_collection();
        }
    }

    /// 等待所有通道的采集循环退出。
    pub async fn join_all(&self) {
        for scheduler in self.channels() {
            scheduler.join().await;
        }
    }

    /// 把点位分配给通道；点位原本属于其他通道时先从原通道移除。
    ///
    /// 整个迁移过程持有归属表写锁，并发分配同一点位时只有最后一次生效。
    pub fn assign_point(&self, channel: &str, point: Arc<P>) -> Result<(), RegistryError> {
        let scheduler = self
            .lookup_channel(channel)
            .ok_or_else(|| RegistryError::UnknownChannel(channel.to_string()))?;
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        let previous = owners.insert(point.id().to_string(), channel.to_string());
        if let Some(previous) = previous.filter(|previous| previous != channel) {
            if let Some(old) = self.lookup_channel(&previous) {
                old.remove_point(point.id());
            }
        }
        scheduler.add_point(point);
        Ok(())
    }

    /// 把点位从其所属通道移除。
    pub fn remove_point(&self, point_id: &str) -> Option<Arc<P>> {
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        let owner = owners.remove(point_id)?;
        self.lookup_channel(&owner)?.remove_point(point_id)
    }

    pub fn point_owner(&self, point_id: &str) -> Option<String> {
        self.owners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(point_id)
            .cloned()
    }

    /// 把控制请求路由到点位所属的通道。
    pub async fn write(&self, point_id: &str, value: &PointValueData) -> Result<(), RegistryError> {
        let owner = self
            .point_owner(point_id)
            .ok_or_else(|| RegistryError::UnknownPoint(point_id.to_string()))?;
        let scheduler = self
            .lookup_channel(&owner)
            .ok_or(RegistryError::UnknownChannel(owner))?;
        scheduler.write(point_id, value).await?;
        Ok(())
    }

    pub fn status(&self) -> Vec<ChannelStatus> {
        self.channels()
            .iter()
            .map(|scheduler| scheduler.status())
            .collect()
    }

    /// 停止所有通道并清空注册表。
    pub fn clear(&self) {
        self.stop_all();
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.owners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl<P: ScheduledPoint> Default for ChannelRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DriverContext;
    use crate::driver::CollectorDriver;
    use crate::error::DriverError;
    use crate::scheduler::SchedulerConfig;
    use crate::sink::NoopSink;
    use async_trait::async_trait;
    use domain::MonitorPoint;

    struct IdleDriver;

    #[async_trait]
    impl CollectorDriver<MonitorPoint> for IdleDriver {
        fn kind(&self) -> &'static str {
            "idle"
        }

        async fn connect(&mut self, _ctx: &DriverContext<MonitorPoint>) -> Result<bool, DriverError> {
            Ok(true)
        }

        async fn disconnect(&mut self, _ctx: &DriverContext<MonitorPoint>) -> Result<(), DriverError> {
            Ok(())
        }

        async fn collect(
            &mut self,
            _points: &[Arc<MonitorPoint>],
            _ctx: &DriverContext<MonitorPoint>,
        ) -> Result<(), DriverError> {
            Ok(())
        }
    }

    fn scheduler(name: &str) -> Arc<Scheduler<MonitorPoint>> {
        Scheduler::new(
            name,
            Box::new(IdleDriver),
            Arc::new(NoopSink),
            SchedulerConfig::default(),
        )
    }

    #[test]
    fn duplicate_channel_is_rejected() {
        let registry = ChannelRegistry::new();
        registry.register_channel("a", scheduler("a")).expect("register");
        let err = registry
            .register_channel("a", scheduler("a"))
            .expect_err("duplicate");
        assert!(matches!(err, RegistryError::DuplicateChannel(name) if name == "a"));
        assert_eq!(registry.num_channels(), 1);
    }

    #[test]
    fn channels_are_listed_by_name() {
        let registry = ChannelRegistry::new();
        registry.register_channel("b", scheduler("b")).expect("register");
        registry.register_channel("a", scheduler("a")).expect("register");
        assert_eq!(registry.channel_names(), vec!["a", "b"]);
        assert!(registry.lookup_channel("a").is_some());
        assert!(registry.lookup_channel("missing").is_none());
    }

    #[test]
    fn assign_point_moves_between_channels() {
        let registry = ChannelRegistry::new();
        registry.register_channel("a", scheduler("a")).expect("register");
        registry.register_channel("b", scheduler("b")).expect("register");
        let point = Arc::new(MonitorPoint::new("p1", 1000));

        registry.assign_point("a", point.clone()).expect("assign");
        registry.assign_point("b", point.clone()).expect("move");

        assert_eq!(registry.point_owner("p1").as_deref(), Some("b"));
        assert_eq!(registry.lookup_channel("a").map(|s| s.num_points()), Some(0));
        assert_eq!(registry.lookup_channel("b").map(|s| s.num_points()), Some(1));
    }

    #[test]
    fn assign_to_unknown_channel_fails() {
        let registry = ChannelRegistry::<MonitorPoint>::new();
        let err = registry
            .assign_point("nope", Arc::new(MonitorPoint::new("p1", 1000)))
            .expect_err("unknown");
        assert!(matches!(err, RegistryError::UnknownChannel(_)));
        assert!(registry.point_owner("p1").is_none());
    }

    #[test]
    fn remove_point_and_clear() {
        let registry = ChannelRegistry::new();
        registry.register_channel("a", scheduler("a")).expect("register");
        registry
            .assign_point("a", Arc::new(MonitorPoint::new("p1", 1000)))
            .expect("assign");
        assert!(registry.remove_point("p1").is_some());
        assert!(registry.point_owner("p1").is_none());
        assert!(registry.remove_point("p1").is_none());

        registry.clear();
        assert_eq!(registry.num_channels(), 0);
    }

    #[tokio::test]
    async fn write_to_unknown_point_fails() {
        let registry = ChannelRegistry::<MonitorPoint>::new();
        let err = registry
            .write("ghost", &PointValueData::I64(1))
            .await
            .expect_err("unknown point");
        assert!(matches!(err, RegistryError::UnknownPoint(_)));
    }
}
