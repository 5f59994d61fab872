//! 遥测采集网关：装配通道、启动采集，并提供状态查询 HTTP API。

mod bootstrap;
mod handlers;
mod middleware;
mod routes;
mod utils;

use bootstrap::Registry;
use ems_acquisition::ChannelSink;
use ems_config::AppConfig;
use ems_pipeline::{Pipeline, PipelineConfig, TracingEventWriter};
use ems_telemetry::init_tracing;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    // 下游流水线：调度器产生的事件经 ChannelSink 进入
    let (sink, events) = ChannelSink::new();
    let pipeline = Pipeline::with_config(
        Arc::new(TracingEventWriter),
        PipelineConfig {
            batch_size: config.pipeline_batch_size,
            dedup_cache_size: config.pipeline_dedup_cache_size,
            ..PipelineConfig::default()
        },
    );
    let consumer = tokio::spawn(async move { pipeline.run(events).await });

    let registry = bootstrap::load_registry(&config, Arc::new(sink))?;
    registry.start_all();

    if config.http_enabled {
        let app = routes::create_app(AppState {
            registry: registry.clone(),
        });
        let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
        info!(target: "ems.gateway", addr = %config.http_addr, "http api listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        shutdown_signal().await;
    }

    // 停止采集 → 等待循环退出 → 断开驱动 → 清空注册表
    registry.stop_all();
    registry.join_all().await;
    for scheduler in registry.channels() {
        if let Err(err) = scheduler.disconnect().await {
            warn!(target: "ems.gateway", channel = %scheduler.name(), error = %err, "disconnect failed");
        }
    }
    registry.clear();
    drop(registry);

    // 所有发送端释放后流水线写出剩余事件并退出
    if tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .is_err()
    {
        warn!(target: "ems.gateway", "pipeline did not drain in time");
    }
    info!(target: "ems.gateway", "gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target: "ems.gateway", error = %err, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!(target: "ems.gateway", "shutdown requested");
}
