use anyhow::Context;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 安装全局 tracing 订阅器。
///
/// 过滤规则取自 `RUST_LOG`，未设置或无法解析时回落到 `info`。
pub fn init() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false));
    tracing::subscriber::set_global_default(subscriber)
        .context("install global tracing subscriber")
}
