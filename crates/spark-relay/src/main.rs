//! `spark-relay` 进程入口。
//!
//! 负责三件事：解析命令行、初始化日志、把启动期致命错误映射为进程退出码。
//! 中继本身的全部行为都在 `spark-transport-splice` 中实现。

mod cli;
mod logging;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use spark_transport_splice::{PipeCapacity, RelayConfig, RelayListener};
use std::process::ExitCode;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let config = cli::Args::parse().into_config();
    if let Err(err) = config.validate() {
        eprintln!("spark-relay: {err}");
        let _ = cli::Args::command().print_help();
        return ExitCode::FAILURE;
    }

    if let Err(err) = logging::init() {
        eprintln!("spark-relay: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{err:#}"), "spark relay terminated");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let capacity = PipeCapacity::probe_with(config.pipe_size()).context("probe pipe capacity")?;
    let listener = RelayListener::bind(&config, capacity)
        .await
        .context("bind relay listener")?;
    info!(
        listen = %listener.local_addr(),
        backend = config.back(),
        pipe_size = capacity.bytes(),
        "spark relay listening"
    );

    listener
        .serve_until(shutdown_signal())
        .await
        .context("accept loop failed")?;
    info!("spark relay shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler unavailable; relay runs until the accept loop fails");
        std::future::pending::<()>().await;
    }
}
