use clap::{ArgAction, Parser};
use spark_transport_splice::{RelayConfig, SocketOptions};
use std::time::Duration;

/// 零拷贝 TCP 中继：把前端监听地址上的每个连接透明转发到固定后端。
#[derive(Debug, Parser)]
#[command(name = "spark-relay", author, version, about, long_about = None)]
pub struct Args {
    /// Front-end listen address (`host:port`, or `:port` for all interfaces)
    #[arg(long, env = "SPARK_RELAY_FRONT", default_value = ":9999")]
    pub front: String,

    /// Back-end relay address (`host:port`), resolved per connection
    #[arg(long, env = "SPARK_RELAY_BACK", default_value = "127.0.0.1:8888")]
    pub back: String,

    /// Set TCP_NODELAY on both legs of every session
    #[arg(
        long,
        env = "SPARK_RELAY_NODELAY",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub nodelay: bool,

    /// SO_LINGER timeout in seconds applied to both legs
    #[arg(long, env = "SPARK_RELAY_LINGER_SECS")]
    pub linger_secs: Option<u64>,

    /// Requested capacity in bytes of every per-direction pipe
    #[arg(long, env = "SPARK_RELAY_PIPE_SIZE")]
    pub pipe_size: Option<usize>,
}

impl Args {
    /// 把命令行参数转换为库配置。
    pub fn into_config(self) -> RelayConfig {
        let socket = SocketOptions::new()
            .with_nodelay(self.nodelay)
            .with_linger(self.linger_secs.map(Duration::from_secs));
        RelayConfig::new(self.front, self.back)
            .with_socket_options(socket)
            .with_pipe_size(self.pipe_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_addresses() {
        let args = Args::try_parse_from(["spark-relay"]).expect("defaults parse");
        let config = args.into_config();
        assert_eq!(config.front(), ":9999");
        assert_eq!(config.back(), "127.0.0.1:8888");
        assert!(config.socket_options().nodelay());
        assert_eq!(config.socket_options().linger(), None);
        assert_eq!(config.pipe_size(), None);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "spark-relay",
            "--front",
            "127.0.0.1:7000",
            "--back",
            "backend.internal:80",
            "--nodelay",
            "false",
            "--linger-secs",
            "5",
            "--pipe-size",
            "1048576",
        ])
        .expect("flags parse");
        let config = args.into_config();
        assert_eq!(config.front(), "127.0.0.1:7000");
        assert_eq!(config.back(), "backend.internal:80");
        assert!(!config.socket_options().nodelay());
        assert_eq!(
            config.socket_options().linger(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(config.pipe_size(), Some(1_048_576));
    }

    #[test]
    fn empty_address_fails_validation() {
        let args = Args::try_parse_from(["spark-relay", "--back", ""]).expect("parse");
        assert!(args.into_config().validate().is_err());
    }

    #[test]
    fn non_numeric_pipe_size_is_rejected() {
        assert!(Args::try_parse_from(["spark-relay", "--pipe-size", "big"]).is_err());
    }
}
