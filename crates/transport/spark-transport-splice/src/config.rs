use crate::error::{RelayError, config_error};
use socket2::SockRef;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

/// 作用于中继两条腿（前端与后端）的套接字选项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将 `TCP_NODELAY`、`SO_LINGER` 等内核行为显式配置化，避免 Handler 直接操作
///   `socket2` 或平台常量；
/// - 中继是字节透明的：小包不应被 Nagle 合并后延迟转发，因此默认开启 `nodelay`。
///
/// ## 契约（What）
/// - `with_nodelay` / `with_linger`：返回新的配置实例；
/// - `apply`：在 `TcpStream` 已建立后写入套接字选项，失败时原配置可能部分生效，
///   调用方应将其视为会话级错误并放弃连接。
///
/// ## 注意事项（Trade-offs）
/// - `SO_LINGER` 在 Linux 上取整到秒；设置为 `Some(0)` 会使关闭阶段直接发送 RST。
#[derive(Clone, Debug)]
pub struct SocketOptions {
    nodelay: bool,
    linger: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketOptions {
    /// 默认配置：开启 `TCP_NODELAY`，`linger` 沿用内核默认。
    pub const fn new() -> Self {
        Self {
            nodelay: true,
            linger: None,
        }
    }

    /// 设置 `TCP_NODELAY`。
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub(crate) fn apply(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        if self.linger.is_some() {
            SockRef::from(stream).set_linger(self.linger)?;
        }
        Ok(())
    }
}

/// 中继进程的静态配置：前端监听地址、后端地址与套接字策略。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 命令行解析属于进程入口的职责，本结构只承载解析结果，使库本身不依赖任何 CLI 框架；
/// - 启动前统一调用 [`RelayConfig::validate`]，保证任何监听/探测动作发生前配置已合法。
///
/// ## 契约（What）
/// - `front`：监听地址，`host:port` 或 `:port`（后者以双栈方式监听所有接口）；
/// - `back`：后端地址，`host:port`，每条连接建立时重新解析；
/// - `pipe_size`：可选，请求内核为每个中转管道分配的容量（字节）；
/// - **前置条件**：`front` 与 `back` 均非空；`pipe_size` 若提供则大于 0。
#[derive(Clone, Debug)]
pub struct RelayConfig {
    front: String,
    back: String,
    socket: SocketOptions,
    pipe_size: Option<usize>,
}

impl RelayConfig {
    /// 以前端、后端地址创建配置，套接字选项取默认值。
    pub fn new(front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            front: front.into(),
            back: back.into(),
            socket: SocketOptions::default(),
            pipe_size: None,
        }
    }

    /// 覆盖套接字选项。
    pub fn with_socket_options(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }

    /// 请求指定的管道容量。
    pub fn with_pipe_size(mut self, pipe_size: Option<usize>) -> Self {
        self.pipe_size = pipe_size;
        self
    }

    pub fn front(&self) -> &str {
        &self.front
    }

    pub fn back(&self) -> &str {
        &self.back
    }

    pub fn socket_options(&self) -> &SocketOptions {
        &self.socket
    }

    pub fn pipe_size(&self) -> Option<usize> {
        self.pipe_size
    }

    /// 校验配置；失败时返回启动期致命错误。
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.front.trim().is_empty() {
            return Err(config_error("front listen address must not be empty"));
        }
        if self.back.trim().is_empty() {
            return Err(config_error("back relay address must not be empty"));
        }
        if self.pipe_size == Some(0) {
            return Err(config_error("requested pipe size must be greater than zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCategory;

    #[test]
    fn defaults_enable_nodelay_without_linger() {
        let options = SocketOptions::default();
        assert!(options.nodelay());
        assert_eq!(options.linger(), None);

        let tuned = options
            .with_nodelay(false)
            .with_linger(Some(Duration::from_secs(3)));
        assert!(!tuned.nodelay());
        assert_eq!(tuned.linger(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn validate_rejects_empty_addresses() {
        let err = RelayConfig::new("", "127.0.0.1:8888")
            .validate()
            .expect_err("empty front must be rejected");
        assert_eq!(err.category(), ErrorCategory::StartupFatal);

        let err = RelayConfig::new(":9999", "  ")
            .validate()
            .expect_err("blank back must be rejected");
        assert!(err.message().contains("back"));

        RelayConfig::new(":9999", "127.0.0.1:8888")
            .validate()
            .expect("defaults are valid");
    }

    #[test]
    fn validate_rejects_zero_pipe_size() {
        let config = RelayConfig::new(":9999", "127.0.0.1:8888").with_pipe_size(Some(0));
        assert!(config.validate().is_err());
    }

    /// 验证套接字选项能够落地到真实连接。
    #[tokio::test(flavor = "multi_thread")]
    async fn apply_sets_nodelay_and_linger() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (_server, _) = listener.accept().await.expect("accept");

        SocketOptions::new()
            .with_linger(Some(Duration::from_secs(2)))
            .apply(&client)
            .expect("apply options");

        assert!(client.nodelay().expect("read nodelay"));
        let linger = SockRef::from(&client).linger().expect("read linger");
        assert_eq!(linger, Some(Duration::from_secs(2)));
    }
}
