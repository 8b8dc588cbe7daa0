use crate::addr::resolve;
use crate::config::RelayConfig;
use crate::error::{ACCEPT, BIND, RESOLVE_LISTEN, RelayError, map_io_error};
use crate::handler::{RelayContext, handle_connection};
use crate::pipe::PipeCapacity;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// 中继的接受端：持有监听套接字，为每个入站连接派生一个会话任务。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 监听层只做两件事：接受连接、把连接交给 [`handle_connection`]；会话内的任何失败
///   都在派生任务中记录并吞掉，从不回流到接受循环；
/// - 接受失败视为进程级错误，结束循环并交由进程入口决定退出码。
///
/// ## 逻辑 (How)
/// - `bind`：校验配置，解析监听地址，逐个候选地址尝试绑定；`:port` 先以双栈方式绑定 `[::]`
///   （关闭 `IPV6_V6ONLY`），主机不支持 IPv6 时回退到 `0.0.0.0`；
/// - `serve`：无限循环接受连接，每个连接一个任务，不设并发上限；
/// - `serve_until`：在 `shutdown` 完成时停止接受，已建立的会话继续运行到自然结束。
///
/// ## 契约 (What)
/// - **前置条件**：调用方处于 Tokio 运行时中；
/// - **错误语义**：绑定、解析与接受失败均为 [`ErrorCategory::StartupFatal`](crate::ErrorCategory)。
///
/// ## 注意事项 (Trade-offs)
/// - 无连接上限与空闲超时，资源占用随活跃连接数线性增长。
#[derive(Debug)]
pub struct RelayListener {
    inner: TcpListener,
    local_addr: SocketAddr,
    context: Arc<RelayContext>,
}

impl RelayListener {
    /// 按配置绑定监听地址。
    pub async fn bind(config: &RelayConfig, capacity: PipeCapacity) -> Result<Self, RelayError> {
        config.validate()?;
        let candidates = resolve(config.front(), RESOLVE_LISTEN).await?;

        let mut last_error = None;
        for addr in candidates {
            match bind_listener(addr).await {
                Ok(inner) => {
                    let local_addr = inner
                        .local_addr()
                        .map_err(|err| map_io_error(BIND, err))?;
                    return Ok(Self {
                        inner,
                        local_addr,
                        context: Arc::new(RelayContext::from_config(config, capacity)),
                    });
                }
                Err(err) => {
                    debug!(%addr, error = %err, "listen candidate failed to bind");
                    last_error = Some(err);
                }
            }
        }
        let err = last_error.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no listen address to bind")
        });
        Err(map_io_error(BIND, err))
    }

    /// 返回实际绑定的地址（端口为 0 时由内核分配）。
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn context(&self) -> &RelayContext {
        &self.context
    }

    /// 接受一个入站连接。
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), RelayError> {
        self.inner
            .accept()
            .await
            .map_err(|err| map_io_error(ACCEPT, err))
    }

    /// 持续接受连接直到接受失败。
    pub async fn serve(&self) -> Result<(), RelayError> {
        loop {
            let (stream, peer) = self.accept().await?;
            self.dispatch(stream, peer);
        }
    }

    /// 持续接受连接，直到 `shutdown` 完成或接受失败。
    pub async fn serve_until<F>(&self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    info!(listen = %self.local_addr, "relay listener stopped accepting");
                    return Ok(());
                }
                accepted = self.accept() => {
                    let (stream, peer) = accepted?;
                    self.dispatch(stream, peer);
                }
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let context = Arc::clone(&self.context);
        tokio::spawn(async move {
            match handle_connection(stream, &context).await {
                Ok(session) => {
                    debug!(session = session.id().get(), %peer, "relay session dispatched");
                }
                Err(err) => {
                    warn!(
                        %peer,
                        backend = context.backend(),
                        code = err.code(),
                        error = %err,
                        "relay session abandoned"
                    );
                }
            }
        });
    }
}

const LISTEN_BACKLOG: i32 = 1024;

/// IPv6 通配地址走双栈绑定，其它地址直接交给 Tokio。
async fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    if addr.is_ipv6() && addr.ip().is_unspecified() {
        return bind_dual_stack(addr);
    }
    TcpListener::bind(addr).await
}

fn bind_dual_stack(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_only_v6(false)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(socket.into())
}
