//! 连接处理：拨通后端并启动两个方向的泵。
//!
//! # 模块定位（Why）
//! - 会话级失败只放弃当前连接，从不影响监听循环；
//! - 管道容量等只读状态经由 [`RelayContext`] 显式传入，不依赖进程级可变状态。
//!
//! # 暴露接口（What）
//! - [`handle_connection`]：返回持有两个泵任务的 [`RelaySession`]；
//! - [`SessionId`]：日志关联用的会话编号。
//!
//! # 设计要点（How）
//! - 后端地址每条连接重新解析，逐个候选地址拨号；
//! - 两个管道都创建成功后才派生任务，失败时不会留下半个会话。

use crate::addr::resolve;
use crate::config::{RelayConfig, SocketOptions};
use crate::error::{CONFIGURE, CONNECT, RESOLVE_BACKEND, RelayError, map_io_error};
use crate::pipe::{PipeBuffer, PipeCapacity};
use crate::pump::{Direction, PumpReport, SplicePump};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, info_span};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// 进程内唯一的会话编号，仅用于日志关联。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 每条会话共享的只读上下文：后端地址、管道容量与套接字选项。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 管道容量在启动期探测一次后即不可变，通过上下文显式传给每个会话，
///   而不是保存在进程级可变状态中；
/// - 监听器以 `Arc<RelayContext>` 在各连接任务间共享，无需任何锁。
///
/// ## 契约 (What)
/// - `backend`：后端地址字符串，每条连接建立时重新解析；
/// - `capacity`：每个方向新建管道所用的容量；
/// - `socket`：应用到前后端两条腿的套接字选项。
#[derive(Clone, Debug)]
pub struct RelayContext {
    backend: String,
    capacity: PipeCapacity,
    socket: SocketOptions,
}

impl RelayContext {
    pub fn new(backend: impl Into<String>, capacity: PipeCapacity, socket: SocketOptions) -> Self {
        Self {
            backend: backend.into(),
            capacity,
            socket,
        }
    }

    /// 从进程配置与探测结果组装上下文。
    pub fn from_config(config: &RelayConfig, capacity: PipeCapacity) -> Self {
        Self::new(config.back(), capacity, config.socket_options().clone())
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn capacity(&self) -> PipeCapacity {
        self.capacity
    }

    pub fn socket_options(&self) -> &SocketOptions {
        &self.socket
    }
}

/// 一条已建立的中继会话：两个方向的泵任务句柄。
///
/// 丢弃该句柄只会分离任务，不会取消泵；泵仅在任一端关闭或出错时停止。
#[derive(Debug)]
pub struct RelaySession {
    id: SessionId,
    backend: SocketAddr,
    front_to_back: JoinHandle<PumpReport>,
    back_to_front: JoinHandle<PumpReport>,
}

impl RelaySession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// 实际拨通的后端地址。
    pub fn backend_addr(&self) -> SocketAddr {
        self.backend
    }

    /// 等待两个方向的泵都退出，按 `(front->back, back->front)` 顺序返回汇报。
    pub async fn wait(self) -> Result<(PumpReport, PumpReport), JoinError> {
        tokio::try_join!(self.front_to_back, self.back_to_front)
    }
}

/// 为一条已接受的前端连接建立后端连接，并启动两个方向的泵。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 会话级失败（后端解析/拨号、套接字配置、管道创建）只放弃当前连接，
///   由调用方记录日志，从不影响监听循环；
/// - 两个泵各自独占一个管道，并以 `Arc` 共享两端套接字：每个端点只被一个泵读取、
///   被另一个泵写入，所有 I/O 都经由 `&self` 的就绪接口完成。
///
/// ## 逻辑 (How)
/// 1. 解析后端地址，逐个尝试拨号，全部失败时返回最后一次错误；
/// 2. 为两条腿应用 [`SocketOptions`]；
/// 3. 先创建两个管道再启动任务，确保失败时不会留下半个会话；
/// 4. 两个泵任务都挂在同一个会话 span 下，日志自带会话编号与对端地址。
///
/// ## 契约 (What)
/// - 成功时返回 [`RelaySession`]，函数本身不等待泵结束；
/// - 失败时 `front` 随函数返回被关闭，且没有任何任务被启动。
pub async fn handle_connection(
    front: TcpStream,
    ctx: &RelayContext,
) -> Result<RelaySession, RelayError> {
    let id = SessionId::next();
    let peer = front.peer_addr().ok();
    let back = dial_backend(ctx.backend()).await?;
    let backend = back
        .peer_addr()
        .map_err(|err| map_io_error(CONNECT, err))?;

    ctx.socket_options()
        .apply(&front)
        .map_err(|err| map_io_error(CONFIGURE, err))?;
    ctx.socket_options()
        .apply(&back)
        .map_err(|err| map_io_error(CONFIGURE, err))?;

    let forward_pipe = PipeBuffer::create(ctx.capacity())?;
    let backward_pipe = PipeBuffer::create(ctx.capacity())?;

    let front = Arc::new(front);
    let back = Arc::new(back);
    let span = info_span!(
        "relay_session",
        session = id.get(),
        peer = ?peer,
        backend = %backend,
    );
    span.in_scope(|| debug!("relay session established"));

    let forward = SplicePump::new(
        Direction::FrontToBack,
        Arc::clone(&front),
        Arc::clone(&back),
        forward_pipe,
    );
    let backward = SplicePump::new(Direction::BackToFront, back, front, backward_pipe);

    Ok(RelaySession {
        id,
        backend,
        front_to_back: tokio::spawn(forward.run().instrument(span.clone())),
        back_to_front: tokio::spawn(backward.run().instrument(span)),
    })
}

async fn dial_backend(backend: &str) -> Result<TcpStream, RelayError> {
    let candidates = resolve(backend, RESOLVE_BACKEND).await?;
    let mut last_error = None;
    for addr in candidates {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%addr, error = %err, "back-end candidate refused connection");
                last_error = Some(err);
            }
        }
    }
    let err = last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "no back-end address to dial")
    });
    Err(map_io_error(CONNECT, err))
}
