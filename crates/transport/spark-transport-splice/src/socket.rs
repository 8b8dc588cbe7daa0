//! splice 步骤所见的套接字抽象。
//!
//! # 模块定位（Why）
//! - 步骤与泵只需要原始描述符、就绪通知与双向关闭三种能力；以 trait 收敛后，同一套逻辑
//!   既驱动 TCP 连接，也能在测试中驱动 Unix 套接字对。
//!
//! # 暴露接口（What）
//! - [`SpliceSocket`]：为 Tokio `TcpStream` 与 `UnixStream` 实现。
//!
//! # 设计要点（How）
//! - 就绪等待与就绪缓存清理分别委托给 Tokio 的 `ready` 与 `try_io`；
//! - 关闭经由 `socket2::SockRef` 同步完成，不需要 `&mut` 访问流。

use socket2::SockRef;
use std::future::Future;
use std::io;
use std::net::Shutdown;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use tokio::io::Interest;
use tokio::net::{TcpStream, UnixStream};

/// splice 步骤所需的最小套接字能力。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - splice 步骤只关心三件事：原始描述符、运行时的就绪通知、以及关闭；以 trait 抽象
///   后，泵与步骤既可以驱动 TCP 连接，也可以在测试中驱动 Unix 套接字对；
/// - 就绪等待只挂起当前任务，从不阻塞 OS 线程。
///
/// ## 契约 (What)
/// - `wait_ready`：挂起直到运行时报告 `interest` 就绪；
/// - `try_splice`：在运行时的就绪缓存下执行一次非阻塞系统调用；闭包返回 `WouldBlock`
///   时清除就绪缓存，使下一次 `wait_ready` 真正挂起；
/// - `shutdown_both`：双向关闭，令对端尽快观测到 EOF；重复调用返回无害错误
///   （通常为 `NotConnected`），从不 panic。
pub trait SpliceSocket: AsFd + Send + Sync + 'static {
    fn wait_ready(&self, interest: Interest) -> impl Future<Output = io::Result<()>> + Send;

    fn try_splice(
        &self,
        interest: Interest,
        op: impl FnOnce() -> io::Result<usize>,
    ) -> io::Result<usize>;

    fn shutdown_both(&self) -> io::Result<()>;

    fn raw_fd(&self) -> RawFd {
        self.as_fd().as_raw_fd()
    }
}

impl SpliceSocket for TcpStream {
    fn wait_ready(&self, interest: Interest) -> impl Future<Output = io::Result<()>> + Send {
        async move { self.ready(interest).await.map(|_| ()) }
    }

    fn try_splice(
        &self,
        interest: Interest,
        op: impl FnOnce() -> io::Result<usize>,
    ) -> io::Result<usize> {
        self.try_io(interest, op)
    }

    fn shutdown_both(&self) -> io::Result<()> {
        sync_shutdown(self)
    }
}

impl SpliceSocket for UnixStream {
    fn wait_ready(&self, interest: Interest) -> impl Future<Output = io::Result<()>> + Send {
        async move { self.ready(interest).await.map(|_| ()) }
    }

    fn try_splice(
        &self,
        interest: Interest,
        op: impl FnOnce() -> io::Result<usize>,
    ) -> io::Result<usize> {
        self.try_io(interest, op)
    }

    fn shutdown_both(&self) -> io::Result<()> {
        sync_shutdown(self)
    }
}

fn sync_shutdown<S: AsFd>(socket: &S) -> io::Result<()> {
    SockRef::from(socket).shutdown(Shutdown::Both)
}
