//! 单方向的非阻塞 splice 步骤。
//!
//! # 模块定位（Why）
//! - 一次步骤把至多 `max` 字节从套接字搬进管道（`drain_into_pipe`），或从管道搬进
//!   套接字（`drain_from_pipe`），字节始终停留在内核中；
//! - 步骤内部负责非阻塞重试：遇到 would-block 时挂起任务并等待运行时的就绪通知，
//!   恢复后继续，已搬运的字节不会重复计数。
//!
//! # 终止条件（What）
//! 1. 累计搬运量达到 `max`：立即返回，不再发起额外的零长度调用；
//! 2. 系统调用返回 0 且无错误：立即返回已搬运量（对入管道方向即 EOF）；
//! 3. would-block：挂起直至就绪；入管道方向若已搬运部分字节则直接返回，交由泵先行冲刷；
//! 4. `EAGAIN`/`EINTR` 从不视为错误；
//! 5. 其它错误：停止并连同部分搬运量一起返回。
//!
//! # 设计要点（How）
//! - 每个步骤的第一次尝试直接发起系统调用，而不经过运行时的就绪缓存：管道写满导致的
//!   `EAGAIN` 会清除套接字的就绪标记，若此时套接字仍有数据，只有直接尝试才能取走它；
//! - 后续尝试通过 [`SpliceSocket::try_splice`] 执行，让 `EAGAIN` 正确清除就绪缓存，
//!   从而使 [`SpliceSocket::wait_ready`] 真正挂起而不是忙等。

use crate::error::{OperationKind, RelayError, SPLICE_IN, SPLICE_OUT, map_io_error};
use crate::pipe::{PipeBuffer, nix_err_to_io};
use crate::socket::SpliceSocket;
use nix::errno::Errno;
use nix::libc;
use std::io;
use std::os::fd::RawFd;
use std::ptr;
use tokio::io::Interest;
use tracing::trace;

const SPLICE_FLAGS: libc::c_uint = libc::SPLICE_F_MOVE | libc::SPLICE_F_NONBLOCK;

/// 一次 splice 步骤的结果：已搬运字节数与可选的硬错误。
///
/// `moved == 0 && error.is_none()` 表示源端已到达 EOF（或目的端不再接收）。
#[derive(Debug)]
pub struct StepOutcome {
    pub moved: usize,
    pub error: Option<RelayError>,
}

impl StepOutcome {
    fn done(moved: usize) -> Self {
        Self { moved, error: None }
    }

    fn failed(moved: usize, error: RelayError) -> Self {
        Self {
            moved,
            error: Some(error),
        }
    }

    /// 是否为干净的流结束信号。
    pub fn is_end_of_stream(&self) -> bool {
        self.moved == 0 && self.error.is_none()
    }
}

/// 把至多 `max` 字节从 `source` 搬进 `pipe`。
///
/// `max` 会被截断到管道容量。调用前管道必须为空（由泵保证）。
pub async fn drain_into_pipe<S: SpliceSocket>(
    source: &S,
    pipe: &PipeBuffer,
    max: usize,
) -> StepOutcome {
    let max = max.min(pipe.capacity());
    let (fd_in, fd_out) = (source.raw_fd(), pipe.write_fd());
    run_step(source, Interest::READABLE, SPLICE_IN, max, true, |len| {
        splice_once(fd_in, fd_out, len)
    })
    .await
}

/// 把至多 `max` 字节从 `pipe` 搬进 `destination`。
///
/// 只有搬满 `max`、调用返回 0 或出现硬错误时才返回；目的端背压时持续挂起等待。
pub async fn drain_from_pipe<S: SpliceSocket>(
    pipe: &PipeBuffer,
    destination: &S,
    max: usize,
) -> StepOutcome {
    let max = max.min(pipe.capacity());
    let (fd_in, fd_out) = (pipe.read_fd(), destination.raw_fd());
    run_step(destination, Interest::WRITABLE, SPLICE_OUT, max, false, |len| {
        splice_once(fd_in, fd_out, len)
    })
    .await
}

async fn run_step<S, F>(
    socket: &S,
    interest: Interest,
    kind: OperationKind,
    max: usize,
    return_partial: bool,
    mut splice: F,
) -> StepOutcome
where
    S: SpliceSocket,
    F: FnMut(usize) -> io::Result<usize>,
{
    let mut moved = 0usize;
    let mut direct = true;
    while moved < max {
        let remaining = max - moved;
        let result = if direct {
            direct = false;
            splice(remaining)
        } else {
            socket.try_splice(interest, || splice(remaining))
        };
        match result {
            Ok(0) => return StepOutcome::done(moved),
            Ok(n) => moved += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if return_partial && moved > 0 {
                    return StepOutcome::done(moved);
                }
                trace!(?interest, moved, "splice step suspended until socket is ready");
                if let Err(err) = socket.wait_ready(interest).await {
                    return StepOutcome::failed(moved, map_io_error(kind, err));
                }
            }
            Err(err) => return StepOutcome::failed(moved, map_io_error(kind, err)),
        }
    }
    StepOutcome::done(moved)
}

fn splice_once(fd_in: RawFd, fd_out: RawFd, len: usize) -> io::Result<usize> {
    let result = unsafe {
        libc::splice(
            fd_in,
            ptr::null_mut(),
            fd_out,
            ptr::null_mut(),
            len,
            SPLICE_FLAGS,
        )
    };
    if result < 0 {
        return Err(nix_err_to_io(Errno::last()));
    }
    Ok(result as usize)
}
