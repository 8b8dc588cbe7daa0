//! 内核中转管道：零拷贝搬运的中间一跳。
//!
//! # 模块定位（Why）
//! - `splice(2)` 要求两端至少一端是管道，因此每个方向都需要一个独占的管道作为
//!   “套接字 → 管道 → 套接字” 的中转；
//! - 管道容量决定单次搬运的上限，进程启动时探测一次，之后作为只读配置显式传递。
//!
//! # 暴露接口（What）
//! - [`PipeCapacity`]：启动期探测得到的不可变容量；
//! - [`PipeBuffer`]：单个方向独占的管道，`Drop` 时关闭两端。
//!
//! # 设计要点（How）
//! - 通过 `nix` 重导出的 `libc` 调用 `pipe2(O_CLOEXEC | O_NONBLOCK)` 与
//!   `fcntl(F_GETPIPE_SZ / F_SETPIPE_SZ)`，文件描述符立即交由 `OwnedFd` 管理。

use crate::error::{PIPE_CREATE, PIPE_PROBE, RelayError, map_io_error};
use nix::errno::Errno;
use nix::libc;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// 将 `Errno` 转换为 `std::io::Error`。
pub(crate) fn nix_err_to_io(errno: Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

/// 进程级的管道容量，启动时探测一次，此后只读。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 容量同时是每个 splice 步骤的搬运上限（Transfer Budget）；所有连接共享同一个值，
///   但它从不在运行期被修改，因此以 `Copy` 值类型显式传递，而非全局可变状态。
///
/// ## 契约 (What)
/// - [`PipeCapacity::probe`]：创建一次性管道并读取内核默认容量；
/// - [`PipeCapacity::probe_with`]：若给出请求值，先以 `F_SETPIPE_SZ` 申请，再读回内核
///   实际授予的容量；
/// - 任何失败都是启动期致命错误；容量为 0 同样被拒绝。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PipeCapacity {
    bytes: usize,
    explicit: bool,
}

impl PipeCapacity {
    /// 探测内核默认管道容量。
    pub fn probe() -> Result<Self, RelayError> {
        Self::probe_with(None)
    }

    /// 探测管道容量；`requested` 非空时申请该容量并以内核实际授予值为准。
    pub fn probe_with(requested: Option<usize>) -> Result<Self, RelayError> {
        let (read, write) = open_pipe().map_err(|err| map_io_error(PIPE_PROBE, err))?;
        if let Some(requested) = requested {
            set_pipe_size(&write, requested).map_err(|err| map_io_error(PIPE_PROBE, err))?;
        }
        let bytes = pipe_size(&read).map_err(|err| map_io_error(PIPE_PROBE, err))?;
        drop((read, write));

        if bytes == 0 {
            let err = io::Error::new(io::ErrorKind::InvalidData, "kernel reported zero pipe size");
            return Err(map_io_error(PIPE_PROBE, err));
        }
        Ok(Self {
            bytes,
            explicit: requested.is_some(),
        })
    }

    /// 单个管道可暂存的字节数。
    pub fn bytes(self) -> usize {
        self.bytes
    }

    /// 容量是否由调用方显式申请（需要在每个新管道上重新设置）。
    pub fn is_explicit(self) -> bool {
        self.explicit
    }
}

/// 单个方向独占的内核中转管道。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 每个 Splice Pump 拥有自己的管道实例，管道从不跨连接或跨方向共享，因此无需任何锁；
/// - 管道两端由 `OwnedFd` 持有，泵退出时随所有权释放而关闭，不会泄露描述符。
///
/// ## 契约 (What)
/// - [`PipeBuffer::create`]：按探测到的容量创建管道；显式容量会在新管道上重新申请；
/// - 创建失败属于会话级错误：调用方放弃该会话；
/// - `read_fd` / `write_fd` 仅供 splice 步骤在同一任务内使用。
#[derive(Debug)]
pub struct PipeBuffer {
    read: OwnedFd,
    write: OwnedFd,
    capacity: usize,
}

impl PipeBuffer {
    /// 为一个方向创建中转管道。
    pub fn create(capacity: PipeCapacity) -> Result<Self, RelayError> {
        let (read, write) = open_pipe().map_err(|err| map_io_error(PIPE_CREATE, err))?;
        if capacity.is_explicit() {
            set_pipe_size(&write, capacity.bytes())
                .map_err(|err| map_io_error(PIPE_CREATE, err))?;
        }
        Ok(Self {
            read,
            write,
            capacity: capacity.bytes(),
        })
    }

    /// 单次搬运的上限。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    pub(crate) fn write_fd(&self) -> RawFd {
        self.write.as_raw_fd()
    }
}

fn open_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    let result = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(nix_err_to_io(Errno::last()));
    }
    // SAFETY: pipe2 成功返回两个新建且未被其它对象持有的描述符。
    let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    Ok(pair)
}

fn pipe_size(fd: &OwnedFd) -> io::Result<usize> {
    let result = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETPIPE_SZ) };
    if result < 0 {
        return Err(nix_err_to_io(Errno::last()));
    }
    Ok(result as usize)
}

fn set_pipe_size(fd: &OwnedFd, bytes: usize) -> io::Result<()> {
    let bytes = libc::c_int::try_from(bytes).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "requested pipe size overflows c_int")
    })?;
    let result = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETPIPE_SZ, bytes) };
    if result < 0 {
        return Err(nix_err_to_io(Errno::last()));
    }
    Ok(())
}
