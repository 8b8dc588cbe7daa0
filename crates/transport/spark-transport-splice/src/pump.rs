//! 单方向的 splice 泵。
//!
//! # 模块定位（Why）
//! - 把两个 splice 步骤串成“灌入管道 → 冲刷管道”的循环，直到 EOF 或硬错误；
//! - 泵结束时关闭两端，使反方向的泵与两侧对端都尽快观测到连接结束。
//!
//! # 暴露接口（What）
//! - [`SplicePump`]：`Running → Draining → Closed` 状态机；
//! - [`PumpReport`]：方向、累计字节数与 [`Termination`]。
//!
//! # 设计要点（How）
//! - 每次冲刷恰好写出刚灌入的字节数，冲刷阻塞即形成背压；
//! - 泵层面从不重试硬错误，也不重连。

use crate::error::{ErrorCategory, RelayError, SPLICE_OUT};
use crate::pipe::PipeBuffer;
use crate::socket::SpliceSocket;
use crate::step::{drain_from_pipe, drain_into_pipe};
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// 一条中继连接中的单个字节流方向。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    FrontToBack,
    BackToFront,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::FrontToBack => "front->back",
            Direction::BackToFront => "back->front",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 泵的状态机。
///
/// - `Running`：等待把源端数据搬进管道；
/// - `Draining`：管道中尚有 `pending` 字节等待冲刷到目的端；
/// - `Closed`：两端已关闭，管道已释放。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PumpState {
    Running,
    Draining { pending: usize },
    Closed,
}

/// 泵进入 `Closed` 的原因。
#[derive(Debug)]
pub enum Termination {
    EndOfStream,
    Failed(RelayError),
}

/// 泵退出时的汇报：方向、累计转发字节数与终止原因。
#[derive(Debug)]
pub struct PumpReport {
    pub direction: Direction,
    pub bytes: u64,
    pub termination: Termination,
}

impl PumpReport {
    pub fn is_clean(&self) -> bool {
        matches!(self.termination, Termination::EndOfStream)
    }
}

enum Transition {
    Continue(PumpState),
    Stop(Termination),
}

/// 单方向的零拷贝泵：源套接字 → 管道 → 目的套接字。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 以显式状态机驱动两个 splice 步骤，使“先灌满、再冲刷”的节奏成为结构性背压：
///   目的端阻塞时冲刷挂起，下一轮灌入自然不会发生；
/// - 泵独占自己的 [`PipeBuffer`]，源端只被本泵读取、目的端只被本泵写入，因此无需锁。
///
/// ## 逻辑 (How)
/// - `Running`：`drain_into_pipe` 至多搬运一个管道容量；返回 0 即 EOF；
/// - `Draining`：`drain_from_pipe` 反复冲刷，直到恰好写出刚灌入的字节数；
/// - 任何硬错误或 EOF 都进入 `Closed`：双向关闭两端，令对端与反方向的泵尽快观测到 EOF，
///   随后释放管道。
///
/// ## 契约 (What)
/// - [`SplicePump::run`] 消费泵并返回 [`PumpReport`]；泵层面从不重试硬错误；
/// - 冲刷阶段若目的端返回 0 字节而管道仍有数据，视为 `WriteZero` 硬错误，避免空转。
///
/// ## 注意事项 (Trade-offs)
/// - 没有空闲超时：只要两端都不关闭，泵就一直持有任务与管道；
/// - 进入 `Closed` 时源端方向上已灌入管道但未冲刷的字节会被丢弃，此时连接本身已失败。
pub struct SplicePump<S> {
    direction: Direction,
    source: Arc<S>,
    destination: Arc<S>,
    pipe: PipeBuffer,
    state: PumpState,
    relayed: u64,
}

impl<S: SpliceSocket> SplicePump<S> {
    pub fn new(direction: Direction, source: Arc<S>, destination: Arc<S>, pipe: PipeBuffer) -> Self {
        Self {
            direction,
            source,
            destination,
            pipe,
            state: PumpState::Running,
            relayed: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> PumpState {
        self.state
    }

    /// 驱动泵直到 EOF 或硬错误，返回退出汇报。
    pub async fn run(mut self) -> PumpReport {
        let termination = loop {
            let transition = match self.state {
                PumpState::Running => self.fill().await,
                PumpState::Draining { pending } => self.flush(pending).await,
                PumpState::Closed => Transition::Stop(Termination::EndOfStream),
            };
            match transition {
                Transition::Continue(next) => self.state = next,
                Transition::Stop(termination) => break termination,
            }
        };
        self.close();

        match &termination {
            Termination::EndOfStream => {
                debug!(direction = %self.direction, bytes = self.relayed, "splice pump reached end of stream");
            }
            Termination::Failed(err) => {
                warn!(
                    direction = %self.direction,
                    bytes = self.relayed,
                    code = err.code(),
                    error = %err,
                    "splice pump terminated by error"
                );
            }
        }

        PumpReport {
            direction: self.direction,
            bytes: self.relayed,
            termination,
        }
    }

    async fn fill(&mut self) -> Transition {
        let outcome = drain_into_pipe(&*self.source, &self.pipe, self.pipe.capacity()).await;
        match outcome.error {
            Some(err) => Transition::Stop(Termination::Failed(err)),
            None if outcome.moved == 0 => Transition::Stop(Termination::EndOfStream),
            None => Transition::Continue(PumpState::Draining {
                pending: outcome.moved,
            }),
        }
    }

    async fn flush(&mut self, pending: usize) -> Transition {
        let outcome = drain_from_pipe(&self.pipe, &*self.destination, pending).await;
        self.relayed += outcome.moved as u64;
        if let Some(err) = outcome.error {
            return Transition::Stop(Termination::Failed(err));
        }
        if outcome.moved == 0 {
            return Transition::Stop(Termination::Failed(write_zero_error(pending)));
        }
        let pending = pending - outcome.moved;
        if pending == 0 {
            Transition::Continue(PumpState::Running)
        } else {
            Transition::Continue(PumpState::Draining { pending })
        }
    }

    fn close(&mut self) {
        self.state = PumpState::Closed;
        shutdown_quietly(&*self.source, self.direction, "source");
        shutdown_quietly(&*self.destination, self.direction, "destination");
    }
}

fn shutdown_quietly<S: SpliceSocket>(socket: &S, direction: Direction, end: &'static str) {
    match socket.shutdown_both() {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotConnected => {
            trace!(%direction, end, "stream end already shut down");
        }
        Err(err) => {
            debug!(%direction, end, error = %err, "shutdown of stream end failed");
        }
    }
}

fn write_zero_error(pending: usize) -> RelayError {
    RelayError::new(
        SPLICE_OUT.code,
        format!("splice pipe -> socket accepted zero bytes with {pending} bytes pending"),
        ErrorCategory::DirectionFatal,
    )
}
