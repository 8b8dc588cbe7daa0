#![doc = r#"
# spark-transport-splice

## 模块使命（Why）
- **零拷贝中继**：在前端监听套接字与固定后端地址之间透明转发字节，借助内核的 `splice(2)`
  经由中转管道搬运页面，负载字节从不进入用户态内存。
- **结构性背压**：每个方向由一个显式状态机驱动“灌入管道 → 冲刷管道”两个步骤，目的端阻塞
  时源端自然停止读取，无需额外的流控机制。
- **错误分级**：启动期、会话级、方向级与瞬时错误各有明确去向，会话内的失败从不影响接受循环。

## 核心契约（What）
- [`PipeCapacity`]：启动期探测一次的管道容量，也是单个步骤的搬运上限；
- [`drain_into_pipe`] / [`drain_from_pipe`]：单方向的非阻塞 splice 步骤；
- [`SplicePump`]：`Running → Draining → Closed` 状态机，退出时关闭两端并释放管道；
- [`handle_connection`]：拨通后端并为每个方向派生一个泵任务；
- [`RelayListener`]：绑定监听地址，为每个入站连接派生会话任务。

## 实现策略（How）
- 套接字就绪通知复用 Tokio 的 `ready` / `try_io`，挂起的只有任务而非 OS 线程；
- 管道与 splice 系统调用通过 `nix` 重导出的 `libc` 完成，描述符交给 `OwnedFd` 管理；
- 关闭与 `SO_LINGER` 通过 `socket2::SockRef` 完成，错误统一由 `thiserror` 派生的 [`RelayError`] 表达。

## 平台约束
- 仅支持 Linux：`splice(2)`、`pipe2(2)` 与 `F_GETPIPE_SZ` 均为 Linux 专有接口。
"#]

#[cfg(not(target_os = "linux"))]
compile_error!("spark-transport-splice 依赖 Linux 专有的 splice(2)，仅支持 target_os = \"linux\"");

mod addr;
mod config;
mod error;
mod handler;
mod listener;
mod pipe;
mod pump;
mod socket;
mod step;

pub use config::{RelayConfig, SocketOptions};
pub use error::{ErrorCategory, RelayError};
pub use handler::{RelayContext, RelaySession, SessionId, handle_connection};
pub use listener::RelayListener;
pub use pipe::{PipeBuffer, PipeCapacity};
pub use pump::{Direction, PumpReport, PumpState, SplicePump, Termination};
pub use socket::SpliceSocket;
pub use step::{StepOutcome, drain_from_pipe, drain_into_pipe};
