use std::borrow::Cow;
use std::io;
use thiserror::Error;

/// 中继错误的影响范围分类。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 中继的错误处理策略完全由“影响范围”决定：启动期错误终止进程、会话级错误只放弃
///   当前连接、方向级错误只终止一个泵，瞬时错误则永不视为失败；
/// - 将范围编码为枚举，调用方据此决定“退出 / 记录并继续”，避免依赖字符串匹配。
///
/// ## 契约 (What)
/// - [`ErrorCategory::StartupFatal`]：监听地址解析/绑定、管道容量探测、接受循环失败；
/// - [`ErrorCategory::SessionFatal`]：后端解析/拨号、套接字配置、会话管道创建失败；
/// - [`ErrorCategory::DirectionFatal`]：splice 步骤中除 EOF 与 would-block 之外的错误；
/// - [`ErrorCategory::Transient`]：`WouldBlock`/`Interrupted`，只会在步骤内部重试。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCategory {
    StartupFatal,
    SessionFatal,
    DirectionFatal,
    Transient,
}

impl ErrorCategory {
    /// 是否需要终止整个进程。
    pub fn is_process_fatal(self) -> bool {
        matches!(self, ErrorCategory::StartupFatal)
    }
}

/// 描述一次底层操作对应的稳定错误码、默认文案与影响范围。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
    pub category: ErrorCategory,
}

pub(crate) const RESOLVE_LISTEN: OperationKind = OperationKind {
    code: "spark.transport.splice.resolve_listen_failed",
    message: "resolve listen address",
    category: ErrorCategory::StartupFatal,
};
pub(crate) const BIND: OperationKind = OperationKind {
    code: "spark.transport.splice.bind_failed",
    message: "tcp bind",
    category: ErrorCategory::StartupFatal,
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "spark.transport.splice.accept_failed",
    message: "tcp accept",
    category: ErrorCategory::StartupFatal,
};
pub(crate) const PIPE_PROBE: OperationKind = OperationKind {
    code: "spark.transport.splice.pipe_probe_failed",
    message: "probe pipe capacity",
    category: ErrorCategory::StartupFatal,
};
pub(crate) const RESOLVE_BACKEND: OperationKind = OperationKind {
    code: "spark.transport.splice.resolve_backend_failed",
    message: "resolve back-end address",
    category: ErrorCategory::SessionFatal,
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "spark.transport.splice.connect_failed",
    message: "tcp connect",
    category: ErrorCategory::SessionFatal,
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "spark.transport.splice.configure_failed",
    message: "tcp configure",
    category: ErrorCategory::SessionFatal,
};
pub(crate) const PIPE_CREATE: OperationKind = OperationKind {
    code: "spark.transport.splice.pipe_create_failed",
    message: "create pipe",
    category: ErrorCategory::SessionFatal,
};
pub(crate) const SPLICE_IN: OperationKind = OperationKind {
    code: "spark.transport.splice.splice_in_failed",
    message: "splice socket -> pipe",
    category: ErrorCategory::DirectionFatal,
};
pub(crate) const SPLICE_OUT: OperationKind = OperationKind {
    code: "spark.transport.splice.splice_out_failed",
    message: "splice pipe -> socket",
    category: ErrorCategory::DirectionFatal,
};

const CONFIG_INVALID_CODE: &str = "spark.transport.splice.config_invalid";

/// 中继全链路共享的结构化错误。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 每个错误都携带稳定错误码与 [`ErrorCategory`]，日志与调用方可以据此聚合、告警，
///   而无需解析自然语言文案；
/// - 保留底层 `io::Error` 作为 `source`，排障时不丢失 errno 细节。
///
/// ## 契约 (What)
/// - `code`：形如 `spark.transport.splice.*` 的稳定错误码；
/// - `category`：影响范围，决定调用方是退出进程还是仅记录；
/// - `io_kind`：若错误源自系统调用，返回其 [`io::ErrorKind`]。
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RelayError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    #[source]
    source: Option<io::Error>,
}

impl RelayError {
    /// 构造不携带底层 IO 错误的中继错误。
    pub fn new(
        code: &'static str,
        message: impl Into<Cow<'static, str>>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            category,
            source: None,
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 返回人类可读文案。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 返回影响范围分类。
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// 若错误由系统调用产生，返回其 `io::ErrorKind`。
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        self.source.as_ref().map(io::Error::kind)
    }
}

/// 将 IO 错误映射为中继错误，并附带错误分类。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> RelayError {
    let category = if is_transient(&error) {
        ErrorCategory::Transient
    } else {
        kind.category
    };
    RelayError {
        code: kind.code,
        message: Cow::Owned(format!("{}: {}", kind.message, error)),
        category,
        source: Some(error),
    }
}

/// 构造配置校验错误，属于启动期致命错误。
pub(crate) fn config_error(message: impl Into<Cow<'static, str>>) -> RelayError {
    RelayError::new(CONFIG_INVALID_CODE, message, ErrorCategory::StartupFatal)
}

/// `WouldBlock` 与 `Interrupted` 只意味着“稍后重试”，从不视为失败。
pub(crate) fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
