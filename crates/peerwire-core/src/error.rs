use std::{borrow::Cow, error::Error, fmt};

/// 底层原因的统一装箱形式。
pub type ErrorCause = Box<dyn Error + Send + Sync + 'static>;

/// `peerwire` 的统一返回别名。
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

/// `CoreError` 表示通道、管道与超时子系统之间共享的稳定错误域。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 传输失败、空闲超时、准入拒绝与取消在不同层产生，但最终都要进入日志与监听器回调，
///   因此需要合流为“稳定错误码 + 分类”的统一结构；
/// - 分类（[`ErrorCategory`]）决定传播策略：`Transport` 关闭通道，`Timeout` 在本地恢复后上报监听器，
///   `AdmissionRejected` 只体现为连接关闭，`Cancelled` 视为正常退出。
///
/// ## 契约（What）
/// - `code`：`peerwire.<领域>.<语义>` 形式的 `'static` 字符串，参见 [`codes`]；
/// - `message`：面向排障人员的描述；
/// - `cause`：可选底层原因，通过 [`Error::source`] 暴露；
/// - **后置条件**：构造结果满足 `Send + Sync + 'static`，可跨任务移动。
#[derive(Debug)]
pub struct CoreError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    cause: Option<ErrorCause>,
}

impl CoreError {
    /// 构造核心错误，分类默认为 [`ErrorCategory::Transport`]。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            category: ErrorCategory::Transport,
            cause: None,
        }
    }

    /// 套接字层失败（建连、发送、接收）。
    pub fn transport(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(code, message).with_category(ErrorCategory::Transport)
    }

    /// 空闲阈值被突破。
    pub fn timeout(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::CHANNEL_IDLE_TIMEOUT, message).with_category(ErrorCategory::Timeout)
    }

    /// 协作式取消，通常由通道关闭触发。
    pub fn cancelled(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::CHANNEL_CANCELLED, message).with_category(ErrorCategory::Cancelled)
    }

    /// 连接数超过准入上限。
    pub fn admission_rejected(current: usize, limit: usize) -> Self {
        Self::new(
            codes::ADMISSION_REJECTED,
            format!("{current} > {limit} connections active"),
        )
        .with_category(ErrorCategory::AdmissionRejected)
    }

    /// 覆盖分类。
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    /// 附带底层原因。
    pub fn with_cause(mut self, cause: impl Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn cause(&self) -> Option<&ErrorCause> {
        self.cause.as_ref()
    }

    /// 是否为超时类错误，便于挂起请求的调用方快速判定。
    pub fn is_timeout(&self) -> bool {
        self.category == ErrorCategory::Timeout
    }

    /// 是否为取消信号。取消不是故障，调用方不应按错误记录。
    pub fn is_cancelled(&self) -> bool {
        self.category == ErrorCategory::Cancelled
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Error for CoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_ref()
            .map(|boxed| boxed.as_ref() as &(dyn Error + 'static))
    }
}

/// 错误分类，驱动传播策略。
///
/// - `Transport`：对当前通道致命，传播给失败操作的调用方并关闭通道；
/// - `Timeout`：在超时子系统内恢复，仅经由监听器与挂起请求对外可见；
/// - `AdmissionRejected`：立即关闭并记录诊断，不向任何调用方抛出；
/// - `Cancelled`：接收循环的正常退出条件；
/// - `Configuration` / `Pipeline`：装配期错误。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    Transport,
    Timeout,
    AdmissionRejected,
    Cancelled,
    Configuration,
    Pipeline,
}

/// 稳定错误码。
pub mod codes {
    pub const CHANNEL_IDLE_TIMEOUT: &str = "peerwire.channel.idle_timeout";
    pub const CHANNEL_CANCELLED: &str = "peerwire.channel.cancelled";
    pub const CHANNEL_CLOSED: &str = "peerwire.channel.closed";
    pub const CHANNEL_SEND_FAILED: &str = "peerwire.channel.send_failed";
    pub const CHANNEL_RECEIVER_REQUIRED: &str = "peerwire.channel.receiver_required";
    pub const ADMISSION_REJECTED: &str = "peerwire.admission.rejected";
    pub const PIPELINE_ALREADY_BOUND: &str = "peerwire.pipeline.already_bound";
    pub const PIPELINE_DUPLICATE_NAME: &str = "peerwire.pipeline.duplicate_name";
    pub const PIPELINE_UNKNOWN_NAME: &str = "peerwire.pipeline.unknown_name";
    pub const PIPELINE_UNEXPECTED_OUTBOUND: &str = "peerwire.pipeline.unexpected_outbound";
    pub const RESPONSE_ABANDONED: &str = "peerwire.response.abandoned";
    pub const CONFIG_INVALID: &str = "peerwire.config.invalid";
}
