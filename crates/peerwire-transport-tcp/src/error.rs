use std::io;

use peerwire_core::{CoreError, ErrorCategory};

/// 一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "peerwire.transport.tcp.bind_failed",
    message: "tcp bind",
};
pub(crate) const ACCEPT: OperationKind = OperationKind {
    code: "peerwire.transport.tcp.accept_failed",
    message: "tcp accept",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "peerwire.transport.tcp.connect_failed",
    message: "tcp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "peerwire.transport.tcp.read_failed",
    message: "tcp read",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "peerwire.transport.tcp.write_failed",
    message: "tcp write",
};
pub(crate) const CONFIGURE: OperationKind = OperationKind {
    code: "peerwire.transport.tcp.configure_failed",
    message: "tcp configure",
};

/// 将 IO 错误映射为 [`CoreError`]，原始错误保留为 `cause`。
pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> CoreError {
    let category = categorize_io_error(&error);
    CoreError::new(kind.code, format!("{}: {}", kind.message, error))
        .with_category(category)
        .with_cause(error)
}

fn categorize_io_error(error: &io::Error) -> ErrorCategory {
    match error.kind() {
        io::ErrorKind::TimedOut => ErrorCategory::Timeout,
        _ => ErrorCategory::Transport,
    }
}
