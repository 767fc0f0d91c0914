use std::io;

use peerwire_core::{CoreError, ErrorCategory};

/// 一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug)]
pub(crate) struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub(crate) const BIND: OperationKind = OperationKind {
    code: "peerwire.transport.udp.bind_failed",
    message: "udp bind",
};
pub(crate) const CONNECT: OperationKind = OperationKind {
    code: "peerwire.transport.udp.connect_failed",
    message: "udp connect",
};
pub(crate) const READ: OperationKind = OperationKind {
    code: "peerwire.transport.udp.recv_failed",
    message: "udp recv",
};
pub(crate) const WRITE: OperationKind = OperationKind {
    code: "peerwire.transport.udp.send_failed",
    message: "udp send",
};

pub(crate) fn map_io_error(kind: OperationKind, error: io::Error) -> CoreError {
    let category = match error.kind() {
        io::ErrorKind::TimedOut => ErrorCategory::Timeout,
        _ => ErrorCategory::Transport,
    };
    CoreError::new(kind.code, format!("{}: {}", kind.message, error))
        .with_category(category)
        .with_cause(error)
}
