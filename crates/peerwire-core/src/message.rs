use std::{any::Any, fmt, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use tokio::time::Instant;

/// 一次传输读取得到的原始字节块，附带本地与远端端点。
///
/// 流式传输中一个 piece 可能是半条、一条或多条逻辑消息，重组由下游解码器负责。
#[derive(Clone, PartialEq, Eq)]
pub struct Piece {
    bytes: Bytes,
    local: SocketAddr,
    remote: SocketAddr,
}

impl Piece {
    pub fn new(bytes: Bytes, local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            bytes,
            local,
            remote,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }
}

impl fmt::Debug for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Piece")
            .field("len", &self.bytes.len())
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish()
    }
}

/// 在管道中流动的消息。
///
/// - `Piece`：接收循环投递的原始片；
/// - `Buffer`：已编码、等待写出的字节，出站链路抵达头部时只接受这一形态；
/// - `User`：解码后的业务对象，类型由相邻 Handler 约定。
#[derive(Debug)]
pub enum PipelineMessage {
    Piece(Piece),
    Buffer(Bytes),
    User(Box<dyn Any + Send + Sync>),
}

impl PipelineMessage {
    pub fn user<T: Any + Send + Sync>(value: T) -> Self {
        Self::User(Box::new(value))
    }

    /// 尝试取出指定类型的业务对象，类型不符时原样返还。
    pub fn downcast_user<T: Any>(self) -> Result<T, Self> {
        match self {
            Self::User(boxed) if boxed.is::<T>() => match boxed.downcast::<T>() {
                Ok(value) => Ok(*value),
                Err(boxed) => Err(Self::User(boxed)),
            },
            other => Err(other),
        }
    }
}

impl From<Piece> for PipelineMessage {
    fn from(piece: Piece) -> Self {
        Self::Piece(piece)
    }
}

impl From<Bytes> for PipelineMessage {
    fn from(bytes: Bytes) -> Self {
        Self::Buffer(bytes)
    }
}

/// 管道用户事件。
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// 接收任务按配置间隔投递的空闲检查节拍，携带本次检查时刻。
    IdleCheck(Instant),
    /// 空闲检测器判定本轮空闲期已越过阈值。每个空闲期只出现一次。
    Idle,
    /// 超时处置已完成，会话被标记为超时。
    Timeout,
    User(Arc<dyn Any + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_user_returns_original_on_mismatch() {
        let msg = PipelineMessage::user(42u32);
        let msg = match msg.downcast_user::<String>() {
            Ok(_) => panic!("u32 must not downcast to String"),
            Err(original) => original,
        };
        assert_eq!(msg.downcast_user::<u32>().ok(), Some(42));
    }

    #[test]
    fn piece_debug_hides_payload() {
        let addr: SocketAddr = "127.0.0.1:1".parse().expect("addr");
        let piece = Piece::new(Bytes::from_static(b"secret"), addr, addr);
        let rendered = format!("{piece:?}");
        assert!(rendered.contains("len: 6"));
        assert!(!rendered.contains("secret"));
    }
}
