use std::{borrow::Cow, fmt, net::SocketAddr};

/// 160 位节点标识。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId([u8; PeerId::LEN]);

impl PeerId {
    pub const LEN: usize = 20;

    pub const fn new(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    /// 从 40 个十六进制字符解析；长度或字符非法时返回 `None`。
    pub fn from_hex(text: &str) -> Option<Self> {
        let mut bytes = [0u8; Self::LEN];
        hex::decode_to_slice(text, &mut bytes).ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

/// 对端身份。
///
/// `Unknown` 表示“只知道套接字地址、尚未解出节点标识”，不携带任何额外语义；
/// 它取代了以全零标识充当哨兵的做法，调用方无需再做零值比较。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerIdentity {
    Known(PeerId),
    Unknown,
}

impl PeerIdentity {
    pub fn peer_id(&self) -> Option<PeerId> {
        match self {
            Self::Known(id) => Some(*id),
            Self::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

/// 对端地址：身份 + 套接字地址。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    identity: PeerIdentity,
    socket_addr: SocketAddr,
}

impl PeerAddress {
    pub fn new(peer_id: PeerId, socket_addr: SocketAddr) -> Self {
        Self {
            identity: PeerIdentity::Known(peer_id),
            socket_addr,
        }
    }

    /// 仅凭套接字地址构造，身份标记为 [`PeerIdentity::Unknown`]。
    pub fn unknown(socket_addr: SocketAddr) -> Self {
        Self {
            identity: PeerIdentity::Unknown,
            socket_addr,
        }
    }

    pub fn identity(&self) -> PeerIdentity {
        self.identity
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.socket_addr
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.identity {
            PeerIdentity::Known(id) => write!(f, "{id}@{}", self.socket_addr),
            PeerIdentity::Unknown => write!(f, "?@{}", self.socket_addr),
        }
    }
}

/// 对端失败的归因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbortCause {
    /// 空闲超时。
    Timeout,
    /// 对端返回错误。
    PeerError,
    /// 对端主动中止。
    PeerAbort,
    /// 本地关闭。
    Shutdown,
    /// 多次失败后推定离线。
    ProbablyOffline,
    /// 用户取消。
    UserAbort,
}

/// 通知给 [`PeerStatusListener`](crate::timeout::PeerStatusListener) 的失败原因。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerFailure {
    cause: AbortCause,
    message: Cow<'static, str>,
}

impl PeerFailure {
    pub fn new(cause: AbortCause, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }

    /// 超时子系统上报的标准失败。
    pub fn timeout() -> Self {
        Self::new(AbortCause::Timeout, "Timeout!")
    }

    pub fn cause(&self) -> AbortCause {
        self.cause
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PeerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.cause, self.message)
    }
}
