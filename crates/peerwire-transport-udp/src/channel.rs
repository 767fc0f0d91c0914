use std::{
    fmt, io,
    net::{Shutdown, SocketAddr},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use peerwire_core::{
    Channel, ChannelBase, CoreError, Piece, PieceRead, PieceSource, REMOTE_INET_ADDRESS, Result,
    TransportKind, codes,
};
use socket2::SockRef;
use tokio::net::UdpSocket;

use crate::error::{self, map_io_error};

/// 基于单个 UDP 套接字的数据报通道。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 服务端只有一个套接字，却要面对多个对端：每个数据报作为一片投递，
///   片的 `remote` 即发送者，回复据此寻址；
/// - 超时处置在没有固定远端时需要一个兜底地址，因此每收到一个数据报，
///   就把发送者写入 [`REMOTE_INET_ADDRESS`] 通道属性。
///
/// ## 契约（What）
/// - 已连接通道：`remote_addr` 为连接目标，只收该目标的数据报，`send` 可省略接收者；
/// - 未连接通道：`remote_addr` 为 `None`，`send` 必须指定接收者，
///   否则返回 `peerwire.channel.receiver_required`；
/// - 空数据报是合法的一片；数据报通道永远不会读到流结束。
///
/// ## 风险（Trade-offs）
/// - 超过 `buffer_size` 的数据报会被内核截断。
pub struct UdpChannel {
    base: ChannelBase,
    socket: UdpSocket,
    connected: Option<SocketAddr>,
    buffer_size: usize,
}

impl UdpChannel {
    /// 包装已绑定（可能已连接）的套接字。
    pub fn from_socket(socket: UdpSocket, buffer_size: usize) -> Result<Arc<Self>> {
        let local = socket
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;
        let connected = socket.peer_addr().ok();
        Ok(Arc::new(Self {
            base: ChannelBase::new(TransportKind::Datagram, local, connected),
            socket,
            connected,
            buffer_size: buffer_size.max(1),
        }))
    }

    /// 绑定到 `addr` 的未连接通道。
    pub async fn bind(addr: SocketAddr, buffer_size: usize) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|err| map_io_error(error::BIND, err))?;
        Self::from_socket(socket, buffer_size)
    }

    /// 绑定到与 `remote` 同族的任意本地端口并连接。
    pub async fn connect(remote: SocketAddr, buffer_size: usize) -> Result<Arc<Self>> {
        let local = if remote.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0_u16; 8], 0))
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|err| map_io_error(error::BIND, err))?;
        socket
            .connect(remote)
            .await
            .map_err(|err| map_io_error(error::CONNECT, err))?;
        Self::from_socket(socket, buffer_size)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    fn receive_into(&self, buffer: &mut BytesMut) -> io::Result<(usize, SocketAddr)> {
        match self.connected {
            Some(remote) => self.socket.try_recv(buffer).map(|read| (read, remote)),
            None => self.socket.try_recv_from(buffer),
        }
    }
}

#[async_trait]
impl Channel for UdpChannel {
    fn base(&self) -> &ChannelBase {
        &self.base
    }

    fn shutdown_transport(&self) {
        if let Err(err) = SockRef::from(&self.socket).shutdown(Shutdown::Both)
            && err.kind() != io::ErrorKind::NotConnected
        {
            tracing::trace!(channel = %self.id(), error = %err, "udp shutdown failed");
        }
    }

    async fn send(
        &self,
        bytes: Bytes,
        sender: SocketAddr,
        receiver: Option<SocketAddr>,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(CoreError::transport(
                codes::CHANNEL_CLOSED,
                format!("channel {} is closed", self.id()),
            ));
        }
        let Some(target) = receiver.or(self.connected) else {
            return Err(CoreError::transport(
                codes::CHANNEL_RECEIVER_REQUIRED,
                format!("channel {} is not connected and no receiver was given", self.id()),
            ));
        };
        tracing::debug!(
            channel = %self.id(),
            len = bytes.len(),
            sender = %sender,
            receiver = %target,
            "sending datagram"
        );
        let sent = if self.connected == Some(target) {
            self.socket.send(&bytes).await
        } else {
            self.socket.send_to(&bytes, target).await
        };
        sent.map(|_| ())
            .map_err(|err| map_io_error(error::WRITE, err))
    }
}

#[async_trait]
impl PieceSource for UdpChannel {
    async fn read_piece(&self) -> Result<PieceRead> {
        loop {
            self.socket
                .readable()
                .await
                .map_err(|err| map_io_error(error::READ, err))?;
            match self.try_read_piece()? {
                PieceRead::WouldBlock => continue,
                read => return Ok(read),
            }
        }
    }

    fn try_read_piece(&self) -> Result<PieceRead> {
        let mut buffer = BytesMut::zeroed(self.buffer_size);
        match self.receive_into(&mut buffer) {
            Ok((read, from)) => {
                buffer.truncate(read);
                self.attributes().set(&REMOTE_INET_ADDRESS, from);
                Ok(PieceRead::Piece(Piece::new(
                    buffer.freeze(),
                    self.local_addr(),
                    from,
                )))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(PieceRead::WouldBlock),
            Err(err) => Err(map_io_error(error::READ, err)),
        }
    }
}

impl fmt::Debug for UdpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpChannel")
            .field("base", &self.base)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}
