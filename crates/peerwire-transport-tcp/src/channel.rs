use std::{
    fmt, io,
    net::{Shutdown, SocketAddr},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use peerwire_core::{
    Channel, ChannelBase, CoreError, Piece, PieceRead, PieceSource, Result, TransportKind, codes,
};
use socket2::{SockRef, Socket};
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::Mutex as AsyncMutex,
};

use crate::error::{self, map_io_error};

/// 单条 TCP 连接上的通道。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 接收循环与写入方需要同时操作同一连接，因此把流拆成独立的读、写半部；
/// - 关闭必须是同步的，并且要唤醒在途读取，所以额外保留一个复制出来的套接字句柄，
///   由它执行 `shutdown(Both)`。
///
/// ## 逻辑（How）
/// - 读半部只通过 `readable` + `try_read` 访问，二者都只需要 `&self`，读取天然可取消；
/// - 写半部放在 `tokio::sync::Mutex` 中，保证一次 `send` 的字节不会与其他写入交错；
/// - 每次读取最多 `buffer_size` 字节，一次读取即一片，不做消息重组。
///
/// ## 契约（What）
/// - `send` 写满全部字节才返回；流式通道忽略 `receiver`，总是发往对端；
/// - `shutdown_transport` 失败只记录 `trace`，关闭本身总是成功。
///
/// ## 风险（Trade-offs）
/// - 每片都分配一块新的缓冲区，换取片在管道中可以被自由持有。
pub struct TcpChannel {
    base: ChannelBase,
    remote: SocketAddr,
    reader: OwnedReadHalf,
    writer: AsyncMutex<OwnedWriteHalf>,
    socket: Socket,
    buffer_size: usize,
}

impl TcpChannel {
    /// 包装已建立的连接。
    pub fn from_stream(stream: TcpStream, buffer_size: usize) -> Result<Arc<Self>> {
        let local = stream
            .local_addr()
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        let remote = stream
            .peer_addr()
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        let socket = SockRef::from(&stream)
            .try_clone()
            .map_err(|err| map_io_error(error::CONFIGURE, err))?;
        let (reader, writer) = stream.into_split();
        Ok(Arc::new(Self {
            base: ChannelBase::new(TransportKind::Stream, local, Some(remote)),
            remote,
            reader,
            writer: AsyncMutex::new(writer),
            socket,
            buffer_size: buffer_size.max(1),
        }))
    }

    /// 建立到 `remote` 的连接。
    pub async fn connect(remote: SocketAddr, buffer_size: usize) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(remote)
            .await
            .map_err(|err| map_io_error(error::CONNECT, err))?;
        Self::from_stream(stream, buffer_size)
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    fn piece(&self, bytes: Bytes) -> Piece {
        Piece::new(bytes, self.local_addr(), self.remote)
    }
}

#[async_trait]
impl Channel for TcpChannel {
    fn base(&self) -> &ChannelBase {
        &self.base
    }

    fn shutdown_transport(&self) {
        if let Err(err) = self.socket.shutdown(Shutdown::Both)
            && err.kind() != io::ErrorKind::NotConnected
        {
            tracing::trace!(channel = %self.id(), error = %err, "tcp shutdown failed");
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
        tracing::debug!(
            channel = %self.id(),
            len = bytes.len(),
            sender = %sender,
            receiver = %receiver.unwrap_or(self.remote),
            "sending bytes"
        );
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&bytes)
            .await
            .map_err(|err| map_io_error(error::WRITE, err))
    }
}

#[async_trait]
impl PieceSource for TcpChannel {
    async fn read_piece(&self) -> Result<PieceRead> {
        loop {
            self.reader
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
        match self.reader.try_read(&mut buffer) {
            Ok(0) => Ok(PieceRead::EndOfStream),
            Ok(read) => {
                buffer.truncate(read);
                Ok(PieceRead::Piece(self.piece(buffer.freeze())))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(PieceRead::WouldBlock),
            Err(err) => Err(map_io_error(error::READ, err)),
        }
    }
}

impl fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpChannel")
            .field("base", &self.base)
            .field("buffer_size", &self.buffer_size)
            .finish()
    }
}
