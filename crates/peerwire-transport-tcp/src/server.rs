use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
};

use dashmap::DashMap;
use peerwire_core::{
    Channel, ChannelId, DropConnectionInboundHandler, Handler, HandlerDescriptor,
    PeerStatusListeners, PieceRead, PieceSource, PipelineTemplate, ReceiveExit, Result,
    TimeoutFactory, TransportConfig, run_receive_loop,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
};

use crate::{
    channel::TcpChannel,
    error::{self, map_io_error},
};

/// 服务端管道中准入 Handler 的名称。
pub const ADMISSION_NAME: &str = "admission";

struct ServerShared {
    template: PipelineTemplate,
    config: TransportConfig,
    children: DashMap<ChannelId, Arc<TcpChannel>>,
    admission: Arc<DropConnectionInboundHandler>,
    listeners: Arc<PeerStatusListeners>,
}

/// 接受 TCP 连接并为每条连接装配管道、派生接收任务的服务端。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 服务端连接由监听器创建，调用方无从为每条连接单独装配治理阶段，
///   因此准入与超时阶段由服务端统一放在用户模板之前；
/// - 准入 Handler 在所有连接间共享一个实例，它的计数就是服务端当前准入的连接数。
///
/// ## 逻辑（How）
/// 1. `bind` 在用户模板前依次放入 `admission`、`timeout0`、`timeout1`；
/// 2. 接受循环为每条连接构建管道、登记到 `children`、分发 `channel_active`；
/// 3. 激活后通道已关闭（被准入拒绝）则不再服务；否则派生接收任务；
/// 4. 会话超时后接收任务不再分发，只丢弃后续数据直到对端关闭或服务端关闭。
///
/// ## 契约（What）
/// - `shutdown` 停止接受新连接并关闭所有存活连接，可重复调用；
/// - 连接关闭时自动从 `children` 注销。
pub struct TcpServer {
    local_addr: SocketAddr,
    shared: Arc<ServerShared>,
    stop: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl TcpServer {
    pub async fn bind(
        addr: SocketAddr,
        template: &PipelineTemplate,
        config: TransportConfig,
    ) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| map_io_error(error::BIND, err))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| map_io_error(error::BIND, err))?;

        let listeners = Arc::new(PeerStatusListeners::new());
        let admission = Arc::new(DropConnectionInboundHandler::new(config.connection_limit));
        let mut template = template.clone();
        TimeoutFactory::server(
            config.idle_timeout(),
            Arc::clone(&listeners),
            config.connection_label.as_str(),
        )
        .install_template(&mut template);
        template.add_first(
            ADMISSION_NAME,
            HandlerDescriptor::Shared(Handler::from_inbound(admission.clone())),
        );

        let shared = Arc::new(ServerShared {
            template,
            config,
            children: DashMap::new(),
            admission,
            listeners,
        });
        let (stop, stopped) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared), stopped));
        tracing::debug!(
            local = %local_addr,
            label = %shared.config.connection_label,
            limit = shared.config.connection_limit,
            "tcp server listening"
        );
        Ok(Self {
            local_addr,
            shared,
            stop,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 失败通知注册表，超时阶段向这里的监听器上报对端失败。
    pub fn listeners(&self) -> &Arc<PeerStatusListeners> {
        &self.shared.listeners
    }

    /// 当前被准入的连接数。
    pub fn active_connections(&self) -> usize {
        self.shared.admission.active_connections()
    }

    /// 仍登记在服务端的连接数，包含会话已超时但尚未关闭的连接。
    pub fn live_channels(&self) -> usize {
        self.shared.children.len()
    }

    /// 停止接受并关闭全部连接。
    pub fn shutdown(&self) {
        if self.stop.send_replace(true) {
            return;
        }
        self.accept_task.abort();
        let children: Vec<Arc<TcpChannel>> = self
            .shared
            .children
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        tracing::debug!(
            local = %self.local_addr,
            connections = children.len(),
            "tcp server shutting down"
        );
        for channel in children {
            channel.close();
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("local_addr", &self.local_addr)
            .field("live_channels", &self.live_channels())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<ServerShared>,
    mut stopped: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = async {
                let _ = stopped.wait_for(|stop| *stop).await;
            } => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => serve(&shared, stream, remote),
                Err(err) => {
                    let err = map_io_error(error::ACCEPT, err);
                    tracing::warn!(error = %err, "tcp accept failed");
                }
            },
        }
    }
    tracing::trace!("tcp accept loop finished");
}

fn serve(shared: &Arc<ServerShared>, stream: TcpStream, remote: SocketAddr) {
    let tcp = match TcpChannel::from_stream(stream, shared.config.receive_buffer_size) {
        Ok(tcp) => tcp,
        Err(err) => {
            tracing::warn!(remote = %remote, error = %err, "failed to wrap accepted connection");
            return;
        }
    };
    let channel: Arc<dyn Channel> = tcp.clone();
    let pipeline = match shared.template.build(&channel) {
        Ok(pipeline) => pipeline,
        Err(err) => {
            tracing::warn!(channel = %channel.id(), error = %err, "failed to build pipeline");
            channel.close();
            return;
        }
    };

    let id = channel.id();
    shared.children.insert(id, Arc::clone(&tcp));
    let registry: Weak<ServerShared> = Arc::downgrade(shared);
    channel.on_closed(Box::new(move || {
        if let Some(shared) = registry.upgrade() {
            shared.children.remove(&id);
        }
    }));

    pipeline.fire_channel_active();
    if channel.is_closed() {
        tracing::trace!(channel = %id, remote = %remote, "connection not admitted");
        return;
    }

    let interval = shared.config.idle_check_interval();
    tokio::spawn(async move {
        let exit = run_receive_loop(Arc::clone(&channel), tcp.as_ref(), interval).await;
        if matches!(exit, ReceiveExit::TimedOut) {
            discard_until_closed(tcp.as_ref(), tcp.as_ref()).await;
        }
    });
}

/// 会话超时后继续占住连接：丢弃到达的数据，直到对端关闭、读失败或服务端关闭。
async fn discard_until_closed(channel: &dyn Channel, source: &dyn PieceSource) {
    let mut cancellation = channel.cancellation();
    loop {
        tokio::select! {
            biased;
            _ = async {
                let _ = cancellation.wait_for(|closed| *closed).await;
            } => return,
            read = source.read_piece() => match read {
                Ok(PieceRead::Piece(piece)) => {
                    tracing::trace!(channel = %channel.id(), len = piece.len(), "discarding piece after session timeout");
                }
                Ok(PieceRead::WouldBlock) => {}
                Ok(PieceRead::EndOfStream) => {
                    channel.close();
                    return;
                }
                Err(err) => {
                    if !channel.is_closed() {
                        tracing::warn!(channel = %channel.id(), error = %err, "transport failure, closing channel");
                        channel.close();
                    }
                    return;
                }
            },
        }
    }
}
