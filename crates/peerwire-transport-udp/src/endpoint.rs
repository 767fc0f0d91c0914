use std::{net::SocketAddr, sync::Arc};

use peerwire_core::{
    Channel, Connection, CoreError, PipelineMessage, PipelineTemplate, ReceiveExit, Result,
    TransportConfig, run_receive_loop,
};
use tokio::task::JoinHandle;

use crate::channel::UdpChannel;

/// 装配好管道并正在接收的数据报端点。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// `bind`/`connect` 创建通道 → 以模板装配管道 → 分发 `channel_active` → 派生接收任务。
///
/// ## 契约（What）
/// - 服务端端点（`bind`）只有一个通道，所有对端共享同一条管道，
///   因此模板中的 Handler 必须以片的 `remote` 区分对端；
/// - 处理某片时排队的回复发往该片的发送者；
/// - 服务端端点上每个数据报自成一个会话，超时只上报并结束该会话，端点继续服务所有发送者；
/// - 端点被丢弃时关闭通道，接收任务随之以 `Closed` 结束。
#[derive(Debug)]
pub struct UdpEndpoint {
    connection: Connection,
    receive: Option<JoinHandle<ReceiveExit>>,
}

impl UdpEndpoint {
    /// 绑定未连接的服务端端点。
    pub async fn bind(
        addr: SocketAddr,
        template: &PipelineTemplate,
        config: &TransportConfig,
    ) -> Result<Self> {
        config.validate()?;
        let udp = UdpChannel::bind(addr, config.receive_buffer_size).await?;
        Self::start(udp, template, config)
    }

    /// 创建连接到 `remote` 的客户端端点。
    pub async fn connect(
        remote: SocketAddr,
        template: &PipelineTemplate,
        config: &TransportConfig,
    ) -> Result<Self> {
        config.validate()?;
        let udp = UdpChannel::connect(remote, config.receive_buffer_size).await?;
        Self::start(udp, template, config)
    }

    fn start(
        udp: Arc<UdpChannel>,
        template: &PipelineTemplate,
        config: &TransportConfig,
    ) -> Result<Self> {
        let channel: Arc<dyn Channel> = udp.clone();
        let pipeline = match template.build(&channel) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                channel.close();
                return Err(err);
            }
        };
        tracing::debug!(
            channel = %channel.id(),
            local = %channel.local_addr(),
            remote = ?channel.remote_addr(),
            label = %config.connection_label,
            "udp endpoint ready"
        );
        pipeline.fire_channel_active();

        let interval = config.idle_check_interval();
        let task_channel = Arc::clone(&channel);
        let receive = tokio::spawn(async move {
            run_receive_loop(task_channel, udp.as_ref(), interval).await
        });
        Ok(Self {
            connection: Connection::new(channel, pipeline),
            receive: Some(receive),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.connection.channel().local_addr()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// 经出站链写入并发往连接目标；未连接端点返回 `peerwire.channel.receiver_required`。
    pub async fn send(&self, msg: PipelineMessage) -> Result<()> {
        self.connection.write(msg).await
    }

    pub async fn send_to(&self, msg: PipelineMessage, receiver: SocketAddr) -> Result<()> {
        self.connection.write_to(msg, Some(receiver)).await
    }

    pub fn close(&self) -> bool {
        self.connection.close()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// 等待接收任务结束并取得退出原因。
    ///
    /// 只有通道被关闭（例如经 [`UdpEndpoint::connection`] 的克隆或某个 Handler）后才会返回。
    pub async fn finished(mut self) -> ReceiveExit {
        let Some(receive) = self.receive.take() else {
            return ReceiveExit::Closed;
        };
        match receive.await {
            Ok(exit) => exit,
            Err(err) => ReceiveExit::Failed(CoreError::cancelled(format!(
                "udp receive task ended abnormally: {err}"
            ))),
        }
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        self.connection.close();
    }
}
