use std::{net::SocketAddr, sync::Arc};

use peerwire_core::{
    Channel, Connection, PipelineTemplate, ReceiveExit, Result, TransportConfig, run_receive_loop,
};
use tokio::task::JoinHandle;

use crate::channel::TcpChannel;

/// TCP 客户端连接器。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// 建连 → 以模板装配管道 → 分发 `channel_active` → 派生接收任务。
///
/// ## 契约（What）
/// - 超时阶段由调用方按请求放入模板（[`TimeoutFactory::client`](peerwire_core::TimeoutFactory::client)），
///   连接器只负责传输层；
/// - 返回的 `JoinHandle` 在接收循环结束时给出退出原因；
/// - 若模板中的 Handler 在激活阶段关闭了通道，仍然返回连接，接收任务会立即以 `Closed` 结束。
#[derive(Debug)]
pub struct TcpClient;

impl TcpClient {
    pub async fn connect(
        remote: SocketAddr,
        template: &PipelineTemplate,
        config: &TransportConfig,
    ) -> Result<(Connection, JoinHandle<ReceiveExit>)> {
        config.validate()?;
        let tcp = TcpChannel::connect(remote, config.receive_buffer_size).await?;
        let channel: Arc<dyn Channel> = tcp.clone();
        let pipeline = match template.build(&channel) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                channel.close();
                return Err(err);
            }
        };
        tracing::trace!(
            channel = %channel.id(),
            local = %channel.local_addr(),
            remote = %remote,
            "tcp client connected"
        );
        pipeline.fire_channel_active();

        let interval = config.idle_check_interval();
        let task_channel = Arc::clone(&channel);
        let receive = tokio::spawn(async move {
            run_receive_loop(task_channel, tcp.as_ref(), interval).await
        });
        Ok((Connection::new(channel, pipeline), receive))
    }
}
