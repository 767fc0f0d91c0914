use std::{net::SocketAddr, sync::Arc};

use crate::{
    channel::{Channel, ChannelId},
    error::Result,
    message::PipelineMessage,
    pipeline::Pipeline,
    session::send_frames,
};

/// 已装配管道的通道句柄，供上层发起写入与关闭。
#[derive(Clone, Debug)]
pub struct Connection {
    channel: Arc<dyn Channel>,
    pipeline: Arc<Pipeline>,
}

impl Connection {
    pub fn new(channel: Arc<dyn Channel>, pipeline: Arc<Pipeline>) -> Self {
        Self { channel, pipeline }
    }

    pub fn id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// 经出站链写入并冲刷到通道的固定远端。
    pub async fn write(&self, msg: PipelineMessage) -> Result<()> {
        self.write_to(msg, None).await
    }

    /// 经出站链写入并发往指定远端；未连接的数据报通道必须指定。
    ///
    /// 编码结果只由本次调用发送，与接收循环并发也不会被取走或改投。
    pub async fn write_to(&self, msg: PipelineMessage, receiver: Option<SocketAddr>) -> Result<()> {
        self.channel.ensure_open()?;
        let frames = self.pipeline.write(msg)?;
        send_frames(&self.channel, frames, receiver).await
    }

    pub fn close(&self) -> bool {
        self.channel.close()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    pub async fn closed(&self) {
        self.channel.closed().await
    }
}
