use std::{fmt, sync::Arc};

use crate::{
    error::{CoreError, Result},
    message::{PipelineEvent, PipelineMessage},
};

use super::context::HandlerContext;

/// 入站事件处理合约，面向从传输层到应用层的正向数据流。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 对齐 Netty `ChannelInboundHandler` 的四类回调：激活、失活、读、用户事件，外加异常；
/// - 默认实现全部“原样转发”，实现者只需覆写关心的回调。
///
/// ## 契约（What）
/// - 同一通道上的回调按事件顺序串行调用；不同通道的回调可能并发，
///   共享实例必须自行保证线程安全；
/// - 不调用 `ctx.fire_*` 即表示事件在此终止；
/// - 回调是同步的，耗时工作应交给独立任务。
pub trait InboundHandler: Send + Sync + 'static {
    fn on_channel_active(&self, ctx: &HandlerContext<'_>) {
        ctx.fire_channel_active();
    }

    fn on_channel_inactive(&self, ctx: &HandlerContext<'_>) {
        ctx.fire_channel_inactive();
    }

    fn on_read(&self, ctx: &HandlerContext<'_>, msg: PipelineMessage) {
        ctx.fire_read(msg);
    }

    fn on_event(&self, ctx: &HandlerContext<'_>, event: PipelineEvent) {
        ctx.fire_event(event);
    }

    fn on_exception(&self, ctx: &HandlerContext<'_>, error: CoreError) {
        ctx.fire_exception(error);
    }
}

/// 出站事件处理合约，消息自尾向头流动。
///
/// 抵达头部的消息必须已编码为 [`PipelineMessage::Buffer`]，由管道排入待发送队列。
pub trait OutboundHandler: Send + Sync + 'static {
    fn on_write(&self, ctx: &HandlerContext<'_>, msg: PipelineMessage) -> Result<()> {
        ctx.write(msg)
    }
}

/// Handler 参与的方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerDirection {
    Inbound,
    Outbound,
    Duplex,
}

/// 注册到管道中的 Handler 句柄。
///
/// 同一个对象可以同时以入站、出站两种能力注册（全双工），两侧共享同一 `Arc`。
#[derive(Clone)]
pub struct Handler {
    inbound: Option<Arc<dyn InboundHandler>>,
    outbound: Option<Arc<dyn OutboundHandler>>,
}

impl Handler {
    pub fn inbound<H: InboundHandler>(handler: H) -> Self {
        Self::from_inbound(Arc::new(handler))
    }

    pub fn outbound<H: OutboundHandler>(handler: H) -> Self {
        Self::from_outbound(Arc::new(handler))
    }

    pub fn duplex<H: InboundHandler + OutboundHandler>(handler: H) -> Self {
        Self::from_duplex(Arc::new(handler))
    }

    /// 以共享引用注册入站能力，常用于跨通道复用的共享 Handler。
    pub fn from_inbound(handler: Arc<dyn InboundHandler>) -> Self {
        Self {
            inbound: Some(handler),
            outbound: None,
        }
    }

    pub fn from_outbound(handler: Arc<dyn OutboundHandler>) -> Self {
        Self {
            inbound: None,
            outbound: Some(handler),
        }
    }

    pub fn from_duplex<H: InboundHandler + OutboundHandler>(handler: Arc<H>) -> Self {
        let inbound: Arc<dyn InboundHandler> = handler.clone();
        let outbound: Arc<dyn OutboundHandler> = handler;
        Self {
            inbound: Some(inbound),
            outbound: Some(outbound),
        }
    }

    pub fn direction(&self) -> HandlerDirection {
        match (self.inbound.is_some(), self.outbound.is_some()) {
            (true, true) => HandlerDirection::Duplex,
            (false, true) => HandlerDirection::Outbound,
            _ => HandlerDirection::Inbound,
        }
    }

    pub(crate) fn inbound_ref(&self) -> Option<&dyn InboundHandler> {
        self.inbound.as_deref()
    }

    pub(crate) fn outbound_ref(&self) -> Option<&dyn OutboundHandler> {
        self.outbound.as_deref()
    }

    /// 两个句柄是否指向同一个入站实例。
    pub fn same_inbound(&self, other: &Handler) -> bool {
        match (&self.inbound, &other.inbound) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("direction", &self.direction())
            .finish()
    }
}
