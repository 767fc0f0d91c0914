use std::sync::Arc;

use crate::{
    attribute::{AttributeKey, AttributeMap},
    channel::Channel,
    error::{CoreError, Result},
    message::{PipelineEvent, PipelineMessage},
    session::Session,
};

use super::pipeline::{OutboundSink, Pipeline, Snapshot};

/// 单个 Handler 在单个通道上的执行上下文。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 以“快照 + 下标游标”代替继承链：上下文知道自己在链上的位置，
///   `fire_*` 从下一个位置继续入站分发，`write` 从上一个位置继续出站分发；
/// - 共享 Handler 通过上下文访问通道级属性与会话，这是它们看到连接级事实的唯一途径。
///
/// ## 契约（What）
/// - 上下文只在一次回调内有效，不可跨回调保存；
/// - 属性读写永不失败，缺失返回 `None`；
/// - 分发期间对管道的变更不影响当前快照，下一次事件才会看到新链。
pub struct HandlerContext<'a> {
    pipeline: &'a Pipeline,
    channel: &'a Arc<dyn Channel>,
    snapshot: &'a Snapshot,
    outbound: &'a OutboundSink,
    index: usize,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        pipeline: &'a Pipeline,
        channel: &'a Arc<dyn Channel>,
        snapshot: &'a Snapshot,
        outbound: &'a OutboundSink,
        index: usize,
    ) -> Self {
        Self {
            pipeline,
            channel,
            snapshot,
            outbound,
            index,
        }
    }

    /// 当前 Handler 在管道中的名称。
    pub fn name(&self) -> &str {
        self.snapshot[self.index].name()
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        self.channel
    }

    pub fn pipeline(&self) -> &Pipeline {
        self.pipeline
    }

    pub fn session(&self) -> &Arc<Session> {
        self.pipeline.session()
    }

    pub fn attributes(&self) -> &AttributeMap {
        self.channel.attributes()
    }

    pub fn attr<T>(&self, key: &AttributeKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.attributes().get(key)
    }

    pub fn set_attr<T>(&self, key: &AttributeKey<T>, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.attributes().set(key, value)
    }

    pub fn fire_channel_active(&self) {
        self.pipeline.dispatch_inbound(
            self.channel,
            self.snapshot,
            self.outbound,
            self.index + 1,
            |handler, ctx| handler.on_channel_active(ctx),
        );
    }

    pub fn fire_channel_inactive(&self) {
        self.pipeline.dispatch_inbound(
            self.channel,
            self.snapshot,
            self.outbound,
            self.index + 1,
            |handler, ctx| handler.on_channel_inactive(ctx),
        );
    }

    pub fn fire_read(&self, msg: PipelineMessage) {
        self.pipeline.dispatch_inbound(
            self.channel,
            self.snapshot,
            self.outbound,
            self.index + 1,
            move |handler, ctx| handler.on_read(ctx, msg),
        );
    }

    pub fn fire_event(&self, event: PipelineEvent) {
        self.pipeline.dispatch_inbound(
            self.channel,
            self.snapshot,
            self.outbound,
            self.index + 1,
            move |handler, ctx| handler.on_event(ctx, event),
        );
    }

    pub fn fire_exception(&self, error: CoreError) {
        self.pipeline.dispatch_inbound(
            self.channel,
            self.snapshot,
            self.outbound,
            self.index + 1,
            move |handler, ctx| handler.on_exception(ctx, error),
        );
    }

    /// 把会话标记为超时，并向后续 Handler 传播 [`PipelineEvent::Timeout`]。
    ///
    /// 接收循环在处理完当前片后观察到标记即停止投递。
    pub fn fire_timeout(&self) {
        self.session().mark_timed_out();
        self.fire_event(PipelineEvent::Timeout);
    }

    /// 出站写入，交给位于当前 Handler 之前的出站节点。
    ///
    /// 入站回调中写出的字节由接收循环发往当前片的来源；出站回调中写出的字节随发起写入的调用一起发送。
    pub fn write(&self, msg: PipelineMessage) -> Result<()> {
        self.pipeline
            .write_before(self.channel, self.snapshot, self.outbound, self.index, msg)
    }

    /// 关闭通道；重复调用无副作用。
    pub fn close(&self) -> bool {
        self.channel.close()
    }
}
