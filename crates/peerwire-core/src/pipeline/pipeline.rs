use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU8, Ordering},
    },
};

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    channel::Channel,
    error::{CoreError, ErrorCategory, Result, codes},
    message::{PipelineEvent, PipelineMessage},
    session::Session,
};

use super::{
    context::HandlerContext,
    handler::{Handler, InboundHandler, OutboundHandler},
};

/// 快照中的一个节点：名称 + Handler。
pub(crate) struct HandlerEntry {
    name: String,
    handler: Handler,
}

impl HandlerEntry {
    fn new(name: String, handler: Handler) -> Self {
        Self { name, handler }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn inbound(&self) -> Option<&dyn InboundHandler> {
        self.handler.inbound_ref()
    }

    pub(crate) fn outbound(&self) -> Option<&dyn OutboundHandler> {
        self.handler.outbound_ref()
    }
}

pub(crate) type Snapshot = Arc<Vec<Arc<HandlerEntry>>>;

/// 抵达头部的出站字节的去处。
pub(crate) type OutboundSink = Mutex<Vec<Bytes>>;

const LIFECYCLE_IDLE: u8 = 0;
const LIFECYCLE_ACTIVE: u8 = 1;
const LIFECYCLE_INACTIVE: u8 = 2;

#[derive(Clone, Copy, Debug)]
enum MutationKind {
    Add,
    Replace,
    Remove,
}

/// 绑定到单个通道的有序 Handler 管道。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 事件热路径需要无锁读取 Handler 链，而超时 Handler 会在分发过程中把自己从链上摘除；
/// - 以快照方式分发可以保证“正在进行的分发看到的链”与“变更后的链”互不干扰。
///
/// ## 逻辑（How）
/// 1. Handler 链保存在 `ArcSwap<Vec<Arc<HandlerEntry>>>` 中，事件分发先 `load` 一份快照；
/// 2. 变更在 `mutation` 互斥锁下复制向量、修改、整体替换；
/// 3. 上下文持有快照与当前下标，`fire_*` 从下标 + 1 开始寻找下一个同方向节点；
/// 4. 入站分发中 Handler 写出的字节进入会话队列，由接收循环冲刷；
///    [`Pipeline::write`] 发起的写入收集在本次调用自己的缓冲中，两者互不可见；
/// 5. 生命周期状态机 `IDLE → ACTIVE → INACTIVE` 保证激活/失活成对且各至多一次，
///    通道关闭时自动触发失活。
///
/// ## 契约（What）
/// - 名称在管道内唯一，重复添加返回 `peerwire.pipeline.duplicate_name`；
/// - `remove` 对不存在的名称是无操作，返回 `false`；
/// - 管道只弱引用通道，通道释放后所有分发静默跳过。
///
/// ## 风险（Trade-offs）
/// - 每次变更复制整条链，适用于链短、变更稀疏的场景。
pub struct Pipeline {
    channel: Weak<dyn Channel>,
    handlers: ArcSwap<Vec<Arc<HandlerEntry>>>,
    mutation: Mutex<()>,
    lifecycle: AtomicU8,
    session: Arc<Session>,
}

impl Pipeline {
    /// 创建管道并绑定到通道；通道关闭时自动分发 `channel_inactive`。
    ///
    /// 一个通道只能绑定一个管道，重复绑定返回 `Pipeline` 类错误。
    pub fn bind(channel: &Arc<dyn Channel>) -> Result<Arc<Pipeline>> {
        let pipeline = Arc::new(Self {
            channel: Arc::downgrade(channel),
            handlers: ArcSwap::from_pointee(Vec::new()),
            mutation: Mutex::new(()),
            lifecycle: AtomicU8::new(LIFECYCLE_IDLE),
            session: Arc::new(Session::new()),
        });
        if !channel.base().bind_pipeline(Arc::clone(&pipeline)) {
            return Err(CoreError::new(
                codes::PIPELINE_ALREADY_BOUND,
                format!("channel {} already owns a pipeline", channel.id()),
            )
            .with_category(ErrorCategory::Pipeline));
        }
        let weak = Arc::downgrade(&pipeline);
        channel.on_closed(Box::new(move || {
            if let Some(pipeline) = weak.upgrade() {
                pipeline.fire_channel_inactive();
            }
        }));
        Ok(pipeline)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn channel(&self) -> Option<Arc<dyn Channel>> {
        self.channel.upgrade()
    }

    pub fn add_last(&self, name: impl Into<String>, handler: Handler) -> Result<()> {
        let name = name.into();
        self.mutate(MutationKind::Add, &name, |chain| {
            Self::ensure_unique(chain, &name)?;
            chain.push(Arc::new(HandlerEntry::new(name.clone(), handler)));
            Ok(())
        })
    }

    pub fn add_first(&self, name: impl Into<String>, handler: Handler) -> Result<()> {
        let name = name.into();
        self.mutate(MutationKind::Add, &name, |chain| {
            Self::ensure_unique(chain, &name)?;
            chain.insert(0, Arc::new(HandlerEntry::new(name.clone(), handler)));
            Ok(())
        })
    }

    pub fn add_before(&self, base: &str, name: impl Into<String>, handler: Handler) -> Result<()> {
        let name = name.into();
        self.mutate(MutationKind::Add, &name, |chain| {
            Self::ensure_unique(chain, &name)?;
            let index = Self::position(chain, base)?;
            chain.insert(index, Arc::new(HandlerEntry::new(name.clone(), handler)));
            Ok(())
        })
    }

    pub fn add_after(&self, base: &str, name: impl Into<String>, handler: Handler) -> Result<()> {
        let name = name.into();
        self.mutate(MutationKind::Add, &name, |chain| {
            Self::ensure_unique(chain, &name)?;
            let index = Self::position(chain, base)?;
            chain.insert(index + 1, Arc::new(HandlerEntry::new(name.clone(), handler)));
            Ok(())
        })
    }

    /// 原位替换同名 Handler，名称不存在时返回 `peerwire.pipeline.unknown_name`。
    pub fn replace(&self, name: &str, handler: Handler) -> Result<()> {
        self.mutate(MutationKind::Replace, name, |chain| {
            let index = Self::position(chain, name)?;
            chain[index] = Arc::new(HandlerEntry::new(name.to_owned(), handler));
            Ok(())
        })
    }

    /// 移除同名 Handler；不存在时是无操作。
    pub fn remove(&self, name: &str) -> bool {
        self.mutate(MutationKind::Remove, name, |chain| {
            let index = Self::position(chain, name)?;
            chain.remove(index);
            Ok(())
        })
        .is_ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.load().iter().any(|entry| entry.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers
            .load()
            .iter()
            .map(|entry| entry.name().to_owned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.load().is_empty()
    }

    /// 分发通道激活；同一管道至多一次，通道已关闭时不再分发。
    pub fn fire_channel_active(&self) {
        if self
            .lifecycle
            .compare_exchange(
                LIFECYCLE_IDLE,
                LIFECYCLE_ACTIVE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        self.dispatch_from_head(|handler, ctx| handler.on_channel_active(ctx));
    }

    /// 分发通道失活；只在激活之后分发，且至多一次。
    pub fn fire_channel_inactive(&self) {
        if self.lifecycle.swap(LIFECYCLE_INACTIVE, Ordering::AcqRel) == LIFECYCLE_ACTIVE {
            self.dispatch_from_head(|handler, ctx| handler.on_channel_inactive(ctx));
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == LIFECYCLE_ACTIVE
    }

    pub fn fire_read(&self, msg: PipelineMessage) {
        self.dispatch_from_head(move |handler, ctx| handler.on_read(ctx, msg));
    }

    pub fn fire_event(&self, event: PipelineEvent) {
        self.dispatch_from_head(move |handler, ctx| handler.on_event(ctx, event));
    }

    pub fn fire_exception(&self, error: CoreError) {
        self.dispatch_from_head(move |handler, ctx| handler.on_exception(ctx, error));
    }

    /// 自尾部写入出站消息，返回抵达头部、等待发送的字节。
    ///
    /// 结果只属于本次调用，不会进入会话队列，也不会被接收循环取走。
    pub fn write(&self, msg: PipelineMessage) -> Result<Vec<Bytes>> {
        let Some(channel) = self.channel.upgrade() else {
            return Err(CoreError::transport(
                codes::CHANNEL_CLOSED,
                "channel has been released",
            ));
        };
        let snapshot = self.handlers.load_full();
        let end = snapshot.len();
        let frames = OutboundSink::default();
        self.write_before(&channel, &snapshot, &frames, end, msg)?;
        Ok(frames.into_inner())
    }

    pub(crate) fn dispatch_inbound<F>(
        &self,
        channel: &Arc<dyn Channel>,
        snapshot: &Snapshot,
        outbound: &OutboundSink,
        start: usize,
        callback: F,
    ) where
        F: FnOnce(&dyn InboundHandler, &HandlerContext<'_>),
    {
        if let Some(index) = Self::find_next_inbound(snapshot, start)
            && let Some(handler) = snapshot[index].inbound()
        {
            let ctx = HandlerContext::new(self, channel, snapshot, outbound, index);
            callback(handler, &ctx);
        }
    }

    /// 从 `end`（不含）向前寻找出站节点；越过头部时把字节放入 `outbound`。
    pub(crate) fn write_before(
        &self,
        channel: &Arc<dyn Channel>,
        snapshot: &Snapshot,
        outbound: &OutboundSink,
        end: usize,
        msg: PipelineMessage,
    ) -> Result<()> {
        if let Some(index) = Self::find_prev_outbound(snapshot, end)
            && let Some(handler) = snapshot[index].outbound()
        {
            let ctx = HandlerContext::new(self, channel, snapshot, outbound, index);
            return handler.on_write(&ctx, msg);
        }
        match msg {
            PipelineMessage::Buffer(bytes) => {
                outbound.lock().push(bytes);
                Ok(())
            }
            other => Err(CoreError::new(
                codes::PIPELINE_UNEXPECTED_OUTBOUND,
                format!("outbound message reached the head unencoded: {other:?}"),
            )
            .with_category(ErrorCategory::Pipeline)),
        }
    }

    fn dispatch_from_head<F>(&self, callback: F)
    where
        F: FnOnce(&dyn InboundHandler, &HandlerContext<'_>),
    {
        let Some(channel) = self.channel.upgrade() else {
            return;
        };
        let snapshot = self.handlers.load_full();
        self.dispatch_inbound(&channel, &snapshot, self.session.outbound_queue(), 0, callback);
    }

    fn find_next_inbound(snapshot: &[Arc<HandlerEntry>], start: usize) -> Option<usize> {
        snapshot
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, entry)| entry.inbound().is_some())
            .map(|(index, _)| index)
    }

    fn find_prev_outbound(snapshot: &[Arc<HandlerEntry>], end: usize) -> Option<usize> {
        snapshot[..end.min(snapshot.len())]
            .iter()
            .rposition(|entry| entry.outbound().is_some())
    }

    fn mutate<F>(&self, kind: MutationKind, name: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<Arc<HandlerEntry>>) -> Result<()>,
    {
        let _guard = self.mutation.lock();
        let mut chain: Vec<_> = self.handlers.load().iter().cloned().collect();
        change(&mut chain)?;
        self.handlers.store(Arc::new(chain));
        tracing::trace!(
            channel = ?self.channel.upgrade().map(|channel| channel.id()),
            mutation = ?kind,
            handler = name,
            "pipeline mutated"
        );
        Ok(())
    }

    fn ensure_unique(chain: &[Arc<HandlerEntry>], name: &str) -> Result<()> {
        if chain.iter().any(|entry| entry.name() == name) {
            return Err(CoreError::new(
                codes::PIPELINE_DUPLICATE_NAME,
                format!("duplicate handler name: {name}"),
            )
            .with_category(ErrorCategory::Pipeline));
        }
        Ok(())
    }

    fn position(chain: &[Arc<HandlerEntry>], name: &str) -> Result<usize> {
        chain
            .iter()
            .position(|entry| entry.name() == name)
            .ok_or_else(|| {
                CoreError::new(
                    codes::PIPELINE_UNKNOWN_NAME,
                    format!("no handler named {name}"),
                )
                .with_category(ErrorCategory::Pipeline)
            })
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.names())
            .field("active", &self.is_active())
            .finish()
    }
}
