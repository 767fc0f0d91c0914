use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    attribute::{AttributeKey, AttributeMap},
    error::{CoreError, Result, codes},
    pipeline::Pipeline,
};

/// 进程内唯一的通道编号。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// 分配下一个编号，从 1 开始单调递增。
    pub fn next() -> Self {
        static SEQUENCE: AtomicU64 = AtomicU64::new(1);
        Self(SEQUENCE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// 传输形态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// 字节流（TCP）。
    Stream,
    /// 数据报（UDP）。
    Datagram,
}

type CloseSubscriber = Box<dyn FnOnce() + Send + 'static>;

/// 关闭信号：一次性翻转的标志 + 取消广播 + 关闭回调。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 关闭必须只执行一次，而关闭回调里的 Handler 可能再次请求关闭；
/// - 在途读取需要被协作式地唤醒，`watch` 通道让任意数量的等待者都能观察到关闭。
///
/// ## 逻辑（How）
/// 1. `AtomicBool::swap` 决出唯一的关闭者；
/// 2. 关闭者先执行传输拆除，再广播 `watch`；
/// 3. 回调列表在锁内整体取出、锁外逐个执行，回调内再次 `close` 只会命中第 1 步的短路。
///
/// ## 契约（What）
/// - 关闭后注册的回调立即在注册线程上执行；
/// - 回调按注册顺序执行，每个至多一次。
pub struct CloseSignal {
    closed: AtomicBool,
    notifier: watch::Sender<bool>,
    subscribers: Mutex<Vec<CloseSubscriber>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (notifier, _) = watch::channel(false);
        Self {
            closed: AtomicBool::new(false),
            notifier,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 执行关闭；只有第一次调用会运行 `teardown` 并返回 `true`。
    pub fn close_with(&self, teardown: impl FnOnce()) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        teardown();
        self.notifier.send_replace(true);
        let subscribers = std::mem::take(&mut *self.subscribers.lock());
        for subscriber in subscribers {
            subscriber();
        }
        true
    }

    /// 注册关闭回调。
    pub fn on_closed(&self, subscriber: impl FnOnce() + Send + 'static) {
        {
            let mut guard = self.subscribers.lock();
            if !self.is_closed() {
                guard.push(Box::new(subscriber));
                return;
            }
        }
        subscriber();
    }

    /// 订阅取消广播，接收端的值在关闭后变为 `true`。
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.notifier.subscribe()
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CloseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseSignal")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// 各传输实现共享的通道状态。
///
/// 具体通道只需持有一个 `ChannelBase` 并实现 [`Channel::shutdown_transport`] 与
/// [`Channel::send`]，其余契约由 trait 默认方法提供。
pub struct ChannelBase {
    id: ChannelId,
    kind: TransportKind,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    signal: CloseSignal,
    attributes: AttributeMap,
    pipeline: OnceLock<Arc<Pipeline>>,
}

impl ChannelBase {
    pub fn new(kind: TransportKind, local_addr: SocketAddr, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id: ChannelId::next(),
            kind,
            local_addr,
            remote_addr,
            signal: CloseSignal::new(),
            attributes: AttributeMap::new(),
            pipeline: OnceLock::new(),
        }
    }

    pub fn signal(&self) -> &CloseSignal {
        &self.signal
    }

    pub(crate) fn bind_pipeline(&self, pipeline: Arc<Pipeline>) -> bool {
        self.pipeline.set(pipeline).is_ok()
    }
}

impl fmt::Debug for ChannelBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBase")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.signal.is_closed())
            .finish()
    }
}

/// 统一的通道契约，屏蔽流式与数据报传输的差异。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 管道与超时子系统只依赖“发送、关闭、关闭通知、属性”四项能力，
///   不需要知道底层是 TCP 还是 UDP；
/// - 关闭的幂等性与通知的唯一性集中在 [`CloseSignal`]，实现者不必重复处理。
///
/// ## 契约（What）
/// - `send`：写出全部字节后返回；通道已关闭时返回 `peerwire.channel.closed`，
///   套接字失败映射为 `Transport` 类错误；
/// - `close`：第一次调用执行 [`Channel::shutdown_transport`] 后触发关闭通知，返回 `true`；
///   后续调用无副作用并返回 `false`；
/// - `shutdown_transport`：同步拆除，必须唤醒在途读取，不得阻塞。
///
/// ## 风险（Trade-offs）
/// - 关闭通知在调用 `close` 的线程上同步执行，其中包含管道的 `channel_inactive` 分发。
#[async_trait]
pub trait Channel: Send + Sync + 'static {
    fn base(&self) -> &ChannelBase;

    /// 释放底层套接字，由 [`Channel::close`] 调用且至多一次。
    fn shutdown_transport(&self);

    /// 发送字节。`receiver` 为 `None` 时发往通道的固定远端。
    async fn send(&self, bytes: Bytes, sender: SocketAddr, receiver: Option<SocketAddr>)
    -> Result<()>;

    fn id(&self) -> ChannelId {
        self.base().id
    }

    fn kind(&self) -> TransportKind {
        self.base().kind
    }

    fn local_addr(&self) -> SocketAddr {
        self.base().local_addr
    }

    /// 固定远端；未连接的数据报通道返回 `None`。
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.base().remote_addr
    }

    fn is_closed(&self) -> bool {
        self.base().signal.is_closed()
    }

    fn close(&self) -> bool {
        let closed = self.base().signal.close_with(|| self.shutdown_transport());
        if closed {
            tracing::trace!(channel = %self.id(), "channel closed");
        }
        closed
    }

    fn on_closed(&self, subscriber: Box<dyn FnOnce() + Send + 'static>) {
        self.base().signal.on_closed(subscriber);
    }

    fn attributes(&self) -> &AttributeMap {
        &self.base().attributes
    }

    fn attr<T>(&self, key: &AttributeKey<T>) -> Option<T>
    where
        Self: Sized,
        T: Clone + Send + Sync + 'static,
    {
        self.attributes().get(key)
    }

    fn pipeline(&self) -> Option<Arc<Pipeline>> {
        self.base().pipeline.get().cloned()
    }

    /// 取消广播的接收端，传输实现用它打断在途读取。
    fn cancellation(&self) -> watch::Receiver<bool> {
        self.base().signal.subscribe()
    }
}

impl dyn Channel {
    /// 等待通道关闭。
    pub async fn closed(&self) {
        let mut receiver = self.cancellation();
        let _ = receiver.wait_for(|closed| *closed).await;
    }

    /// 在发送前确认通道仍然打开，供传输实现复用。
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CoreError::transport(
                codes::CHANNEL_CLOSED,
                format!("channel {} is closed", self.id()),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for dyn Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.base(), f)
    }
}
