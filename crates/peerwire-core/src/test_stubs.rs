//! 测试替身。
//!
//! - [`MockChannel`]：内存通道，记录发送内容与拆除次数，可注入发送失败；
//! - [`RecordingListener`]：记录所有失败通知；
//! - [`RecordingHandler`]：把经过的入站事件记录为字符串，便于断言顺序；
//! - [`ScriptedPieceSource`]：按“批次”回放片，批次内的后续片通过非阻塞读取获得。

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    channel::{Channel, ChannelBase, TransportKind},
    error::{CoreError, Result, codes},
    message::{Piece, PipelineEvent, PipelineMessage},
    peer::{PeerAddress, PeerFailure},
    pipeline::{HandlerContext, InboundHandler},
    session::{PieceRead, PieceSource},
    timeout::PeerStatusListener,
};

/// 一次记录下来的发送。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentFrame {
    pub bytes: Bytes,
    pub sender: SocketAddr,
    pub receiver: Option<SocketAddr>,
}

/// 内存通道。
#[derive(Debug)]
pub struct MockChannel {
    base: ChannelBase,
    sent: Mutex<Vec<SentFrame>>,
    shutdowns: AtomicUsize,
    fail_sends: AtomicBool,
}

impl MockChannel {
    /// 固定远端的流式通道。
    pub fn stream() -> Arc<Self> {
        Self::with_addrs(TransportKind::Stream, Some(Self::remote()))
    }

    /// 没有固定远端的数据报通道。
    pub fn datagram() -> Arc<Self> {
        Self::with_addrs(TransportKind::Datagram, None)
    }

    pub fn with_addrs(kind: TransportKind, remote: Option<SocketAddr>) -> Arc<Self> {
        Arc::new(Self {
            base: ChannelBase::new(kind, Self::local(), remote),
            sent: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
            fail_sends: AtomicBool::new(false),
        })
    }

    pub fn local() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 4000))
    }

    pub fn remote() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 5000))
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn base(&self) -> &ChannelBase {
        &self.base
    }

    fn shutdown_transport(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }

    async fn send(
        &self,
        bytes: Bytes,
        sender: SocketAddr,
        receiver: Option<SocketAddr>,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(CoreError::transport(codes::CHANNEL_CLOSED, "mock channel closed"));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(CoreError::transport(
                codes::CHANNEL_SEND_FAILED,
                "injected send failure",
            ));
        }
        self.sent.lock().push(SentFrame {
            bytes,
            sender,
            receiver,
        });
        Ok(())
    }
}

/// 记录失败通知的监听器。
#[derive(Debug, Default)]
pub struct RecordingListener {
    failures: Mutex<Vec<(PeerAddress, PeerFailure)>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> Vec<(PeerAddress, PeerFailure)> {
        self.failures.lock().clone()
    }
}

impl PeerStatusListener for RecordingListener {
    fn peer_failed(&self, remote: &PeerAddress, failure: &PeerFailure) {
        self.failures.lock().push((*remote, failure.clone()));
    }
}

/// 记录入站事件的 Handler，记录后继续转发。
///
/// 记录格式：`active`、`inactive`、`read:<字节数>`、`idle`、`timeout`、`event`、`exception:<错误码>`。
#[derive(Clone, Debug, Default)]
pub struct RecordingHandler {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.log.lock().iter().filter(|e| *e == entry).count()
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().push(entry.into());
    }
}

impl InboundHandler for RecordingHandler {
    fn on_channel_active(&self, ctx: &HandlerContext<'_>) {
        self.record("active");
        ctx.fire_channel_active();
    }

    fn on_channel_inactive(&self, ctx: &HandlerContext<'_>) {
        self.record("inactive");
        ctx.fire_channel_inactive();
    }

    fn on_read(&self, ctx: &HandlerContext<'_>, msg: PipelineMessage) {
        match &msg {
            PipelineMessage::Piece(piece) => self.record(format!("read:{}", piece.len())),
            PipelineMessage::Buffer(bytes) => self.record(format!("read:{}", bytes.len())),
            PipelineMessage::User(_) => self.record("read:user"),
        }
        ctx.fire_read(msg);
    }

    fn on_event(&self, ctx: &HandlerContext<'_>, event: PipelineEvent) {
        match &event {
            PipelineEvent::Idle => self.record("idle"),
            PipelineEvent::Timeout => self.record("timeout"),
            PipelineEvent::IdleCheck(_) => self.record("idle-check"),
            PipelineEvent::User(_) => self.record("event"),
        }
        ctx.fire_event(event);
    }

    fn on_exception(&self, ctx: &HandlerContext<'_>, error: CoreError) {
        self.record(format!("exception:{}", error.code()));
        ctx.fire_exception(error);
    }
}

/// 按批次回放片的数据源。
///
/// `read_piece` 取出下一批的第一片，其余片留给 `try_read_piece`；
/// 批次耗尽后 `try_read_piece` 返回 `WouldBlock`，`read_piece` 挂起直到追加新批次。
#[derive(Debug, Default)]
pub struct ScriptedPieceSource {
    batches: Mutex<VecDeque<Vec<PieceRead>>>,
    current: Mutex<VecDeque<PieceRead>>,
    appended: Notify,
    reads: AtomicUsize,
}

impl ScriptedPieceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一批立即可读的片。
    pub fn push_batch(&self, batch: Vec<PieceRead>) {
        self.batches.lock().push_back(batch);
        self.appended.notify_one();
    }

    /// 便捷构造：以 [`MockChannel`] 的端点包装字节。
    pub fn piece(bytes: &'static [u8]) -> PieceRead {
        PieceRead::Piece(Piece::new(
            Bytes::from_static(bytes),
            MockChannel::local(),
            MockChannel::remote(),
        ))
    }

    /// 已交出的片数量。
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn take_batch(&self) -> Option<PieceRead> {
        let mut batch: VecDeque<PieceRead> = self.batches.lock().pop_front()?.into();
        let first = batch.pop_front();
        *self.current.lock() = batch;
        first
    }

    fn counted(&self, read: PieceRead) -> PieceRead {
        if matches!(read, PieceRead::Piece(_)) {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
        read
    }
}

#[async_trait]
impl PieceSource for ScriptedPieceSource {
    async fn read_piece(&self) -> Result<PieceRead> {
        loop {
            let notified = self.appended.notified();
            if let Some(read) = self.take_batch() {
                return Ok(self.counted(read));
            }
            notified.await;
        }
    }

    fn try_read_piece(&self) -> Result<PieceRead> {
        let next = self.current.lock().pop_front();
        Ok(match next {
            Some(read) => self.counted(read),
            None => PieceRead::WouldBlock,
        })
    }
}
