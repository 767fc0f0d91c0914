//! 会话状态与接收循环。
//!
//! 接收循环把传输读到的原始字节逐片（piece）投递给管道，不做逻辑消息重组；
//! 同一任务还负责按间隔投递空闲检查节拍，因此一个通道上的全部分发都是串行的。

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::{Instant, MissedTickBehavior};

use crate::{
    attribute::AttributeMap,
    channel::{Channel, TransportKind},
    error::{CoreError, Result, codes},
    message::{Piece, PipelineEvent, PipelineMessage},
    pipeline::{OutboundSink, Pipeline},
};

/// 每个通道一份的接收处理状态。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `timed_out`：[`Session::reset`] 不会清除它；只有未连接的数据报通道在超时被处置后重新布防，
///   因为那里每个数据报自成一个会话；
/// - 待发送队列与片级暂存属性是“每片”瞬态状态，每片分发并冲刷后由 `reset` 清空；
/// - 片级暂存属性与通道属性不同，只在一次片分发内有效，供同一片上的相邻 Handler 传递中间结果。
#[derive(Default)]
pub struct Session {
    timed_out: AtomicBool,
    dispatched: AtomicU64,
    outbound: OutboundSink,
    scratch: AttributeMap,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    /// 标记超时，返回是否为第一次标记。
    pub fn mark_timed_out(&self) -> bool {
        !self.timed_out.swap(true, Ordering::AcqRel)
    }

    /// 结束已超时的会话并清除标记，返回此前是否处于超时状态。
    pub(crate) fn rearm(&self) -> bool {
        self.timed_out.swap(false, Ordering::AcqRel)
    }

    /// 已分发的片总数。
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn scratch(&self) -> &AttributeMap {
        &self.scratch
    }

    /// 入站分发期间写出的字节队列，只由驱动本会话的接收任务冲刷。
    pub(crate) fn outbound_queue(&self) -> &OutboundSink {
        &self.outbound
    }

    pub fn take_outbound(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.outbound.lock())
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.lock().is_empty()
    }

    /// 把一片交给管道。
    pub fn read(&self, pipeline: &Pipeline, piece: Piece) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        pipeline.fire_read(PipelineMessage::Piece(piece));
    }

    /// 清空片级瞬态状态；不触碰超时标记。
    pub fn reset(&self) {
        self.outbound.lock().clear();
        self.scratch.clear();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("timed_out", &self.is_timed_out())
            .field("dispatched", &self.dispatched())
            .finish()
    }
}

/// 一次读取的结果。
#[derive(Debug)]
pub enum PieceRead {
    Piece(Piece),
    /// 当前没有立即可读的数据，只由 [`PieceSource::try_read_piece`] 返回。
    WouldBlock,
    EndOfStream,
}

/// 传输实现提供的片来源。
#[async_trait]
pub trait PieceSource: Send + Sync {
    /// 等待下一片；必须是取消安全的，被丢弃时不得丢失已读数据。
    async fn read_piece(&self) -> Result<PieceRead>;

    /// 非阻塞读取。
    fn try_read_piece(&self) -> Result<PieceRead>;
}

/// 接收循环的退出原因。
#[derive(Debug)]
pub enum ReceiveExit {
    EndOfStream,
    Closed,
    TimedOut,
    Failed(CoreError),
}

/// 单次排空的结果。
#[derive(Debug)]
pub enum PassOutcome {
    /// 没有更多立即可读的数据，循环应继续等待。
    Drained,
    Exit(ReceiveExit),
}

/// 从 `first` 开始，排空当前立即可读的所有片。
///
/// # 教案级注释
///
/// ## 逻辑（How）
/// 每片依次执行：分发 → 冲刷处理过程中排队的出站字节（回复发往该片的来源） → 会话重置；
/// 随后检查超时标记与关闭状态，满足任一即停止，保证超时后不会再投递下一片。
/// 未连接的数据报通道例外：下一片属于新的会话，超时标记清除后继续投递。
///
/// ## 契约（What）
/// - 读失败时关闭通道并返回 `Failed`；
/// - 取消（通道已关闭）不是错误，返回 `Closed`。
pub async fn receive_pass(
    channel: &Arc<dyn Channel>,
    pipeline: &Pipeline,
    source: &dyn PieceSource,
    first: Piece,
) -> PassOutcome {
    let session = pipeline.session();
    let mut piece = first;
    loop {
        tracing::debug!(
            channel = %channel.id(),
            index = session.dispatched(),
            len = piece.len(),
            local = %piece.local(),
            remote = %piece.remote(),
            "piece received"
        );
        let reply_to = piece.remote();
        session.read(pipeline, piece);
        if let Err(error) = flush_outbound(channel, pipeline, Some(reply_to)).await {
            return PassOutcome::Exit(fail(channel, error));
        }
        session.reset();

        if session_expired(channel, session) {
            return PassOutcome::Exit(ReceiveExit::TimedOut);
        }
        if channel.is_closed() {
            return PassOutcome::Exit(ReceiveExit::Closed);
        }

        piece = match source.try_read_piece() {
            Ok(PieceRead::Piece(next)) => next,
            Ok(PieceRead::WouldBlock) => return PassOutcome::Drained,
            Ok(PieceRead::EndOfStream) => return PassOutcome::Exit(end_of_stream(channel)),
            Err(error) => return PassOutcome::Exit(read_failed(channel, error)),
        };
    }
}

/// 驱动通道的接收循环，直到流结束、通道关闭、读失败或会话超时。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 空闲检查由通道自己的任务驱动，避免全局定时线程与 I/O 路径并发进入管道；
/// - 关闭信号通过 `watch` 打断在途读取，取消属于正常退出。
///
/// ## 逻辑（How）
/// `select!` 三路竞争：关闭信号、空闲节拍、下一片。节拍到来时投递
/// [`PipelineEvent::IdleCheck`]；读到片后调用 [`receive_pass`] 排空。
///
/// ## 契约（What）
/// - 通道必须已绑定管道，否则立即返回 `Failed`；
/// - 服务端会话超时后循环退出，但不关闭通道；
/// - 未连接的数据报通道上超时只结束当前会话，循环继续服务后续发送者；
/// - 对端关闭（流结束）时关闭本端通道。
pub async fn run_receive_loop(
    channel: Arc<dyn Channel>,
    source: &dyn PieceSource,
    idle_check_interval: Duration,
) -> ReceiveExit {
    let Some(pipeline) = channel.pipeline() else {
        return ReceiveExit::Failed(CoreError::new(
            codes::CHANNEL_CLOSED,
            format!("channel {} has no pipeline", channel.id()),
        ));
    };
    let session = Arc::clone(pipeline.session());
    let mut cancellation = channel.cancellation();
    let mut ticker =
        tokio::time::interval_at(Instant::now() + idle_check_interval, idle_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        if session_expired(&channel, &session) {
            break ReceiveExit::TimedOut;
        }
        if channel.is_closed() {
            break ReceiveExit::Closed;
        }
        tokio::select! {
            biased;
            _ = async {
                let _ = cancellation.wait_for(|closed| *closed).await;
            } => {
                tracing::trace!(channel = %channel.id(), "read cancelled by close");
                break ReceiveExit::Closed;
            }
            now = ticker.tick() => {
                pipeline.fire_event(PipelineEvent::IdleCheck(now));
                if let Err(error) = flush_outbound(&channel, &pipeline, None).await {
                    break fail(&channel, error);
                }
            }
            read = source.read_piece() => match read {
                Ok(PieceRead::Piece(piece)) => {
                    match receive_pass(&channel, &pipeline, source, piece).await {
                        PassOutcome::Drained => {}
                        PassOutcome::Exit(exit) => break exit,
                    }
                }
                Ok(PieceRead::WouldBlock) => {}
                Ok(PieceRead::EndOfStream) => break end_of_stream(&channel),
                Err(error) => break read_failed(&channel, error),
            },
        }
    };
    tracing::trace!(channel = %channel.id(), exit = ?exit, "receive loop finished");
    exit
}

/// 把会话中排队的出站字节依次写出。
///
/// `reply_to` 为 `None` 时发往通道的固定远端。
pub async fn flush_outbound(
    channel: &Arc<dyn Channel>,
    pipeline: &Pipeline,
    reply_to: Option<SocketAddr>,
) -> Result<()> {
    send_frames(channel, pipeline.session().take_outbound(), reply_to).await
}

/// 按顺序发送一组已编码的字节。
pub(crate) async fn send_frames(
    channel: &Arc<dyn Channel>,
    frames: Vec<Bytes>,
    reply_to: Option<SocketAddr>,
) -> Result<()> {
    for bytes in frames {
        channel.send(bytes, channel.local_addr(), reply_to).await?;
    }
    Ok(())
}

/// 会话是否已超时且应结束接收。
fn session_expired(channel: &Arc<dyn Channel>, session: &Session) -> bool {
    if !session.is_timed_out() {
        return false;
    }
    if !sessions_per_datagram(channel.as_ref()) {
        return true;
    }
    if session.rearm() {
        tracing::trace!(channel = %channel.id(), "datagram session timed out, serving next sender");
    }
    false
}

/// 未连接的数据报通道没有固定对端，每个数据报都是一个独立会话。
fn sessions_per_datagram(channel: &dyn Channel) -> bool {
    channel.kind() == TransportKind::Datagram && channel.remote_addr().is_none()
}

fn end_of_stream(channel: &Arc<dyn Channel>) -> ReceiveExit {
    tracing::trace!(channel = %channel.id(), "peer closed the stream");
    channel.close();
    ReceiveExit::EndOfStream
}

fn read_failed(channel: &Arc<dyn Channel>, error: CoreError) -> ReceiveExit {
    if channel.is_closed() || error.is_cancelled() {
        tracing::trace!(channel = %channel.id(), "read cancelled");
        return ReceiveExit::Closed;
    }
    fail(channel, error)
}

fn fail(channel: &Arc<dyn Channel>, error: CoreError) -> ReceiveExit {
    tracing::warn!(channel = %channel.id(), error = %error, "transport failure, closing channel");
    channel.close();
    ReceiveExit::Failed(error)
}
