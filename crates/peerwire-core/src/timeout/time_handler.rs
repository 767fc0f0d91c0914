use std::sync::Arc;

use crate::{
    attribute::{PEER_ADDRESS, REMOTE_INET_ADDRESS},
    error::CoreError,
    message::PipelineEvent,
    peer::{PeerAddress, PeerFailure},
    pipeline::{HandlerContext, InboundHandler},
};

use super::{listener::PeerStatusListeners, pending::PendingResponse};

/// 超时处置器（`timeout1`），响应空闲检测器上报的 [`PipelineEvent::Idle`]。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 客户端连接上有调用方在等待响应，超时必须让它得到失败结果，随后关闭连接；
/// - 服务端接受的连接属于共享基础设施，关闭它会打断同一监听器上的其他工作，
///   因此只把会话标记为超时，让接收循环停止服务该会话，连接的拆除交给调用方生命周期。
///
/// ## 逻辑（How）
/// 1. 客户端分支：`set_failure` → `fire_timeout` → `close`，失败先于关闭交付；
/// 2. 服务端分支：仅 `fire_timeout`；
/// 3. 解析失败通知的对端：请求目标 → [`PEER_ADDRESS`] 属性 → 通道远端或
///    [`REMOTE_INET_ADDRESS`] 属性（身份未知）；都没有时记录告警并跳过通知；
/// 4. 对监听器注册表拍快照后逐个回调。
///
/// ## 契约（What）
/// - 挂起请求是否存在是区分两个分支的唯一依据；
/// - 空闲事件在此被消费；其他事件原样转发。
pub struct TimeHandler {
    pending: Option<Arc<dyn PendingResponse>>,
    listeners: Arc<PeerStatusListeners>,
    label: Arc<str>,
}

impl TimeHandler {
    pub fn new(
        pending: Option<Arc<dyn PendingResponse>>,
        listeners: Arc<PeerStatusListeners>,
        label: Arc<str>,
    ) -> Self {
        Self {
            pending,
            listeners,
            label,
        }
    }

    pub fn is_client_side(&self) -> bool {
        self.pending.is_some()
    }

    fn handle_idle(&self, ctx: &HandlerContext<'_>) {
        let channel = ctx.channel();
        tracing::warn!(
            label = %self.label,
            channel = %channel.id(),
            remote = ?channel.remote_addr(),
            "channel idle timeout"
        );

        let requested = match &self.pending {
            Some(pending) => {
                pending.set_failure(CoreError::timeout(format!(
                    "channel {} ({}) is idle",
                    channel.id(),
                    self.label
                )));
                ctx.fire_timeout();
                ctx.close();
                pending.recipient()
            }
            None => {
                ctx.fire_timeout();
                None
            }
        };

        let Some(recipient) = requested.or_else(|| Self::fallback_recipient(ctx)) else {
            tracing::warn!(
                label = %self.label,
                channel = %channel.id(),
                "cannot determine the sender's address"
            );
            return;
        };
        let notified = self
            .listeners
            .notify_failed(&recipient, &PeerFailure::timeout());
        tracing::trace!(
            channel = %channel.id(),
            peer = %recipient,
            listeners = notified,
            "peer failure reported"
        );
    }

    fn fallback_recipient(ctx: &HandlerContext<'_>) -> Option<PeerAddress> {
        ctx.attr(&PEER_ADDRESS).or_else(|| {
            ctx.channel()
                .remote_addr()
                .or_else(|| ctx.attr(&REMOTE_INET_ADDRESS))
                .map(PeerAddress::unknown)
        })
    }
}

impl InboundHandler for TimeHandler {
    fn on_event(&self, ctx: &HandlerContext<'_>, event: PipelineEvent) {
        match event {
            PipelineEvent::Idle => self.handle_idle(ctx),
            other => ctx.fire_event(other),
        }
    }
}

impl std::fmt::Debug for TimeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeHandler")
            .field("label", &self.label)
            .field("client_side", &self.is_client_side())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        channel::Channel,
        pipeline::{Handler, Pipeline},
        test_stubs::{MockChannel, RecordingListener},
    };

    fn server_pipeline(channel: &Arc<dyn Channel>, listener: &Arc<RecordingListener>) -> Arc<Pipeline> {
        let listeners = Arc::new(PeerStatusListeners::new());
        listeners.add(listener);
        let pipeline = Pipeline::bind(channel).expect("bind");
        pipeline
            .add_last(
                "timeout1",
                Handler::inbound(TimeHandler::new(None, listeners, Arc::from("udp"))),
            )
            .expect("add");
        pipeline.fire_channel_active();
        pipeline
    }

    #[traced_test]
    #[test]
    fn missing_sender_is_logged_and_skipped() {
        let listener = Arc::new(RecordingListener::new());
        let channel: Arc<dyn Channel> = MockChannel::datagram();
        let pipeline = server_pipeline(&channel, &listener);

        pipeline.fire_event(PipelineEvent::Idle);

        assert!(pipeline.session().is_timed_out());
        assert!(listener.failures().is_empty());
        assert!(logs_contain("channel idle timeout"));
        assert!(logs_contain("cannot determine the sender's address"));
    }

    #[traced_test]
    #[test]
    fn server_side_reports_remote_without_closing() {
        let listener = Arc::new(RecordingListener::new());
        let channel: Arc<dyn Channel> = MockChannel::stream();
        let pipeline = server_pipeline(&channel, &listener);

        pipeline.fire_event(PipelineEvent::Idle);

        assert!(!channel.is_closed());
        assert_eq!(
            listener.failures(),
            vec![(PeerAddress::unknown(MockChannel::remote()), PeerFailure::timeout())]
        );
        assert!(!logs_contain("cannot determine the sender's address"));
    }
}
