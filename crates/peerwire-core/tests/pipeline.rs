use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use peerwire_core::{
    AttributeKey, Channel, Connection, ErrorCategory, Handler, HandlerContext, InboundHandler,
    OutboundHandler, PipelineMessage, PipelineTemplate, Result, codes,
    test_stubs::{MockChannel, RecordingHandler, SentFrame},
};

const GREETING: AttributeKey<String> = AttributeKey::new("test.greeting");

/// 把用户消息 `String` 编码为带长度前缀的字节。
struct LengthPrefixEncoder;

impl OutboundHandler for LengthPrefixEncoder {
    fn on_write(&self, ctx: &HandlerContext<'_>, msg: PipelineMessage) -> Result<()> {
        match msg.downcast_user::<String>() {
            Ok(text) => {
                let mut frame = BytesMut::with_capacity(text.len() + 1);
                frame.extend_from_slice(&[text.len() as u8]);
                frame.extend_from_slice(text.as_bytes());
                ctx.write(PipelineMessage::Buffer(frame.freeze()))
            }
            Err(other) => ctx.write(other),
        }
    }
}

/// 激活时写入通道属性，供后面的 Handler 读取。
struct Greeter;

impl InboundHandler for Greeter {
    fn on_channel_active(&self, ctx: &HandlerContext<'_>) {
        ctx.set_attr(&GREETING, "hello".to_owned());
        ctx.fire_channel_active();
    }
}

/// 读取前序 Handler 写下的属性，并原样回显收到的字节。
struct Echo;

impl InboundHandler for Echo {
    fn on_read(&self, ctx: &HandlerContext<'_>, msg: PipelineMessage) {
        assert_eq!(ctx.attr(&GREETING).as_deref(), Some("hello"));
        if let PipelineMessage::Buffer(bytes) = msg {
            ctx.write(PipelineMessage::Buffer(bytes)).expect("echo");
        }
    }
}

fn connection(template: &PipelineTemplate) -> (Arc<MockChannel>, Connection) {
    let mock = MockChannel::stream();
    let channel: Arc<dyn Channel> = mock.clone();
    let pipeline = template.build(&channel).expect("build");
    pipeline.fire_channel_active();
    (mock, Connection::new(channel, pipeline))
}

#[test]
fn close_fires_inactive_exactly_once_after_active() {
    let recorder = RecordingHandler::new();
    let mut template = PipelineTemplate::new();
    template.add_shared("recorder", Handler::inbound(recorder.clone()));
    let (mock, conn) = connection(&template);

    conn.pipeline().fire_channel_active();
    assert!(conn.close());
    assert!(!conn.close());
    conn.pipeline().fire_channel_inactive();

    assert_eq!(recorder.events(), vec!["active", "inactive"]);
    assert_eq!(mock.shutdown_calls(), 1);
    assert!(!conn.pipeline().is_active());
}

#[test]
fn closing_before_activation_fires_nothing() {
    let recorder = RecordingHandler::new();
    let mut template = PipelineTemplate::new();
    template.add_shared("recorder", Handler::inbound(recorder.clone()));
    let channel: Arc<dyn Channel> = MockChannel::stream();
    let pipeline = template.build(&channel).expect("build");

    channel.close();
    pipeline.fire_channel_active();

    assert!(recorder.events().is_empty());
}

#[tokio::test]
async fn encoded_user_message_reaches_the_transport() {
    let mut template = PipelineTemplate::new();
    template.add_shared("encoder", Handler::outbound(LengthPrefixEncoder));
    let (mock, conn) = connection(&template);

    conn.write(PipelineMessage::user("ping".to_owned()))
        .await
        .expect("write");

    assert_eq!(mock.sent(), vec![SentFrame {
        bytes: Bytes::from_static(b"\x04ping"),
        sender: MockChannel::local(),
        receiver: None,
    }]);
    assert!(!conn.pipeline().session().has_outbound());
}

#[tokio::test]
async fn unencoded_user_message_is_a_pipeline_error() {
    let (mock, conn) = connection(&PipelineTemplate::new());

    let err = conn
        .write(PipelineMessage::user(42_u32))
        .await
        .expect_err("no encoder");

    assert_eq!(err.code(), codes::PIPELINE_UNEXPECTED_OUTBOUND);
    assert_eq!(err.category(), ErrorCategory::Pipeline);
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn inbound_reply_uses_attributes_set_by_earlier_stage() {
    let mut template = PipelineTemplate::new();
    template
        .add_shared("greeter", Handler::inbound(Greeter))
        .add_shared("echo", Handler::inbound(Echo));
    let (mock, conn) = connection(&template);

    conn.pipeline()
        .fire_read(PipelineMessage::Buffer(Bytes::from_static(b"abc")));
    let queued = conn.pipeline().session().take_outbound();

    assert_eq!(queued, vec![Bytes::from_static(b"abc")]);
    assert_eq!(conn.channel().attributes().get(&GREETING).as_deref(), Some("hello"));
    assert!(mock.sent().is_empty());
}

#[tokio::test]
async fn send_failure_surfaces_as_transport_error() {
    let (mock, conn) = connection(&PipelineTemplate::new());
    mock.fail_sends(true);

    let err = conn
        .write(PipelineMessage::Buffer(Bytes::from_static(b"x")))
        .await
        .expect_err("injected");

    assert_eq!(err.code(), codes::CHANNEL_SEND_FAILED);
    assert_eq!(err.category(), ErrorCategory::Transport);
}

#[tokio::test]
async fn write_after_close_is_rejected() {
    let (mock, conn) = connection(&PipelineTemplate::new());
    conn.close();

    let err = conn
        .write_to(
            PipelineMessage::Buffer(Bytes::from_static(b"late")),
            Some(MockChannel::remote()),
        )
        .await
        .expect_err("closed");

    assert_eq!(err.code(), codes::CHANNEL_CLOSED);
    assert!(mock.sent().is_empty());
    conn.closed().await;
}

#[test]
fn template_builds_independent_per_channel_stages() {
    let mut template = PipelineTemplate::new();
    template.add_per_channel("recorder", || Handler::inbound(RecordingHandler::new()));
    let (_, first) = connection(&template);
    let (_, second) = connection(&template);

    assert_ne!(first.id(), second.id());
    assert_eq!(first.pipeline().names(), vec!["recorder"]);
    assert_eq!(second.pipeline().names(), vec!["recorder"]);
}
