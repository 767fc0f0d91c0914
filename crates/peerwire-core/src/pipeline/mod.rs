//! Handler 管道：有序、具名、可运行期变更的事件处理链。
//!
//! 入站事件（激活、失活、读、用户事件、异常）按插入顺序自前向后分发，
//! 出站写入自后向前分发；每个 Handler 通过 [`HandlerContext`] 决定是否继续传播。

mod context;
mod handler;
#[allow(clippy::module_inception)]
mod pipeline;
mod template;

pub use context::HandlerContext;
pub use handler::{Handler, HandlerDirection, InboundHandler, OutboundHandler};
pub use pipeline::Pipeline;
pub(crate) use pipeline::OutboundSink;
pub use template::{HandlerDescriptor, HandlerFactory, PipelineTemplate};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        channel::Channel,
        error::{ErrorCategory, Result, codes},
        message::{PipelineEvent, PipelineMessage},
        test_stubs::MockChannel,
    };

    struct Tag {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl InboundHandler for Tag {
        fn on_read(&self, ctx: &HandlerContext<'_>, msg: PipelineMessage) {
            self.log.lock().push(format!("in:{}", self.label));
            ctx.fire_read(msg);
        }
    }

    impl OutboundHandler for Tag {
        fn on_write(&self, ctx: &HandlerContext<'_>, msg: PipelineMessage) -> Result<()> {
            self.log.lock().push(format!("out:{}", self.label));
            ctx.write(msg)
        }
    }

    fn tag(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Handler {
        Handler::duplex(Tag {
            label,
            log: Arc::clone(log),
        })
    }

    fn bound_pipeline() -> (Arc<dyn Channel>, Arc<Pipeline>) {
        let channel: Arc<dyn Channel> = MockChannel::stream();
        let pipeline = Pipeline::bind(&channel).expect("bind");
        (channel, pipeline)
    }

    #[test]
    fn inbound_runs_front_to_back_and_outbound_back_to_front() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_channel, pipeline) = bound_pipeline();
        pipeline.add_last("a", tag("a", &log)).expect("a");
        pipeline.add_last("b", tag("b", &log)).expect("b");
        pipeline.add_last("c", tag("c", &log)).expect("c");

        pipeline.fire_read(PipelineMessage::Buffer(Bytes::from_static(b"x")));
        let frames = pipeline
            .write(PipelineMessage::Buffer(Bytes::from_static(b"y")))
            .expect("write");

        assert_eq!(
            *log.lock(),
            vec!["in:a", "in:b", "in:c", "out:c", "out:b", "out:a"]
        );
        assert_eq!(frames, vec![Bytes::from_static(b"y")]);
        assert!(!pipeline.session().has_outbound());
    }

    #[test]
    fn positional_insertions_follow_anchor() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_channel, pipeline) = bound_pipeline();
        pipeline.add_last("decoder", tag("decoder", &log)).expect("decoder");
        pipeline.add_first("timeout0", tag("t0", &log)).expect("t0");
        pipeline
            .add_after("timeout0", "timeout1", tag("t1", &log))
            .expect("t1");
        pipeline
            .add_before("decoder", "admission", tag("adm", &log))
            .expect("adm");
        assert_eq!(
            pipeline.names(),
            vec!["timeout0", "timeout1", "admission", "decoder"]
        );
    }

    #[test]
    fn duplicate_and_unknown_names_are_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_channel, pipeline) = bound_pipeline();
        pipeline.add_last("a", tag("a", &log)).expect("a");

        let duplicate = pipeline.add_last("a", tag("a", &log)).expect_err("duplicate");
        assert_eq!(duplicate.code(), codes::PIPELINE_DUPLICATE_NAME);
        assert_eq!(duplicate.category(), ErrorCategory::Pipeline);

        let unknown = pipeline
            .add_after("missing", "b", tag("b", &log))
            .expect_err("unknown");
        assert_eq!(unknown.code(), codes::PIPELINE_UNKNOWN_NAME);
        assert!(pipeline.replace("missing", tag("b", &log)).is_err());
    }

    #[test]
    fn remove_is_idempotent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_channel, pipeline) = bound_pipeline();
        pipeline.add_last("a", tag("a", &log)).expect("a");
        assert!(pipeline.remove("a"));
        assert!(!pipeline.remove("a"));
        assert!(!pipeline.remove("never-added"));
        assert!(pipeline.is_empty());
    }

    #[test]
    fn replace_keeps_position() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_channel, pipeline) = bound_pipeline();
        pipeline.add_last("a", tag("a", &log)).expect("a");
        pipeline.add_last("b", tag("b", &log)).expect("b");
        pipeline.replace("a", tag("z", &log)).expect("replace");
        pipeline.fire_read(PipelineMessage::Buffer(Bytes::new()));
        assert_eq!(pipeline.names(), vec!["a", "b"]);
        assert_eq!(*log.lock(), vec!["in:z", "in:b"]);
    }

    struct SelfRemoving;

    impl InboundHandler for SelfRemoving {
        fn on_event(&self, ctx: &HandlerContext<'_>, event: PipelineEvent) {
            let name = ctx.name().to_owned();
            ctx.pipeline().remove(&name);
            ctx.fire_event(event);
        }
    }

    #[test]
    fn handler_may_remove_itself_during_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_channel, pipeline) = bound_pipeline();
        pipeline.add_last("once", Handler::inbound(SelfRemoving)).expect("once");
        pipeline.add_last("tail", tag("tail", &log)).expect("tail");

        pipeline.fire_event(PipelineEvent::Idle);
        assert_eq!(pipeline.names(), vec!["tail"]);
    }

    #[test]
    fn unencoded_message_at_head_is_rejected() {
        let (_channel, pipeline) = bound_pipeline();
        let err = pipeline
            .write(PipelineMessage::user(5u8))
            .expect_err("user payload cannot reach the socket");
        assert_eq!(err.code(), codes::PIPELINE_UNEXPECTED_OUTBOUND);
    }

    #[test]
    fn channel_cannot_bind_two_pipelines() {
        let (channel, _pipeline) = bound_pipeline();
        let err = Pipeline::bind(&channel).expect_err("second bind");
        assert_eq!(err.code(), codes::PIPELINE_ALREADY_BOUND);
    }

    #[test]
    fn template_resolves_shared_once_and_per_channel_each_time() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = tag("shared", &log);
        let created = Arc::new(Mutex::new(0usize));
        let mut template = PipelineTemplate::new();
        template.add_shared("shared", shared.clone());
        {
            let created = Arc::clone(&created);
            let log = Arc::clone(&log);
            template.add_per_channel("fresh", move || {
                *created.lock() += 1;
                tag("fresh", &log)
            });
        }

        let first: Arc<dyn Channel> = MockChannel::stream();
        let second: Arc<dyn Channel> = MockChannel::stream();
        let p1 = template.build(&first).expect("first");
        let p2 = template.build(&second).expect("second");

        assert_eq!(*created.lock(), 2);
        assert_eq!(p1.names(), vec!["shared", "fresh"]);
        assert_eq!(p2.names(), p1.names());
        assert!(first.pipeline().is_some());
    }
}
