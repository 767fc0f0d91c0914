use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use tokio::time::Instant;

use crate::{
    error::Result,
    message::{PipelineEvent, PipelineMessage},
    pipeline::{HandlerContext, InboundHandler, OutboundHandler},
};

/// 空闲检测器（`timeout0`），每个通道一个实例。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 最近活动时间由 I/O 路径写入，由接收任务的节拍读取，两者天然竞争，
///   因此时间戳以原子整数保存（相对构造时刻的纳秒偏移）；
/// - 每个空闲期只允许上报一次空闲事件，恢复活动后重新布防。
///
/// ## 逻辑（How）
/// 1. 入站读、出站写、通道激活都会刷新时间戳并清除 `raised`；
/// 2. 收到 [`PipelineEvent::IdleCheck`] 时比较 `now - last_activity` 与阈值；
/// 3. 越过阈值且 `raised` 由 `false` 翻转成功时，向后传播 [`PipelineEvent::Idle`]。
///
/// ## 契约（What）
/// - 节拍事件在此被消费，不再向后传播；
/// - 阈值内有任何活动的通道不会上报空闲。
#[derive(Debug)]
pub struct IdleDetector {
    timeout: Duration,
    origin: Instant,
    last_activity_nanos: AtomicU64,
    raised: AtomicBool,
}

impl IdleDetector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            origin: Instant::now(),
            last_activity_nanos: AtomicU64::new(0),
            raised: AtomicBool::new(false),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 记录一次活动并重新布防。
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    fn touch_at(&self, now: Instant) {
        self.last_activity_nanos
            .fetch_max(self.offset_nanos(now), Ordering::AcqRel);
        self.raised.store(false, Ordering::Release);
    }

    /// 距最近一次活动经过的时长。
    pub fn idle_for(&self, now: Instant) -> Duration {
        let last = Duration::from_nanos(self.last_activity_nanos.load(Ordering::Acquire));
        now.saturating_duration_since(self.origin)
            .saturating_sub(last)
    }

    /// 判定是否应当上报空闲；同一空闲期内只返回一次 `true`。
    pub fn check(&self, now: Instant) -> bool {
        if self.idle_for(now) < self.timeout {
            return false;
        }
        !self.raised.swap(true, Ordering::AcqRel)
    }

    fn offset_nanos(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin).as_nanos();
        u64::try_from(elapsed).unwrap_or(u64::MAX)
    }
}

impl InboundHandler for IdleDetector {
    fn on_channel_active(&self, ctx: &HandlerContext<'_>) {
        self.touch();
        ctx.fire_channel_active();
    }

    fn on_read(&self, ctx: &HandlerContext<'_>, msg: PipelineMessage) {
        self.touch();
        ctx.fire_read(msg);
    }

    fn on_event(&self, ctx: &HandlerContext<'_>, event: PipelineEvent) {
        match event {
            PipelineEvent::IdleCheck(now) => {
                if self.check(now) {
                    tracing::trace!(
                        channel = %ctx.channel().id(),
                        idle_ms = u64::try_from(self.idle_for(now).as_millis()).unwrap_or(u64::MAX),
                        "idle threshold crossed"
                    );
                    ctx.fire_event(PipelineEvent::Idle);
                }
            }
            other => ctx.fire_event(other),
        }
    }
}

impl OutboundHandler for IdleDetector {
    fn on_write(&self, ctx: &HandlerContext<'_>, msg: PipelineMessage) -> Result<()> {
        self.touch();
        ctx.write(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn raises_once_per_idle_episode() {
        let detector = IdleDetector::new(Duration::from_secs(5));
        assert!(!detector.check(Instant::now()));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(detector.check(Instant::now()));
        assert!(!detector.check(Instant::now()));

        detector.touch();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(!detector.check(Instant::now()));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(detector.check(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_within_window_prevents_idle() {
        let detector = IdleDetector::new(Duration::from_millis(500));
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(400)).await;
            detector.touch();
            assert!(!detector.check(Instant::now()));
        }
    }
}
