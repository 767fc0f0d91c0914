use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    attribute::AttributeKey,
    pipeline::{HandlerContext, InboundHandler},
};

/// 记录本通道是否被准入，失活时据此决定是否向后转发。
const ADMITTED: AttributeKey<bool> = AttributeKey::new("peerwire.admission.admitted");

/// 并发连接上限的共享 Handler。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 以硬上限拒绝超额连接：不排队、不延迟，被拒绝的对端只会观察到连接被关闭；
/// - 一个实例在所有通道间共享，计数器就是全局计数。
///
/// ## 逻辑（How）
/// 1. `channel_active`：原子自增，若自增后的值超过上限，记录告警并关闭通道，不再向后转发激活；
/// 2. 关闭会同步触发该通道的 `channel_inactive`，计数在那里回落；
/// 3. `channel_inactive`：原子自减（不会减到 0 以下），仅对被准入的通道向后转发失活。
///
/// ## 契约（What）
/// - 管道保证同一通道的激活/失活成对出现，因此静止时计数等于当前被准入的连接数；
/// - 正确性只依赖自增/自减的原子性，与不同通道之间的事件顺序无关。
pub struct DropConnectionInboundHandler {
    counter: AtomicUsize,
    limit: usize,
}

impl DropConnectionInboundHandler {
    pub fn new(limit: usize) -> Self {
        Self {
            counter: AtomicUsize::new(0),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// 当前计数。
    pub fn active_connections(&self) -> usize {
        self.counter.load(Ordering::Acquire)
    }
}

impl InboundHandler for DropConnectionInboundHandler {
    fn on_channel_active(&self, ctx: &HandlerContext<'_>) {
        let current = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        if current > self.limit {
            ctx.set_attr(&ADMITTED, false);
            ctx.close();
            tracing::warn!(
                channel = %ctx.channel().id(),
                current,
                limit = self.limit,
                "dropped connection because {current} > {} connections active",
                self.limit
            );
            return;
        }
        ctx.set_attr(&ADMITTED, true);
        ctx.fire_channel_active();
    }

    fn on_channel_inactive(&self, ctx: &HandlerContext<'_>) {
        // 计数不低于 0。
        let _ = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
                value.checked_sub(1)
            });
        if ctx.attr(&ADMITTED).unwrap_or(false) {
            ctx.fire_channel_inactive();
        }
    }
}

impl fmt::Debug for DropConnectionInboundHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DropConnectionInboundHandler")
            .field("active", &self.active_connections())
            .field("limit", &self.limit)
            .finish()
    }
}
