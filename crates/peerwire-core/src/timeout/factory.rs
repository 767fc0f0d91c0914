use std::{fmt, sync::Arc, time::Duration};

use crate::{
    error::Result,
    pipeline::{Handler, HandlerDescriptor, Pipeline, PipelineTemplate},
};

use super::{
    IDLE_DETECTOR_NAME, TIME_HANDLER_NAME, idle::IdleDetector, listener::PeerStatusListeners,
    pending::PendingResponse, time_handler::TimeHandler,
};

/// 每个连接一份的超时配置包，负责生产 `timeout0` 与 `timeout1` 两个阶段。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `pending`：只有客户端发起的连接才有，决定超时处置走客户端还是服务端分支；
/// - `timeout`：空闲阈值；
/// - `listeners`：共享注册表，工厂与处置器只调用回调，不控制监听器生命周期；
/// - `label`：诊断用连接标签；
/// - 构造后不可变，克隆开销为若干 `Arc` 计数。
#[derive(Clone)]
pub struct TimeoutFactory {
    pending: Option<Arc<dyn PendingResponse>>,
    timeout: Duration,
    listeners: Arc<PeerStatusListeners>,
    label: Arc<str>,
}

impl TimeoutFactory {
    pub fn new(
        pending: Option<Arc<dyn PendingResponse>>,
        timeout: Duration,
        listeners: Arc<PeerStatusListeners>,
        label: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            pending,
            timeout,
            listeners,
            label: label.into(),
        }
    }

    /// 客户端连接：携带挂起请求。
    pub fn client(
        pending: Arc<dyn PendingResponse>,
        timeout: Duration,
        listeners: Arc<PeerStatusListeners>,
        label: impl Into<Arc<str>>,
    ) -> Self {
        Self::new(Some(pending), timeout, listeners, label)
    }

    /// 服务端连接：没有挂起请求。
    pub fn server(
        timeout: Duration,
        listeners: Arc<PeerStatusListeners>,
        label: impl Into<Arc<str>>,
    ) -> Self {
        Self::new(None, timeout, listeners, label)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_client_side(&self) -> bool {
        self.pending.is_some()
    }

    pub fn create_idle_detector(&self) -> Handler {
        Handler::duplex(IdleDetector::new(self.timeout))
    }

    pub fn create_time_handler(&self) -> Handler {
        Handler::inbound(TimeHandler::new(
            self.pending.clone(),
            Arc::clone(&self.listeners),
            Arc::clone(&self.label),
        ))
    }

    /// 在模板头部登记两个按通道实例化的超时阶段。
    pub fn install_template(&self, template: &mut PipelineTemplate) {
        let time_factory = self.clone();
        template.add_first(
            TIME_HANDLER_NAME,
            HandlerDescriptor::per_channel(move || time_factory.create_time_handler()),
        );
        let idle_factory = self.clone();
        template.add_first(
            IDLE_DETECTOR_NAME,
            HandlerDescriptor::per_channel(move || idle_factory.create_idle_detector()),
        );
    }

    /// 直接装入已绑定的管道头部。
    pub fn install(&self, pipeline: &Pipeline) -> Result<()> {
        pipeline.add_first(TIME_HANDLER_NAME, self.create_time_handler())?;
        pipeline.add_first(IDLE_DETECTOR_NAME, self.create_idle_detector())
    }

    /// 移除两个超时阶段；重复调用或从未安装都是无操作。
    pub fn remove_timeout(pipeline: &Pipeline) {
        let idle_removed = pipeline.remove(IDLE_DETECTOR_NAME);
        let time_removed = pipeline.remove(TIME_HANDLER_NAME);
        if idle_removed || time_removed {
            tracing::trace!(
                channel = ?pipeline.channel().map(|channel| channel.id()),
                "timeout stages removed"
            );
        }
    }
}

impl fmt::Debug for TimeoutFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutFactory")
            .field("timeout", &self.timeout)
            .field("label", &self.label)
            .field("client_side", &self.is_client_side())
            .finish()
    }
}
