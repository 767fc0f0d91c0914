use std::{fmt, sync::Arc};

use crate::{channel::Channel, error::Result};

use super::{handler::Handler, pipeline::Pipeline};

/// 按通道创建 Handler 的工厂。
pub type HandlerFactory = Arc<dyn Fn() -> Handler + Send + Sync>;

/// Handler 描述符：共享实例或按通道实例化。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 共享 Handler 在所有通道间复用同一实例，只能依赖通道属性保存连接级状态；
/// - 有状态的 Handler（空闲检测器、超时处置器）必须每个通道一份；
/// - 两种形态在为新通道装配管道时一次性解析。
///
/// ## 契约（What）
/// - `Shared`：按引用注册，多个通道并发调用同一实例；
/// - `PerChannel`：每个通道调用一次工厂。
#[derive(Clone)]
pub enum HandlerDescriptor {
    Shared(Handler),
    PerChannel(HandlerFactory),
}

impl HandlerDescriptor {
    pub fn per_channel<F>(factory: F) -> Self
    where
        F: Fn() -> Handler + Send + Sync + 'static,
    {
        Self::PerChannel(Arc::new(factory))
    }

    /// 解析为可注册的 Handler。
    pub fn resolve(&self) -> Handler {
        match self {
            Self::Shared(handler) => handler.clone(),
            Self::PerChannel(factory) => factory(),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared(handler) => f.debug_tuple("Shared").field(handler).finish(),
            Self::PerChannel(_) => f.write_str("PerChannel"),
        }
    }
}

/// 管道模板：新通道据此装配自己的管道。
///
/// 服务端在每次接受连接时调用 [`PipelineTemplate::build`]，客户端在建连后调用一次。
#[derive(Clone, Debug, Default)]
pub struct PipelineTemplate {
    stages: Vec<(String, HandlerDescriptor)>,
}

impl PipelineTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_last(&mut self, name: impl Into<String>, descriptor: HandlerDescriptor) -> &mut Self {
        self.stages.push((name.into(), descriptor));
        self
    }

    pub fn add_first(
        &mut self,
        name: impl Into<String>,
        descriptor: HandlerDescriptor,
    ) -> &mut Self {
        self.stages.insert(0, (name.into(), descriptor));
        self
    }

    pub fn add_shared(&mut self, name: impl Into<String>, handler: Handler) -> &mut Self {
        self.add_last(name, HandlerDescriptor::Shared(handler))
    }

    pub fn add_per_channel<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Handler + Send + Sync + 'static,
    {
        self.add_last(name, HandlerDescriptor::per_channel(factory))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 把所有阶段追加到已有管道末尾。
    pub fn install(&self, pipeline: &Pipeline) -> Result<()> {
        for (name, descriptor) in &self.stages {
            pipeline.add_last(name.clone(), descriptor.resolve())?;
        }
        Ok(())
    }

    /// 为通道绑定新管道并装配全部阶段；不分发 `channel_active`。
    pub fn build(&self, channel: &Arc<dyn Channel>) -> Result<Arc<Pipeline>> {
        let pipeline = Pipeline::bind(channel)?;
        self.install(&pipeline)?;
        Ok(pipeline)
    }
}
