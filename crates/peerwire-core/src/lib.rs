#![doc = r#"
# peerwire-core

## 设计动机（Why）
- **定位**：P2P DHT 节点的传输与连接治理核心，把原始 TCP/UDP 套接字转换为可复用、有序的
  Handler 管道，并负责识别、处置无响应的对端。
- **架构角色**：传输实现（`peerwire-transport-tcp`、`peerwire-transport-udp`）只负责字节搬运与
  接收任务，事件分发、超时检测、准入控制全部在本 crate 完成。
- **设计理念**：Netty 风格的“有序列表 + 索引游标”调度，Handler 以能力 trait 表达，
  共享/按通道实例化通过 [`pipeline::HandlerDescriptor`] 显式区分。

## 核心契约（What）
- [`channel::Channel`]：统一的发送/关闭契约，关闭幂等且关闭通知只触发一次；
- [`pipeline::Pipeline`]：入站事件自前向后、出站事件自后向前，支持运行期增删；
- [`timeout`]：`timeout0` 空闲检测 + `timeout1` 超时处置，客户端/服务端分支由挂起请求是否存在决定；
- [`admission::DropConnectionInboundHandler`]：全局并发连接上限；
- [`session`]：按片（piece）驱动管道的接收循环与会话状态。

## 实现策略（How）
- 管道快照使用 `arc-swap` 原子替换，变更在 `parking_lot::Mutex` 下串行化；
- 空闲时间戳、准入计数器均为原子量；监听器列表只在拍快照时持锁；
- 取消基于 `tokio::sync::watch`，所有计时基于 `tokio::time::Instant`，便于暂停时钟测试。

## 风险与考量（Trade-offs）
- 同一通道的事件分发是同步的，Handler 内不得执行长耗时逻辑；
- 关闭通知在调用 `close` 的线程上同步执行 `channel_inactive`，Handler 必须容忍重入。
"#]

pub mod admission;
pub mod attribute;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod peer;
pub mod pipeline;
pub mod session;
/// 测试桩命名空间，集中暴露通道、监听器与数据源的可观测替身，供集成测试与传输 crate 复用。
pub mod test_stubs;
pub mod timeout;

pub use admission::DropConnectionInboundHandler;
pub use attribute::{AttributeKey, AttributeMap, PEER_ADDRESS, REMOTE_INET_ADDRESS};
pub use channel::{Channel, ChannelBase, ChannelId, TransportKind};
pub use config::{ConfigError, TransportConfig};
pub use connection::Connection;
pub use error::{CoreError, ErrorCategory, Result, codes};
pub use message::{Piece, PipelineEvent, PipelineMessage};
pub use peer::{AbortCause, PeerAddress, PeerFailure, PeerId, PeerIdentity};
pub use pipeline::{
    Handler, HandlerContext, HandlerDescriptor, InboundHandler, OutboundHandler, Pipeline,
    PipelineTemplate,
};
pub use session::{PieceRead, PieceSource, ReceiveExit, Session, receive_pass, run_receive_loop};
pub use timeout::{
    IdleDetector, PeerStatusListener, PeerStatusListeners, PendingResponse, ResponseReceiver,
    ResponseSlot, TimeHandler, TimeoutFactory,
};
