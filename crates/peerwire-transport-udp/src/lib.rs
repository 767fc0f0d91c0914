#![doc = r#"
# peerwire-transport-udp

## 设计动机（Why）
- 以 Tokio `UdpSocket` 实现 [`peerwire_core::Channel`] 的数据报版本，DHT 的查询/应答走这条路径；
- 管道、超时与准入逻辑与流式传输共用，差异只体现在通道与端点上。

## 核心契约（What）
- 一个数据报即一片，片的 `remote` 是发送者；
- 未连接端点发送时必须指定接收者；
- 每个数据报的发送者都会记录到 [`REMOTE_INET_ADDRESS`](peerwire_core::REMOTE_INET_ADDRESS)，
  供超时处置在缺少固定远端时回退使用。
"#]

mod channel;
mod endpoint;
mod error;

pub use channel::UdpChannel;
pub use endpoint::UdpEndpoint;
