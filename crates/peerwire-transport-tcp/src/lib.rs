#![doc = r#"
# peerwire-transport-tcp

## 设计动机（Why）
- 在 Tokio 运行时上实现 [`peerwire_core::Channel`] 的流式版本，
  让管道、超时与准入逻辑无需感知底层套接字；
- 提供客户端连接器与服务端监听器两种入口，二者都以 [`PipelineTemplate`](peerwire_core::PipelineTemplate)
  为每条连接装配管道，并派生一个接收任务驱动 [`run_receive_loop`](peerwire_core::run_receive_loop)。

## 核心契约（What）
- 一次套接字读取即一片，最大长度由 `receive_buffer_size` 决定，不做消息重组；
- 关闭通道会同步执行 `shutdown(Both)`，在途读取随之被唤醒；
- 套接字错误统一映射为带稳定错误码的 [`CoreError`](peerwire_core::CoreError)。

## 风险与考量（Trade-offs）
- 服务端会话超时后连接保持打开，接收任务只丢弃后续数据，资源回收依赖对端关闭或 `shutdown`。
"#]

mod channel;
mod client;
mod error;
mod server;

pub use channel::TcpChannel;
pub use client::TcpClient;
pub use server::{ADMISSION_NAME, TcpServer};
