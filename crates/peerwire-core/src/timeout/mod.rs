//! 超时子系统：空闲检测、超时处置与失败通知。
//!
//! 状态机：`ACTIVE →（阈值内无字节）→ IDLE_RAISED → {客户端分支 | 服务端分支}`。

mod factory;
mod idle;
mod listener;
mod pending;
mod time_handler;

pub use factory::TimeoutFactory;
pub use idle::IdleDetector;
pub use listener::{PeerStatusListener, PeerStatusListeners};
pub use pending::{PendingResponse, ResponseReceiver, ResponseSlot};
pub use time_handler::TimeHandler;

/// 空闲检测器的保留阶段名。
pub const IDLE_DETECTOR_NAME: &str = "timeout0";
/// 超时处置器的保留阶段名。
pub const TIME_HANDLER_NAME: &str = "timeout1";
