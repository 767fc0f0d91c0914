use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::{
    error::{CoreError, ErrorCategory, Result, codes},
    peer::PeerAddress,
};

/// 客户端挂起请求的句柄，只在客户端发起的连接上存在。
///
/// 超时处置器通过它把失败交付给等待响应的调用方，并读取请求目标作为失败通知的对端。
pub trait PendingResponse: Send + Sync + 'static {
    /// 以失败完成；已完成时返回 `false`。
    fn set_failure(&self, error: CoreError) -> bool;

    /// 原始请求的目标对端。
    fn recipient(&self) -> Option<PeerAddress>;

    fn is_completed(&self) -> bool;
}

/// 基于 `oneshot` 的挂起响应槽。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 成功与失败只有第一次生效，后续调用返回 `false`；
/// - 槽被丢弃而未完成时，接收端得到 `peerwire.response.abandoned`。
pub struct ResponseSlot<T> {
    sender: Mutex<Option<oneshot::Sender<Result<T>>>>,
    recipient: Option<PeerAddress>,
}

impl<T: Send + 'static> ResponseSlot<T> {
    pub fn new(recipient: Option<PeerAddress>) -> (Self, ResponseReceiver<T>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(sender)),
                recipient,
            },
            ResponseReceiver { inner: receiver },
        )
    }

    pub fn set_success(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    fn complete(&self, outcome: Result<T>) -> bool {
        match self.sender.lock().take() {
            Some(sender) => {
                // 接收端已丢弃时结果无人关心，仍视为完成。
                let _ = sender.send(outcome);
                true
            }
            None => false,
        }
    }
}

impl<T: Send + 'static> PendingResponse for ResponseSlot<T> {
    fn set_failure(&self, error: CoreError) -> bool {
        self.complete(Err(error))
    }

    fn recipient(&self) -> Option<PeerAddress> {
        self.recipient
    }

    fn is_completed(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl<T> fmt::Debug for ResponseSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSlot")
            .field("recipient", &self.recipient)
            .field("completed", &self.sender.lock().is_none())
            .finish()
    }
}

/// 等待挂起响应结果的 future。
#[derive(Debug)]
pub struct ResponseReceiver<T> {
    inner: oneshot::Receiver<Result<T>>,
}

impl<T> Future for ResponseReceiver<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CoreError::new(
                codes::RESPONSE_ABANDONED,
                "response slot dropped without completion",
            )
            .with_category(ErrorCategory::Cancelled))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_completion_wins() {
        let (slot, receiver) = ResponseSlot::<u32>::new(None);
        assert!(slot.set_failure(CoreError::timeout("idle")));
        assert!(!slot.set_success(1));
        assert!(slot.is_completed());
        let err = receiver.await.expect_err("failure was set first");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn dropped_slot_is_reported() {
        let (slot, receiver) = ResponseSlot::<u32>::new(None);
        drop(slot);
        let err = receiver.await.expect_err("abandoned");
        assert_eq!(err.code(), codes::RESPONSE_ABANDONED);
    }

    #[tokio::test]
    async fn success_is_delivered() {
        let (slot, receiver) = ResponseSlot::new(None);
        assert!(slot.set_success("pong"));
        assert_eq!(receiver.await.expect("success"), "pong");
    }
}
