use std::{
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::peer::{PeerAddress, PeerFailure};

/// 对端状态监听器，由路由表等外部协作者实现。
///
/// 调用顺序不作保证；实现不得假设与其他监听器的先后关系。
pub trait PeerStatusListener: Send + Sync + 'static {
    fn peer_failed(&self, remote: &PeerAddress, failure: &PeerFailure);
}

/// 监听器注册表。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 超时子系统只负责调用回调，不决定监听器的生命周期，因此只持有弱引用；
/// - 注册表会被无关连接的建立与拆除并发修改。
///
/// ## 逻辑（How）
/// - 增删与通知共用同一把 `parking_lot::Mutex`；
/// - 通知先在锁内拍快照（顺带清理已释放的监听器），释放锁后再逐个回调，
///   缓慢的回调不会阻塞其他连接修改注册表。
#[derive(Default)]
pub struct PeerStatusListeners {
    listeners: Mutex<Vec<Weak<dyn PeerStatusListener>>>,
}

impl PeerStatusListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<L: PeerStatusListener>(&self, listener: &Arc<L>) {
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<dyn PeerStatusListener> = weak;
        self.listeners.lock().push(weak);
    }

    pub fn add_dyn(&self, listener: &Arc<dyn PeerStatusListener>) {
        self.listeners.lock().push(Arc::downgrade(listener));
    }

    /// 按实例移除，返回是否移除了任何条目。
    pub fn remove<L: PeerStatusListener>(&self, listener: &Arc<L>) -> bool {
        let target = Arc::as_ptr(listener) as *const ();
        let mut guard = self.listeners.lock();
        let before = guard.len();
        guard.retain(|weak| weak.as_ptr() as *const () != target);
        guard.len() != before
    }

    /// 仍然存活的监听器数量。
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn PeerStatusListener>> {
        let mut guard = self.listeners.lock();
        guard.retain(|weak| weak.strong_count() > 0);
        guard.iter().filter_map(Weak::upgrade).collect()
    }

    /// 通知所有存活的监听器，返回被通知的数量。
    pub fn notify_failed(&self, remote: &PeerAddress, failure: &PeerFailure) -> usize {
        let listeners = self.snapshot();
        for listener in &listeners {
            listener.peer_failed(remote, failure);
        }
        listeners.len()
    }
}

impl fmt::Debug for PeerStatusListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerStatusListeners")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_stubs::RecordingListener;

    fn remote() -> PeerAddress {
        PeerAddress::unknown("127.0.0.1:9000".parse().expect("addr"))
    }

    #[test]
    fn dropped_listener_is_pruned() {
        let registry = PeerStatusListeners::new();
        let kept = Arc::new(RecordingListener::new());
        {
            let dropped = Arc::new(RecordingListener::new());
            registry.add(&dropped);
            registry.add(&kept);
            assert_eq!(registry.len(), 2);
        }
        assert_eq!(registry.notify_failed(&remote(), &PeerFailure::timeout()), 1);
        assert_eq!(kept.failures().len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_by_instance() {
        let registry = PeerStatusListeners::new();
        let a = Arc::new(RecordingListener::new());
        let b = Arc::new(RecordingListener::new());
        registry.add(&a);
        registry.add(&b);
        assert!(registry.remove(&a));
        assert!(!registry.remove(&a));
        registry.notify_failed(&remote(), &PeerFailure::timeout());
        assert!(a.failures().is_empty());
        assert_eq!(b.failures().len(), 1);
    }

    struct Reentrant {
        registry: Arc<PeerStatusListeners>,
        late: Arc<RecordingListener>,
    }

    impl PeerStatusListener for Reentrant {
        fn peer_failed(&self, _remote: &PeerAddress, _failure: &PeerFailure) {
            self.registry.add(&self.late);
        }
    }

    #[test]
    fn callback_may_mutate_registry() {
        let registry = Arc::new(PeerStatusListeners::new());
        let late = Arc::new(RecordingListener::new());
        let reentrant = Arc::new(Reentrant {
            registry: Arc::clone(&registry),
            late: Arc::clone(&late),
        });
        registry.add(&reentrant);
        assert_eq!(registry.notify_failed(&remote(), &PeerFailure::timeout()), 1);
        assert_eq!(registry.len(), 2);
        assert!(late.failures().is_empty());
    }
}
