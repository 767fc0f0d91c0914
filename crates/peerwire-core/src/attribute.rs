use std::{
    any::Any,
    fmt,
    marker::PhantomData,
    net::SocketAddr,
};

use dashmap::DashMap;

use crate::peer::PeerAddress;

/// 解码阶段在拿到完整身份前写入的对端地址。
pub const PEER_ADDRESS: AttributeKey<PeerAddress> = AttributeKey::new("peerwire.peer_address");

/// 解码阶段记录的远端套接字地址，数据报通道没有固定远端时作为回退来源。
pub const REMOTE_INET_ADDRESS: AttributeKey<SocketAddr> =
    AttributeKey::new("peerwire.remote_inet_address");

/// 带类型的属性键。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 共享 Handler 本身不能持有连接状态，连接级事实（例如已解码的对端身份）只能经由属性传递；
/// - 以 `const` 构造的键可以在模块间作为公共常量导出，读写两侧共享同一类型参数。
///
/// ## 契约（What）
/// - 键以 `name` 区分，同名不同类型的键会互相覆盖，读取时类型不匹配视为缺失；
/// - 键本身是零成本的 `Copy` 值。
pub struct AttributeKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttributeKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttributeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttributeKey<T> {}

impl<T> fmt::Debug for AttributeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttributeKey").field(&self.name).finish()
    }
}

/// 通道级属性表。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 同一通道上的所有 Handler 上下文共享一张表：解码器写入的 [`PEER_ADDRESS`]
///   必须能被排在它前面的超时 Handler 读到；
/// - 读写永不失败，缺失的键返回 `None`。
///
/// ## 逻辑（How）
/// - 内部使用 `DashMap` 分片锁，跨任务读写无需外部同步；
/// - 值以 `Box<dyn Any>` 存储，读取时向下转型并克隆出来，避免把分片锁守卫暴露给调用方。
///
/// ## 风险（Trade-offs）
/// - 读取返回克隆值，体积大的属性应包一层 `Arc`。
#[derive(Default)]
pub struct AttributeMap {
    entries: DashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T>(&self, key: &AttributeKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.entries
            .get(key.name)
            .and_then(|entry| entry.value().downcast_ref::<T>().cloned())
    }

    /// 写入属性，返回被覆盖的旧值（类型一致时）。
    pub fn set<T>(&self, key: &AttributeKey<T>, value: T) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.entries
            .insert(key.name, Box::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn remove<T>(&self, key: &AttributeKey<T>) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.entries
            .remove(key.name)
            .and_then(|(_, previous)| previous.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn contains<T>(&self, key: &AttributeKey<T>) -> bool {
        self.entries.contains_key(key.name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&'static str> = self.entries.iter().map(|entry| *entry.key()).collect();
        f.debug_struct("AttributeMap").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNT: AttributeKey<u32> = AttributeKey::new("test.count");
    const COUNT_AS_TEXT: AttributeKey<String> = AttributeKey::new("test.count");

    #[test]
    fn absent_key_reads_as_none() {
        let map = AttributeMap::new();
        assert_eq!(map.get(&COUNT), None);
        assert!(!map.contains(&COUNT));
    }

    #[test]
    fn set_returns_previous_value() {
        let map = AttributeMap::new();
        assert_eq!(map.set(&COUNT, 1), None);
        assert_eq!(map.set(&COUNT, 2), Some(1));
        assert_eq!(map.get(&COUNT), Some(2));
        assert_eq!(map.remove(&COUNT), Some(2));
        assert!(map.is_empty());
    }

    #[test]
    fn type_mismatch_reads_as_none() {
        let map = AttributeMap::new();
        map.set(&COUNT, 7);
        assert_eq!(map.get(&COUNT_AS_TEXT), None);
        assert_eq!(map.get(&COUNT), Some(7));
    }

    #[test]
    fn reserved_keys_carry_addresses() {
        let map = AttributeMap::new();
        let addr: SocketAddr = "127.0.0.1:7000".parse().expect("addr");
        map.set(&REMOTE_INET_ADDRESS, addr);
        map.set(&PEER_ADDRESS, PeerAddress::unknown(addr));
        assert_eq!(map.get(&REMOTE_INET_ADDRESS), Some(addr));
        assert_eq!(map.get(&PEER_ADDRESS).map(|p| p.socket_addr()), Some(addr));
    }
}
