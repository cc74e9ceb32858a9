//! # PeerRegistry：成员快照与实时广播
//!
//! ## 核心意图（Why）
//! - 维护“当前仍存活成员”的有序序列，并把每一次加入/离开广播给所有订阅者；
//! - 新订阅者先重放快照再接续实时事件，两者之间既不能重复也不能缺口。
//!
//! ## 架构定位（Where）
//! - 本模块只负责变更与扇出；重放与实时尾部的拼接由 [`crate::stream`] 完成，
//!   角色投影与负载均衡分别位于 [`crate::projection`] 与 [`crate::resolver`]。
//!
//! ## 行为契约（What）
//! - `add`：追加成员并广播 `Add`，返回插入位置，作为之后移除的句柄；
//! - `remove`：按位置删除并让序列收缩，广播携带原始地址值的 `Remove`；越界返回
//!   [`ClusterError::PeerIndexOutOfRange`]；
//! - `snapshot`：返回当前成员的时点副本；
//! - `subscribe`：在同一把锁内捕获快照并登记实时通道，保证重放与实时尾部的交接是原子的。
//!
//! ## 风险提示（Trade-offs）
//! - 每个订阅者一条无界通道：生产者永不阻塞、永不丢弃，慢消费者的积压可以通过
//!   [`SubscriptionProbe`](crate::SubscriptionProbe) 观测；
//! - 位置索引在并发变更下不稳定，调用方需要串行化扩缩容操作。

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

use crate::{
    address::PeerAddress,
    error::ClusterError,
    event::ChangeEvent,
    projection::{EndpointEvents, RoleProjection},
    resolver::Resolver,
    stream::{MembershipStream, QueueCounters},
};

/// 订阅者在注册表中的登记项。
struct Subscriber {
    id: u64,
    sender: mpsc::UnboundedSender<ChangeEvent<PeerAddress>>,
    counters: Arc<QueueCounters>,
}

/// 注册表的共享状态，只能通过 [`PeerRegistry`] 的方法修改。
pub(crate) struct RegistryState {
    members: Vec<PeerAddress>,
    subscribers: Vec<Subscriber>,
    revision: u64,
    next_subscriber_id: u64,
}

impl RegistryState {
    fn new() -> Self {
        Self {
            members: Vec::new(),
            subscribers: Vec::new(),
            revision: 0,
            next_subscriber_id: 0,
        }
    }

    /// 向所有订阅者投递事件，并顺带清理已关闭的接收端。
    fn publish(&mut self, event: &ChangeEvent<PeerAddress>) {
        self.revision += 1;
        self.subscribers.retain(|subscriber| {
            subscriber.counters.record_published();
            if subscriber.sender.send(event.clone()).is_ok() {
                true
            } else {
                trace!(subscriber.id = subscriber.id, "pruning closed subscriber");
                false
            }
        });
    }

    /// 解除订阅者登记，返回是否确实移除了条目。
    pub(crate) fn detach(&mut self, id: u64) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|subscriber| subscriber.id != id);
        let detached = self.subscribers.len() != before;
        if detached {
            trace!(subscriber.id = id, "subscriber detached");
        }
        detached
    }
}

/// 成员注册表句柄。
///
/// # 教案式注释
/// - **意图 (Why)**：以显式对象持有“有序成员序列 + 广播发送端”这一对共享状态，
///   通过句柄传给投影与解析组件，不依赖任何全局变量；
/// - **契约 (What)**：`Clone` 只复制句柄，所有克隆共享同一份状态；全部句柄释放后，
///   存活的订阅流会在消费完已投递事件后结束；
/// - **并发 (How)**：变更、快照与订阅共用一把 `parking_lot::Mutex`，锁内只做内存操作与无阻塞发送。
#[derive(Clone)]
pub struct PeerRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    /// 创建空注册表。
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryState::new())),
        }
    }

    /// 追加成员并广播 `Add`。
    ///
    /// - **返回值**：插入位置，即当时的成员数量减一；
    /// - **后置条件**：此后任何时刻订阅的调用方都会在重放中看到该成员，直到它被移除。
    pub fn add(&self, address: PeerAddress) -> usize {
        let mut state = self.inner.lock();
        state.members.push(address.clone());
        let index = state.members.len() - 1;
        state.publish(&ChangeEvent::Add(address.clone()));
        debug!(
            peer.index = index,
            peer.host = address.host_name(),
            membership.size = state.members.len(),
            membership.revision = state.revision,
            "peer added"
        );
        index
    }

    /// 按位置移除成员并广播携带原始值的 `Remove`。
    ///
    /// - **前置条件**：`index` 必须小于当前成员数量；
    /// - **错误**：越界时不修改任何状态，返回 [`ClusterError::PeerIndexOutOfRange`]；
    /// - **后置条件**：后续成员的位置整体前移一位。
    pub fn remove(&self, index: usize) -> Result<PeerAddress, ClusterError> {
        let mut state = self.inner.lock();
        let len = state.members.len();
        if index >= len {
            let err = ClusterError::PeerIndexOutOfRange { index, len };
            error!(
                error.code = err.code(),
                peer.index = index,
                membership.size = len,
                "peer index out of range on removal"
            );
            return Err(err);
        }
        let address = state.members.remove(index);
        state.publish(&ChangeEvent::Remove(address.clone()));
        debug!(
            peer.index = index,
            peer.host = address.host_name(),
            membership.size = state.members.len(),
            membership.revision = state.revision,
            "peer removed"
        );
        Ok(address)
    }

    /// 当前成员的时点副本，按加入顺序排列。
    pub fn snapshot(&self) -> Vec<PeerAddress> {
        self.inner.lock().members.clone()
    }

    /// 订阅成员事件：先重放当前成员的 `Add`，再接续实时事件。
    ///
    /// 每次调用都得到一条独立的、重新组合的序列。
    pub fn subscribe(&self) -> MembershipStream {
        let mut state = self.inner.lock();
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;

        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(QueueCounters::default());
        let replay = state
            .members
            .iter()
            .cloned()
            .map(ChangeEvent::Add)
            .collect();
        state.subscribers.push(Subscriber {
            id,
            sender,
            counters: Arc::clone(&counters),
        });
        trace!(
            subscriber.id = id,
            replay.len = state.members.len(),
            membership.revision = state.revision,
            "subscriber attached"
        );
        drop(state);

        MembershipStream::compose(id, replay, receiver, counters, Arc::downgrade(&self.inner))
    }

    /// 复制角色的端点事件流，供节点间复制链路建立使用（不做负载均衡）。
    pub fn replication_peers(&self) -> EndpointEvents {
        RoleProjection::replication().project_stream(self.subscribe())
    }

    /// 基于一条新订阅与给定投影构造轮询解析器。
    ///
    /// 必须在 Tokio 运行时内调用，否则返回 [`ClusterError::RuntimeUnavailable`]。
    pub fn resolver(&self, projection: RoleProjection) -> Result<Resolver, ClusterError> {
        let role = projection.label().to_owned();
        Resolver::round_robin(role, projection.project_stream(self.subscribe()))
    }

    /// 当前成员数量。
    pub fn len(&self) -> usize {
        self.inner.lock().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 变更修订号，每次成功的 `add`/`remove` 加一。
    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    /// 仍登记在册的订阅者数量。
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// 只读视图，共享同一份状态但不暴露 `add`/`remove`。
    pub fn view(&self) -> RegistryView {
        RegistryView {
            registry: self.clone(),
        }
    }
}

impl std::fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("PeerRegistry")
            .field("members", &state.members.len())
            .field("subscribers", &state.subscribers.len())
            .field("revision", &state.revision)
            .finish()
    }
}

/// 注册表的只读视图。
///
/// # 教案式注释
/// - **意图 (Why)**：持有注册表的一方（例如嵌入式集群）依赖“成员位置只随自身操作变化”，
///   对外分发可变句柄会让第三方悄悄改动成员序列；
/// - **契约 (What)**：可以读取快照、订阅、构造解析器，但无法增删成员；`Clone` 只复制句柄。
#[derive(Clone)]
pub struct RegistryView {
    registry: PeerRegistry,
}

impl RegistryView {
    pub fn snapshot(&self) -> Vec<PeerAddress> {
        self.registry.snapshot()
    }

    pub fn subscribe(&self) -> MembershipStream {
        self.registry.subscribe()
    }

    pub fn replication_peers(&self) -> EndpointEvents {
        self.registry.replication_peers()
    }

    /// 必须在 Tokio 运行时内调用，见 [`PeerRegistry::resolver`]。
    pub fn resolver(&self, projection: RoleProjection) -> Result<Resolver, ClusterError> {
        self.registry.resolver(projection)
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.registry.revision()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.subscriber_count()
    }
}

impl std::fmt::Debug for RegistryView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RegistryView").field(&self.registry).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn peer(base: u16) -> PeerAddress {
        PeerAddress::new("localhost", base, base + 1, base + 2)
    }

    #[test]
    fn add_returns_insertion_index() {
        let registry = PeerRegistry::new();
        assert_eq!(registry.add(peer(13000)), 0);
        assert_eq!(registry.add(peer(13010)), 1);
        assert_eq!(registry.snapshot(), vec![peer(13000), peer(13010)]);
        assert_eq!(registry.revision(), 2);
    }

    #[test]
    fn remove_collapses_the_sequence() {
        let registry = PeerRegistry::new();
        registry.add(peer(13000));
        registry.add(peer(13010));
        registry.add(peer(13020));

        assert_eq!(registry.remove(1), Ok(peer(13010)));
        assert_eq!(registry.snapshot(), vec![peer(13000), peer(13020)]);
        assert_eq!(registry.remove(1), Ok(peer(13020)));
        assert_eq!(registry.len(), 1);
    }

    #[traced_test]
    #[test]
    fn out_of_range_removal_is_reported_and_leaves_state_untouched() {
        let registry = PeerRegistry::new();
        registry.add(peer(13000));
        let revision = registry.revision();

        let err = registry.remove(5).expect_err("越界移除必须失败");
        assert_eq!(err, ClusterError::PeerIndexOutOfRange { index: 5, len: 1 });
        assert_eq!(registry.revision(), revision, "失败的移除不得推进修订号");
        assert_eq!(registry.snapshot(), vec![peer(13000)]);
        assert!(logs_contain("peer index out of range on removal"));
    }

    #[test]
    fn dropped_subscriber_is_detached_immediately() {
        let registry = PeerRegistry::new();
        let stream = registry.subscribe();
        assert_eq!(registry.subscriber_count(), 1);
        drop(stream);
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn clones_share_state() {
        let registry = PeerRegistry::new();
        let handle = registry.clone();
        handle.add(peer(13000));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn view_tracks_the_registry_it_was_taken_from() {
        let registry = PeerRegistry::new();
        let view = registry.view();
        registry.add(peer(13000));

        assert_eq!(view.snapshot(), vec![peer(13000)]);
        assert_eq!(view.revision(), 1);
        let stream = view.subscribe();
        assert_eq!(stream.replay_remaining(), 1);
        assert_eq!(view.subscriber_count(), 1);

        registry.remove(0).expect("下标有效");
        assert!(view.is_empty());
    }
}
