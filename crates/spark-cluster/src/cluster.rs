//! # 嵌入式写集群
//!
//! ## 核心意图（Why）
//! - 在单进程内按需扩缩写集群节点，并让节点、客户端解析器与复制链路共享同一份成员视图；
//! - 节点进程本身不在本 crate 范围内，通过 [`PeerLauncher`] 注入，测试可以使用记录型实现。
//!
//! ## 执行逻辑（How）
//! - 扩容：分配端口块 → 组装 [`NodeSpec`] → 以复制角色事件流启动节点 → 登记成员 → 推进端口游标；
//!   复制事件流在成员登记之前订阅，新节点会先通过重放看到既有成员，再以实时 `Add` 看到自己；
//! - 缩容：先校验下标与注册表中同一位置的成员，再停止节点，最后从注册表移除，订阅者据此观察到 `Remove`。
//!
//! ## 风险提示（Trade-offs）
//! - 服务器下标与注册表位置一一对应：注册表只由本集群对象修改，对外只提供 [`RegistryView`]；
//!   一旦两者错位，扩缩容返回 [`ClusterError::MembershipDrift`]，不会停止一个节点却移除另一个成员；
//! - 方法均需 `&mut self`，扩缩容天然串行。

use std::{fmt, time::Duration};

use tracing::{error, info, warn};

use crate::{
    address::PeerAddress,
    config::{ClusterConfig, PortAllocator},
    error::ClusterError,
    projection::{EndpointEvents, RoleProjection},
    registry::{PeerRegistry, RegistryView},
    resolver::Resolver,
};

/// 节点运行状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeState {
    Starting,
    Up,
    Down,
}

/// 启动单个节点所需的全部参数。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSpec {
    pub app_name: String,
    /// 节点对外宣告的 VIP，与应用名一致。
    pub vip_address: String,
    pub address: PeerAddress,
    pub shutdown_port: u16,
    pub admin_port: u16,
    pub replication_retry: Duration,
}

/// 节点生命周期协作者。
///
/// # 教案式注释
/// - **契约 (What)**：
///   - `launch` 接收节点参数与复制角色的端点事件流，成功时返回句柄；节点应持续消费该事件流以维护复制链路；
///   - `stop` 失败时集群不做任何状态变更，句柄仍由集群持有；
///   - `state` 只用于报告，不得阻塞。
/// - **风险提示 (Trade-offs)**：启动失败不会推进端口游标，同一端口块会在下一次扩容时被再次尝试。
pub trait PeerLauncher {
    type Handle;

    fn launch(
        &mut self,
        spec: &NodeSpec,
        replication_peers: EndpointEvents,
    ) -> Result<Self::Handle, ClusterError>;

    fn stop(&mut self, handle: &Self::Handle) -> Result<(), ClusterError>;

    fn state(&self, handle: &Self::Handle) -> NodeState;
}

/// 单个节点的报告条目。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeReport {
    pub index: usize,
    pub address: PeerAddress,
    pub shutdown_port: u16,
    pub admin_port: u16,
    pub state: NodeState,
}

/// 集群报告，按服务器下标排列。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterReport {
    pub nodes: Vec<NodeReport>,
}

impl ClusterReport {
    /// 处于 `Up` 状态的节点数量。
    pub fn up_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| node.state == NodeState::Up)
            .count()
    }
}

struct RunningNode<H> {
    spec: NodeSpec,
    handle: H,
}

/// 嵌入式写集群。
pub struct EmbeddedCluster<L: PeerLauncher> {
    config: ClusterConfig,
    launcher: L,
    allocator: PortAllocator,
    registry: PeerRegistry,
    servers: Vec<RunningNode<L::Handle>>,
}

impl<L: PeerLauncher> EmbeddedCluster<L> {
    /// 校验配置并创建空集群。
    pub fn new(config: ClusterConfig, launcher: L) -> Result<Self, ClusterError> {
        config.validate()?;
        Ok(Self {
            allocator: PortAllocator::new(config.ports),
            config,
            launcher,
            registry: PeerRegistry::new(),
            servers: Vec::new(),
        })
    }

    /// 使用缺省配置创建空集群。
    pub fn with_launcher(launcher: L) -> Self {
        Self {
            allocator: PortAllocator::new(ClusterConfig::default().ports),
            config: ClusterConfig::default(),
            launcher,
            registry: PeerRegistry::new(),
            servers: Vec::new(),
        }
    }

    /// 启动一个新节点并登记为成员，返回服务器下标。
    pub fn scale_up_by_one(&mut self) -> Result<usize, ClusterError> {
        let ports = self.allocator.peek()?;
        let address = ports.peer_address(self.config.host_name.as_str());
        let spec = NodeSpec {
            app_name: self.config.app_name.clone(),
            vip_address: self.config.app_name.clone(),
            address: address.clone(),
            shutdown_port: ports.shutdown,
            admin_port: ports.admin,
            replication_retry: self.config.replication_retry(),
        };

        let handle = match self.launcher.launch(&spec, self.registry.replication_peers()) {
            Ok(handle) => handle,
            Err(err) => {
                error!(
                    error.code = err.code(),
                    error.message = %err,
                    node.registration_port = ports.registration,
                    "node launch failed"
                );
                return Err(err);
            }
        };

        let index = self.servers.len();
        let registered = self.registry.add(address);
        if registered != index {
            return Err(self.abandon_launch(index, registered, &spec, &handle));
        }
        self.allocator.commit();
        self.servers.push(RunningNode { spec, handle });
        info!(
            node.index = index,
            node.registration_port = ports.registration,
            node.discovery_port = ports.discovery,
            node.replication_port = ports.replication,
            node.shutdown_port = ports.shutdown,
            node.admin_port = ports.admin,
            cluster.size = self.servers.len(),
            "scaled up by one node"
        );
        Ok(index)
    }

    /// 撤销位置错位的一次扩容：移除刚登记的成员并停止刚启动的节点，端口游标保持不变。
    fn abandon_launch(
        &mut self,
        index: usize,
        registered: usize,
        spec: &NodeSpec,
        handle: &L::Handle,
    ) -> ClusterError {
        let err = ClusterError::MembershipDrift {
            server_index: index,
            peer: spec.address.to_string(),
        };
        error!(
            error.code = err.code(),
            node.index = index,
            peer.index = registered,
            "registry position does not match the server index"
        );
        if let Err(rollback) = self.registry.remove(registered) {
            warn!(error.code = rollback.code(), "failed to withdraw the drifted peer");
        }
        if let Err(stop) = self.launcher.stop(handle) {
            warn!(
                error.code = stop.code(),
                error.message = %stop,
                "failed to stop the node launched before the drift"
            );
        }
        err
    }

    /// 连续扩容 `count` 个节点；中途失败时已启动的节点保留。
    pub fn scale_up(&mut self, count: usize) -> Result<Vec<usize>, ClusterError> {
        (0..count).map(|_| self.scale_up_by_one()).collect()
    }

    /// 停止并移除指定下标的节点，返回其地址。
    pub fn scale_down_by_one(&mut self, index: usize) -> Result<PeerAddress, ClusterError> {
        let len = self.servers.len();
        if index >= len {
            let err = ClusterError::PeerIndexOutOfRange { index, len };
            error!(
                error.code = err.code(),
                node.index = index,
                cluster.size = len,
                "scale down requested for an unknown node"
            );
            return Err(err);
        }
        let expected = &self.servers[index].spec.address;
        if self.registry.snapshot().get(index) != Some(expected) {
            let err = ClusterError::MembershipDrift {
                server_index: index,
                peer: expected.to_string(),
            };
            error!(
                error.code = err.code(),
                node.index = index,
                membership.size = self.registry.len(),
                "registry position does not match the server index"
            );
            return Err(err);
        }

        self.launcher.stop(&self.servers[index].handle)?;
        let node = self.servers.remove(index);
        let address = self.registry.remove(index)?;
        info!(
            node.index = index,
            node.registration_port = node.spec.address.registration_port(),
            cluster.size = self.servers.len(),
            "scaled down by one node"
        );
        Ok(address)
    }

    /// 逆序停止全部节点。
    pub fn shutdown(&mut self) -> Result<(), ClusterError> {
        while let Some(last) = self.servers.len().checked_sub(1) {
            self.scale_down_by_one(last)?;
        }
        Ok(())
    }

    pub fn cluster_report(&self) -> ClusterReport {
        let nodes = self
            .servers
            .iter()
            .enumerate()
            .map(|(index, node)| NodeReport {
                index,
                address: node.spec.address.clone(),
                shutdown_port: node.spec.shutdown_port,
                admin_port: node.spec.admin_port,
                state: self.launcher.state(&node.handle),
            })
            .collect();
        ClusterReport { nodes }
    }

    /// 注册端口的轮询解析器，需在 Tokio 运行时内调用。
    pub fn registration_resolver(&self) -> Result<Resolver, ClusterError> {
        self.registry.resolver(RoleProjection::registration())
    }

    /// 发现端口的轮询解析器，需在 Tokio 运行时内调用。
    pub fn discovery_resolver(&self) -> Result<Resolver, ClusterError> {
        self.registry.resolver(RoleProjection::discovery())
    }

    pub fn replication_peers(&self) -> EndpointEvents {
        self.registry.replication_peers()
    }

    /// 成员注册表的只读视图；增删成员只能经由扩缩容完成。
    pub fn registry(&self) -> RegistryView {
        self.registry.view()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// 正在运行的节点数量。
    pub fn size(&self) -> usize {
        self.servers.len()
    }
}

impl<L: PeerLauncher> fmt::Debug for EmbeddedCluster<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedCluster")
            .field("app_name", &self.config.app_name)
            .field("servers", &self.servers.len())
            .field("next_base_port", &self.allocator.next_base())
            .field("registry", &self.registry)
            .finish()
    }
}
