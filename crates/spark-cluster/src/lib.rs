//! # spark-cluster
//!
//! ## 定位与职责（Why）
//! - 跟踪写集群的成员拓扑：节点加入与离开构成一条有序的变更历史；
//! - 任何订阅者都能先看到“当前存活成员”的重放，再无缝接续实时变更，不重复也不遗漏；
//! - 同一份成员视图按角色（注册、发现、复制）投影为端点，并驱动负载均衡解析器。
//!
//! ## 架构嵌入（Where）
//! - [`registry`]：有序成员序列与订阅者扇出；
//! - [`stream`]：重放 + 实时尾部的订阅流与队列探针；
//! - [`projection`]、[`balancer`]、[`resolver`]：角色投影与负载均衡选择；
//! - [`cluster`]、[`config`]：嵌入式写集群装配与端口规划；
//! - [`observability`]：供宿主调用的日志安装入口。
//!
//! ## 使用示例
//! ```
//! use futures::{StreamExt, executor::block_on};
//! use spark_cluster::{ChangeEvent, Endpoint, PeerAddress, PeerRegistry, RoleProjection};
//!
//! let registry = PeerRegistry::new();
//! registry.add(PeerAddress::new("localhost", 13000, 13001, 13002));
//!
//! let mut peers = RoleProjection::replication().project_stream(registry.subscribe());
//! let first = block_on(peers.next());
//! assert_eq!(first, Some(ChangeEvent::Add(Endpoint::new("localhost", 13002))));
//! ```

/// 成员地址、角色端点与网络角色。
pub mod address;

/// 嵌入式写集群装配。
///
/// - **意图说明 (Why)**：在单进程内扩缩节点，并让节点与客户端共享同一份成员视图；
/// - **契约定位 (What)**：节点生命周期通过 [`cluster::PeerLauncher`] 注入。
pub mod cluster;

pub mod balancer;
pub mod config;
pub mod error;
pub mod event;
pub mod observability;
pub mod projection;
pub mod registry;
pub mod resolver;
pub mod stream;

pub use address::{Endpoint, NetworkRole, PeerAddress};
pub use balancer::{LoadBalancer, RoundRobinBalancer};
pub use cluster::{ClusterReport, EmbeddedCluster, NodeReport, NodeSpec, NodeState, PeerLauncher};
pub use config::{ClusterConfig, NodePorts, PortAllocator, PortLayout};
pub use error::{ClusterError, ErrorCategory};
pub use event::{ChangeEvent, ChangeKind, ChangeNotification, NotificationKind};
pub use observability::{TelemetryError, install_tracing};
pub use projection::{EndpointEvents, ProjectedStream, RoleProjection};
pub use registry::{PeerRegistry, RegistryView};
pub use resolver::{ResolveStream, Resolver};
pub use stream::{MembershipStream, SubscriptionProbe, SubscriptionQueueSnapshot};
