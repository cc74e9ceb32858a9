//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义成员跟踪、订阅、解析器与嵌入式集群装配过程中的全部失败语义；
//! - 所有失败均属于“调用契约被违反”或“外部协作者报告失败”，核心本身没有 I/O，也没有可重试的瞬时错误。
//!
//! ## 设计要求（What）
//! - 每个变体都拥有稳定错误码（`cluster.*` 命名空间，见 [`codes`]）与 [`ErrorCategory`]；
//! - 错误实现 `Clone + PartialEq`，便于解析器把同一个不变量违例广播给所有挂起的调用方。

use thiserror::Error;

/// 稳定错误码常量。
///
/// 错误码用于日志字段与告警维度，字符串一经发布不得修改。
pub mod codes {
    /// 按位置移除成员时索引越界。
    pub const CLUSTER_PEER_INDEX_OUT_OF_RANGE: &str = "cluster.peer_index_out_of_range";
    /// 上游出现了不受支持的 `Modify` 通知。
    pub const CLUSTER_MODIFY_NOT_SUPPORTED: &str = "cluster.modify_not_supported";
    /// 对已关闭的解析器发起操作。
    pub const CLUSTER_RESOLVER_CLOSED: &str = "cluster.resolver_closed";
    /// 在 Tokio 运行时之外创建解析器。
    pub const CLUSTER_RUNTIME_UNAVAILABLE: &str = "cluster.runtime_unavailable";
    /// 配置非法或无法解析。
    pub const CLUSTER_INVALID_CONFIG: &str = "cluster.invalid_config";
    /// 端口空间耗尽。
    pub const CLUSTER_PORT_SPACE_EXHAUSTED: &str = "cluster.port_space_exhausted";
    /// 服务器下标与注册表位置不再一一对应。
    pub const CLUSTER_MEMBERSHIP_DRIFT: &str = "cluster.membership_drift";
    /// 节点启动器报告失败。
    pub const CLUSTER_LAUNCHER_FAILURE: &str = "cluster.launcher_failure";
}

/// 错误分类，决定调用方应如何对待该错误。
///
/// - `InvariantViolation`：上游生产者或调用方存在缺陷，必须修复代码而非重试；
/// - `UsageError`：调用时机不对（例如解析器已关闭），属于 API 误用；
/// - `Configuration`：配置值非法；
/// - `Collaborator`：外部协作者（节点启动器）失败，是否重试由协作者自行决定。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    InvariantViolation,
    UsageError,
    Configuration,
    Collaborator,
}

/// 集群成员子系统的统一错误域。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - 所有变体均为 `Send + Sync + 'static`，可以跨任务传播；
///   - [`ClusterError::code`] 返回稳定错误码，[`ClusterError::category`] 返回分类；
///   - 携带的上下文均为自有数据，不借用调用方的状态。
/// - **执行逻辑 (How)**：不变量违例在返回前已由产生方以 `error!` 级别记录，调用方无需重复记录。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// 按位置移除成员时索引超出当前成员数量。
    #[error("peer index {index} is out of range for a membership of {len} peers")]
    PeerIndexOutOfRange { index: usize, len: usize },

    /// 上游事件源给出了 `Modify` 通知；成员身份在生命周期内不可变，拒绝任何猜测性翻译。
    #[error("modify notification is not supported for immutable peer `{payload}`")]
    ModifyNotSupported { payload: String },

    /// 解析器已经关闭，无法继续产出选择结果。
    #[error("resolver `{role}` has already been closed")]
    ResolverClosed { role: String },

    /// 解析器需要在 Tokio 运行时中驱动负载均衡器，但当前线程没有运行时。
    #[error("resolver `{role}` must be created inside a Tokio runtime")]
    RuntimeUnavailable { role: String },

    /// 配置无法解析或未通过校验。
    #[error("invalid cluster configuration: {detail}")]
    InvalidConfig { detail: String },

    /// 继续分配端口块会越过 `u16` 上限。
    #[error("port space exhausted: next block would start at {next} with stride {stride}")]
    PortSpaceExhausted { next: u32, stride: u16 },

    /// 集群的服务器下标与注册表中的成员位置对不上，继续操作会停止一个节点却移除另一个成员。
    #[error("node {server_index} (`{peer}`) does not match its membership registry position")]
    MembershipDrift { server_index: usize, peer: String },

    /// 节点启动器在某个阶段报告失败。
    #[error("peer launcher failed during `{stage}`: {detail}")]
    Launcher { stage: &'static str, detail: String },
}

impl ClusterError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ClusterError::PeerIndexOutOfRange { .. } => codes::CLUSTER_PEER_INDEX_OUT_OF_RANGE,
            ClusterError::ModifyNotSupported { .. } => codes::CLUSTER_MODIFY_NOT_SUPPORTED,
            ClusterError::ResolverClosed { .. } => codes::CLUSTER_RESOLVER_CLOSED,
            ClusterError::RuntimeUnavailable { .. } => codes::CLUSTER_RUNTIME_UNAVAILABLE,
            ClusterError::InvalidConfig { .. } => codes::CLUSTER_INVALID_CONFIG,
            ClusterError::PortSpaceExhausted { .. } => codes::CLUSTER_PORT_SPACE_EXHAUSTED,
            ClusterError::MembershipDrift { .. } => codes::CLUSTER_MEMBERSHIP_DRIFT,
            ClusterError::Launcher { .. } => codes::CLUSTER_LAUNCHER_FAILURE,
        }
    }

    /// 返回错误分类。
    pub fn category(&self) -> ErrorCategory {
        match self {
            ClusterError::PeerIndexOutOfRange { .. }
            | ClusterError::ModifyNotSupported { .. }
            | ClusterError::MembershipDrift { .. } => ErrorCategory::InvariantViolation,
            ClusterError::ResolverClosed { .. } | ClusterError::RuntimeUnavailable { .. } => {
                ErrorCategory::UsageError
            }
            ClusterError::InvalidConfig { .. } | ClusterError::PortSpaceExhausted { .. } => {
                ErrorCategory::Configuration
            }
            ClusterError::Launcher { .. } => ErrorCategory::Collaborator,
        }
    }

    /// 是否属于不变量违例（调用方缺陷）。
    pub fn is_invariant_violation(&self) -> bool {
        self.category() == ErrorCategory::InvariantViolation
    }

    /// 便捷构造启动器错误。
    pub fn launcher(stage: &'static str, detail: impl Into<String>) -> Self {
        ClusterError::Launcher {
            stage,
            detail: detail.into(),
        }
    }

    /// 便捷构造配置错误。
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        ClusterError::InvalidConfig {
            detail: detail.into(),
        }
    }
}
