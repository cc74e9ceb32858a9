//! 嵌入式集群配置与端口分配。
//!
//! # 设计背景（Why）
//! - 每个节点占用一段连续端口块：注册 +0、发现 +1、复制 +2、关停 +3、管理 +4；
//! - 端口块从 `base_port` 起按 `stride` 递增，配置以 TOML 给出，缺省值可直接用于本机演示。
//!
//! # 契约说明（What）
//! - 未知字段会被拒绝，解析或校验失败统一映射为 [`ClusterError::InvalidConfig`]；
//! - 端口空间耗尽返回 [`ClusterError::PortSpaceExhausted`]，绝不回绕。

use std::time::Duration;

use serde::Deserialize;

use crate::{address::PeerAddress, error::ClusterError};

/// 单个端口块内需要的端口数量。
pub const PORTS_PER_NODE: u16 = 5;

const REGISTRATION_OFFSET: u16 = 0;
const DISCOVERY_OFFSET: u16 = 1;
const REPLICATION_OFFSET: u16 = 2;
const SHUTDOWN_OFFSET: u16 = 3;
const ADMIN_OFFSET: u16 = 4;

/// 端口布局。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortLayout {
    pub base_port: u16,
    pub stride: u16,
}

impl Default for PortLayout {
    fn default() -> Self {
        Self {
            base_port: 13000,
            stride: 10,
        }
    }
}

/// 嵌入式集群配置。
///
/// ```toml
/// app_name = "spark-write"
/// host_name = "localhost"
/// replication_retry_ms = 1000
///
/// [ports]
/// base_port = 13000
/// stride = 10
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub app_name: String,
    pub host_name: String,
    pub ports: PortLayout,
    pub replication_retry_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            app_name: "spark-write".to_owned(),
            host_name: "localhost".to_owned(),
            ports: PortLayout::default(),
            replication_retry_ms: 1000,
        }
    }
}

impl ClusterConfig {
    /// 解析并校验 TOML 文本。
    pub fn from_toml_str(raw: &str) -> Result<Self, ClusterError> {
        let config: Self = toml::from_str(raw)
            .map_err(|err| ClusterError::invalid_config(format!("failed to parse toml: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验配置取值。
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.app_name.trim().is_empty() {
            return Err(ClusterError::invalid_config("app_name must not be empty"));
        }
        if self.host_name.trim().is_empty() {
            return Err(ClusterError::invalid_config("host_name must not be empty"));
        }
        if self.ports.base_port == 0 {
            return Err(ClusterError::invalid_config("ports.base_port must be positive"));
        }
        if self.ports.stride < PORTS_PER_NODE {
            return Err(ClusterError::invalid_config(format!(
                "ports.stride must be at least {PORTS_PER_NODE}, got {}",
                self.ports.stride
            )));
        }
        Ok(())
    }

    pub fn replication_retry(&self) -> Duration {
        Duration::from_millis(self.replication_retry_ms)
    }
}

/// 单个节点分得的端口块。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodePorts {
    pub registration: u16,
    pub discovery: u16,
    pub replication: u16,
    pub shutdown: u16,
    pub admin: u16,
}

impl NodePorts {
    /// 以三组角色端口组装节点地址。
    pub fn peer_address(&self, host_name: impl Into<String>) -> PeerAddress {
        PeerAddress::new(host_name, self.registration, self.discovery, self.replication)
    }
}

/// 顺序端口分配器。
///
/// `peek` 只计算下一个端口块，`commit` 才推进游标，节点启动失败时端口块可被复用。
#[derive(Clone, Debug)]
pub struct PortAllocator {
    layout: PortLayout,
    cursor: u32,
}

impl PortAllocator {
    pub fn new(layout: PortLayout) -> Self {
        Self {
            layout,
            cursor: u32::from(layout.base_port),
        }
    }

    /// 计算下一个端口块而不推进游标。
    pub fn peek(&self) -> Result<NodePorts, ClusterError> {
        let exhausted = || ClusterError::PortSpaceExhausted {
            next: self.cursor,
            stride: self.layout.stride,
        };
        let last = self.cursor + u32::from(ADMIN_OFFSET);
        if last > u32::from(u16::MAX) {
            return Err(exhausted());
        }
        let base = u16::try_from(self.cursor).map_err(|_| exhausted())?;
        Ok(NodePorts {
            registration: base + REGISTRATION_OFFSET,
            discovery: base + DISCOVERY_OFFSET,
            replication: base + REPLICATION_OFFSET,
            shutdown: base + SHUTDOWN_OFFSET,
            admin: base + ADMIN_OFFSET,
        })
    }

    /// 确认当前端口块已被占用，游标前进一个步长。
    pub fn commit(&mut self) {
        self.cursor += u32::from(self.layout.stride);
    }

    /// 下一个端口块的起始端口（可能已越界）。
    pub fn next_base(&self) -> u32 {
        self.cursor
    }
}
