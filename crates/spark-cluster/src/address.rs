//! 成员地址与角色端点。
//!
//! # 模块定位（Why）
//! - [`PeerAddress`] 描述一个写集群节点对外暴露的三组端口：注册、发现与复制；
//! - [`Endpoint`] 是按 [`NetworkRole`] 投影后的单端口地址，只在事件流经投影时临时生成，不被存储。
//!
//! # 契约说明（What）
//! - 两种类型都不可变，身份即值相等；
//! - 端口使用 `u16`，越界的端口无法被构造出来。

use core::fmt;

/// 节点承担的网络角色，每种角色对应 [`PeerAddress`] 中的一个端口字段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetworkRole {
    /// 客户端注册入口。
    Registration,
    /// 客户端发现入口。
    Discovery,
    /// 节点间复制入口。
    Replication,
}

impl NetworkRole {
    /// 日志与错误中使用的角色名。
    pub const fn as_str(self) -> &'static str {
        match self {
            NetworkRole::Registration => "registration",
            NetworkRole::Discovery => "discovery",
            NetworkRole::Replication => "replication",
        }
    }
}

impl fmt::Display for NetworkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 写集群节点的完整地址记录。
///
/// # 契约说明（What）
/// - `host_name`：节点主机名或 IP 字面量；
/// - `registration_port` / `discovery_port` / `replication_port`：三种角色各自监听的端口；
/// - **后置条件**：创建后不可修改；从注册表移除后，持有者手中的副本依旧是合法的值，但不再参与选择与复制。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    host_name: String,
    registration_port: u16,
    discovery_port: u16,
    replication_port: u16,
}

impl PeerAddress {
    /// 构造新的节点地址。
    pub fn new(
        host_name: impl Into<String>,
        registration_port: u16,
        discovery_port: u16,
        replication_port: u16,
    ) -> Self {
        Self {
            host_name: host_name.into(),
            registration_port,
            discovery_port,
            replication_port,
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn registration_port(&self) -> u16 {
        self.registration_port
    }

    pub fn discovery_port(&self) -> u16 {
        self.discovery_port
    }

    pub fn replication_port(&self) -> u16 {
        self.replication_port
    }

    /// 返回指定角色对应的端口。
    pub fn port_for(&self, role: NetworkRole) -> u16 {
        match role {
            NetworkRole::Registration => self.registration_port,
            NetworkRole::Discovery => self.discovery_port,
            NetworkRole::Replication => self.replication_port,
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[registration={}, discovery={}, replication={}]",
            self.host_name, self.registration_port, self.discovery_port, self.replication_port
        )
    }
}

/// 按角色投影后的单端口地址。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host_name: String,
    port: u16,
}

impl Endpoint {
    /// 构造新的端点。
    pub fn new(host_name: impl Into<String>, port: u16) -> Self {
        Self {
            host_name: host_name.into(),
            port,
        }
    }

    /// 返回主机名。
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// 返回端口号。
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_name, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_for_selects_the_role_field() {
        let addr = PeerAddress::new("localhost", 13001, 13002, 13003);
        assert_eq!(addr.port_for(NetworkRole::Registration), 13001);
        assert_eq!(addr.port_for(NetworkRole::Discovery), 13002);
        assert_eq!(addr.port_for(NetworkRole::Replication), 13003);
    }

    #[test]
    fn display_is_human_readable() {
        let addr = PeerAddress::new("node-a", 1, 2, 3);
        assert_eq!(
            addr.to_string(),
            "node-a[registration=1, discovery=2, replication=3]"
        );
        assert_eq!(Endpoint::new("node-a", 2).to_string(), "node-a:2");
        assert_eq!(NetworkRole::Replication.to_string(), "replication");
    }
}
