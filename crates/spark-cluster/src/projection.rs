//! 角色端口投影。
//!
//! # 设计背景（Why）
//! - 同一个 [`PeerAddress`] 在注册、发现、复制三种角色下暴露不同端口；
//! - 端口选择以显式策略值 [`RoleProjection`] 传入，避免在各个调用点散落 `match`。
//!
//! # 契约说明（What）
//! - 投影保持事件种类与相对顺序，负载替换为 `{host_name, project(address)}`；
//! - 投影绝不合成 `Modify`；外部通知中的 `Modify` 经 [`RoleProjection::project_notification`] 直接报错。

use std::{
    borrow::Cow,
    fmt,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{Stream, StreamExt};

use crate::{
    address::{Endpoint, NetworkRole, PeerAddress},
    error::ClusterError,
    event::{ChangeEvent, ChangeNotification},
    stream::MembershipStream,
};

/// 自定义端口选择函数。
pub type PortSelectorFn = dyn Fn(&PeerAddress) -> u16 + Send + Sync;

#[derive(Clone)]
enum PortSelector {
    Role(NetworkRole),
    Custom(Arc<PortSelectorFn>),
}

/// 端口投影策略。
///
/// - 内置角色通过枚举分派，零分配；
/// - [`RoleProjection::custom`] 接受任意纯函数，调用方需保证同一输入总是得到同一端口。
#[derive(Clone)]
pub struct RoleProjection {
    label: Cow<'static, str>,
    selector: PortSelector,
}

impl RoleProjection {
    /// 按内置角色投影。
    pub const fn for_role(role: NetworkRole) -> Self {
        Self {
            label: Cow::Borrowed(role.as_str()),
            selector: PortSelector::Role(role),
        }
    }

    pub const fn registration() -> Self {
        Self::for_role(NetworkRole::Registration)
    }

    pub const fn discovery() -> Self {
        Self::for_role(NetworkRole::Discovery)
    }

    pub const fn replication() -> Self {
        Self::for_role(NetworkRole::Replication)
    }

    /// 使用自定义选择函数构造投影，`label` 用于日志与错误上下文。
    pub fn custom(
        label: impl Into<Cow<'static, str>>,
        select: impl Fn(&PeerAddress) -> u16 + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            selector: PortSelector::Custom(Arc::new(select)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 内置角色；自定义投影返回 `None`。
    pub fn role(&self) -> Option<NetworkRole> {
        match self.selector {
            PortSelector::Role(role) => Some(role),
            PortSelector::Custom(_) => None,
        }
    }

    /// 投影单个地址。
    pub fn project(&self, address: &PeerAddress) -> Endpoint {
        let port = match &self.selector {
            PortSelector::Role(role) => address.port_for(*role),
            PortSelector::Custom(select) => select(address),
        };
        Endpoint::new(address.host_name(), port)
    }

    /// 投影单个事件，保持事件种类。
    pub fn project_event(&self, event: &ChangeEvent<PeerAddress>) -> ChangeEvent<Endpoint> {
        event.map_ref(|address| self.project(address))
    }

    /// 严格投影外部通知，`Modify` 返回 [`ClusterError::ModifyNotSupported`]。
    pub fn project_notification(
        &self,
        notification: ChangeNotification<PeerAddress>,
    ) -> Result<ChangeEvent<Endpoint>, ClusterError> {
        let event = ChangeEvent::try_from(notification)?;
        Ok(self.project_event(&event))
    }

    /// 把成员事件流投影为端点事件流。
    pub fn project_stream<S>(self, upstream: S) -> ProjectedStream<S>
    where
        S: Stream<Item = ChangeEvent<PeerAddress>> + Unpin,
    {
        ProjectedStream {
            upstream,
            projection: self,
        }
    }
}

impl fmt::Debug for RoleProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.selector {
            PortSelector::Role(_) => "role",
            PortSelector::Custom(_) => "custom",
        };
        f.debug_struct("RoleProjection")
            .field("label", &self.label)
            .field("selector", &kind)
            .finish()
    }
}

/// 投影后的端点事件流。
pub struct ProjectedStream<S> {
    upstream: S,
    projection: RoleProjection,
}

impl<S> ProjectedStream<S> {
    pub fn projection(&self) -> &RoleProjection {
        &self.projection
    }

    /// 取回上游流，例如为了取消订阅。
    pub fn into_inner(self) -> S {
        self.upstream
    }

    pub fn upstream_mut(&mut self) -> &mut S {
        &mut self.upstream
    }
}

impl<S> Stream for ProjectedStream<S>
where
    S: Stream<Item = ChangeEvent<PeerAddress>> + Unpin,
{
    type Item = ChangeEvent<Endpoint>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.upstream
            .poll_next_unpin(cx)
            .map(|event| event.map(|event| this.projection.project_event(&event)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.upstream.size_hint()
    }
}

impl<S> fmt::Debug for ProjectedStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectedStream")
            .field("projection", &self.projection)
            .finish()
    }
}

/// 注册表订阅经角色投影后的端点事件流。
pub type EndpointEvents = ProjectedStream<MembershipStream>;
