//! 成员变更事件。
//!
//! # 设计背景（Why）
//! - 成员身份在生命周期内不可变：先加入，最终离开，没有原地更新；
//! - 因此 [`ChangeEvent`] 只有 `Add` 与 `Remove` 两个变体，“修改”在类型层面不可表达。
//!
//! # 协议互操作（How）
//! - 通用服务发现协议通常带有 `Add / Modify / Delete` 三种通知，[`ChangeNotification`] 承载这种外部形态；
//! - 外部通知只能经 [`TryFrom`] 转换为 [`ChangeEvent`]，遇到 `Modify` 立即返回
//!   [`ClusterError::ModifyNotSupported`]，不做任何猜测性翻译。

use core::fmt;

use crate::error::ClusterError;

/// 事件种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Add,
    Remove,
}

impl ChangeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Remove => "remove",
        }
    }
}

/// 成员变更事件，负载为 [`PeerAddress`](crate::PeerAddress) 或其投影出的 [`Endpoint`](crate::Endpoint)。
///
/// # 契约说明（What）
/// - `Remove` 携带的负载与对应 `Add` 时传入的值完全相同，而非重新合成；
/// - 同一注册表的所有订阅者以相同的相对顺序观察到事件。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChangeEvent<T> {
    Add(T),
    Remove(T),
}

impl<T> ChangeEvent<T> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Add(_) => ChangeKind::Add,
            ChangeEvent::Remove(_) => ChangeKind::Remove,
        }
    }

    pub fn payload(&self) -> &T {
        match self {
            ChangeEvent::Add(payload) | ChangeEvent::Remove(payload) => payload,
        }
    }

    pub fn into_payload(self) -> T {
        match self {
            ChangeEvent::Add(payload) | ChangeEvent::Remove(payload) => payload,
        }
    }

    /// 保持事件种类不变，转换负载。
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ChangeEvent<U> {
        match self {
            ChangeEvent::Add(payload) => ChangeEvent::Add(f(payload)),
            ChangeEvent::Remove(payload) => ChangeEvent::Remove(f(payload)),
        }
    }

    /// 借用负载并转换，常用于投影。
    pub fn map_ref<U>(&self, f: impl FnOnce(&T) -> U) -> ChangeEvent<U> {
        match self {
            ChangeEvent::Add(payload) => ChangeEvent::Add(f(payload)),
            ChangeEvent::Remove(payload) => ChangeEvent::Remove(f(payload)),
        }
    }
}

impl<T: fmt::Display> fmt::Display for ChangeEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind().as_str(), self.payload())
    }
}

/// 外部服务发现协议的通知种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Add,
    Modify,
    Delete,
}

/// 外部形态的变更通知。
///
/// - 仅用于与携带 `Modify` 语义的事件源对接；
/// - 进入本子系统前必须经 `ChangeEvent::try_from` 严格转换。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeNotification<T> {
    kind: NotificationKind,
    data: T,
}

impl<T> ChangeNotification<T> {
    pub fn new(kind: NotificationKind, data: T) -> Self {
        Self { kind, data }
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    pub fn data(&self) -> &T {
        &self.data
    }
}

impl<T: fmt::Debug> TryFrom<ChangeNotification<T>> for ChangeEvent<T> {
    type Error = ClusterError;

    fn try_from(notification: ChangeNotification<T>) -> Result<Self, Self::Error> {
        match notification.kind {
            NotificationKind::Add => Ok(ChangeEvent::Add(notification.data)),
            NotificationKind::Delete => Ok(ChangeEvent::Remove(notification.data)),
            NotificationKind::Modify => {
                let err = ClusterError::ModifyNotSupported {
                    payload: format!("{:?}", notification.data),
                };
                tracing::error!(
                    error.code = err.code(),
                    payload = ?notification.data,
                    "modify notification observed for an immutable peer"
                );
                Err(err)
            }
        }
    }
}

impl<T> From<ChangeEvent<T>> for ChangeNotification<T> {
    fn from(event: ChangeEvent<T>) -> Self {
        match event {
            ChangeEvent::Add(data) => ChangeNotification::new(NotificationKind::Add, data),
            ChangeEvent::Remove(data) => ChangeNotification::new(NotificationKind::Delete, data),
        }
    }
}
