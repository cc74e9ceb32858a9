//! # Resolver：端点事件流到负载均衡选择的适配层
//!
//! ## 核心意图（Why）
//! - 把某个角色的端点事件流持续喂给 [`LoadBalancer`]，并向调用方暴露“给我一个端点”的能力；
//! - 每个解析器拥有独立的订阅与独立的均衡器，多个解析器之间互不干扰。
//!
//! ## 执行逻辑（How）
//! 1. 构造时在当前 Tokio 运行时上派生驱动任务，逐条把事件交给均衡器，并推进 `watch` 中的代次；
//! 2. `pick` 先尝试选择，候选池为空时等待代次变化后重试，因此不会错过任何一次加入；
//! 3. `close` 中止驱动任务（随之释放上游订阅）、关闭均衡器，并通过 `watch` 唤醒所有挂起的 `pick`。
//!
//! ## 风险提示（Trade-offs）
//! - 上游出现 `Modify` 时解析器进入失败态，之后所有选择都返回同一个 [`ClusterError::ModifyNotSupported`]；
//! - 上游流自然结束时解析器保持打开，继续基于最后的候选池服务。

use std::{fmt, sync::Arc};

use futures::{
    Stream, StreamExt,
    stream::{self, BoxStream},
};
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::watch, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::{
    address::Endpoint,
    balancer::{LoadBalancer, RoundRobinBalancer},
    error::ClusterError,
    event::{ChangeEvent, ChangeNotification},
};

/// `resolve` 返回的选择结果流。
///
/// 解析器关闭后流结束；解析器因上游违例失败时先产出一次错误再结束。
pub type ResolveStream = BoxStream<'static, Result<Endpoint, ClusterError>>;

#[derive(Clone, Debug, PartialEq, Eq)]
enum ResolverState {
    /// `generation` 在每次应用事件后加一，用于唤醒等待候选的调用方。
    Open { generation: u64 },
    Closed,
    Failed(ClusterError),
}

struct ResolverShared {
    role: String,
    balancer: Arc<dyn LoadBalancer>,
    state: watch::Sender<ResolverState>,
}

impl ResolverShared {
    fn closed_error(&self) -> ClusterError {
        ClusterError::ResolverClosed {
            role: self.role.clone(),
        }
    }

    /// 当前状态对应的终止错误；打开状态返回 `None`。
    fn terminal_error(&self) -> Option<ClusterError> {
        match &*self.state.borrow() {
            ResolverState::Open { .. } => None,
            ResolverState::Closed => Some(self.closed_error()),
            ResolverState::Failed(err) => Some(err.clone()),
        }
    }

    async fn pick(&self) -> Result<Endpoint, ClusterError> {
        let mut watcher = self.state.subscribe();
        loop {
            let status = watcher.borrow_and_update().clone();
            match status {
                ResolverState::Open { .. } => {}
                ResolverState::Closed => return Err(self.closed_error()),
                ResolverState::Failed(err) => return Err(err),
            }
            if let Some(endpoint) = self.balancer.choose() {
                return Ok(endpoint);
            }
            if watcher.changed().await.is_err() {
                return Err(self.closed_error());
            }
        }
    }

    fn apply(&self, event: ChangeEvent<Endpoint>) {
        self.balancer.on_event(event);
        self.state.send_if_modified(|state| match state {
            ResolverState::Open { generation } => {
                *generation += 1;
                true
            }
            _ => false,
        });
    }

    fn fail(&self, err: ClusterError) {
        error!(
            resolver.role = %self.role,
            error.code = err.code(),
            error.message = %err,
            "upstream invariant violation stopped the resolver"
        );
        self.balancer.shutdown();
        self.state.send_if_modified(|state| match state {
            ResolverState::Open { .. } => {
                *state = ResolverState::Failed(err);
                true
            }
            _ => false,
        });
    }
}

async fn drive<S>(shared: Arc<ResolverShared>, mut events: S)
where
    S: Stream<Item = Result<ChangeEvent<Endpoint>, ClusterError>> + Unpin,
{
    while let Some(item) = events.next().await {
        match item {
            Ok(event) => shared.apply(event),
            Err(err) => {
                shared.fail(err);
                return;
            }
        }
    }
    warn!(resolver.role = %shared.role, "upstream event stream ended");
}

/// 负载均衡解析器。
///
/// # 教案式注释
/// - **契约 (What)**：
///   - `pick` 在候选池为空时挂起，直到出现候选或解析器关闭；
///   - `resolve` 每次调用返回一条新的惰性流，不会与其他调用共享游标；
///   - `close` 幂等，关闭后所有操作返回 [`ClusterError::ResolverClosed`]；
///   - 丢弃解析器等同于调用 `close`。
/// - **前置条件**：必须在 Tokio 运行时上下文内构造。
pub struct Resolver {
    shared: Arc<ResolverShared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Resolver {
    /// 以自定义均衡器构造解析器。
    pub fn new<S>(
        role: impl Into<String>,
        events: S,
        balancer: Arc<dyn LoadBalancer>,
    ) -> Result<Self, ClusterError>
    where
        S: Stream<Item = ChangeEvent<Endpoint>> + Send + Unpin + 'static,
    {
        Self::spawn(role.into(), events.map(Ok), balancer)
    }

    /// 以默认的 [`RoundRobinBalancer`] 构造解析器。
    pub fn round_robin<S>(role: impl Into<String>, events: S) -> Result<Self, ClusterError>
    where
        S: Stream<Item = ChangeEvent<Endpoint>> + Send + Unpin + 'static,
    {
        Self::new(role, events, Arc::new(RoundRobinBalancer::new()))
    }

    /// 以外部通知流构造解析器；通知经严格转换，遇到 `Modify` 时解析器进入失败态。
    pub fn from_notifications<S>(
        role: impl Into<String>,
        notifications: S,
        balancer: Arc<dyn LoadBalancer>,
    ) -> Result<Self, ClusterError>
    where
        S: Stream<Item = ChangeNotification<Endpoint>> + Send + Unpin + 'static,
    {
        let events = notifications.map(ChangeEvent::<Endpoint>::try_from);
        Self::spawn(role.into(), events, balancer)
    }

    fn spawn<S>(
        role: String,
        events: S,
        balancer: Arc<dyn LoadBalancer>,
    ) -> Result<Self, ClusterError>
    where
        S: Stream<Item = Result<ChangeEvent<Endpoint>, ClusterError>> + Send + Unpin + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            return Err(ClusterError::RuntimeUnavailable { role });
        };
        let (state, _) = watch::channel(ResolverState::Open { generation: 0 });
        let shared = Arc::new(ResolverShared {
            role,
            balancer,
            state,
        });
        let driver = runtime.spawn(drive(Arc::clone(&shared), events));
        debug!(resolver.role = %shared.role, "resolver created");
        Ok(Self {
            shared,
            driver: Mutex::new(Some(driver)),
        })
    }

    /// 选出一个端点；候选池为空时等待。
    pub async fn pick(&self) -> Result<Endpoint, ClusterError> {
        self.shared.pick().await
    }

    /// 返回一条新的选择结果流。
    pub fn resolve(&self) -> Result<ResolveStream, ClusterError> {
        if let Some(err) = self.shared.terminal_error() {
            return Err(err);
        }
        let picks = stream::unfold(Some(Arc::clone(&self.shared)), |shared| async move {
            let shared = shared?;
            match shared.pick().await {
                Ok(endpoint) => Some((Ok(endpoint), Some(shared))),
                Err(ClusterError::ResolverClosed { .. }) => None,
                Err(err) => Some((Err(err), None)),
            }
        });
        Ok(picks.boxed())
    }

    /// 关闭解析器，幂等。
    pub fn close(&self) {
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        self.shared.balancer.shutdown();
        let transitioned = self.shared.state.send_if_modified(|state| match state {
            ResolverState::Open { .. } => {
                *state = ResolverState::Closed;
                true
            }
            _ => false,
        });
        if transitioned {
            debug!(resolver.role = %self.shared.role, "resolver closed");
        }
    }

    /// 是否已不再服务（关闭或失败）。
    pub fn is_closed(&self) -> bool {
        self.shared.terminal_error().is_some()
    }

    /// 构造时给出的角色标签。
    pub fn role(&self) -> &str {
        &self.shared.role
    }

    pub fn candidate_count(&self) -> usize {
        self.shared.balancer.candidate_count()
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("role", &self.shared.role)
            .field("state", &*self.shared.state.borrow())
            .field("candidates", &self.shared.balancer.candidate_count())
            .finish()
    }
}
