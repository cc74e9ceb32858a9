//! 负载均衡能力接口与默认轮询实现。
//!
//! # 设计背景（Why）
//! - 解析器只负责把端点事件喂给均衡器并向调用方交付选择结果，选择策略本身通过 [`LoadBalancer`] 注入；
//! - 默认提供 [`RoundRobinBalancer`]，覆盖写集群“按成员轮询”的常见诉求。
//!
//! # 契约说明（What）
//! - 候选池是多重集合：同一端点被 `Add` 两次就出现两次，每个 `Remove` 只移除一个匹配项；
//! - `shutdown` 之后 `choose` 永远返回 `None`，后续事件被忽略。

use std::fmt;

use parking_lot::Mutex;

use crate::{address::Endpoint, event::ChangeEvent};

/// 负载均衡器接口。
///
/// # 教案式注释
/// - **意图 (Why)**：把“维护候选池”与“选择一个候选”封装在同一对象内，解析器的驱动任务与调用方
///   可以在不同线程上并发访问；
/// - **契约 (What)**：
///   - `on_event` 按事件到达顺序调用，实现需保证应用顺序与调用顺序一致；
///   - `choose` 在候选池为空或已关闭时返回 `None`，不得阻塞；
///   - `shutdown` 幂等；
/// - **风险提示 (Trade-offs)**：实现内部若持有锁，`choose` 与 `on_event` 的临界区应保持在纯内存操作范围内。
pub trait LoadBalancer: Send + Sync + 'static {
    /// 应用一条端点变更。
    fn on_event(&self, event: ChangeEvent<Endpoint>);

    /// 选出一个候选端点。
    fn choose(&self) -> Option<Endpoint>;

    /// 当前候选数量。
    fn candidate_count(&self) -> usize;

    /// 关闭均衡器，释放候选池。
    fn shutdown(&self);
}

#[derive(Default)]
struct RoundRobinState {
    pool: Vec<Endpoint>,
    cursor: usize,
    shut_down: bool,
}

/// 轮询负载均衡器。
///
/// 候选按加入顺序排列，游标在每次成功选择后前进一位；移除发生在游标之前时游标随之回退，
/// 以保持剩余候选的轮转次序。
#[derive(Default)]
pub struct RoundRobinBalancer {
    state: Mutex<RoundRobinState>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否已关闭。
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn on_event(&self, event: ChangeEvent<Endpoint>) {
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }
        match event {
            ChangeEvent::Add(endpoint) => state.pool.push(endpoint),
            ChangeEvent::Remove(endpoint) => {
                let Some(position) = state.pool.iter().position(|candidate| *candidate == endpoint)
                else {
                    // 未知端点的移除不影响候选池。
                    tracing::trace!(endpoint = %endpoint, "remove for unknown endpoint ignored");
                    return;
                };
                state.pool.remove(position);
                if position < state.cursor {
                    state.cursor -= 1;
                }
                if state.cursor >= state.pool.len() {
                    state.cursor = 0;
                }
            }
        }
    }

    fn choose(&self) -> Option<Endpoint> {
        let mut state = self.state.lock();
        if state.shut_down || state.pool.is_empty() {
            return None;
        }
        let index = state.cursor % state.pool.len();
        state.cursor = (index + 1) % state.pool.len();
        Some(state.pool[index].clone())
    }

    fn candidate_count(&self) -> usize {
        let state = self.state.lock();
        if state.shut_down { 0 } else { state.pool.len() }
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shut_down = true;
        state.pool.clear();
        state.cursor = 0;
    }
}

impl fmt::Debug for RoundRobinBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RoundRobinBalancer")
            .field("candidates", &state.pool.len())
            .field("cursor", &state.cursor)
            .field("shut_down", &state.shut_down)
            .finish()
    }
}
