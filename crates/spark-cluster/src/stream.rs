//! 重放 + 实时尾部的订阅流。
//!
//! # 模块定位（Why）
//! - 每个订阅者拥有独立游标：先消费订阅瞬间捕获的快照（全部为 `Add`），再消费订阅之后的实时事件；
//! - 快照与实时通道由 [`PeerRegistry::subscribe`](crate::PeerRegistry::subscribe) 在同一临界区内建立，
//!   因此本模块只需按顺序拼接两段，不需要去重。
//!
//! # 队列观测（How）
//! - 每条订阅附带 [`SubscriptionProbe`]，通过原子计数给出已发布、已投递与积压深度，
//!   用于在不阻塞生产者的前提下发现慢消费者。

use std::{
    collections::VecDeque,
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{address::PeerAddress, event::ChangeEvent, registry::RegistryState};

/// 单条订阅的实时尾部计数器。
#[derive(Debug, Default)]
pub(crate) struct QueueCounters {
    published: AtomicU64,
    delivered: AtomicU64,
}

impl QueueCounters {
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::AcqRel);
    }

    fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::AcqRel);
    }
}

/// 订阅队列的观测快照。
///
/// # 契约说明（What）
/// - `published`：订阅建立后投递到该订阅实时通道的事件数（不含重放）；
/// - `delivered`：消费者已取走的实时事件数；
/// - `depth`：尚未被取走的实时事件数，读取存在瞬时偏差时按饱和减法给出近似值。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionQueueSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub depth: u64,
}

/// 订阅队列探针，可跨线程克隆并高频查询。
#[derive(Clone, Debug)]
pub struct SubscriptionProbe {
    counters: Arc<QueueCounters>,
}

impl SubscriptionProbe {
    /// 返回最新已知的队列状态；订阅结束后保持最后一次的值。
    pub fn snapshot(&self) -> SubscriptionQueueSnapshot {
        let delivered = self.counters.delivered.load(Ordering::Acquire);
        let published = self.counters.published.load(Ordering::Acquire);
        SubscriptionQueueSnapshot {
            published,
            delivered,
            depth: published.saturating_sub(delivered),
        }
    }
}

/// 成员事件订阅流。
///
/// # 教案式注释
/// - **契约 (What)**：
///   - 先按注册表顺序产出订阅瞬间每个存活成员的 `Add`，随后按注册表的发出顺序产出实时事件；
///   - 序列不可重启，需要新的重放请再次订阅；
///   - 注册表全部句柄释放后，流在交付完已缓冲事件后结束。
/// - **取消 (How)**：[`MembershipStream::cancel`] 立即停止交付（包括已缓冲的事件）并从注册表解除登记；
///   直接丢弃流具有相同的解除效果。
pub struct MembershipStream {
    id: u64,
    replay: VecDeque<ChangeEvent<PeerAddress>>,
    live: mpsc::UnboundedReceiver<ChangeEvent<PeerAddress>>,
    counters: Arc<QueueCounters>,
    registry: Weak<Mutex<RegistryState>>,
    cancelled: bool,
}

impl MembershipStream {
    pub(crate) fn compose(
        id: u64,
        replay: VecDeque<ChangeEvent<PeerAddress>>,
        live: mpsc::UnboundedReceiver<ChangeEvent<PeerAddress>>,
        counters: Arc<QueueCounters>,
        registry: Weak<Mutex<RegistryState>>,
    ) -> Self {
        Self {
            id,
            replay,
            live,
            counters,
            registry,
            cancelled: false,
        }
    }

    /// 注册表分配的订阅编号。
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 尚未交付的重放事件数量。
    pub fn replay_remaining(&self) -> usize {
        self.replay.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// 返回该订阅的队列探针。
    pub fn probe(&self) -> SubscriptionProbe {
        SubscriptionProbe {
            counters: Arc::clone(&self.counters),
        }
    }

    /// 取消订阅，幂等。
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.replay.clear();
        self.live.close();
        self.detach();
    }

    fn detach(&self) {
        if let Some(state) = self.registry.upgrade() {
            state.lock().detach(self.id);
        }
    }
}

impl Stream for MembershipStream {
    type Item = ChangeEvent<PeerAddress>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled {
            return Poll::Ready(None);
        }
        if let Some(event) = this.replay.pop_front() {
            return Poll::Ready(Some(event));
        }
        match this.live.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                this.counters.record_delivered();
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.cancelled {
            (0, Some(0))
        } else {
            (self.replay.len(), None)
        }
    }
}

impl Drop for MembershipStream {
    fn drop(&mut self) {
        if !self.cancelled {
            self.detach();
        }
    }
}

impl std::fmt::Debug for MembershipStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipStream")
            .field("id", &self.id)
            .field("replay_remaining", &self.replay.len())
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
