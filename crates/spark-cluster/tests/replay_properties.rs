//! 重放 + 实时尾部的性质验证。
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：对任意 `Add / Remove / Subscribe` 操作序列，验证每个订阅者观察到的序列恰好等于
//!   “订阅瞬间的成员快照（全部为 `Add`）+ 之后的全部变更”，既无重复也无遗漏；
//! - **设计手法 (How)**：以 `Vec<PeerAddress>` 作为影子模型，逐步执行随机操作并记录每个订阅者的期望序列，
//!   最后在不等待的前提下排空各订阅流并逐一比对；
//! - **合同与边界 (What)**：`Remove` 的下标由随机种子对当前成员数取模得到，成员为空时跳过，
//!   因此生成的序列总是合法调用。

use futures::{FutureExt, StreamExt};
use proptest::prelude::*;
use spark_cluster::{ChangeEvent, MembershipStream, PeerAddress, PeerRegistry};

#[derive(Clone, Debug)]
enum Op {
    Add,
    Remove(usize),
    Subscribe,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Add),
        2 => any::<usize>().prop_map(Op::Remove),
        1 => Just(Op::Subscribe),
    ]
}

fn drain(stream: &mut MembershipStream) -> Vec<ChangeEvent<PeerAddress>> {
    let mut events = Vec::new();
    while let Some(Some(event)) = stream.next().now_or_never() {
        events.push(event);
    }
    events
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_subscribers_see_snapshot_then_every_later_change(ops in prop::collection::vec(op(), 0..64)) {
        let registry = PeerRegistry::new();
        let mut model: Vec<PeerAddress> = Vec::new();
        let mut subscribers: Vec<(MembershipStream, Vec<ChangeEvent<PeerAddress>>)> = Vec::new();
        let mut next_port: u16 = 10_000;

        for op in ops {
            match op {
                Op::Add => {
                    let address =
                        PeerAddress::new("localhost", next_port, next_port + 1, next_port + 2);
                    next_port += 10;
                    let index = registry.add(address.clone());
                    prop_assert_eq!(index, model.len());
                    model.push(address.clone());
                    for (_, expected) in &mut subscribers {
                        expected.push(ChangeEvent::Add(address.clone()));
                    }
                }
                Op::Remove(seed) => {
                    if model.is_empty() {
                        continue;
                    }
                    let index = seed % model.len();
                    let removed = registry.remove(index).expect("模型保证下标合法");
                    let expected_value = model.remove(index);
                    prop_assert_eq!(&removed, &expected_value);
                    for (_, expected) in &mut subscribers {
                        expected.push(ChangeEvent::Remove(expected_value.clone()));
                    }
                }
                Op::Subscribe => {
                    let replay = model.iter().cloned().map(ChangeEvent::Add).collect();
                    subscribers.push((registry.subscribe(), replay));
                }
            }
        }

        prop_assert_eq!(registry.snapshot(), model);
        for (mut stream, expected) in subscribers {
            prop_assert_eq!(drain(&mut stream), expected);
        }
    }

    #[test]
    fn prop_late_subscriber_replay_has_no_duplicates(adds in 0usize..16, removes in 0usize..16) {
        let registry = PeerRegistry::new();
        for offset in 0..adds {
            let base = 20_000 + (offset as u16) * 10;
            registry.add(PeerAddress::new("localhost", base, base + 1, base + 2));
        }
        for _ in 0..removes.min(adds) {
            registry.remove(0).expect("仍有成员");
        }

        let mut stream = registry.subscribe();
        let replay = drain(&mut stream);
        prop_assert_eq!(replay.len(), adds - removes.min(adds));
        prop_assert!(replay.iter().all(|event| matches!(event, ChangeEvent::Add(_))));
        let expected: Vec<_> = registry.snapshot().into_iter().map(ChangeEvent::Add).collect();
        prop_assert_eq!(replay, expected);
    }
}
