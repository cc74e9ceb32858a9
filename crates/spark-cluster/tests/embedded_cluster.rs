//! 嵌入式写集群的扩缩容场景。
//!
//! - **Why**：集群对象负责把节点生命周期、端口分配与成员注册表串起来，需要验证三者步调一致；
//! - **How**：使用记录型启动器保存每个节点收到的参数与复制事件流，测试据此断言端口布局与事件顺序；
//! - **What**：覆盖扩容、缩容、越界下标、启动失败不推进端口以及逆序关停。

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use spark_cluster::{
    ChangeEvent, ClusterConfig, ClusterError, EmbeddedCluster, Endpoint, EndpointEvents, NodeSpec,
    NodeState, PeerLauncher, PortLayout,
};

#[derive(Default)]
struct LauncherLog {
    specs: Vec<NodeSpec>,
    streams: HashMap<usize, EndpointEvents>,
    stopped: Vec<usize>,
    fail_next_launch: bool,
}

#[derive(Clone, Default)]
struct RecordingLauncher {
    log: Arc<Mutex<LauncherLog>>,
}

impl PeerLauncher for RecordingLauncher {
    type Handle = usize;

    fn launch(
        &mut self,
        spec: &NodeSpec,
        replication_peers: EndpointEvents,
    ) -> Result<usize, ClusterError> {
        let mut log = self.log.lock();
        if std::mem::take(&mut log.fail_next_launch) {
            return Err(ClusterError::launcher("launch", "port already bound"));
        }
        let id = log.specs.len();
        log.specs.push(spec.clone());
        log.streams.insert(id, replication_peers);
        Ok(id)
    }

    fn stop(&mut self, handle: &usize) -> Result<(), ClusterError> {
        let mut log = self.log.lock();
        log.stopped.push(*handle);
        log.streams.remove(handle);
        Ok(())
    }

    fn state(&self, handle: &usize) -> NodeState {
        if self.log.lock().stopped.contains(handle) {
            NodeState::Down
        } else {
            NodeState::Up
        }
    }
}

fn drain(log: &Mutex<LauncherLog>, node: usize) -> Vec<ChangeEvent<Endpoint>> {
    let mut log = log.lock();
    let stream = log.streams.get_mut(&node).expect("节点仍在运行");
    let mut events = Vec::new();
    while let Some(Some(event)) = stream.next().now_or_never() {
        events.push(event);
    }
    events
}

fn replication(port: u16) -> Endpoint {
    Endpoint::new("localhost", port)
}

#[test]
fn scale_up_allocates_port_blocks_and_registers_members() {
    let launcher = RecordingLauncher::default();
    let log = Arc::clone(&launcher.log);
    let mut cluster = EmbeddedCluster::with_launcher(launcher);

    assert_eq!(cluster.scale_up(3), Ok(vec![0, 1, 2]));
    assert_eq!(cluster.size(), 3);
    assert_eq!(cluster.registry().len(), 3);

    let specs = log.lock().specs.clone();
    let second = &specs[1];
    assert_eq!(second.app_name, "spark-write");
    assert_eq!(second.vip_address, "spark-write");
    assert_eq!(second.address.registration_port(), 13010);
    assert_eq!(second.address.discovery_port(), 13011);
    assert_eq!(second.address.replication_port(), 13012);
    assert_eq!((second.shutdown_port, second.admin_port), (13013, 13014));
    assert_eq!(second.replication_retry, Duration::from_millis(1000));

    let report = cluster.cluster_report();
    assert_eq!(report.nodes.len(), 3);
    assert_eq!(report.up_count(), 3);
    assert_eq!(report.nodes[2].shutdown_port, 13023);
}

#[test]
fn new_node_sees_existing_peers_then_itself() {
    let launcher = RecordingLauncher::default();
    let log = Arc::clone(&launcher.log);
    let mut cluster = EmbeddedCluster::with_launcher(launcher);
    cluster.scale_up(2).expect("扩容成功");

    assert_eq!(
        drain(&log, 1),
        vec![
            ChangeEvent::Add(replication(13002)),
            ChangeEvent::Add(replication(13012)),
        ]
    );
    assert_eq!(
        drain(&log, 0),
        vec![
            ChangeEvent::Add(replication(13002)),
            ChangeEvent::Add(replication(13012)),
        ]
    );
}

#[test]
fn scale_down_stops_the_node_and_broadcasts_removal() {
    let launcher = RecordingLauncher::default();
    let log = Arc::clone(&launcher.log);
    let mut cluster = EmbeddedCluster::with_launcher(launcher);
    cluster.scale_up(3).expect("扩容成功");
    drain(&log, 0);

    let removed = cluster.scale_down_by_one(1).expect("下标有效");
    assert_eq!(removed.registration_port(), 13010);
    assert_eq!(log.lock().stopped, vec![1]);
    assert_eq!(drain(&log, 0), vec![ChangeEvent::Remove(replication(13012))]);

    let ports: Vec<_> = cluster
        .registry()
        .snapshot()
        .iter()
        .map(|peer| peer.registration_port())
        .collect();
    assert_eq!(ports, vec![13000, 13020]);
    assert_eq!(cluster.cluster_report().nodes[1].index, 1);
}

/// 缩容与再扩容交替后，停止的节点与移除的成员必须始终是同一个。
#[test]
fn interleaved_scaling_keeps_stopped_nodes_out_of_the_membership() {
    let launcher = RecordingLauncher::default();
    let log = Arc::clone(&launcher.log);
    let mut cluster = EmbeddedCluster::with_launcher(launcher);
    assert_eq!(cluster.scale_up_by_one(), Ok(0));
    let mut observer = cluster.replication_peers();

    assert_eq!(cluster.scale_up_by_one(), Ok(1));
    assert_eq!(cluster.scale_down_by_one(0).map(|peer| peer.registration_port()), Ok(13000));
    assert_eq!(cluster.scale_up_by_one(), Ok(1));
    let removed = cluster.scale_down_by_one(1).expect("下标有效");

    let stopped = log.lock().stopped.clone();
    assert_eq!(stopped, vec![0, 2]);
    let stopped_addresses: Vec<_> = {
        let log = log.lock();
        stopped.iter().map(|id| log.specs[*id].address.clone()).collect()
    };
    assert_eq!(removed, stopped_addresses[1], "移除的成员必须是被停止的节点");
    let members = cluster.registry().snapshot();
    assert!(stopped_addresses.iter().all(|peer| !members.contains(peer)));
    assert_eq!(members, vec![log.lock().specs[1].address.clone()]);

    let mut events = Vec::new();
    while let Some(Some(event)) = observer.next().now_or_never() {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            ChangeEvent::Add(replication(13002)),
            ChangeEvent::Add(replication(13012)),
            ChangeEvent::Remove(replication(13002)),
            ChangeEvent::Add(replication(13022)),
            ChangeEvent::Remove(replication(13022)),
        ]
    );
}

#[test]
fn out_of_range_scale_down_is_rejected_without_side_effects() {
    let launcher = RecordingLauncher::default();
    let log = Arc::clone(&launcher.log);
    let mut cluster = EmbeddedCluster::with_launcher(launcher);
    cluster.scale_up_by_one().expect("扩容成功");

    let err = cluster.scale_down_by_one(4).expect_err("越界下标必须失败");
    assert_eq!(err, ClusterError::PeerIndexOutOfRange { index: 4, len: 1 });
    assert!(log.lock().stopped.is_empty());
    assert_eq!(cluster.registry().len(), 1);
}

#[test]
fn failed_launch_does_not_consume_the_port_block() {
    let launcher = RecordingLauncher::default();
    let log = Arc::clone(&launcher.log);
    let mut cluster = EmbeddedCluster::with_launcher(launcher);

    log.lock().fail_next_launch = true;
    let err = cluster.scale_up_by_one().expect_err("启动失败应透传");
    assert_eq!(err.code(), "cluster.launcher_failure");
    assert!(cluster.registry().is_empty());
    assert_eq!(cluster.registry().subscriber_count(), 0, "失败时复制订阅随之释放");

    assert_eq!(cluster.scale_up_by_one(), Ok(0));
    assert_eq!(log.lock().specs[0].address.registration_port(), 13000);
}

#[test]
fn shutdown_stops_nodes_in_reverse_order() {
    let launcher = RecordingLauncher::default();
    let log = Arc::clone(&launcher.log);
    let mut cluster = EmbeddedCluster::with_launcher(launcher);
    cluster.scale_up(3).expect("扩容成功");
    let mut observer = cluster.replication_peers();

    cluster.shutdown().expect("关停成功");
    assert_eq!(log.lock().stopped, vec![2, 1, 0]);
    assert_eq!(cluster.size(), 0);
    assert!(cluster.registry().is_empty());

    let mut events = Vec::new();
    while let Some(Some(event)) = observer.next().now_or_never() {
        events.push(event);
    }
    assert_eq!(
        events[3..],
        [
            ChangeEvent::Remove(replication(13022)),
            ChangeEvent::Remove(replication(13012)),
            ChangeEvent::Remove(replication(13002)),
        ]
    );
}

#[test]
fn custom_configuration_is_validated_and_applied() {
    let config = ClusterConfig {
        app_name: "writes".to_owned(),
        host_name: "10.0.0.7".to_owned(),
        ports: PortLayout {
            base_port: 20000,
            stride: 5,
        },
        replication_retry_ms: 250,
    };
    let launcher = RecordingLauncher::default();
    let log = Arc::clone(&launcher.log);
    let mut cluster = EmbeddedCluster::new(config, launcher).expect("配置合法");
    cluster.scale_up(2).expect("扩容成功");

    let specs = log.lock().specs.clone();
    assert_eq!(specs[1].address.host_name(), "10.0.0.7");
    assert_eq!(specs[1].address.registration_port(), 20005);
    assert_eq!(specs[1].admin_port, 20009);

    let invalid = ClusterConfig {
        ports: PortLayout {
            base_port: 20000,
            stride: 3,
        },
        ..ClusterConfig::default()
    };
    let err = EmbeddedCluster::new(invalid, RecordingLauncher::default())
        .expect_err("步长不足必须拒绝");
    assert_eq!(err.code(), "cluster.invalid_config");
}

#[tokio::test]
async fn role_resolvers_follow_cluster_membership() {
    let mut cluster = EmbeddedCluster::with_launcher(RecordingLauncher::default());
    cluster.scale_up(2).expect("扩容成功");

    let registration = cluster.registration_resolver().expect("运行时可用");
    let discovery = cluster.discovery_resolver().expect("运行时可用");
    assert_eq!(registration.role(), "registration");
    assert_eq!(discovery.pick().await.map(|ep| ep.port()), Ok(13001));
    assert_eq!(registration.pick().await.map(|ep| ep.port()), Ok(13000));
    assert_eq!(registration.pick().await.map(|ep| ep.port()), Ok(13010));
}
