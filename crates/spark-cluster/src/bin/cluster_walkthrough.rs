//! 嵌入式写集群演示：扩容三个节点、轮询解析注册端口、缩容一个节点并观察复制链路收到的事件。
//!
//! # 使用方法
//! ```bash
//! RUST_LOG=debug cargo run --bin cluster-walkthrough -- [cluster.toml]
//! ```
//! - `cluster.toml`：可选，[`ClusterConfig`] 的 TOML 表达；缺省使用内置默认值。
//!
//! # 设计要点（Why）
//! - 节点以 Tokio 任务模拟，每个任务持续消费自己的复制事件流并记录日志；
//! - 演示全程只通过 `tracing` 输出，日志级别由 `RUST_LOG` 控制。

use std::{env, fs};

use futures::StreamExt;
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::info;

use spark_cluster::{
    ClusterConfig, ClusterError, EmbeddedCluster, EndpointEvents, NodeSpec, NodeState,
    PeerLauncher, install_tracing,
};

fn main() {
    if let Err(error) = run() {
        eprintln!("集群演示失败: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    install_tracing().map_err(|error| format!("安装日志失败: {error}"))?;

    let config = match env::args().nth(1) {
        Some(path) => {
            let raw = fs::read_to_string(&path)
                .map_err(|error| format!("读取 {path} 失败: {error}"))?;
            ClusterConfig::from_toml_str(&raw).map_err(|error| error.to_string())?
        }
        None => ClusterConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .map_err(|error| format!("创建运行时失败: {error}"))?;
    runtime
        .block_on(walkthrough(config))
        .map_err(|error| format!("[{}] {error}", error.code()))
}

async fn walkthrough(config: ClusterConfig) -> Result<(), ClusterError> {
    let launcher = TaskLauncher {
        runtime: Handle::current(),
    };
    let mut cluster = EmbeddedCluster::new(config, launcher)?;
    cluster.scale_up(3)?;

    let resolver = cluster.registration_resolver()?;
    for _ in 0..4 {
        let endpoint = resolver.pick().await?;
        info!(endpoint = %endpoint, "registration endpoint resolved");
    }

    let removed = cluster.scale_down_by_one(1)?;
    info!(peer = %removed, "peer removed from the cluster");
    // 让节点任务消费完积压的复制事件。
    tokio::task::yield_now().await;

    for node in cluster.cluster_report().nodes {
        info!(
            node.index = node.index,
            node.address = %node.address,
            node.state = ?node.state,
            "cluster report"
        );
    }

    resolver.close();
    cluster.shutdown()
}

/// 以 Tokio 任务模拟节点进程。
struct TaskLauncher {
    runtime: Handle,
}

impl PeerLauncher for TaskLauncher {
    type Handle = JoinHandle<()>;

    fn launch(
        &mut self,
        spec: &NodeSpec,
        mut replication_peers: EndpointEvents,
    ) -> Result<Self::Handle, ClusterError> {
        let node = spec.address.to_string();
        Ok(self.runtime.spawn(async move {
            while let Some(event) = replication_peers.next().await {
                info!(node = %node, replication.event = %event, "replication peer update");
            }
        }))
    }

    fn stop(&mut self, handle: &Self::Handle) -> Result<(), ClusterError> {
        handle.abort();
        Ok(())
    }

    fn state(&self, handle: &Self::Handle) -> NodeState {
        if handle.is_finished() {
            NodeState::Down
        } else {
            NodeState::Up
        }
    }
}
