//! Small demonstration binary: spins up one partition group worker and its
//! timeout timer, runs a handful of session operations against it, and
//! reports the resulting state. Analogous to the teacher's
//! `src/bin/test_server.rs` smoke-test binary.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use txn_core::{ContainerId, GetMode, NullContainerCollaborator, PutParams, TxnMode};
use txn_server::worker::{call, Command};
use txn_server::{PartitionGroupWorker, ServerConfig};

#[derive(Parser, Debug)]
#[command(about = "Transaction session manager demo server")]
struct Args {
    #[arg(long, env = "TXN_NODE_ID", default_value = "demo-node")]
    node_id: String,

    #[arg(long, env = "TXN_PARTITION_COUNT", default_value_t = 4)]
    partition_count: u32,

    #[arg(long, env = "TXN_PARTITION_GROUP_COUNT", default_value_t = 1)]
    partition_group_count: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        node_id: args.node_id,
        partition_count: args.partition_count,
        partition_group_count: args.partition_group_count,
        ..ServerConfig::default()
    };
    info!(node_id = %config.node_id, partitions = config.partition_count, "starting demo server");

    let core_config = config.core_config();
    let collaborator = Arc::new(NullContainerCollaborator);
    let worker = PartitionGroupWorker::spawn(0, core_config, collaborator);
    let sender = worker.sender();

    let client_id = txn_core::ClientId::new_random();
    let session = call(&sender, |reply| Command::Put {
        partition_id: 0,
        params: Box::new(PutParams {
            client_id,
            container_id: ContainerId(1),
            statement_id: 1,
            txn_timeout_interval_requested_sec: 30,
            now: 0,
            em_now: 0,
            get_mode: GetMode::Create,
            txn_mode: TxnMode::NoAutoCommitBegin,
            is_update_stmt: false,
            is_redo: false,
            explicit_txn_id: None,
        }),
        reply,
    })
    .expect("demo put failed");
    info!(%client_id, txn_id = ?session.txn.txn_id(), "session created, transaction begun");

    call(&sender, |reply| Command::Commit {
        partition_id: 0,
        client_id,
        reply,
    })
    .expect("demo commit failed");
    info!(%client_id, "transaction committed");

    std::thread::sleep(Duration::from_millis(50));
    info!("demo server shutting down");
}
