//! Command-line interface.
//!
//! Two modes share one set of flags:
//!
//! ```bash
//! # Stream the mempool into the store and reconcile every new block
//! mempool-observer --ipc-path ~/.ethereum/geth.ipc
//!
//! # Empty an index and exit
//! mempool-observer --flush transactions
//! ```

use clap::Parser;
use std::sync::Arc;
use tracing::info;

use crate::config::ObserverConfig;
use crate::enrich::Enricher;
use crate::error::ObserverResult;
use crate::ipc::IpcConnection;
use crate::node::AlloyNode;
use crate::pipeline::{Pipeline, PipelineSummary};
use crate::reconcile::BlockReconciler;
use crate::store::{open_store, DocumentStore, StoreWriter};

/// Ethereum mempool observer
#[derive(Parser, Debug)]
#[command(name = "mempool-observer")]
#[command(about = "Index pending transactions and measure how many show up in mined blocks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Delete every document from the named index and exit
    #[arg(long, value_name = "INDEX")]
    pub flush: Option<String>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(flatten)]
    pub config: ObserverConfig,
}

/// Execute the selected mode
///
/// # Errors
///
/// Returns an error if:
/// - The configuration is invalid
/// - The store or the node cannot be reached
/// - The pipeline stops on a fatal error
pub async fn run(cli: Cli) -> ObserverResult<()> {
    cli.config.validate()?;
    let store = open_store(&cli.config.store_config()).await?;

    match cli.flush {
        Some(index) => {
            let deleted = flush(store.as_ref(), &index).await?;
            println!("Removed {} documents from {}", deleted, index);
        }
        None => {
            let summary = stream(&cli.config, store).await?;
            println!(
                "Observed {} pending transactions, indexed {}, reconciled {} blocks",
                summary.pending_seen, summary.records_indexed, summary.blocks_reconciled
            );
        }
    }
    Ok(())
}

/// Remove every document from an index
pub async fn flush(store: &dyn DocumentStore, index: &str) -> ObserverResult<u64> {
    info!("Flushing the index: {}", index);
    Ok(store.flush(index).await?)
}

/// Connect to the node and run the pipeline until Ctrl-C or a fatal error
pub async fn stream(config: &ObserverConfig, store: Arc<dyn DocumentStore>) -> ObserverResult<PipelineSummary> {
    info!("Streaming mempool over IPC socket: {}", config.ipc_path);

    let provider = IpcConnection::new(config.ipc_config()).connect_with_retries().await?;
    let node = Arc::new(AlloyNode::new(provider, config.node_timeout()));

    let pipeline = Pipeline::new(
        node.clone(),
        Enricher::new(node.clone()),
        StoreWriter::new(store.clone(), config.on_store_unreachable),
        BlockReconciler::new(store, node, config.check_receipts),
        config.pipeline_config(),
    );

    let shutdown = pipeline.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            shutdown.cancel();
        }
    });

    pipeline.run().await
}
