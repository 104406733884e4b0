//! Save-and-Restore Admin Tool
//!
//! Opens a file-backed store, makes sure the root folder exists and prints
//! the node tree with each node's type and id.
//!
//! # Usage
//!
//! ```bash
//! # Use ./saverestore-data
//! cargo run --bin saverestore-admin
//!
//! # Point at another store and show debug logs
//! SAVERESTORE_DATA_DIR=/var/lib/saverestore RUST_LOG=saverestore_core=debug \
//!     cargo run --bin saverestore-admin
//! ```
//!
//! An optional first argument is a tree path (`/Top/Cfg`); only the subtree
//! below the nodes at that path is printed.

use saverestore_core::db::FileDocumentStore;
use saverestore_core::services::TreeDao;
use saverestore_core::{Node, StoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_DATA_DIR: &str = "./saverestore-data";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = StoreConfig::from_env();
    let data_dir = config
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    println!("Opening store in {}", data_dir.display());
    let store = Arc::new(FileDocumentStore::open(&data_dir).await?);
    let dao = TreeDao::new(store, config)?;

    let starts = match std::env::args().nth(1) {
        Some(path) => dao.get_from_path(&path).await?,
        None => vec![dao.get_root_node().await?],
    };

    for start in starts {
        println!("{}", dao.get_full_path(&start.unique_id).await?);
        print_subtree(&dao, start).await?;
    }
    Ok(())
}

/// Print `start` and everything below it, one indented line per node
async fn print_subtree(dao: &TreeDao, start: Node) -> anyhow::Result<()> {
    let mut stack = vec![(start, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        println!(
            "{}{} [{}] {}",
            "  ".repeat(depth),
            node.name,
            node.node_type,
            node.unique_id
        );
        let mut children = dao.get_child_nodes(&node.unique_id).await?;
        children.sort_by(|a, b| b.name.cmp(&a.name));
        stack.extend(children.into_iter().map(|c| (c, depth + 1)));
    }
    Ok(())
}
