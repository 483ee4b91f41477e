//! TCP bootstrap: listen, accept the expected number of clients, hand them to the scheduler.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::{TcpListener, TcpStream};
use tracing::info;

use crate::config::SchedulerConfig;
use crate::node_table::NodeTable;
use crate::scheduler::Scheduler;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of clients to accept before scheduling starts.
    pub num_clients: usize,
    pub node_table: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
            num_clients: 1,
            node_table: PathBuf::from("eth_scheduler.txt"),
        }
    }
}

pub async fn bind(host: &str, port: u16) -> io::Result<TcpListener> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening for clients");
    Ok(listener)
}

/// Accept exactly `num_clients` connections.
///
/// A failed accept is logged and retried; only the count of successful
/// connections matters.
pub async fn accept_clients(
    listener: &TcpListener,
    num_clients: usize,
    node_table: &NodeTable,
) -> io::Result<Vec<TcpStream>> {
    let mut clients = Vec::with_capacity(num_clients);

    while clients.len() < num_clients {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to accept client connection");
                continue;
            }
        };
        stream.set_nodelay(true)?;

        let known_as = node_table.node_at(&peer.ip().to_string());
        info!(
            client = clients.len(),
            %peer,
            node = ?known_as.map(|n| n.to_string()),
            "Client connected"
        );
        clients.push(stream);
    }

    info!(num_clients, "All clients connected");
    Ok(clients)
}

/// Bootstrap and run the scheduler until a fatal error.
pub async fn serve(config: ServerConfig, scheduler_config: SchedulerConfig) -> anyhow::Result<()> {
    let node_table = NodeTable::load(&config.node_table)?;
    info!(path = %config.node_table.display(), nodes = node_table.len(), "Loaded node table");
    for (node, address) in node_table.iter() {
        tracing::debug!(node = %node, %address, "Node table entry");
    }

    let listener = bind(&config.host, config.port).await?;
    let clients = accept_clients(&listener, config.num_clients, &node_table).await?;
    drop(listener);

    Scheduler::new(scheduler_config, clients)
        .with_node_table(node_table)
        .run()
        .await?;

    Ok(())
}
