//! Composition root and HTTP/WebSocket surface for the fleet observability
//! service.

pub mod gateway;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod server;
pub mod websocket;

pub use gateway::Gateway;
pub use server::{AppState, Server};

use fleet_common::{Config, Result};

/// Builds every service and wires them into a [`Gateway`].
pub async fn init_gateway(config: Config) -> Result<Gateway> {
    Gateway::new(config).await
}

/// Starts the HTTP server, binding to `gateway`'s configured address.
pub async fn start_server(gateway: Gateway, bind_addr: &str) -> Result<()> {
    let server = Server::new(gateway);
    server.run(bind_addr).await
}
