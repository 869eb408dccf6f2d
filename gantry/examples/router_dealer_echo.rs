//! ROUTER echo server with a handful of DEALER clients.
//!
//! Run this example:
//! ```bash
//! RUST_LOG=gantry=debug cargo run --example router_dealer_echo
//! ```

use bytes::Bytes;
use gantry::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CLIENTS: usize = 3;
const REQUESTS: usize = 5;

#[compio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let router = RouterSocket::with_options(SocketOptions::default().with_router_mandatory(true))?;
    let endpoint = router.bind("tcp://127.0.0.1:0").await?;
    info!(%endpoint, "ROUTER listening");

    let server = router.clone();
    compio::runtime::spawn(async move {
        while let Ok(msg) = server.recv().await {
            // [identity, payload...]: echo straight back to the sender
            if let Err(e) = server.send(msg).await {
                info!(error = %e, "echo failed");
            }
        }
    })
    .detach();

    let mut clients = Vec::with_capacity(CLIENTS);
    for i in 0..CLIENTS {
        let id = Bytes::from(format!("client-{i}"));
        let dealer = DealerSocket::with_options(SocketOptions::default().with_routing_id(id))?;
        dealer.connect(&endpoint.to_string()).await?;
        clients.push(dealer);
    }
    info!(peers = router.peer_count().await?, "clients connected");

    for (i, dealer) in clients.iter().enumerate() {
        for n in 0..REQUESTS {
            let body = format!("request {n} from client {i}");
            dealer.send(vec![Bytes::new(), Bytes::from(body)]).await?;
        }
    }

    for (i, dealer) in clients.iter().enumerate() {
        for _ in 0..REQUESTS {
            let reply = dealer.recv().await?;
            info!(client = i, reply = %String::from_utf8_lossy(&reply[1]), "echo received");
        }
    }

    // Unknown identity with mandatory delivery on.
    let err = router
        .send(vec![Bytes::from_static(b"nobody"), Bytes::from_static(b"?")])
        .await
        .unwrap_err();
    info!(error = %err, "unroutable send rejected");

    for dealer in &clients {
        dealer.close().await?;
    }
    router.close().await?;
    Ok(())
}
