//! Streaming server: counts down with one reply per tick.
//!
//! Run with:
//!   cargo run --example stream-server
//!
//! In another terminal:
//!   cargo run --features cli -- call tcp://127.0.0.1:4242 countdown 5

use std::time::Duration;

use serde_json::Value;
use zrpc::peer::{arg, CancellationToken, HandlerResult, ReplySink, Server};

async fn countdown(args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    let from: u64 = arg(&args, 0)?;
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    for n in (1..=from).rev() {
        ticker.tick().await;
        reply.send(n)?;
    }
    reply.finish("liftoff")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::builder()
        .procedure("countdown", &["from"], "Count down to liftoff.", countdown)
        .build();

    let shutdown = CancellationToken::new();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        stop.cancel();
    });

    eprintln!("Listening on tcp://127.0.0.1:4242");
    server.bind_and_serve("tcp://127.0.0.1:4242", shutdown).await?;
    Ok(())
}
