//! Streaming client: prints each reply of a call as it arrives.
//!
//! Start `stream-server` first, then run:
//!   cargo run --example stream-client

use futures_util::StreamExt;
use serde_json::json;
use zrpc::peer::{Client, ClientConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::connect("tcp://127.0.0.1:4242", ClientConfig::default())?;

    for (name, info) in client.inspect().await? {
        eprintln!("{name}: {}", info.doc);
    }

    let mut replies = client.invoke("countdown", vec![json!(3)]);
    while let Some(reply) = replies.next().await {
        let reply = reply?;
        println!("{} (more: {})", reply.value, reply.more);
    }

    client.close();
    Ok(())
}
