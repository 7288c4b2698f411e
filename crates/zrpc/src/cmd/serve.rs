use std::time::Duration;

use serde_json::Value;
use tracing::info;
use zrpc_peer::{arg, CancellationToken, HandlerResult, ReplySink, Server, ServerConfig};

use crate::cmd::{channel_config, runtime, ServeArgs};
use crate::exit::{peer_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: ServeArgs, heartbeat: &str) -> CliResult<i32> {
    let server = demo_server(ServerConfig {
        channel: channel_config(heartbeat)?,
    });

    let shutdown = CancellationToken::new();
    install_ctrlc_handler(shutdown.clone())?;

    runtime()?.block_on(async {
        server
            .bind_and_serve(&args.address, shutdown)
            .await
            .map_err(|err| peer_error("serve failed", err))
    })?;

    info!("server stopped");
    Ok(SUCCESS)
}

pub(crate) fn demo_server(config: ServerConfig) -> Server {
    Server::builder()
        .config(config)
        .procedure("echo", &["value"], "Return the value unchanged.", echo)
        .procedure("add", &["a", "b"], "Add two numbers.", add)
        .procedure(
            "range",
            &["from", "to", "step"],
            "Stream integers from `from` (inclusive) to `to` (exclusive).",
            range,
        )
        .procedure(
            "sleep",
            &["ms"],
            "Wait for `ms` milliseconds, then reply.",
            sleep,
        )
        .build()
}

async fn echo(mut args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    reply.finish(args.pop().unwrap_or(Value::Null))?;
    Ok(())
}

async fn add(args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    let a: f64 = arg(&args, 0)?;
    let b: f64 = arg(&args, 1)?;
    let sum = a + b;
    if sum.fract() == 0.0 && sum.abs() < i64::MAX as f64 {
        reply.finish(sum as i64)?;
    } else {
        reply.finish(sum)?;
    }
    Ok(())
}

async fn range(args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    let from: i64 = arg(&args, 0)?;
    let to: i64 = arg(&args, 1)?;
    let step: i64 = arg(&args, 2)?;
    if step <= 0 {
        return Err("step must be positive".into());
    }

    let mut i = from;
    while i < to {
        reply.send(i)?;
        i += step;
    }
    reply.finish(Value::Null)?;
    Ok(())
}

async fn sleep(args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    let ms: u64 = arg(&args, 0)?;
    tokio::time::sleep(Duration::from_millis(ms)).await;
    reply.finish(format!("slept {ms}ms"))?;
    Ok(())
}

fn install_ctrlc_handler(shutdown: CancellationToken) -> CliResult<()> {
    ctrlc::set_handler(move || {
        shutdown.cancel();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
