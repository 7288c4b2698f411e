//! End-to-end call semantics over a real TCP connection.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use zrpc_peer::{
    arg, CancellationToken, ChannelConfig, Client, ClientConfig, HandlerResult, ReplyError,
    ReplySink, Reply, RpcError, Server, ServerConfig, INSPECT_METHOD, INVALID_ARGUMENTS,
    METHOD_NOT_FOUND,
};
use zrpc_transport::{Address, RpcListener};

const HEARTBEAT: Duration = Duration::from_millis(300);

async fn add_man(args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    let sentence: String = arg(&args, 0)?;
    reply.finish(format!("{sentence}, man!"))?;
    Ok(())
}

async fn add42(args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    let n: i64 = arg(&args, 0)?;
    reply.finish(n + 42)?;
    Ok(())
}

async fn iter(args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    let from: i64 = arg(&args, 0)?;
    let to: i64 = arg(&args, 1)?;
    let step: i64 = arg(&args, 2)?;
    let mut i = from;
    while i < to {
        reply.send(i)?;
        i += step;
    }
    reply.finish(Value::Null)?;
    Ok(())
}

async fn lazy_iter(args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    let from: i64 = arg(&args, 0)?;
    let to: i64 = arg(&args, 1)?;
    let step: i64 = arg(&args, 2)?;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(10));
        let mut counter = from;
        loop {
            ticker.tick().await;
            let sent = if counter < to {
                reply.send(counter)
            } else {
                reply.finish(Value::Null)
            };
            if sent.is_err() || counter >= to {
                break;
            }
            counter += step;
        }
    });
    Ok(())
}

async fn simple_error(_args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    reply.fail("This is an error, man!")?;
    Ok(())
}

async fn object_error(_args: Vec<Value>, _reply: ReplySink) -> HandlerResult {
    Err(std::io::Error::new(std::io::ErrorKind::Other, "This is an error object, man!").into())
}

async fn stream_error(_args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    reply.fail("This is a stream error, man!")?;
    match reply.send("Should not happen") {
        Err(ReplyError::Closed(_)) => Ok(()),
        other => Err(format!("expected a closed call, got {other:?}").into()),
    }
}

async fn quiet(_args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(31)).await;
        let _ = reply.finish("Should not happen");
    });
    Ok(())
}

async fn reply_partial(_args: Vec<Value>, reply: ReplySink) -> HandlerResult {
    reply.reply(1, true)?;
    reply.send(2)?;
    Ok(())
}

fn channel() -> ChannelConfig {
    ChannelConfig::with_heartbeat(HEARTBEAT)
}

async fn start() -> (String, CancellationToken) {
    let server = Server::builder()
        .config(ServerConfig { channel: channel() })
        .procedure("addMan", &["sentence"], "", add_man)
        .procedure("add42", &["n"], "", add42)
        .procedure("iter", &["from", "to", "step"], "", iter)
        .procedure("lazyIter", &["from", "to", "step"], "", lazy_iter)
        .procedure("simpleError", &[], "", simple_error)
        .procedure("objectError", &[], "", object_error)
        .procedure("streamError", &[], "", stream_error)
        .procedure("quiet", &[], "", quiet)
        .procedure("replyPartial", &[], "", reply_partial)
        .build();

    let listener = RpcListener::bind(&Address::tcp("127.0.0.1", 0))
        .await
        .expect("listener should bind");
    let address = listener.local_address().to_string();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move { server.serve(listener, token).await });
    (address, shutdown)
}

fn client(address: &str) -> Client {
    let config = ClientConfig {
        channel: channel(),
        ..ClientConfig::default()
    };
    Client::connect(address, config).expect("client should start")
}

async fn collect(client: &Client, method: &str, args: Vec<Value>) -> Vec<Result<Reply, RpcError>> {
    client.invoke(method, args).collect().await
}

fn reply(value: Value, more: bool) -> Result<Reply, RpcError> {
    Ok(Reply { value, more })
}

#[tokio::test]
async fn normal_string_method() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    assert_eq!(
        collect(&client, "addMan", vec![json!("This is not an error")]).await,
        vec![reply(json!("This is not an error, man!"), false)]
    );
}

#[tokio::test]
async fn normal_int_method() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    assert_eq!(client.call("add42", vec![json!(30)]).await, Ok(json!(72)));
}

#[tokio::test]
async fn stream_method() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    let mut expected: Vec<_> = (10..20).step_by(2).map(|i| reply(json!(i), true)).collect();
    expected.push(reply(Value::Null, false));
    assert_eq!(
        collect(&client, "iter", vec![json!(10), json!(20), json!(2)]).await,
        expected
    );
}

#[tokio::test]
async fn simple_error_is_terminal() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    let replies = collect(&client, "simpleError", vec![]).await;
    assert_eq!(replies.len(), 1);
    let err = replies[0].clone().unwrap_err();
    assert_eq!(err.message(), "This is an error, man!");
}

#[tokio::test]
async fn object_error_is_terminal() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    let err = client.call("objectError", vec![]).await.unwrap_err();
    assert_eq!(err.message(), "This is an error object, man!");
}

#[tokio::test]
async fn stream_error_rejects_later_replies() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    let replies = collect(&client, "streamError", vec![]).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(
        replies[0].clone().unwrap_err().message(),
        "This is a stream error, man!"
    );
}

#[tokio::test]
async fn close_during_lazy_stream() {
    let (address, _shutdown) = start().await;
    let closing = client(&address);
    let mut stream = closing.invoke("lazyIter", vec![json!(30), json!(40), json!(1)]);

    assert_eq!(stream.recv().await, Some(reply(json!(30), true)));
    closing.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stream.recv().await, None);
}

#[tokio::test]
async fn closing_one_stream_leaves_others_running() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    let mut closed = client.invoke("lazyIter", vec![json!(30), json!(40), json!(1)]);
    let open = client.invoke("lazyIter", vec![json!(0), json!(3), json!(1)]);

    assert_eq!(closed.recv().await, Some(reply(json!(30), true)));
    closed.close();
    assert_eq!(closed.recv().await, None);

    let replies: Vec<_> = open.collect().await;
    assert_eq!(
        replies,
        vec![
            reply(json!(0), true),
            reply(json!(1), true),
            reply(json!(2), true),
            reply(Value::Null, false),
        ]
    );

    // The server keeps streaming the closed call; the client drops those frames.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(closed.recv().await, None);
    assert!(!client.is_closed());
    assert_eq!(client.call("add42", vec![json!(1)]).await, Ok(json!(43)));
}

#[tokio::test]
async fn partial_reply_is_closed_by_dispatcher() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    assert_eq!(
        collect(&client, "replyPartial", vec![]).await,
        vec![
            reply(json!(1), true),
            reply(json!(2), true),
            reply(Value::Null, false),
        ]
    );
}

#[tokio::test]
async fn introspection() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    let procedures = client.inspect().await.unwrap();

    assert_eq!(procedures.len(), 9);
    assert!(procedures.values().all(|info| info.doc.is_empty()));
    assert!(procedures["objectError"].args.is_empty());
    assert_eq!(procedures["add42"].args.len(), 1);
    assert_eq!(procedures["add42"].args[0].name, "n");
    assert!(!procedures.contains_key(INSPECT_METHOD));

    let raw = collect(&client, INSPECT_METHOD, vec![]).await;
    assert_eq!(raw.len(), 1);
    assert!(!raw[0].as_ref().unwrap().more);
}

#[tokio::test]
async fn incorrect_argument_count() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    let err = client.call("lazyIter", vec![]).await.unwrap_err();
    assert_eq!(err.message(), "Invalid number of arguments");
    assert_eq!(err.name(), INVALID_ARGUMENTS);
}

#[tokio::test]
async fn non_existent_method() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    let replies = collect(&client, "non_existent", vec![]).await;
    assert_eq!(replies.len(), 1);
    let err = replies[0].clone().unwrap_err();
    assert_eq!(err.name(), METHOD_NOT_FOUND);
    assert_eq!(err.message(), "Method not found: non_existent");
}

#[tokio::test]
async fn quiet_call_times_out() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    let replies = collect(&client, "quiet", vec![]).await;
    assert_eq!(replies.len(), 1);
    let err = replies[0].clone().unwrap_err();
    assert_eq!(err.name(), "TimeoutExpired");
    assert_eq!(err, RpcError::TimeoutExpired(HEARTBEAT));
}

#[tokio::test]
async fn bad_client_gets_connection_error() {
    // Bind then drop to find a port nobody listens on.
    let port = {
        let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        unused.local_addr().unwrap().port()
    };
    let client = client(&format!("tcp://127.0.0.1:{port}"));
    let replies = collect(&client, "add42", vec![json!(30)]).await;
    assert_eq!(replies.len(), 1);
    assert!(matches!(replies[0], Err(RpcError::Connection(_))));

    // Later calls fail straight away.
    assert!(matches!(
        client.call("add42", vec![json!(30)]).await,
        Err(RpcError::Connection(_))
    ));
}

#[tokio::test]
async fn ping_round_trips() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    assert!(client.ping().await.is_ok());
}

#[tokio::test]
async fn concurrent_calls_share_a_connection() {
    let (address, _shutdown) = start().await;
    let client = client(&address);
    let (streamed, single) = tokio::join!(
        collect(&client, "iter", vec![json!(0), json!(3), json!(1)]),
        client.call("add42", vec![json!(0)]),
    );
    assert_eq!(streamed.len(), 4);
    assert_eq!(single, Ok(json!(42)));
}
