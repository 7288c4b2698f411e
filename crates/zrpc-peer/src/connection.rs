//! Connection driver: one reader task and one writer task per socket.

use std::collections::HashSet;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, warn};
use zrpc_frame::{CorrelationId, Envelope, EnvelopeCodec, FrameConfig, FrameError, WireError};

use crate::error::RpcError;
use crate::multiplexer::Multiplexer;

/// Error name used when an envelope exceeds the payload limit.
pub const PAYLOAD_TOO_LARGE: &str = "PayloadTooLarge";

const MIN_TICK: Duration = Duration::from_millis(1);

type EnvelopeSink<T> = SplitSink<Framed<T, EnvelopeCodec>, Envelope>;
type EnvelopeSource<T> = SplitStream<Framed<T, EnvelopeCodec>>;

/// Drive a connection until it closes or the multiplexer's token is cancelled.
///
/// `on_request` receives every envelope that opened a new server call.
pub(crate) async fn run_connection<T, F>(
    io: T,
    peer: String,
    mux: Multiplexer,
    outbound: UnboundedReceiver<Envelope>,
    mut on_request: F,
) where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    F: FnMut(Envelope) + Send,
{
    let codec = EnvelopeCodec::with_config(FrameConfig {
        max_payload_size: mux.config().max_payload_size,
    });
    let (sink, source) = Framed::new(io, codec).split();

    let writer = tokio::spawn(write_loop(sink, outbound, mux.clone()));
    read_loop(source, &peer, &mux, &mut on_request).await;

    mux.token().cancel();
    if let Err(err) = writer.await {
        warn!(peer = %peer, error = %err, "writer task failed");
    }
    debug!(peer = %peer, "connection closed");
}

async fn read_loop<T, F>(
    mut source: EnvelopeSource<T>,
    peer: &str,
    mux: &Multiplexer,
    on_request: &mut F,
) where
    T: AsyncRead + AsyncWrite,
    F: FnMut(Envelope),
{
    let token = mux.token();
    let mut ticker = interval(mux.config().heartbeat_tick.max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => mux.expire(Instant::now()),
            next = source.next() => match next {
                Some(Ok(envelope)) => {
                    if let Some(request) = mux.route(envelope) {
                        on_request(request);
                    }
                }
                Some(Err(err)) => {
                    warn!(peer = %peer, error = %err, "dropping connection after read error");
                    mux.fail_all(&err.to_string());
                    break;
                }
                None => {
                    debug!(peer = %peer, "peer closed the connection");
                    mux.fail_all("connection closed by peer");
                    break;
                }
            },
        }
    }
}

async fn write_loop<T>(
    mut sink: EnvelopeSink<T>,
    mut outbound: UnboundedReceiver<Envelope>,
    mux: Multiplexer,
) where
    T: AsyncRead + AsyncWrite,
{
    let token = mux.token();
    // Server calls already ended by a PayloadTooLarge terminal.
    let mut truncated: HashSet<CorrelationId> = HashSet::new();
    loop {
        let envelope = tokio::select! {
            _ = token.cancelled() => break,
            next = outbound.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let id = envelope.id;
        let is_request = envelope.is_request();
        if !is_request && truncated.contains(&id) {
            debug!(%id, "dropping reply queued after error terminal");
            continue;
        }
        match sink.send(envelope).await {
            Ok(()) => {}
            Err(err @ FrameError::PayloadTooLarge { .. }) => {
                warn!(%id, error = %err, "refusing oversized envelope");
                let error = WireError::named(PAYLOAD_TOO_LARGE, err.to_string());
                if is_request {
                    mux.reject_call(id, RpcError::Remote(error));
                    continue;
                }
                mux.close_call(id);
                truncated.insert(id);
                if let Err(err) = sink.send(Envelope::error(id, &error)).await {
                    mux.fail_all(&err.to_string());
                    break;
                }
            }
            Err(err) => {
                warn!(%id, error = %err, "write failed");
                mux.fail_all(&err.to_string());
                break;
            }
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_util::codec::FramedRead;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::ChannelConfig;
    use crate::error::ReplyError;
    use crate::multiplexer::{Delivery, Role};

    #[tokio::test]
    async fn routes_responses_to_client_calls() {
        let (local, remote) = tokio::io::duplex(4096);
        let (mux, outbound) =
            Multiplexer::new(ChannelConfig::default(), Role::Client, CancellationToken::new());
        let driver = tokio::spawn(run_connection(
            local,
            "test".to_string(),
            mux.clone(),
            outbound,
            |_| {},
        ));

        let (id, mut rx) = mux.open_call("add42", vec![json!(30)]);
        let mut remote = Framed::new(remote, EnvelopeCodec::new());
        let request = remote.next().await.unwrap().unwrap();
        assert_eq!(request.id, id);
        assert_eq!(request.event.as_deref(), Some("add42"));

        remote
            .send(Envelope::reply(id, json!(72), false))
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            Delivery::Envelope(envelope) => assert_eq!(envelope.args, vec![json!(null), json!(72)]),
            Delivery::Failed(err) => panic!("unexpected failure: {err}"),
        }

        mux.shutdown();
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn peer_hangup_fails_open_calls() {
        let (local, remote) = tokio::io::duplex(4096);
        let (mux, outbound) =
            Multiplexer::new(ChannelConfig::default(), Role::Client, CancellationToken::new());
        let (_, mut rx) = mux.open_call("quiet", vec![]);
        drop(remote);

        run_connection(local, "test".to_string(), mux.clone(), outbound, |_| {}).await;
        assert!(matches!(
            rx.recv().await.unwrap(),
            Delivery::Failed(RpcError::Connection(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_tick_expires_silent_call() {
        let (local, _remote) = tokio::io::duplex(4096);
        let timeout = Duration::from_millis(100);
        let (mux, outbound) = Multiplexer::new(
            ChannelConfig::with_heartbeat(timeout),
            Role::Client,
            CancellationToken::new(),
        );
        let driver = tokio::spawn(run_connection(
            local,
            "test".to_string(),
            mux.clone(),
            outbound,
            |_| {},
        ));

        let started = Instant::now();
        let (_, mut rx) = mux.open_call("quiet", vec![]);
        match rx.recv().await.unwrap() {
            Delivery::Failed(err) => assert_eq!(err, RpcError::TimeoutExpired(timeout)),
            Delivery::Envelope(envelope) => panic!("unexpected envelope: {envelope:?}"),
        }
        assert!(started.elapsed() > timeout);
        assert_eq!(mux.open_calls(), 0);

        mux.shutdown();
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_reply_becomes_error_terminal() {
        let (local, remote) = tokio::io::duplex(4096);
        let config = ChannelConfig {
            max_payload_size: 160,
            ..ChannelConfig::default()
        };
        let (mux, outbound) = Multiplexer::new(config, Role::Server, CancellationToken::new());
        let id = CorrelationId(1);
        mux.route(Envelope::request(id, "big", vec![]));
        mux.send_reply(id, Envelope::reply(id, json!("x".repeat(400)), false))
            .unwrap();

        let driver = tokio::spawn(run_connection(
            local,
            "test".to_string(),
            mux.clone(),
            outbound,
            |_| {},
        ));

        let mut remote = FramedRead::new(remote, EnvelopeCodec::new());
        let (error, _) = remote.next().await.unwrap().unwrap().into_response();
        assert_eq!(error.unwrap().name.as_deref(), Some(PAYLOAD_TOO_LARGE));

        mux.shutdown();
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_stream_reply_closes_call() {
        let (local, remote) = tokio::io::duplex(4096);
        let config = ChannelConfig {
            max_payload_size: 160,
            ..ChannelConfig::default()
        };
        let (mux, outbound) = Multiplexer::new(config, Role::Server, CancellationToken::new());
        let id = CorrelationId(1);
        mux.route(Envelope::request(id, "big", vec![]));
        mux.send_reply(id, Envelope::reply(id, json!("x".repeat(400)), true))
            .unwrap();
        mux.send_reply(id, Envelope::reply(id, json!("queued"), true))
            .unwrap();

        let driver = tokio::spawn(run_connection(
            local,
            "test".to_string(),
            mux.clone(),
            outbound,
            |_| {},
        ));

        let mut remote = FramedRead::new(remote, EnvelopeCodec::new());
        let first = remote.next().await.unwrap().unwrap();
        assert_eq!(first.id, id);
        assert!(!first.has_more());
        assert!(!mux.is_open(id));
        assert_eq!(
            mux.send_reply(id, Envelope::reply(id, json!("after"), true)),
            Err(ReplyError::Closed(id))
        );

        let other = CorrelationId(2);
        assert!(mux.route(Envelope::request(other, "small", vec![])).is_some());
        mux.send_reply(other, Envelope::reply(other, json!("ok"), false))
            .unwrap();
        let next = remote.next().await.unwrap().unwrap();
        assert_eq!(next.id, other);
        assert_eq!(next.args, vec![json!(null), json!("ok")]);

        mux.shutdown();
        driver.await.unwrap();
    }
}
