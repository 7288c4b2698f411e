//! Procedure table and request dispatch.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use zrpc_frame::{CorrelationId, Envelope, WireError};

use crate::builtin::{is_reserved, ProcedureInfo, INSPECT_METHOD, PING_METHOD, PONG};
use crate::config::ServerConfig;
use crate::error::{
    to_wire_error, BoxError, HANDLER_PANICKED, INVALID_ARGUMENTS, METHOD_NOT_FOUND,
};
use crate::multiplexer::Multiplexer;
use crate::reply::ReplySink;

/// Outcome of a procedure handler.
pub type HandlerResult = Result<(), BoxError>;

/// Boxed handler future.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// A remotely callable procedure.
///
/// Implemented for every `Fn(Vec<Value>, ReplySink) -> impl Future` closure
/// or async function, so most code never names this trait.
pub trait Procedure: Send + Sync + 'static {
    fn call(&self, args: Vec<Value>, reply: ReplySink) -> HandlerFuture;
}

impl<F, Fut> Procedure for F
where
    F: Fn(Vec<Value>, ReplySink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, args: Vec<Value>, reply: ReplySink) -> HandlerFuture {
        Box::pin(self(args, reply))
    }
}

struct Registered {
    info: ProcedureInfo,
    handler: Arc<dyn Procedure>,
}

/// Builds a [`Server`]'s procedure table.
#[derive(Default)]
pub struct ServerBuilder {
    procedures: BTreeMap<String, Registered>,
    config: ServerConfig,
}

impl ServerBuilder {
    /// Override server config.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a procedure with its parameter names and doc string.
    ///
    /// Requests must carry exactly `params.len()` arguments.
    pub fn procedure<F, Fut>(self, name: &str, params: &[&str], doc: &str, handler: F) -> Self
    where
        F: Fn(Vec<Value>, ReplySink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(name, params, doc, Arc::new(handler))
    }

    /// Register an already boxed procedure.
    pub fn register(
        mut self,
        name: &str,
        params: &[&str],
        doc: &str,
        handler: Arc<dyn Procedure>,
    ) -> Self {
        if is_reserved(name) {
            warn!(name, "ignoring procedure with reserved name");
            return self;
        }
        let info = ProcedureInfo::new(doc, params);
        if self
            .procedures
            .insert(name.to_string(), Registered { info, handler })
            .is_some()
        {
            debug!(name, "replaced existing procedure");
        }
        self
    }

    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                procedures: self.procedures,
                config: self.config,
            }),
        }
    }
}

struct ServerInner {
    procedures: BTreeMap<String, Registered>,
    config: ServerConfig,
}

/// Immutable procedure table shared by every connection.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Introspection map: registered procedure name to its description.
    pub fn inspect(&self) -> BTreeMap<String, ProcedureInfo> {
        self.inner
            .procedures
            .iter()
            .map(|(name, entry)| (name.clone(), entry.info.clone()))
            .collect()
    }

    /// Dispatch a request that opened a new call on `mux`.
    pub(crate) fn dispatch(&self, mux: &Multiplexer, request: Envelope) {
        let id = request.id;
        let Some(method) = request.event else {
            return;
        };
        debug!(%id, method = %method, "dispatching");

        match method.as_str() {
            INSPECT_METHOD => {
                let result = serde_json::to_value(self.inspect())
                    .map_err(|err| WireError::new(err.to_string()));
                respond(mux, id, result);
                return;
            }
            PING_METHOD => {
                respond(mux, id, Ok(Value::from(PONG)));
                return;
            }
            _ => {}
        }

        let Some(entry) = self.inner.procedures.get(&method) else {
            let error = WireError::named(METHOD_NOT_FOUND, format!("Method not found: {method}"));
            respond(mux, id, Err(error));
            return;
        };

        if request.args.len() != entry.info.arity() {
            debug!(
                %id,
                method = %method,
                expected = entry.info.arity(),
                got = request.args.len(),
                "argument count mismatch"
            );
            let error = WireError::named(INVALID_ARGUMENTS, "Invalid number of arguments");
            respond(mux, id, Err(error));
            return;
        }

        let handler = Arc::clone(&entry.handler);
        let sink = ReplySink::new(id, mux.clone());
        let mux = mux.clone();
        tokio::spawn(async move {
            let task = tokio::spawn(handler.call(request.args, sink.clone()));
            match task.await {
                Ok(Ok(())) => {
                    if sink.has_replied() && mux.finish_if_open(id) {
                        debug!(%id, method = %method, "closed call left open by handler");
                    }
                }
                Ok(Err(err)) => {
                    let error = to_wire_error(err);
                    if !mux.fail_if_open(id, &error) {
                        debug!(%id, method = %method, %error, "handler error after call closed");
                    }
                }
                Err(err) if err.is_panic() => {
                    let message = panic_message(err.into_panic());
                    warn!(%id, method = %method, panic = %message, "handler panicked");
                    mux.fail_if_open(id, &WireError::named(HANDLER_PANICKED, message));
                }
                Err(err) => {
                    debug!(%id, method = %method, error = %err, "handler cancelled");
                }
            }
        });
    }
}

fn respond(mux: &Multiplexer, id: CorrelationId, result: Result<Value, WireError>) {
    let envelope = match result {
        Ok(value) => Envelope::reply(id, value, false),
        Err(error) => Envelope::error(id, &error),
    };
    if let Err(err) = mux.send_reply(id, envelope) {
        debug!(%id, error = %err, "could not respond");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Decode the argument at `index` into `T`.
pub fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, BoxError> {
    let value = args
        .get(index)
        .ok_or_else(|| format!("missing argument {index}"))?;
    T::deserialize(value).map_err(|err| format!("argument {index}: {err}").into())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::ChannelConfig;
    use crate::multiplexer::Role;

    async fn add42(args: Vec<Value>, reply: ReplySink) -> HandlerResult {
        let n: i64 = arg(&args, 0)?;
        reply.finish(n + 42)?;
        Ok(())
    }

    async fn boom(_args: Vec<Value>, _reply: ReplySink) -> HandlerResult {
        panic!("kaboom");
    }

    async fn failing(_args: Vec<Value>, _reply: ReplySink) -> HandlerResult {
        Err("This is an error object, man!".into())
    }

    async fn silent(_args: Vec<Value>, _reply: ReplySink) -> HandlerResult {
        Ok(())
    }

    fn server() -> Server {
        Server::builder()
            .procedure("add42", &["n"], "", add42)
            .procedure("boom", &[], "explodes", boom)
            .procedure("failing", &[], "", failing)
            .procedure("silent", &[], "", silent)
            .procedure("_zpc_hijack", &[], "", silent)
            .build()
    }

    fn call(
        server: &Server,
        method: &str,
        args: Vec<Value>,
    ) -> (Multiplexer, UnboundedReceiver<Envelope>) {
        let (mux, outbound) =
            Multiplexer::new(ChannelConfig::default(), Role::Server, CancellationToken::new());
        let request = Envelope::request(CorrelationId(1), method, args);
        let request = mux.route(request).expect("request opens a call");
        server.dispatch(&mux, request);
        (mux, outbound)
    }

    #[tokio::test]
    async fn dispatches_to_handler() {
        let (_mux, mut outbound) = call(&server(), "add42", vec![json!(30)]);
        let envelope = outbound.recv().await.unwrap();
        assert!(!envelope.has_more());
        assert_eq!(envelope.into_response(), (None, json!(72)));
    }

    #[tokio::test]
    async fn unknown_method_and_bad_arity_fail_fast() {
        let server = server();

        let (_mux, mut outbound) = call(&server, "non_existent", vec![]);
        let (error, _) = outbound.recv().await.unwrap().into_response();
        let error = error.unwrap();
        assert_eq!(error.name.as_deref(), Some(METHOD_NOT_FOUND));
        assert_eq!(error.message, "Method not found: non_existent");

        let (_mux, mut outbound) = call(&server, "add42", vec![]);
        let (error, _) = outbound.recv().await.unwrap().into_response();
        assert_eq!(error.unwrap().message, "Invalid number of arguments");
    }

    #[tokio::test]
    async fn handler_error_and_panic_become_error_terminals() {
        let server = server();

        let (_mux, mut outbound) = call(&server, "failing", vec![]);
        let (error, _) = outbound.recv().await.unwrap().into_response();
        assert_eq!(error.unwrap().message, "This is an error object, man!");

        let (_mux, mut outbound) = call(&server, "boom", vec![]);
        let (error, _) = outbound.recv().await.unwrap().into_response();
        let error = error.unwrap();
        assert_eq!(error.name.as_deref(), Some(HANDLER_PANICKED));
        assert_eq!(error.message, "kaboom");
    }

    #[tokio::test]
    async fn silent_handler_is_closed_once_sink_drops() {
        let (mux, mut outbound) = call(&server(), "silent", vec![]);
        assert_eq!(
            outbound.recv().await.unwrap(),
            Envelope::terminal(CorrelationId(1))
        );
        assert_eq!(mux.open_calls(), 0);
    }

    #[tokio::test]
    async fn builtins_answer_and_are_hidden() {
        let server = server();

        let (_mux, mut outbound) = call(&server, PING_METHOD, vec![]);
        assert_eq!(
            outbound.recv().await.unwrap().into_response(),
            (None, json!("pong"))
        );

        let (_mux, mut outbound) = call(&server, INSPECT_METHOD, vec![]);
        let (error, result) = outbound.recv().await.unwrap().into_response();
        assert!(error.is_none());
        assert_eq!(
            result,
            json!({
                "add42": {"doc": "", "args": [{"name": "n"}]},
                "boom": {"doc": "explodes", "args": []},
                "failing": {"doc": "", "args": []},
                "silent": {"doc": "", "args": []},
            })
        );
    }

    #[test]
    fn arg_reports_position() {
        let args = vec![json!("ten")];
        let err = arg::<i64>(&args, 0).unwrap_err();
        assert!(err.to_string().starts_with("argument 0:"));
        let err = arg::<i64>(&args, 3).unwrap_err();
        assert_eq!(err.to_string(), "missing argument 3");
    }
}
