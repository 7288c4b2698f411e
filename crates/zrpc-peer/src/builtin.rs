use serde::{Deserialize, Serialize};

/// Reserved procedure: list registered procedures.
pub const INSPECT_METHOD: &str = "_zpc_inspect";
/// Reserved procedure: liveness probe.
pub const PING_METHOD: &str = "_zpc_ping";
/// Reply to [`PING_METHOD`].
pub const PONG: &str = "pong";

const RESERVED_PREFIX: &str = "_zpc_";

/// Whether a procedure name belongs to the reserved built-in namespace.
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// One entry of the introspection result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcedureInfo {
    pub doc: String,
    pub args: Vec<ArgInfo>,
}

/// A declared procedure parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArgInfo {
    pub name: String,
}

impl ProcedureInfo {
    pub fn new(doc: impl Into<String>, params: &[&str]) -> Self {
        Self {
            doc: doc.into(),
            args: params
                .iter()
                .map(|name| ArgInfo {
                    name: (*name).to_string(),
                })
                .collect(),
        }
    }

    /// Declared parameter count.
    pub fn arity(&self) -> usize {
        self.args.len()
    }
}
