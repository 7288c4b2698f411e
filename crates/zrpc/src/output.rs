use std::collections::BTreeMap;
use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;
use zrpc_peer::{ProcedureInfo, Reply};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    method: &'a str,
    value: &'a Value,
    more: bool,
}

/// Print one reply of a call. JSON output is one object per line.
pub fn print_reply(method: &str, reply: &Reply, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                method,
                value: &reply.value,
                more: reply.more,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "MORE", "VALUE"])
                .add_row(vec![
                    method.to_string(),
                    reply.more.to_string(),
                    value_preview(&reply.value),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if !(reply.value.is_null() && !reply.more) {
                println!("{}", value_preview(&reply.value));
            }
        }
    }
}

/// Print the introspection result of a server.
pub fn print_procedures(procedures: &BTreeMap<String, ProcedureInfo>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(procedures).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["PROCEDURE", "ARGS", "DOC"]);
            for (name, info) in procedures {
                table.add_row(vec![name.clone(), arg_list(info), info.doc.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (name, info) in procedures {
                if info.doc.is_empty() {
                    println!("{name}({})", arg_list(info));
                } else {
                    println!("{name}({}): {}", arg_list(info), info.doc);
                }
            }
        }
    }
}

fn arg_list(info: &ProcedureInfo) -> String {
    info.args
        .iter()
        .map(|arg| arg.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn value_preview(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
