//! Line-oriented driver for the ledger dispatcher.
//!
//! Each input line is a JSON array whose first element is the operation name
//! and whose remaining elements are its string arguments:
//!
//! ```text
//! ["setAsset", "Account", "{\"AccountId\":\"A1\",\"Balance\":100}"]
//! ["updateOrderStatus", "O1", "Shipped"]
//! ```
//!
//! Each non-blank line produces one JSON response line: `{"ok": <result>}` on
//! success, `{"error": <kind>, "message": <text>}` on failure. History results
//! are embedded as JSON; every other result is rendered as a string, so stored
//! bytes come back exactly as they were written.

use anyhow::{Context, bail};
use serde_json::{Value as JsonValue, json};
use tracing::debug;

use shipledger_infra::{Dispatcher, LedgerConfig, LedgerError, LedgerStore, Operation};

pub struct Session<S> {
    dispatcher: Dispatcher<S>,
}

impl<S: LedgerStore> Session<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(store, config),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    /// Handle one input line. Blank lines and `#` comments produce nothing.
    pub fn handle_line(&self, line: &str) -> Option<JsonValue> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let response = match parse_invocation(line) {
            Ok((operation, args)) => {
                debug!(%operation, args = args.len(), "invocation");
                let op = operation.parse::<Operation>().ok();
                match self.dispatcher.invoke(&operation, &args) {
                    Ok(bytes) => json!({ "ok": render_result(op, &bytes) }),
                    Err(err) => err.to_json(),
                }
            }
            Err(err) => LedgerError::validation(format!("{err:#}")).to_json(),
        };
        Some(response)
    }
}

/// Split a JSON array line into operation name and arguments.
pub fn parse_invocation(line: &str) -> anyhow::Result<(String, Vec<String>)> {
    let value: JsonValue = serde_json::from_str(line).context("invocation is not valid JSON")?;
    let Some(items) = value.as_array() else {
        bail!("invocation must be a JSON array");
    };
    let mut strings = items.iter().enumerate().map(|(i, item)| match item {
        JsonValue::String(s) => Ok(s.clone()),
        // Let callers inline payloads without escaping them.
        JsonValue::Object(_) | JsonValue::Array(_) if i > 0 => Ok(item.to_string()),
        other => Err(anyhow::anyhow!("element {i} must be a string, got {other}")),
    });

    let operation = strings
        .next()
        .context("invocation must name an operation")??;
    let args = strings.collect::<anyhow::Result<Vec<_>>>()?;
    Ok((operation, args))
}

/// Result bytes of `op` as JSON. Only history is JSON by construction.
pub fn render_result(op: Option<Operation>, bytes: &[u8]) -> JsonValue {
    if bytes.is_empty() {
        return JsonValue::Null;
    }
    let text = || JsonValue::String(String::from_utf8_lossy(bytes).into_owned());
    match op {
        Some(Operation::HistoryOf) => serde_json::from_slice(bytes).unwrap_or_else(|_| text()),
        _ => text(),
    }
}
