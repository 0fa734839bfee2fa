use std::io::{self, BufRead, Write};

use shipledger_cli::Session;
use shipledger_infra::{InMemoryLedgerStore, LedgerConfig};

fn main() -> anyhow::Result<()> {
    shipledger_observability::init();

    let config = LedgerConfig::from_env();
    tracing::info!(
        owner_key = %config.owner_key,
        rule_match = ?config.rule_match,
        "starting ledger session over in-memory store"
    );
    let session = Session::new(InMemoryLedgerStore::new(), config);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in stdin.lock().lines() {
        let line = line?;
        if let Some(response) = session.handle_line(&line) {
            serde_json::to_writer(&mut out, &response)?;
            writeln!(out)?;
            out.flush()?;
        }
    }
    Ok(())
}
