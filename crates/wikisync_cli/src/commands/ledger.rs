//! Offline inspection of a ledger carrier.

use std::path::Path;

use clap::Subcommand;
use serde_json::{Map, Value, json};

use wikisync::{Carrier, HashLedger, Namespace};

#[derive(Subcommand)]
pub(crate) enum LedgerAction {
    /// Show the entries stored in a local carrier image
    Inspect {
        /// Path to the carrier PNG (e.g. a downloaded lock file)
        file: std::path::PathBuf,

        /// Print every entry as JSON instead of per-namespace counts
        #[arg(long)]
        json: bool,
    },
}

pub(crate) fn handle_ledger(action: LedgerAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        LedgerAction::Inspect { file, json } => {
            let ledger = load_ledger(&file)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&ledger_json(&ledger))?);
            } else {
                println!("{}", file.display());
                for namespace in Namespace::ALL {
                    println!(
                        "  {:<10} {:>6} entries ({})",
                        namespace.to_string(),
                        ledger.len(namespace),
                        namespace.keyword()
                    );
                }
            }
        }
    }
    Ok(())
}

fn load_ledger(path: &Path) -> Result<HashLedger, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("could not read {}: {e}", path.display()))?;
    Ok(Carrier::load(&bytes)?.extract_ledger()?)
}

/// `{"asset": {"<id>": "<hex>"}, "document": {...}}`
fn ledger_json(ledger: &HashLedger) -> Value {
    let namespace_json = |namespace| {
        ledger
            .iter(namespace)
            .map(|(id, digest)| (id.to_string(), Value::String(digest.to_hex())))
            .collect::<Map<String, Value>>()
    };
    json!({
        "asset": namespace_json(Namespace::Asset),
        "document": namespace_json(Namespace::Document),
    })
}
