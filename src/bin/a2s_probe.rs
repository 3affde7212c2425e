//! Probe one game server and print what it reports.
//!
//! Usage:
//!   cargo run --bin a2s-probe -- 203.0.113.7:27015
//!   cargo run --bin a2s-probe -- play.example.net:27015 --timeout-ms 2000 --classify

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use server_scout::classifier::{Ensemble, Vocabulary};
use server_scout::config::ClassifierConfig;
use server_scout::scanner::probe;

#[derive(Parser)]
#[command(name = "a2s-probe")]
struct Args {
    /// Server address as host:port.
    target: String,

    /// Per-query timeout.
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Also run the rule classifiers over the reply.
    #[arg(long)]
    classify: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let addr = tokio::net::lookup_host(&args.target)
        .await
        .with_context(|| format!("Cannot resolve {}", args.target))?
        .next()
        .with_context(|| format!("{} resolved to no address", args.target))?;

    let result = probe(addr, std::time::Duration::from_millis(args.timeout_ms)).await;

    let classification = match (&result.info, args.classify) {
        (Ok(info), true) => {
            let ensemble = Ensemble::untrained(&ClassifierConfig::default(), Vocabulary::default())?;
            let c = ensemble.classify(&info.name, info.tags(), &info.map);
            Some(json!({
                "game_mode": c.game_mode.label,
                "game_mode_confidence": c.game_mode.confidence,
                "regional": c.regional.label,
                "regional_confidence": c.regional.confidence,
                "needs_review": c.game_mode.needs_review || c.regional.needs_review,
            }))
        }
        _ => None,
    };

    let report = json!({
        "addr": addr.to_string(),
        "online": result.is_online(),
        "latency_ms": result.latency_ms(),
        "info": result.info.as_ref().ok(),
        "info_error": result.info.as_ref().err().map(ToString::to_string),
        "players": result.players.as_ref().ok(),
        "players_error": result.players.as_ref().err().map(ToString::to_string),
        "classification": classification,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
