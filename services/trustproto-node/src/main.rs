use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use trustproto_core::ledger::signing_key_from_hex;
use trustproto_core::{logging, HashChainLedger, ProtocolConfig};
use trustproto_crypto::{SignatureService, SqliteKeyStore};
use trustproto_domain::{InMemoryDeclarationStore, InMemoryIdentityRegistry};
use trustproto_trust_mesh::{spawn_decay_task, SqliteBridgeStore, TrustProtocol};

const NODE_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    protocol_version: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config = match parse_config_path(&args)? {
        Some(path) => ProtocolConfig::from_file(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ProtocolConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    logging::init_from_config(&config.logging);

    let protocol = build_protocol(&config)?;
    info!(
        ledger = %config.ledger.path.display(),
        keys = %config.signing.key_store_path.display(),
        bridges = %config.bridge.store_path.display(),
        "trustproto node started"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let decay = spawn_decay_task(
        protocol.bridge_manager(),
        std::time::Duration::from_secs(config.bridge.sweep_interval_secs),
        shutdown_rx,
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    if let Err(e) = decay.await {
        warn!(error = %e, "Decay task ended abnormally");
    }

    let metrics = protocol.ledger().metrics();
    info!(
        appends = metrics.events_appended_total,
        verifications = metrics.verifications_total,
        "trustproto node stopped"
    );
    Ok(())
}

fn build_protocol(config: &ProtocolConfig) -> Result<TrustProtocol> {
    let mut ledger = HashChainLedger::open(&config.ledger.path).context("opening ledger")?;
    if let Some(var) = &config.ledger.signing_key_env {
        match std::env::var(var) {
            Ok(seed) => {
                let key = signing_key_from_hex(&seed)
                    .with_context(|| format!("parsing ledger signing key from {var}"))?;
                ledger = ledger.with_signing_key(key);
                info!(env = %var, "Ledger rows will be signed");
            }
            Err(_) => warn!(env = %var, "Ledger signing key not set; rows stay unsigned"),
        }
    }

    let keys = SqliteKeyStore::open(&config.signing.key_store_path).context("opening key store")?;
    let signer = SignatureService::new(Arc::new(keys), &config.signing);
    let bridges = SqliteBridgeStore::open(&config.bridge.store_path).context("opening bridge store")?;

    // Identity records arrive from the external verification service.
    Ok(TrustProtocol::new(
        config,
        Arc::new(ledger),
        Arc::new(signer),
        Arc::new(InMemoryDeclarationStore::new()),
        Arc::new(InMemoryIdentityRegistry::new()),
        Arc::new(bridges),
    ))
}

fn parse_config_path(args: &[String]) -> Result<Option<PathBuf>> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            match args_iter.next() {
                Some(path) => return Ok(Some(PathBuf::from(path))),
                None => bail!("--config was provided without a path"),
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_config_path() {
        assert_eq!(
            parse_config_path(&args(&["node", "--config", "node.toml"])).unwrap(),
            Some(PathBuf::from("node.toml"))
        );
        assert_eq!(parse_config_path(&args(&["node"])).unwrap(), None);
        assert!(parse_config_path(&args(&["node", "--config"])).is_err());
    }
}
