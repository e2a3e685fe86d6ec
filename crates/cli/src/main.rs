use std::sync::Arc;

use anyhow::Context;

use stockledger_infra::{InMemoryCatalog, LedgerConfig, StockLedgerService, open_store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let config = LedgerConfig::from_env().context("invalid ledger configuration")?;
    tracing::info!(
        max_commit_attempts = config.max_commit_attempts,
        min_threshold = config.default_thresholds.min(),
        critical_threshold = config.default_thresholds.critical(),
        "starting stock ledger"
    );

    let store = open_store(&config.backend)
        .await
        .context("failed to open stock store")?;
    let service = StockLedgerService::new(store, Arc::new(InMemoryCatalog::new()), &config);

    stockledger_cli::run(
        &service,
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}
