//! Line-oriented JSON driver for the stock ledger.
//!
//! One command object per input line, tagged by `op`. One response object per
//! output line:
//!
//! ```text
//! {"op":"applyMovement","productId":"…","kind":"ENTRY","quantity":20,"actorId":"…"}
//! → {"ok":true,"result":{…}}
//! → {"ok":false,"error":"insufficient_stock","message":"…","available":3,"requested":5}
//! ```

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use stockledger_core::{ActorId, ProductId};
use stockledger_infra::store::StockStore;
use stockledger_infra::{InMemoryCatalog, LedgerError, StockLedgerService};
use stockledger_inventory::{MovementKind, MovementRequest, StockAlert};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    RegisterProduct {
        product_id: ProductId,
    },
    DeactivateProduct {
        product_id: ProductId,
    },
    ApplyMovement {
        product_id: ProductId,
        /// `ENTRY`, `EXIT` or `ADJUSTMENT` (any case).
        kind: String,
        quantity: i64,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        reference: Option<String>,
        actor_id: ActorId,
    },
    SetThresholds {
        product_id: ProductId,
        min_threshold: i64,
        critical_threshold: i64,
    },
    GetSnapshot {
        product_id: ProductId,
    },
    ListSnapshots {
        #[serde(default)]
        alert: Option<String>,
    },
    GetHistory {
        #[serde(default)]
        product_id: Option<ProductId>,
        #[serde(default)]
        kind: Option<String>,
        #[serde(default)]
        page: Option<u32>,
        #[serde(default)]
        page_size: Option<u32>,
    },
    GetReport {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[serde(default)]
        product_id: Option<ProductId>,
    },
    Recent {
        #[serde(default)]
        limit: Option<u32>,
    },
    Audit {
        product_id: ProductId,
    },
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<stockledger_core::DomainError> for CommandError {
    fn from(value: stockledger_core::DomainError) -> Self {
        CommandError::Ledger(value.into())
    }
}

/// Run one decoded command against the service.
pub async fn execute<S>(
    service: &StockLedgerService<S, InMemoryCatalog>,
    command: Command,
) -> Result<Value, CommandError>
where
    S: StockStore + ?Sized + 'static,
{
    match command {
        Command::RegisterProduct { product_id } => {
            service
                .catalog()
                .register(product_id)
                .map_err(LedgerError::from)?;
            Ok(json!({ "productId": product_id, "active": true }))
        }
        Command::DeactivateProduct { product_id } => {
            let known = service
                .catalog()
                .deactivate(product_id)
                .map_err(LedgerError::from)?;
            if !known {
                return Err(LedgerError::ProductNotFound(product_id).into());
            }
            Ok(json!({ "productId": product_id, "active": false }))
        }
        Command::ApplyMovement {
            product_id,
            kind,
            quantity,
            reason,
            reference,
            actor_id,
        } => {
            let request = MovementRequest {
                product_id,
                kind: kind.parse()?,
                quantity,
                reason,
                reference,
                actor_id,
            };
            encode(service.apply_movement(request).await?)
        }
        Command::SetThresholds {
            product_id,
            min_threshold,
            critical_threshold,
        } => encode(
            service
                .set_thresholds(product_id, min_threshold, critical_threshold)
                .await?,
        ),
        Command::GetSnapshot { product_id } => encode(service.get_snapshot(product_id).await?),
        Command::ListSnapshots { alert } => {
            let alert = alert.as_deref().map(str::parse::<StockAlert>).transpose()?;
            encode(service.list_snapshots(alert).await?)
        }
        Command::GetHistory {
            product_id,
            kind,
            page,
            page_size,
        } => {
            let kind = kind.as_deref().map(str::parse::<MovementKind>).transpose()?;
            encode(service.get_history(product_id, kind, page, page_size).await?)
        }
        Command::GetReport {
            start,
            end,
            product_id,
        } => encode(service.get_report(start, end, product_id).await?),
        Command::Recent { limit } => encode(service.recent_movements(limit).await?),
        Command::Audit { product_id } => encode(service.audit(product_id).await?),
    }
}

fn encode<T: Serialize>(value: T) -> Result<Value, CommandError> {
    Ok(serde_json::to_value(value)?)
}

/// Error object for a failed command.
pub fn error_response(err: &CommandError) -> Value {
    let message = err.to_string();
    match err {
        CommandError::InvalidCommand(_) => json_error("invalid_command", message),
        CommandError::Encode(_) => json_error("internal_error", message),
        CommandError::Ledger(ledger) => {
            let mut body = match ledger {
                LedgerError::Validation { field, .. } => {
                    let mut body = json_error("validation_error", message);
                    body["field"] = json!(field);
                    body
                }
                LedgerError::ProductNotFound(product_id) => {
                    let mut body = json_error("product_not_found", message);
                    body["productId"] = json!(product_id);
                    body
                }
                LedgerError::InsufficientStock {
                    available,
                    requested,
                } => {
                    let mut body = json_error("insufficient_stock", message);
                    body["available"] = json!(available);
                    body["requested"] = json!(requested);
                    body
                }
                LedgerError::ConcurrencyConflict { attempts, .. } => {
                    let mut body = json_error("concurrency_conflict", message);
                    body["attempts"] = json!(attempts);
                    body
                }
                LedgerError::StoreUnavailable(_) => json_error("store_unavailable", message),
                LedgerError::InvariantViolation(_) => json_error("invariant_violation", message),
            };
            body["transient"] = json!(ledger.is_transient());
            body
        }
    }
}

fn json_error(code: &'static str, message: String) -> Value {
    json!({
        "ok": false,
        "error": code,
        "message": message,
    })
}

/// Decode, execute and answer one input line.
pub async fn handle_line<S>(service: &StockLedgerService<S, InMemoryCatalog>, line: &str) -> Value
where
    S: StockStore + ?Sized + 'static,
{
    let outcome = match serde_json::from_str::<Command>(line) {
        Ok(command) => execute(service, command).await,
        Err(e) => Err(CommandError::InvalidCommand(e.to_string())),
    };

    match outcome {
        Ok(result) => json!({ "ok": true, "result": result }),
        Err(err) => {
            tracing::debug!(error = %err, "command failed");
            error_response(&err)
        }
    }
}

/// Serve commands from `input` until EOF. Blank lines are skipped.
pub async fn run<S, R, W>(
    service: &StockLedgerService<S, InMemoryCatalog>,
    input: R,
    mut output: W,
) -> anyhow::Result<()>
where
    S: StockStore + ?Sized + 'static,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut handled = 0u64;
    while let Some(line) = lines.next_line().await.context("failed to read command line")? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(service, &line).await;
        let mut encoded = serde_json::to_vec(&response).context("failed to encode response")?;
        encoded.push(b'\n');
        output
            .write_all(&encoded)
            .await
            .context("failed to write response")?;
        output.flush().await.context("failed to flush response")?;
        handled += 1;
    }

    tracing::info!(handled, "input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stockledger_infra::LedgerConfig;
    use stockledger_infra::store::InMemoryStockStore;

    type TestService = StockLedgerService<InMemoryStockStore, InMemoryCatalog>;

    fn service() -> TestService {
        StockLedgerService::new(
            Arc::new(InMemoryStockStore::new()),
            Arc::new(InMemoryCatalog::new()),
            &LedgerConfig::default(),
        )
    }

    async fn send(service: &TestService, command: Value) -> Value {
        handle_line(service, &command.to_string()).await
    }

    #[tokio::test]
    async fn registered_product_takes_movements() {
        let service = service();
        let product_id = ProductId::new();
        let actor_id = ActorId::new();

        let registered = send(&service, json!({ "op": "registerProduct", "productId": product_id })).await;
        assert_eq!(registered["ok"], true);

        let applied = send(
            &service,
            json!({
                "op": "applyMovement",
                "productId": product_id,
                "kind": "entry",
                "quantity": 20,
                "reference": "PO-7",
                "actorId": actor_id,
            }),
        )
        .await;
        assert_eq!(applied["ok"], true, "{applied}");
        assert_eq!(applied["result"]["movement"]["kind"], "ENTRY");
        assert_eq!(applied["result"]["movement"]["quantityDelta"], 20);
        assert_eq!(applied["result"]["movement"]["reason"], "Stock entry");
        assert_eq!(applied["result"]["status"], "NORMAL");

        let snapshot = send(&service, json!({ "op": "getSnapshot", "productId": product_id })).await;
        assert_eq!(snapshot["result"]["quantity"], 20);
        assert_eq!(snapshot["result"]["criticalThreshold"], 5);
    }

    #[tokio::test]
    async fn business_errors_carry_detail() {
        let service = service();
        let product_id = ProductId::new();
        service.catalog().register(product_id).unwrap();

        let exit = send(
            &service,
            json!({
                "op": "applyMovement",
                "productId": product_id,
                "kind": "EXIT",
                "quantity": 5,
                "actorId": ActorId::new(),
            }),
        )
        .await;
        assert_eq!(exit["ok"], false);
        assert_eq!(exit["error"], "insufficient_stock");
        assert_eq!(exit["available"], 0);
        assert_eq!(exit["requested"], 5);
        assert_eq!(exit["transient"], false);

        let bad_kind = send(
            &service,
            json!({
                "op": "applyMovement",
                "productId": product_id,
                "kind": "TRANSFER",
                "quantity": 5,
                "actorId": ActorId::new(),
            }),
        )
        .await;
        assert_eq!(bad_kind["error"], "validation_error");
        assert_eq!(bad_kind["field"], "kind");

        let thresholds = send(
            &service,
            json!({
                "op": "setThresholds",
                "productId": product_id,
                "minThreshold": 2,
                "criticalThreshold": 3,
            }),
        )
        .await;
        assert_eq!(thresholds["field"], "criticalThreshold");

        let missing = send(&service, json!({ "op": "deactivateProduct", "productId": ProductId::new() })).await;
        assert_eq!(missing["error"], "product_not_found");
    }

    #[tokio::test]
    async fn malformed_lines_are_reported_not_fatal() {
        let service = service();
        let response = handle_line(&service, "{\"op\":\"teleport\"}").await;
        assert_eq!(response["error"], "invalid_command");

        let response = handle_line(&service, "not json").await;
        assert_eq!(response["error"], "invalid_command");
    }

    #[tokio::test]
    async fn listing_filters_by_alert_name() {
        let service = service();
        let product_id = ProductId::new();
        service.catalog().register(product_id).unwrap();

        let listing = send(
            &service,
            json!({ "op": "listSnapshots", "alert": "stock_exhausted" }),
        )
        .await;
        assert_eq!(listing["result"]["summary"]["outOfStock"], 1);
        assert_eq!(listing["result"]["snapshots"].as_array().map(Vec::len), Some(1));

        let none = send(
            &service,
            json!({ "op": "listSnapshots", "alert": "MIN_THRESHOLD_REACHED" }),
        )
        .await;
        assert_eq!(none["result"]["snapshots"].as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn run_answers_one_line_per_command() {
        let service = service();
        let product_id = ProductId::new();
        let actor_id = ActorId::new();
        let input = [
            json!({ "op": "registerProduct", "productId": product_id }).to_string(),
            String::new(),
            json!({ "op": "applyMovement", "productId": product_id, "kind": "ENTRY", "quantity": 3, "actorId": actor_id }).to_string(),
            json!({ "op": "recent" }).to_string(),
            json!({ "op": "audit", "productId": product_id }).to_string(),
            json!({ "op": "getHistory", "productId": product_id, "pageSize": 1 }).to_string(),
        ]
        .join("\n");

        let mut output = Vec::new();
        run(&service, tokio::io::BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let responses: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 5);
        assert!(responses.iter().all(|r| r["ok"] == true));
        assert_eq!(responses[2]["result"].as_array().map(Vec::len), Some(1));
        assert_eq!(responses[3]["result"]["replayedQuantity"], 3);
        assert_eq!(responses[4]["result"]["totalPages"], 1);
    }
}
