//! Axum route handlers for the collection service.
//!
//! Provides REST endpoints to collect spend permissions, look stored grants
//! up, and spend under them.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use spendgate::validate::{parse_key, parse_spend};
use spendgate::{CollectOutcome, Collector, SettlementResult, StoredPermission};

use crate::error::ApiError;

/// Shared application state for the service.
pub type AppState = Arc<Collector>;

/// Body of `POST /collect`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectRequest {
    /// The grant, validated field by field.
    #[serde(default)]
    pub spend_permission: Option<Value>,
    /// The owner's signature over the grant.
    #[serde(default)]
    pub signature: Option<Value>,
    /// When present, the grant is approved and `amount` spent from it in one
    /// batched operation.
    #[serde(default)]
    pub amount: Option<Value>,
}

/// Success body shared by `POST /collect` and `POST /spend`.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    /// Always `true`.
    pub status: bool,
    /// Always `"Success"`.
    pub message: &'static str,
    /// Present when an on-chain operation was confirmed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementBody>,
}

/// A confirmed settlement as reported to callers.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementBody {
    /// The confirmed result.
    #[serde(flatten)]
    pub result: SettlementResult,
    /// Block-explorer link for the transaction, if the network has one.
    pub explorer_url: Option<String>,
}

impl SuccessResponse {
    const fn new(settlement: Option<SettlementBody>) -> Self {
        Self {
            status: true,
            message: "Success",
            settlement,
        }
    }
}

/// `POST /collect` - Validates, stores and (when enabled) approves a grant.
///
/// With an `amount`, the approval is batched with a first spend.
///
/// # Errors
///
/// Returns 400 on invalid input, 500 if the store fails, 503 if an `amount`
/// is given while settlement is disabled, or 502 if settlement fails after
/// the grant was stored.
pub async fn post_collect(
    State(collector): State<AppState>,
    body: Result<Json<CollectRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let Json(body) = body?;
    let permission = body.spend_permission.as_ref();
    let signature = body.signature.as_ref();
    let outcome = match &body.amount {
        Some(amount) => {
            collector
                .collect_and_spend(permission, signature, amount)
                .await?
        }
        None => collector.collect(permission, signature).await?,
    };
    let settlement = match outcome {
        CollectOutcome::SettlementSkipped { .. } => None,
        CollectOutcome::Settled {
            result,
            explorer_url,
            ..
        } => Some(SettlementBody {
            result,
            explorer_url,
        }),
    };
    Ok(Json(SuccessResponse::new(settlement)))
}

/// `GET /permissions/{account}/{spender}/{token}/{salt}` - Returns a stored grant.
///
/// # Errors
///
/// Returns 400 on a malformed key or 404 if no grant is stored under it.
pub async fn get_permission(
    State(collector): State<AppState>,
    Path((account, spender, token, salt)): Path<(String, String, String, String)>,
) -> Result<Json<StoredPermission>, ApiError> {
    let key = parse_key(&json!({
        "account": account,
        "spender": spender,
        "token": token,
        "salt": salt,
    }))?;
    Ok(Json(collector.find(&key).await?))
}

/// `POST /spend` - Spends under a stored, approved grant.
///
/// # Errors
///
/// Returns 404 for an unknown grant, 409 if the amount exceeds the remaining
/// allowance, 502 on other settlement failures, or 503 if settlement is disabled.
pub async fn post_spend(
    State(collector): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let Json(body) = body?;
    let (key, amount) = parse_spend(&body)?;
    let (result, explorer_url) = collector.spend(&key, amount).await?;
    Ok(Json(SuccessResponse::new(Some(SettlementBody {
        result,
        explorer_url,
    }))))
}

/// Creates an Axum [`axum::Router`] with all service endpoints.
///
/// Endpoints:
/// - `POST /collect` - collect a spend permission
/// - `GET /permissions/{account}/{spender}/{token}/{salt}` - look a grant up
/// - `POST /spend` - spend under a collected grant
pub fn collect_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/collect", axum::routing::post(post_collect))
        .route(
            "/permissions/{account}/{spender}/{token}/{salt}",
            axum::routing::get(get_permission),
        )
        .route("/spend", axum::routing::post(post_spend))
        .with_state(state)
}
