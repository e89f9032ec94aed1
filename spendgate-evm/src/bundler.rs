//! JSON-RPC client for ERC-4337 bundlers and ERC-7677 paymasters.
//!
//! Both speak plain JSON-RPC 2.0 over HTTP, so one [`BundlerClient`] covers
//! either endpoint. Methods:
//!
//! - `eth_estimateUserOperationGas`
//! - `eth_sendUserOperation`
//! - `eth_getUserOperationReceipt` (a `null` result means still pending)
//! - `pm_getPaymasterStubData` / `pm_getPaymasterData`

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use url::Url;

use crate::networks::ChainId;
use crate::user_operation::{
    PaymasterData, UserOperation, UserOperationGas, UserOperationReceipt,
};

/// Errors that can occur while talking to a bundler or paymaster.
#[derive(Debug, thiserror::Error)]
pub enum BundlerError {
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// RPC method being called.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// RPC method being called.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// The response was not a JSON-RPC envelope of the expected shape.
    #[error("Failed to deserialize JSON: {context}: {message}")]
    JsonDeserialization {
        /// RPC method being called.
        context: &'static str,
        /// Deserializer message.
        message: String,
    },
    /// The endpoint returned a JSON-RPC error object.
    #[error("{method} failed ({code}): {message}")]
    Rpc {
        /// RPC method being called.
        method: &'static str,
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// The endpoint returned neither a result nor an error.
    #[error("{0} returned an empty result")]
    EmptyResult(&'static str),
}

impl BundlerError {
    /// Whether the endpoint itself rejected the request, as opposed to the
    /// request failing in transit.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rpc { .. })
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// A JSON-RPC client for one bundler or paymaster endpoint.
#[derive(Clone, Debug)]
pub struct BundlerClient {
    url: Url,
    client: Client,
    timeout: Option<Duration>,
    next_id: Arc<AtomicU64>,
}

impl BundlerClient {
    /// Creates a client for the endpoint at `url`.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            client: Client::new(),
            timeout: None,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Sets a timeout for every request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Estimates gas limits for `op`.
    ///
    /// # Errors
    ///
    /// Returns [`BundlerError::Rpc`] if the bundler rejects the operation.
    pub async fn estimate_user_operation_gas(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<UserOperationGas, BundlerError> {
        self.request("eth_estimateUserOperationGas", json!([op, entry_point]))
            .await
    }

    /// Enqueues a signed `op` and returns its user operation hash.
    ///
    /// # Errors
    ///
    /// Returns [`BundlerError::Rpc`] if the bundler rejects the operation.
    pub async fn send_user_operation(
        &self,
        op: &UserOperation,
        entry_point: Address,
    ) -> Result<B256, BundlerError> {
        self.request("eth_sendUserOperation", json!([op, entry_point]))
            .await
    }

    /// Fetches the receipt for `hash`, or `None` while it is still pending.
    ///
    /// # Errors
    ///
    /// Returns [`BundlerError`] if the request fails.
    pub async fn get_user_operation_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<UserOperationReceipt>, BundlerError> {
        self.request("eth_getUserOperationReceipt", json!([hash]))
            .await
    }

    /// Requests placeholder paymaster data used for gas estimation.
    ///
    /// # Errors
    ///
    /// Returns [`BundlerError::Rpc`] if the paymaster declines.
    pub async fn paymaster_stub_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: ChainId,
    ) -> Result<PaymasterData, BundlerError> {
        self.request(
            "pm_getPaymasterStubData",
            paymaster_params(op, entry_point, chain_id),
        )
        .await
    }

    /// Requests the final, signed paymaster data for a gas-estimated `op`.
    ///
    /// # Errors
    ///
    /// Returns [`BundlerError::Rpc`] if the paymaster declines.
    pub async fn paymaster_data(
        &self,
        op: &UserOperation,
        entry_point: Address,
        chain_id: ChainId,
    ) -> Result<PaymasterData, BundlerError> {
        self.request(
            "pm_getPaymasterData",
            paymaster_params(op, entry_point, chain_id),
        )
        .await
    }

    /// Sends one JSON-RPC request and decodes its `result`.
    ///
    /// A `null` result decodes into `R` as-is, so callers that expect it use `Option<_>`.
    async fn request<R>(&self, method: &'static str, params: Value) -> Result<R, BundlerError>
    where
        R: DeserializeOwned,
    {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let mut req = self.client.post(self.url.clone()).json(&body);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req.send().await.map_err(|e| BundlerError::Http {
            context: method,
            source: e,
        })?;

        let status = http_response.status();
        if status != StatusCode::OK {
            let body = http_response.text().await.unwrap_or_default();
            return Err(BundlerError::HttpStatus {
                context: method,
                status,
                body,
            });
        }
        let response: RpcResponse =
            http_response
                .json()
                .await
                .map_err(|e| BundlerError::JsonDeserialization {
                    context: method,
                    message: e.to_string(),
                })?;

        if let Some(error) = response.error {
            #[cfg(feature = "telemetry")]
            tracing::debug!(method, code = error.code, message = %error.message, "rpc error");
            return Err(BundlerError::Rpc {
                method,
                code: error.code,
                message: error.message,
            });
        }
        let result = response.result.unwrap_or(Value::Null);
        let was_null = result.is_null();
        serde_json::from_value(result).map_err(|e| {
            if was_null {
                BundlerError::EmptyResult(method)
            } else {
                BundlerError::JsonDeserialization {
                    context: method,
                    message: e.to_string(),
                }
            }
        })
    }
}

fn paymaster_params(op: &UserOperation, entry_point: Address, chain_id: ChainId) -> Value {
    json!([op, entry_point, format!("{chain_id:#x}"), {}])
}
