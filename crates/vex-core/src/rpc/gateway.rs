use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    metrics::MetricsCollector,
    rpc::{
        http_client::{Credentials, HttpClient, HttpClientConfig},
        retry::RetryPolicy,
        RpcError,
    },
    types::JsonRpcError,
};

/// Connection settings for the node's JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub credentials: Option<Credentials>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub http: HttpClientConfig,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            http: HttpClientConfig::default(),
        }
    }
}

/// The only component that speaks the node's wire protocol.
///
/// Shared by reference across tasks; concurrent calls do not block each other beyond
/// the HTTP client's in-flight limit.
pub struct RpcGateway {
    http: HttpClient,
    config: GatewayConfig,
    next_id: AtomicU64,
    metrics: MetricsCollector,
}

impl RpcGateway {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> Result<Self, RpcError> {
        let http = HttpClient::with_config(config.http.clone())?;
        Ok(Self { http, config, next_id: AtomicU64::new(1), metrics: MetricsCollector::new() })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.config.url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Calls `method` with `params`, retrying [`RpcError::Unavailable`] with capped
    /// exponential backoff.
    ///
    /// # Errors
    ///
    /// The last error once attempts are exhausted, or the first non-transient error.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let policy = self.config.retry;
        let attempts = policy.attempts();
        let mut attempt = 0;

        loop {
            let start = Instant::now();
            let result = self.call_once(method, &params).await;
            self.metrics.record_rpc_call(method, result.as_ref().map(|_| ()), start.elapsed());

            match result {
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        method,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "rpc call failed, retrying"
                    );
                    self.metrics.record_rpc_retry(method, attempt + 1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::debug!(method, attempts = attempt + 1, error = %e, "rpc call failed");
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
    }

    /// [`call`](Self::call) then decode the result.
    ///
    /// # Errors
    ///
    /// As [`call`](Self::call), plus [`RpcError::MalformedResponse`] if the result does
    /// not decode as `T`.
    pub async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::MalformedResponse(format!("{method}: {e}")))
    }

    async fn call_once(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_vec(&json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .map_err(|e| RpcError::MalformedResponse(format!("failed to encode request: {e}")))?;

        tracing::debug!(method, id, "sending rpc request");

        let response = self
            .http
            .post_json(
                &self.config.url,
                bytes::Bytes::from(body),
                self.config.credentials.as_ref(),
                self.config.timeout,
            )
            .await?;

        parse_envelope(response.status, &response.body)
    }
}

/// Interprets an HTTP status and body as a JSON-RPC 1.0 envelope.
///
/// bitcoind-family daemons answer node errors with HTTP 500 and a well-formed body, so
/// the body is inspected before the status.
pub(crate) fn parse_envelope(status: u16, body: &[u8]) -> Result<Value, RpcError> {
    if let Ok(Value::Object(mut envelope)) = serde_json::from_slice::<Value>(body) {
        if envelope.contains_key("result") || envelope.contains_key("error") {
            if let Some(error) = envelope.remove("error").filter(|e| !e.is_null()) {
                let error: JsonRpcError = serde_json::from_value(error)
                    .map_err(|e| RpcError::MalformedResponse(format!("invalid error object: {e}")))?;
                return Err(RpcError::from_node(error.code, error.message));
            }
            if (200..300).contains(&status) {
                return Ok(envelope.remove("result").unwrap_or(Value::Null));
            }
        }
    }

    match status {
        200..=299 => Err(RpcError::MalformedResponse("body is not a JSON-RPC envelope".into())),
        429 | 500..=599 => Err(RpcError::Unavailable(format!("node returned HTTP {status}"))),
        401 | 403 => Err(RpcError::NodeError {
            code: -i32::from(status),
            message: "rpc credentials rejected".into(),
        }),
        _ => Err(RpcError::MalformedResponse(format!("unexpected HTTP {status}"))),
    }
}
