use reqwest::{Client, ClientBuilder};
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::rpc::RpcError;

/// Configuration for HTTP client concurrency and connection reuse.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum number of in-flight requests to the node
    pub concurrent_limit: usize,
    /// How long a caller waits for a free slot before the call counts as unavailable
    pub permit_timeout: Duration,
    /// Idle connections kept open per host
    pub pool_max_idle_per_host: usize,
    pub connect_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: 64,
            permit_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 32,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: bytes::Bytes,
}

/// Basic-auth credentials from the daemon's `rpcuser`/`rpcpassword`.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("user", &self.user).finish_non_exhaustive()
    }
}

/// Pooled HTTP client with semaphore-based concurrency control.
///
/// Performs exactly one exchange per call. Retrying is the caller's decision.
pub struct HttpClient {
    client: Client,
    in_flight: Arc<Semaphore>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, RpcError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn with_config(config: HttpClientConfig) -> Result<Self, RpcError> {
        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("vex/", env!("CARGO_PKG_VERSION")))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                RpcError::Unavailable(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            in_flight: Arc::new(Semaphore::new(config.concurrent_limit)),
            config,
        })
    }

    /// Describes a transport failure without echoing the URL, which may carry credentials.
    fn describe_transport_error(error: &reqwest::Error) -> &'static str {
        if error.is_timeout() {
            "request timed out"
        } else if error.is_connect() {
            "node unreachable"
        } else if error.is_body() || error.is_decode() {
            "response body unreadable"
        } else {
            "transport failure"
        }
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, RpcError> {
        match tokio::time::timeout(
            self.config.permit_timeout,
            Arc::clone(&self.in_flight).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(RpcError::Unavailable("http client closed".to_string())),
            Err(_) => {
                tracing::warn!(
                    limit = self.config.concurrent_limit,
                    "no free request slot before timeout"
                );
                Err(RpcError::Unavailable("too many in-flight requests".to_string()))
            }
        }
    }

    /// Posts a JSON body and returns status and body, whatever the status.
    ///
    /// # Errors
    ///
    /// [`RpcError::Unavailable`] if no slot frees up in time, the exchange times out, or
    /// the connection fails.
    pub async fn post_json(
        &self,
        url: &str,
        body: bytes::Bytes,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> Result<HttpResponse, RpcError> {
        let _slot = self.acquire_slot().await?;

        let mut request = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .body(body)
            .timeout(timeout);
        if let Some(credentials) = credentials {
            request = request.basic_auth(&credentials.user, Some(&credentials.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| RpcError::Unavailable(Self::describe_transport_error(&e).to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| RpcError::Unavailable(Self::describe_transport_error(&e).to_string()))?;

        Ok(HttpResponse { status, body })
    }

    #[cfg(test)]
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.in_flight.available_permits()
    }
}
