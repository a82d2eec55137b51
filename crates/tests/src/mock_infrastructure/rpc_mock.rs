//! Mock daemon speaking JSON-RPC 1.0 over HTTP.
//!
//! bitcoind-family daemons answer node errors with HTTP 500 and a well-formed body;
//! the helpers here reproduce that shape.

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use std::time::Duration;
use vex_core::rpc::{GatewayConfig, RetryPolicy};

/// Builder for mock daemon responses, keyed by RPC method.
pub struct NodeRpcMock {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl NodeRpcMock {
    /// Creates a new mock with a fresh mockito server.
    pub async fn new() -> Self {
        Self { server: Server::new_async().await, mocks: Vec::new() }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Gateway settings pointed at this mock with millisecond backoff.
    #[must_use]
    pub fn gateway_config(&self, max_attempts: u32) -> GatewayConfig {
        let mut config = GatewayConfig::new(self.url());
        config.timeout = Duration::from_secs(2);
        config.retry = RetryPolicy {
            base: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            max_attempts,
        };
        config
    }

    fn method_matcher(method: &str) -> Matcher {
        Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#))
    }

    /// Answers `method` with `result`.
    pub fn mock_result(&mut self, method: &str, result: &Value) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Self::method_matcher(method))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "result": result, "error": null, "id": 1 }).to_string())
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers `method` with a node error in an HTTP 500, the daemon's usual shape.
    pub fn mock_node_error(&mut self, method: &str, code: i32, message: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Self::method_matcher(method))
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "result": null,
                    "error": { "code": code, "message": message },
                    "id": 1
                })
                .to_string(),
            )
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers `method` with a bare HTTP `status`, `times` times.
    pub fn mock_http_status(&mut self, method: &str, status: usize, times: usize) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Self::method_matcher(method))
            .with_status(status)
            .with_body("Service Unavailable")
            .expect(times)
            .create();

        self.mocks.push(mock);
        self
    }

    /// Answers `method` with a non-JSON body.
    pub fn mock_garbage(&mut self, method: &str) -> &mut Self {
        let mock = self
            .server
            .mock("POST", "/")
            .match_body(Self::method_matcher(method))
            .with_status(200)
            .with_body("<html>proxy error</html>")
            .create();

        self.mocks.push(mock);
        self
    }

    /// Requires basic auth for `method`, answering `result` only when it matches.
    pub fn mock_authenticated(
        &mut self,
        method: &str,
        authorization: &str,
        result: &Value,
    ) -> &mut Self {
        let authorized = self
            .server
            .mock("POST", "/")
            .match_header("authorization", authorization)
            .match_body(Self::method_matcher(method))
            .with_status(200)
            .with_body(json!({ "result": result, "error": null, "id": 1 }).to_string())
            .create();
        let rejected = self
            .server
            .mock("POST", "/")
            .match_header("authorization", Matcher::Missing)
            .with_status(401)
            .create();

        self.mocks.push(authorized);
        self.mocks.push(rejected);
        self
    }

    /// Asserts every mock created with an `expect` count was hit that many times.
    pub fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert();
        }
    }

    /// Mutable access to the underlying server for one-off mocks.
    pub fn server(&mut self) -> &mut ServerGuard {
        &mut self.server
    }
}

/// `getblock` result at verbosity 2 with one coinbase paying `address`.
#[must_use]
pub fn block_json(height: u64, hash: &str, previous: Option<&str>, address: &str) -> Value {
    json!({
        "hash": hash,
        "height": height,
        "confirmations": 1,
        "time": 1_700_000_000 + height,
        "previousblockhash": previous,
        "validationtype": "work",
        "tx": [{
            "txid": format!("cb-{height}"),
            "vin": [{ "coinbase": "03" }],
            "vout": [{
                "value": 3.0,
                "valueSat": 300_000_000,
                "n": 0,
                "scriptPubKey": { "type": "pubkeyhash", "addresses": [address] }
            }]
        }]
    })
}
