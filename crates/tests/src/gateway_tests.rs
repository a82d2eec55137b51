//! Integration tests for the JSON-RPC gateway against a mock daemon.
//!
//! These cover the error taxonomy callers rely on: transient failures are retried
//! with backoff, node errors surface at once, and bodies that are not JSON-RPC are
//! never mistaken for results.

use serde_json::json;
use std::time::Duration;
use vex_core::{
    rpc::{
        BlockVerbosity, Credentials, GatewayConfig, NodeClient, RetryPolicy, RpcError,
        RpcGateway,
    },
    types::SATS_PER_COIN,
};

use crate::mock_infrastructure::{rpc_mock::block_json, NodeRpcMock};

#[tokio::test]
async fn test_typed_result_decodes() {
    let mut mock = NodeRpcMock::new().await;
    mock.mock_result("getblockcount", &json!(800_205));

    let gateway = RpcGateway::new(mock.gateway_config(3)).unwrap();
    assert_eq!(gateway.block_count().await.unwrap(), 800_205);
}

#[tokio::test]
async fn test_block_decodes_with_full_transactions() {
    let mut mock = NodeRpcMock::new().await;
    mock.mock_result("getblock", &block_json(10, "aa", Some("bb"), "RAddr"));

    let gateway = RpcGateway::new(mock.gateway_config(3)).unwrap();
    let block = gateway.block_at(10, BlockVerbosity::Full).await.unwrap();

    assert_eq!(block.height, 10);
    assert_eq!(block.previousblockhash.as_deref(), Some("bb"));
    assert!(block.has_full_transactions());
    let coinbase = block.transactions().next().unwrap();
    assert!(coinbase.is_coinbase());
    assert_eq!(coinbase.vout[0].amount_sats(), 3 * SATS_PER_COIN);
}

#[tokio::test]
async fn test_transient_failures_are_retried_then_succeed() {
    let mut mock = NodeRpcMock::new().await;
    mock.mock_http_status("getblockcount", 503, 2);
    mock.mock_result("getblockcount", &json!(42));

    let gateway = RpcGateway::new(mock.gateway_config(5)).unwrap();
    assert_eq!(gateway.block_count().await.unwrap(), 42);
    mock.assert_all();
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let mut mock = NodeRpcMock::new().await;
    mock.mock_http_status("getblockcount", 503, 3);

    let gateway = RpcGateway::new(mock.gateway_config(3)).unwrap();
    let err = gateway.block_count().await.unwrap_err();

    assert!(matches!(err, RpcError::Unavailable(_)));
    mock.assert_all();
}

#[tokio::test]
async fn test_node_error_is_not_retried() {
    let mut mock = NodeRpcMock::new().await;
    let not_found = mock
        .server()
        .mock("POST", "/")
        .match_body(mockito::Matcher::Regex(r#""method"\s*:\s*"getblockhash""#.to_string()))
        .with_status(500)
        .with_body(
            json!({
                "result": null,
                "error": { "code": -8, "message": "Block height out of range" },
                "id": 1
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let gateway = RpcGateway::new(mock.gateway_config(5)).unwrap();
    let err = gateway.block_hash(999_999_999).await.unwrap_err();

    assert!(err.is_not_found());
    assert!(!err.is_transient());
    not_found.assert_async().await;
}

#[tokio::test]
async fn test_warmup_is_transient() {
    let mut mock = NodeRpcMock::new().await;
    mock.mock_node_error("getblockchaininfo", -28, "Loading block index...");

    let gateway = RpcGateway::new(mock.gateway_config(2)).unwrap();
    let err = gateway.blockchain_info().await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_garbage_body_is_malformed() {
    let mut mock = NodeRpcMock::new().await;
    mock.mock_garbage("getrawmempool");

    let gateway = RpcGateway::new(mock.gateway_config(3)).unwrap();
    let err = gateway.raw_mempool().await.unwrap_err();
    assert!(matches!(err, RpcError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_wrong_result_shape_is_malformed() {
    let mut mock = NodeRpcMock::new().await;
    mock.mock_result("getblockcount", &json!("not a number"));

    let gateway = RpcGateway::new(mock.gateway_config(3)).unwrap();
    let err = gateway.block_count().await.unwrap_err();
    assert!(matches!(err, RpcError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_credentials_are_sent_as_basic_auth() {
    let mut mock = NodeRpcMock::new().await;
    // base64("user:pass")
    mock.mock_authenticated("getblockcount", "Basic dXNlcjpwYXNz", &json!(7));

    let mut config = mock.gateway_config(1);
    config.credentials =
        Some(Credentials { user: "user".to_string(), password: "pass".to_string() });
    let gateway = RpcGateway::new(config).unwrap();
    assert_eq!(gateway.block_count().await.unwrap(), 7);

    let anonymous = RpcGateway::new(mock.gateway_config(1)).unwrap();
    let err = anonymous.block_count().await.unwrap_err();
    assert!(matches!(err, RpcError::NodeError { code: -401, .. }));
}

#[tokio::test]
async fn test_unreachable_node_is_unavailable() {
    let mut config = GatewayConfig::new("http://127.0.0.1:1");
    config.timeout = Duration::from_secs(1);
    config.retry = RetryPolicy {
        base: Duration::from_millis(1),
        cap: Duration::from_millis(2),
        max_attempts: 2,
    };

    let gateway = RpcGateway::new(config).unwrap();
    let err = gateway.block_count().await.unwrap_err();
    assert!(matches!(err, RpcError::Unavailable(_)));
}

#[tokio::test]
async fn test_untyped_summaries_pass_through() {
    let mut mock = NodeRpcMock::new().await;
    mock.mock_result("getinfo", &json!({ "version": 1_000_350, "blocks": 800_205 }));
    mock.mock_result("getpeerinfo", &json!([{ "id": 3, "addr": "10.0.0.2:27485" }]));

    let gateway = RpcGateway::new(mock.gateway_config(1)).unwrap();
    assert_eq!(gateway.node_info().await.unwrap()["blocks"], 800_205);
    let peers = gateway.peer_info().await.unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["addr"], "10.0.0.2:27485");
}
