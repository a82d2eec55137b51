//! ZeroMQ subscription to the daemon's `-zmqpub*` topics.
//!
//! Each message has three frames: topic, body, and a little-endian `u32` sequence
//! number per topic. A jump in the sequence means notifications were dropped; the
//! pipeline's safety poll recovers them.

use async_trait::async_trait;
use std::collections::HashMap;
use zeromq::{Socket, SocketRecv, SubSocket, ZmqMessage};

use super::{BlockFeed, FeedEvent, IngestError};

pub const TOPICS: [&str; 4] = ["hashblock", "rawblock", "hashtx", "rawtx"];

pub struct ZmqFeed {
    endpoint: String,
    socket: Option<SubSocket>,
    sequences: HashMap<String, u32>,
    dropped: u64,
}

impl ZmqFeed {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), socket: None, sequences: HashMap::new(), dropped: 0 }
    }

    /// Notifications lost to sequence gaps since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn track_sequence(&mut self, topic: &str, sequence: u32) {
        if let Some(previous) = self.sequences.insert(topic.to_string(), sequence) {
            let expected = previous.wrapping_add(1);
            if sequence != expected {
                let missed = sequence.wrapping_sub(expected);
                self.dropped += u64::from(missed);
                tracing::warn!(topic, expected, got = sequence, missed, "zmq notifications dropped");
            }
        }
    }
}

/// Decodes one multipart message into its topic, event, and sequence number.
fn decode(message: &ZmqMessage) -> Result<(String, FeedEvent, Option<u32>), IngestError> {
    let topic = message
        .get(0)
        .map(|frame| String::from_utf8_lossy(frame).into_owned())
        .ok_or_else(|| IngestError::Feed("empty zmq message".to_string()))?;
    let body = message
        .get(1)
        .cloned()
        .ok_or_else(|| IngestError::Feed(format!("zmq message '{topic}' has no body")))?;
    let sequence = message
        .get(2)
        .and_then(|frame| <[u8; 4]>::try_from(frame.as_ref()).ok())
        .map(u32::from_le_bytes);

    let event = match topic.as_str() {
        // Hash bodies arrive in RPC display order.
        "hashblock" => FeedEvent::BlockHash(hex::encode(&body)),
        "hashtx" => FeedEvent::TxHash(hex::encode(&body)),
        "rawblock" => FeedEvent::RawBlock(body),
        "rawtx" => FeedEvent::RawTx(body),
        other => return Err(IngestError::Feed(format!("unexpected zmq topic '{other}'"))),
    };
    Ok((topic, event, sequence))
}

#[async_trait]
impl BlockFeed for ZmqFeed {
    async fn connect(&mut self) -> Result<(), IngestError> {
        let mut socket = SubSocket::new();
        socket
            .connect(&self.endpoint)
            .await
            .map_err(|e| IngestError::Feed(format!("connect {}: {e}", self.endpoint)))?;
        for topic in TOPICS {
            socket
                .subscribe(topic)
                .await
                .map_err(|e| IngestError::Feed(format!("subscribe {topic}: {e}")))?;
        }
        self.sequences.clear();
        self.socket = Some(socket);
        tracing::info!(endpoint = %self.endpoint, topics = ?TOPICS, "zmq feed subscribed");
        Ok(())
    }

    async fn next_event(&mut self) -> Result<FeedEvent, IngestError> {
        loop {
            let socket = self.socket.as_mut().ok_or(IngestError::FeedClosed)?;
            let message = match socket.recv().await {
                Ok(message) => message,
                Err(e) => {
                    self.socket = None;
                    return Err(IngestError::Feed(format!("receive: {e}")));
                }
            };

            match decode(&message) {
                Ok((topic, event, sequence)) => {
                    if let Some(sequence) = sequence {
                        self.track_sequence(&topic, sequence);
                    }
                    return Ok(event);
                }
                // One bad message does not end the subscription.
                Err(e) => tracing::warn!(error = %e, "skipping zmq message"),
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
