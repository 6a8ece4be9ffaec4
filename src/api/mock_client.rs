use crate::api::client::{ByteStream, MockStreamProducer};
use crate::error::TransportError;
use crate::types::ApiMessage;
use bytes::Bytes;
use futures::stream;
use std::sync::{Arc, Mutex};

/// One scripted completion turn: SSE chunks, optionally followed by a
/// mid-stream transport failure.
pub struct MockTurn {
    pub chunks: Vec<String>,
    pub trailing_error: Option<TransportError>,
}

impl MockTurn {
    pub fn text(chunks: Vec<String>) -> Self {
        Self {
            chunks,
            trailing_error: None,
        }
    }

    pub fn failing(chunks: Vec<String>, error: TransportError) -> Self {
        Self {
            chunks,
            trailing_error: Some(error),
        }
    }
}

#[derive(Clone)]
pub struct MockApiClient {
    turns: Arc<Mutex<Vec<MockTurn>>>,
}

impl MockApiClient {
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns: Arc::new(Mutex::new(turns)),
        }
    }
}

impl MockStreamProducer for MockApiClient {
    fn create_mock_stream(&self, _messages: &[ApiMessage]) -> Result<ByteStream, TransportError> {
        let mut turns_guard = self.turns.lock().unwrap();
        if turns_guard.is_empty() {
            return Err(TransportError::Stream(
                "MockApiClient: no more responses configured".to_string(),
            ));
        }
        let turn = turns_guard.remove(0);

        let mut items: Vec<Result<Bytes, TransportError>> = turn
            .chunks
            .into_iter()
            .map(|s| {
                let framed = if s.ends_with("\n\n") {
                    s
                } else {
                    format!("{s}\n\n")
                };
                Ok(Bytes::from(framed))
            })
            .collect();
        if let Some(error) = turn.trailing_error {
            items.push(Err(error));
        }

        Ok(Box::pin(stream::iter(items)))
    }
}
