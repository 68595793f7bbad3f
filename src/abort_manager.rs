use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Exchange id to cancellation token, so a caller outside the orchestrator can abort by id.
#[derive(Clone, Default)]
pub struct AbortRegistry {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl AbortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, exchange_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut map) = self.inner.lock() {
            map.insert(exchange_id.to_string(), token.clone());
        }
        token
    }

    pub fn abort(&self, exchange_id: &str) -> Result<(), String> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| "Failed to acquire lock on abort registry".to_string())?;
        match map.remove(exchange_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(format!(
                "Exchange {} not found or already completed",
                exchange_id
            )),
        }
    }

    pub fn unregister(&self, exchange_id: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(exchange_id);
        }
    }

    pub fn is_registered(&self, exchange_id: &str) -> bool {
        self.inner
            .lock()
            .map(|map| map.contains_key(exchange_id))
            .unwrap_or(false)
    }
}
