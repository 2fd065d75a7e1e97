//! In-process stand-in for the remote service, for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use strata_core::CacheError;
use tokio::sync::Notify;

use super::connection::RemoteKv;

#[derive(Default)]
pub(crate) struct FakeKv {
    data: Mutex<HashMap<String, (Vec<u8>, u64)>>,
    pub(crate) mget_calls: AtomicUsize,
    pub(crate) fail: AtomicBool,
    write_gate: Option<Arc<Notify>>,
}

impl FakeKv {
    /// Batch writes wait for `gate` to be notified before they land.
    pub(crate) fn gated(gate: Arc<Notify>) -> Self {
        Self {
            write_gate: Some(gate),
            ..Default::default()
        }
    }

    pub(crate) fn expire(&self, key: &str) {
        self.data.lock().expect("lock").remove(key);
    }

    pub(crate) fn ttl_of(&self, key: &str) -> Option<u64> {
        self.data.lock().expect("lock").get(key).map(|(_, ttl)| *ttl)
    }

    fn check(&self, command: &str) -> Result<(), CacheError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(CacheError::Command {
                command: command.to_string(),
                reason: "connection reset".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteKv for FakeKv {
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), CacheError> {
        self.check("SET")?;
        self.data
            .lock()
            .expect("lock")
            .insert(key.to_string(), (value.to_vec(), ttl_secs));
        Ok(())
    }

    async fn set_ex_multi(
        &self,
        items: &HashMap<String, Vec<u8>>,
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        if let Some(gate) = &self.write_gate {
            gate.notified().await;
        }
        self.check("SETEX")?;
        let mut data = self.data.lock().expect("lock");
        for (key, value) in items {
            data.insert(key.clone(), (value.clone(), ttl_secs));
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, CacheError> {
        self.mget_calls.fetch_add(1, Ordering::SeqCst);
        self.check("MGET")?;
        let data = self.data.lock().expect("lock");
        Ok(keys
            .iter()
            .map(|key| data.get(key).map(|(value, _)| value.clone()))
            .collect())
    }
}
