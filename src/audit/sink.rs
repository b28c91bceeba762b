use std::future::Future;

/// Failure while appending a record to a durable sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sink rejected record: status {0}")]
    Rejected(u16),
}

/// Append-only durable sink consumed by the emitter worker.
///
/// Both the audit/transcript store and the clinical vitals store
/// implement this contract; appends are best-effort and retried by
/// the worker, never by callers.
pub trait RecordSink: Send + Sync + 'static {
    fn append(
        &self,
        record: serde_json::Value,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// HTTP sink: POSTs each record as JSON to a collector endpoint.
#[derive(Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl RecordSink for HttpSink {
    async fn append(&self, record: serde_json::Value) -> Result<(), SinkError> {
        let response = self.client.post(&self.url).json(&record).send().await?;
        if !response.status().is_success() {
            return Err(SinkError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Sink used when no collector is configured; records only hit the
/// local log.
#[derive(Clone, Default)]
pub struct NullSink;

impl RecordSink for NullSink {
    async fn append(&self, record: serde_json::Value) -> Result<(), SinkError> {
        tracing::debug!(record = %record, "record discarded (no sink configured)");
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Collects appended records in memory.
    #[derive(Clone, Default)]
    pub struct MemorySink {
        pub records: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    impl RecordSink for MemorySink {
        async fn append(&self, record: serde_json::Value) -> Result<(), SinkError> {
            self.records.lock().unwrap().push(record);
            Ok(())
        }
    }

    /// Fails the first `failures` appends, then behaves like MemorySink.
    #[derive(Clone)]
    pub struct FlakySink {
        pub inner: MemorySink,
        pub failures: Arc<AtomicUsize>,
    }

    impl FlakySink {
        pub fn failing_first(n: usize) -> Self {
            Self {
                inner: MemorySink::default(),
                failures: Arc::new(AtomicUsize::new(n)),
            }
        }
    }

    impl RecordSink for FlakySink {
        async fn append(&self, record: serde_json::Value) -> Result<(), SinkError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(SinkError::Rejected(503));
            }
            self.inner.append(record).await
        }
    }
}
