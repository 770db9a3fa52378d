//! Local broker for functional testing without a real MQTT endpoint

use super::{Broker, BrokerError};
use crate::reading::Reading;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// Publications kept in memory; older ones remain only in the log file
pub const MAX_PUBLICATION_HISTORY: usize = 1_000;

/// One publication accepted by the [`TestBroker`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Publication {
    pub topic: String,
    pub reading: Reading,
}

/// Broker that always connects and logs every publication.
///
/// With a log file configured, each publication is appended as one JSON line.
/// The in-memory history keeps the last [`MAX_PUBLICATION_HISTORY`] entries.
#[derive(Debug, Default)]
pub struct TestBroker {
    log_file: Option<PathBuf>,
    connected: AtomicBool,
    published: Arc<Mutex<VecDeque<Publication>>>,
}

impl TestBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            log_file: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    /// Recent publications, oldest first
    pub async fn published(&self) -> Vec<Publication> {
        self.published.lock().await.iter().cloned().collect()
    }

    async fn append_to_log(&self, path: &Path, publication: &Publication) -> Result<(), BrokerError> {
        let mut line = serde_json::to_vec(publication)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl Broker for TestBroker {
    type Error = BrokerError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        self.connected.store(true, Ordering::SeqCst);
        info!(log_file = ?self.log_file, "Test broker connected");
        Ok(())
    }

    async fn publish(&self, topic: &str, reading: &Reading) -> Result<(), Self::Error> {
        let publication = Publication {
            topic: topic.to_string(),
            reading: reading.clone(),
        };

        if let Some(path) = &self.log_file {
            self.append_to_log(path, &publication).await?;
        }

        info!(topic, reading = %serde_json::Value::from(reading.clone()), "Test broker publication");
        let mut published = self.published.lock().await;
        if published.len() == MAX_PUBLICATION_HISTORY {
            published.pop_front();
        }
        published.push_back(publication);
        Ok(())
    }

    fn id(&self) -> &'static str {
        "test"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
