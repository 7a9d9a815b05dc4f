//! In-memory retained-message store.
//!
//! Suitable for development, testing, and single-node deployments where
//! persistence across restarts is not required.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use kindling_core::message::Message;

use crate::{Result, RetainedMessageStore, StorageError};

/// Thread-safe in-memory retained-message store. All data is lost on restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    retained: Arc<RwLock<HashMap<String, Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetainedMessageStore for MemoryStore {
    async fn store_retained(&self, topic: &str, message: Option<Message>) -> Result<()> {
        let mut retained = self
            .retained
            .write()
            .map_err(|e| StorageError::OperationFailed(e.to_string()))?;

        match message {
            Some(msg) => {
                retained.insert(topic.to_string(), msg);
            }
            None => {
                retained.remove(topic);
            }
        }
        Ok(())
    }

    async fn get_retained(&self, topic_filter: &str) -> Result<Vec<Message>> {
        let retained = self
            .retained
            .read()
            .map_err(|e| StorageError::OperationFailed(e.to_string()))?;

        let filter_parts: Vec<&str> = topic_filter.split('/').collect();
        let messages: Vec<Message> = retained
            .iter()
            .filter(|(topic, _)| topic_matches_filter(topic, &filter_parts))
            .map(|(_, msg)| msg.clone())
            .collect();

        Ok(messages)
    }

    async fn clear_all_retained(&self) -> Result<()> {
        let mut retained = self
            .retained
            .write()
            .map_err(|e| StorageError::OperationFailed(e.to_string()))?;
        retained.clear();
        Ok(())
    }
}

/// Checks if a topic matches a filter, honoring `+` and `#` wildcards.
fn topic_matches_filter(topic: &str, filter_parts: &[&str]) -> bool {
    let topic_parts: Vec<&str> = topic.split('/').collect();
    let mut topic_idx = 0;
    let mut filter_idx = 0;

    while filter_idx < filter_parts.len() {
        let filter_part = filter_parts[filter_idx];

        if filter_part == "#" {
            return true;
        }

        if topic_idx >= topic_parts.len() {
            return false;
        }

        if filter_part != "+" && filter_part != topic_parts[topic_idx] {
            return false;
        }

        topic_idx += 1;
        filter_idx += 1;
    }

    topic_idx == topic_parts.len()
}
