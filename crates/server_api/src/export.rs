use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use shared::{domain::OrderId, protocol::OrderDetails};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to encode order {order_id}: {source}")]
    Encode {
        order_id: i64,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write order export '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Durable destination for finished-order documents.
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Stores `document` as the artifact of `order_id`, replacing any previous one.
    async fn write(&self, order_id: OrderId, document: &[u8]) -> Result<PathBuf, ExportError>;
}

/// Writes `<root>/<order_id>.json`.
#[derive(Debug, Clone)]
pub struct FolderSink {
    root: PathBuf,
}

impl FolderSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, order_id: OrderId) -> PathBuf {
        self.root.join(export_file_name(order_id))
    }
}

#[async_trait]
impl ExportSink for FolderSink {
    async fn write(&self, order_id: OrderId, document: &[u8]) -> Result<PathBuf, ExportError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ExportError::Write {
                path: self.root.clone(),
                source,
            })?;
        let path = self.path_for(order_id);
        tokio::fs::write(&path, document)
            .await
            .map_err(|source| ExportError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}

#[derive(Debug, Clone)]
pub struct ExportedOrder {
    pub path: PathBuf,
    pub file_name: String,
    pub document: Vec<u8>,
    pub details: OrderDetails,
}

pub fn export_file_name(order_id: OrderId) -> String {
    format!("{}.json", order_id.0)
}

/// Pretty JSON with four-space indentation; non-ASCII text is kept as is.
pub fn encode_details(details: &OrderDetails) -> Result<Vec<u8>, ExportError> {
    let mut document = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut document, formatter);
    details
        .serialize(&mut serializer)
        .map_err(|source| ExportError::Encode {
            order_id: details.order_id.0,
            source,
        })?;
    Ok(document)
}

#[cfg(test)]
#[path = "tests/export_tests.rs"]
mod tests;
