//! Record store abstraction: where completed receipts are written.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::dialogue::StepId;

/// Column headers of the metadata cells written before the receipt fields
pub const METADATA_COLUMNS: [&str; 2] = ["submitted_at", "chat_id"];

/// A completed receipt, fields in conversation order
#[derive(Clone, Debug, PartialEq)]
pub struct ReceiptRecord {
    pub chat_id: i64,
    pub submitted_at: DateTime<Utc>,
    pub fields: Vec<(StepId, String)>,
}

impl ReceiptRecord {
    /// Value collected for `step`, if any
    pub fn get(&self, step: StepId) -> Option<&str> {
        self.fields
            .iter()
            .find(|(id, _)| *id == step)
            .map(|(_, value)| value.as_str())
    }

    /// Cells of the spreadsheet row for this record
    pub fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(METADATA_COLUMNS.len() + self.fields.len());
        row.push(self.submitted_at.format("%Y-%m-%d %H:%M:%S").to_string());
        row.push(self.chat_id.to_string());
        row.extend(self.fields.iter().map(|(_, value)| value.clone()));
        row
    }
}

/// Destination of completed receipts
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append one completed receipt
    async fn append_record(&self, record: &ReceiptRecord) -> Result<()>;
}
