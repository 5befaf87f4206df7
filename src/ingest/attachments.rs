use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{IngestError, Table};

pub(crate) const ATTACHMENT_COLUMNS: usize = 4;

/// An attachment is linked, never uploaded: `reference` points at where the
/// file is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AttachmentRecord {
    pub ticket: u64,
    pub filename: String,
    pub date: Option<DateTime<Utc>>,
    pub author: String,
    pub reference: String,
}

#[derive(Debug, Default)]
pub(crate) struct AttachmentIndex(HashMap<u64, Vec<AttachmentRecord>>);

impl AttachmentIndex {
    pub(crate) fn load(table: &Table, prefix: &str) -> Result<AttachmentIndex, IngestError> {
        let prefix = prefix.trim_end_matches('/');
        let mut index: HashMap<u64, Vec<AttachmentRecord>> = HashMap::new();
        for row in table.rows()? {
            let row = row?;
            let ticket = row.id(1)?;
            let filename = row.text(2).to_string();
            let attachment = AttachmentRecord {
                ticket,
                reference: format!("{prefix}/{ticket}/{filename}"),
                filename,
                date: row.epoch(3)?,
                author: row.trimmed(4),
            };
            index.entry(ticket).or_default().push(attachment);
        }
        tracing::info!(
            tickets = index.len(),
            "read attachments from {}",
            table.path().display()
        );
        Ok(AttachmentIndex(index))
    }

    pub(crate) fn for_ticket(&self, ticket: u64) -> &[AttachmentRecord] {
        self.0.get(&ticket).map(Vec::as_slice).unwrap_or(&[])
    }
}
