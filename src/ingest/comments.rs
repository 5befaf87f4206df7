use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{IngestError, Row, Table};

pub(crate) const COMMENT_COLUMNS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommentKind {
    Comment,
    StatusChange,
}

impl CommentKind {
    pub(crate) fn describe(self) -> &'static str {
        match self {
            CommentKind::Comment => "comment",
            CommentKind::StatusChange => "status change",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommentRecord {
    pub ticket: u64,
    pub date: Option<DateTime<Utc>>,
    pub author: String,
    pub kind: CommentKind,
    pub body: String,
}

impl CommentRecord {
    fn from_row(row: &Row) -> Result<CommentRecord, IngestError> {
        let kind = match row.text(4).trim() {
            "comment" => CommentKind::Comment,
            "status" => CommentKind::StatusChange,
            _ => return Err(row.bad_field(4, "must be \"comment\" or \"status\"")),
        };
        Ok(CommentRecord {
            ticket: row.id(1)?,
            date: row.epoch(2)?,
            author: row.trimmed(3),
            kind,
            body: row.text(5).to_string(),
        })
    }
}

/// Comments grouped by ticket, each group in file order.
#[derive(Debug, Default)]
pub(crate) struct CommentLog(HashMap<u64, Vec<CommentRecord>>);

impl CommentLog {
    pub(crate) fn load(table: &Table) -> Result<CommentLog, IngestError> {
        let mut log: HashMap<u64, Vec<CommentRecord>> = HashMap::new();
        for row in table.rows()? {
            let comment = CommentRecord::from_row(&row?)?;
            tracing::debug!(ticket = comment.ticket, author = %comment.author, "read comment");
            log.entry(comment.ticket).or_default().push(comment);
        }
        tracing::info!(
            tickets = log.len(),
            "read ticket comments from {}",
            table.path().display()
        );
        Ok(CommentLog(log))
    }

    pub(crate) fn for_ticket(&self, ticket: u64) -> &[CommentRecord] {
        self.0.get(&ticket).map(Vec::as_slice).unwrap_or(&[])
    }

    #[cfg(test)]
    pub(crate) fn push(&mut self, comment: CommentRecord) {
        self.0.entry(comment.ticket).or_default().push(comment);
    }
}
