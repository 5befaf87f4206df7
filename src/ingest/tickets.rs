use chrono::{DateTime, Utc};

use super::{IngestError, Row, Table};
use crate::compose::PLACEHOLDER_TITLE;
use crate::remote::{IdentitySyncError, IssueIndex, IssueState, RemoteIssueRef};

pub(crate) const TICKET_COLUMNS: usize = 13;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TicketRecord {
    pub id: u64,
    pub kind: String,
    pub owner: String,
    pub reporter: String,
    pub milestone: String,
    pub status: String,
    pub resolution: String,
    pub summary: String,
    pub description: String,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub external_ref: String,
    pub keywords: String,
}

impl TicketRecord {
    fn from_row(row: &Row) -> Result<TicketRecord, IngestError> {
        Ok(TicketRecord {
            id: row.id(1)?,
            kind: row.text(2).to_string(),
            owner: row.trimmed(3),
            reporter: row.trimmed(4),
            milestone: row.trimmed(5),
            status: row.text(6).to_string(),
            resolution: row.text(7).to_string(),
            summary: row.text(8).to_string(),
            description: row.text(9).to_string(),
            created: row.epoch(10)?,
            modified: row.epoch(11)?,
            external_ref: row.trimmed(12),
            keywords: row.text(13).to_string(),
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.status == "closed"
    }
}

/// Ticket records in file order.
pub(crate) fn read_tickets(
    table: &Table,
) -> Result<impl Iterator<Item = Result<TicketRecord, IngestError>>, IngestError> {
    Ok(table
        .rows()?
        .map(|row| row.and_then(|r| TicketRecord::from_row(&r))))
}

/// What has to happen on the remote for one ticket number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TicketEntry {
    /// No ticket with this number was exported; an issue is still needed
    /// so later numbers line up.
    Placeholder { id: u64 },
    /// A placeholder left open by an earlier run that stopped before
    /// closing it.
    OpenPlaceholder { id: u64 },
    Fresh(TicketRecord),
    Resume(TicketRecord, RemoteIssueRef),
}

impl TicketEntry {
    pub(crate) fn id(&self) -> u64 {
        match self {
            TicketEntry::Placeholder { id } | TicketEntry::OpenPlaceholder { id } => *id,
            TicketEntry::Fresh(ticket) | TicketEntry::Resume(ticket, _) => ticket.id,
        }
    }
}

/// Aligns ticket ids with remote issue numbers.
///
/// `boundary` is the highest issue number that existed when the run
/// started. Tickets up to it are resumed, later ones are created, and any
/// gap before a created ticket is filled with placeholders. Existing
/// numbers without a ticket are passed over, except for placeholders that
/// were never closed.
#[derive(Debug, Clone)]
pub(crate) struct TicketSequencer {
    boundary: u64,
    /// Lowest existing number not yet passed.
    cursor: u64,
}

impl TicketSequencer {
    pub(crate) fn new(issues: &IssueIndex) -> TicketSequencer {
        TicketSequencer {
            boundary: issues.last_number(),
            cursor: 1,
        }
    }

    pub(crate) fn admit(
        &mut self,
        ticket: TicketRecord,
        issues: &IssueIndex,
    ) -> Result<Vec<TicketEntry>, IdentitySyncError> {
        let mut entries: Vec<TicketEntry> = (self.cursor..ticket.id.min(self.boundary + 1))
            .filter(|&id| {
                issues
                    .get(id)
                    .is_some_and(|i| i.title == PLACEHOLDER_TITLE && i.state == IssueState::Open)
            })
            .map(|id| TicketEntry::OpenPlaceholder { id })
            .collect();
        self.cursor = self.cursor.max(ticket.id + 1);
        if ticket.id <= self.boundary {
            let remote = issues
                .get(ticket.id)
                .ok_or(IdentitySyncError::MissingRemote { number: ticket.id })?;
            if remote.title != ticket.summary {
                return Err(IdentitySyncError::TitleMismatch {
                    number: ticket.id,
                    remote: remote.title.clone(),
                    local: ticket.summary,
                });
            }
            entries.push(TicketEntry::Resume(ticket, remote.clone()));
            return Ok(entries);
        }
        let last = issues.last_number();
        if ticket.id <= last {
            return Err(IdentitySyncError::OutOfOrder {
                id: ticket.id,
                last,
            });
        }
        entries.extend((last + 1..ticket.id).map(|id| TicketEntry::Placeholder { id }));
        entries.push(TicketEntry::Fresh(ticket));
        Ok(entries)
    }
}
