//! Issue and comment text.
//!
//! GitHub records the migrating account as author and the migration time
//! as creation time, so the original author and dates are written into the
//! text itself.

use chrono::{DateTime, Utc};

use crate::ingest::attachments::AttachmentRecord;
use crate::ingest::comments::{CommentKind, CommentRecord};
use crate::ingest::tickets::TicketRecord;

pub(crate) const PLACEHOLDER_TITLE: &str = "placeholder";
pub(crate) const PLACEHOLDER_BODY: &str = "_trac conversion placeholder (no such trac ticket)_";

const TIMESTAMP_FORMAT: &str = "%b %-d, %Y, %-I:%M:%S %p";
const SEPARATOR: &str = "\n***\n";

/// Turns Trac wiki markup into GitHub markdown.
pub(crate) trait MarkupConverter {
    fn convert(&self, text: &str, ticket: u64) -> String;
}

/// Leaves markup as it is.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Verbatim;

impl MarkupConverter for Verbatim {
    fn convert(&self, text: &str, _ticket: u64) -> String {
        text.to_string()
    }
}

pub(crate) fn format_timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

pub(crate) struct Composer {
    markup: Box<dyn MarkupConverter>,
    external_ref_url: Option<String>,
}

impl Composer {
    pub(crate) fn new(markup: Box<dyn MarkupConverter>, external_ref_url: Option<String>) -> Composer {
        Composer {
            markup,
            external_ref_url,
        }
    }

    fn external_ref(&self, ticket: &TicketRecord) -> String {
        if ticket.external_ref.is_empty() {
            return String::new();
        }
        match &self.external_ref_url {
            Some(template) => format!(
                "\nExternal reference: [{0}]({1})",
                ticket.external_ref,
                template.replace("{id}", &ticket.external_ref)
            ),
            None => format!("\nExternal reference: {}", ticket.external_ref),
        }
    }

    /// Provenance header, description, then the attachment links.
    pub(crate) fn issue_body(&self, ticket: &TicketRecord, attachments: &[AttachmentRecord]) -> String {
        let mut description = self.markup.convert(&ticket.description, ticket.id);
        if !description.is_empty() && !ticket.reporter.is_empty() && ticket.reporter != ticket.owner {
            description = format!("_by {}:_\n{}", ticket.reporter, description);
        }
        let mut body = format!(
            "_Imported from trac ticket {id}.\n\
             Created by **{reporter}**\n\
             Opened in trac: {created}\n\
             Last modified in trac: {modified}{external}_",
            id = ticket.id,
            reporter = ticket.reporter,
            created = format_timestamp(ticket.created),
            modified = format_timestamp(ticket.modified),
            external = self.external_ref(ticket),
        );
        body.push_str(SEPARATOR);
        body.push_str(&description);
        if !attachments.is_empty() {
            body.push_str(SEPARATOR);
            for attachment in attachments {
                body.push_str(&format!(
                    "* {} attached [{}]({}) on {}\n",
                    attachment.author,
                    attachment.filename,
                    attachment.reference.replace(' ', "%20"),
                    format_timestamp(attachment.date)
                ));
            }
        }
        body
    }

    pub(crate) fn comment_body(&self, comment: &CommentRecord) -> String {
        let author = if comment.author.is_empty() {
            String::new()
        } else {
            format!("**{}** ", comment.author)
        };
        let (padding, text) = match comment.kind {
            CommentKind::Comment => ("\n\n", self.markup.convert(&comment.body, comment.ticket)),
            CommentKind::StatusChange => (" ", format!("**{}**", comment.body)),
        };
        format!(
            "_{author}trac {kind} on {date}:_{padding}{text}",
            kind = comment.kind.describe(),
            date = format_timestamp(comment.date),
        )
    }
}
