//! One migration run, from the exported tables to the remote.

use std::future::Future;

use thiserror::Error;

use crate::compose::{Composer, MarkupConverter};
use crate::config::MigrationConfig;
use crate::engine::{Engine, EngineError, EngineParts, Mode};
use crate::ingest::attachments::{AttachmentIndex, ATTACHMENT_COLUMNS};
use crate::ingest::comments::{CommentLog, COMMENT_COLUMNS};
use crate::ingest::tickets::{read_tickets, TicketSequencer, TICKET_COLUMNS};
use crate::ingest::{IngestError, Table};
use crate::mapping::actors::ActorMapper;
use crate::mapping::labels::LabelClassifier;
use crate::mapping::{ConfigurationError, ResolveError};
use crate::pacing::Gate;
use crate::remote::{IdentitySyncError, IssueTracker, RemoteError};

#[derive(Debug, Error)]
pub(crate) enum MigrationError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    IdentitySync(#[from] IdentitySyncError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("interrupted")]
    Interrupted,
}

impl From<ResolveError> for MigrationError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Configuration(e) => MigrationError::Configuration(e),
            ResolveError::Remote(e) => MigrationError::Remote(e),
        }
    }
}

impl From<EngineError> for MigrationError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Remote(e) => MigrationError::Remote(e),
            EngineError::Configuration(e) => MigrationError::Configuration(e),
            EngineError::IdentitySync(e) => MigrationError::IdentitySync(e),
        }
    }
}

/// What a run did, reported however it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunTotals {
    /// Tickets fully reconciled.
    pub tickets: u64,
    pub placeholders: u64,
    pub issues_created: u64,
    /// Issues created, or that would have been in a dry run.
    pub issues_planned: u64,
    /// Mutating calls that reached the remote.
    pub mutating_calls: u64,
    pub planned_calls: u64,
}

impl RunTotals {
    fn report(&self, mode: Mode) {
        tracing::info!(
            tickets = self.tickets,
            placeholders = self.placeholders,
            "total issues created: {}",
            self.issues_created
        );
        tracing::info!("total content creations: {}", self.mutating_calls);
        if mode == Mode::DryRun {
            tracing::info!(
                "dry run: {} issues and {} mutating calls were planned",
                self.issues_planned,
                self.planned_calls
            );
        }
    }
}

#[derive(Debug, Error)]
#[error("migration stopped after {} issues and {} mutating calls: {source}", .totals.issues_created, .totals.mutating_calls)]
pub(crate) struct Aborted {
    pub totals: RunTotals,
    pub source: MigrationError,
}

/// Runs the migration until every ticket is reconciled, an error occurs or
/// `interrupt` completes. The totals are logged in every case.
pub(crate) async fn run<T, I>(
    tracker: T,
    config: &MigrationConfig,
    markup: Box<dyn MarkupConverter>,
    interrupt: I,
) -> Result<RunTotals, Aborted>
where
    T: IssueTracker,
    I: Future<Output = ()>,
{
    let mode = if config.commit {
        Mode::Commit
    } else {
        Mode::DryRun
    };
    let mut gate = Gate::new(tracker, &config.pacing);
    let mut totals = RunTotals::default();
    let outcome = tokio::select! {
        result = drive(&mut gate, &mut totals, config, markup, mode) => result,
        () = interrupt => {
            tracing::warn!("interrupted, stopping");
            Err(MigrationError::Interrupted)
        }
    };
    totals.mutating_calls = gate.dispatched();
    totals.report(mode);
    match outcome {
        Ok(()) => Ok(totals),
        Err(source) => Err(Aborted { totals, source }),
    }
}

async fn drive<T: IssueTracker>(
    gate: &mut Gate<T>,
    totals: &mut RunTotals,
    config: &MigrationConfig,
    markup: Box<dyn MarkupConverter>,
    mode: Mode,
) -> Result<(), MigrationError> {
    if mode == Mode::DryRun {
        tracing::warn!("dry run: nothing is changed on {} unless --commit is given", config.repo);
    }

    let tickets = Table::new(&config.tickets, TICKET_COLUMNS, config.encoding);
    let mut count = 0usize;
    for ticket in read_tickets(&tickets)? {
        ticket?;
        count += 1;
    }
    tracing::info!("read {} tickets from {}", count, tickets.path().display());

    let comments = match &config.comments {
        Some(path) => CommentLog::load(&Table::new(path, COMMENT_COLUMNS, config.encoding))?,
        None => CommentLog::default(),
    };
    let attachments = match (&config.attachments, &config.attachments_prefix) {
        (Some(path), Some(prefix)) => AttachmentIndex::load(
            &Table::new(path, ATTACHMENT_COLUMNS, config.encoding),
            prefix,
        )?,
        (Some(_), None) => return Err(ConfigurationError::MissingAttachmentsPrefix.into()),
        (None, _) => AttachmentIndex::default(),
    };

    let snapshot = gate.snapshot().await?;
    let actors = ActorMapper::build(&config.users, gate).await?;
    let labels = LabelClassifier::build(
        config.labels.as_deref(),
        config.keywords.as_deref(),
        &snapshot.labels,
    )?;
    let mut sequencer = TicketSequencer::new(&snapshot.issues);

    let mut engine = Engine::new(
        gate,
        totals,
        EngineParts {
            snapshot,
            actors,
            labels,
            comments,
            attachments,
            composer: Composer::new(markup, config.external_ref_url.clone()),
            mode,
        },
    );
    for ticket in read_tickets(&tickets)? {
        for entry in sequencer.admit(ticket?, engine.issues())? {
            engine.reconcile(entry).await?;
        }
    }
    Ok(())
}
