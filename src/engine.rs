//! Reconciles one ticket at a time with the remote.
//!
//! Each ticket walks a small state machine:
//!
//! ```text
//! PlaceholderCreate ─────────────────────────────────────────────▶ Done
//! PlaceholderClose ──────────────────────────────────────────────▶ Done
//! FreshCreate ─┬─▶ CommentSync ─▶ CloseIfNeeded ─▶ Done
//! Resume ──────┘
//! ```
//!
//! The comment count already on the remote issue is the resume cursor: only
//! comments past it are posted, so an interrupted run can simply be
//! started again.

use thiserror::Error;

use crate::compose::{Composer, PLACEHOLDER_BODY, PLACEHOLDER_TITLE};
use crate::ingest::attachments::AttachmentIndex;
use crate::ingest::comments::CommentLog;
use crate::ingest::tickets::{TicketEntry, TicketRecord};
use crate::mapping::actors::ActorMapper;
use crate::mapping::labels::LabelClassifier;
use crate::mapping::{ConfigurationError, ResolveError};
use crate::migrate::RunTotals;
use crate::pacing::Gate;
use crate::remote::{
    IdentitySyncError, IssueIndex, IssueState, IssueTracker, NewIssue, RemoteError,
    RemoteIssueRef, RemoteMilestoneRef, RemoteSnapshot,
};

#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    IdentitySync(#[from] IdentitySyncError),
}

impl From<ResolveError> for EngineError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::Configuration(e) => EngineError::Configuration(e),
            ResolveError::Remote(e) => EngineError::Remote(e),
        }
    }
}

/// Whether mutating calls are sent or only planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Commit,
    DryRun,
}

#[derive(Debug)]
enum Step {
    PlaceholderCreate(u64),
    PlaceholderClose(u64),
    FreshCreate(TicketRecord),
    Resume(TicketRecord, RemoteIssueRef),
    CommentSync(TicketRecord, u64),
    CloseIfNeeded(TicketRecord, u64),
    Done,
}

impl From<TicketEntry> for Step {
    fn from(entry: TicketEntry) -> Self {
        match entry {
            TicketEntry::Placeholder { id } => Step::PlaceholderCreate(id),
            TicketEntry::OpenPlaceholder { id } => Step::PlaceholderClose(id),
            TicketEntry::Fresh(ticket) => Step::FreshCreate(ticket),
            TicketEntry::Resume(ticket, remote) => Step::Resume(ticket, remote),
        }
    }
}

/// Everything the engine reads while reconciling.
pub(crate) struct EngineParts {
    pub snapshot: RemoteSnapshot,
    pub actors: ActorMapper,
    pub labels: LabelClassifier,
    pub comments: CommentLog,
    pub attachments: AttachmentIndex,
    pub composer: Composer,
    pub mode: Mode,
}

pub(crate) struct Engine<'a, T> {
    gate: &'a mut Gate<T>,
    totals: &'a mut RunTotals,
    snapshot: RemoteSnapshot,
    actors: ActorMapper,
    labels: LabelClassifier,
    comments: CommentLog,
    attachments: AttachmentIndex,
    composer: Composer,
    mode: Mode,
}

fn shortened(text: &str) -> String {
    let threshold = if tracing::enabled!(tracing::Level::DEBUG) {
        100
    } else {
        30
    };
    if text.chars().count() > threshold {
        let mut short: String = text.chars().take(threshold).collect();
        short.push_str("...");
        short
    } else {
        text.to_string()
    }
}

impl<'a, T: IssueTracker> Engine<'a, T> {
    pub(crate) fn new(gate: &'a mut Gate<T>, totals: &'a mut RunTotals, parts: EngineParts) -> Self {
        Engine {
            gate,
            totals,
            snapshot: parts.snapshot,
            actors: parts.actors,
            labels: parts.labels,
            comments: parts.comments,
            attachments: parts.attachments,
            composer: parts.composer,
            mode: parts.mode,
        }
    }

    /// Issues as known so far, including the ones this run created.
    pub(crate) fn issues(&self) -> &IssueIndex {
        &self.snapshot.issues
    }

    pub(crate) async fn reconcile(&mut self, entry: TicketEntry) -> Result<(), EngineError> {
        tracing::debug!(ticket = entry.id(), "reconcile");
        let mut step = Step::from(entry);
        loop {
            step = match step {
                Step::PlaceholderCreate(id) => {
                    self.create_placeholder(id).await?;
                    self.totals.placeholders += 1;
                    Step::Done
                }
                Step::PlaceholderClose(id) => {
                    tracing::info!("close placeholder #{id} left open by an earlier run");
                    self.close(id).await?;
                    Step::Done
                }
                Step::FreshCreate(ticket) => {
                    let number = self.create_fresh(&ticket).await?;
                    Step::CommentSync(ticket, number)
                }
                Step::Resume(ticket, remote) => {
                    tracing::info!(
                        "continuing ticket #{}: {}",
                        ticket.id,
                        shortened(&ticket.summary)
                    );
                    Step::CommentSync(ticket, remote.number)
                }
                Step::CommentSync(ticket, number) => {
                    self.sync_comments(&ticket, number).await?;
                    Step::CloseIfNeeded(ticket, number)
                }
                Step::CloseIfNeeded(ticket, number) => {
                    if ticket.is_closed() {
                        self.close(number).await?;
                    }
                    self.totals.tickets += 1;
                    Step::Done
                }
                Step::Done => return Ok(()),
            };
        }
    }

    async fn create_placeholder(&mut self, id: u64) -> Result<(), EngineError> {
        tracing::info!("create placeholder for missing ticket #{id}");
        let issue = NewIssue {
            title: PLACEHOLDER_TITLE.to_string(),
            body: PLACEHOLDER_BODY.to_string(),
            assignee: None,
            milestone: None,
            labels: Vec::new(),
        };
        let created = self.create_issue(issue).await?;
        self.adopt(id, created)?;
        self.close(id).await
    }

    async fn create_fresh(&mut self, ticket: &TicketRecord) -> Result<u64, EngineError> {
        tracing::info!("convert ticket #{}: {}", ticket.id, shortened(&ticket.summary));
        let assignee = self.actors.resolve(&ticket.owner, &mut *self.gate).await?;
        let milestone = if ticket.milestone.is_empty() {
            None
        } else {
            Some(self.milestone(&ticket.milestone).await?)
        };
        let labels = self.labels.classify(ticket);
        let attachments = self.attachments.for_ticket(ticket.id);
        for attachment in attachments {
            tracing::info!("  added attachment from {}", attachment.author);
        }
        let body = self.composer.issue_body(ticket, attachments);
        let created = self
            .create_issue(NewIssue {
                title: ticket.summary.clone(),
                body,
                assignee: assignee.clone(),
                milestone,
                labels,
            })
            .await?;
        tracing::info!(
            "  issue #{}: owner={}-->{}; milestone={} ({})",
            created.number,
            ticket.owner,
            assignee.unwrap_or_default(),
            ticket.milestone,
            milestone.unwrap_or(0)
        );
        self.adopt(ticket.id, created)?;
        Ok(ticket.id)
    }

    async fn create_issue(&mut self, issue: NewIssue) -> Result<RemoteIssueRef, EngineError> {
        self.totals.planned_calls += 1;
        self.totals.issues_planned += 1;
        match self.mode {
            Mode::Commit => {
                let created = self.gate.create_issue(&issue).await?;
                self.totals.issues_created += 1;
                Ok(created)
            }
            Mode::DryRun => Ok(RemoteIssueRef {
                number: self.snapshot.issues.last_number() + 1,
                title: issue.title,
                state: IssueState::Open,
                comments: 0,
            }),
        }
    }

    /// Records a created issue, provided the remote gave it the ticket's
    /// number.
    fn adopt(&mut self, expected: u64, created: RemoteIssueRef) -> Result<(), IdentitySyncError> {
        if created.number != expected {
            return Err(IdentitySyncError::NumberMismatch {
                expected,
                actual: created.number,
            });
        }
        self.snapshot.issues.insert(created);
        Ok(())
    }

    async fn milestone(&mut self, title: &str) -> Result<u64, EngineError> {
        if let Some(existing) = self.snapshot.milestones.get(title) {
            return Ok(existing.number);
        }
        self.totals.planned_calls += 1;
        let created = match self.mode {
            Mode::Commit => self.gate.create_milestone(title).await?,
            Mode::DryRun => RemoteMilestoneRef {
                number: self.snapshot.next_milestone_number(),
                title: title.to_string(),
            },
        };
        tracing::info!("add milestone: {title}");
        let number = created.number;
        self.snapshot.milestones.insert(title.to_string(), created);
        Ok(number)
    }

    async fn sync_comments(&mut self, ticket: &TicketRecord, number: u64) -> Result<(), EngineError> {
        let posted = self
            .snapshot
            .issues
            .get(number)
            .ok_or(IdentitySyncError::MissingRemote { number })?
            .comments;
        let pending: Vec<(String, String)> = self
            .comments
            .for_ticket(ticket.id)
            .iter()
            .skip(posted)
            .map(|c| (c.author.clone(), self.composer.comment_body(c)))
            .collect();
        for (author, body) in pending {
            self.totals.planned_calls += 1;
            if self.mode == Mode::Commit {
                self.gate.create_comment(number, &body).await?;
            }
            tracing::info!("  add comment by {}: {:?}", author, shortened(&body));
            if let Some(issue) = self.snapshot.issues.get_mut(number) {
                issue.comments += 1;
            }
        }
        Ok(())
    }

    async fn close(&mut self, number: u64) -> Result<(), EngineError> {
        let issue = self
            .snapshot
            .issues
            .get(number)
            .ok_or(IdentitySyncError::MissingRemote { number })?;
        if issue.state == IssueState::Closed {
            return Ok(());
        }
        tracing::info!("  close issue #{number}");
        self.totals.planned_calls += 1;
        if self.mode == Mode::Commit {
            self.gate.close_issue(number).await?;
        }
        if let Some(issue) = self.snapshot.issues.get_mut(number) {
            issue.state = IssueState::Closed;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::Verbatim;
    use crate::ingest::comments::{CommentKind, CommentRecord};
    use crate::ingest::tickets::testing::ticket;
    use crate::ingest::tickets::TicketSequencer;
    use crate::pacing::PacingLimits;
    use crate::remote::fake::FakeTracker;

    async fn parts(gate: &mut Gate<FakeTracker>, mode: Mode, comments: CommentLog) -> EngineParts {
        let snapshot = gate.snapshot().await.unwrap();
        EngineParts {
            snapshot,
            actors: ActorMapper::parse("*: *").unwrap(),
            labels: LabelClassifier::default(),
            comments,
            attachments: AttachmentIndex::default(),
            composer: Composer::new(Box::new(Verbatim), None),
            mode,
        }
    }

    fn comment_log(ticket: u64, bodies: &[&str]) -> CommentLog {
        let mut log = CommentLog::default();
        for body in bodies {
            log.push(CommentRecord {
                ticket,
                date: None,
                author: "alice".to_string(),
                kind: CommentKind::Comment,
                body: body.to_string(),
            });
        }
        log
    }

    async fn run(engine: &mut Engine<'_, FakeTracker>, tickets: Vec<TicketRecord>) -> Result<(), EngineError> {
        let mut sequencer = TicketSequencer::new(engine.issues());
        for t in tickets {
            for entry in sequencer.admit(t, engine.issues())? {
                engine.reconcile(entry).await?;
            }
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_is_created_closed_and_bare() {
        let mut gate = Gate::new(FakeTracker::new(), &PacingLimits::default());
        let mut totals = RunTotals::default();
        let parts = parts(&mut gate, Mode::Commit, CommentLog::default()).await;
        let mut engine = Engine::new(&mut gate, &mut totals, parts);
        engine.reconcile(TicketEntry::Placeholder { id: 1 }).await.unwrap();
        drop(engine);
        let issue = gate.tracker().issue(1).unwrap();
        assert_eq!(issue.title, PLACEHOLDER_TITLE);
        assert_eq!(issue.state, IssueState::Closed);
        let created = gate.tracker().created();
        assert_eq!(created[0].assignee, None);
        assert!(created[0].labels.is_empty());
        assert_eq!(totals.placeholders, 1);
        assert_eq!(gate.dispatched(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn mismatched_number_aborts() {
        let mut gate = Gate::new(FakeTracker::new().skipping_next_number(), &PacingLimits::default());
        let mut totals = RunTotals::default();
        let parts = parts(&mut gate, Mode::Commit, comment_log(1, &["hello"])).await;
        let mut engine = Engine::new(&mut gate, &mut totals, parts);
        let err = run(&mut engine, vec![ticket(1, "one"), ticket(2, "two")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::IdentitySync(IdentitySyncError::NumberMismatch { expected: 1, actual: 2 })
        ));
        drop(engine);
        // nothing happens after the mismatch: no comment, no second issue
        assert_eq!(gate.tracker().mutations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_user_lookup_is_a_remote_failure() {
        let mut gate = Gate::new(FakeTracker::new().failing_user_lookups(), &PacingLimits::default());
        let mut totals = RunTotals::default();
        let parts = parts(&mut gate, Mode::Commit, CommentLog::default()).await;
        let mut engine = Engine::new(&mut gate, &mut totals, parts);
        let mut one = ticket(1, "one");
        one.owner = "alice".to_string();
        let err = run(&mut engine, vec![one]).await.unwrap_err();
        assert!(matches!(err, EngineError::Remote(_)), "{err}");
        drop(engine);
        assert_eq!(gate.tracker().mutations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_posts_only_missing_comments() {
        let tracker = FakeTracker::new().with_issue(1, "one", IssueState::Open, 2);
        let mut gate = Gate::new(tracker, &PacingLimits::default());
        let mut totals = RunTotals::default();
        let parts = parts(&mut gate, Mode::Commit, comment_log(1, &["a", "b", "c", "d"])).await;
        let mut engine = Engine::new(&mut gate, &mut totals, parts);
        let mut one = ticket(1, "one");
        one.status = "closed".to_string();
        run(&mut engine, vec![one]).await.unwrap();
        drop(engine);
        let comments = gate.tracker().comments(1);
        assert_eq!(comments.len(), 2);
        assert!(comments[0].ends_with("\n\nc"));
        assert!(comments[1].ends_with("\n\nd"));
        assert_eq!(gate.tracker().issue(1).unwrap().state, IssueState::Closed);
        assert_eq!(totals.issues_created, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn milestones_are_reused_by_title_and_created_once() {
        let tracker = FakeTracker::new().with_milestone("1.0");
        let mut gate = Gate::new(tracker, &PacingLimits::default());
        let mut totals = RunTotals::default();
        let parts = parts(&mut gate, Mode::Commit, CommentLog::default()).await;
        let mut engine = Engine::new(&mut gate, &mut totals, parts);
        let mut tickets = Vec::new();
        for (id, milestone) in [(1, "1.0"), (2, "2.0"), (3, "2.0")] {
            let mut t = ticket(id, "t");
            t.milestone = milestone.to_string();
            tickets.push(t);
        }
        run(&mut engine, tickets).await.unwrap();
        drop(engine);
        assert_eq!(gate.tracker().milestone_titles(), vec!["1.0", "2.0"]);
        let milestones: Vec<Option<u64>> =
            gate.tracker().created().iter().map(|i| i.milestone).collect();
        assert_eq!(milestones, vec![Some(1), Some(2), Some(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_plans_without_mutating() {
        let tracker = FakeTracker::new().with_issue(1, "one", IssueState::Open, 0);
        let mut gate = Gate::new(tracker, &PacingLimits::default());
        let mut totals = RunTotals::default();
        let parts = parts(&mut gate, Mode::DryRun, comment_log(4, &["x"])).await;
        let mut engine = Engine::new(&mut gate, &mut totals, parts);
        let mut four = ticket(4, "four");
        four.milestone = "later".to_string();
        four.status = "closed".to_string();
        run(&mut engine, vec![four]).await.unwrap();
        assert_eq!(engine.issues().last_number(), 4);
        drop(engine);
        assert_eq!(gate.tracker().mutations(), 0);
        assert_eq!(gate.dispatched(), 0);
        assert_eq!(totals.issues_created, 0);
        assert_eq!(totals.issues_planned, 3);
        assert_eq!(totals.placeholders, 2);
        // 3 issues, 3 closes, milestone, comment
        assert_eq!(totals.planned_calls, 8);
    }
}
