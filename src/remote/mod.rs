//! The issue-tracking service the tickets are migrated into.
//!
//! Everything the migration needs from the service goes through
//! [`IssueTracker`]; `github` talks to the real thing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use thiserror::Error;

pub(crate) mod github;

#[cfg(test)]
pub(crate) mod fake;

#[derive(Debug, Error)]
pub(crate) enum RemoteError {
    #[error(transparent)]
    Octocrab(#[from] octocrab::Error),
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Local ticket numbers and remote issue numbers disagree. Continuing would
/// only make the divergence worse.
#[derive(Debug, Error)]
pub(crate) enum IdentitySyncError {
    #[error("issue #{actual} was created for ticket #{expected}")]
    NumberMismatch { expected: u64, actual: u64 },
    #[error("issue #{number} is titled {remote:?} but the ticket summary is {local:?}")]
    TitleMismatch {
        number: u64,
        remote: String,
        local: String,
    },
    #[error("ticket #{id} comes after issue #{last} was already created")]
    OutOfOrder { id: u64, last: u64 },
    #[error("issue #{number} is missing on the remote")]
    MissingRemote { number: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteIssueRef {
    pub number: u64,
    pub title: String,
    pub state: IssueState,
    pub comments: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteMilestoneRef {
    pub number: u64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NewIssue {
    pub title: String,
    pub body: String,
    pub assignee: Option<String>,
    pub milestone: Option<u64>,
    pub labels: Vec<String>,
}

/// The service's own request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RateBudget {
    pub remaining: u64,
    pub reset: DateTime<Utc>,
}

#[allow(async_fn_in_trait)]
pub(crate) trait IssueTracker {
    /// Open and closed issues.
    async fn list_issues(&self) -> Result<Vec<RemoteIssueRef>, RemoteError>;
    /// Open and closed milestones.
    async fn list_milestones(&self) -> Result<Vec<RemoteMilestoneRef>, RemoteError>;
    async fn list_labels(&self) -> Result<Vec<String>, RemoteError>;
    async fn user_exists(&self, handle: &str) -> Result<bool, RemoteError>;
    async fn create_issue(&self, issue: &NewIssue) -> Result<RemoteIssueRef, RemoteError>;
    async fn create_milestone(&self, title: &str) -> Result<RemoteMilestoneRef, RemoteError>;
    async fn create_comment(&self, number: u64, body: &str) -> Result<(), RemoteError>;
    async fn close_issue(&self, number: u64) -> Result<(), RemoteError>;
    async fn rate_budget(&self) -> Result<RateBudget, RemoteError>;
}

impl<T: IssueTracker> IssueTracker for &T {
    async fn list_issues(&self) -> Result<Vec<RemoteIssueRef>, RemoteError> {
        (**self).list_issues().await
    }

    async fn list_milestones(&self) -> Result<Vec<RemoteMilestoneRef>, RemoteError> {
        (**self).list_milestones().await
    }

    async fn list_labels(&self) -> Result<Vec<String>, RemoteError> {
        (**self).list_labels().await
    }

    async fn user_exists(&self, handle: &str) -> Result<bool, RemoteError> {
        (**self).user_exists(handle).await
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<RemoteIssueRef, RemoteError> {
        (**self).create_issue(issue).await
    }

    async fn create_milestone(&self, title: &str) -> Result<RemoteMilestoneRef, RemoteError> {
        (**self).create_milestone(title).await
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<(), RemoteError> {
        (**self).create_comment(number, body).await
    }

    async fn close_issue(&self, number: u64) -> Result<(), RemoteError> {
        (**self).close_issue(number).await
    }

    async fn rate_budget(&self) -> Result<RateBudget, RemoteError> {
        (**self).rate_budget().await
    }
}

/// Remote issues by number.
#[derive(Debug, Clone, Default)]
pub(crate) struct IssueIndex(BTreeMap<u64, RemoteIssueRef>);

impl IssueIndex {
    pub(crate) fn last_number(&self) -> u64 {
        self.0.keys().next_back().copied().unwrap_or(0)
    }

    pub(crate) fn get(&self, number: u64) -> Option<&RemoteIssueRef> {
        self.0.get(&number)
    }

    pub(crate) fn get_mut(&mut self, number: u64) -> Option<&mut RemoteIssueRef> {
        self.0.get_mut(&number)
    }

    pub(crate) fn insert(&mut self, issue: RemoteIssueRef) {
        self.0.insert(issue.number, issue);
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &RemoteIssueRef> {
        self.0.values()
    }
}

/// What the remote looked like when the run started, kept current as the
/// run creates issues and milestones.
#[derive(Debug, Clone, Default)]
pub(crate) struct RemoteSnapshot {
    pub issues: IssueIndex,
    pub milestones: HashMap<String, RemoteMilestoneRef>,
    pub labels: BTreeSet<String>,
}

impl RemoteSnapshot {
    pub(crate) async fn fetch<T: IssueTracker>(tracker: &T) -> Result<RemoteSnapshot, RemoteError> {
        tracing::info!("analyze existing issues, milestones and labels");
        let (issues, milestones, labels) = futures::try_join!(
            tracker.list_issues(),
            tracker.list_milestones(),
            tracker.list_labels()
        )?;
        let mut snapshot = RemoteSnapshot::default();
        for issue in issues {
            tracing::debug!(number = issue.number, state = ?issue.state, "found issue {:?}", issue.title);
            snapshot.issues.insert(issue);
        }
        for milestone in milestones {
            tracing::debug!(number = milestone.number, "found milestone {:?}", milestone.title);
            snapshot.milestones.insert(milestone.title.clone(), milestone);
        }
        snapshot.labels = labels.into_iter().collect();
        tracing::info!(
            issues = snapshot.issues.len(),
            last_issue = snapshot.issues.last_number(),
            milestones = snapshot.milestones.len(),
            labels = snapshot.labels.len(),
            "remote snapshot ready"
        );
        Ok(snapshot)
    }

    pub(crate) fn next_milestone_number(&self) -> u64 {
        self.milestones.values().map(|m| m.number).max().unwrap_or(0) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeTracker;
    use super::*;

    #[tokio::test]
    async fn snapshot_indexes_everything() {
        let tracker = FakeTracker::new()
            .with_issue(1, "one", IssueState::Closed, 2)
            .with_issue(2, "two", IssueState::Open, 0)
            .with_milestone("1.0")
            .with_labels(&["bug", "wontfix"]);
        let snapshot = RemoteSnapshot::fetch(&tracker).await.unwrap();
        assert_eq!(snapshot.issues.last_number(), 2);
        assert_eq!(snapshot.issues.get(1).unwrap().comments, 2);
        assert_eq!(snapshot.milestones["1.0"].number, 1);
        assert_eq!(snapshot.next_milestone_number(), 2);
        assert!(snapshot.labels.contains("wontfix"));
    }

    #[test]
    fn empty_index_has_no_last_number() {
        assert_eq!(IssueIndex::default().last_number(), 0);
    }
}
