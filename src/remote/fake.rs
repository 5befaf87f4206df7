//! In-memory tracker that numbers issues the way the real service does.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{Duration, Utc};

use super::{
    IssueState, IssueTracker, NewIssue, RateBudget, RemoteError, RemoteIssueRef,
    RemoteMilestoneRef,
};

#[derive(Debug, Default)]
struct State {
    issues: BTreeMap<u64, RemoteIssueRef>,
    milestones: Vec<RemoteMilestoneRef>,
    labels: Vec<String>,
    users: HashSet<String>,
    created: Vec<NewIssue>,
    comments: BTreeMap<u64, Vec<String>>,
    mutations: usize,
    user_lookups: usize,
    budgets: VecDeque<RateBudget>,
    fail_after: Option<usize>,
    fail_lookups: bool,
    skip_number: bool,
    budget_queries: usize,
}

#[derive(Debug, Default)]
pub(crate) struct FakeTracker {
    state: Mutex<State>,
}

impl FakeTracker {
    pub(crate) fn new() -> FakeTracker {
        FakeTracker::default()
    }

    pub(crate) fn with_issue(self, number: u64, title: &str, state: IssueState, comments: usize) -> Self {
        self.state.lock().unwrap().issues.insert(
            number,
            RemoteIssueRef {
                number,
                title: title.to_string(),
                state,
                comments,
            },
        );
        self
    }

    pub(crate) fn with_milestone(self, title: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let number = state.milestones.len() as u64 + 1;
            state.milestones.push(RemoteMilestoneRef {
                number,
                title: title.to_string(),
            });
        }
        self
    }

    pub(crate) fn with_labels(self, labels: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .labels
            .extend(labels.iter().map(|l| l.to_string()));
        self
    }

    pub(crate) fn with_users(self, users: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .users
            .extend(users.iter().map(|u| u.to_string()));
        self
    }

    /// Budgets reported by successive `rate_budget` calls; the last one
    /// repeats.
    pub(crate) fn with_budgets(self, budgets: Vec<RateBudget>) -> Self {
        self.state.lock().unwrap().budgets = budgets.into();
        self
    }

    /// Every mutation after the first `n` fails.
    pub(crate) fn failing_after(self, n: usize) -> Self {
        self.state.lock().unwrap().fail_after = Some(n);
        self
    }

    /// Every user lookup fails as if the service were unreachable.
    pub(crate) fn failing_user_lookups(self) -> Self {
        self.state.lock().unwrap().fail_lookups = true;
        self
    }

    /// The next created issue skips a number, as if someone else had
    /// opened an issue concurrently.
    pub(crate) fn skipping_next_number(self) -> Self {
        self.state.lock().unwrap().skip_number = true;
        self
    }

    pub(crate) fn mutations(&self) -> usize {
        self.state.lock().unwrap().mutations
    }

    pub(crate) fn user_lookups(&self) -> usize {
        self.state.lock().unwrap().user_lookups
    }

    pub(crate) fn budget_queries(&self) -> usize {
        self.state.lock().unwrap().budget_queries
    }

    pub(crate) fn issue(&self, number: u64) -> Option<RemoteIssueRef> {
        self.state.lock().unwrap().issues.get(&number).cloned()
    }

    pub(crate) fn issue_numbers(&self) -> Vec<u64> {
        self.state.lock().unwrap().issues.keys().copied().collect()
    }

    pub(crate) fn created(&self) -> Vec<NewIssue> {
        self.state.lock().unwrap().created.clone()
    }

    pub(crate) fn comments(&self, number: u64) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .comments
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn milestone_titles(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .milestones
            .iter()
            .map(|m| m.title.clone())
            .collect()
    }

    fn mutate<R>(&self, apply: impl FnOnce(&mut State) -> R) -> Result<R, RemoteError> {
        let mut state = self.state.lock().unwrap();
        if let Some(limit) = state.fail_after {
            if state.mutations >= limit {
                return Err(RemoteError::Rejected("service unavailable".to_string()));
            }
        }
        state.mutations += 1;
        Ok(apply(&mut state))
    }
}

impl IssueTracker for FakeTracker {
    async fn list_issues(&self) -> Result<Vec<RemoteIssueRef>, RemoteError> {
        Ok(self.state.lock().unwrap().issues.values().cloned().collect())
    }

    async fn list_milestones(&self) -> Result<Vec<RemoteMilestoneRef>, RemoteError> {
        Ok(self.state.lock().unwrap().milestones.clone())
    }

    async fn list_labels(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.state.lock().unwrap().labels.clone())
    }

    async fn user_exists(&self, handle: &str) -> Result<bool, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.user_lookups += 1;
        if state.fail_lookups {
            return Err(RemoteError::Rejected("service unavailable".to_string()));
        }
        Ok(state.users.contains(handle))
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<RemoteIssueRef, RemoteError> {
        self.mutate(|state| {
            let mut number = state.issues.keys().next_back().copied().unwrap_or(0) + 1;
            if std::mem::take(&mut state.skip_number) {
                number += 1;
            }
            let created = RemoteIssueRef {
                number,
                title: issue.title.clone(),
                state: IssueState::Open,
                comments: 0,
            };
            state.issues.insert(number, created.clone());
            state.created.push(issue.clone());
            created
        })
    }

    async fn create_milestone(&self, title: &str) -> Result<RemoteMilestoneRef, RemoteError> {
        self.mutate(|state| {
            let milestone = RemoteMilestoneRef {
                number: state.milestones.len() as u64 + 1,
                title: title.to_string(),
            };
            state.milestones.push(milestone.clone());
            milestone
        })
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<(), RemoteError> {
        self.mutate(|state| {
            if let Some(issue) = state.issues.get_mut(&number) {
                issue.comments += 1;
            }
            state.comments.entry(number).or_default().push(body.to_string());
        })
    }

    async fn close_issue(&self, number: u64) -> Result<(), RemoteError> {
        self.mutate(|state| {
            if let Some(issue) = state.issues.get_mut(&number) {
                issue.state = IssueState::Closed;
            }
        })
    }

    async fn rate_budget(&self) -> Result<RateBudget, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.budget_queries += 1;
        let budget = if state.budgets.len() > 1 {
            state.budgets.pop_front()
        } else {
            state.budgets.front().copied()
        };
        Ok(budget.unwrap_or(RateBudget {
            remaining: 5000,
            reset: Utc::now() + Duration::hours(1),
        }))
    }
}
