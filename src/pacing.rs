//! Keeps the migration under GitHub's limits.
//!
//! Creation calls are counted in rolling windows (by default 36 per 62 s
//! and 300 per 3660 s, just under the secondary limits GitHub enforces but
//! does not document). Every call, creation or not, also respects the
//! request budget the service reports. A call that would exceed either
//! waits; it never fails.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::Instant;

use crate::remote::{
    IssueTracker, NewIssue, RateBudget, RemoteError, RemoteIssueRef, RemoteMilestoneRef,
    RemoteSnapshot,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WindowLimit {
    pub calls: usize,
    pub period: Duration,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PacingLimits {
    pub windows: Vec<WindowLimit>,
    /// Shortest sleep once a window is full.
    pub min_wait: Duration,
    /// Requests to keep in reserve of the reported budget.
    pub budget_buffer: u64,
    pub budget_min_wait: Duration,
    /// Sleeps longer than this announce when they end.
    pub report_threshold: Duration,
}

impl Default for PacingLimits {
    fn default() -> Self {
        PacingLimits {
            windows: vec![
                WindowLimit {
                    calls: 36,
                    period: Duration::from_secs(62),
                    name: "minute".to_string(),
                },
                WindowLimit {
                    calls: 300,
                    period: Duration::from_secs(3660),
                    name: "hour".to_string(),
                },
            ],
            min_wait: Duration::from_secs(3),
            budget_buffer: 10,
            budget_min_wait: Duration::from_secs(15),
            report_threshold: Duration::from_secs(65),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Read,
    Create,
    Edit,
}

#[derive(Debug)]
struct CreationWindow {
    limit: WindowLimit,
    history: VecDeque<Instant>,
}

impl CreationWindow {
    fn count(&mut self, now: Instant) -> usize {
        while let Some(&oldest) = self.history.front() {
            if now.duration_since(oldest) < self.limit.period {
                break;
            }
            self.history.pop_front();
        }
        self.history.len()
    }

    /// How long until one more call fits, if it does not fit now.
    fn wait_needed(&mut self, now: Instant, floor: Duration) -> Option<Duration> {
        let count = self.count(now);
        if count < self.limit.calls {
            return None;
        }
        let blocking = self.history[count - self.limit.calls];
        let remaining = self
            .limit
            .period
            .saturating_sub(now.duration_since(blocking));
        Some(remaining.max(floor))
    }
}

#[derive(Debug)]
pub(crate) struct Pacer {
    windows: Vec<CreationWindow>,
    limits: PacingLimits,
    budget: Option<RateBudget>,
}

impl Pacer {
    pub(crate) fn new(limits: &PacingLimits) -> Pacer {
        Pacer {
            windows: limits
                .windows
                .iter()
                .map(|limit| CreationWindow {
                    limit: limit.clone(),
                    history: VecDeque::new(),
                })
                .collect(),
            limits: limits.clone(),
            budget: None,
        }
    }

    /// Returns once a call of `kind` may be dispatched.
    pub(crate) async fn admit<T: IssueTracker>(
        &mut self,
        kind: CallKind,
        tracker: &T,
    ) -> Result<(), RemoteError> {
        if kind == CallKind::Create {
            for window in &mut self.windows {
                loop {
                    let now = Instant::now();
                    let Some(wait) = window.wait_needed(now, self.limits.min_wait) else {
                        break;
                    };
                    tracing::info!(
                        "breather: at most {} creation calls per {} and {} were made, sleep for {} sec",
                        window.limit.calls,
                        window.limit.name,
                        window.history.len(),
                        wait.as_secs()
                    );
                    suspend(wait, self.limits.report_threshold).await;
                }
                tracing::trace!(
                    "{} creations in last {}",
                    window.history.len(),
                    window.limit.name
                );
            }
        }
        self.ensure_budget(tracker).await
    }

    /// Notes a dispatched call.
    pub(crate) fn record(&mut self, kind: CallKind) {
        let now = Instant::now();
        if kind == CallKind::Create {
            for window in &mut self.windows {
                window.history.push_back(now);
            }
        }
        if let Some(budget) = &mut self.budget {
            budget.remaining = budget.remaining.saturating_sub(1);
        }
    }

    /// Replaces the local estimate with what the service reports.
    async fn refresh_budget<T: IssueTracker>(&mut self, tracker: &T) -> Result<(), RemoteError> {
        self.budget = Some(tracker.rate_budget().await?);
        Ok(())
    }

    async fn ensure_budget<T: IssueTracker>(&mut self, tracker: &T) -> Result<(), RemoteError> {
        let buffer = self.limits.budget_buffer;
        if self.budget.map_or(true, |b| b.remaining < buffer) {
            self.budget = Some(tracker.rate_budget().await?);
        }
        while let Some(budget) = self.budget.filter(|b| b.remaining < buffer) {
            let until_reset = (budget.reset - Utc::now()).to_std().unwrap_or_default();
            let wait = until_reset.max(self.limits.budget_min_wait);
            tracing::info!(
                "rate limited: only {} requests left, sleep for {:.2} seconds",
                budget.remaining,
                wait.as_secs_f64()
            );
            suspend(wait, self.limits.report_threshold).await;
            self.budget = Some(tracker.rate_budget().await?);
        }
        Ok(())
    }
}

async fn suspend(wait: Duration, report_threshold: Duration) {
    if wait <= report_threshold {
        tokio::time::sleep(wait).await;
        return;
    }
    let resume = chrono::Local::now()
        + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero());
    tracing::info!("resuming at {}", resume.format("%Y-%m-%d %H:%M:%S"));

    let deadline = Instant::now() + wait;
    let bar = ProgressBar::new(wait.as_secs()).with_style(
        ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len}s")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message("rate limit");
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            _ = ticker.tick() => {
                let left = deadline.saturating_duration_since(Instant::now());
                bar.set_position(wait.saturating_sub(left).as_secs());
            }
        }
    }
    bar.finish_and_clear();
}

/// The single door to the remote: every call is paced, and every mutating
/// call is counted.
pub(crate) struct Gate<T> {
    tracker: T,
    pacer: Pacer,
    dispatched: u64,
}

impl<T: IssueTracker> Gate<T> {
    pub(crate) fn new(tracker: T, limits: &PacingLimits) -> Gate<T> {
        Gate {
            tracker,
            pacer: Pacer::new(limits),
            dispatched: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Mutating calls that went through.
    pub(crate) fn dispatched(&self) -> u64 {
        self.dispatched
    }

    fn done(&mut self, kind: CallKind) {
        self.pacer.record(kind);
        if kind != CallKind::Read {
            self.dispatched += 1;
        }
    }

    pub(crate) async fn snapshot(&mut self) -> Result<RemoteSnapshot, RemoteError> {
        self.pacer.admit(CallKind::Read, &self.tracker).await?;
        let snapshot = RemoteSnapshot::fetch(&self.tracker).await?;
        // one read per page, too many to count here
        self.pacer.refresh_budget(&self.tracker).await?;
        Ok(snapshot)
    }

    pub(crate) async fn rate_budget(&mut self) -> Result<RateBudget, RemoteError> {
        self.tracker.rate_budget().await
    }

    pub(crate) async fn user_exists(&mut self, handle: &str) -> Result<bool, RemoteError> {
        self.pacer.admit(CallKind::Read, &self.tracker).await?;
        let exists = self.tracker.user_exists(handle).await?;
        self.done(CallKind::Read);
        Ok(exists)
    }

    pub(crate) async fn create_issue(&mut self, issue: &NewIssue) -> Result<RemoteIssueRef, RemoteError> {
        self.pacer.admit(CallKind::Create, &self.tracker).await?;
        let created = self.tracker.create_issue(issue).await?;
        self.done(CallKind::Create);
        Ok(created)
    }

    pub(crate) async fn create_milestone(&mut self, title: &str) -> Result<RemoteMilestoneRef, RemoteError> {
        self.pacer.admit(CallKind::Create, &self.tracker).await?;
        let created = self.tracker.create_milestone(title).await?;
        self.done(CallKind::Create);
        Ok(created)
    }

    pub(crate) async fn create_comment(&mut self, number: u64, body: &str) -> Result<(), RemoteError> {
        self.pacer.admit(CallKind::Create, &self.tracker).await?;
        self.tracker.create_comment(number, body).await?;
        self.done(CallKind::Create);
        Ok(())
    }

    pub(crate) async fn close_issue(&mut self, number: u64) -> Result<(), RemoteError> {
        self.pacer.admit(CallKind::Edit, &self.tracker).await?;
        self.tracker.close_issue(number).await?;
        self.done(CallKind::Edit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::FakeTracker;

    fn limits(calls: usize, period_secs: u64) -> PacingLimits {
        PacingLimits {
            windows: vec![WindowLimit {
                calls,
                period: Duration::from_secs(period_secs),
                name: "window".to_string(),
            }],
            ..PacingLimits::default()
        }
    }

    fn new_issue(title: &str) -> NewIssue {
        NewIssue {
            title: title.to_string(),
            body: String::new(),
            assignee: None,
            milestone: None,
            labels: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn third_call_waits_for_the_window_to_roll() {
        let mut gate = Gate::new(FakeTracker::new(), &limits(2, 60));
        let start = Instant::now();
        gate.create_issue(&new_issue("one")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        gate.create_issue(&new_issue("two")).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(1)).await;
        gate.create_issue(&new_issue("three")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(60), "{:?}", start.elapsed());
        assert!(start.elapsed() < Duration::from_secs(61), "{:?}", start.elapsed());
        assert_eq!(gate.dispatched(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_never_shorter_than_the_floor() {
        let mut gate = Gate::new(FakeTracker::new(), &limits(1, 2));
        let start = Instant::now();
        gate.create_comment(1, "a").await.unwrap();
        gate.create_comment(1, "b").await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn every_window_is_respected() {
        let mut limits = limits(3, 10);
        limits.windows.push(WindowLimit {
            calls: 4,
            period: Duration::from_secs(100),
            name: "long".to_string(),
        });
        let mut gate = Gate::new(FakeTracker::new(), &limits);
        let start = Instant::now();
        for i in 0..5 {
            gate.create_milestone(&format!("m{i}")).await.unwrap();
        }
        // the fourth call waits out the short window, the fifth the long one
        assert_eq!(start.elapsed(), Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn edits_and_reads_do_not_use_creation_quota() {
        let tracker = FakeTracker::new().with_issue(1, "one", crate::remote::IssueState::Open, 0);
        let mut gate = Gate::new(tracker, &limits(1, 60));
        let start = Instant::now();
        gate.create_comment(1, "a").await.unwrap();
        gate.close_issue(1).await.unwrap();
        gate.user_exists("someone").await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(gate.dispatched(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn low_budget_sleeps_until_reset() {
        let tracker = FakeTracker::new().with_budgets(vec![
            RateBudget {
                remaining: 3,
                reset: Utc::now() + chrono::Duration::seconds(100),
            },
            RateBudget {
                remaining: 5000,
                reset: Utc::now() + chrono::Duration::seconds(3600),
            },
        ]);
        let mut gate = Gate::new(tracker, &PacingLimits::default());
        let start = Instant::now();
        gate.close_issue(1).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(90), "{:?}", start.elapsed());
        assert!(start.elapsed() <= Duration::from_secs(101), "{:?}", start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn budget_wait_has_a_floor_when_reset_is_past() {
        let tracker = FakeTracker::new().with_budgets(vec![
            RateBudget {
                remaining: 0,
                reset: Utc::now() - chrono::Duration::seconds(5),
            },
            RateBudget {
                remaining: 60,
                reset: Utc::now() + chrono::Duration::seconds(3600),
            },
        ]);
        let mut gate = Gate::new(tracker, &PacingLimits::default());
        let start = Instant::now();
        gate.user_exists("someone").await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_takes_the_reported_budget_afterwards() {
        let reset = Utc::now() + chrono::Duration::seconds(100);
        let tracker = FakeTracker::new().with_budgets(vec![
            RateBudget {
                remaining: 5000,
                reset,
            },
            // paging through a large repository used most of it
            RateBudget { remaining: 3, reset },
            RateBudget { remaining: 3, reset },
            RateBudget {
                remaining: 5000,
                reset: reset + chrono::Duration::hours(1),
            },
        ]);
        let mut gate = Gate::new(tracker, &PacingLimits::default());
        gate.snapshot().await.unwrap();
        assert_eq!(gate.tracker().budget_queries(), 2);
        let start = Instant::now();
        gate.close_issue(1).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(90), "{:?}", start.elapsed());
    }

    #[test]
    fn window_prunes_calls_older_than_its_period() {
        let limit = WindowLimit {
            calls: 1,
            period: Duration::from_secs(10),
            name: "w".to_string(),
        };
        let start = Instant::now();
        let mut window = CreationWindow {
            limit,
            history: VecDeque::from(vec![start]),
        };
        assert_eq!(window.count(start + Duration::from_secs(9)), 1);
        assert_eq!(
            window.wait_needed(start + Duration::from_secs(4), Duration::from_secs(3)),
            Some(Duration::from_secs(6))
        );
        assert_eq!(window.count(start + Duration::from_secs(10)), 0);
    }
}
