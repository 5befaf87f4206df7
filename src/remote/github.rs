use chrono::{TimeZone, Utc};
use futures::TryStreamExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{
    IssueState, IssueTracker, NewIssue, RateBudget, RemoteError, RemoteIssueRef,
    RemoteMilestoneRef,
};
use crate::repo_name::RepoName;

const PER_PAGE: u8 = 100;

#[derive(Debug, Deserialize)]
struct IssueDto {
    number: u64,
    title: String,
    state: String,
    comments: usize,
}

#[derive(Debug, Deserialize)]
struct MilestoneDto {
    number: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct LabelDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitDto {
    rate: RateDto,
}

#[derive(Debug, Deserialize)]
struct RateDto {
    remaining: u64,
    reset: i64,
}

#[derive(Debug, Serialize)]
struct PageParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'static str>,
    per_page: u8,
    page: u32,
}

#[derive(Debug, Serialize)]
struct CreateIssueBody<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    assignee: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    milestone: Option<u64>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    labels: &'a [String],
}

/// Issues, milestones and users of one GitHub repository, over the REST API.
pub(crate) struct GithubTracker {
    crab: octocrab::Octocrab,
    repo: RepoName,
}

impl GithubTracker {
    pub(crate) fn connect(repo: RepoName, token: Option<String>) -> Result<GithubTracker, RemoteError> {
        let builder = octocrab::Octocrab::builder();
        let crab = match token {
            Some(token) => builder.personal_token(token).build()?,
            None => builder.build()?,
        };
        tracing::info!("connect to github repo \"{}\"", repo);
        Ok(GithubTracker { crab, repo })
    }

    fn route(&self, tail: &str) -> String {
        format!("/repos/{}/{}/{}", self.repo.owner, self.repo.name, tail)
    }

    async fn all<D: DeserializeOwned>(
        &self,
        tail: &str,
        state: Option<&'static str>,
    ) -> Result<Vec<D>, RemoteError> {
        let route = self.route(tail);
        let crab = &self.crab;
        futures::stream::try_unfold(PaginationState::Page(1), move |pagination| {
            next_page(crab, route.clone(), state, pagination)
        })
        .try_concat()
        .await
    }
}

enum PaginationState {
    Page(u32),
    Done,
}

async fn next_page<D: DeserializeOwned>(
    crab: &octocrab::Octocrab,
    route: String,
    state: Option<&'static str>,
    pagination: PaginationState,
) -> Result<Option<(Vec<D>, PaginationState)>, RemoteError> {
    match pagination {
        PaginationState::Done => Ok(None),
        PaginationState::Page(page) => {
            let params = PageParams {
                state,
                per_page: PER_PAGE,
                page,
            };
            let items: Vec<D> = crab.get(route.as_str(), Some(&params)).await?;
            let next = if items.len() < usize::from(PER_PAGE) {
                PaginationState::Done
            } else {
                PaginationState::Page(page + 1)
            };
            Ok(Some((items, next)))
        }
    }
}

impl From<IssueDto> for RemoteIssueRef {
    fn from(dto: IssueDto) -> Self {
        RemoteIssueRef {
            number: dto.number,
            title: dto.title,
            state: if dto.state == "closed" {
                IssueState::Closed
            } else {
                IssueState::Open
            },
            comments: dto.comments,
        }
    }
}

impl From<MilestoneDto> for RemoteMilestoneRef {
    fn from(dto: MilestoneDto) -> Self {
        RemoteMilestoneRef {
            number: dto.number,
            title: dto.title,
        }
    }
}

impl IssueTracker for GithubTracker {
    // Pull requests come back too; they use up issue numbers all the same.
    async fn list_issues(&self) -> Result<Vec<RemoteIssueRef>, RemoteError> {
        let issues: Vec<IssueDto> = self.all("issues", Some("all")).await?;
        Ok(issues.into_iter().map(RemoteIssueRef::from).collect())
    }

    async fn list_milestones(&self) -> Result<Vec<RemoteMilestoneRef>, RemoteError> {
        let milestones: Vec<MilestoneDto> = self.all("milestones", Some("all")).await?;
        Ok(milestones.into_iter().map(RemoteMilestoneRef::from).collect())
    }

    async fn list_labels(&self) -> Result<Vec<String>, RemoteError> {
        let labels: Vec<LabelDto> = self.all("labels", None).await?;
        Ok(labels.into_iter().map(|l| l.name).collect())
    }

    async fn user_exists(&self, handle: &str) -> Result<bool, RemoteError> {
        let route = format!("/users/{handle}");
        match self
            .crab
            .get::<serde_json::Value, _, _>(route, None::<&()>)
            .await
        {
            Ok(_) => Ok(true),
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<RemoteIssueRef, RemoteError> {
        let body = CreateIssueBody {
            title: &issue.title,
            body: &issue.body,
            assignee: issue.assignee.as_deref(),
            milestone: issue.milestone,
            labels: &issue.labels,
        };
        let created: IssueDto = self.crab.post(self.route("issues"), Some(&body)).await?;
        Ok(created.into())
    }

    async fn create_milestone(&self, title: &str) -> Result<RemoteMilestoneRef, RemoteError> {
        let body = serde_json::json!({ "title": title });
        let created: MilestoneDto = self.crab.post(self.route("milestones"), Some(&body)).await?;
        Ok(created.into())
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<(), RemoteError> {
        let route = self.route(&format!("issues/{number}/comments"));
        let _: serde_json::Value = self
            .crab
            .post(route, Some(&serde_json::json!({ "body": body })))
            .await?;
        Ok(())
    }

    async fn close_issue(&self, number: u64) -> Result<(), RemoteError> {
        let route = self.route(&format!("issues/{number}"));
        let edited: IssueDto = self
            .crab
            .patch(route, Some(&serde_json::json!({ "state": "closed" })))
            .await?;
        if edited.state != "closed" {
            return Err(RemoteError::Rejected(format!(
                "issue #{number} is still {} after closing it",
                edited.state
            )));
        }
        Ok(())
    }

    async fn rate_budget(&self) -> Result<RateBudget, RemoteError> {
        let limits: RateLimitDto = self.crab.get("/rate_limit", None::<&()>).await?;
        let reset = Utc
            .timestamp_opt(limits.rate.reset, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Ok(RateBudget {
            remaining: limits.rate.remaining,
            reset,
        })
    }
}
