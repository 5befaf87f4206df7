use std::collections::{HashMap, HashSet};

use super::grammar::{parse_actor_clauses, Value};
use super::{ConfigurationError, ResolveError, OPTION_USERS};
use crate::pacing::Gate;
use crate::remote::IssueTracker;

const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// `*` on the right: the Trac name is the GitHub name.
    SameName,
    /// `""` on the right: leave the issue unassigned.
    Nobody,
    User(String),
}

impl Target {
    fn from_value(value: Value) -> Target {
        match value {
            Value::Bare(word) if word == WILDCARD => Target::SameName,
            Value::Quoted(text) if text.is_empty() => Target::Nobody,
            other => Target::User(other.into_text()),
        }
    }

    fn describe(&self) -> &str {
        match self {
            Target::SameName => WILDCARD,
            Target::Nobody => "",
            Target::User(user) => user,
        }
    }
}

/// Trac user to GitHub user, e.g. `johndoe: jdoe78, *: *`.
#[derive(Debug, Default)]
pub(crate) struct ActorMapper {
    exact: HashMap<String, Target>,
    fallback: Option<Target>,
    validated: HashSet<String>,
}

impl ActorMapper {
    /// Parses the mapping without asking the remote about anyone.
    pub(crate) fn parse(definition: &str) -> Result<ActorMapper, ConfigurationError> {
        let clauses =
            parse_actor_clauses(definition).map_err(|source| ConfigurationError::Grammar {
                option: OPTION_USERS,
                source,
            })?;
        let mut mapper = ActorMapper::default();
        for clause in clauses {
            let target = Target::from_value(clause.target);
            let (actor, previous) = match clause.source {
                Value::Bare(word) if word == WILDCARD => {
                    (word, mapper.fallback.replace(target.clone()))
                }
                other => {
                    let actor = other.into_text();
                    let previous = mapper.exact.insert(actor.clone(), target.clone());
                    (actor, previous)
                }
            };
            if let Some(first) = previous {
                return Err(ConfigurationError::DuplicateActor {
                    actor,
                    first: first.describe().to_string(),
                    second: target.describe().to_string(),
                });
            }
        }
        Ok(mapper)
    }

    /// Parses the mapping and confirms every named GitHub user exists.
    pub(crate) async fn build<T: IssueTracker>(
        definition: &str,
        gate: &mut Gate<T>,
    ) -> Result<ActorMapper, ResolveError> {
        let mut mapper = ActorMapper::parse(definition)?;
        let mut named: Vec<(String, String)> = mapper
            .exact
            .iter()
            .map(|(actor, target)| (actor.clone(), target))
            .chain(mapper.fallback.iter().map(|t| (WILDCARD.to_string(), t)))
            .filter_map(|(actor, target)| match target {
                Target::User(user) => Some((actor, user.clone())),
                _ => None,
            })
            .collect();
        named.sort();
        for (actor, user) in named {
            mapper.validate(&actor, &user, gate).await?;
        }
        Ok(mapper)
    }

    /// The GitHub user for a Trac user, `None` when the issue stays
    /// unassigned.
    pub(crate) fn target_for(&self, actor: &str) -> Result<Option<String>, ConfigurationError> {
        if actor.is_empty() {
            return Ok(None);
        }
        let target = self
            .exact
            .get(actor)
            .or(self.fallback.as_ref())
            .ok_or_else(|| ConfigurationError::UnmappedActor {
                actor: actor.to_string(),
            })?;
        Ok(match target {
            Target::SameName => Some(actor.to_string()),
            Target::Nobody => None,
            Target::User(user) => Some(user.clone()),
        })
    }

    /// Like [`ActorMapper::target_for`], additionally confirming on first
    /// use that a name passed through by the wildcard exists.
    pub(crate) async fn resolve<T: IssueTracker>(
        &mut self,
        actor: &str,
        gate: &mut Gate<T>,
    ) -> Result<Option<String>, ResolveError> {
        let target = self.target_for(actor)?;
        if let Some(user) = &target {
            self.validate(actor, user, gate).await?;
        }
        Ok(target)
    }

    async fn validate<T: IssueTracker>(
        &mut self,
        actor: &str,
        user: &str,
        gate: &mut Gate<T>,
    ) -> Result<(), ResolveError> {
        if self.validated.contains(user) {
            return Ok(());
        }
        tracing::debug!("check for GitHub user \"{user}\"");
        if !gate.user_exists(user).await? {
            return Err(ConfigurationError::UnresolvableActor {
                actor: actor.to_string(),
                target: user.to_string(),
            }
            .into());
        }
        self.validated.insert(user.to_string());
        Ok(())
    }
}
