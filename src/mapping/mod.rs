//! Rules that translate Trac users and ticket fields into GitHub users and
//! labels. Both are checked against the remote when they are built, so a
//! typo fails the run before anything is created.

use thiserror::Error;

use crate::remote::RemoteError;

pub(crate) mod actors;
pub(crate) mod grammar;
pub(crate) mod labels;

pub(crate) const OPTION_USERS: &str = "users";
pub(crate) const OPTION_LABELS: &str = "labels";
pub(crate) const OPTION_KEYWORDS: &str = "keywords";

#[derive(Debug, Error)]
pub(crate) enum ConfigurationError {
    #[error("cannot process option \"{option}\": {source}")]
    Grammar {
        option: &'static str,
        source: grammar::GrammarError,
    },
    #[error("unknown ticket field \"{field}\" must be replaced by one of: {known}")]
    UnknownField { field: String, known: String },
    #[error("unknown label \"{label}\" must be replaced by one of: {known}")]
    UnknownLabel { label: String, known: String },
    #[error("unknown keyword \"{keyword}\" must be added to the repository as a label")]
    UnknownKeyword { keyword: String },
    #[error("Trac user \"{actor}\" must be mapped to a GitHub user")]
    UnmappedActor { actor: String },
    #[error("Trac user \"{actor}\" must be mapped to an existing GitHub user instead of \"{target}\"")]
    UnresolvableActor { actor: String, target: String },
    #[error("Trac user \"{actor}\" must be mapped to only one GitHub user instead of \"{first}\" and \"{second}\"")]
    DuplicateActor {
        actor: String,
        first: String,
        second: String,
    },
    #[error("an attachments table needs an attachments prefix to link to")]
    MissingAttachmentsPrefix,
}

/// Resolving a user asks the remote, which can fail on its own.
#[derive(Debug, Error)]
pub(crate) enum ResolveError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
