use lazy_static::lazy_static;
use regex::Regex;
use std::str::FromStr;
use thiserror::Error;

lazy_static! {
    static ref COMPONENT: Regex = Regex::new(r"^[A-Za-z0-9_.-]+$").expect("component pattern");
}

#[derive(Debug, Error)]
#[error("repository {input:?} must be written as <owner>/<name>")]
pub struct ParseError {
    input: String,
}

/// Target repository, `owner/name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RepoName {
    pub(crate) owner: String,
    pub(crate) name: String,
}

impl FromStr for RepoName {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let components: Vec<&str> = s.trim().split('/').collect();
        match &components[..] {
            [owner, name] if COMPONENT.is_match(owner) && COMPONENT.is_match(name) => {
                Ok(RepoName {
                    owner: owner.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ParseError {
                input: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for RepoName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_owner_and_name() {
        let repo: RepoName = " roskakori/tratihubis ".parse().unwrap();
        assert_eq!(repo.owner, "roskakori");
        assert_eq!(repo.name, "tratihubis");
        assert_eq!(repo.to_string(), "roskakori/tratihubis");
    }

    #[test]
    fn rejects_other_shapes() {
        for input in ["tratihubis", "a/b/c", "/b", "a/", "a b/c"] {
            assert!(input.parse::<RepoName>().is_err(), "{input}");
        }
    }
}
