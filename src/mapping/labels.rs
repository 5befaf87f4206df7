use std::collections::BTreeSet;

use regex::Regex;

use super::grammar::{parse_keyword_list, parse_label_clauses, LabelClause};
use super::{ConfigurationError, OPTION_KEYWORDS, OPTION_LABELS};
use crate::ingest::tickets::TicketRecord;

/// Ticket fields a label clause can test.
const LABEL_FIELDS: [&str; 2] = ["type", "resolution"];

/// Derives GitHub labels from ticket fields (`type=defect: bug`) and from
/// words in the ticket's keyword field.
#[derive(Debug, Default)]
pub(crate) struct LabelClassifier {
    clauses: Vec<LabelClause>,
    keywords: Vec<(Regex, String)>,
}

impl LabelClassifier {
    /// Every label either mapping names must already exist on the remote.
    pub(crate) fn build(
        definition: Option<&str>,
        keywords: Option<&str>,
        existing: &BTreeSet<String>,
    ) -> Result<LabelClassifier, ConfigurationError> {
        let mut classifier = LabelClassifier::default();
        if let Some(definition) = definition {
            classifier.clauses =
                parse_label_clauses(definition).map_err(|source| ConfigurationError::Grammar {
                    option: OPTION_LABELS,
                    source,
                })?;
            for clause in &classifier.clauses {
                if !LABEL_FIELDS.contains(&clause.field.as_str()) {
                    return Err(ConfigurationError::UnknownField {
                        field: clause.field.clone(),
                        known: LABEL_FIELDS.join(", "),
                    });
                }
                if !existing.contains(&clause.label) {
                    return Err(ConfigurationError::UnknownLabel {
                        label: clause.label.clone(),
                        known: existing.iter().cloned().collect::<Vec<_>>().join(", "),
                    });
                }
            }
        }
        if let Some(keywords) = keywords {
            let words =
                parse_keyword_list(keywords).map_err(|source| ConfigurationError::Grammar {
                    option: OPTION_KEYWORDS,
                    source,
                })?;
            for keyword in words {
                if !existing.contains(&keyword) {
                    return Err(ConfigurationError::UnknownKeyword { keyword });
                }
                let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(&keyword)))
                    .map_err(|e| ConfigurationError::Grammar {
                        option: OPTION_KEYWORDS,
                        source: super::grammar::GrammarError {
                            offset: 0,
                            message: e.to_string(),
                        },
                    })?;
                classifier.keywords.push((pattern, keyword));
            }
        }
        Ok(classifier)
    }

    /// First clause for `field` whose value matches.
    pub(crate) fn label_for(&self, field: &str, value: &str) -> Option<&str> {
        self.clauses
            .iter()
            .find(|c| c.field == field && c.value == value)
            .map(|c| c.label.as_str())
    }

    /// Every keyword label whose word occurs in `text`.
    pub(crate) fn labels_for_keywords(&self, text: &str) -> Vec<&str> {
        self.keywords
            .iter()
            .filter(|(pattern, _)| pattern.is_match(text))
            .map(|(_, label)| label.as_str())
            .collect()
    }

    pub(crate) fn classify(&self, ticket: &TicketRecord) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        let mut add = |label: &str| {
            if !labels.iter().any(|l| l == label) {
                labels.push(label.to_string());
            }
        };
        for (field, value) in LABEL_FIELDS.into_iter().zip([&ticket.kind, &ticket.resolution]) {
            if let Some(label) = self.label_for(field, value) {
                tracing::info!("  add label {label}");
                add(label);
            }
        }
        for label in self.labels_for_keywords(&ticket.keywords) {
            tracing::info!("  add label \"{label}\" from keywords \"{}\"", ticket.keywords);
            add(label);
        }
        labels
    }
}
