//! Addon search criteria.

use serde::{Deserialize, Serialize};

use crate::addon::MetaData;

/// Criteria for [`AddonSystem::query`](super::AddonSystem::query).
///
/// An addon matches when **any** supplied criterion matches. Authors match
/// by equality with one of the addon's authors, name and description by
/// substring, and `enabled` by equality with the cached flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonQuery {
    pub author: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    #[serde(default)]
    pub case_insensitive: bool,
}

impl AddonQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    /// Whether no criterion is set; an empty query matches nothing.
    pub fn is_empty(&self) -> bool {
        self.author.is_none()
            && self.name.is_none()
            && self.description.is_none()
            && self.enabled.is_none()
    }

    /// Whether an addon with `meta` and cached `enabled` flag matches.
    pub fn matches(&self, meta: &MetaData, enabled: bool) -> bool {
        let fold = |s: &str| {
            if self.case_insensitive {
                s.to_lowercase()
            } else {
                s.to_string()
            }
        };

        let author_match = self.author.as_deref().is_some_and(|author| {
            let author = fold(author);
            meta.authors.iter().any(|a| fold(a) == author)
        });
        let name_match = self
            .name
            .as_deref()
            .is_some_and(|name| fold(&meta.name).contains(&fold(name)));
        let description_match = self
            .description
            .as_deref()
            .is_some_and(|description| fold(&meta.description).contains(&fold(description)));
        let enabled_match = self.enabled.is_some_and(|wanted| wanted == enabled);

        author_match || name_match || description_match || enabled_match
    }
}
