//! Mutation type to invalidation pattern mapping.

use crate::cache::KeyPattern;
use std::collections::BTreeMap;
use tunewatch_core::Principal;

const PRINCIPAL_PLACEHOLDER: &str = "{principal}";

/// A pattern that may reference the mutating principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternTemplate {
    /// Client query key family, see [`KeyPattern::Prefix`].
    Prefix(String),
    /// Server route prefix, see [`KeyPattern::PathPrefix`].
    PathPrefix(String),
}

impl PatternTemplate {
    pub fn needs_principal(&self) -> bool {
        self.text().contains(PRINCIPAL_PLACEHOLDER)
    }

    fn text(&self) -> &str {
        match self {
            Self::Prefix(t) | Self::PathPrefix(t) => t,
        }
    }

    fn render(&self, principal: Option<&Principal>) -> Option<KeyPattern> {
        let text = if self.needs_principal() {
            self.text().replace(PRINCIPAL_PLACEHOLDER, principal?.as_str())
        } else {
            self.text().to_string()
        };
        Some(match self {
            Self::Prefix(_) => KeyPattern::Prefix(text),
            Self::PathPrefix(_) => KeyPattern::PathPrefix(text),
        })
    }
}

/// Named mutation types and the cached views each one makes stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationMap {
    entries: BTreeMap<String, Vec<PatternTemplate>>,
}

impl MutationMap {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with(mut self, mutation_type: impl Into<String>, templates: Vec<PatternTemplate>) -> Self {
        self.entries.insert(mutation_type.into(), templates);
        self
    }

    /// Resolve the patterns for a mutation.
    ///
    /// Returns `None` for an unknown mutation type. A principal-scoped type
    /// resolved without a principal yields no patterns at all rather than a
    /// partial set.
    pub fn patterns_for(
        &self,
        mutation_type: &str,
        principal: Option<&Principal>,
    ) -> Option<Vec<KeyPattern>> {
        let templates = self.entries.get(mutation_type)?;
        let rendered: Option<Vec<KeyPattern>> =
            templates.iter().map(|t| t.render(principal)).collect();
        Some(rendered.unwrap_or_default())
    }

    pub fn mutation_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for MutationMap {
    fn default() -> Self {
        use PatternTemplate::{PathPrefix, Prefix};
        let p = |s: &str| Prefix(s.to_string());
        Self::empty()
            .with(
                "user-preferences-update",
                vec![
                    p("user/{principal}/preferences"),
                    p("dashboard/essential"),
                    p("dashboard/secondary"),
                ],
            )
            .with(
                "user-profile-update",
                vec![
                    p("user/{principal}/profile"),
                    p("essential/user-profile/{principal}"),
                    p("dashboard/essential/user-info/{principal}"),
                ],
            )
            .with(
                "dashboard-data-update",
                vec![p("dashboard"), PathPrefix("/api/dashboard".to_string())],
            )
            .with(
                "realtime-data-update",
                vec![p("realtime"), p("dashboard/secondary/radio-status")],
            )
            .with("admin-data-update", vec![p("admin")])
            .with("static-data-update", vec![p("static")])
    }
}
