/// Ordered, case-insensitive keyword matching.
///
/// A [`TriggerSet`] is an immutable snapshot compiled from the configured
/// triggers. Keywords are case-folded once at compile time; each line is
/// folded once per evaluation.
use std::sync::Arc;

use tracing::warn;

use crate::config::TriggerConfig;

/// A trigger ready for matching.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub name: String,
    pub keywords: Vec<String>,
    pub sound: Option<String>,
    pub notify: bool,
    /// `keywords` case-folded, index-aligned.
    folded: Vec<String>,
}

impl Trigger {
    /// Compiles a configured trigger. Empty keywords are dropped; returns
    /// `None` if nothing usable is left.
    pub fn compile(config: &TriggerConfig) -> Option<Self> {
        let keywords: Vec<String> = config
            .keywords
            .iter()
            .filter(|k| !k.is_empty())
            .cloned()
            .collect();
        if keywords.is_empty() {
            return None;
        }
        let folded = keywords.iter().map(|k| k.to_lowercase()).collect();
        Some(Self {
            name: config.name.clone(),
            keywords,
            sound: config.sound.clone(),
            notify: config.notify,
            folded,
        })
    }

    /// First keyword (in this trigger's order) contained in `folded_line`.
    fn first_keyword_in(&self, folded_line: &str) -> Option<&str> {
        self.folded
            .iter()
            .position(|k| folded_line.contains(k.as_str()))
            .map(|i| self.keywords[i].as_str())
    }
}

/// Result of a successful match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match<'a> {
    pub trigger: &'a Trigger,
    /// The keyword as configured (original casing).
    pub keyword: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerSet {
    triggers: Vec<Trigger>,
}

impl TriggerSet {
    /// Compiles `configs` in order, skipping (and warning about) triggers with
    /// no usable keywords or a duplicate name.
    pub fn compile(configs: &[TriggerConfig]) -> Self {
        let mut triggers: Vec<Trigger> = Vec::with_capacity(configs.len());
        for config in configs {
            if triggers.iter().any(|t| t.name == config.name) {
                warn!(trigger = %config.name, "duplicate trigger name; keeping the first");
                continue;
            }
            match Trigger::compile(config) {
                Some(trigger) => triggers.push(trigger),
                None => warn!(trigger = %config.name, "trigger has no keywords; ignored"),
            }
        }
        Self { triggers }
    }

    pub fn shared(configs: &[TriggerConfig]) -> Arc<Self> {
        Arc::new(Self::compile(configs))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter()
    }

    /// Returns the first trigger (in set order) with any keyword contained in
    /// `line`, ignoring case. Later triggers are not evaluated.
    pub fn find_match(&self, line: &str) -> Option<Match<'_>> {
        if line.is_empty() {
            return None;
        }
        let folded = line.to_lowercase();
        self.triggers.iter().find_map(|trigger| {
            trigger
                .first_keyword_in(&folded)
                .map(|keyword| Match { trigger, keyword })
        })
    }
}
