//! System-noise filter for archive entries.
//!
//! Runs before any validation so that editor, OS and VCS artifacts are
//! accounted as skipped rather than failed.

use glob::{MatchOptions, Pattern, PatternError};
use ingestor_core::{SkipPattern, SkipReason};

const COMPONENT_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct Rule {
    glob: Pattern,
    /// Pattern ended in `/`: only matches directory components
    directory_only: bool,
    reason: SkipReason,
}

impl Rule {
    fn matches(&self, component: &str) -> bool {
        self.glob.matches_with(component, COMPONENT_MATCH)
    }
}

/// Classifies entry names as noise.
///
/// Patterns are compiled once; build one filter per configuration and
/// share it.
#[derive(Debug, Clone)]
pub struct EntryFilter {
    rules: Vec<Rule>,
}

impl EntryFilter {
    pub fn new(patterns: &[SkipPattern]) -> Result<Self, PatternError> {
        let rules = patterns
            .iter()
            .map(|p| {
                Ok(Rule {
                    glob: Pattern::new(&p.component_glob())?,
                    directory_only: p.directory_only(),
                    reason: p.reason,
                })
            })
            .collect::<Result<_, PatternError>>()?;

        Ok(Self { rules })
    }

    /// Returns the skip reason if `name` is known noise.
    ///
    /// Matching is case-insensitive and treats `\` as `/`. Directory rules
    /// match any parent component, file rules match the final component.
    pub fn should_skip(&self, name: &str) -> Option<SkipReason> {
        let normalized = name.replace('\\', "/");
        let components: Vec<&str> = normalized.split('/').filter(|c| !c.is_empty()).collect();
        let (file_name, parents) = match normalized.ends_with('/') {
            // A bare directory name only has directory components
            true => (None, components.as_slice()),
            false => match components.split_last() {
                Some((last, rest)) => (Some(*last), rest),
                None => return None,
            },
        };

        self.rules.iter().find_map(|rule| {
            let hit = if rule.directory_only {
                parents.iter().any(|c| rule.matches(c))
            } else {
                file_name.is_some_and(|f| rule.matches(f))
            };
            hit.then_some(rule.reason)
        })
    }
}
