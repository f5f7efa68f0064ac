//! Path rules: action levels and the matchers used by path whitelists and blacklists.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::utils::{
    absolutize, contains_brace_alternation, contains_glob_chars, expand_home, normalize_lexically,
};

/// Kind of filesystem operation, ordered from least to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathActionLevel {
    Read,
    Readlink,
    Write,
    Delete,
    Execute,
}

impl PathActionLevel {
    /// All levels in ascending order.
    pub const ALL: [PathActionLevel; 5] = [
        PathActionLevel::Read,
        PathActionLevel::Readlink,
        PathActionLevel::Write,
        PathActionLevel::Delete,
        PathActionLevel::Execute,
    ];

    /// Parse a single action name.
    pub fn from_action(action: &str) -> Option<Self> {
        match action.trim().to_ascii_lowercase().as_str() {
            "read" => Some(PathActionLevel::Read),
            "readlink" => Some(PathActionLevel::Readlink),
            "write" => Some(PathActionLevel::Write),
            "delete" => Some(PathActionLevel::Delete),
            "execute" => Some(PathActionLevel::Execute),
            _ => None,
        }
    }

    /// Derive the requested level from a comma separated action string.
    ///
    /// The highest listed action wins. Unknown or missing actions count as
    /// `Execute` so that they are never covered by a narrower rule.
    pub fn of_actions(actions: &str) -> Self {
        let mut level: Option<PathActionLevel> = None;
        for action in actions.split(',').filter(|a| !a.trim().is_empty()) {
            let parsed = Self::from_action(action).unwrap_or(PathActionLevel::Execute);
            level = Some(level.map_or(parsed, |l| l.max(parsed)));
        }
        level.unwrap_or(PathActionLevel::Execute)
    }

    /// All levels below or equal to `self`.
    pub fn and_below(self) -> BTreeSet<PathActionLevel> {
        Self::ALL.iter().copied().filter(|l| *l <= self).collect()
    }

    /// All levels above or equal to `self`.
    pub fn and_above(self) -> BTreeSet<PathActionLevel> {
        Self::ALL.iter().copied().filter(|l| *l >= self).collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            PathActionLevel::Read => "read",
            PathActionLevel::Readlink => "readlink",
            PathActionLevel::Write => "write",
            PathActionLevel::Delete => "delete",
            PathActionLevel::Execute => "execute",
        }
    }
}

impl std::fmt::Display for PathActionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
enum PathPattern {
    /// Exactly this path.
    Exact(PathBuf),
    /// This path and everything below it (`dir/**`).
    Prefix(PathBuf),
    /// A glob where `*` stays within one component and `**` crosses them.
    Glob(Pattern),
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A path pattern together with the action levels it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "PathRule", into = "PathRule")]
pub struct PathMatcher {
    source: String,
    pattern: PathPattern,
    levels: BTreeSet<PathActionLevel>,
}

impl PathMatcher {
    /// Create a matcher covering exactly the given levels.
    ///
    /// Relative patterns are anchored at the current working directory.
    pub fn new(
        pattern: &str,
        levels: impl IntoIterator<Item = PathActionLevel>,
    ) -> Result<Self, ConfigError> {
        let levels: BTreeSet<_> = levels.into_iter().collect();
        if levels.is_empty() {
            return Err(ConfigError::InvalidPathPattern {
                pattern: pattern.to_string(),
                reason: "rule covers no action level".to_string(),
            });
        }
        Ok(Self {
            source: pattern.to_string(),
            pattern: compile(pattern)?,
            levels,
        })
    }

    /// Whitelist style rule: allows `level` and every level below it.
    pub fn up_to(pattern: &str, level: PathActionLevel) -> Result<Self, ConfigError> {
        Self::new(pattern, level.and_below())
    }

    /// Blacklist style rule: blocks `level` and every level above it.
    pub fn at_least(pattern: &str, level: PathActionLevel) -> Result<Self, ConfigError> {
        Self::new(pattern, level.and_above())
    }

    /// The pattern as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The covered levels.
    pub fn levels(&self) -> &BTreeSet<PathActionLevel> {
        &self.levels
    }

    /// Check whether an absolute, normalized path matches the pattern.
    pub fn matches(&self, path: &Path) -> bool {
        match &self.pattern {
            PathPattern::Exact(exact) => path == exact,
            PathPattern::Prefix(prefix) => path.starts_with(prefix),
            PathPattern::Glob(glob) => glob.matches_path_with(path, GLOB_OPTIONS),
        }
    }

    /// Check whether this rule covers the path for the requested level.
    pub fn covers(&self, path: &Path, level: PathActionLevel) -> bool {
        self.levels.contains(&level) && self.matches(path)
    }
}

fn compile(raw: &str) -> Result<PathPattern, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidPathPattern {
        pattern: raw.to_string(),
        reason,
    };
    if raw.trim().is_empty() {
        return Err(invalid("pattern cannot be empty".to_string()));
    }
    if contains_brace_alternation(raw) {
        return Err(invalid(
            "brace alternation is not supported, use one rule per path".to_string(),
        ));
    }

    let expanded = expand_home(raw);
    let anchored = if Path::new(&expanded).is_absolute() {
        expanded
    } else {
        let cwd = std::env::current_dir().map_err(|e| invalid(e.to_string()))?;
        let base = cwd.display().to_string();
        let base = if contains_glob_chars(&expanded) {
            Pattern::escape(&base)
        } else {
            base
        };
        format!("{}/{}", base.trim_end_matches('/'), expanded)
    };

    if let Some(dir) = anchored.strip_suffix("/**") {
        if !contains_glob_chars(dir) {
            return Ok(PathPattern::Prefix(normalize_lexically(Path::new(dir))));
        }
    }
    if contains_glob_chars(&anchored) {
        let glob = Pattern::new(&anchored).map_err(|e| invalid(e.to_string()))?;
        return Ok(PathPattern::Glob(glob));
    }
    let exact = absolutize(Path::new(&anchored)).map_err(|e| invalid(e.to_string()))?;
    Ok(PathPattern::Exact(exact))
}

/// Serialized form of a [`PathMatcher`].
///
/// Exactly one of `levels`, `upTo` or `atLeast` selects the covered levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PathRule {
    pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    levels: Option<Vec<PathActionLevel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    up_to: Option<PathActionLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    at_least: Option<PathActionLevel>,
}

impl TryFrom<PathRule> for PathMatcher {
    type Error = ConfigError;

    fn try_from(rule: PathRule) -> Result<Self, Self::Error> {
        match (rule.levels, rule.up_to, rule.at_least) {
            (Some(levels), None, None) => PathMatcher::new(&rule.pattern, levels),
            (None, Some(level), None) => PathMatcher::up_to(&rule.pattern, level),
            (None, None, Some(level)) => PathMatcher::at_least(&rule.pattern, level),
            _ => Err(ConfigError::InvalidPathPattern {
                pattern: rule.pattern,
                reason: "exactly one of levels, upTo or atLeast is required".to_string(),
            }),
        }
    }
}

impl From<PathMatcher> for PathRule {
    fn from(matcher: PathMatcher) -> Self {
        Self {
            pattern: matcher.source,
            levels: Some(matcher.levels.into_iter().collect()),
            up_to: None,
            at_least: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_of_actions() {
        assert_eq!(PathActionLevel::of_actions("read"), PathActionLevel::Read);
        assert_eq!(
            PathActionLevel::of_actions("read,write"),
            PathActionLevel::Write
        );
        assert_eq!(
            PathActionLevel::of_actions(" readlink , read "),
            PathActionLevel::Readlink
        );
        assert_eq!(
            PathActionLevel::of_actions("read,chmod"),
            PathActionLevel::Execute
        );
        assert_eq!(PathActionLevel::of_actions(""), PathActionLevel::Execute);
    }

    #[test]
    fn test_level_ranges() {
        let below = PathActionLevel::Write.and_below();
        assert!(below.contains(&PathActionLevel::Read));
        assert!(below.contains(&PathActionLevel::Write));
        assert!(!below.contains(&PathActionLevel::Delete));

        let above = PathActionLevel::Delete.and_above();
        assert!(above.contains(&PathActionLevel::Execute));
        assert!(!above.contains(&PathActionLevel::Write));
    }

    #[test]
    fn test_prefix_matcher() {
        let matcher = PathMatcher::up_to("/srv/data/**", PathActionLevel::Write).unwrap();
        assert!(matcher.covers(Path::new("/srv/data"), PathActionLevel::Read));
        assert!(matcher.covers(Path::new("/srv/data/a/b.txt"), PathActionLevel::Write));
        assert!(!matcher.covers(Path::new("/srv/data/a/b.txt"), PathActionLevel::Delete));
        assert!(!matcher.covers(Path::new("/srv/database"), PathActionLevel::Read));
    }

    #[test]
    fn test_glob_matcher() {
        let matcher = PathMatcher::up_to("/srv/*/input.txt", PathActionLevel::Read).unwrap();
        assert!(matcher.covers(Path::new("/srv/task1/input.txt"), PathActionLevel::Read));
        assert!(!matcher.covers(Path::new("/srv/a/b/input.txt"), PathActionLevel::Read));

        let deep = PathMatcher::up_to("/srv/**/*.rs", PathActionLevel::Read).unwrap();
        assert!(deep.covers(Path::new("/srv/a/b/main.rs"), PathActionLevel::Read));
        assert!(!deep.covers(Path::new("/srv/a/b/main.py"), PathActionLevel::Read));
    }

    #[test]
    fn test_exact_matcher() {
        let matcher = PathMatcher::at_least("/etc/passwd", PathActionLevel::Read).unwrap();
        assert!(matcher.covers(Path::new("/etc/passwd"), PathActionLevel::Execute));
        assert!(!matcher.covers(Path::new("/etc/passwd.bak"), PathActionLevel::Read));
    }

    #[test]
    fn test_relative_pattern_is_anchored_at_cwd() {
        let cwd = std::env::current_dir().unwrap();
        let matcher = PathMatcher::up_to("data/**", PathActionLevel::Read).unwrap();
        assert!(matcher.covers(&cwd.join("data/in.txt"), PathActionLevel::Read));
        assert!(!matcher.covers(Path::new("/data/in.txt"), PathActionLevel::Read));
    }

    #[test]
    fn test_invalid_rules() {
        assert!(PathMatcher::new("/tmp", Vec::<PathActionLevel>::new()).is_err());
        assert!(PathMatcher::up_to("", PathActionLevel::Read).is_err());
        assert!(PathMatcher::up_to("/tmp/[", PathActionLevel::Read).is_err());
    }

    #[test]
    fn test_brace_patterns() {
        let alternation = PathMatcher::up_to("/srv/{a,b}/**", PathActionLevel::Read);
        assert!(matches!(
            alternation,
            Err(ConfigError::InvalidPathPattern { .. })
        ));

        let literal = PathMatcher::up_to("/srv/{build}/**", PathActionLevel::Read).unwrap();
        assert!(literal.covers(Path::new("/srv/{build}/out.o"), PathActionLevel::Read));
    }

    #[test]
    fn test_rule_deserialization() {
        let matcher: PathMatcher =
            serde_json::from_str(r#"{"pattern": "/srv/**", "upTo": "write"}"#).unwrap();
        assert_eq!(matcher.levels().len(), 3);

        let matcher: PathMatcher =
            serde_json::from_str(r#"{"pattern": "/srv/**", "levels": ["delete"]}"#).unwrap();
        assert!(matcher.covers(Path::new("/srv/x"), PathActionLevel::Delete));
        assert!(!matcher.covers(Path::new("/srv/x"), PathActionLevel::Read));

        let ambiguous: Result<PathMatcher, _> =
            serde_json::from_str(r#"{"pattern": "/srv", "upTo": "read", "atLeast": "write"}"#);
        assert!(ambiguous.is_err());
    }
}
