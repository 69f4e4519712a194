use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid exclusion pattern {0:?}")]
pub struct PatternError(pub String);

/// Type-name pattern. `^abc` matches a prefix, `abc$` a suffix, `^abc$` the
/// whole name and anything else a substring. Matching is case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExclusionPattern {
    Prefix(String),
    Suffix(String),
    Exact(String),
    Contains(String),
}

impl ExclusionPattern {
    pub fn matches(&self, type_name: &str) -> bool {
        match self {
            ExclusionPattern::Prefix(prefix) => type_name.starts_with(prefix.as_str()),
            ExclusionPattern::Suffix(suffix) => type_name.ends_with(suffix.as_str()),
            ExclusionPattern::Exact(name) => type_name == name,
            ExclusionPattern::Contains(needle) => type_name.contains(needle.as_str()),
        }
    }
}

impl FromStr for ExclusionPattern {
    type Err = PatternError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let anchored_start = raw.strip_prefix('^');
        let body = anchored_start.unwrap_or(raw);
        let (body, anchored_end) = match body.strip_suffix('$') {
            Some(body) => (body, true),
            None => (body, false),
        };
        if body.is_empty() {
            return Err(PatternError(raw.to_owned()));
        }
        let body = body.to_owned();
        Ok(match (anchored_start.is_some(), anchored_end) {
            (true, true) => ExclusionPattern::Exact(body),
            (true, false) => ExclusionPattern::Prefix(body),
            (false, true) => ExclusionPattern::Suffix(body),
            (false, false) => ExclusionPattern::Contains(body),
        })
    }
}

impl fmt::Display for ExclusionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionPattern::Prefix(body) => write!(f, "^{body}"),
            ExclusionPattern::Suffix(body) => write!(f, "{body}$"),
            ExclusionPattern::Exact(body) => write!(f, "^{body}$"),
            ExclusionPattern::Contains(body) => f.write_str(body),
        }
    }
}

type ExclusionHook = dyn Fn(&str) -> bool + Send + Sync;

/// Process-wide exclusion rules. Built once at configuration time and shared
/// read-only by every session.
#[derive(Clone, Default)]
pub struct ExclusionSet {
    patterns: Arc<[ExclusionPattern]>,
    hook: Option<Arc<ExclusionHook>>,
}

impl ExclusionSet {
    pub fn new(patterns: Vec<ExclusionPattern>) -> Self {
        Self {
            patterns: patterns.into(),
            hook: None,
        }
    }

    pub fn parse<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|raw| raw.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(patterns))
    }

    /// Host-supplied predicate consulted in addition to the patterns.
    pub fn with_hook(mut self, hook: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn is_excluded(&self, type_name: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(type_name))
            || self.hook.as_ref().is_some_and(|hook| hook(type_name))
    }

    pub fn patterns(&self) -> &[ExclusionPattern] {
        &self.patterns
    }
}

impl fmt::Debug for ExclusionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusionSet")
            .field("patterns", &self.patterns)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}
