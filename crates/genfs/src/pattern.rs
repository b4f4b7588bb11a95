//! Glob patterns over virtual paths.
//!
//! Supports `*`, `?`, `[...]`, `**` (via the `glob` crate) plus `{a,b}`
//! alternation, which is expanded up front into plain patterns. The
//! expansion also yields *bases*: the magic-free leading directories a
//! walk has to start from, so matching never scans the whole tree.

use glob::{MatchOptions, Pattern, PatternError};

use crate::vfs::path::{self, ROOT};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

fn is_magic(segment: &str) -> bool {
    segment.contains(['*', '?', '['])
}

/// Expand `{a,b}` alternatives into separate patterns.
pub fn expand(pattern: &str) -> Vec<String> {
    let Some(open) = pattern.find('{') else {
        return vec![pattern.to_string()];
    };

    let mut depth = 0;
    let mut close = None;
    let mut splits = Vec::new();
    for (idx, ch) in pattern[open..].char_indices() {
        let idx = open + idx;
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(idx),
            _ => {}
        }
    }
    let Some(close) = close else {
        // Unbalanced: the brace is literal
        return vec![pattern.to_string()];
    };

    let prefix = &pattern[..open];
    let suffix = &pattern[close + 1..];
    let mut bounds = vec![open];
    bounds.extend(splits);
    bounds.push(close);

    bounds
        .windows(2)
        .flat_map(|w| expand(&format!("{prefix}{}{suffix}", &pattern[w[0] + 1..w[1]])))
        .collect()
}

/// Directories a walk must start from to find every match of `pattern`.
pub fn bases(pattern: &str) -> Vec<String> {
    let mut bases: Vec<String> = Vec::new();
    for expanded in expand(pattern) {
        let segments: Vec<&str> = path::segments(&expanded).collect();
        let literal = segments.iter().take_while(|seg| !is_magic(seg)).count();
        // The final segment is what gets matched, never a place to walk from
        let depth = literal.min(segments.len().saturating_sub(1));
        let base = if depth == 0 {
            ROOT.to_string()
        } else {
            segments[..depth].join("/")
        };
        if !bases.contains(&base) {
            bases.push(base);
        }
    }

    // Drop bases nested under another base; the outer walk covers them
    let all = bases.clone();
    bases.retain(|base| {
        !all.iter()
            .any(|other| other != base && path::relative(other, base).is_some())
    });
    bases.sort();
    bases
}

/// A compiled pattern, alternatives included.
#[derive(Debug, Clone)]
pub struct Matcher {
    source: String,
    patterns: Vec<Pattern>,
}

impl Matcher {
    /// Compile `pattern`.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let patterns = expand(pattern)
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            source: pattern.to_string(),
            patterns,
        })
    }

    /// The pattern this matcher was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if `path` matches any alternative.
    pub fn matches(&self, path: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_braces() {
        assert_eq!(expand("a/*.go"), vec!["a/*.go"]);
        assert_eq!(expand("{a,b}/x"), vec!["a/x", "b/x"]);
        assert_eq!(
            expand("view/{index,about/{a,b}}.svelte"),
            vec!["view/index.svelte", "view/about/a.svelte", "view/about/b.svelte"]
        );
        assert_eq!(expand("a/{b"), vec!["a/{b"]);
    }

    #[test]
    fn test_bases() {
        assert_eq!(bases("view/**/*.svelte"), vec!["view"]);
        assert_eq!(bases("*.go"), vec!["."]);
        assert_eq!(bases("{controller,view}/**/*.go"), vec!["controller", "view"]);
        assert_eq!(bases("{view,view/about}/*.svelte"), vec!["view"]);
        assert_eq!(bases("a/b/c.txt"), vec!["a/b"]);
    }

    #[test]
    fn test_matcher() {
        let m = Matcher::new("view/**/*.svelte").unwrap();
        assert!(m.matches("view/index.svelte"));
        assert!(m.matches("view/about/_about.svelte"));
        assert!(!m.matches("view/index.go"));
        assert!(!m.matches("other/index.svelte"));

        let star = Matcher::new("view/*.svelte").unwrap();
        assert!(!star.matches("view/about/x.svelte"));

        let alt = Matcher::new("{a,b}.txt").unwrap();
        assert!(alt.matches("b.txt"));
        assert_eq!(alt.as_str(), "{a,b}.txt");
        assert!(Matcher::new("[").is_err());
    }
}
