//! Artifact-path glob matching (C8).
//!
//! Same segment/escape/recursive-backtracking structure as a tool-name glob
//! matcher, but without a dot-stopping convention: artifact paths have no
//! such special character, so `*` here matches any sequence (including `/`),
//! as in-toto's own artifact rules expect.

use std::fmt;

const MAX_PATTERN_LENGTH: usize = 1024;
const MAX_SEGMENTS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid artifact pattern '{}': {}", self.pattern, self.message)
    }
}

impl std::error::Error for PatternError {}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Star,
    Question,
}

/// A compiled artifact-path pattern.
#[derive(Debug, Clone)]
pub struct ArtifactPattern {
    pattern: String,
    segments: Vec<Segment>,
}

impl ArtifactPattern {
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.len() > MAX_PATTERN_LENGTH {
            return Err(PatternError {
                pattern: pattern.chars().take(50).collect::<String>() + "...",
                message: format!("pattern length exceeds maximum {MAX_PATTERN_LENGTH}"),
            });
        }
        let segments = parse_pattern(pattern)?;
        if segments.len() > MAX_SEGMENTS {
            return Err(PatternError {
                pattern: pattern.to_string(),
                message: format!("pattern has more than {MAX_SEGMENTS} segments"),
            });
        }
        Ok(Self { pattern: pattern.to_string(), segments })
    }

    /// Full-string match, case-sensitive, anchored at both ends.
    pub fn matches(&self, path: &str) -> bool {
        match_recursive(&self.segments, path)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, PatternError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => literal.push(escaped),
                None => {
                    return Err(PatternError {
                        pattern: pattern.to_string(),
                        message: "trailing backslash".to_string(),
                    })
                }
            },
            '*' => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Star);
            }
            '?' => {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Question);
            }
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

fn match_recursive(segments: &[Segment], input: &str) -> bool {
    if segments.is_empty() {
        return input.is_empty();
    }
    match &segments[0] {
        Segment::Literal(lit) => {
            if input.starts_with(lit.as_str()) {
                match_recursive(&segments[1..], &input[lit.len()..])
            } else {
                false
            }
        }
        Segment::Star => {
            for i in 0..=input.len() {
                if !input.is_char_boundary(i) {
                    continue;
                }
                if match_recursive(&segments[1..], &input[i..]) {
                    return true;
                }
            }
            false
        }
        Segment::Question => {
            let mut iter = input.char_indices();
            match iter.next() {
                Some((_, c)) => match_recursive(&segments[1..], &input[c.len_utf8()..]),
                None => false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_requires_exact_match() {
        let p = ArtifactPattern::new("foo.txt").unwrap();
        assert!(p.matches("foo.txt"));
        assert!(!p.matches("foo.txt.bak"));
    }

    #[test]
    fn star_crosses_path_separators() {
        let p = ArtifactPattern::new("src/*").unwrap();
        assert!(p.matches("src/main.rs"));
        assert!(p.matches("src/nested/deep/file.rs"));
        assert!(!p.matches("lib/main.rs"));
    }

    #[test]
    fn question_matches_single_char() {
        let p = ArtifactPattern::new("v?.bin").unwrap();
        assert!(p.matches("v1.bin"));
        assert!(!p.matches("v12.bin"));
    }

    #[test]
    fn escaped_star_is_literal() {
        let p = ArtifactPattern::new(r"weird\*name").unwrap();
        assert!(p.matches("weird*name"));
        assert!(!p.matches("weirdxname"));
    }

    #[test]
    fn bare_star_matches_everything() {
        let p = ArtifactPattern::new("*").unwrap();
        assert!(p.matches(""));
        assert!(p.matches("a/b/c.txt"));
    }
}
