//! Artifact-rule engine (C8): derives materials/products sets from a
//! statement's predicate, parses the `expectedMaterials`/`expectedProducts`
//! DSL, and applies first-matching-rule-wins semantics per artifact.
//!
//! The rule grammar and "first matching rule wins" engine are standard
//! in-toto artifact-rule semantics; the glob matching underneath is in
//! [`super::pattern`].

use crate::claims::ClaimIndex;
use crate::error::ArtifactError;
use crate::predicate::Predicate;
use crate::types::{ResourceDescriptor, Statement};

use super::pattern::ArtifactPattern;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSetKind {
    Materials,
    Products,
}

impl ArtifactSetKind {
    fn as_str(self) -> &'static str {
        match self {
            ArtifactSetKind::Materials => "MATERIALS",
            ArtifactSetKind::Products => "PRODUCTS",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Rule {
    Match {
        pattern: ArtifactPattern,
        dst_kind: ArtifactSetKind,
        other_step: String,
        /// The optional `IN <src>` clause: a directory prefix stripped from
        /// the artifact's own path before matching `pattern` against it.
        src_prefix: Option<String>,
        /// The optional `IN <dst>` clause: a directory prefix stripped from
        /// the other step's artifact paths before comparing them to this
        /// artifact's (already `src_prefix`-stripped) path.
        dst_prefix: Option<String>,
    },
    Allow {
        pattern: ArtifactPattern,
    },
    Disallow {
        pattern: ArtifactPattern,
    },
    Require {
        pattern: ArtifactPattern,
    },
    Create {
        pattern: ArtifactPattern,
    },
    Delete {
        pattern: ArtifactPattern,
    },
    Modify {
        pattern: ArtifactPattern,
    },
}

impl Rule {
    fn pattern(&self) -> &ArtifactPattern {
        match self {
            Rule::Match { pattern, .. }
            | Rule::Allow { pattern }
            | Rule::Disallow { pattern }
            | Rule::Require { pattern }
            | Rule::Create { pattern }
            | Rule::Delete { pattern }
            | Rule::Modify { pattern } => pattern,
        }
    }

    fn text(&self) -> String {
        match self {
            Rule::Match { pattern, dst_kind, other_step, src_prefix, dst_prefix } => {
                let src_clause = src_prefix.as_deref().map_or(String::new(), |s| format!(" IN {s}"));
                let dst_clause = dst_prefix.as_deref().map_or(String::new(), |s| format!(" IN {s}"));
                format!(
                    "MATCH {}{src_clause} WITH {}{dst_clause} FROM {other_step}",
                    pattern.as_str(),
                    dst_kind.as_str()
                )
            }
            Rule::Allow { pattern } => format!("ALLOW {}", pattern.as_str()),
            Rule::Disallow { pattern } => format!("DISALLOW {}", pattern.as_str()),
            Rule::Require { pattern } => format!("REQUIRE {}", pattern.as_str()),
            Rule::Create { pattern } => format!("CREATE {}", pattern.as_str()),
            Rule::Delete { pattern } => format!("DELETE {}", pattern.as_str()),
            Rule::Modify { pattern } => format!("MODIFY {}", pattern.as_str()),
        }
    }
}

fn compile_pattern(raw: &str) -> Result<ArtifactPattern, ArtifactError> {
    ArtifactPattern::new(raw).map_err(|e| ArtifactError::MalformedRule { reason: e.to_string() })
}

/// Parse one `expectedMaterials`/`expectedProducts` rule line.
///
/// Grammar (case-sensitive keywords, whitespace-separated tokens):
/// `MATCH <pattern> [IN <src>] WITH (MATERIALS|PRODUCTS) [IN <dst>] FROM <step>`,
/// `ALLOW <pattern>`, `DISALLOW <pattern>`, `REQUIRE <pattern>`,
/// `CREATE <pattern>`, `DELETE <pattern>`, `MODIFY <pattern>`.
pub fn parse_rule(text: &str) -> Result<Rule, ArtifactError> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let malformed = || ArtifactError::MalformedRule { reason: format!("cannot parse rule '{text}'") };

    match tokens.as_slice() {
        ["MATCH", rest @ ..] => parse_match_rule(text, rest),
        ["ALLOW", pattern] => Ok(Rule::Allow { pattern: compile_pattern(pattern)? }),
        ["DISALLOW", pattern] => Ok(Rule::Disallow { pattern: compile_pattern(pattern)? }),
        ["REQUIRE", pattern] => Ok(Rule::Require { pattern: compile_pattern(pattern)? }),
        ["CREATE", pattern] => Ok(Rule::Create { pattern: compile_pattern(pattern)? }),
        ["DELETE", pattern] => Ok(Rule::Delete { pattern: compile_pattern(pattern)? }),
        ["MODIFY", pattern] => Ok(Rule::Modify { pattern: compile_pattern(pattern)? }),
        _ => Err(malformed()),
    }
}

/// Parse the token sequence after the leading `MATCH` keyword:
/// `<pattern> [IN <src>] WITH <MATERIALS|PRODUCTS> [IN <dst>] FROM <step>`.
fn parse_match_rule(text: &str, rest: &[&str]) -> Result<Rule, ArtifactError> {
    let malformed = || ArtifactError::MalformedRule { reason: format!("cannot parse rule '{text}'") };

    let mut i = 0usize;
    let pattern = *rest.get(i).ok_or_else(malformed)?;
    i += 1;

    let src_prefix = if rest.get(i) == Some(&"IN") {
        let prefix = *rest.get(i + 1).ok_or_else(malformed)?;
        i += 2;
        Some(prefix.to_string())
    } else {
        None
    };

    if rest.get(i) != Some(&"WITH") {
        return Err(malformed());
    }
    i += 1;

    let dst_kind = match rest.get(i) {
        Some(&"MATERIALS") => ArtifactSetKind::Materials,
        Some(&"PRODUCTS") => ArtifactSetKind::Products,
        _ => return Err(malformed()),
    };
    i += 1;

    let dst_prefix = if rest.get(i) == Some(&"IN") {
        let prefix = *rest.get(i + 1).ok_or_else(malformed)?;
        i += 2;
        Some(prefix.to_string())
    } else {
        None
    };

    if rest.get(i) != Some(&"FROM") {
        return Err(malformed());
    }
    i += 1;

    let step = *rest.get(i).ok_or_else(malformed)?;
    i += 1;

    if i != rest.len() {
        return Err(malformed());
    }

    Ok(Rule::Match {
        pattern: compile_pattern(pattern)?,
        dst_kind,
        other_step: step.to_string(),
        src_prefix,
        dst_prefix,
    })
}

/// Strip `prefix` (treated as a directory component, so `"<prefix>/"`) from
/// `path`. With no prefix, the path passes through unchanged.
fn strip_in_prefix<'a>(path: &'a str, prefix: Option<&str>) -> Option<&'a str> {
    match prefix {
        None => Some(path),
        Some(p) => path.strip_prefix(p).and_then(|rest| rest.strip_prefix('/')),
    }
}

fn artifact_path(d: &ResourceDescriptor) -> &str {
    d.name.as_deref().or(d.uri.as_deref()).unwrap_or("")
}

/// The materials/products pair a single statement contributes, derived by
/// predicate shape:
/// - Link: `materials` from the predicate's own `materials` field, `products`
///   from the statement's `subject`.
/// - SLSA provenance: `materials` from `buildDefinition.resolvedDependencies`,
///   `products` from `subject`.
/// - anything else (including `Unknown`): `subject` is treated as the
///   `products` set; `materials` is empty.
pub fn derive_artifact_sets(statement: &Statement, predicate: &Predicate) -> (Vec<ResourceDescriptor>, Vec<ResourceDescriptor>) {
    match predicate {
        Predicate::Link(link) => (link.materials.clone(), statement.subject.clone()),
        Predicate::ProvenanceV1(p) => {
            (p.build_definition.resolved_dependencies.clone(), statement.subject.clone())
        }
        _ => (Vec::new(), statement.subject.clone()),
    }
}

fn other_step_set<'a>(
    index: &'a ClaimIndex,
    step: &str,
    other_step: &str,
    kind: ArtifactSetKind,
) -> Result<Vec<ResourceDescriptor>, ArtifactError> {
    let claims = index.for_step(other_step).ok_or_else(|| ArtifactError::MissingReferencedStep {
        step: step.to_string(),
        other_step: other_step.to_string(),
    })?;
    let mut out = Vec::new();
    for statement in claims.values() {
        let predicate = Predicate::decode(&statement.predicate_type, &statement.predicate);
        let (materials, products) = derive_artifact_sets(statement, &predicate);
        match kind {
            ArtifactSetKind::Materials => out.extend(materials),
            ArtifactSetKind::Products => out.extend(products),
        }
    }
    Ok(out)
}

fn same_identity(a: &ResourceDescriptor, b: &ResourceDescriptor) -> bool {
    match (&a.name, &b.name) {
        (Some(x), Some(y)) => return x == y,
        _ => {}
    }
    match (&a.uri, &b.uri) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Apply `rules` to every artifact in `target`, first-matching-rule-wins.
///
/// An artifact that matches no rule passes uncontested — only a matched
/// `DISALLOW` (or a failed cross-step `MATCH`, `CREATE`, `DELETE`, `MODIFY`
/// check) produces a violation. `REQUIRE` is a listwide
/// assertion evaluated once after the per-artifact pass.
pub fn apply_rule_list(
    step: &str,
    rules: &[Rule],
    target: &[ResourceDescriptor],
    complement: &[ResourceDescriptor],
    index: &ClaimIndex,
) -> Result<(), ArtifactError> {
    for artifact in target {
        let path = artifact_path(artifact);
        for rule in rules {
            // Only `MATCH`'s optional `IN <src>` clause changes which path is
            // tested against the rule's pattern; an artifact outside that
            // source prefix simply isn't governed by this rule.
            let match_path = match rule {
                Rule::Match { src_prefix, .. } => match strip_in_prefix(path, src_prefix.as_deref()) {
                    Some(p) => p,
                    None => continue,
                },
                _ => path,
            };
            if !rule.pattern().matches(match_path) {
                continue;
            }
            match rule {
                Rule::Match { dst_kind, other_step, dst_prefix, .. } => {
                    let others = other_step_set(index, step, other_step, *dst_kind)?;
                    let found = others.iter().any(|d| {
                        let other_path = artifact_path(d);
                        strip_in_prefix(other_path, dst_prefix.as_deref()) == Some(match_path)
                            && d.matches(artifact)
                    });
                    if !found {
                        return Err(ArtifactError::ArtifactRuleViolation {
                            step: step.to_string(),
                            rule: rule.text(),
                            path: path.to_string(),
                        });
                    }
                }
                Rule::Allow { .. } => {}
                Rule::Disallow { .. } => {
                    return Err(ArtifactError::ArtifactRuleViolation {
                        step: step.to_string(),
                        rule: rule.text(),
                        path: path.to_string(),
                    })
                }
                Rule::Create { .. } => {
                    if complement.iter().any(|d| same_identity(d, artifact)) {
                        return Err(ArtifactError::ArtifactRuleViolation {
                            step: step.to_string(),
                            rule: rule.text(),
                            path: path.to_string(),
                        });
                    }
                }
                Rule::Delete { .. } => {
                    if complement.iter().any(|d| same_identity(d, artifact)) {
                        return Err(ArtifactError::ArtifactRuleViolation {
                            step: step.to_string(),
                            rule: rule.text(),
                            path: path.to_string(),
                        });
                    }
                }
                Rule::Modify { .. } => {
                    let unchanged = complement
                        .iter()
                        .any(|d| same_identity(d, artifact) && d.matches(artifact));
                    if unchanged {
                        return Err(ArtifactError::ArtifactRuleViolation {
                            step: step.to_string(),
                            rule: rule.text(),
                            path: path.to_string(),
                        });
                    }
                }
                Rule::Require { .. } => {}
            }
            break;
        }
    }

    for rule in rules {
        if let Rule::Require { pattern } = rule {
            if !target.iter().any(|a| pattern.matches(artifact_path(a))) {
                return Err(ArtifactError::ArtifactRuleViolation {
                    step: step.to_string(),
                    rule: rule.text(),
                    path: String::new(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::ClaimIndex;
    use serde_json::json;

    fn descriptor(name: &str, sha256: &str) -> ResourceDescriptor {
        let mut d = ResourceDescriptor { name: Some(name.to_string()), ..Default::default() };
        d.digest.insert("sha256".to_string(), sha256.to_string());
        d
    }

    #[test]
    fn parse_match_rule() {
        let rule = parse_rule("MATCH src/main.rs WITH PRODUCTS FROM build").unwrap();
        assert!(matches!(rule, Rule::Match { dst_kind: ArtifactSetKind::Products, .. }));
    }

    #[test]
    fn parse_allow_disallow() {
        assert!(matches!(parse_rule("ALLOW *").unwrap(), Rule::Allow { .. }));
        assert!(matches!(parse_rule("DISALLOW *.key").unwrap(), Rule::Disallow { .. }));
    }

    #[test]
    fn malformed_rule_is_rejected() {
        assert!(parse_rule("FROBNICATE *").is_err());
        assert!(parse_rule("MATCH * WITH BOGUS FROM step").is_err());
    }

    #[test]
    fn parse_match_rule_with_in_clauses() {
        let rule = parse_rule("MATCH *.tar.gz IN dist WITH PRODUCTS IN release FROM package").unwrap();
        match rule {
            Rule::Match { src_prefix, dst_prefix, dst_kind, other_step, .. } => {
                assert_eq!(src_prefix.as_deref(), Some("dist"));
                assert_eq!(dst_prefix.as_deref(), Some("release"));
                assert_eq!(dst_kind, ArtifactSetKind::Products);
                assert_eq!(other_step, "package");
            }
            _ => panic!("expected Rule::Match"),
        }

        let src_only = parse_rule("MATCH *.tar.gz IN dist WITH PRODUCTS FROM package").unwrap();
        match src_only {
            Rule::Match { src_prefix, dst_prefix, .. } => {
                assert_eq!(src_prefix.as_deref(), Some("dist"));
                assert_eq!(dst_prefix, None);
            }
            _ => panic!("expected Rule::Match"),
        }

        let dst_only = parse_rule("MATCH *.tar.gz WITH PRODUCTS IN release FROM package").unwrap();
        match dst_only {
            Rule::Match { src_prefix, dst_prefix, .. } => {
                assert_eq!(src_prefix, None);
                assert_eq!(dst_prefix.as_deref(), Some("release"));
            }
            _ => panic!("expected Rule::Match"),
        }
    }

    #[test]
    fn match_rule_with_in_clauses_succeeds_when_relative_paths_agree() {
        let rules = vec![parse_rule("MATCH *.tar.gz IN dist WITH PRODUCTS IN release FROM package").unwrap()];
        let target = vec![descriptor("dist/app.tar.gz", "abc123")];

        let mut index = ClaimIndex::new();
        let statement = Statement {
            type_: crate::types::STATEMENT_TYPE_URI.to_string(),
            predicate_type: "https://in-toto.io/Statement/v0.3/link".to_string(),
            subject: vec![descriptor("release/app.tar.gz", "abc123")],
            predicate: json!({"command": []}),
        };
        index.insert("package", vec!["signer".to_string()], statement);

        assert!(apply_rule_list("build", &rules, &target, &[], &index).is_ok());
    }

    #[test]
    fn match_rule_with_in_clauses_fails_when_relative_paths_disagree() {
        let rules = vec![parse_rule("MATCH *.tar.gz IN dist WITH PRODUCTS IN release FROM package").unwrap()];
        let target = vec![descriptor("dist/app.tar.gz", "abc123")];

        let mut index = ClaimIndex::new();
        let statement = Statement {
            type_: crate::types::STATEMENT_TYPE_URI.to_string(),
            predicate_type: "https://in-toto.io/Statement/v0.3/link".to_string(),
            subject: vec![descriptor("release/other.tar.gz", "abc123")],
            predicate: json!({"command": []}),
        };
        index.insert("package", vec!["signer".to_string()], statement);

        let err = apply_rule_list("build", &rules, &target, &[], &index).unwrap_err();
        assert!(matches!(err, ArtifactError::ArtifactRuleViolation { .. }));
    }

    #[test]
    fn match_rule_with_src_prefix_ignores_artifacts_outside_it() {
        let rules = vec![
            parse_rule("MATCH * IN dist WITH PRODUCTS FROM package").unwrap(),
            parse_rule("ALLOW *").unwrap(),
        ];
        // Not under "dist/", so the MATCH rule shouldn't govern it at all;
        // the later ALLOW rule should pick it up instead and pass.
        let target = vec![descriptor("README.md", "abc123")];
        let index = ClaimIndex::new();
        assert!(apply_rule_list("build", &rules, &target, &[], &index).is_ok());
    }

    #[test]
    fn unmatched_artifact_passes_uncontested() {
        let rules = vec![parse_rule("ALLOW README.md").unwrap()];
        let target = vec![descriptor("src/main.rs", "abc")];
        let index = ClaimIndex::new();
        assert!(apply_rule_list("build", &rules, &target, &[], &index).is_ok());
    }

    #[test]
    fn disallow_match_is_a_violation() {
        let rules = vec![parse_rule("DISALLOW *.key").unwrap()];
        let target = vec![descriptor("secrets.key", "abc")];
        let index = ClaimIndex::new();
        let err = apply_rule_list("build", &rules, &target, &[], &index).unwrap_err();
        assert!(matches!(err, ArtifactError::ArtifactRuleViolation { .. }));
    }

    #[test]
    fn match_rule_requires_digest_agreement_with_other_step() {
        let rules = vec![parse_rule("MATCH * WITH MATERIALS FROM package").unwrap()];
        let target = vec![descriptor("app.tar.gz", "abc123")];

        let mut index = ClaimIndex::new();
        let statement = Statement {
            type_: crate::types::STATEMENT_TYPE_URI.to_string(),
            predicate_type: "https://in-toto.io/Statement/v0.3/link".to_string(),
            subject: vec![],
            predicate: json!({"command": [], "materials": [descriptor("app.tar.gz", "abc123")]}),
        };
        index.insert("package", vec!["signer".to_string()], statement);

        assert!(apply_rule_list("build", &rules, &target, &[], &index).is_ok());
    }

    #[test]
    fn match_rule_fails_on_digest_mismatch() {
        let rules = vec![parse_rule("MATCH * WITH MATERIALS FROM package").unwrap()];
        let target = vec![descriptor("app.tar.gz", "abc123")];

        let mut index = ClaimIndex::new();
        let statement = Statement {
            type_: crate::types::STATEMENT_TYPE_URI.to_string(),
            predicate_type: "https://in-toto.io/Statement/v0.3/link".to_string(),
            subject: vec![],
            predicate: json!({"command": [], "materials": [descriptor("app.tar.gz", "different")]}),
        };
        index.insert("package", vec!["signer".to_string()], statement);

        let err = apply_rule_list("build", &rules, &target, &[], &index).unwrap_err();
        assert!(matches!(err, ArtifactError::ArtifactRuleViolation { .. }));
    }

    #[test]
    fn match_rule_missing_step_is_reported() {
        let rules = vec![parse_rule("MATCH * WITH MATERIALS FROM nonexistent").unwrap()];
        let target = vec![descriptor("app.tar.gz", "abc123")];
        let index = ClaimIndex::new();
        let err = apply_rule_list("build", &rules, &target, &[], &index).unwrap_err();
        assert!(matches!(err, ArtifactError::MissingReferencedStep { .. }));
    }

    #[test]
    fn create_rule_rejects_artifact_already_present_as_material() {
        let rules = vec![parse_rule("CREATE *").unwrap()];
        let target = vec![descriptor("out.bin", "abc")];
        let complement = vec![descriptor("out.bin", "abc")];
        let index = ClaimIndex::new();
        let err = apply_rule_list("build", &rules, &target, &complement, &index).unwrap_err();
        assert!(matches!(err, ArtifactError::ArtifactRuleViolation { .. }));
    }

    #[test]
    fn require_rule_demands_presence_in_the_whole_set() {
        let rules = vec![parse_rule("REQUIRE LICENSE").unwrap()];
        let target = vec![descriptor("src/main.rs", "abc")];
        let index = ClaimIndex::new();
        let err = apply_rule_list("build", &rules, &target, &[], &index).unwrap_err();
        assert!(matches!(err, ArtifactError::ArtifactRuleViolation { .. }));
    }
}
