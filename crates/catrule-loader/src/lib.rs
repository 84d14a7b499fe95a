//! Rule envelope ingestion: turns a YAML or JSON document of rule
//! definitions (expression text, optional metadata, optional inline tests)
//! into a finalized [`catrule_engine::Engine`], with the loader absorbing
//! per-rule compile failures rather than aborting the whole batch (spec §7:
//! "do not abort the engine unless the rule is required").

use catrule_engine::{Engine, EngineBuilder, OptimizeOptions, RuleId};
use serde::{Deserialize, Serialize};

/// Free-form descriptive fields a rule author may attach; none are required.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuleMetadata {
    pub id: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One inline expectation: does `event` match the owning rule or not.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleTest {
    pub name: Option<String>,
    pub event: serde_json::Value,
    pub expect: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleEnvelope {
    #[serde(default)]
    pub metadata: Option<RuleMetadata>,
    pub expression: String,
    #[serde(default)]
    pub tests: Vec<RuleTest>,
}

/// Top-level document shapes accepted: a `rules:` wrapper, a bare array, or
/// a single rule object.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
enum RuleFile {
    Wrapped { rules: Vec<RuleEnvelope> },
    List(Vec<RuleEnvelope>),
    Single(RuleEnvelope),
}

impl RuleFile {
    fn into_envelopes(self) -> Vec<RuleEnvelope> {
        match self {
            RuleFile::Wrapped { rules } => rules,
            RuleFile::List(rules) => rules,
            RuleFile::Single(rule) => vec![rule],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

/// Sniffs the document's format from its first non-whitespace byte — `{` or
/// `[` reads as JSON, anything else as YAML (JSON is a YAML subset, so this
/// only matters for picking the more specific parse-error messages).
pub fn detect_format(text: &str) -> FileFormat {
    match text.trim_start().chars().next() {
        Some('{') | Some('[') => FileFormat::Json,
        _ => FileFormat::Yaml,
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// When true, a rule that fails to compile is recorded in
    /// [`LoadReport::errors`] and skipped rather than registered.
    pub validate: bool,
    /// When true, each rule's inline `tests` are run against the finalized
    /// engine and recorded in [`LoadReport::results`].
    pub run_tests: bool,
    pub optimize: OptimizeOptions,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            validate: true,
            run_tests: true,
            optimize: OptimizeOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub name: String,
    pub expected: bool,
    pub actual: bool,
    pub passed: bool,
}

#[derive(Debug, Clone)]
pub struct RuleLoadResult {
    pub rule_id: RuleId,
    pub metadata: Option<RuleMetadata>,
    pub test_outcomes: Vec<TestOutcome>,
}

pub struct LoadReport {
    pub engine: Engine,
    pub results: Vec<RuleLoadResult>,
    pub errors: Vec<String>,
}

impl LoadReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.results.iter().all(|r| r.test_outcomes.iter().all(|t| t.passed))
    }
}

fn parse_envelopes(text: &str) -> anyhow::Result<Vec<RuleEnvelope>> {
    let file: RuleFile = match detect_format(text) {
        FileFormat::Json => serde_json::from_str(text)?,
        FileFormat::Yaml => serde_yaml::from_str(text)?,
    };
    Ok(file.into_envelopes())
}

/// Parses `text` as a rule document, compiles every rule into one engine,
/// and optionally runs each rule's inline tests against it.
#[tracing::instrument(level = "info", skip(text, options))]
pub fn load_rules(text: &str, options: &LoadOptions) -> anyhow::Result<LoadReport> {
    let envelopes = parse_envelopes(text)?;
    let mut builder = EngineBuilder::with_optimize(options.optimize);
    let mut pending: Vec<(RuleId, RuleEnvelope)> = Vec::new();
    let mut errors = Vec::new();

    for envelope in envelopes {
        let metadata_json = envelope
            .metadata
            .as_ref()
            .map(|m| serde_json::to_value(m))
            .transpose()?;
        match builder.register_rule_with_metadata(&envelope.expression, metadata_json) {
            Ok(rule_id) => pending.push((rule_id, envelope)),
            Err(e) => {
                let name = envelope
                    .metadata
                    .as_ref()
                    .and_then(|m| m.name.clone())
                    .unwrap_or_else(|| envelope.expression.clone());
                errors.push(format!("rule '{name}': {e}"));
                if !options.validate {
                    return Err(e.into());
                }
            }
        }
    }

    let engine = builder.finalize();
    let mut results = Vec::with_capacity(pending.len());

    for (rule_id, envelope) in pending {
        let mut test_outcomes = Vec::new();
        if options.run_tests {
            for (idx, test) in envelope.tests.iter().enumerate() {
                let matched = engine.match_event(&test.event);
                let actual = matched.contains(&rule_id);
                let name = test.name.clone().unwrap_or_else(|| format!("test #{idx}"));
                test_outcomes.push(TestOutcome {
                    passed: actual == test.expect,
                    name,
                    expected: test.expect,
                    actual,
                });
            }
        }
        results.push(RuleLoadResult {
            rule_id,
            metadata: envelope.metadata,
            test_outcomes,
        });
    }

    Ok(LoadReport { engine, results, errors })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_yaml_rule_with_passing_test() {
        let yaml = r#"
rules:
  - metadata:
      name: adult-user
    expression: "user.age > 18"
    tests:
      - name: matches adult
        event: { "user": { "age": 21 } }
        expect: true
      - name: rejects minor
        event: { "user": { "age": 10 } }
        expect: false
"#;
        let report = load_rules(yaml, &LoadOptions::default()).unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(report.results.len(), 1);
        assert!(report.results[0].test_outcomes.iter().all(|t| t.passed));
        assert!(report.is_valid());
    }

    #[test]
    fn loads_bare_json_array() {
        let json = r#"[{"expression": "1 == 1"}]"#;
        let report = load_rules(json, &LoadOptions::default()).unwrap();
        assert_eq!(report.results.len(), 1);
        assert!(report.engine.match_event(&serde_json::json!({})).contains(&report.results[0].rule_id));
    }

    #[test]
    fn invalid_rule_is_collected_not_fatal() {
        let yaml = r#"
rules:
  - expression: "user.age >"
  - expression: "1 == 1"
"#;
        let report = load_rules(yaml, &LoadOptions::default()).unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.results.len(), 1);
    }
}
