//! Rule-set catalog.
//!
//! A rule-set is the checklist the model is asked to apply to every file.
//! Versions are immutable once published: changing a checklist means adding
//! a new version, so reports stay comparable across runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

/// Version used when a caller does not name one.
pub const DEFAULT_RULE_SET: &str = "python-audit-v1";

/// Rule id given to caller-supplied extra criteria.
pub const USER_CRITERIA_RULE: &str = "user-criteria";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Rule {
    pub id: String,
    pub title: String,
    pub guidance: String,
}

impl Rule {
    fn new(id: &str, title: &str, guidance: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            guidance: guidance.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RuleSet {
    pub version: String,
    /// Reviewer persona placed in the system instruction.
    pub persona: String,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.id.as_str())
    }

    /// Derive the effective rule-set for a submission carrying extra criteria.
    pub fn with_extra_criteria(&self, criteria: Option<&str>) -> RuleSet {
        let mut effective = self.clone();
        if let Some(criteria) = criteria.map(str::trim).filter(|c| !c.is_empty()) {
            effective.rules.push(Rule::new(
                USER_CRITERIA_RULE,
                "Additional criteria requested by the user",
                criteria,
            ));
        }
        effective
    }
}

/// Registry of known rule-set versions.
#[derive(Debug, Clone)]
pub struct RuleCatalog {
    sets: BTreeMap<String, Arc<RuleSet>>,
}

impl RuleCatalog {
    pub fn empty() -> Self {
        Self {
            sets: BTreeMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register(python_audit_v1());
        catalog.register(python_security_v1());
        catalog
    }

    pub fn register(&mut self, set: RuleSet) {
        self.sets.insert(set.version.clone(), Arc::new(set));
    }

    pub fn get(&self, version: &str) -> Option<Arc<RuleSet>> {
        self.sets.get(version).cloned()
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn python_audit_v1() -> RuleSet {
    RuleSet {
        version: DEFAULT_RULE_SET.to_string(),
        persona: "You are a senior code auditor and software quality analyst. Review the \
                  source file as a meticulous, objective, and constructive code reviewer."
            .to_string(),
        rules: vec![
            Rule::new(
                "business-logic",
                "Business logic and requirements",
                "Does the code implement clear, cohesive logic? What is its apparent main \
                 goal? Are there parts that look confusing, incomplete, or incorrect with \
                 respect to that goal?",
            ),
            Rule::new(
                "clean-code",
                "Quality and good practices",
                "Is the code readable and well structured? Assess naming, usefulness of \
                 comments, function size and focus, and adherence to PEP 8.",
            ),
            Rule::new(
                "security",
                "Security and vulnerabilities",
                "Look for hardcoded credentials or API keys, missing input validation, and \
                 unsafe constructs such as eval() or pickle on untrusted data.",
            ),
            Rule::new(
                "maintainability",
                "Maintainability and scalability",
                "Assess coupling, modularity, and whether new features could be added or \
                 performance scaled without a large refactor.",
            ),
            Rule::new(
                "error-handling",
                "Error handling and resilience",
                "How are errors and exceptions handled? Is logging used for important \
                 events? What happens on network failures or missing files?",
            ),
        ],
    }
}

fn python_security_v1() -> RuleSet {
    RuleSet {
        version: "python-security-v1".to_string(),
        persona: "You are an application security specialist reviewing Python code for \
                  exploitable weaknesses."
            .to_string(),
        rules: vec![
            Rule::new(
                "secrets",
                "Hardcoded secrets",
                "Flag credentials, tokens, private keys, or connection strings embedded in \
                 the source.",
            ),
            Rule::new(
                "injection",
                "Injection",
                "Check for SQL, shell, or template injection through string formatting or \
                 subprocess calls with shell=True.",
            ),
            Rule::new(
                "deserialization",
                "Unsafe deserialization and evaluation",
                "Check for eval, exec, pickle, marshal, or yaml.load on data that may be \
                 attacker controlled.",
            ),
            Rule::new(
                "input-validation",
                "Input validation",
                "Are external inputs (CLI arguments, HTTP parameters, files) validated \
                 before use?",
            ),
        ],
    }
}
