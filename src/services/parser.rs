//! Extraction of structured rule results from free-form model output.
//!
//! Convention (see `prompt::build_audit_prompt`):
//!
//! ```text
//! RULE <rule-id>
//! STATUS: PASS | FAIL | INCONCLUSIVE
//! EVIDENCE: <text, may continue on following lines>
//! RECOMMENDATION: <text, may continue on following lines>
//! ```
//!
//! Markdown headings/emphasis around the labels and code fences around the
//! whole answer are tolerated. Anything else that does not yield one result
//! per expected rule is a [`ParseError`], which callers surface as a
//! malformed response.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::models::job::JobId;
use crate::models::verdict::{RuleResult, RuleStatus, Verdict};
use crate::services::rules::RuleSet;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("response contains no RULE blocks")]
    NoRuleBlocks,

    #[error("rule {rule_id} has no STATUS line")]
    MissingStatus { rule_id: String },

    #[error("rule {rule_id} has unrecognized status {value:?}")]
    UnknownStatus { rule_id: String, value: String },

    #[error("response is missing rule(s): {}", .0.join(", "))]
    MissingRules(Vec<String>),
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:#{1,6}\s*)?(?:\*\*)?RULE\b\s*[:\-]?\s*\[?([A-Za-z0-9][A-Za-z0-9_.\-]*)\]?(?:\*\*)?(?:[\s:].*)?$",
        )
        .expect("valid rule header regex")
    })
}

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:[-*]\s+)?(?:\*\*)?(STATUS|EVIDENCE|RECOMMENDATION)(?:\*\*)?\s*:\s*(?:\*\*)?\s*(.*)$",
        )
        .expect("valid field regex")
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Status,
    Evidence,
    Recommendation,
}

#[derive(Debug, Default)]
struct Block {
    rule_id: String,
    status: Option<String>,
    evidence: Vec<String>,
    recommendation: Vec<String>,
    current: Option<Field>,
}

impl Block {
    fn new(rule_id: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            ..Default::default()
        }
    }

    fn push(&mut self, field: Field, text: &str) {
        self.current = Some(field);
        match field {
            Field::Status => self.status = Some(text.to_string()),
            Field::Evidence => self.evidence.push(text.to_string()),
            Field::Recommendation => self.recommendation.push(text.to_string()),
        }
    }

    fn continue_line(&mut self, line: &str) {
        match self.current {
            Some(Field::Evidence) => self.evidence.push(line.to_string()),
            Some(Field::Recommendation) => self.recommendation.push(line.to_string()),
            Some(Field::Status) | None => {}
        }
    }

    fn finish(self) -> Result<RuleResult, ParseError> {
        let raw_status = self.status.ok_or_else(|| ParseError::MissingStatus {
            rule_id: self.rule_id.clone(),
        })?;
        let status = parse_status(&raw_status).ok_or_else(|| ParseError::UnknownStatus {
            rule_id: self.rule_id.clone(),
            value: raw_status.trim().to_string(),
        })?;

        Ok(RuleResult {
            rule_id: self.rule_id,
            status,
            evidence: join_lines(&self.evidence),
            recommendation: join_lines(&self.recommendation),
        })
    }
}

fn join_lines(lines: &[String]) -> String {
    lines.join("\n").trim().to_string()
}

const INCONCLUSIVE: &[&str] = &[
    "INCONCLUSIVE",
    "PARTIAL",
    "PARTIALLY IMPLEMENTED",
    "N/A",
    "NOT APPLICABLE",
    "OBSERVATION",
];
const FAIL: &[&str] = &[
    "FAIL",
    "FAILED",
    "NOT IMPLEMENTED",
    "NON-COMPLIANT",
    "NON COMPLIANT",
    "NOT COMPLIANT",
];
const PASS: &[&str] = &["PASS", "PASSED", "OK", "IMPLEMENTED", "COMPLIANT"];

fn is_decoration(c: char) -> bool {
    matches!(c, '*' | '`' | '_' | '.' | '\u{FE0F}') || c.is_whitespace()
}

fn emoji_status(c: char) -> Option<RuleStatus> {
    match c {
        '✅' => Some(RuleStatus::Pass),
        '❌' => Some(RuleStatus::Fail),
        '⚠' | 'ℹ' => Some(RuleStatus::Inconclusive),
        _ => None,
    }
}

fn exact_status(token: &str) -> Option<RuleStatus> {
    if INCONCLUSIVE.contains(&token) {
        Some(RuleStatus::Inconclusive)
    } else if FAIL.contains(&token) {
        Some(RuleStatus::Fail)
    } else if PASS.contains(&token) {
        Some(RuleStatus::Pass)
    } else {
        None
    }
}

fn scan_status(value: &str) -> Option<RuleStatus> {
    if INCONCLUSIVE.iter().any(|n| value.contains(n)) || value.contains('⚠') || value.contains('ℹ') {
        Some(RuleStatus::Inconclusive)
    } else if FAIL.iter().any(|n| value.contains(n)) || value.contains('❌') {
        Some(RuleStatus::Fail)
    } else if PASS.iter().filter(|n| **n != "OK").any(|n| value.contains(n)) || value.contains('✅') {
        Some(RuleStatus::Pass)
    } else {
        None
    }
}

/// The status phrase before any explanation, e.g. `PASS` in
/// `PASS (no failures found)`. A bare hyphen is kept so `NON-COMPLIANT`
/// survives.
fn leading_phrase(value: &str) -> &str {
    let end = [" - ", "(", ":", ",", ";"]
        .iter()
        .filter_map(|d| value.find(d))
        .min()
        .unwrap_or(value.len());
    value[..end].trim_matches(is_decoration)
}

/// Map a status value, including the emoji/wording variants models drift
/// into, onto a [`RuleStatus`].
///
/// The leading status phrase decides; explanatory text after it only
/// counts when the phrase itself is not recognized.
pub fn parse_status(raw: &str) -> Option<RuleStatus> {
    let value = raw.trim_matches(is_decoration).to_uppercase();
    if let Some(status) = value.chars().next().and_then(emoji_status) {
        return Some(status);
    }

    let lead = leading_phrase(&value);
    exact_status(lead)
        .or_else(|| lead.split_whitespace().next().and_then(exact_status))
        .or_else(|| scan_status(lead))
        .or_else(|| scan_status(&value))
}

/// Parse the model's text into one result per rule of `rule_set`, in
/// rule-set order. Unknown rule ids are ignored; the first block for a
/// repeated id wins.
pub fn parse_rule_results(text: &str, rule_set: &RuleSet) -> Result<Vec<RuleResult>, ParseError> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut current: Option<Block> = None;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            continue;
        }
        if let Some(caps) = header_re().captures(line) {
            // Inside a block, only a known rule id opens the next one;
            // evidence text may itself start with "RULE".
            let id = &caps[1];
            if current.is_none() || rule_set.rule_ids().any(|known| known == id) {
                blocks.extend(current.take());
                current = Some(Block::new(id));
                continue;
            }
        }
        let Some(block) = current.as_mut() else {
            continue;
        };
        if let Some(caps) = field_re().captures(line) {
            let field = match caps[1].to_ascii_uppercase().as_str() {
                "STATUS" => Field::Status,
                "EVIDENCE" => Field::Evidence,
                _ => Field::Recommendation,
            };
            block.push(field, &caps[2]);
        } else {
            block.continue_line(line);
        }
    }
    blocks.extend(current);

    if blocks.is_empty() {
        return Err(ParseError::NoRuleBlocks);
    }

    let mut found: HashMap<String, RuleResult> = HashMap::new();
    for block in blocks {
        if rule_set.rule_ids().all(|id| id != block.rule_id) {
            debug!(rule_id = %block.rule_id, "Ignoring block for unknown rule");
            continue;
        }
        if found.contains_key(&block.rule_id) {
            continue;
        }
        let result = block.finish()?;
        found.insert(result.rule_id.clone(), result);
    }

    let missing: Vec<String> = rule_set
        .rule_ids()
        .filter(|id| !found.contains_key(*id))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::MissingRules(missing));
    }

    Ok(rule_set
        .rule_ids()
        .filter_map(|id| found.remove(id))
        .collect())
}

/// Build a [`Verdict`] from raw model text.
pub fn parse_verdict(
    job_id: JobId,
    text: &str,
    rule_set: &RuleSet,
    received_at: DateTime<Utc>,
) -> Result<Verdict, ParseError> {
    let rule_results = parse_rule_results(text, rule_set)?;
    Ok(Verdict {
        job_id,
        rule_results,
        raw_model_text: text.to_string(),
        received_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rules::Rule;

    fn two_rule_set() -> RuleSet {
        RuleSet {
            version: "test-v1".to_string(),
            persona: "reviewer".to_string(),
            rules: vec![
                Rule {
                    id: "security".to_string(),
                    title: "Security".to_string(),
                    guidance: String::new(),
                },
                Rule {
                    id: "error-handling".to_string(),
                    title: "Errors".to_string(),
                    guidance: String::new(),
                },
            ],
        }
    }

    #[test]
    fn test_parse_plain_blocks() {
        let text = "\
RULE security
STATUS: FAIL
EVIDENCE: API_KEY = \"abc\" on line 3
RECOMMENDATION: read the key from the environment

RULE error-handling
STATUS: PASS
EVIDENCE: requests are wrapped in try/except
RECOMMENDATION: none
";
        let results = parse_rule_results(text, &two_rule_set()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].rule_id, "security");
        assert_eq!(results[0].status, RuleStatus::Fail);
        assert_eq!(results[0].evidence, "API_KEY = \"abc\" on line 3");
        assert_eq!(results[1].status, RuleStatus::Pass);
        assert_eq!(results[1].recommendation, "none");
    }

    #[test]
    fn test_markdown_and_fences_tolerated() {
        let text = "\
Here is the audit:
```text
### RULE: error-handling
**STATUS:** ⚠️ Partially implemented
**EVIDENCE:** only the HTTP call is guarded;
file reads are not.
- **RECOMMENDATION**: wrap open() as well
### RULE [security] Security
**Status**: ✅ Implemented
**Evidence**: no secrets found
```
";
        let results = parse_rule_results(text, &two_rule_set()).unwrap();
        // Results follow rule-set order, not response order.
        assert_eq!(results[0].rule_id, "security");
        assert_eq!(results[0].status, RuleStatus::Pass);
        assert_eq!(results[0].recommendation, "");
        assert_eq!(results[1].status, RuleStatus::Inconclusive);
        assert_eq!(
            results[1].evidence,
            "only the HTTP call is guarded;\nfile reads are not."
        );
        assert_eq!(results[1].recommendation, "wrap open() as well");
    }

    #[test]
    fn test_missing_rule_is_error() {
        let text = "RULE security\nSTATUS: PASS\nEVIDENCE: fine\n";
        assert_eq!(
            parse_rule_results(text, &two_rule_set()),
            Err(ParseError::MissingRules(vec!["error-handling".to_string()]))
        );
    }

    #[test]
    fn test_no_blocks_is_error() {
        let text = "<!DOCTYPE html><html><body>Report</body></html>";
        assert_eq!(
            parse_rule_results(text, &two_rule_set()),
            Err(ParseError::NoRuleBlocks)
        );
    }

    #[test]
    fn test_missing_and_unknown_status() {
        let text = "RULE security\nEVIDENCE: x\nRULE error-handling\nSTATUS: PASS\n";
        assert!(matches!(
            parse_rule_results(text, &two_rule_set()),
            Err(ParseError::MissingStatus { rule_id }) if rule_id == "security"
        ));

        let text = "RULE security\nSTATUS: maybe\nRULE error-handling\nSTATUS: PASS\n";
        assert!(matches!(
            parse_rule_results(text, &two_rule_set()),
            Err(ParseError::UnknownStatus { value, .. }) if value == "maybe"
        ));
    }

    #[test]
    fn test_unknown_and_duplicate_rules() {
        let text = "\
RULE style
STATUS: garbage
RULE security
STATUS: PASS
RULE security
STATUS: FAIL
RULE error-handling
STATUS: FAIL
";
        let results = parse_rule_results(text, &two_rule_set()).unwrap();
        assert_eq!(results[0].status, RuleStatus::Pass);
        assert_eq!(results[1].status, RuleStatus::Fail);
    }

    #[test]
    fn test_lowercase_rule_word_is_not_a_header() {
        let text = "\
RULE security
STATUS: PASS
EVIDENCE: Rule of thumb: no secrets
RULE error-handling
STATUS: PASS
";
        let results = parse_rule_results(text, &two_rule_set()).unwrap();
        assert_eq!(results[0].evidence, "Rule of thumb: no secrets");
    }

    #[test]
    fn test_status_variants() {
        assert_eq!(parse_status("PASS"), Some(RuleStatus::Pass));
        assert_eq!(parse_status("**Passed**"), Some(RuleStatus::Pass));
        assert_eq!(parse_status("ok"), Some(RuleStatus::Pass));
        assert_eq!(parse_status("Not Implemented ❌"), Some(RuleStatus::Fail));
        assert_eq!(parse_status("FAILED"), Some(RuleStatus::Fail));
        assert_eq!(parse_status("Partially Implemented"), Some(RuleStatus::Inconclusive));
        assert_eq!(parse_status("ℹ️ Observation"), Some(RuleStatus::Inconclusive));
        assert_eq!(parse_status("broken"), None);
    }

    #[test]
    fn test_status_explanation_does_not_override_leading_word() {
        assert_eq!(parse_status("PASS (no failures found)"), Some(RuleStatus::Pass));
        assert_eq!(parse_status("PASS - N/A for tests"), Some(RuleStatus::Pass));
        assert_eq!(parse_status("Compliant, no failing checks"), Some(RuleStatus::Pass));
        assert_eq!(parse_status("**FAIL**: only partially guarded"), Some(RuleStatus::Fail));
        assert_eq!(parse_status("NON-COMPLIANT: hardcoded key"), Some(RuleStatus::Fail));
        assert_eq!(parse_status("N/A (no network calls)"), Some(RuleStatus::Inconclusive));
        assert_eq!(parse_status("✅ PASS, nothing failing"), Some(RuleStatus::Pass));
    }

    #[test]
    fn test_rule_word_in_evidence_continues_block() {
        let text = "\
RULE security
STATUS: FAIL
EVIDENCE: hardcoded key on line 3;
RULE 4 of the checklist is violated: eval() on line 9
RECOMMENDATION: remove eval
RULE error-handling
STATUS: PASS
";
        let results = parse_rule_results(text, &two_rule_set()).unwrap();
        assert_eq!(results[0].rule_id, "security");
        assert_eq!(
            results[0].evidence,
            "hardcoded key on line 3;\nRULE 4 of the checklist is violated: eval() on line 9"
        );
        assert_eq!(results[0].recommendation, "remove eval");
        assert_eq!(results[1].status, RuleStatus::Pass);
    }

    #[test]
    fn test_parse_verdict_keeps_raw_text() {
        let text = "RULE security\nSTATUS: PASS\nRULE error-handling\nSTATUS: PASS\n";
        let at = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let verdict = parse_verdict(JobId(4), text, &two_rule_set(), at).unwrap();
        assert_eq!(verdict.job_id, JobId(4));
        assert_eq!(verdict.raw_model_text, text);
        assert_eq!(verdict.received_at, at);
    }
}
