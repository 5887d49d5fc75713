use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::job::JobId;

/// Outcome of a single rule for a single file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleStatus {
    Pass,
    Fail,
    Inconclusive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleResult {
    pub rule_id: String,
    pub status: RuleStatus,
    pub evidence: String,
    pub recommendation: String,
}

/// Structured per-rule outcome for a successfully analyzed file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub job_id: JobId,
    pub rule_results: Vec<RuleResult>,
    pub raw_model_text: String,
    pub received_at: DateTime<Utc>,
}

impl Verdict {
    pub fn failed_rules(&self) -> impl Iterator<Item = &RuleResult> {
        self.rule_results
            .iter()
            .filter(|r| r.status == RuleStatus::Fail)
    }
}
