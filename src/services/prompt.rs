use crate::models::job::FileSnapshot;
use crate::services::rules::RuleSet;

/// Prompt sent to the model for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditPrompt {
    pub system_instruction: String,
    pub user_content: String,
}

/// Build the audit prompt: persona, the file under review, the checklist,
/// and the output convention `parser::parse_rule_results` expects.
pub fn build_audit_prompt(file: &FileSnapshot, rule_set: &RuleSet) -> AuditPrompt {
    let mut body = String::new();

    body.push_str("--- SOURCE FILE UNDER REVIEW ---\n");
    body.push_str(&format!(
        "File: `{}` ({} bytes, {} lines, sha256 {})\n",
        file.file_name, file.size_bytes, file.lines, file.sha256
    ));
    body.push_str(&format!("```{}\n", fence_language(file)));
    body.push_str(&file.content);
    if !file.content.ends_with('\n') {
        body.push('\n');
    }
    body.push_str("```\n\n");

    body.push_str(&format!(
        "--- CHECKLIST (rule-set {}) ---\n\
         Evaluate EVERY item below. Quote code as evidence where relevant.\n\n",
        rule_set.version
    ));
    for (i, rule) in rule_set.rules.iter().enumerate() {
        body.push_str(&format!(
            "{}. [{}] {}: {}\n",
            i + 1,
            rule.id,
            rule.title,
            rule.guidance
        ));
    }

    body.push_str(
        "\n--- REQUIRED OUTPUT FORMAT ---\n\
         For each checklist item emit exactly one block, in checklist order, and nothing else:\n\n\
         RULE <rule id in brackets above, without the brackets>\n\
         STATUS: PASS | FAIL | INCONCLUSIVE\n\
         EVIDENCE: <what in the code supports the status>\n\
         RECOMMENDATION: <concrete change, or \"none\">\n",
    );

    AuditPrompt {
        system_instruction: rule_set.persona.clone(),
        user_content: body,
    }
}

fn fence_language(file: &FileSnapshot) -> &'static str {
    match file.path.extension().and_then(|e| e.to_str()) {
        Some("py") => "python",
        Some("rs") => "rust",
        Some("js") => "javascript",
        Some("ts") => "typescript",
        Some("java") => "java",
        _ => "",
    }
}
