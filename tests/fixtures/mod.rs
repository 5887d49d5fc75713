//! Sample sources and model responses for orchestrator tests

#![allow(dead_code)]

use code_audit::services::rules::RuleSet;

pub const ORDERS_PY: &str = r#"def total(orders):
    return sum(o.price * o.qty for o in orders)
"#;

pub const USERS_PY: &str = r#"import sqlite3

def find_user(conn, name):
    return conn.execute(f"SELECT * FROM users WHERE name = '{name}'").fetchone()
"#;

pub const CONFIG_PY: &str = r#"API_KEY = "sk-live-1234"
DEBUG = True
"#;

/// Named files used as scenario A, B, C.
pub fn scenario_files() -> Vec<(&'static str, &'static str)> {
    vec![
        ("a_orders.py", ORDERS_PY),
        ("b_users.py", USERS_PY),
        ("c_config.py", CONFIG_PY),
    ]
}

/// `n` small distinct files named `file_000.py`, `file_001.py`, ...
pub fn numbered_files(n: usize) -> Vec<(String, String)> {
    (0..n)
        .map(|i| (format!("file_{i:03}.py"), format!("VALUE_{i} = {i}\n")))
        .collect()
}

/// A well-formed response covering every rule in `rule_set`.
pub fn response_for(rule_set: &RuleSet, status: &str) -> String {
    rule_set
        .rules
        .iter()
        .map(|rule| {
            format!(
                "RULE: {}\nSTATUS: {}\nEVIDENCE: Reviewed {} in full.\nRECOMMENDATION: None.\n",
                rule.id, status, rule.title
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text with no rule blocks at all.
pub const GARBAGE_RESPONSE: &str = "I'm sorry, I can't help with that.";
