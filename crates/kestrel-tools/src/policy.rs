// SPDX-License-Identifier: Apache-2.0
use regex::Regex;

use kestrel_config::ToolsConfig;

/// Per-tool approval decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    Auto,
    Ask,
    Deny,
}

/// Policy engine that maps a tool call's command string to an approval
/// decision (glob-pattern matching over configured allow/deny lists).
#[derive(Debug)]
pub struct ToolPolicy {
    auto_patterns: Vec<Regex>,
    deny_patterns: Vec<Regex>,
}

impl ToolPolicy {
    pub fn from_config(cfg: &ToolsConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<Regex> {
            patterns.iter().filter_map(|p| glob_to_regex(p)).collect()
        };
        Self { auto_patterns: compile(&cfg.auto_approve_patterns), deny_patterns: compile(&cfg.deny_patterns) }
    }

    /// Decide what the configured command-pattern lists alone say about
    /// `command`, ignoring whatever a specific `Tool` declares as its own
    /// baseline. Deny always wins over auto-approve for the same pattern.
    fn decide(&self, command: &str) -> ApprovalPolicy {
        if self.deny_patterns.iter().any(|re| re.is_match(command)) {
            return ApprovalPolicy::Deny;
        }
        if self.auto_patterns.iter().any(|re| re.is_match(command)) {
            return ApprovalPolicy::Auto;
        }
        ApprovalPolicy::Ask
    }

    /// The gate's full decision for one call (spec §4.F): combine a tool's
    /// own `default_policy` with what the configured pattern lists say about
    /// its command string. A tool-level `Deny` is absolute — no pattern list
    /// can override it. Otherwise the more permissive of the two policies
    /// (`Auto` over `Ask`, `Ask` over `Deny`) wins, except a pattern-level
    /// `Deny` still blocks a tool whose own baseline is merely `Ask`.
    pub fn effective(&self, default_policy: ApprovalPolicy, command: &str) -> ApprovalPolicy {
        if default_policy == ApprovalPolicy::Deny {
            return ApprovalPolicy::Deny;
        }
        match (default_policy, self.decide(command)) {
            (ApprovalPolicy::Auto, _) => ApprovalPolicy::Auto,
            (_, ApprovalPolicy::Deny) => ApprovalPolicy::Deny,
            (_, ApprovalPolicy::Auto) => ApprovalPolicy::Auto,
            _ => ApprovalPolicy::Ask,
        }
    }
}

/// Convert a simple shell glob (`*` any run, `?` one char) to a `Regex`,
/// escaping maximal literal runs at once rather than one character at a
/// time.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    let mut literal = String::new();
    let flush = |re: &mut String, literal: &mut String| {
        if !literal.is_empty() {
            re.push_str(&regex::escape(literal));
            literal.clear();
        }
    };
    for ch in pattern.chars() {
        match ch {
            '*' => {
                flush(&mut re, &mut literal);
                re.push_str(".*");
            }
            '?' => {
                flush(&mut re, &mut literal);
                re.push('.');
            }
            c => literal.push(c),
        }
    }
    flush(&mut re, &mut literal);
    re.push('$');
    Regex::new(&re).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
