// SPDX-License-Identifier: Apache-2.0
//! Prompt-template interpolation (spec §6): slash-command and sub-agent
//! prompt bodies may reference `$ARGUMENTS` (the whole argument string) or
//! positional `$1`, `$2`, ... placeholders, substituted before the result
//! is sent to the model.
use std::collections::HashMap;

/// Substitute `$ARGUMENTS` with the full argument string and `$1`..`$9`
/// with whitespace-split positional arguments. Unmatched positional
/// placeholders are left as-is rather than replaced with an empty string,
/// so a malformed template is visibly wrong instead of silently truncated.
pub fn interpolate(template: &str, arguments: &str) -> String {
    let positional: Vec<&str> = arguments.split_whitespace().collect();
    let mut out = template.replace("$ARGUMENTS", arguments);
    for (i, arg) in positional.iter().enumerate() {
        out = out.replace(&format!("${}", i + 1), arg);
    }
    out
}

/// Like [`interpolate`] but with explicit named substitutions applied
/// first, for templates that mix named placeholders (`$role`) with the
/// positional/`$ARGUMENTS` convention.
pub fn interpolate_named(template: &str, arguments: &str, named: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in named {
        out = out.replace(&format!("${key}"), value);
    }
    interpolate(&out, arguments)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_placeholder_is_replaced_whole() {
        assert_eq!(interpolate("do: $ARGUMENTS", "fix the bug"), "do: fix the bug");
    }

    #[test]
    fn positional_placeholders_split_on_whitespace() {
        assert_eq!(interpolate("rename $1 to $2", "old.rs new.rs"), "rename old.rs to new.rs");
    }

    #[test]
    fn unmatched_positional_left_untouched() {
        assert_eq!(interpolate("use $1 and $2", "only-one"), "use only-one and $2");
    }

    #[test]
    fn named_substitution_applies_before_positional() {
        let mut named = HashMap::new();
        named.insert("role".to_string(), "reviewer".to_string());
        assert_eq!(interpolate_named("as $role, look at $1", "diff.patch", &named), "as reviewer, look at diff.patch");
    }
}
