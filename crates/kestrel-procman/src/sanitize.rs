// SPDX-License-Identifier: Apache-2.0
use std::sync::OnceLock;

use regex::Regex;

/// CSI/OSC escape sequences (`ESC [ ... letter`, `ESC ] ... BEL|ESC\`) plus
/// bare bell and backspace. Covers the common ANSI color/cursor codes a
/// subprocess (cargo, git, make) emits to a terminal.
fn ansi_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\x1b\][^\x07\x1b]*(\x07|\x1b\\)|\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b[@-Z\\-_]").unwrap()
    })
}

/// Strip ANSI escape sequences and remove stray bell/backspace bytes from
/// process output before it reaches `on_update` callbacks (§4.H).
pub fn sanitize(raw: &str) -> String {
    let without_escapes = ansi_pattern().replace_all(raw, "");
    without_escapes.chars().filter(|c| *c != '\u{7}' && *c != '\u{8}').collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_sgr_color_codes() {
        let raw = "\x1b[31merror\x1b[0m: bad";
        assert_eq!(sanitize(raw), "error: bad");
    }

    #[test]
    fn strips_bell_and_backspace() {
        let raw = "abc\u{8}\u{7}def";
        assert_eq!(sanitize(raw), "abcdef");
    }

    #[test]
    fn strips_osc_title_sequence() {
        let raw = "\x1b]0;my title\x07rest";
        assert_eq!(sanitize(raw), "rest");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(sanitize("plain output\nline two"), "plain output\nline two");
    }
}
