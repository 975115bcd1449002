//! Cleanup of raw completion text before validation.

use once_cell::sync::Lazy;
use regex::Regex;

static THINK_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think block regex is valid"));

static LEADING_FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\A```[A-Za-z0-9_+.\-]*[ \t]*(?:\r?\n|\z)").expect("leading fence regex is valid")
});

static TRAILING_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\r?\n)?```[ \t]*\z").expect("trailing fence regex is valid"));

/// Strip reasoning blocks and one surrounding code fence from `raw`, then trim.
/// Never fails; empty input gives empty output.
pub fn sanitize(raw: &str) -> String {
    let without_thinking = THINK_BLOCK_RE.replace_all(raw.trim(), "");
    let trimmed = without_thinking.trim();
    let unfenced = LEADING_FENCE_RE.replace(trimmed, "");
    let unfenced = TRAILING_FENCE_RE.replace(&unfenced, "");
    unfenced.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_language_tagged_fence() {
        let raw = "```unitscript\ndefine add(a, b)\n  a + b\nend\n```";
        assert_eq!(sanitize(raw), "define add(a, b)\n  a + b\nend");
    }

    #[test]
    fn strips_bare_fence_and_whitespace() {
        assert_eq!(sanitize("  \n```\ndefine f() 1 end\n```\n\n"), "define f() 1 end");
    }

    #[test]
    fn removes_reasoning_blocks_across_lines() {
        let raw = "<think>\nthe user wants\n``` a fence in thought\n</think>\n```ruby\ndefine f() 1 end\n```";
        assert_eq!(sanitize(raw), "define f() 1 end");
    }

    #[test]
    fn reasoning_removal_is_not_greedy() {
        let raw = "<think>a</think>define f() 1 end<think>b</think>";
        assert_eq!(sanitize(raw), "define f() 1 end");
    }

    #[test]
    fn empty_and_plain_input() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("   "), "");
        assert_eq!(sanitize("define f() 1 end"), "define f() 1 end");
    }

    #[test]
    fn only_one_fence_pair_is_removed() {
        let raw = "```\ndefine f() '```' end\n```";
        assert_eq!(sanitize(raw), "define f() '```' end");
    }
}
