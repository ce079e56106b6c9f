//! Post-processing: deterministic cleanup of backend-generated Markdown.
//!
//! Even well-prompted VLMs wrap output in ```` ```markdown ```` fences, emit
//! CRLF line endings or sprinkle zero-width spaces through the text. These
//! passes fix such quirks without touching content. They run on the accepted
//! content of each unit, after merging, so every backend is held to the same
//! output shape.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

type Pass = fn(&str) -> String;

/// Cleanup passes, in order. Line endings are normalised before anything
/// looks at lines; fences are stripped before whitespace is trimmed.
const PASSES: &[(&str, Pass)] = &[
    ("normalise_line_endings", normalise_line_endings),
    ("strip_outer_fences", strip_outer_fences),
    ("trim_trailing_whitespace", trim_trailing_whitespace),
    ("collapse_blank_lines", collapse_blank_lines),
    ("remove_invisible_chars", remove_invisible_chars),
    ("ensure_final_newline", ensure_final_newline),
];

/// Apply every cleanup pass to one unit's content.
pub fn clean_markdown(input: &str) -> String {
    PASSES.iter().fold(input.to_string(), |text, (name, pass)| {
        let out = pass(&text);
        if out != text {
            trace!("postprocess: {} changed content", name);
        }
        out
    })
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\n(.*)\n```\s*$").unwrap());

fn strip_outer_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn trim_trailing_whitespace(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// At most one blank line between paragraphs.
fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

const INVISIBLE: [char; 6] = [
    '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
];

fn remove_invisible_chars(input: &str) -> String {
    input.replace(INVISIBLE, "")
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{trimmed}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_outer_fences("```markdown\n# Hello\nWorld\n```"), "# Hello\nWorld");
        assert_eq!(strip_outer_fences("```\n# Hello\n```"), "# Hello");
    }

    #[test]
    fn keeps_inner_code_fences() {
        let input = "Intro\n\n```rust\nfn main() {}\n```\n\nOutro";
        assert_eq!(strip_outer_fences(input), input);
    }

    #[test]
    fn normalises_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb\n\nc"), "a\n\nb\n\nc");
    }

    #[test]
    fn removes_invisible_characters() {
        assert_eq!(
            remove_invisible_chars("hello\u{200B}world\u{FEFF}foo\u{00AD}bar"),
            "helloworldfoobar"
        );
    }

    #[test]
    fn full_cleanup() {
        let input = "```markdown\r\n# Title   \r\n\r\n\r\n\r\nBody\u{200B} text\r\n```\r\n";
        assert_eq!(clean_markdown(input), "# Title\n\nBody text\n");
    }

    #[test]
    fn empty_input_becomes_single_newline() {
        assert_eq!(clean_markdown("   \n\n"), "\n");
    }
}
