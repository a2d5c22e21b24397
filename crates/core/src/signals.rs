//! Best-effort interpreter for free-form conversion-engine output.
//!
//! The conversion engine narrates its work on stderr as progress bars and
//! log lines. [`interpret`] turns one such line into a human-readable
//! sub-step name, or `None` when the line carries no recognizable
//! activity. Known phrases map to curated names; anything else falls back
//! to synthesizing a name from an action verb and its object.

use std::sync::LazyLock;

use regex::Regex;

/// Lines longer than this are treated as noise (stack traces, dumped
/// payloads) and never produce a sub-step.
const MAX_SIGNAL_LEN: usize = 200;

/// Cap on the object portion of a synthesized name.
const MAX_TARGET_LEN: usize = 40;

/// Curated phrase-to-name table, checked in order before falling back to
/// synthesis. Earlier entries win, so more specific phrases come first.
static KNOWN_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)recognizing layout", "Recognizing document layout"),
        (r"(?i)running ocr error detection", "Running OCR error detection"),
        (r"(?i)detecting bboxes", "Detecting bounding boxes"),
        (r"(?i)recognizing tables", "Recognizing tables"),
        (r"(?i)extracting text", "Extracting text"),
        (r"(?i)processing pages", "Processing pages"),
        (r"(?i)rendering markdown", "Rendering Markdown output"),
        (r"(?i)converting to markdown", "Converting to Markdown"),
        (r"(?i)initializing .*models", "Initializing detection models"),
        (r"(?i)loading .*pages", "Loading document pages"),
        (r"(?i)analyzing .*layout", "Analyzing document layout"),
        (r"(?i)processing tables", "Processing tables"),
        (r"(?i)extracting .*images", "Extracting embedded images"),
        (r"(?i)building document", "Building document structure"),
    ]
    .into_iter()
    .map(|(pattern, name)| (Regex::new(pattern).unwrap(), name))
    .collect()
});

/// Fallback: an action verb followed by its object. The object capture
/// stops at punctuation that usually introduces timings or percentages.
static GENERIC_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(rendering|converting|processing|extracting|detecting|analyzing|initializing|loading|reading|building|formatting|parsing|recognizing)\s+([^,.:;|]+)",
    )
    .unwrap()
});

/// Interpret one line of engine output as a sub-step name.
pub fn interpret(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.len() > MAX_SIGNAL_LEN {
        return None;
    }
    for (pattern, name) in KNOWN_PATTERNS.iter() {
        if pattern.is_match(line) {
            return Some((*name).to_string());
        }
    }
    let caps = GENERIC_ACTION.captures(line)?;
    let action = capitalize(&caps[1].to_lowercase());
    let target = tidy_target(&caps[2]);
    if target.is_empty() {
        return None;
    }
    Some(format!("{action} {target}"))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Squeeze whitespace and truncate on a char boundary.
fn tidy_target(raw: &str) -> String {
    let squeezed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if squeezed.len() <= MAX_TARGET_LEN {
        return squeezed;
    }
    let mut cut = MAX_TARGET_LEN;
    while !squeezed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", squeezed[..cut].trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_lines_map_to_curated_names() {
        assert_eq!(
            interpret("Recognizing layout: 45%|████     | 9/20 [00:03<00:04]").as_deref(),
            Some("Recognizing document layout")
        );
        assert_eq!(
            interpret("Detecting bboxes: 12%|█        | 3/25").as_deref(),
            Some("Detecting bounding boxes")
        );
        assert_eq!(
            interpret("recognizing tables:  80%").as_deref(),
            Some("Recognizing tables")
        );
    }

    #[test]
    fn log_lines_map_to_curated_names() {
        assert_eq!(
            interpret("INFO converter: initializing surya models on cpu").as_deref(),
            Some("Initializing detection models")
        );
        assert_eq!(
            interpret("Converting to markdown format").as_deref(),
            Some("Converting to Markdown")
        );
    }

    #[test]
    fn unknown_activity_synthesizes_a_name() {
        assert_eq!(
            interpret("parsing table of contents, 3 entries").as_deref(),
            Some("Parsing table of contents")
        );
        assert_eq!(
            interpret("  reading page 14 of 30  ").as_deref(),
            Some("Reading page 14 of 30")
        );
    }

    #[test]
    fn synthesized_target_is_truncated() {
        let line = format!("formatting {}", "x".repeat(120));
        let name = interpret(&line).unwrap();
        assert!(name.starts_with("Formatting "));
        assert!(name.ends_with("..."));
        assert!(name.len() < 60);
    }

    #[test]
    fn noise_produces_nothing() {
        assert_eq!(interpret(""), None);
        assert_eq!(interpret("   "), None);
        assert_eq!(interpret("100%|##########| 20/20"), None);
        assert_eq!(interpret("warning: deprecated flag"), None);
    }

    #[test]
    fn overlong_lines_are_rejected() {
        let line = format!("extracting text {}", "a".repeat(300));
        assert_eq!(interpret(&line), None);
    }
}
