use regex::Regex;
use std::sync::LazyLock;

static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\S\n]+").expect("valid regex"));
static TRAILING_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m) +$").expect("valid regex"));
static PAGE_NUMBERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:Page )?\d+\s*$").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Normalise whitespace in extracted or recognised text: collapse runs of
/// spaces and tabs, drop standalone page numbers, keep at most one blank
/// line between paragraphs.
pub fn clean_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\x0C', "\n");
    let text = SPACES.replace_all(&text, " ");
    let text = TRAILING_SPACE.replace_all(&text, "");
    let text = PAGE_NUMBERS.replace_all(&text, "");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        let text = "Hello    World\n\n\n\nTest";
        assert_eq!(clean_text(text), "Hello World\n\nTest");
    }

    #[test]
    fn test_drops_page_numbers_and_tabs() {
        let text = "First\tline \n12\nPage 3\nSecond line\r\n";
        assert_eq!(clean_text(text), "First line\n\nSecond line");
    }

    #[test]
    fn test_keeps_numbers_inside_sentences() {
        assert_eq!(clean_text("There are 3 foxes."), "There are 3 foxes.");
    }
}
