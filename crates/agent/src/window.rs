//! Directive re-injection window.
//!
//! The directive is re-emitted whenever its literal text is missing from the
//! last `window` characters of the running prompt. Windows count Unicode
//! scalar values, so the tail slice never splits a code point.

/// The last `chars` characters of `text`.
pub fn tail_chars(text: &str, chars: usize) -> &str {
    if chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(chars - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}

/// Whether `directive` occurs within the last `window` characters of `prompt`.
///
/// An empty directive counts as present: there is nothing to inject.
pub fn directive_in_window(prompt: &str, directive: &str, window: usize) -> bool {
    directive.is_empty() || tail_chars(prompt, window).contains(directive)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_of_short_text_is_whole_text() {
        assert_eq!(tail_chars("abc", 10), "abc");
        assert_eq!(tail_chars("abc", 3), "abc");
        assert_eq!(tail_chars("abc", 2), "bc");
        assert_eq!(tail_chars("abc", 0), "");
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail_chars("naïve café", 4), "café");
        assert_eq!(tail_chars("日本語", 2), "本語");
    }

    #[test]
    fn directive_found_only_inside_window() {
        let prompt = format!("Be terse.{}", "x".repeat(50));
        assert!(directive_in_window(&prompt, "Be terse.", 100));
        assert!(!directive_in_window(&prompt, "Be terse.", 50));
        // Partially inside is not found
        assert!(!directive_in_window(&prompt, "Be terse.", 55));
        assert!(directive_in_window(&prompt, "Be terse.", 59));
    }

    #[test]
    fn empty_directive_always_present() {
        assert!(directive_in_window("", "", 2000));
        assert!(directive_in_window("anything", "", 1));
    }
}
