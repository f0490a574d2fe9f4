//! Narration cleanup: strips footnote debris and marks paragraph pauses.

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker injected between paragraphs. The TTS streamer splits on it and
/// writes silent MP3 frames so the listener hears a real pause. The token is
/// plain ASCII so no voice tries to pronounce a stray fragment of it.
pub const TTS_PAUSE: &str = "TTSPAUSEBREAK";

// Superscript digits (U+2070–U+2079 plus the Latin-1 ¹²³).
static SUPERSCRIPTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{00B9}\u{00B2}\u{00B3}\u{2070}-\u{2079}]+").unwrap());

// Bracketed citation references like [1], [23], [1,2], [1-3], [1–3].
static BRACKET_REFS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\d[\d,\-\u{2013}\s]*\]").unwrap());

// Footnote numbers glued to the end of a word or its closing punctuation,
// e.g. "word3" or "sentence.12". Runs of four or more digits are left alone.
static GLUED_FOOTNOTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z][.,;:!?]?)\d{1,3}([\s.,;:!?)]|$)").unwrap());

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"  +").unwrap());

/// Prepare extracted text for synthesis.
///
/// Applying it twice yields the same string: the pause marker carries no
/// digits, footnotes are already gone, and the marker join leaves no blank
/// lines to re-split.
pub fn clean_for_tts(text: &str) -> String {
    let text = SUPERSCRIPTS.replace_all(text, "");
    let text = BRACKET_REFS.replace_all(&text, "");
    let text = GLUED_FOOTNOTES.replace_all(&text, "$1$2");
    let text = MULTI_SPACE.replace_all(&text, " ");

    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    paragraphs.join(&format!(" {TTS_PAUSE} "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_superscript_digits() {
        assert_eq!(clean_for_tts("see note¹ and²³"), "see note and");
        assert_eq!(clean_for_tts("value\u{2075} here"), "value here");
    }

    #[test]
    fn strips_bracketed_citations() {
        assert_eq!(clean_for_tts("fact[1] more[2,3] range[4-6]"), "fact more range");
        assert_eq!(clean_for_tts("dash[1\u{2013}3] end"), "dash end");
    }

    #[test]
    fn strips_glued_footnote_numbers() {
        assert_eq!(clean_for_tts("word3 next"), "word next");
        assert_eq!(clean_for_tts("sentence.12 More"), "sentence. More");
        assert_eq!(clean_for_tts("end8"), "end");
    }

    #[test]
    fn long_digit_runs_survive() {
        assert_eq!(clean_for_tts("year2024 is fine"), "year2024 is fine");
        assert_eq!(clean_for_tts("In 1984 nothing"), "In 1984 nothing");
    }

    #[test]
    fn paragraphs_joined_with_pause_marker() {
        let out = clean_for_tts("First para.\n\nSecond para.");
        assert_eq!(out, format!("First para. {TTS_PAUSE} Second para."));
    }

    #[test]
    fn empty_paragraphs_do_not_double_pause() {
        let out = clean_for_tts("A\n\n\n\n   \n\nB");
        assert_eq!(out, format!("A {TTS_PAUSE} B"));
    }

    #[test]
    fn punctuation_is_preserved() {
        let input = "Wait! Really? Yes; indeed: quite.";
        assert_eq!(clean_for_tts(input), input);
    }

    #[test]
    fn cleaning_is_idempotent() {
        let samples = [
            "First¹ para[1].\n\nSecond2 para.\n\nThird.",
            "no changes needed at all",
            "a  lot    of   spaces",
            "word3 glued[2] and\n\nmore⁴",
        ];
        for sample in samples {
            let once = clean_for_tts(sample);
            let twice = clean_for_tts(&once);
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }
}
