//! crates/summary_stream_core/src/chunking.rs
//!
//! Splits a source text into sections small enough for one backend call.

/// Splits `text` into sections of at most `max_words` words.
///
/// Paragraphs (blank-line separated) are packed together while they fit. A
/// paragraph that is too long on its own is split on sentence boundaries, and a
/// single sentence that is still too long is cut by word count.
pub fn split_into_sections(text: &str, max_words: usize) -> Vec<String> {
    let max_words = max_words.max(1);
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for paragraph in paragraphs(text) {
        for piece in bounded_pieces(paragraph, max_words) {
            let piece_words = piece.len();
            if !current.is_empty() && current.len() + piece_words > max_words {
                sections.push(current.join(" "));
                current.clear();
            }
            current.extend(piece);
        }
    }
    if !current.is_empty() {
        sections.push(current.join(" "));
    }
    sections
}

fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n")
        .flat_map(|block| block.split("\r\n\r\n"))
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Breaks a paragraph into word lists that each fit within `max_words`.
fn bounded_pieces(paragraph: &str, max_words: usize) -> Vec<Vec<&str>> {
    let words: Vec<&str> = paragraph.split_whitespace().collect();
    if words.len() <= max_words {
        return vec![words];
    }

    let mut pieces = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for sentence in sentences(&words) {
        if sentence.len() > max_words {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(sentence.chunks(max_words).map(<[&str]>::to_vec));
            continue;
        }
        if current.len() + sentence.len() > max_words {
            pieces.push(std::mem::take(&mut current));
        }
        current.extend_from_slice(sentence);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Groups words into sentences ending with `.`, `?` or `!`.
fn sentences<'a, 'w>(words: &'w [&'a str]) -> Vec<&'w [&'a str]> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, word) in words.iter().enumerate() {
        if word.ends_with(['.', '?', '!']) {
            out.push(&words[start..=i]);
            start = i + 1;
        }
    }
    if start < words.len() {
        out.push(&words[start..]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::word_count;

    #[test]
    fn empty_input_has_no_sections() {
        assert!(split_into_sections("", 10).is_empty());
        assert!(split_into_sections("  \n\n \n", 10).is_empty());
    }

    #[test]
    fn short_paragraphs_are_packed_together() {
        let text = "One two three.\n\nFour five.\n\nSix seven eight nine.";
        let sections = split_into_sections(text, 5);
        assert_eq!(sections, vec!["One two three. Four five.", "Six seven eight nine."]);
    }

    #[test]
    fn long_paragraph_splits_on_sentences() {
        let text = "A b c. D e f. G h i.";
        let sections = split_into_sections(text, 6);
        assert_eq!(sections, vec!["A b c. D e f.", "G h i."]);
    }

    #[test]
    fn run_on_sentence_is_cut_by_words() {
        let text = "w1 w2 w3 w4 w5 w6 w7";
        let sections = split_into_sections(text, 3);
        assert_eq!(sections, vec!["w1 w2 w3", "w4 w5 w6", "w7"]);
    }

    #[test]
    fn no_section_exceeds_the_bound_and_no_words_are_lost() {
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta iota kappa lambda mu.\n\n\
                    Nu xi omicron? Pi rho sigma! Tau upsilon phi chi psi omega.";
        let sections = split_into_sections(text, 4);
        assert!(sections.iter().all(|s| word_count(s) <= 4 && !s.is_empty()));
        let total: usize = sections.iter().map(|s| word_count(s)).sum();
        assert_eq!(total, word_count(text));
    }
}
