//! Transcript cleanup: non-speech marker removal and dictionary autocorrect.
//!
//! The autocorrect is deliberately conservative. It only knows a small fixed
//! table of domain terms the recognition engines routinely mangle, and only
//! rewrites a token when it matches a dictionary key exactly or within edit
//! distance 2. It is not a spell-checker.

use regex::Regex;
use std::sync::OnceLock;

/// Misrecognized form -> canonical form. Order is significant: the first key
/// within edit distance wins, so more specific entries come first.
const CORRECTIONS: &[(&str, &str)] = &[
    ("mathematic", "mathematics"),
    ("fiziks", "physics"),
    ("kemistry", "chemistry"),
    ("bayology", "biology"),
    ("algebra", "algebra"),
    ("triangel", "triangle"),
    ("equasion", "equation"),
    ("theorum", "theorem"),
];

/// Levenshtein edit distance between two strings, by characters.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

fn correct_token(token: &str) -> String {
    for (key, canonical) in CORRECTIONS {
        if token == *key {
            return (*canonical).to_string();
        }
    }
    for (key, canonical) in CORRECTIONS {
        if levenshtein(token, key) <= 2 {
            return (*canonical).to_string();
        }
    }
    token.to_string()
}

/// Fix common misrecognitions, capitalize the first letter, and make sure the
/// result ends in terminal punctuation.
pub fn correct(candidate: &str) -> String {
    let corrected: Vec<String> = candidate
        .to_lowercase()
        .split_whitespace()
        .map(correct_token)
        .collect();
    let mut result = corrected.join(" ");

    let mut chars = result.chars();
    if let Some(first) = chars.next() {
        result = first.to_uppercase().collect::<String>() + chars.as_str();
    }

    if !result.is_empty()
        && !result.ends_with('.')
        && !result.ends_with('!')
        && !result.ends_with('?')
    {
        result.push('.');
    }
    result
}

/// Strip engine noise markers like `[silence]` or `(noise)` and collapse
/// whitespace. Applied before [`correct`] so markers never reach the
/// dictionary pass.
pub fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    static NON_SPEECH_RE: OnceLock<Regex> = OnceLock::new();
    let re = NON_SPEECH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?|wind|background)\s*)\)",
        )
        .expect("non-speech regex should compile")
    });
    let without_markers = re.replace_all(trimmed, " ");
    without_markers
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrects_dictionary_terms_and_punctuates() {
        assert_eq!(correct("fiziks is fun"), "Physics is fun.");
    }

    #[test]
    fn leaves_existing_terminal_punctuation_alone() {
        assert_eq!(correct("already punctuated!"), "Already punctuated!");
        assert_eq!(correct("is that so?"), "Is that so?");
        assert_eq!(correct("done."), "Done.");
    }

    #[test]
    fn exact_match_wins_before_edit_distance() {
        assert_eq!(correct("algebra"), "Algebra.");
    }

    #[test]
    fn edit_distance_two_still_matches() {
        assert_eq!(correct("theorum"), "Theorem.");
        // One edit away from the "theorum" key.
        assert_eq!(correct("theorums"), "Theorem.");
    }

    #[test]
    fn distant_words_pass_through() {
        assert_eq!(correct("gravity"), "Gravity.");
    }

    #[test]
    fn lowercases_before_matching() {
        assert_eq!(correct("FIZIKS rules"), "Physics rules.");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(correct(""), "");
        assert_eq!(correct("   "), "");
    }

    #[test]
    fn first_dictionary_entry_wins_on_ties() {
        // "mathematics" is within distance 1 of the "mathematic" key and
        // nothing earlier, so the first-match rule keeps it canonical.
        assert_eq!(correct("mathematics"), "Mathematics.");
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("fiziks", "physics"), 4);
    }

    #[test]
    fn sanitize_strips_noise_markers() {
        assert_eq!(sanitize_transcript("[silence] hello (noise) there"), "hello there");
        assert_eq!(sanitize_transcript("  [ ]  "), "");
        assert_eq!(sanitize_transcript("plain text"), "plain text");
    }
}
