use crate::models::Switch;

/// Tokens speech models emit for things that are not speech.
pub const NON_SPEECH_TOKENS: &[&str] = &[
    "music",
    "applause",
    "silence",
    "inaudible",
    "laughter",
    "noise",
    "blank_audio",
];

pub const ON_KEYWORDS: &[&str] = &["on", "start", "enable", "activate"];
pub const OFF_KEYWORDS: &[&str] = &["off", "stop", "disable", "deactivate"];

/// Shortest residual transcript still treated as speech.
const MIN_SPEECH_CHARS: usize = 2;

/// Lower-cases `raw`, strips bracketed annotations and non-speech tokens and
/// collapses whitespace. Returns an empty string when nothing speech-like
/// remains.
pub fn clean_transcript(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let stripped = strip_annotations(&lowered);

    let words: Vec<&str> = stripped
        .split_whitespace()
        .filter(|word| {
            let bare = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '_');
            !NON_SPEECH_TOKENS.contains(&bare)
        })
        .collect();
    let cleaned = words.join(" ");

    if cleaned.trim().chars().count() < MIN_SPEECH_CHARS {
        return String::new();
    }
    cleaned
}

/// Removes closed `[...]`, `(...)` and `*...*` spans. An opener without a
/// matching closer is kept as ordinary text.
fn strip_annotations(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        match annotation_end(&chars, i) {
            Some(end) => {
                out.push(' ');
                i = end + 1;
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }
    out
}

/// Index of the character closing an annotation that opens at `start`.
fn annotation_end(chars: &[char], start: usize) -> Option<usize> {
    let (open, close) = match chars[start] {
        '[' => ('[', ']'),
        '(' => ('(', ')'),
        '*' => {
            return chars[start + 1..]
                .iter()
                .position(|&c| c == '*')
                .map(|offset| start + 1 + offset);
        }
        _ => return None,
    };

    let mut depth = 0usize;
    for (offset, &c) in chars[start..].iter().enumerate() {
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(start + offset);
            }
        }
    }
    None
}

/// Maps a cleaned transcript to a command.
///
/// Keywords match as case-insensitive substrings, so `"turnon"` counts as
/// on and `"deactivate"` hits both sets. A transcript hitting both keyword
/// sets is ambiguous and yields `None`, as does one hitting neither.
pub fn extract_command(transcript: &str) -> Option<Switch> {
    let lowered = transcript.to_lowercase();
    let mentions = |keywords: &[&str]| keywords.iter().any(|kw| lowered.contains(kw));

    match (mentions(ON_KEYWORDS), mentions(OFF_KEYWORDS)) {
        (true, false) => Some(Switch::On),
        (false, true) => Some(Switch::Off),
        _ => None,
    }
}
