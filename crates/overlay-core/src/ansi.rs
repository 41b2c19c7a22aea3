//! ANSI escape code handling utilities
//!
//! Check commands (eslint, tsc, cargo, ...) colorize their output when they
//! think they are talking to a terminal. The captured text is forwarded to
//! consoles that do not interpret escape sequences, so they are stripped
//! before the text leaves the server.

use regex::Regex;
use std::sync::LazyLock;

/// One CSI-style escape sequence: an introducer (ESC or the single-byte C1
/// CSI `U+009B`), optional parameter prefix characters, optional numeric
/// parameters separated by `;`, and one final command byte.
///
/// Both repetitions are bounded so a sequence never exceeds
/// [`MAX_SEQUENCE_LEN`] characters.
const SEQUENCE: &str = r"[\x1b\x{9b}][\[()#;?]{0,32}(?:[0-9]{1,4}(?:;[0-9]{0,4}){0,32})?[0-9A-ORZcf-nqry=><]";

/// Introducer + 32 prefix chars + 4 digits + 32 `;dddd` groups + final byte
const MAX_SEQUENCE_LEN: usize = 1 + 32 + 4 + 32 * 5 + 1;

static ANSI_ESCAPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(SEQUENCE).expect("ANSI regex pattern is valid"));

static ANCHORED_ESCAPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^(?:{SEQUENCE})")).expect("anchored ANSI regex pattern is valid")
});

fn is_introducer(c: char) -> bool {
    c == '\x1b' || c == '\u{9b}'
}

/// Strip all terminal escape sequences from a string.
///
/// Everything that is not part of an escape sequence is preserved verbatim,
/// including newlines and text that merely looks like a sequence (`[31m`
/// without an introducer).
///
/// The input is scanned once from the end. At each introducer the sequence
/// is matched against the already-stripped text that follows it, so a
/// sequence formed by removing another one is removed too and
/// `strip_ansi_codes(strip_ansi_codes(s)) == strip_ansi_codes(s)`.
///
/// # Examples
///
/// ```
/// use overlay_core::strip_ansi_codes;
///
/// let input = "\x1b[31merror\x1b[0m: unused variable";
/// assert_eq!(strip_ansi_codes(input), "error: unused variable");
///
/// let input = "array[31m] stays";
/// assert_eq!(strip_ansi_codes(input), input);
/// ```
pub fn strip_ansi_codes(input: &str) -> String {
    if !contains_ansi_codes(input) {
        return input.to_string();
    }

    // Stripped text right of the cursor, reversed: the next char is last
    let mut tail: Vec<char> = Vec::with_capacity(input.len());
    let mut window = String::with_capacity(MAX_SEQUENCE_LEN * 2);

    for c in input.chars().rev() {
        tail.push(c);
        if !is_introducer(c) {
            continue;
        }

        window.clear();
        window.push(c);
        window.extend(
            tail.iter()
                .rev()
                .skip(1)
                .take(MAX_SEQUENCE_LEN - 1)
                .take_while(|next| !is_introducer(**next)),
        );

        if let Some(found) = ANCHORED_ESCAPE_PATTERN.find(&window) {
            let chars = window[..found.end()].chars().count();
            tail.truncate(tail.len() - chars);
        }
    }

    tail.into_iter().rev().collect()
}

/// Check if a string contains terminal escape sequences.
///
/// # Examples
///
/// ```
/// use overlay_core::contains_ansi_codes;
///
/// assert!(contains_ansi_codes("\x1b[1mbold\x1b[22m"));
/// assert!(!contains_ansi_codes("plain text"));
/// ```
pub fn contains_ansi_codes(input: &str) -> bool {
    ANSI_ESCAPE_PATTERN.is_match(input)
}
