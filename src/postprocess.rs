//! Deterministic cleanup of model-produced Markdown.
//!
//! OCR models follow the "return Markdown only" instruction most of the
//! time, but not always. The passes here remove the usual wrapping without
//! touching the transcribed content:
//!
//! 1. Drop a chatty first line ("Here is the transcription:")
//! 2. Unwrap an outer ` ```markdown ` fence around the whole reply
//! 3. CRLF / CR → LF
//! 4. Strip invisible code points (ZWSP, BOM, soft hyphen, joiners)
//! 5. Trim trailing whitespace on every line
//! 6. Collapse runs of blank lines down to one
//! 7. End with exactly one newline
//!
//! Order matters: the preamble has to go before fence detection, since the
//! fence regex is anchored at the start of the text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply every pass in order.
pub fn clean_markdown(input: &str) -> String {
    let s = drop_preamble(input.trim());
    let s = unwrap_outer_fence(&s);
    let s = normalise_line_endings(&s);
    let s = strip_invisible(&s);
    let s = trim_line_ends(&s);
    let s = collapse_blank_runs(&s);
    final_newline(&s)
}

// ── Pass 1: chatty preamble ──────────────────────────────────────────────────

static RE_PREAMBLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:sure[,!.]?\s*)?(?:here(?: is|'s) (?:the|your) (?:markdown|transcription|extracted text|text|content)[^\n]*:)\s*\n",
    )
    .unwrap()
});

fn drop_preamble(input: &str) -> String {
    RE_PREAMBLE.replace(input, "").into_owned()
}

// ── Pass 2: outer fence ──────────────────────────────────────────────────────

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn unwrap_outer_fence(input: &str) -> String {
    match RE_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

// ── Pass 3: line endings ─────────────────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Pass 4: invisible code points ────────────────────────────────────────────

const INVISIBLE: [char; 6] = [
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}',
];

fn strip_invisible(input: &str) -> String {
    input.chars().filter(|c| !INVISIBLE.contains(c)).collect()
}

// ── Pass 5: trailing whitespace ──────────────────────────────────────────────

fn trim_line_ends(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, line) in input.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out
}

// ── Pass 6: blank-line runs ──────────────────────────────────────────────────

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_runs(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

// ── Pass 7: final newline ────────────────────────────────────────────────────

fn final_newline(input: &str) -> String {
    let body = input.trim_end_matches('\n');
    if body.is_empty() {
        String::new()
    } else {
        format!("{body}\n")
    }
}
