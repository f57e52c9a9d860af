#![allow(clippy::module_name_repetitions)]
//! Small utilities: shell escaping for logs, header boundary search, tokenization, text clipping.

pub mod exec;
pub mod id;

pub fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_escape(a))
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=./:@".contains(c))
    {
        s.to_string()
    } else {
        let escaped = s.replace('\'', "'\"'\"'");
        format!("'{}'", escaped)
    }
}

/// Find end of HTTP headers, accepting either CRLF-CRLF or LF-LF separators, whichever ends
/// first. Returns the index just after the terminator.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    find_header_end_from(buf, 0)
}

/// Like `find_header_end`, but only considers terminators ending at or after `from`.
/// Callers that grow a buffer pass the previous length so each byte is examined once.
pub fn find_header_end_from(buf: &[u8], from: usize) -> Option<usize> {
    (from..buf.len())
        .filter(|&i| buf[i] == b'\n')
        .find(|&i| {
            (i >= 1 && buf[i - 1] == b'\n') || (i >= 3 && &buf[i - 3..=i] == b"\r\n\r\n")
        })
        .map(|i| i + 1)
}

/// Minimal shell-like tokenizer supporting single and double quotes.
/// Does not support escapes; quotes preserve spaces.
pub fn shell_like_split_args(s: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;

    for ch in s.chars() {
        match ch {
            '\'' if !in_double => {
                in_single = !in_single;
            }
            '"' if !in_single => {
                in_double = !in_double;
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if !current.is_empty() {
                    out.push(current.clone());
                    current.clear();
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Clip text to at most `max_chars` characters, appending a marker with the dropped count.
/// Operates on chars, never splits a UTF-8 sequence.
pub fn clip_text(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((cut, _)) => {
            let dropped = s[cut..].chars().count();
            format!("{}…[truncated {} chars]", &s[..cut], dropped)
        }
    }
}

/// Whitespace-delimited word count; used as a token estimate.
pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}
