pub const TELEGRAM_MSG_LIMIT: usize = 4096;

/// Split `s` into parts each at most `TELEGRAM_MSG_LIMIT` chars, preferring to
/// break at the last newline (then the last space) within the limit so
/// whitespace-bounded text is not chopped mid-line. The separator consumed
/// is dropped, not kept in either part.
pub fn split_message(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let chars: Vec<char> = s.chars().collect();
    let mut rest = chars.as_slice();

    while rest.len() > TELEGRAM_MSG_LIMIT {
        let head = &rest[..TELEGRAM_MSG_LIMIT];
        if let Some(i) = head.iter().rposition(|&c| c == '\n') {
            parts.push(head[..i].iter().collect());
            rest = &rest[i + 1..];
        } else if let Some(j) = head.iter().rposition(|&c| c == ' ') {
            parts.push(head[..j].iter().collect());
            rest = &rest[j + 1..];
        } else {
            parts.push(head.iter().collect());
            rest = &rest[TELEGRAM_MSG_LIMIT..];
        }
    }
    parts.push(rest.iter().collect());
    parts
}
