//! Store-native glob matching for key patterns.
//!
//! Supports `*`, `?`, character classes (`[abc]`, `[a-z]`, `[^x]`) and
//! backslash escapes, the subset Redis applies to `KEYS`/`SCAN MATCH`.

pub fn glob_match(pattern: &str, key: &str) -> bool {
    matches(pattern.as_bytes(), key.as_bytes())
}

fn matches(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => {
            let rest = trim_stars(rest);
            if rest.is_empty() {
                return true;
            }
            (0..=text.len()).any(|start| matches(rest, &text[start..]))
        }
        Some((b'?', rest)) => !text.is_empty() && matches(rest, &text[1..]),
        Some((b'[', rest)) => {
            let Some((&ch, text_rest)) = text.split_first() else {
                return false;
            };
            match match_class(rest, ch) {
                Some((hit, after)) => hit && matches(after, text_rest),
                None => ch == b'[' && matches(rest, text_rest),
            }
        }
        Some((b'\\', rest)) if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && matches(&rest[1..], &text[1..])
        }
        Some((literal, rest)) => text.first() == Some(literal) && matches(rest, &text[1..]),
    }
}

fn trim_stars(mut pattern: &[u8]) -> &[u8] {
    while let Some((b'*', rest)) = pattern.split_first() {
        pattern = rest;
    }
    pattern
}

/// Match `ch` against the class body following `[`. Returns whether it matched
/// and the pattern after the closing `]`, or `None` for an unterminated class.
fn match_class(body: &[u8], ch: u8) -> Option<(bool, &[u8])> {
    let (negated, mut cursor) = match body.split_first() {
        Some((b'^', rest)) => (true, rest),
        _ => (false, body),
    };

    let mut hit = false;
    loop {
        match cursor {
            [] => return None,
            [b']', rest @ ..] => return Some((hit != negated, rest)),
            [b'\\', escaped, rest @ ..] => {
                hit |= *escaped == ch;
                cursor = rest;
            }
            [start, b'-', end, rest @ ..] if *end != b']' => {
                let (low, high) = if start <= end {
                    (*start, *end)
                } else {
                    (*end, *start)
                };
                hit |= (low..=high).contains(&ch);
                cursor = rest;
            }
            [single, rest @ ..] => {
                hit |= *single == ch;
                cursor = rest;
            }
        }
    }
}
