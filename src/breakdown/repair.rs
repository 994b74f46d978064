//! Best-effort cleanup of almost-JSON produced by language models.
//!
//! A single string-aware pass fixes the three defects models produce most
//! often: trailing commas before `}` or `]`, backslashes that do not start a
//! valid JSON escape (the backslash is dropped), and raw control characters
//! inside string literals.

pub fn repair(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len() + 16);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            match ch {
                '\\' => match chars.get(i + 1).copied() {
                    Some(next @ ('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't')) => {
                        out.push('\\');
                        out.push(next);
                        i += 2;
                        continue;
                    }
                    Some('u') if is_unicode_escape(&chars[i + 2..]) => {
                        out.push_str("\\u");
                        i += 2;
                        continue;
                    }
                    // not an escape, drop the backslash
                    _ => {}
                },
                '"' => {
                    in_string = false;
                    out.push(ch);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
        } else {
            match ch {
                '"' => {
                    in_string = true;
                    out.push(ch);
                }
                ',' if closes_next(&chars[i + 1..]) => {}
                c => out.push(c),
            }
        }
        i += 1;
    }
    out
}

fn is_unicode_escape(rest: &[char]) -> bool {
    rest.len() >= 4 && rest[..4].iter().all(char::is_ascii_hexdigit)
}

fn closes_next(rest: &[char]) -> bool {
    matches!(
        rest.iter().find(|c| !c.is_whitespace()),
        Some('}') | Some(']')
    )
}
