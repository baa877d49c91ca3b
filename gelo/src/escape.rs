//! Item escaping shared by list and dict serialization.

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\x0c')
}

/// Escape one item of a serialized list or dict.
///
/// Items holding whitespace (and the empty item) are wrapped in `"`;
/// `\`, `"`, `{` and `}` are always backslash escaped.
pub fn escape_item(item: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(item.len() + 2);
    let mut quoted = item.is_empty();
    out.push(b'"');
    for &b in item {
        if is_space(b) {
            quoted = true;
        }
        if matches!(b, b'\\' | b'"' | b'{' | b'}') {
            out.push(b'\\');
        }
        out.push(b);
    }
    if quoted {
        out.push(b'"');
        out
    } else {
        out.split_off(1)
    }
}

/// Read back one escaped item starting at `pos`.
///
/// Returns the unescaped bytes and the position just past the item, or
/// `None` when the encoding is malformed.
pub fn unescape_item(item: &[u8], mut pos: usize) -> Option<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let quoted = item.get(pos) == Some(&b'"');
    if quoted {
        pos += 1;
    }
    loop {
        let Some(&b) = item.get(pos) else {
            // an unterminated string is malformed, a bare item just ends
            return if quoted { None } else { Some((out, pos)) };
        };
        match b {
            b'\\' => {
                out.push(*item.get(pos + 1)?);
                pos += 2;
                continue;
            }
            b'"' if quoted => return Some((out, pos + 1)),
            b'}' if quoted => return None,
            b'}' => return Some((out, pos)),
            _ if !quoted && is_space(b) => return Some((out, pos)),
            _ => out.push(b),
        }
        pos += 1;
    }
}

/// Skip whitespace from `pos`, returning the first non-space position.
pub fn slurp_ws(s: &[u8], mut pos: usize) -> usize {
    while pos < s.len() && is_space(s[pos]) {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_item() {
        assert_eq!(escape_item(b"abc"), b"abc");
        assert_eq!(escape_item(b""), b"\"\"");
        assert_eq!(escape_item(b"a b"), b"\"a b\"");
        assert_eq!(escape_item(b"{x}"), b"\\{x\\}");
        assert_eq!(escape_item(b"say \"hi\""), b"\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_unescape_item() {
        assert_eq!(unescape_item(b"abc def", 0), Some((b"abc".to_vec(), 3)));
        assert_eq!(unescape_item(b"\"a b\" c", 0), Some((b"a b".to_vec(), 5)));
        assert_eq!(unescape_item(b"\"\"", 0), Some((Vec::new(), 2)));
        assert_eq!(unescape_item(b"\\{x\\}}", 0), Some((b"{x}".to_vec(), 5)));
        assert_eq!(unescape_item(b"\"open", 0), None);
        assert_eq!(unescape_item(b"bad\\", 0), None);
    }

    #[test]
    fn test_slurp_ws() {
        assert_eq!(slurp_ws(b"  \n\tx", 0), 4);
        assert_eq!(slurp_ws(b"   ", 1), 3);
    }
}
