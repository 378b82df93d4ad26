//! Intermediate keys become file names, so they are escaped to stay a single
//! valid path component.

/// Escapes a key into a file name, empty keys have no file name.
pub fn encode_key(key: &str) -> Option<String> {
    match key {
        "" => None,
        "." => Some("%2E".to_string()),
        ".." => Some("%2E%2E".to_string()),
        _ => Some(key.replace('%', "%25").replace('/', "%2F")),
    }
}

/// Reverses [encode_key].
///
/// Unknown escapes are kept as they are.
pub fn decode_key(name: &str) -> String {
    let mut decoded = String::with_capacity(name.len());
    let mut rest = name;

    while let Some(pos) = rest.find('%') {
        decoded.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3);
        let unescaped = match escape {
            Some("%25") => Some('%'),
            Some("%2F") => Some('/'),
            Some("%2E") => Some('.'),
            _ => None,
        };

        match unescaped {
            Some(c) => {
                decoded.push(c);
                rest = &rest[pos + 3..];
            },
            None => {
                decoded.push('%');
                rest = &rest[pos + 1..];
            },
        }
    }

    decoded.push_str(rest);
    decoded
}
