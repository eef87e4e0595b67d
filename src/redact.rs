use std::borrow::Cow;

const SECRET_FIELDS: [&str; 5] = [
    "accessToken",
    "refreshToken",
    "password",
    "newPassword",
    "token",
];

fn find_ascii_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let hay = haystack.as_bytes();
    let nee = needle.as_bytes();
    if nee.is_empty() {
        return Some(0);
    }
    if nee.len() > hay.len() {
        return None;
    }

    (0..=hay.len() - nee.len()).find(|&i| {
        hay[i..i + nee.len()]
            .iter()
            .zip(nee)
            .all(|(a, b)| a.to_ascii_lowercase() == b.to_ascii_lowercase())
    })
}

fn redact_bearer(text: String) -> String {
    const PREFIX: &str = "bearer ";
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = find_ascii_case_insensitive(rest, PREFIX) {
        let end = idx + PREFIX.len();
        out.push_str(&rest[..end]);
        rest = &rest[end..];

        let consumed: usize = rest
            .chars()
            .take_while(|ch| !ch.is_whitespace() && *ch != '"' && *ch != ',')
            .map(char::len_utf8)
            .sum();
        out.push_str("REDACTED");
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

/// Replaces the string value of `"field":"..."` pairs.
fn redact_json_field(text: String, field: &str) -> String {
    let needle = format!("\"{field}\"");
    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(idx) = rest.find(&needle) {
        let end = idx + needle.len();
        out.push_str(&rest[..end]);
        rest = &rest[end..];

        let separator: usize = rest
            .chars()
            .take_while(|ch| ch.is_whitespace() || *ch == ':')
            .map(char::len_utf8)
            .sum();
        out.push_str(&rest[..separator]);
        rest = &rest[separator..];

        if !rest.starts_with('"') {
            continue;
        }
        let mut escaped = false;
        let mut consumed = 1;
        for ch in rest[1..].chars() {
            consumed += ch.len_utf8();
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                break;
            }
        }
        out.push_str("\"REDACTED\"");
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

/// Strips bearer credentials and token/password JSON values from text that is
/// about to be logged or surfaced in an error.
pub fn redact_secrets(input: &str) -> Cow<'_, str> {
    let mut value = redact_bearer(input.to_string());
    for field in SECRET_FIELDS {
        if value.contains(field) {
            value = redact_json_field(value, field);
        }
    }

    if value == input {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_secrets_redacts_bearer_header_line() {
        let input = "Authorization: Bearer eyJhbGciOi.abc.def\n";
        let out = redact_secrets(input).to_string();
        assert_eq!(out, "Authorization: Bearer REDACTED\n");
    }

    #[test]
    fn redact_secrets_redacts_token_fields() {
        let input = r#"{"accessToken": "a.b.c","refreshToken":"r-1","username":"sammy"}"#;
        let out = redact_secrets(input).to_string();
        assert_eq!(
            out,
            r#"{"accessToken": "REDACTED","refreshToken":"REDACTED","username":"sammy"}"#
        );
    }

    #[test]
    fn redact_secrets_handles_escaped_quotes_in_passwords() {
        let input = r#"{"password":"p\"w","next":1}"#;
        let out = redact_secrets(input).to_string();
        assert_eq!(out, r#"{"password":"REDACTED","next":1}"#);
    }

    #[test]
    fn redact_secrets_borrows_clean_input() {
        assert!(matches!(redact_secrets("status 500"), Cow::Borrowed(_)));
    }
}
