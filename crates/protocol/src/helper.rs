use crate::ProtocolError;

/// Splits `OP rest` at the first whitespace. `rest` keeps everything after
/// that single separator.
pub(crate) fn split_op(line: &str) -> (&str, &str) {
    match line.find(|c: char| c.is_ascii_whitespace()) {
        Some(idx) => (&line[..idx], &line[idx + 1..]),
        None => (line, ""),
    }
}

pub(crate) fn parse_sid(value: &str) -> Result<u64, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        field: "subscription id",
        value: value.to_owned(),
    })
}

pub(crate) fn parse_len(value: &str) -> Result<usize, ProtocolError> {
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        field: "payload length",
        value: value.to_owned(),
    })
}

/// `'message'` -> `message`; anything not wrapped in quotes is returned as is.
pub(crate) fn unquote(value: &str) -> &str {
    value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value)
}
