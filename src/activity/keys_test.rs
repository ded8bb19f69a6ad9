use super::*;
use pretty_assertions::assert_eq;

#[test]
fn test_plain_text() {
    assert_eq!(
        parse_key_sequence("hello world").unwrap(),
        vec![KeySegment::Text("hello world".into())]
    );
    assert!(parse_key_sequence("").unwrap().is_empty());
}

#[test]
fn test_mixed_sequence() {
    assert_eq!(
        parse_key_sequence("o${KEY_CTRL}${KEY_LEFT}${KEY_CTRL}g").unwrap(),
        vec![
            KeySegment::Text("o".into()),
            KeySegment::Key('\u{E009}'),
            KeySegment::Key('\u{E012}'),
            KeySegment::Key('\u{E009}'),
            KeySegment::Text("g".into()),
        ]
    );
}

#[test]
fn test_unknown_key() {
    assert_eq!(
        parse_key_sequence("a${KEY_HYPER}").unwrap_err(),
        UnknownKey("KEY_HYPER".into())
    );
    assert_eq!(
        parse_key_sequence("${KEY_HYPER}").unwrap_err().to_string(),
        "Key KEY_HYPER not found."
    );
}

#[test]
fn test_aliases_share_code_points() {
    assert_eq!(key_code("BACKSPACE"), key_code("BACK_SPACE"));
    assert_eq!(key_code("CTRL"), key_code("CONTROL"));
    assert_eq!(key_code("ENTER"), Some(ENTER));
    assert_eq!(KeySegment::Key(ENTER).to_keys(), "\u{E007}");
}
