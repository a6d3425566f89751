//! Attribute field normalization.
//!
//! Label exports of radio and dropdown fields render the chosen option as
//! `Label (code)`, embedding the machine code next to the human label. Only
//! the label is mirrored into the registry. Values that do not carry the
//! decoration pass through unchanged; this parser never fails.

/// Strips the trailing ` (<digits>)` choice decoration, if present.
pub fn parse_field(raw: &str) -> String {
    match strip_choice_code(raw) {
        Some(label) => label.to_owned(),
        None => raw.to_owned(),
    }
}

fn strip_choice_code(raw: &str) -> Option<&str> {
    let without_paren = raw.strip_suffix(')')?;
    let open = without_paren.rfind(" (")?;
    let code = &without_paren[open + 2..];
    if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(&raw[..open])
}
