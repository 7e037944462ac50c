use unicode_normalization::UnicodeNormalization;

/// Canonical form of an incoming prompt: leading BOM dropped, NFC, LF line
/// endings, no surrounding whitespace. An all-blank prompt comes back empty.
pub fn clean_prompt(raw: &str) -> String {
    let body = raw.strip_prefix('\u{FEFF}').unwrap_or(raw);
    let composed: String = body.nfc().collect();
    composed.replace("\r\n", "\n").trim().to_owned()
}
