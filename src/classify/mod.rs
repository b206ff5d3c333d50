use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

/// Semantic label attached to a captured snippet, used for badges and
/// filtering. `Image` is assigned by the capture pipeline, never by
/// [`classify`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContentType {
    Text,
    Url,
    Color,
    Code,
    Image,
}

static HEX_COLOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("valid hex color pattern")
});

const COLOR_FUNCTION_PREFIXES: [&str; 4] = ["rgb(", "rgba(", "hsl(", "hsla("];

/// Keyword substrings that flag a snippet as source code. Cheap heuristics
/// across the handful of languages people actually paste; misclassification
/// only affects the badge, so precision is best-effort.
const CODE_KEYWORDS: [&str; 12] = [
    "function ",
    "const ",
    "let ",
    "var ",
    "class ",
    "import ",
    "export ",
    "def ",
    "return ",
    "#include",
    "fn ",
    "=> ",
];

/// Classify raw clipboard text. Pure and total: never fails, never
/// allocates beyond the trim, and the same input always yields the same
/// label. First matching rule wins.
pub fn classify(text: &str) -> ContentType {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ContentType::Text;
    }
    if is_strict_http_url(trimmed) {
        return ContentType::Url;
    }
    if is_color(trimmed) {
        return ContentType::Color;
    }
    if looks_like_code(trimmed) {
        return ContentType::Code;
    }
    ContentType::Text
}

/// Only absolute http/https URLs count. A string that merely starts with
/// the prefix but fails strict parsing, or that parses under a different
/// scheme, stays plain text.
fn is_strict_http_url(text: &str) -> bool {
    if !text.starts_with("http://") && !text.starts_with("https://") {
        return false;
    }
    match Url::parse(text) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

fn is_color(text: &str) -> bool {
    if HEX_COLOR.is_match(text) {
        return true;
    }
    COLOR_FUNCTION_PREFIXES
        .iter()
        .any(|prefix| text.starts_with(prefix))
}

fn looks_like_code(text: &str) -> bool {
    if CODE_KEYWORDS.iter().any(|kw| text.contains(kw)) {
        return true;
    }
    if text.contains(';') && text.contains('{') && text.contains('}') {
        return true;
    }
    // Angle-bracket markup heuristic: "<html>...</html>", "<div/>", etc.
    text.starts_with('<') && text.ends_with('>')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_whitespace_are_text() {
        assert_eq!(classify(""), ContentType::Text);
        assert_eq!(classify("   \n\t "), ContentType::Text);
    }

    #[test]
    fn strict_urls_only() {
        assert_eq!(classify("https://example.com"), ContentType::Url);
        assert_eq!(classify("http://example.com/path?q=1"), ContentType::Url);
        // Wrong scheme or unparseable lookalikes stay text.
        assert_eq!(classify("ftp://example.com"), ContentType::Text);
        assert_eq!(classify("https://"), ContentType::Text);
        assert_eq!(classify("http:// spaced host"), ContentType::Text);
        assert_eq!(classify("example.com"), ContentType::Text);
    }

    #[test]
    fn hex_and_functional_colors() {
        assert_eq!(classify("#fff"), ContentType::Color);
        assert_eq!(classify("#1A2b3C"), ContentType::Color);
        assert_eq!(classify("rgb(255, 0, 0)"), ContentType::Color);
        assert_eq!(classify("rgba(0,0,0,0.5)"), ContentType::Color);
        assert_eq!(classify("hsl(120, 50%, 50%)"), ContentType::Color);
        assert_eq!(classify("hsla(120,50%,50%,1)"), ContentType::Color);
        // Partial or embedded hex strings are not colors.
        assert_eq!(classify("#ffff"), ContentType::Text);
        assert_eq!(classify("color: #fff"), ContentType::Text);
    }

    #[test]
    fn code_keywords_and_structure() {
        assert_eq!(classify("function foo() {}"), ContentType::Code);
        assert_eq!(classify("const x = 1"), ContentType::Code);
        assert_eq!(classify("def handler(req):"), ContentType::Code);
        assert_eq!(classify("import os"), ContentType::Code);
        assert_eq!(classify("while (a) { b(); }"), ContentType::Code);
        assert_eq!(classify("<div class=\"x\">hi</div>"), ContentType::Code);
    }

    #[test]
    fn plain_prose_is_text() {
        assert_eq!(classify("pick up milk on the way home"), ContentType::Text);
        assert_eq!(classify("meeting at 3pm"), ContentType::Text);
    }

    #[test]
    fn classify_is_deterministic() {
        for input in ["https://example.com", "#fff", "const x = 1", "hello", ""] {
            assert_eq!(classify(input), classify(input));
        }
    }

    #[test]
    fn content_type_serializes_lowercase() {
        let json = serde_json::to_string(&ContentType::Url).unwrap();
        assert_eq!(json, "\"url\"");
        let back: ContentType = serde_json::from_str("\"code\"").unwrap();
        assert_eq!(back, ContentType::Code);
    }
}
