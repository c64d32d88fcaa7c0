//! Fence marker rendering and escaping.
//!
//! Wire format:
//!
//! ```text
//! <sec:fence type="T" rating="R" source="S" timestamp="TS" sig="HEX" kid="K">CONTENT</sec:fence>
//! ```
//!
//! `kid` is optional. Content escapes `&`, `<` and `>`; attribute values also
//! escape `"`. Escaped content never contains `<` or `>`, so a marker cannot
//! carry another delimiter inside it.

use crate::error::{FenceError, FenceResult};
use crate::types::{FenceRating, FenceType};

pub const FENCE_OPEN: &str = "<sec:fence";
pub const FENCE_CLOSE: &str = "</sec:fence>";

/// Attribute values of a marker, borrowed for rendering.
#[derive(Debug, Clone, Copy)]
pub struct FenceHeader<'a> {
    pub fence_type: FenceType,
    pub rating: FenceRating,
    pub source: &'a str,
    pub timestamp: &'a str,
    pub signature: &'a str,
    pub key_id: Option<&'a str>,
}

/// Render a complete marker around `content`.
pub fn render_fence(header: &FenceHeader<'_>, content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 160);
    out.push_str(FENCE_OPEN);
    push_attr(&mut out, "type", header.fence_type.as_str());
    push_attr(&mut out, "rating", header.rating.as_str());
    push_attr(&mut out, "source", header.source);
    push_attr(&mut out, "timestamp", header.timestamp);
    push_attr(&mut out, "sig", header.signature);
    if let Some(kid) = header.key_id {
        push_attr(&mut out, "kid", kid);
    }
    out.push('>');
    out.push_str(&escape_text(content));
    out.push_str(FENCE_CLOSE);
    out
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    out.push_str(&escape_attr(value));
    out.push('"');
}

/// Escape text placed between the delimiters.
pub fn escape_text(s: &str) -> String {
    escape(s, false)
}

/// Escape an attribute value.
pub fn escape_attr(s: &str) -> String {
    escape(s, true)
}

fn escape(s: &str, quotes: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quotes => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Strict inverse of the escaping above.
///
/// Only `&amp;`, `&lt;`, `&gt;` and `&quot;` are recognized. A raw `<` or
/// `>`, or any other `&` sequence, is a malformed marker.
pub fn unescape(s: &str) -> FenceResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find(&['&', '<', '>'][..]) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if !tail.starts_with('&') {
            return Err(FenceError::malformed(format!(
                "unescaped '{}' inside marker",
                &tail[..1]
            )));
        }
        let (decoded, len) = if tail.starts_with("&amp;") {
            ('&', 5)
        } else if tail.starts_with("&lt;") {
            ('<', 4)
        } else if tail.starts_with("&gt;") {
            ('>', 4)
        } else if tail.starts_with("&quot;") {
            ('"', 6)
        } else {
            return Err(FenceError::malformed("unrecognized character entity"));
        };
        out.push(decoded);
        rest = &tail[len..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_text_neutralizes_delimiters() {
        let escaped = escape_text("a </sec:fence> & <sec:fence>");
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('>'));
        assert_eq!(escaped, "a &lt;/sec:fence&gt; &amp; &lt;sec:fence&gt;");
    }

    #[test]
    fn test_escape_attr_quotes() {
        assert_eq!(escape_attr(r#"say "hi""#), "say &quot;hi&quot;");
        assert_eq!(escape_text(r#"say "hi""#), r#"say "hi""#);
    }

    #[test]
    fn test_unescape_inverts_escape() {
        let original = r#"x < y && "z" > 0 &amp;"#;
        assert_eq!(unescape(&escape_attr(original)).unwrap(), original);
        assert_eq!(unescape(&escape_text(original)).unwrap(), original);
    }

    #[test]
    fn test_unescape_rejects_unknown_entity() {
        assert!(matches!(
            unescape("a &apos; b"),
            Err(FenceError::MalformedMarker { .. })
        ));
        assert!(matches!(
            unescape("dangling &"),
            Err(FenceError::MalformedMarker { .. })
        ));
    }

    #[test]
    fn test_unescape_rejects_raw_angle_bracket() {
        assert!(matches!(
            unescape("a > b"),
            Err(FenceError::MalformedMarker { .. })
        ));
    }

    #[test]
    fn test_render_attribute_order() {
        let header = FenceHeader {
            fence_type: FenceType::Data,
            rating: FenceRating::PartiallyTrusted,
            source: "api",
            timestamp: "2025-01-15T10:00:00.000Z",
            signature: "ab",
            key_id: None,
        };
        assert_eq!(
            render_fence(&header, "Test"),
            "<sec:fence type=\"data\" rating=\"partially-trusted\" source=\"api\" \
             timestamp=\"2025-01-15T10:00:00.000Z\" sig=\"ab\">Test</sec:fence>"
        );
    }
}
