//! Locates fence markers in arbitrary text and checks their signatures.

use crate::error::{FenceError, FenceResult};
use crate::render::{unescape, FENCE_CLOSE, FENCE_OPEN};
use crate::signer::{canonical_bytes, KeyRing};
use crate::types::{FenceRating, FenceType, VerificationResult, VerifiedFence};
use regex::Regex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::OnceLock;

const KNOWN_ATTRIBUTES: [&str; 6] = ["type", "rating", "source", "timestamp", "sig", "kid"];

static ATTR_LIST_RE: OnceLock<Regex> = OnceLock::new();
static ATTR_RE: OnceLock<Regex> = OnceLock::new();

fn get_attr_list_re() -> &'static Regex {
    ATTR_LIST_RE.get_or_init(|| {
        Regex::new(r#"^(?:\s+[a-z]+="[^"]*")*\s*$"#).expect("valid regex")
    })
}

fn get_attr_re() -> &'static Regex {
    ATTR_RE.get_or_init(|| Regex::new(r#"([a-z]+)="([^"]*)""#).expect("valid regex"))
}

/// A delimited region found by the scanner.
#[derive(Debug, Clone, PartialEq)]
struct Candidate {
    span: Range<usize>,
    /// Attribute source and raw content ranges, or the structural failure.
    parts: Result<(Range<usize>, Range<usize>), FenceError>,
}

impl Candidate {
    fn broken(span: Range<usize>, reason: &str) -> Self {
        Self {
            span,
            parts: Err(FenceError::malformed(reason)),
        }
    }
}

/// Position of the next opening delimiter at or after `from`.
///
/// `<sec:fence` must be followed by whitespace, `>` or end of input, so
/// `<sec:fencepost` is ordinary text.
fn find_open(text: &str, from: usize) -> Option<usize> {
    let mut at = from;
    while let Some(rel) = text[at..].find(FENCE_OPEN) {
        let start = at + rel;
        let after = start + FENCE_OPEN.len();
        match text[after..].chars().next() {
            None => return Some(start),
            Some(c) if c == '>' || c.is_whitespace() => return Some(start),
            Some(_) => at = after,
        }
    }
    None
}

/// Split `text` into candidate markers. Close delimiters without an opener
/// are ordinary text.
///
/// Runs in time linear in `text`: the next opener and the next closer are
/// each searched for once per position and reused until the scan passes them.
fn scan(text: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    let mut next_open = find_open(text, 0);
    // `Some(found)` once searched; `found` is the first closer at or after
    // every later `content_start` until the scan moves past it.
    let mut next_close: Option<Option<usize>> = None;

    while let Some(start) = next_open {
        let attrs_start = start + FENCE_OPEN.len();
        let Some(rel) = text[attrs_start..].find(&['<', '>'][..]) else {
            out.push(Candidate::broken(start..text.len(), "open tag is truncated"));
            break;
        };
        let tag_end = attrs_start + rel;
        if text.as_bytes()[tag_end] == b'<' {
            out.push(Candidate::broken(start..tag_end, "open tag is not terminated"));
            next_open = find_open(text, tag_end);
            continue;
        }

        let content_start = tag_end + 1;
        let close = match next_close {
            Some(Some(c)) if c >= content_start => Some(c),
            Some(None) => None,
            _ => {
                let found = text[content_start..]
                    .find(FENCE_CLOSE)
                    .map(|i| content_start + i);
                next_close = Some(found);
                found
            }
        };
        let reopen = find_open(text, content_start);

        match (close, reopen) {
            (Some(c), Some(n)) if n < c => {
                out.push(Candidate::broken(
                    start..n,
                    "fence reopened before its closing delimiter",
                ));
                next_open = Some(n);
            }
            (Some(c), _) => {
                let end = c + FENCE_CLOSE.len();
                out.push(Candidate {
                    span: start..end,
                    parts: Ok((attrs_start..tag_end, content_start..c)),
                });
                // An opener after `c` cannot start inside the closer.
                next_open = reopen;
            }
            (None, Some(n)) => {
                out.push(Candidate::broken(start..n, "missing closing delimiter"));
                next_open = Some(n);
            }
            (None, None) => {
                out.push(Candidate::broken(
                    start..text.len(),
                    "missing closing delimiter",
                ));
                break;
            }
        }
    }

    out
}

/// Parse `name="value"` pairs. Values are returned still escaped.
fn parse_attributes(src: &str) -> FenceResult<HashMap<&str, &str>> {
    if !get_attr_list_re().is_match(src) {
        return Err(FenceError::malformed("attribute list is not well-formed"));
    }
    let mut attrs = HashMap::new();
    for cap in get_attr_re().captures_iter(src) {
        let name = cap.get(1).map_or("", |m| m.as_str());
        let value = cap.get(2).map_or("", |m| m.as_str());
        if !KNOWN_ATTRIBUTES.contains(&name) {
            return Err(FenceError::malformed(format!(
                "unknown attribute '{}'",
                name
            )));
        }
        if attrs.insert(name, value).is_some() {
            return Err(FenceError::malformed(format!(
                "duplicate attribute '{}'",
                name
            )));
        }
    }
    Ok(attrs)
}

fn required<'a>(attrs: &HashMap<&str, &'a str>, name: &str) -> FenceResult<&'a str> {
    attrs.get(name).copied().ok_or_else(|| {
        FenceError::malformed(format!("missing required attribute '{}'", name))
    })
}

/// Verifies fence markers against a key ring.
#[derive(Debug, Clone)]
pub struct Verifier {
    keyring: KeyRing,
}

impl Verifier {
    /// Create a verifier; an empty key ring is a configuration error.
    pub fn new(keyring: KeyRing) -> FenceResult<Self> {
        if keyring.is_empty() {
            return Err(FenceError::config("no verification keys configured"));
        }
        Ok(Self { keyring })
    }

    /// Keys this verifier accepts.
    pub fn keyring(&self) -> &KeyRing {
        &self.keyring
    }

    /// Verify every marker in `text`, one result per candidate in order of
    /// appearance. Never fails; bad markers become invalid results.
    pub fn verify(&self, text: &str) -> Vec<VerificationResult> {
        let results: Vec<VerificationResult> = scan(text)
            .into_iter()
            .map(|candidate| self.resolve(text, candidate, 0))
            .collect();

        let valid = results.iter().filter(|r| r.is_valid()).count();
        tracing::debug!(
            markers = results.len(),
            valid,
            invalid = results.len() - valid,
            "scanned text for fence markers"
        );
        results
    }

    /// Verify input that must consist of exactly one marker, ignoring
    /// surrounding whitespace.
    pub fn verify_fence(&self, marker: &str) -> VerificationResult {
        let trimmed = marker.trim();
        let offset = marker.len() - marker.trim_start().len();
        let mut candidates = scan(trimmed);

        let whole = 0..trimmed.len();
        if candidates.len() == 1 && candidates[0].span == whole {
            if let Some(candidate) = candidates.pop() {
                return self.resolve(trimmed, candidate, offset);
            }
        }

        let reason = if candidates.is_empty() {
            "no fence marker found"
        } else {
            "expected exactly one fence marker"
        };
        self.reject(offset..offset + trimmed.len(), FenceError::malformed(reason))
    }

    /// True when `text` holds at least one marker and all of them verify.
    pub fn all_valid(&self, text: &str) -> bool {
        let results = self.verify(text);
        !results.is_empty() && results.iter().all(VerificationResult::is_valid)
    }

    /// Verify `text` and report the results as JSON.
    pub fn verify_json(&self, text: &str) -> serde_json::Value {
        let results = self.verify(text);
        let valid = !results.is_empty() && results.iter().all(VerificationResult::is_valid);
        serde_json::json!({
            "valid": valid,
            "markers": results.len(),
            "results": results.iter().map(VerificationResult::to_json).collect::<Vec<_>>(),
        })
    }

    fn resolve(&self, text: &str, candidate: Candidate, offset: usize) -> VerificationResult {
        let span = candidate.span.start + offset..candidate.span.end + offset;
        let checked = candidate
            .parts
            .and_then(|(attrs, content)| self.check(&text[attrs], &text[content]));
        match checked {
            Ok(fence) => VerificationResult::valid(span, fence),
            Err(e) => self.reject(span, e),
        }
    }

    fn reject(&self, span: Range<usize>, error: FenceError) -> VerificationResult {
        tracing::warn!(
            kind = ?error.kind(),
            start = span.start,
            end = span.end,
            "rejected fence marker: {}",
            error
        );
        VerificationResult::invalid(span, error)
    }

    fn check(&self, attr_src: &str, raw_content: &str) -> FenceResult<VerifiedFence> {
        let attrs = parse_attributes(attr_src)?;
        let raw_type = required(&attrs, "type")?;
        let raw_rating = required(&attrs, "rating")?;
        let raw_source = required(&attrs, "source")?;
        let raw_timestamp = required(&attrs, "timestamp")?;
        let signature = required(&attrs, "sig")?;

        let fence_type: FenceType = unescape(raw_type)?.parse()?;
        let rating: FenceRating = unescape(raw_rating)?.parse()?;

        if signature.is_empty() {
            return Err(FenceError::malformed("empty signature attribute"));
        }
        let source = unescape(raw_source)?;
        let timestamp = unescape(raw_timestamp)?;
        let key_id = attrs.get("kid").map(|k| unescape(k)).transpose()?;
        let content = unescape(raw_content)?;

        let canonical = canonical_bytes(&content, fence_type, rating, &source, &timestamp);
        let matched = self
            .keyring
            .verify(&canonical, signature, key_id.as_deref())?;

        Ok(VerifiedFence {
            content,
            fence_type,
            rating,
            source,
            timestamp,
            key_id: Some(matched),
        })
    }
}
