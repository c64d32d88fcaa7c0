//! Core data types for prompt fences.

use crate::error::{FenceError, FenceResult};
use crate::render::{render_fence, FenceHeader};
use crate::signer::KeyRing;
use chrono::{NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// Timestamp layout carried by every fence: UTC, millisecond precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Role of the fenced text inside a prompt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FenceType {
    Instructions,
    Content,
    Data,
}

impl FenceType {
    pub const ALL: [FenceType; 3] = [Self::Instructions, Self::Content, Self::Data];

    /// Wire token for this fence type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instructions => "instructions",
            Self::Content => "content",
            Self::Data => "data",
        }
    }
}

impl FromStr for FenceType {
    type Err = FenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instructions" => Ok(Self::Instructions),
            "content" => Ok(Self::Content),
            "data" => Ok(Self::Data),
            _ => Err(FenceError::UnknownLabel {
                field: "type".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Trust level assigned to fenced text. Used as a label, never ordered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FenceRating {
    Trusted,
    Untrusted,
    PartiallyTrusted,
}

impl FenceRating {
    pub const ALL: [FenceRating; 3] = [Self::Trusted, Self::Untrusted, Self::PartiallyTrusted];

    /// Wire token for this rating.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Untrusted => "untrusted",
            Self::PartiallyTrusted => "partially-trusted",
        }
    }
}

impl FromStr for FenceRating {
    type Err = FenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trusted" => Ok(Self::Trusted),
            "untrusted" => Ok(Self::Untrusted),
            "partially-trusted" => Ok(Self::PartiallyTrusted),
            _ => Err(FenceError::UnknownLabel {
                field: "rating".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

macro_rules! label_string_impls {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$ty> for String {
            fn from(label: $ty) -> Self {
                label.as_str().to_string()
            }
        }

        impl PartialEq<str> for $ty {
            fn eq(&self, other: &str) -> bool {
                self.as_str() == other
            }
        }

        impl PartialEq<&str> for $ty {
            fn eq(&self, other: &&str) -> bool {
                self.as_str() == *other
            }
        }

        impl PartialEq<$ty> for str {
            fn eq(&self, other: &$ty) -> bool {
                self == other.as_str()
            }
        }

        impl PartialEq<$ty> for &str {
            fn eq(&self, other: &$ty) -> bool {
                *self == other.as_str()
            }
        }
    };
}

label_string_impls!(FenceType);
label_string_impls!(FenceRating);

/// Current time in the fence timestamp format.
pub fn current_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Check that `timestamp` is `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub fn validate_timestamp(timestamp: &str) -> FenceResult<()> {
    let invalid = |detail: String| FenceError::Validation {
        field: "timestamp".to_string(),
        message: format!("'{}' is not a UTC millisecond timestamp: {}", timestamp, detail),
    };
    let parsed = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .map_err(|e| invalid(e.to_string()))?;
    // `%.3f` also accepts a missing or differently sized fraction on input.
    if parsed.format(TIMESTAMP_FORMAT).to_string() != timestamp {
        return Err(invalid("expected exactly three fractional digits".to_string()));
    }
    Ok(())
}

/// Unsigned segment. Signing it against a [`KeyRing`] yields a [`FenceSegment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDraft {
    pub content: String,
    pub fence_type: FenceType,
    pub rating: FenceRating,
    pub source: String,
    /// Issuance time; `None` stamps the current time when signed.
    pub timestamp: Option<String>,
}

impl SegmentDraft {
    pub fn new(
        content: impl Into<String>,
        fence_type: FenceType,
        rating: FenceRating,
        source: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            fence_type,
            rating,
            source: source.into(),
            timestamp: None,
        }
    }

    /// Pin the issuance time instead of using the clock.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Check the draft before signing.
    pub fn validate(&self) -> FenceResult<()> {
        if let Some(ts) = &self.timestamp {
            validate_timestamp(ts)?;
        }
        Ok(())
    }

    /// Sign with the ring's active key and render the marker.
    pub fn sign(self, keyring: &KeyRing) -> FenceResult<FenceSegment> {
        self.validate()?;
        let timestamp = self.timestamp.unwrap_or_else(current_timestamp);
        let (key_id, signature) = keyring.sign(
            &self.content,
            self.fence_type,
            self.rating,
            &self.source,
            &timestamp,
        )?;
        let xml = render_fence(
            &FenceHeader {
                fence_type: self.fence_type,
                rating: self.rating,
                source: &self.source,
                timestamp: &timestamp,
                signature: &signature,
                key_id: Some(key_id.as_str()),
            },
            &self.content,
        );

        tracing::debug!(
            fence_type = %self.fence_type,
            rating = %self.rating,
            source = %self.source,
            key_id = %key_id,
            "signed fence segment"
        );

        Ok(FenceSegment {
            content: self.content,
            fence_type: self.fence_type,
            rating: self.rating,
            source: self.source,
            timestamp,
            signature,
            key_id: Some(key_id),
            xml,
        })
    }
}

/// A signed, rendered segment of prompt text.
///
/// Only obtainable through [`SegmentDraft::sign`], so `xml` always matches
/// the other fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FenceSegment {
    content: String,
    fence_type: FenceType,
    rating: FenceRating,
    source: String,
    timestamp: String,
    signature: String,
    key_id: Option<String>,
    xml: String,
}

impl FenceSegment {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn fence_type(&self) -> FenceType {
        self.fence_type
    }

    pub fn rating(&self) -> FenceRating {
        self.rating
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Hex-encoded HMAC tag.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Id of the key that signed this segment.
    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// The rendered fence marker.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn is_trusted(&self) -> bool {
        self.rating == FenceRating::Trusted
    }

    pub fn is_untrusted(&self) -> bool {
        self.rating == FenceRating::Untrusted
    }

    /// Editable copy of the signed fields, keeping the original timestamp.
    pub fn to_draft(&self) -> SegmentDraft {
        SegmentDraft {
            content: self.content.clone(),
            fence_type: self.fence_type,
            rating: self.rating,
            source: self.source.clone(),
            timestamp: Some(self.timestamp.clone()),
        }
    }
}

impl fmt::Display for FenceSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.xml)
    }
}

impl AsRef<str> for FenceSegment {
    fn as_ref(&self) -> &str {
        &self.xml
    }
}

/// Fields recovered from a marker whose signature checked out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifiedFence {
    pub content: String,
    pub fence_type: FenceType,
    pub rating: FenceRating,
    pub source: String,
    pub timestamp: String,
    pub key_id: Option<String>,
}

impl VerifiedFence {
    pub fn is_trusted(&self) -> bool {
        self.rating == FenceRating::Trusted
    }

    pub fn is_untrusted(&self) -> bool {
        self.rating == FenceRating::Untrusted
    }
}

/// Outcome of verifying one candidate marker.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationResult {
    span: Range<usize>,
    outcome: Result<VerifiedFence, FenceError>,
}

impl VerificationResult {
    pub fn valid(span: Range<usize>, fence: VerifiedFence) -> Self {
        Self { span, outcome: Ok(fence) }
    }

    pub fn invalid(span: Range<usize>, error: FenceError) -> Self {
        Self { span, outcome: Err(error) }
    }

    /// True when the marker is intact and its signature verified.
    pub fn is_valid(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Byte range of the candidate marker within the scanned text.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }

    /// Verified fields, present only for valid results.
    pub fn fence(&self) -> Option<&VerifiedFence> {
        self.outcome.as_ref().ok()
    }

    /// Why the marker was rejected, present only for invalid results.
    pub fn error(&self) -> Option<&FenceError> {
        self.outcome.as_ref().err()
    }

    /// Shortcuts into [`fence`](Self::fence); `None` when invalid.
    pub fn content(&self) -> Option<&str> {
        self.fence().map(|f| f.content.as_str())
    }

    pub fn fence_type(&self) -> Option<FenceType> {
        self.fence().map(|f| f.fence_type)
    }

    pub fn rating(&self) -> Option<FenceRating> {
        self.fence().map(|f| f.rating)
    }

    pub fn source(&self) -> Option<&str> {
        self.fence().map(|f| f.source.as_str())
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.fence().map(|f| f.timestamp.as_str())
    }

    /// Consume into the verified fields or the rejection.
    pub fn into_result(self) -> FenceResult<VerifiedFence> {
        self.outcome
    }

    /// JSON object with `valid` and `span`, plus the fields or the error.
    pub fn to_json(&self) -> serde_json::Value {
        match &self.outcome {
            Ok(fence) => serde_json::json!({
                "valid": true,
                "span": [self.span.start, self.span.end],
                "content": fence.content,
                "fence_type": fence.fence_type,
                "rating": fence.rating,
                "source": fence.source,
                "timestamp": fence.timestamp,
                "key_id": fence.key_id,
            }),
            Err(e) => serde_json::json!({
                "valid": false,
                "span": [self.span.start, self.span.end],
                "error": e.to_string(),
            }),
        }
    }
}
