//! W3C trace-context identifiers carried by the ambient context.
//!
//! A [`TraceContext`] names the distributed trace a unit of work belongs to
//! and the span it is currently executing in. Inbound adapters build one from
//! the `traceparent` header; outbound adapters derive a child and serialise it
//! back onto downstream requests.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use thiserror::Error;

/// Header carrying the W3C `traceparent` value.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Header carrying vendor-specific W3C `tracestate` entries.
pub const TRACESTATE_HEADER: &str = "tracestate";
/// Response header echoing the active trace identifier back to callers.
pub const TRACE_ID_HEADER: &str = "trace-id";

const TRACEPARENT_VERSION: &str = "00";
const FLAG_SAMPLED: u8 = 0x01;

/// Errors raised while parsing a `traceparent` header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceParentError {
    /// The header does not have four dash-separated fields.
    #[error("traceparent must have four dash-separated fields")]
    Malformed,
    /// Only version `00` is understood.
    #[error("unsupported traceparent version {version}")]
    UnsupportedVersion { version: String },
    /// The trace identifier is not 32 hex digits or is all zeroes.
    #[error("invalid trace identifier")]
    InvalidTraceId,
    /// The span identifier is not 16 hex digits or is all zeroes.
    #[error("invalid span identifier")]
    InvalidSpanId,
    /// The flags field is not two hex digits.
    #[error("invalid trace flags")]
    InvalidFlags,
}

/// 16-byte distributed trace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId([u8; 16]);

impl TraceId {
    /// Generate a random, non-zero trace identifier.
    pub fn generate() -> Self {
        Self(random_non_zero())
    }

    /// Borrow the raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for TraceId {
    type Err = TraceParentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_non_zero(s)
            .map(Self)
            .ok_or(TraceParentError::InvalidTraceId)
    }
}

/// 8-byte span identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId([u8; 8]);

impl SpanId {
    /// Generate a random, non-zero span identifier.
    pub fn generate() -> Self {
        Self(random_non_zero())
    }

    /// Borrow the raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for SpanId {
    type Err = TraceParentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_non_zero(s)
            .map(Self)
            .ok_or(TraceParentError::InvalidSpanId)
    }
}

fn random_non_zero<const N: usize>() -> [u8; N] {
    let mut rng = rand::thread_rng();
    loop {
        let mut bytes = [0_u8; N];
        rng.fill_bytes(&mut bytes);
        if bytes.iter().any(|byte| *byte != 0) {
            return bytes;
        }
    }
}

fn decode_non_zero<const N: usize>(value: &str) -> Option<[u8; N]> {
    let mut bytes = [0_u8; N];
    hex::decode_to_slice(value, &mut bytes).ok()?;
    bytes.iter().any(|byte| *byte != 0).then_some(bytes)
}

/// Trace identity of the work currently executing.
///
/// # Examples
/// ```
/// use execution_bridge::domain::TraceContext;
///
/// let parent = TraceContext::root();
/// let child = parent.child();
/// assert_eq!(parent.trace_id(), child.trace_id());
/// assert_ne!(parent.span_id(), child.span_id());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    sampled: bool,
    trace_state: Option<String>,
}

impl TraceContext {
    /// Start a new sampled trace.
    pub fn root() -> Self {
        Self {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            sampled: true,
            trace_state: None,
        }
    }

    /// Derive a child span in the same trace.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::generate(),
            sampled: self.sampled,
            trace_state: self.trace_state.clone(),
        }
    }

    /// Attach vendor `tracestate` entries.
    pub fn with_trace_state(mut self, trace_state: impl Into<String>) -> Self {
        let trace_state = trace_state.into();
        self.trace_state = (!trace_state.trim().is_empty()).then_some(trace_state);
        self
    }

    /// Identifier shared by every span in the trace.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Identifier of the current span.
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Whether upstream asked for this trace to be recorded.
    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    /// Vendor `tracestate` entries, if any.
    pub fn trace_state(&self) -> Option<&str> {
        self.trace_state.as_deref()
    }

    /// Render the `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { FLAG_SAMPLED } else { 0 };
        format!(
            "{TRACEPARENT_VERSION}-{}-{}-{flags:02x}",
            self.trace_id, self.span_id
        )
    }

    /// Parse a `traceparent` header value.
    ///
    /// # Errors
    ///
    /// Returns [`TraceParentError`] when the value is not a version `00`
    /// header with non-zero identifiers.
    pub fn from_traceparent(value: &str) -> Result<Self, TraceParentError> {
        let fields: Vec<&str> = value.trim().split('-').collect();
        let [version, trace_id, span_id, flags] = fields.as_slice() else {
            return Err(TraceParentError::Malformed);
        };
        if *version != TRACEPARENT_VERSION {
            return Err(TraceParentError::UnsupportedVersion {
                version: (*version).to_owned(),
            });
        }
        let trace_id = trace_id.parse::<TraceId>()?;
        let span_id = span_id.parse::<SpanId>()?;
        let [flags] = decode_flags(flags).ok_or(TraceParentError::InvalidFlags)?;
        Ok(Self {
            trace_id,
            span_id,
            sampled: flags & FLAG_SAMPLED == FLAG_SAMPLED,
            trace_state: None,
        })
    }
}

fn decode_flags(value: &str) -> Option<[u8; 1]> {
    let mut bytes = [0_u8; 1];
    hex::decode_to_slice(value, &mut bytes).ok()?;
    Some(bytes)
}

#[cfg(test)]
mod tests {
    //! Regression coverage for this module.
    use super::*;
    use rstest::rstest;

    const SAMPLE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[rstest]
    fn parses_a_sampled_traceparent() {
        let ctx = TraceContext::from_traceparent(SAMPLE).expect("valid header");
        assert_eq!(
            ctx.trace_id().to_string(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_eq!(ctx.span_id().to_string(), "00f067aa0ba902b7");
        assert!(ctx.is_sampled());
        assert_eq!(ctx.to_traceparent(), SAMPLE);
    }

    #[rstest]
    fn unsampled_flag_is_preserved() {
        let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00";
        let ctx = TraceContext::from_traceparent(header).expect("valid header");
        assert!(!ctx.is_sampled());
        assert!(ctx.to_traceparent().ends_with("-00"));
    }

    #[rstest]
    #[case("", TraceParentError::Malformed)]
    #[case("00-abc", TraceParentError::Malformed)]
    #[case(
        "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        TraceParentError::UnsupportedVersion { version: "01".to_owned() }
    )]
    #[case(
        "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
        TraceParentError::InvalidTraceId
    )]
    #[case(
        "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
        TraceParentError::InvalidSpanId
    )]
    #[case(
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-zz",
        TraceParentError::InvalidFlags
    )]
    fn rejects_invalid_headers(#[case] header: &str, #[case] expected: TraceParentError) {
        assert_eq!(TraceContext::from_traceparent(header), Err(expected));
    }

    #[rstest]
    fn child_keeps_trace_and_state() {
        let parent = TraceContext::root().with_trace_state("vendor=abc");
        let child = parent.child();
        assert_eq!(child.trace_id(), parent.trace_id());
        assert_ne!(child.span_id(), parent.span_id());
        assert_eq!(child.trace_state(), Some("vendor=abc"));
    }

    #[rstest]
    fn blank_trace_state_is_dropped() {
        let ctx = TraceContext::root().with_trace_state("   ");
        assert!(ctx.trace_state().is_none());
    }
}
