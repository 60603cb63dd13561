// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # W3C trace propagation
//!
//! Parsing and formatting of the `traceparent` header, plus the two middleware stages that
//! carry trace identity through a pipeline:
//!
//! - [`TraceExtractionMiddleware`] reads the inbound identity from the `traceparent` header,
//!   falling back to `trace_id`/`span_id`/`parent_span_id` metadata entries.
//! - [`TraceInjectionMiddleware`] decorates the response with a `traceparent` header and
//!   mirrors the ids into metadata for transports without free-form headers.
//!
//! Wire format: `{version:2hex}-{trace_id:32hex}-{span_id:16hex}-{flags:2hex}`. Version
//! `00` and flags `01` are emitted; any version is accepted on receipt.
//!

use crate::{
    Envelope, Error,
    pipeline::{Middleware, Next, PipelineContext},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Header carrying the trace identity.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Only version this implementation emits.
pub const TRACEPARENT_VERSION: &str = "00";
/// Flags emitted on every formatted header (sampled).
pub const TRACEPARENT_FLAGS: &str = "01";

pub const TRACE_ID_KEY: &str = "trace_id";
pub const SPAN_ID_KEY: &str = "span_id";
pub const PARENT_SPAN_ID_KEY: &str = "parent_span_id";

/// Trace identity of an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
}

impl TraceContext {
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
        }
    }

    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }
}

/// Parses a `traceparent` header.
///
/// The header must have exactly four `-`-separated fields. A version other than `00` is
/// accepted with a warning. The parent span id is never set from a single header.
pub fn parse_traceparent(header: &str) -> Result<TraceContext, Error> {
    let fields: Vec<&str> = header.trim().split('-').collect();
    let [version, trace_id, span_id, _flags] = fields.as_slice() else {
        return Err(Error::Traceparent(format!(
            "expected 4 fields, got {} in '{}'",
            fields.len(),
            header
        )));
    };
    if *version != TRACEPARENT_VERSION {
        warn!("Unsupported traceparent version '{}', parsing anyway.", version);
    }
    Ok(TraceContext::new(*trace_id, *span_id))
}

/// Formats a `traceparent` header. The parent span id is not part of the wire format.
pub fn format_traceparent(
    trace_id: &str,
    span_id: &str,
    _parent_span_id: Option<&str>,
) -> String {
    format!(
        "{}-{}-{}-{}",
        TRACEPARENT_VERSION, trace_id, span_id, TRACEPARENT_FLAGS
    )
}

/// Applies the inbound trace identity of an envelope to its trace fields.
///
/// The header wins over metadata. A malformed header is logged and leaves the fields as they
/// were; it never fails the request.
pub fn extract_trace(envelope: &mut Envelope) {
    if let Some(header) = envelope.header(TRACEPARENT_HEADER) {
        match parse_traceparent(header) {
            Ok(trace) => {
                debug!("Extracted trace {} from header.", trace.trace_id);
                envelope.set_trace(trace);
            }
            Err(e) => warn!("Ignoring traceparent header: {}", e),
        }
        return;
    }

    let trace_id = envelope.metadata_str(TRACE_ID_KEY).map(str::to_owned);
    let span_id = envelope.metadata_str(SPAN_ID_KEY).map(str::to_owned);
    let parent = envelope.metadata_str(PARENT_SPAN_ID_KEY).map(str::to_owned);
    if let (Some(trace_id), Some(span_id)) = (trace_id, span_id) {
        debug!("Extracted trace {} from metadata.", trace_id);
        envelope.set_trace(TraceContext {
            trace_id,
            span_id,
            parent_span_id: parent,
        });
    }
}

/// Writes the envelope's trace identity into its headers and metadata. No-op without one.
pub fn inject_trace(envelope: &mut Envelope) {
    let Some(trace) = envelope.trace() else {
        return;
    };
    envelope.headers.insert(
        TRACEPARENT_HEADER.to_owned(),
        format_traceparent(
            &trace.trace_id,
            &trace.span_id,
            trace.parent_span_id.as_deref(),
        ),
    );
    envelope
        .metadata
        .insert(TRACE_ID_KEY.to_owned(), Value::String(trace.trace_id));
    envelope
        .metadata
        .insert(SPAN_ID_KEY.to_owned(), Value::String(trace.span_id));
    if let Some(parent) = trace.parent_span_id {
        envelope
            .metadata
            .insert(PARENT_SPAN_ID_KEY.to_owned(), Value::String(parent));
    }
}

/// Inbound stage: sets trace fields from the request before the rest of the chain runs.
#[derive(Debug, Default)]
pub struct TraceExtractionMiddleware;

#[async_trait]
impl Middleware for TraceExtractionMiddleware {
    fn name(&self) -> &str {
        "trace_extraction"
    }

    async fn process(
        &self,
        mut ctx: PipelineContext,
        next: Next<'_>,
    ) -> Result<PipelineContext, Error> {
        extract_trace(&mut ctx.envelope);
        next.run(ctx).await
    }
}

/// Outbound stage: decorates the resulting envelope once the rest of the chain returned.
#[derive(Debug, Default)]
pub struct TraceInjectionMiddleware;

#[async_trait]
impl Middleware for TraceInjectionMiddleware {
    fn name(&self) -> &str {
        "trace_injection"
    }

    async fn process(
        &self,
        ctx: PipelineContext,
        next: Next<'_>,
    ) -> Result<PipelineContext, Error> {
        let mut ctx = next.run(ctx).await?;
        inject_trace(&mut ctx.envelope);
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use serde_json::json;
    use tracing_test::traced_test;

    const HEADER: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_traceparent() {
        let trace = parse_traceparent(HEADER).unwrap();
        assert_eq!(trace.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(trace.span_id, "00f067aa0ba902b7");
        assert!(trace.parent_span_id.is_none());
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(matches!(
            parse_traceparent("00-abc-01"),
            Err(Error::Traceparent(_))
        ));
        assert!(parse_traceparent("00-a-b-c-d").is_err());
        assert!(parse_traceparent("").is_err());
    }

    #[test]
    #[traced_test]
    fn test_parse_accepts_future_version() {
        let trace = parse_traceparent(
            "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00",
        )
        .unwrap();
        assert_eq!(trace.span_id, "00f067aa0ba902b7");
        assert!(logs_contain("Unsupported traceparent version"));
    }

    #[test]
    fn test_format_round_trip() {
        let header = format_traceparent(
            "4bf92f3577b34da6a3ce929d0e0e4736",
            "00f067aa0ba902b7",
            Some("b7ad6b7169203331"),
        );
        assert_eq!(header, HEADER);
        let trace = parse_traceparent(&header).unwrap();
        assert_eq!(trace.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(trace.span_id, "00f067aa0ba902b7");
    }

    #[test]
    fn test_extract_header_wins_over_metadata() {
        let mut envelope = Envelope::new("/x")
            .with_header(TRACEPARENT_HEADER, HEADER)
            .with_metadata(TRACE_ID_KEY, json!("f".repeat(32)))
            .with_metadata(SPAN_ID_KEY, json!("e".repeat(16)));
        extract_trace(&mut envelope);
        assert_eq!(
            envelope.trace_id.as_deref(),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
    }

    #[test]
    fn test_extract_from_metadata() {
        let mut envelope = Envelope::new("/x")
            .with_metadata(TRACE_ID_KEY, json!("f".repeat(32)))
            .with_metadata(SPAN_ID_KEY, json!("e".repeat(16)))
            .with_metadata(PARENT_SPAN_ID_KEY, json!("d".repeat(16)));
        extract_trace(&mut envelope);
        assert_eq!(envelope.trace_id, Some("f".repeat(32)));
        assert_eq!(envelope.span_id, Some("e".repeat(16)));
        assert_eq!(envelope.parent_span_id, Some("d".repeat(16)));
    }

    #[test]
    #[traced_test]
    fn test_extract_malformed_header_is_ignored() {
        let mut envelope =
            Envelope::new("/x").with_header(TRACEPARENT_HEADER, "garbage");
        extract_trace(&mut envelope);
        assert!(envelope.trace().is_none());
        assert!(logs_contain("Ignoring traceparent header"));
    }

    #[test]
    fn test_inject_requires_both_ids() {
        let mut envelope = Envelope::success(json!(null));
        envelope.trace_id = Some("a".repeat(32));
        inject_trace(&mut envelope);
        assert!(envelope.headers.is_empty());
        assert!(envelope.metadata.is_empty());
    }

    #[test]
    fn test_inject_writes_header_and_metadata() {
        let mut envelope = Envelope::success(json!(null));
        envelope.set_trace(
            TraceContext::new("4bf92f3577b34da6a3ce929d0e0e4736", "00f067aa0ba902b7")
                .with_parent("b7ad6b7169203331"),
        );
        inject_trace(&mut envelope);
        assert_eq!(envelope.header(TRACEPARENT_HEADER), Some(HEADER));
        assert_eq!(
            envelope.metadata_str(PARENT_SPAN_ID_KEY),
            Some("b7ad6b7169203331")
        );
        assert_eq!(
            envelope.metadata_str(TRACE_ID_KEY),
            Some("4bf92f3577b34da6a3ce929d0e0e4736")
        );
    }
}
