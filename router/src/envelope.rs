// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Envelope
//!
//! The `Envelope` is the only value that crosses the boundary between adapters, middleware and
//! handlers. Adapters build one from a wire request, the pipeline mutates it in place, a
//! handler answers with another one, and the adapter turns that answer back into a wire
//! response.
//!
//! A request envelope carries its payload in `body`; a response envelope carries it in `data`.
//! Failure is signalled by `error_message` being set, whatever the `status_code` says.
//!

use crate::trace::TraceContext;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::collections::HashMap;

/// Default status code of a freshly built envelope.
pub const DEFAULT_STATUS: u16 = 200;

/// A query parameter value. Repeated keys collapse into `Multi`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Multi(Vec<String>),
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Single(value.to_owned())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Single(value)
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(values: Vec<String>) -> Self {
        QueryValue::Multi(values)
    }
}

/// Canonical protocol-neutral request/response value.
///
/// `path` and `method` identify the logical route (an HTTP path, a gRPC `/Service/Method`,
/// an MCP method name...). `metadata` is a free-form sidecar: it is passed through and
/// enriched but never consulted for handler selection.
///
/// `trace_id` and `span_id` are either both present or both absent; use [`Envelope::set_trace`]
/// to keep them paired.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Envelope {
    pub path: String,
    pub method: Option<String>,
    pub headers: HashMap<String, String>,
    pub query_params: HashMap<String, QueryValue>,
    pub path_params: HashMap<String, String>,
    pub body: Option<Value>,
    pub data: Option<Value>,
    pub status_code: u16,
    pub error_message: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub parent_span_id: Option<String>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            path: String::new(),
            method: None,
            headers: HashMap::new(),
            query_params: HashMap::new(),
            path_params: HashMap::new(),
            body: None,
            data: None,
            status_code: DEFAULT_STATUS,
            error_message: None,
            metadata: HashMap::new(),
            trace_id: None,
            span_id: None,
            parent_span_id: None,
        }
    }
}

impl Envelope {
    /// Creates a request envelope for the given logical path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Creates a successful response carrying `data` with status 200.
    pub fn success(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    /// Creates a failed response.
    pub fn error(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(
        mut self,
        name: impl Into<String>,
        value: impl Into<QueryValue>,
    ) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    pub fn with_path_param(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Makes this envelope the response to `request`.
    ///
    /// Copies the route identity, and the request's trace identity when this envelope has
    /// none of its own.
    pub fn respond_to(mut self, request: &Envelope) -> Self {
        self.path = request.path.clone();
        self.method = request.method.clone();
        if self.trace().is_none() {
            if let Some(trace) = request.trace() {
                self.set_trace(trace);
            }
        }
        self
    }

    /// True when the envelope signals a failure.
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }

    /// Header lookup ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// String value of a metadata entry, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// The trace identity, present only when both ids are set.
    pub fn trace(&self) -> Option<TraceContext> {
        match (&self.trace_id, &self.span_id) {
            (Some(trace_id), Some(span_id)) => Some(TraceContext {
                trace_id: trace_id.clone(),
                span_id: span_id.clone(),
                parent_span_id: self.parent_span_id.clone(),
            }),
            _ => None,
        }
    }

    pub fn set_trace(&mut self, trace: TraceContext) {
        self.trace_id = Some(trace.trace_id);
        self.span_id = Some(trace.span_id);
        self.parent_span_id = trace.parent_span_id;
    }
}
