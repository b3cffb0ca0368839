//! HTTP/JSON to RPC transcoding.
//!
//! Provides:
//! - [`HttpTemplate`] - the path template compiler
//! - [`PathMatcherBuilder`] / [`PathMatcher`] - the route trie and its frozen snapshot
//! - [`weave_request`] / [`weave_response`] - JSON message weaving
//! - [`MethodTranscodingOptions`] / [`HttpRule`] - per-method HTTP bindings
//!
//! A transcoded request flows: matcher lookup → `weave_request` → JSON
//! handler → `weave_response` → HTTP response.

mod matcher;
mod options;
mod template;
mod weaver;

pub use matcher::{
    HttpVariableBinding, PathMatch, PathMatcher, PathMatcherBuilder, HTTP_METHOD_WILDCARD,
};
pub use options::{
    endpoint_specs, CustomHttpPattern, HttpEndpointSpec, HttpRule, MethodTranscodingOptions,
};
pub use template::{HttpTemplate, Segment, TemplateVariable};
pub use weaver::{weave_request, weave_response, WHOLE_MESSAGE};
