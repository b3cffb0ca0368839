//! HTTP/JSON route table and error responses for transcoded calls.

use bytes::Bytes;
use http::Method;
use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::{GrpcWireError, Result};
use crate::handler::{MethodKey, MethodType, ServiceRegistry};
use crate::protocol::WireFormat;
use crate::status::{Code, GrpcStatus};
use crate::transcode::{
    endpoint_specs, HttpEndpointSpec, MethodTranscodingOptions, PathMatch, PathMatcher,
    PathMatcherBuilder,
};

/// Frozen routes of every transcodable method.
#[derive(Debug)]
pub(crate) struct TranscodingRoutes {
    matcher: PathMatcher<MethodKey>,
    endpoints: Vec<HttpEndpointSpec>,
}

impl TranscodingRoutes {
    /// Compile `options` against the methods in `registry`.
    ///
    /// Every selector must name a registered unary JSON method.
    pub(crate) fn build(
        options: &[MethodTranscodingOptions],
        registry: &ServiceRegistry,
        config: &ServerConfig,
    ) -> Result<Self> {
        let mut builder = PathMatcherBuilder::new()
            .match_unregistered_custom_verb(config.match_unregistered_custom_verb)
            .query_param_unescape_plus(config.query_param_unescape_plus);
        let system: Vec<&str> = config.system_query_params.iter().map(String::as_str).collect();
        let mut endpoints = Vec::new();

        for rule in options {
            let key = MethodKey::from_selector(&rule.selector, WireFormat::Json).ok_or_else(|| {
                GrpcWireError::InvalidTemplate(format!("invalid selector {:?}", rule.selector))
            })?;
            let Some(entry) = registry.get(&key) else {
                return Err(GrpcWireError::HandlerNotFound(key.to_string()));
            };
            if entry.method.method_type() != MethodType::Unary {
                return Err(GrpcWireError::InvalidTemplate(format!(
                    "{} is not unary and cannot be transcoded",
                    key
                )));
            }

            builder.register(rule, &system, key)?;
            endpoints.extend(endpoint_specs(rule)?);
        }

        Ok(Self {
            matcher: builder.build(),
            endpoints,
        })
    }

    pub(crate) fn lookup(&self, method: &Method, path_and_query: &str) -> Option<PathMatch<MethodKey>> {
        self.matcher.lookup(method, path_and_query)
    }

    pub(crate) fn endpoints(&self) -> &[HttpEndpointSpec] {
        &self.endpoints
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: i32,
    message: &'a str,
    details: Vec<serde_json::Value>,
}

/// JSON body of a failed transcoded call.
pub(crate) fn error_body(status: &GrpcStatus) -> Bytes {
    let body = ErrorBody {
        code: status.code().value(),
        message: status.message().unwrap_or_default(),
        details: Vec::new(),
    };
    Bytes::from(serde_json::to_vec(&body).unwrap_or_default())
}

/// Status for a failure of the HTTP/JSON layer itself.
///
/// Malformed JSON and unresolvable body paths are the caller's fault here,
/// so they answer 400 rather than 500.
pub(crate) fn transcoding_error_status(error: &GrpcWireError) -> GrpcStatus {
    match error {
        GrpcWireError::Transcoding(message) => {
            GrpcStatus::new(Code::InvalidArgument).with_message(message.clone())
        }
        GrpcWireError::Json(e) => GrpcStatus::new(Code::InvalidArgument).with_message(e.to_string()),
        other => other.to_status(),
    }
}
