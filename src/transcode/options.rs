//! Transcoding configuration.
//!
//! [`MethodTranscodingOptions`] is the static description of how one RPC
//! method is reachable over HTTP. It can be built in code or deserialized from
//! the `google.api.HttpRule` JSON shape via [`HttpRule`]:
//!
//! ```
//! use grpc_wire::transcode::{HttpRule, MethodTranscodingOptions};
//!
//! let rule: HttpRule = serde_json::from_str(r#"{
//!     "selector": "pkg.Items/Update",
//!     "patch": "/v1/items/{item.id}",
//!     "body": "item",
//!     "additional_bindings": [{ "put": "/v1/items/{item.id}", "body": "*" }]
//! }"#).unwrap();
//!
//! let options = MethodTranscodingOptions::try_from(rule).unwrap();
//! assert_eq!(options.http_method, "PATCH");
//! assert_eq!(options.additional_bindings[0].body_field_path.as_deref(), Some("*"));
//! ```

use serde::{Deserialize, Serialize};

use super::template::HttpTemplate;
use crate::error::{GrpcWireError, Result};

/// One HTTP binding of an RPC method, plus any additional bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodTranscodingOptions {
    /// Full method name, `package.Service/Method`.
    pub selector: String,
    /// Upper-case HTTP method, or `*` for any.
    pub http_method: String,
    pub path_template: String,
    /// Where the HTTP body goes in the request: unset, `*`, or a dotted field path.
    pub body_field_path: Option<String>,
    /// Which response field becomes the HTTP body: unset, `*`, or a dotted field path.
    pub response_body_field_path: Option<String>,
    pub additional_bindings: Vec<MethodTranscodingOptions>,
}

impl MethodTranscodingOptions {
    /// Binding with an arbitrary HTTP method.
    pub fn custom(
        selector: impl Into<String>,
        http_method: impl Into<String>,
        path_template: impl Into<String>,
    ) -> Self {
        Self {
            selector: selector.into(),
            http_method: http_method.into().to_ascii_uppercase(),
            path_template: path_template.into(),
            body_field_path: None,
            response_body_field_path: None,
            additional_bindings: Vec::new(),
        }
    }

    pub fn get(selector: impl Into<String>, path_template: impl Into<String>) -> Self {
        Self::custom(selector, "GET", path_template)
    }

    pub fn post(selector: impl Into<String>, path_template: impl Into<String>) -> Self {
        Self::custom(selector, "POST", path_template)
    }

    pub fn put(selector: impl Into<String>, path_template: impl Into<String>) -> Self {
        Self::custom(selector, "PUT", path_template)
    }

    pub fn patch(selector: impl Into<String>, path_template: impl Into<String>) -> Self {
        Self::custom(selector, "PATCH", path_template)
    }

    pub fn delete(selector: impl Into<String>, path_template: impl Into<String>) -> Self {
        Self::custom(selector, "DELETE", path_template)
    }

    /// Map the HTTP body into the request.
    pub fn with_body(mut self, field_path: impl Into<String>) -> Self {
        self.body_field_path = Some(field_path.into());
        self
    }

    /// Send only this response field as the HTTP body.
    pub fn with_response_body(mut self, field_path: impl Into<String>) -> Self {
        self.response_body_field_path = Some(field_path.into());
        self
    }

    /// Add another (method, path) pair for the same RPC. The selector is
    /// inherited.
    pub fn with_additional_binding(mut self, mut binding: MethodTranscodingOptions) -> Self {
        binding.selector = self.selector.clone();
        binding.additional_bindings.clear();
        self.additional_bindings.push(binding);
        self
    }

    /// The primary binding followed by every additional binding.
    pub fn bindings(&self) -> impl Iterator<Item = &MethodTranscodingOptions> {
        std::iter::once(self).chain(self.additional_bindings.iter())
    }

    /// Method name without the service prefix.
    pub fn method_name(&self) -> &str {
        method_name(&self.selector)
    }
}

fn method_name(selector: &str) -> &str {
    selector
        .rsplit(|c: char| c == '/' || c == '.')
        .next()
        .unwrap_or(selector)
}

/// `google.api.HttpRule`, as found in service configuration JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HttpRule {
    pub selector: String,
    pub get: Option<String>,
    pub put: Option<String>,
    pub post: Option<String>,
    pub delete: Option<String>,
    pub patch: Option<String>,
    pub custom: Option<CustomHttpPattern>,
    pub body: String,
    pub response_body: String,
    pub additional_bindings: Vec<HttpRule>,
}

/// `google.api.CustomHttpPattern`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CustomHttpPattern {
    pub kind: String,
    pub path: String,
}

impl HttpRule {
    fn pattern(&self) -> Result<(String, String)> {
        let mut patterns = Vec::new();
        for (method, path) in [
            ("GET", &self.get),
            ("PUT", &self.put),
            ("POST", &self.post),
            ("DELETE", &self.delete),
            ("PATCH", &self.patch),
        ] {
            if let Some(path) = path {
                patterns.push((method.to_string(), path.clone()));
            }
        }
        if let Some(custom) = &self.custom {
            patterns.push((custom.kind.to_ascii_uppercase(), custom.path.clone()));
        }

        match patterns.len() {
            1 => Ok(patterns.remove(0)),
            0 => Err(GrpcWireError::Transcoding(format!(
                "HttpRule for {:?} has no pattern",
                self.selector
            ))),
            _ => Err(GrpcWireError::Transcoding(format!(
                "HttpRule for {:?} has more than one pattern",
                self.selector
            ))),
        }
    }

    fn to_binding(&self, selector: &str) -> Result<MethodTranscodingOptions> {
        let (http_method, path_template) = self.pattern()?;
        Ok(MethodTranscodingOptions {
            selector: selector.to_string(),
            http_method,
            path_template,
            body_field_path: non_empty(&self.body),
            response_body_field_path: non_empty(&self.response_body),
            additional_bindings: Vec::new(),
        })
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl TryFrom<HttpRule> for MethodTranscodingOptions {
    type Error = GrpcWireError;

    fn try_from(rule: HttpRule) -> Result<Self> {
        let mut options = rule.to_binding(&rule.selector)?;
        for additional in &rule.additional_bindings {
            if !additional.additional_bindings.is_empty() {
                return Err(GrpcWireError::Transcoding(format!(
                    "additional_bindings of {:?} may not nest",
                    rule.selector
                )));
            }
            options
                .additional_bindings
                .push(additional.to_binding(&rule.selector)?);
        }
        Ok(options)
    }
}

/// Minimal endpoint descriptor for one HTTP binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HttpEndpointSpec {
    /// `{Method}`, or `{Method}-{index}` when the method has several bindings.
    pub operation_id: String,
    pub selector: String,
    pub http_method: String,
    pub path_template: String,
    /// Dotted field paths bound from the path.
    pub path_params: Vec<String>,
    pub body_field_path: Option<String>,
    pub response_body_field_path: Option<String>,
}

/// Describe every binding of `options`.
///
/// # Errors
///
/// Returns an error if any binding's template does not compile.
pub fn endpoint_specs(options: &MethodTranscodingOptions) -> Result<Vec<HttpEndpointSpec>> {
    let bindings: Vec<_> = options.bindings().collect();
    let several = bindings.len() > 1;

    bindings
        .into_iter()
        .enumerate()
        .map(|(index, binding)| {
            let template = HttpTemplate::parse(&binding.path_template)?;
            let operation_id = if several {
                format!("{}-{}", options.method_name(), index)
            } else {
                options.method_name().to_string()
            };
            Ok(HttpEndpointSpec {
                operation_id,
                selector: options.selector.clone(),
                http_method: binding.http_method.clone(),
                path_template: binding.path_template.clone(),
                path_params: template.field_names(),
                body_field_path: binding.body_field_path.clone(),
                response_body_field_path: binding.response_body_field_path.clone(),
            })
        })
        .collect()
}
