//! Trie-based HTTP path matcher.
//!
//! Construction and lookup are two types: a mutable [`PathMatcherBuilder`]
//! into which templates are registered, and an immutable [`PathMatcher`]
//! produced by [`PathMatcherBuilder::build`] (or a deep copy via
//! [`PathMatcherBuilder::snapshot`]). The served matcher has no mutation
//! methods, so it can be shared across concurrent calls behind an `Arc`.
//!
//! Lookup rules:
//! - a literal child is preferred for each concrete segment;
//! - a node reached through `**` may consume further segments itself;
//! - otherwise the parameter, wildcard and multi-wildcard edges are tried in
//!   that order;
//! - at the end of the path the node's own result is used, falling back to
//!   its `**` child (so `/a` matches `/a/**`);
//! - a result registered more than once is ambiguous and never matches.
//!
//! # Example
//!
//! ```
//! use grpc_wire::transcode::{MethodTranscodingOptions, PathMatcherBuilder};
//! use http::Method;
//!
//! let mut builder = PathMatcherBuilder::new();
//! let options = MethodTranscodingOptions::get("pkg.Items/Get", "/v1/items/{id}");
//! builder.register(&options, &[], "pkg.Items/Get").unwrap();
//!
//! let matcher = builder.build();
//! let found = matcher.lookup(&Method::GET, "/v1/items/42?filter=x").unwrap();
//! assert_eq!(found.method, "pkg.Items/Get");
//! assert_eq!(found.bindings.len(), 2);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use http::Method;

use super::options::MethodTranscodingOptions;
use super::template::{HttpTemplate, Segment, TemplateVariable};
use crate::error::{GrpcWireError, Result};
use crate::percent::{unescape, UnescapeSpec};

/// Registered HTTP method that matches any request method.
pub const HTTP_METHOD_WILDCARD: &str = "*";

/// One resolved value destined for one field of the request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpVariableBinding {
    pub field_path: Vec<String>,
    pub value: String,
}

impl HttpVariableBinding {
    pub fn new(field_path: Vec<String>, value: impl Into<String>) -> Self {
        Self {
            field_path,
            value: value.into(),
        }
    }
}

/// A successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch<M> {
    pub method: M,
    pub bindings: Vec<HttpVariableBinding>,
    pub body_field_path: Option<String>,
    pub response_body_field_path: Option<String>,
}

#[derive(Debug)]
struct MethodData<M> {
    method: M,
    variables: Vec<TemplateVariable>,
    body_field_path: Option<String>,
    response_body_field_path: Option<String>,
    system_query_params: HashSet<String>,
}

#[derive(Debug)]
struct MethodEntry<M> {
    data: Arc<MethodData<M>>,
    multiple: bool,
}

impl<M> Clone for MethodEntry<M> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            multiple: self.multiple,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResultKey {
    http_method: String,
    verb: String,
}

#[derive(Debug)]
struct Node<M> {
    children: HashMap<Segment, Node<M>>,
    results: HashMap<ResultKey, MethodEntry<M>>,
    wildcard: bool,
}

impl<M> Clone for Node<M> {
    fn clone(&self) -> Self {
        Self {
            children: self.children.clone(),
            results: self.results.clone(),
            wildcard: self.wildcard,
        }
    }
}

impl<M> Node<M> {
    fn new() -> Self {
        Self {
            children: HashMap::new(),
            results: HashMap::new(),
            wildcard: false,
        }
    }

    /// Insert `data` under `path`. A duplicate key marks the existing entry
    /// ambiguous and fails.
    fn insert(&mut self, path: &[Segment], key: ResultKey, data: Arc<MethodData<M>>) -> bool {
        let mut node = self;
        for segment in path {
            node = node
                .children
                .entry(segment.clone())
                .or_insert_with(Node::new);
            if *segment == Segment::MultiWildcard {
                node.wildcard = true;
            }
        }

        match node.results.get_mut(&key) {
            Some(existing) => {
                existing.multiple = true;
                false
            }
            None => {
                node.results.insert(
                    key,
                    MethodEntry {
                        data,
                        multiple: false,
                    },
                );
                true
            }
        }
    }

    fn result_for(&self, http_method: &str, verb: &str) -> Option<&MethodEntry<M>> {
        let key = ResultKey {
            http_method: http_method.to_string(),
            verb: verb.to_string(),
        };
        self.results.get(&key).or_else(|| {
            self.results.get(&ResultKey {
                http_method: HTTP_METHOD_WILDCARD.to_string(),
                verb: key.verb,
            })
        })
    }

    fn lookup(&self, parts: &[String], http_method: &str, verb: &str) -> Option<&MethodEntry<M>> {
        let Some((current, rest)) = parts.split_first() else {
            return self.result_for(http_method, verb).or_else(|| {
                self.children
                    .get(&Segment::MultiWildcard)
                    .and_then(|child| child.result_for(http_method, verb))
            });
        };

        if let Some(found) = self
            .children
            .get(&Segment::Literal(current.clone()))
            .and_then(|child| child.lookup(rest, http_method, verb))
        {
            return Some(found);
        }

        if self.wildcard {
            return self.lookup(rest, http_method, verb);
        }

        [Segment::Parameter, Segment::Wildcard, Segment::MultiWildcard]
            .iter()
            .find_map(|edge| {
                self.children
                    .get(edge)
                    .and_then(|child| child.lookup(rest, http_method, verb))
            })
    }
}

/// Lookup behavior switches.
#[derive(Debug, Clone, Copy, Default)]
struct MatcherOptions {
    match_unregistered_custom_verb: bool,
    query_param_unescape_plus: bool,
}

/// Mutable trie under construction.
#[derive(Debug)]
pub struct PathMatcherBuilder<M> {
    root: Node<M>,
    custom_verbs: HashSet<String>,
    options: MatcherOptions,
}

impl<M> Clone for PathMatcherBuilder<M> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            custom_verbs: self.custom_verbs.clone(),
            options: self.options,
        }
    }
}

impl<M: Clone> PathMatcherBuilder<M> {
    pub fn new() -> Self {
        Self {
            root: Node::new(),
            custom_verbs: HashSet::new(),
            options: MatcherOptions::default(),
        }
    }

    /// Strip a trailing `:verb` even when no template registered that verb.
    pub fn match_unregistered_custom_verb(mut self, enabled: bool) -> Self {
        self.options.match_unregistered_custom_verb = enabled;
        self
    }

    /// Decode `+` as a space in query parameter values.
    pub fn query_param_unescape_plus(mut self, enabled: bool) -> Self {
        self.options.query_param_unescape_plus = enabled;
        self
    }

    /// Register a method's primary binding and every additional binding.
    ///
    /// Registration stops at the first binding that fails. Bindings inserted
    /// before the failure stay registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a template does not compile or duplicates an
    /// existing (HTTP method, path, verb) entry.
    pub fn register(
        &mut self,
        options: &MethodTranscodingOptions,
        system_query_params: &[&str],
        method: M,
    ) -> Result<()> {
        let system: HashSet<String> = system_query_params.iter().map(|s| s.to_string()).collect();
        for binding in options.bindings() {
            self.register_binding(binding, &system, method.clone())?;
        }
        Ok(())
    }

    fn register_binding(
        &mut self,
        binding: &MethodTranscodingOptions,
        system_query_params: &HashSet<String>,
        method: M,
    ) -> Result<()> {
        let template = HttpTemplate::parse(&binding.path_template)?;
        let key = ResultKey {
            http_method: binding.http_method.to_ascii_uppercase(),
            verb: template.verb().unwrap_or_default().to_string(),
        };
        let data = Arc::new(MethodData {
            method,
            variables: template.variables().to_vec(),
            body_field_path: binding.body_field_path.clone(),
            response_body_field_path: binding.response_body_field_path.clone(),
            system_query_params: system_query_params.clone(),
        });

        if !self.root.insert(template.segments(), key, data) {
            return Err(GrpcWireError::InvalidTemplate(format!(
                "duplicate binding {} {} for {}",
                binding.http_method, binding.path_template, binding.selector
            )));
        }
        if let Some(verb) = template.verb() {
            self.custom_verbs.insert(verb.to_string());
        }
        Ok(())
    }

    /// Register a verb so lookups strip it even without a template using it.
    pub fn add_custom_verb(&mut self, verb: impl Into<String>) {
        self.custom_verbs.insert(verb.into());
    }

    /// Deep copy of the current trie, leaving the builder usable.
    pub fn snapshot(&self) -> PathMatcher<M> {
        self.clone().build()
    }

    /// Freeze the trie.
    pub fn build(self) -> PathMatcher<M> {
        PathMatcher {
            root: self.root,
            custom_verbs: self.custom_verbs,
            options: self.options,
        }
    }
}

impl<M: Clone> Default for PathMatcherBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable trie used to serve lookups.
#[derive(Debug)]
pub struct PathMatcher<M> {
    root: Node<M>,
    custom_verbs: HashSet<String>,
    options: MatcherOptions,
}

impl<M: Clone> PathMatcher<M> {
    /// Resolve a request target (`path?query`).
    pub fn lookup(&self, http_method: &Method, path_and_query: &str) -> Option<PathMatch<M>> {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };
        self.lookup_path(http_method, path, query)
    }

    /// Resolve a path with an already separated query string.
    pub fn lookup_path(
        &self,
        http_method: &Method,
        path: &str,
        query: Option<&str>,
    ) -> Option<PathMatch<M>> {
        let (parts, verb) = self.split_request_path(path);
        let entry = self.root.lookup(&parts, http_method.as_str(), &verb)?;

        if entry.multiple {
            tracing::warn!(
                "Ambiguous transcoding route for {} {}; treating as unmatched",
                http_method,
                path
            );
            return None;
        }

        let data = &entry.data;
        let mut bindings = extract_path_bindings(&data.variables, &parts);
        if let Some(query) = query {
            extract_query_bindings(
                query,
                &data.system_query_params,
                self.options.query_param_unescape_plus,
                &mut bindings,
            );
        }

        Some(PathMatch {
            method: data.method.clone(),
            bindings,
            body_field_path: data.body_field_path.clone(),
            response_body_field_path: data.response_body_field_path.clone(),
        })
    }

    /// Split a path into segments and an optional custom verb.
    fn split_request_path(&self, path: &str) -> (Vec<String>, String) {
        let mut path = path;
        let mut verb = String::new();

        if let Some(colon) = path.rfind(':') {
            let after_slash = path.rfind('/').map_or(true, |slash| colon > slash);
            let candidate = &path[colon + 1..];
            if after_slash
                && (self.options.match_unregistered_custom_verb
                    || self.custom_verbs.contains(candidate))
            {
                verb = candidate.to_string();
                path = &path[..colon];
            }
        }

        let mut parts: Vec<String> = match path.strip_prefix('/') {
            Some(rest) => rest.split('/').map(str::to_string).collect(),
            None if path.is_empty() => Vec::new(),
            None => path.split('/').map(str::to_string).collect(),
        };
        while parts.last().is_some_and(|part| part.is_empty()) {
            parts.pop();
        }
        (parts, verb)
    }
}

fn extract_path_bindings(variables: &[TemplateVariable], parts: &[String]) -> Vec<HttpVariableBinding> {
    let mut bindings = Vec::with_capacity(variables.len());
    for var in variables {
        let end = var.resolved_end(parts.len()).min(parts.len());
        let start = var.start_segment.min(end);
        let multipart = end - start > 1 || var.wildcard;
        let spec = if multipart {
            UnescapeSpec::AllCharactersExceptReserved
        } else {
            UnescapeSpec::AllCharacters
        };

        let value = parts[start..end]
            .iter()
            .map(|part| unescape(part, spec, false))
            .collect::<Vec<_>>()
            .join("/");
        bindings.push(HttpVariableBinding::new(var.field_path.clone(), value));
    }
    bindings
}

fn extract_query_bindings(
    query: &str,
    system_query_params: &HashSet<String>,
    unescape_plus: bool,
    bindings: &mut Vec<HttpVariableBinding>,
) {
    let path_bound = bindings.len();
    for param in query.split('&') {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if name.is_empty() || system_query_params.contains(name) {
            continue;
        }
        let name = unescape(name, UnescapeSpec::AllCharacters, unescape_plus);
        let field_path: Vec<String> = name.split('.').map(str::to_string).collect();
        // Path variables win over query parameters naming the same field.
        if bindings[..path_bound].iter().any(|b| b.field_path == field_path) {
            continue;
        }
        let value = unescape(value, UnescapeSpec::AllCharacters, unescape_plus);
        bindings.push(HttpVariableBinding::new(field_path, value));
    }
}
