//! Request and response JSON weaving.
//!
//! [`weave_request`] builds the RPC request document from the HTTP body and
//! the variable bindings produced by the matcher. The body is placed first
//! (at the root, or at `body_field_path`) and bindings are applied on top, so
//! a bound path or query value always wins over body content at the same
//! field. A field bound more than once (a repeated query parameter) becomes a
//! JSON array.
//!
//! [`weave_response`] extracts `response_body_field_path` from an RPC
//! response document.

use std::collections::HashSet;

use bytes::Bytes;
use serde_json::{Map, Value};

use super::matcher::HttpVariableBinding;
use crate::error::{GrpcWireError, Result};

/// Body field path meaning "the whole message".
pub const WHOLE_MESSAGE: &str = "*";

/// Build the JSON request message.
///
/// With no bindings and no body field path the body is returned unchanged,
/// without a JSON round trip.
///
/// ```
/// use bytes::Bytes;
/// use grpc_wire::transcode::{weave_request, HttpVariableBinding};
///
/// let bindings = vec![HttpVariableBinding::new(vec!["id".into()], "42")];
/// let woven = weave_request(&Bytes::new(), &bindings, None).unwrap();
/// assert_eq!(&woven[..], br#"{"id":"42"}"#);
///
/// let body = Bytes::from_static(b"{ \"raw\" : true }");
/// assert_eq!(weave_request(&body, &[], None).unwrap(), body);
/// ```
pub fn weave_request(
    body: &Bytes,
    bindings: &[HttpVariableBinding],
    body_field_path: Option<&str>,
) -> Result<Bytes> {
    if bindings.is_empty() && body_field_path.is_none() {
        return Ok(body.clone());
    }

    let mut root = match body_field_path {
        None | Some(WHOLE_MESSAGE) => parse_object_body(body)?,
        Some(path) => {
            let mut root = Map::new();
            if !body.is_empty() {
                let value: Value = serde_json::from_slice(body).map_err(|e| {
                    GrpcWireError::Transcoding(format!("Invalid JSON request body: {}", e))
                })?;
                set_path(&mut root, &split_path(path), value);
            }
            root
        }
    };

    let mut bound: HashSet<&[String]> = HashSet::new();
    for binding in bindings {
        let value = Value::String(binding.value.clone());
        if bound.insert(binding.field_path.as_slice()) {
            set_path(&mut root, &binding.field_path, value);
        } else {
            append_path(&mut root, &binding.field_path, value);
        }
    }

    Ok(Bytes::from(serde_json::to_vec(&Value::Object(root))?))
}

/// Extract the HTTP response body from an RPC response message.
///
/// A field that is absent anywhere along the path yields `null`: the JSON
/// mapping omits fields holding their default value, so absence is not an
/// error. A path that runs into a present non-object value fails with
/// [`GrpcWireError::Transcoding`].
///
/// ```
/// use bytes::Bytes;
/// use grpc_wire::transcode::weave_response;
///
/// let message = Bytes::from_static(br#"{"item":{"id":"1"},"etag":"x"}"#);
/// assert_eq!(&weave_response(&message, Some("item")).unwrap()[..], br#"{"id":"1"}"#);
/// assert_eq!(weave_response(&message, None).unwrap(), message);
/// ```
pub fn weave_response(message: &Bytes, response_body_field_path: Option<&str>) -> Result<Bytes> {
    let path = match response_body_field_path {
        None | Some(WHOLE_MESSAGE) => return Ok(message.clone()),
        Some(path) => path,
    };

    let root: Value = serde_json::from_slice(message).map_err(|e| {
        GrpcWireError::Transcoding(format!("Invalid JSON response message: {}", e))
    })?;

    let mut current = &root;
    for field in path.split('.') {
        let Value::Object(object) = current else {
            return Err(GrpcWireError::Transcoding(format!(
                "Response field {:?} does not resolve through objects",
                path
            )));
        };
        match object.get(field) {
            Some(next) => current = next,
            None => return Ok(Bytes::from_static(b"null")),
        }
    }

    Ok(Bytes::from(serde_json::to_vec(current)?))
}

fn parse_object_body(body: &Bytes) -> Result<Map<String, Value>> {
    if body.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(GrpcWireError::Transcoding(
            "Request body must be a JSON object".to_string(),
        )),
        Err(e) => Err(GrpcWireError::Transcoding(format!(
            "Invalid JSON request body: {}",
            e
        ))),
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

/// Walk to the parent object of the leaf, replacing non-objects on the way.
fn parent_of<'a>(
    root: &'a mut Map<String, Value>,
    path: &[String],
) -> Option<&'a mut Map<String, Value>> {
    let mut current = root;
    for field in &path[..path.len().saturating_sub(1)] {
        let slot = current
            .entry(field.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = slot.as_object_mut()?;
    }
    Some(current)
}

fn set_path(root: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some(leaf) = path.last() else {
        return;
    };
    if let Some(parent) = parent_of(root, path) {
        parent.insert(leaf.clone(), value);
    }
}

fn append_path(root: &mut Map<String, Value>, path: &[String], value: Value) {
    let (Some(leaf), Some(parent)) = (path.last(), parent_of(root, path)) else {
        return;
    };
    match parent.get_mut(leaf) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            parent.insert(leaf.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binding(path: &str, value: &str) -> HttpVariableBinding {
        HttpVariableBinding::new(split_path(path), value)
    }

    fn woven(body: &str, bindings: &[HttpVariableBinding], path: Option<&str>) -> Value {
        let bytes = weave_request(&Bytes::copy_from_slice(body.as_bytes()), bindings, path).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_fast_path_is_byte_identical() {
        let body = Bytes::from_static(b"{\"a\":  1,\n\"b\":2}");
        let out = weave_request(&body, &[], None).unwrap();
        assert_eq!(out, body);
        assert_eq!(out.as_ptr(), body.as_ptr());
    }

    #[test]
    fn test_path_and_query_bindings() {
        let value = woven("", &[binding("id", "42"), binding("filter", "x")], None);
        assert_eq!(value, json!({"id": "42", "filter": "x"}));
    }

    #[test]
    fn test_nested_bindings() {
        let value = woven(
            "",
            &[binding("book.author.name", "ann"), binding("book.id", "7")],
            None,
        );
        assert_eq!(value, json!({"book": {"author": {"name": "ann"}, "id": "7"}}));
    }

    #[test]
    fn test_repeated_binding_becomes_array() {
        let value = woven(
            "",
            &[binding("tag", "a"), binding("tag", "b"), binding("tag", "c")],
            None,
        );
        assert_eq!(value, json!({"tag": ["a", "b", "c"]}));
    }

    #[test]
    fn test_unset_body_merges_at_root_and_bindings_win() {
        let value = woven(
            r#"{"id":"from-body","name":"n"}"#,
            &[binding("id", "from-path")],
            None,
        );
        assert_eq!(value, json!({"id": "from-path", "name": "n"}));
    }

    #[test]
    fn test_whole_body_mapping() {
        let value = woven(
            r#"{"title":"t","shelf":{"id":"body"}}"#,
            &[binding("shelf.id", "path")],
            Some("*"),
        );
        assert_eq!(value, json!({"title": "t", "shelf": {"id": "path"}}));
    }

    #[test]
    fn test_body_at_field_path() {
        let value = woven(
            r#"{"title":"t"}"#,
            &[binding("shelf", "s1")],
            Some("book.content"),
        );
        assert_eq!(value, json!({"book": {"content": {"title": "t"}}, "shelf": "s1"}));
    }

    #[test]
    fn test_body_field_path_accepts_non_objects() {
        let value = woven("[1,2]", &[], Some("ids"));
        assert_eq!(value, json!({"ids": [1, 2]}));
    }

    #[test]
    fn test_binding_replaces_scalar_intermediate() {
        let value = woven(r#"{"book":"flat"}"#, &[binding("book.id", "1")], None);
        assert_eq!(value, json!({"book": {"id": "1"}}));
    }

    #[test]
    fn test_malformed_body() {
        let err = weave_request(&Bytes::from_static(b"{oops"), &[binding("a", "b")], None)
            .unwrap_err();
        assert!(matches!(err, GrpcWireError::Transcoding(_)));

        let err = weave_request(&Bytes::from_static(b"[1]"), &[], Some("*")).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }

    #[test]
    fn test_response_identity() {
        let message = Bytes::from_static(b"{\"x\": 1}");
        assert_eq!(weave_response(&message, None).unwrap(), message);
        assert_eq!(weave_response(&message, Some("*")).unwrap(), message);
    }

    #[test]
    fn test_response_nested_path() {
        let message = Bytes::from_static(br#"{"page":{"items":[1,2]}}"#);
        let out = weave_response(&message, Some("page.items")).unwrap();
        assert_eq!(&out[..], b"[1,2]");
    }

    #[test]
    fn test_response_absent_field_is_null() {
        let message = Bytes::from_static(br#"{"page":{}}"#);
        let out = weave_response(&message, Some("page.items")).unwrap();
        assert_eq!(&out[..], b"null");

        // Absent intermediate, as for a defaulted sub-message.
        let out = weave_response(&Bytes::from_static(b"{}"), Some("page.items")).unwrap();
        assert_eq!(&out[..], b"null");
    }

    #[test]
    fn test_response_non_object_intermediate_fails() {
        let message = Bytes::from_static(br#"{"page":"flat"}"#);
        assert!(weave_response(&message, Some("page.items")).is_err());
    }
}
