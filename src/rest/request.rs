//! REST request value type.
//!
//! A request is a method plus a normalized path. The path is kept both
//! percent-encoded (raw) and decoded; ordering, equality and hashing use the
//! raw form only, so `/a%2Fb/` and `/a/b/` never collide in routing.
//!
//! Normalization drops the query and fragment and collapses empty segments,
//! so the raw path always starts and ends with `/`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use percent_encoding::percent_decode_str;
use thiserror::Error;

/// Malformed REST request or binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RestRequestSyntaxError {
    #[error("'{0}' must contain exactly one space separating the method from the URI")]
    Shape(String),

    #[error("unknown REST method '{0}'")]
    Method(String),

    #[error("URI '{0}' must start with '/'")]
    Relative(String),

    #[error("URI '{uri}' contains illegal character {character:?}")]
    IllegalCharacter { uri: String, character: char },

    #[error("URI '{0}' contains a malformed percent escape")]
    Escape(String),

    #[error("URI '{0}' does not decode to UTF-8")]
    Encoding(String),
}

/// Methods a REST binding can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RestMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl RestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestMethod::Get => "GET",
            RestMethod::Post => "POST",
            RestMethod::Put => "PUT",
            RestMethod::Delete => "DELETE",
        }
    }
}

impl FromStr for RestMethod {
    type Err = RestRequestSyntaxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(RestMethod::Get),
            "POST" => Ok(RestMethod::Post),
            "PUT" => Ok(RestMethod::Put),
            "DELETE" => Ok(RestMethod::Delete),
            other => Err(RestRequestSyntaxError::Method(other.to_string())),
        }
    }
}

impl fmt::Display for RestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed, immutable REST request.
#[derive(Debug, Clone)]
pub struct RestRequest {
    method: RestMethod,
    /// Decoded segments; `[""]` for the root path.
    nodes: Vec<String>,
    /// Percent-encoded segments, parallel to `nodes`.
    raw_nodes: Vec<String>,
    /// `"<METHOD> <raw path>"`.
    raw: String,
    /// `"<METHOD> <decoded path>"`.
    decoded: String,
}

impl RestRequest {
    /// Parse a request from a method name and a URI.
    pub fn new(method: &str, uri: &str) -> Result<Self, RestRequestSyntaxError> {
        Self::with_method(method.parse()?, uri)
    }

    /// Parse a request for a known method.
    pub fn with_method(method: RestMethod, uri: &str) -> Result<Self, RestRequestSyntaxError> {
        if !uri.starts_with('/') {
            return Err(RestRequestSyntaxError::Relative(uri.to_string()));
        }
        let path = match uri.find(['?', '#']) {
            Some(end) => &uri[..end],
            None => uri,
        };
        if let Some(character) = path.chars().find(|c| is_illegal(*c)) {
            return Err(RestRequestSyntaxError::IllegalCharacter {
                uri: uri.to_string(),
                character,
            });
        }

        let mut nodes = Vec::new();
        let mut raw_nodes = Vec::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !has_valid_escapes(segment) {
                return Err(RestRequestSyntaxError::Escape(uri.to_string()));
            }
            let decoded = percent_decode_str(segment)
                .decode_utf8()
                .map_err(|_| RestRequestSyntaxError::Encoding(uri.to_string()))?;
            nodes.push(decoded.into_owned());
            raw_nodes.push(segment.to_string());
        }

        let raw = format!("{method} {}", join_path(&raw_nodes));
        let decoded = format!("{method} {}", join_path(&nodes));
        if nodes.is_empty() {
            nodes.push(String::new());
            raw_nodes.push(String::new());
        }

        Ok(Self {
            method,
            nodes,
            raw_nodes,
            raw,
            decoded,
        })
    }

    pub fn method(&self) -> RestMethod {
        self.method
    }

    /// Decoded path segments, never empty.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Percent-encoded path segments, never empty.
    pub fn raw_nodes(&self) -> &[String] {
        &self.raw_nodes
    }

    /// Decoded path, starting and ending with `/`.
    pub fn path(&self) -> &str {
        &self.decoded[self.method.as_str().len() + 1..]
    }

    /// Percent-encoded path, starting and ending with `/`.
    pub fn raw_path(&self) -> &str {
        &self.raw[self.method.as_str().len() + 1..]
    }

    /// `"<METHOD> <raw path>"`, the routing key.
    pub fn to_raw_string(&self) -> &str {
        &self.raw
    }

    pub fn is_root(&self) -> bool {
        self.raw_path() == "/"
    }

    /// Number of real path segments; zero for the root path.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.nodes.len()
        }
    }

    /// Decoded segments beyond the first `depth` ones.
    pub fn nodes_after(&self, depth: usize) -> &[String] {
        if self.is_root() {
            return &[];
        }
        self.nodes.get(depth..).unwrap_or(&[])
    }

    /// Whether `self` is a node-wise prefix of `other` with the same method.
    pub fn is_prefix_of(&self, other: &RestRequest) -> bool {
        if self.method != other.method || self.depth() > other.depth() {
            return false;
        }
        self.raw_nodes[..self.depth()] == other.raw_nodes[..self.depth()]
    }

    /// Raw routing keys of every ancestor of this request, longest first.
    ///
    /// For `GET /a/b/` these are `GET /a/b/`, `GET /a/` and `GET /`.
    pub fn prefix_keys(&self) -> impl Iterator<Item = &str> + '_ {
        let path_start = self.method.as_str().len() + 1;
        self.raw
            .match_indices('/')
            .map(|(index, _)| index)
            .filter(move |index| *index >= path_start)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(move |index| &self.raw[..=index])
    }
}

fn join_path(segments: &[String]) -> String {
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", segments.join("/"))
    }
}

fn is_illegal(character: char) -> bool {
    character.is_control()
        || matches!(character, ' ' | '"' | '<' | '>' | '\\' | '^' | '`' | '{' | '|' | '}')
}

fn has_valid_escapes(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

impl FromStr for RestRequest {
    type Err = RestRequestSyntaxError;

    /// Parse `"<METHOD> <uri>"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(uri), None) => Self::new(method, uri),
            _ => Err(RestRequestSyntaxError::Shape(s.to_string())),
        }
    }
}

impl fmt::Display for RestRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.decoded)
    }
}

impl PartialEq for RestRequest {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for RestRequest {}

impl Hash for RestRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for RestRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RestRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(s: &str) -> RestRequest {
        s.parse().unwrap()
    }

    #[test]
    fn trailing_solidus_is_implied() {
        assert_eq!(request("POST /one/"), request("POST /one"));
    }

    #[test]
    fn parses_method_and_nodes() {
        let parsed = request("GET /one/two/");
        assert_eq!(parsed.method(), RestMethod::Get);
        assert_eq!(parsed.nodes(), ["one", "two"]);
        assert_eq!(parsed.depth(), 2);
    }

    #[test]
    fn decodes_nodes_but_keeps_raw_form() {
        let parsed = RestRequest::new("POST", "/one/two%20three/𤧰_x/").unwrap();
        assert_eq!(parsed.nodes(), ["one", "two three", "𤧰_x"]);
        assert_eq!(parsed.raw_nodes()[1], "two%20three");
    }

    #[test]
    fn collapses_empty_segments() {
        assert_eq!(request("PUT ///qwe//").nodes(), ["qwe"]);
    }

    #[test]
    fn root_has_single_empty_node() {
        let root = request("PUT /");
        assert_eq!(root.nodes(), [""]);
        assert!(root.is_root());
        assert_eq!(root.depth(), 0);
    }

    #[test]
    fn display_is_decoded_raw_string_is_encoded() {
        let parsed = RestRequest::new("DELETE", "/one/two%20/").unwrap();
        assert_eq!(parsed.to_string(), "DELETE /one/two /");
        assert_eq!(parsed.to_raw_string(), "DELETE /one/two%20/");
        assert_eq!(parsed.path(), "/one/two /");
        assert_eq!(parsed.raw_path(), "/one/two%20/");
    }

    #[test]
    fn query_and_fragment_are_ignored() {
        assert_eq!(request("GET /a/b?x=1#frag"), request("GET /a/b/"));
    }

    #[test]
    fn raw_form_distinguishes_encoded_solidus() {
        let encoded = request("GET /a%2Fb/");
        let split = request("GET /a/b/");
        assert_ne!(encoded, split);
        assert_eq!(encoded.to_string(), "GET /a/b/");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            "GE_T /one/two/".parse::<RestRequest>(),
            Err(RestRequestSyntaxError::Method(_))
        ));
        assert!(matches!(
            RestRequest::new("DELETE", "one/two"),
            Err(RestRequestSyntaxError::Relative(_))
        ));
        assert!(matches!(
            "GET  /double-space/".parse::<RestRequest>(),
            Err(RestRequestSyntaxError::Shape(_))
        ));
        assert!(matches!(
            RestRequest::new("GET", "/bad%zz/"),
            Err(RestRequestSyntaxError::Escape(_))
        ));
        assert!(matches!(
            RestRequest::new("GET", "/bad%ff/"),
            Err(RestRequestSyntaxError::Encoding(_))
        ));
        assert!(matches!(
            RestRequest::new("GET", "/a{b}/"),
            Err(RestRequestSyntaxError::IllegalCharacter { character: '{', .. })
        ));
        assert!(matches!(
            "get /lower/".parse::<RestRequest>(),
            Err(RestRequestSyntaxError::Method(_))
        ));
    }

    #[test]
    fn prefix_relation_is_node_wise() {
        let binding = request("GET /b1/b2/");
        assert!(binding.is_prefix_of(&request("GET /b1/b2/p1/")));
        assert!(binding.is_prefix_of(&binding));
        assert!(!binding.is_prefix_of(&request("GET /b1/b2x/")));
        assert!(!binding.is_prefix_of(&request("POST /b1/b2/")));
        assert!(request("GET /").is_prefix_of(&binding));
    }

    #[test]
    fn prefix_keys_run_longest_first() {
        let keys: Vec<_> = request("GET /a/b/").prefix_keys().map(str::to_owned).collect();
        assert_eq!(keys, ["GET /a/b/", "GET /a/", "GET /"]);
    }

    #[test]
    fn nodes_after_skips_binding_depth() {
        let parsed = request("GET /b1/b2/p1/p2/");
        assert_eq!(parsed.nodes_after(2), ["p1", "p2"]);
        assert!(parsed.nodes_after(4).is_empty());
        assert!(parsed.nodes_after(9).is_empty());
        assert_eq!(parsed.nodes_after(0).len(), 4);
    }

    #[test]
    fn ordering_follows_raw_string() {
        let mut requests = vec![request("GET /b/"), request("GET /a/b/"), request("GET /a/")];
        requests.sort();
        let raw: Vec<_> = requests.iter().map(RestRequest::to_raw_string).collect();
        assert_eq!(raw, ["GET /a/", "GET /a/b/", "GET /b/"]);
    }
}
