use std::collections::HashMap;

use serde_json::Value;

/// MIME type reported by the transport.
pub const PR_CONTENT_TYPE: &str = "content-type";
/// `Content-Disposition` reported by the transport.
pub const PR_CONTENT_DISPOSITION: &str = "content-disposition";
/// Final URL after transport-level redirects.
pub const PR_URL: &str = "url";
/// Resolved size in bytes, set once a probe succeeds.
pub const PR_SIZE: &str = "size";
/// Keys with this prefix are forwarded to the transport as request headers.
pub const REQUEST_PREFIX: &str = "url_";

/// Case-insensitive string → value map carried by every node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: HashMap<String, Value>,
}

impl Properties {
    pub fn new() -> Self { Self::default() }

    /// Inserts `value`, returning the previous value for the key.
    pub fn insert(&mut self, name: &str, value: Value) -> Option<Value> {
        self.entries.insert(normalize(name), value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> { self.entries.get(&normalize(name)) }

    pub fn contains(&self, name: &str) -> bool { self.entries.contains_key(&normalize(name)) }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Header pairs for every `url_`-prefixed string property.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .entries
            .iter()
            .filter_map(|(k, v)| {
                let header = k.strip_prefix(REQUEST_PREFIX)?;
                let value = v.as_str()?;
                Some((header.to_string(), value.to_string()))
            })
            .collect();
        headers.sort();
        headers
    }
}

impl<K: AsRef<str>> FromIterator<(K, Value)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k.as_ref(), v);
        }
        props
    }
}

fn normalize(name: &str) -> String { name.to_ascii_lowercase() }
