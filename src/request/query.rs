//! Query-string encoding for `params`.

use indexmap::IndexMap;
use serde_json::Value;

pub use crate::utils::url::split_url;

/// Query parameters in insertion order
pub type Params = IndexMap<String, Value>;

/// Render one value for the query string. `None` for `null`, which is skipped.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        // nested structures travel as JSON text
        other => Some(other.to_string()),
    }
}

/// Encode `params` as `key=value` pairs.
///
/// Array values expand to one pair per element. `indexes` selects the key
/// form: `None` repeats the bare key, `Some(true)` writes `key[i]`,
/// `Some(false)` writes `key[]`.
pub fn encode_params(params: &Params, indexes: Option<bool>) -> Vec<String> {
    let mut pairs = Vec::new();
    for (key, value) in params {
        let key = urlencoding::encode(key);
        match value {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let Some(item) = scalar(item) else { continue };
                    let item = urlencoding::encode(&item);
                    match indexes {
                        None => pairs.push(format!("{key}={item}")),
                        Some(true) => pairs.push(format!("{key}[{i}]={item}")),
                        Some(false) => pairs.push(format!("{key}[]={item}")),
                    }
                }
            }
            other => {
                if let Some(item) = scalar(other) {
                    pairs.push(format!("{key}={}", urlencoding::encode(&item)));
                }
            }
        }
    }
    pairs
}

/// Append encoded `params` after any query already inline in `url`
pub fn append_query(url: &str, params: &Params, indexes: Option<bool>) -> String {
    let (path, inline) = split_url(url);
    let mut pairs: Vec<String> = inline.map(|q| vec![q.to_string()]).unwrap_or_default();
    pairs.extend(encode_params(params, indexes));

    if pairs.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", pairs.join("&"))
    }
}
