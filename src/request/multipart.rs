//! `multipart/form-data` body encoding.

use bytes::{BufMut, Bytes, BytesMut};
use rand::{distributions::Alphanumeric, Rng};
use serde_json::Value;

use crate::core::{RequestError, RequestResult};

const BOUNDARY_PREFIX: &str = "----UnikitFormBoundary";
const BOUNDARY_LEN: usize = 16;

/// An encoded multipart body and the boundary that delimits it
#[derive(Debug, Clone)]
pub struct MultipartBody {
    pub boundary: String,
    pub body: Bytes,
}

impl MultipartBody {
    /// Value for the `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }
}

fn generate_boundary() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(BOUNDARY_LEN)
        .map(char::from)
        .collect();
    format!("{BOUNDARY_PREFIX}{suffix}")
}

/// Encode every top-level field of `data` as one part, random boundary
pub fn encode_multipart(data: Option<&Value>) -> RequestResult<MultipartBody> {
    encode_multipart_with_boundary(data, generate_boundary())
}

pub fn encode_multipart_with_boundary(
    data: Option<&Value>,
    boundary: String,
) -> RequestResult<MultipartBody> {
    let empty = serde_json::Map::new();
    let fields = match data {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(fields)) => fields,
        Some(other) => {
            return Err(RequestError::invalid_options(format!(
                "multipart data must be an object, got {other}"
            )))
        }
    };

    let mut body = BytesMut::new();
    for (name, value) in fields {
        body.put_slice(format!("--{boundary}\r\n").as_bytes());
        body.put_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        match value {
            Value::String(s) => body.put_slice(s.as_bytes()),
            Value::Null => {}
            other => body.put_slice(other.to_string().as_bytes()),
        }
        body.put_slice(b"\r\n");
    }
    body.put_slice(format!("--{boundary}--\r\n").as_bytes());

    Ok(MultipartBody {
        boundary,
        body: body.freeze(),
    })
}
