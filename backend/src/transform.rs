//! Outbound response sanitizer.
//!
//! Every response from the payment processor is projected through
//! [`transform`] before anything reads it. Headers (cookies, dates, request
//! ids, load-balancer tags) differ between otherwise identical calls, so they
//! are dropped; status and body pass through byte-for-byte.

use serde::{Deserialize, Serialize};

/// Serde adapter carrying byte strings as standard base64 in JSON.
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

/// An HTTP response as received from the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponseRecord {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<HttpHeader>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformInput {
    pub response: HttpResponseRecord,
    #[serde(default, with = "base64_bytes")]
    pub context: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutput {
    pub status: u16,
    pub headers: Vec<HttpHeader>,
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub context: Vec<u8>,
}

impl TransformOutput {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Keep status and body, discard headers, echo the context.
pub fn transform(input: TransformInput) -> TransformOutput {
    TransformOutput {
        status: input.response.status,
        headers: Vec::new(),
        body: input.response.body,
        context: input.context,
    }
}
