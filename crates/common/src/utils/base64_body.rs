//! Serde adapter carrying optional binary bodies as base64 strings.
//!
//! Use with `#[serde(default, skip_serializing_if = "Option::is_none", with = "...")]`.
//! An empty string decodes to an empty body rather than `None`.

use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

use super::{decode_body, encode_body};

pub fn serialize<S>(body: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match body {
        Some(bytes) => serializer.serialize_str(&encode_body(bytes)),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded: Option<String> = Option::deserialize(deserializer)?;
    encoded
        .map(|s| decode_body(&s).map_err(D::Error::custom))
        .transpose()
}
