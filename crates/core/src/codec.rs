//! URL-safe key token codec
//!
//! Encodes a [`Key`] into the legacy wire token format: the ancestor path plus
//! the project identifier serialized as a `Reference` protobuf message, then
//! URL-safe base64 with the padding stripped. Decoding accepts tokens with or
//! without padding and rebuilds the key chain leaf-last.
//!
//! The envelope layout (legacy App Engine key reference):
//!
//! ```text
//! Reference { app = 13 (string), path = 14 (message),
//!             name_space = 20, database_id = 23 (accepted, discarded) }
//! Path      { repeated group Element = 1 {
//!             type = 2 (string), id = 3 (varint), name = 4 (string) } }
//! ```
//!
//! A decode failure means the token is corrupt or foreign. It must never be
//! treated as "key not found".

use crate::key::Key;
use base64::alphabet;
use base64::engine::general_purpose::GeneralPurpose;
use base64::engine::{DecodePaddingMode, Engine, GeneralPurposeConfig};
use thiserror::Error;

/// URL-safe alphabet, no padding on encode, padding optional on decode.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// Reference message fields.
const FIELD_APP: u64 = 13;
const FIELD_PATH: u64 = 14;
const FIELD_NAMESPACE: u64 = 20;
const FIELD_DATABASE_ID: u64 = 23;

// Path.Element group fields.
const FIELD_ELEMENT: u64 = 1;
const FIELD_ELEMENT_KIND: u64 = 2;
const FIELD_ELEMENT_ID: u64 = 3;
const FIELD_ELEMENT_NAME: u64 = 4;

// Protobuf wire types.
const WIRE_VARINT: u64 = 0;
const WIRE_LEN: u64 = 2;
const WIRE_START_GROUP: u64 = 3;
const WIRE_END_GROUP: u64 = 4;

/// Errors raised while decoding a key token.
///
/// These map to the `Decode` class in the crate-wide error taxonomy and are
/// never retried: a failed decode indicates a corrupt or foreign token, not a
/// missing entity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The text layer is not valid URL-safe base64.
    #[error("invalid base64: {0}")]
    Base64(String),

    /// The binary envelope ended in the middle of a field.
    #[error("truncated key envelope")]
    Truncated,

    /// A varint ran past 64 bits.
    #[error("varint overflow in key envelope")]
    VarintOverflow,

    /// The envelope contains a field this codec does not know.
    #[error("unknown field {field} (wire type {wire_type}) in key envelope")]
    UnknownField {
        /// Protobuf field number encountered.
        field: u64,
        /// Wire type it carried.
        wire_type: u64,
    },

    /// A kind or name was not valid UTF-8.
    #[error("invalid UTF-8 in key envelope")]
    InvalidUtf8,

    /// A path element carried no kind.
    #[error("path element without a kind")]
    MissingKind,

    /// A path element carried both an id and a name.
    #[error("path element with both id and name")]
    AmbiguousElement,

    /// The reference contained no path elements at all.
    #[error("empty key path")]
    EmptyPath,
}

impl Key {
    /// Encode this key as a URL-safe token.
    ///
    /// Walks the parent chain root-to-leaf, serializes the path elements plus
    /// `project_id` into the binary envelope and base64-encodes the result
    /// with padding stripped.
    pub fn to_urlsafe(&self, project_id: &str) -> String {
        let mut path_buf = Vec::new();
        for element in self.path() {
            write_tag(&mut path_buf, FIELD_ELEMENT, WIRE_START_GROUP);
            write_tag(&mut path_buf, FIELD_ELEMENT_KIND, WIRE_LEN);
            write_len_prefixed(&mut path_buf, element.kind().as_bytes());
            if let Some(id) = element.id() {
                write_tag(&mut path_buf, FIELD_ELEMENT_ID, WIRE_VARINT);
                write_varint(&mut path_buf, id as u64);
            } else if let Some(name) = element.name() {
                write_tag(&mut path_buf, FIELD_ELEMENT_NAME, WIRE_LEN);
                write_len_prefixed(&mut path_buf, name.as_bytes());
            }
            write_tag(&mut path_buf, FIELD_ELEMENT, WIRE_END_GROUP);
        }

        let mut buf = Vec::with_capacity(path_buf.len() + project_id.len() + 8);
        write_tag(&mut buf, FIELD_APP, WIRE_LEN);
        write_len_prefixed(&mut buf, project_id.as_bytes());
        write_tag(&mut buf, FIELD_PATH, WIRE_LEN);
        write_len_prefixed(&mut buf, &path_buf);

        URL_SAFE_LENIENT.encode(buf)
    }

    /// Decode a URL-safe token back into a key.
    ///
    /// Inverse of [`Key::to_urlsafe`] modulo normalization: a digit-only name
    /// in the envelope decodes as an id. The project identifier inside the
    /// token is discarded; keys always live in the caller's project.
    pub fn from_urlsafe(token: &str) -> Result<Key, DecodeError> {
        let raw = URL_SAFE_LENIENT
            .decode(token.as_bytes())
            .map_err(|e| DecodeError::Base64(e.to_string()))?;

        let mut pos = 0;
        let mut elements: Vec<PathElement> = Vec::new();
        while pos < raw.len() {
            let tag = read_varint(&raw, &mut pos)?;
            let (field, wire_type) = (tag >> 3, tag & 7);
            match (field, wire_type) {
                (FIELD_APP, WIRE_LEN)
                | (FIELD_NAMESPACE, WIRE_LEN)
                | (FIELD_DATABASE_ID, WIRE_LEN) => {
                    // Project id / namespace / database id: parsed, not retained.
                    read_len_prefixed(&raw, &mut pos)?;
                }
                (FIELD_PATH, WIRE_LEN) => {
                    let path_bytes = read_len_prefixed(&raw, &mut pos)?;
                    parse_path(path_bytes, &mut elements)?;
                }
                _ => return Err(DecodeError::UnknownField { field, wire_type }),
            }
        }

        let mut key: Option<Key> = None;
        for element in elements {
            let mut next = match (element.id, element.name) {
                (Some(id), None) => Key::with_id(element.kind, id),
                (None, Some(name)) => Key::with_name(element.kind, name),
                (None, None) => Key::incomplete(element.kind),
                (Some(_), Some(_)) => return Err(DecodeError::AmbiguousElement),
            };
            if let Some(parent) = key {
                next = next.with_parent(parent);
            }
            key = Some(next);
        }
        key.ok_or(DecodeError::EmptyPath)
    }
}

struct PathElement {
    kind: String,
    id: Option<i64>,
    name: Option<String>,
}

fn parse_path(bytes: &[u8], elements: &mut Vec<PathElement>) -> Result<(), DecodeError> {
    let mut pos = 0;
    while pos < bytes.len() {
        let tag = read_varint(bytes, &mut pos)?;
        let (field, wire_type) = (tag >> 3, tag & 7);
        if field != FIELD_ELEMENT || wire_type != WIRE_START_GROUP {
            return Err(DecodeError::UnknownField { field, wire_type });
        }
        elements.push(parse_element(bytes, &mut pos)?);
    }
    Ok(())
}

fn parse_element(bytes: &[u8], pos: &mut usize) -> Result<PathElement, DecodeError> {
    let mut kind = None;
    let mut id = None;
    let mut name = None;
    loop {
        if *pos >= bytes.len() {
            // Group never closed.
            return Err(DecodeError::Truncated);
        }
        let tag = read_varint(bytes, pos)?;
        let (field, wire_type) = (tag >> 3, tag & 7);
        match (field, wire_type) {
            (FIELD_ELEMENT, WIRE_END_GROUP) => break,
            (FIELD_ELEMENT_KIND, WIRE_LEN) => {
                kind = Some(read_string(bytes, pos)?);
            }
            (FIELD_ELEMENT_ID, WIRE_VARINT) => {
                id = Some(read_varint(bytes, pos)? as i64);
            }
            (FIELD_ELEMENT_NAME, WIRE_LEN) => {
                name = Some(read_string(bytes, pos)?);
            }
            _ => return Err(DecodeError::UnknownField { field, wire_type }),
        }
    }
    Ok(PathElement {
        kind: kind.ok_or(DecodeError::MissingKind)?,
        id,
        name,
    })
}

fn write_tag(buf: &mut Vec<u8>, field: u64, wire_type: u64) {
    write_varint(buf, (field << 3) | wire_type);
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn read_varint(bytes: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*pos).ok_or(DecodeError::Truncated)?;
        *pos += 1;
        if shift >= 64 {
            return Err(DecodeError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn read_len_prefixed<'a>(bytes: &'a [u8], pos: &mut usize) -> Result<&'a [u8], DecodeError> {
    let len = read_varint(bytes, pos)? as usize;
    let end = pos.checked_add(len).ok_or(DecodeError::Truncated)?;
    if end > bytes.len() {
        return Err(DecodeError::Truncated);
    }
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

fn read_string(bytes: &[u8], pos: &mut usize) -> Result<String, DecodeError> {
    let slice = read_len_prefixed(bytes, pos)?;
    String::from_utf8(slice.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
}
