//! Canonical text form of protobuf messages.
//!
//! Canonical text is pretty-printed JSON in which every schema field is
//! present: set fields keep their value, unset scalars show their default,
//! unset repeated fields show as `[]`, and unset nested messages expand
//! recursively so the full schema shape is always visible to the operator.

use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};
use serde_json::ser::PrettyFormatter;

use crate::error::{ProxyError, ProxyResult};

const INDENT: &[u8] = b"    ";

fn serialize_options() -> SerializeOptions {
    SerializeOptions::new().skip_default_fields(false)
}

fn pretty<T: serde::Serialize + ?Sized>(value: &T) -> ProxyResult<String> {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(INDENT));
    value
        .serialize(&mut serializer)
        .map_err(|err| ProxyError::Internal(format!("canonical form failed: {err}")))?;
    String::from_utf8(out)
        .map_err(|err| ProxyError::Internal(format!("canonical form is not utf-8: {err}")))
}

fn to_value(message: &DynamicMessage) -> ProxyResult<serde_json::Value> {
    message
        .serialize_with_options(serde_json::value::Serializer, &serialize_options())
        .map_err(|err| ProxyError::Internal(format!("canonical form failed: {err}")))
}

/// Canonical text of a single message. Idempotent: canonicalizing the parse
/// of a canonical text yields byte-identical output.
pub fn canonicalize(message: &DynamicMessage) -> ProxyResult<String> {
    pretty(&to_value(message)?)
}

/// Read-only display form for a response sequence (server-streaming calls).
pub fn canonicalize_sequence(messages: &[DynamicMessage]) -> ProxyResult<String> {
    let mut values = Vec::with_capacity(messages.len());
    for message in messages {
        values.push(to_value(message)?);
    }
    pretty(&values)
}

/// Maps canonical text back onto a message of the given type. Unknown fields
/// and trailing input are rejected.
pub fn parse(text: &str, descriptor: MessageDescriptor) -> ProxyResult<DynamicMessage> {
    let mut deserializer = serde_json::Deserializer::from_str(text);
    let message = DynamicMessage::deserialize_with_options(
        descriptor,
        &mut deserializer,
        &DeserializeOptions::new().deny_unknown_fields(true),
    )
    .map_err(|err| ProxyError::Parse(err.to_string()))?;
    deserializer
        .end()
        .map_err(|err| ProxyError::Parse(format!("trailing input: {err}")))?;
    Ok(message)
}

/// Canonical text of a fully-defaulted message of the given type.
pub fn default_text(descriptor: MessageDescriptor) -> ProxyResult<String> {
    canonicalize(&DynamicMessage::new(descriptor))
}
