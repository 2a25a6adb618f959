//! Rendering of boxed `google.protobuf.Any` payloads for display.
//!
//! Inputs and outputs of function calls are opaque to the agent; this module
//! turns the common encodings into short human-readable strings for the
//! detail view. Rendering is best-effort: any failure falls back to the
//! `<type-url>(?)` form and must never interrupt an invocation.

use prost::Message;
use prost_types::Any;
use serde_pickle::{DeOptions, HashableValue, Value as PickleValue};

const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// Renders an optional boxed value. `None` renders as `nil`.
pub fn any_to_string(any: Option<&Any>) -> String {
    let Some(any) = any else {
        return "nil".to_string();
    };
    match render_any(any) {
        Ok(s) => s,
        Err(err) => {
            tracing::debug!(type_url = %any.type_url, error = %err, "cannot render boxed value");
            format!("<{}>(?)", any.type_url)
        }
    }
}

fn render_any(any: &Any) -> Result<String, prost::DecodeError> {
    let name = any
        .type_url
        .strip_prefix(TYPE_URL_PREFIX)
        .unwrap_or(&any.type_url);
    let b = any.value.as_slice();
    Ok(match name {
        "google.protobuf.BoolValue" => BoolValue::decode(b)?.value.to_string(),
        "google.protobuf.Int32Value" => Int32Value::decode(b)?.value.to_string(),
        "google.protobuf.Int64Value" => Int64Value::decode(b)?.value.to_string(),
        "google.protobuf.UInt32Value" => UInt32Value::decode(b)?.value.to_string(),
        "google.protobuf.UInt64Value" => UInt64Value::decode(b)?.value.to_string(),
        "google.protobuf.FloatValue" => FloatValue::decode(b)?.value.to_string(),
        "google.protobuf.DoubleValue" => DoubleValue::decode(b)?.value.to_string(),
        "google.protobuf.StringValue" => StringValue::decode(b)?.value,
        "google.protobuf.BytesValue" => render_bytes(&BytesValue::decode(b)?.value),
        "google.protobuf.Timestamp" => render_timestamp(&prost_types::Timestamp::decode(b)?),
        "google.protobuf.Duration" => render_duration(&prost_types::Duration::decode(b)?),
        "google.protobuf.Struct" => render_struct(&prost_types::Struct::decode(b)?),
        "google.protobuf.Value" => render_value(&prost_types::Value::decode(b)?),
        "google.protobuf.ListValue" => render_list(&prost_types::ListValue::decode(b)?),
        _ => return Err(prost::DecodeError::new("unsupported type url")),
    })
}

/// Boxed bytes either hold a serialised object from a peer SDK (the Python
/// SDK pickles call arguments) or raw binary data. Probe for the SDK's
/// argument-holder class first, then for a plain pickle stream, then print
/// a truncated hex preview.
fn render_bytes(bytes: &[u8]) -> String {
    if let Some(rendered) = render_arguments_pickle(bytes) {
        return rendered;
    }
    if let Ok(value) = serde_pickle::value_from_slice(bytes, DeOptions::new()) {
        return render_pickle(&value);
    }
    let mut s = String::with_capacity(24);
    s.push_str("0x");
    for byte in bytes.iter().take(8) {
        s.push_str(&format!("{byte:02x}"));
    }
    if bytes.len() > 8 {
        s.push('…');
    }
    format!("{s} ({} bytes)", bytes.len())
}

// https://github.com/dispatchrun/dispatch-py/blob/0a482491/src/dispatch/proto.py#L175
const ARGUMENTS_GLOBAL: &[u8] = b"cdispatch.proto\nArguments\n";
const ARGUMENTS_MODULE: &[u8] = b"\x8c\x0edispatch.proto";
const ARGUMENTS_NAME: &[u8] = b"\x8c\x09Arguments";

/// Renders a pickled instance of the Python SDK's `dispatch.proto.Arguments`
/// class as the flat `(arg, …, key=value)` call-argument list.
///
/// The pickle VM has no decoder hook here, but the stream shape is fixed:
/// the class global (`GLOBAL` or `SHORT_BINUNICODE` pair + `STACK_GLOBAL`),
/// an empty argument tuple, `NEWOBJ`/`REDUCE`, the state dict with `args`
/// and `kwargs` keys, then `BUILD`/`STOP`. The state dict is a plain pickle
/// value, so it decodes on its own once re-framed.
fn render_arguments_pickle(bytes: &[u8]) -> Option<String> {
    let state = arguments_state(bytes)?;
    let mut framed = Vec::with_capacity(state.len() + 3);
    framed.extend_from_slice(b"\x80\x04");
    framed.extend_from_slice(state);
    framed.push(b'.');
    let value = serde_pickle::value_from_slice(&framed, DeOptions::new()).ok()?;
    let PickleValue::Dict(state) = value else {
        return None;
    };

    let mut parts = Vec::new();
    match state.get(&HashableValue::String("args".to_string())) {
        Some(PickleValue::Tuple(items)) | Some(PickleValue::List(items)) => {
            parts.extend(items.iter().map(render_pickle));
        }
        None | Some(PickleValue::None) => {}
        Some(_) => return None,
    }
    match state.get(&HashableValue::String("kwargs".to_string())) {
        Some(PickleValue::Dict(entries)) => {
            parts.extend(
                entries
                    .iter()
                    .map(|(key, value)| format!("{}={}", render_pickle_key(key), render_pickle(value))),
            );
        }
        None | Some(PickleValue::None) => {}
        Some(_) => return None,
    }
    Some(format!("({})", parts.join(", ")))
}

/// Slices the state dict out of an `Arguments` pickle, stripping the class
/// construction around it.
fn arguments_state(bytes: &[u8]) -> Option<&[u8]> {
    let class_end = if let Some(pos) = find(bytes, ARGUMENTS_GLOBAL) {
        pos + ARGUMENTS_GLOBAL.len()
    } else {
        let module = find(bytes, ARGUMENTS_MODULE)?;
        let name = module + find(&bytes[module..], ARGUMENTS_NAME)?;
        name + ARGUMENTS_NAME.len()
    };

    // Between the class and its state sit only bookkeeping opcodes: memo
    // puts, STACK_GLOBAL, the empty argument tuple, and the instantiation.
    let instantiated = bytes[class_end..]
        .iter()
        .take(12)
        .position(|&op| op == 0x81 || op == b'R')?;
    let mut state_start = class_end + instantiated + 1;
    state_start += memo_put_len(&bytes[state_start..]);

    if !bytes.ends_with(b"b.") {
        return None;
    }
    let state = bytes.get(state_start..bytes.len() - 2)?;
    if state.is_empty() {
        None
    } else {
        Some(state)
    }
}

fn memo_put_len(bytes: &[u8]) -> usize {
    match bytes.first() {
        Some(&b'q') => 2,  // BINPUT
        Some(&b'r') => 5,  // LONG_BINPUT
        Some(&0x94) => 1,  // MEMOIZE
        _ => 0,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn render_pickle(value: &PickleValue) -> String {
    match value {
        PickleValue::None => "None".to_string(),
        PickleValue::Bool(v) => v.to_string(),
        PickleValue::I64(v) => v.to_string(),
        PickleValue::Int(v) => v.to_string(),
        PickleValue::F64(v) => v.to_string(),
        PickleValue::Bytes(v) => render_bytes(v),
        PickleValue::String(v) => v.clone(),
        PickleValue::List(items) => {
            format!("[{}]", join(items.iter().map(render_pickle)))
        }
        PickleValue::Tuple(items) => {
            format!("({})", join(items.iter().map(render_pickle)))
        }
        PickleValue::Set(items) | PickleValue::FrozenSet(items) => {
            format!("{{{}}}", join(items.iter().map(render_pickle_key)))
        }
        PickleValue::Dict(entries) => {
            let pairs = entries
                .iter()
                .map(|(k, v)| format!("{}={}", render_pickle_key(k), render_pickle(v)));
            format!("({})", join(pairs))
        }
    }
}

fn render_pickle_key(key: &HashableValue) -> String {
    match key {
        HashableValue::None => "None".to_string(),
        HashableValue::Bool(v) => v.to_string(),
        HashableValue::I64(v) => v.to_string(),
        HashableValue::Int(v) => v.to_string(),
        HashableValue::F64(v) => v.to_string(),
        HashableValue::Bytes(v) => render_bytes(v),
        HashableValue::String(v) => v.clone(),
        HashableValue::Tuple(items) => {
            format!("({})", join(items.iter().map(render_pickle_key)))
        }
        HashableValue::FrozenSet(items) => {
            format!("{{{}}}", join(items.iter().map(render_pickle_key)))
        }
    }
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join(", ")
}

fn render_timestamp(ts: &prost_types::Timestamp) -> String {
    match chrono::DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32) {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        None => format!("{}s+{}ns", ts.seconds, ts.nanos),
    }
}

fn render_duration(d: &prost_types::Duration) -> String {
    let negative = d.seconds < 0 || d.nanos < 0;
    let std = std::time::Duration::new(
        d.seconds.unsigned_abs(),
        d.nanos.unsigned_abs().min(999_999_999),
    );
    if negative {
        format!("-{std:?}")
    } else {
        format!("{std:?}")
    }
}

fn render_struct(s: &prost_types::Struct) -> String {
    let pairs = s
        .fields
        .iter()
        .map(|(k, v)| format!("{k}: {}", render_value(v)));
    format!("{{{}}}", join(pairs))
}

fn render_list(l: &prost_types::ListValue) -> String {
    format!("[{}]", join(l.values.iter().map(render_value)))
}

fn render_value(v: &prost_types::Value) -> String {
    use prost_types::value::Kind;
    match &v.kind {
        None | Some(Kind::NullValue(_)) => "null".to_string(),
        Some(Kind::NumberValue(n)) => n.to_string(),
        Some(Kind::StringValue(s)) => format!("{s:?}"),
        Some(Kind::BoolValue(b)) => b.to_string(),
        Some(Kind::StructValue(s)) => render_struct(s),
        Some(Kind::ListValue(l)) => render_list(l),
    }
}

// Wrapper messages from google/protobuf/wrappers.proto. prost maps wrapper
// fields to plain options during codegen, so the standalone messages needed
// to unpack an Any are declared here.

#[derive(Clone, PartialEq, ::prost::Message)]
struct BoolValue {
    #[prost(bool, tag = "1")]
    value: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct Int32Value {
    #[prost(int32, tag = "1")]
    value: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct Int64Value {
    #[prost(int64, tag = "1")]
    value: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct UInt32Value {
    #[prost(uint32, tag = "1")]
    value: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct UInt64Value {
    #[prost(uint64, tag = "1")]
    value: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct FloatValue {
    #[prost(float, tag = "1")]
    value: f32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct DoubleValue {
    #[prost(double, tag = "1")]
    value: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct StringValue {
    #[prost(string, tag = "1")]
    value: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct BytesValue {
    #[prost(bytes = "vec", tag = "1")]
    value: Vec<u8>,
}

/// Builds an `Any` boxing the given wrapper payload. Test helper shared with
/// downstream crates' test suites.
pub fn any_bytes(value: &[u8]) -> Any {
    Any {
        type_url: format!("{TYPE_URL_PREFIX}google.protobuf.BytesValue"),
        value: BytesValue {
            value: value.to_vec(),
        }
        .encode_to_vec(),
    }
}

/// Builds an `Any` boxing a string payload.
pub fn any_string(value: &str) -> Any {
    Any {
        type_url: format!("{TYPE_URL_PREFIX}google.protobuf.StringValue"),
        value: StringValue {
            value: value.to_string(),
        }
        .encode_to_vec(),
    }
}
