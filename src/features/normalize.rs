//! Ingress boundary: duck-typed contract logs become `InvokedRecord` /
//! `ConfirmedRecord` here or are rejected. Nothing past this module handles
//! untyped payloads.

use crate::domain::errors::NormalizeError;
use crate::domain::types::{ConfirmedRecord, EventKind, InvokedRecord, RawEventLog};
use alloy_primitives::{keccak256, Address, B256, U256};
use serde_json::Value;
use std::str::FromStr;

pub const AGENT_INVOKED_EVENT_SIGNATURE: &str = "AgentInvoked(bytes32,uint256,address,uint256)";
pub const RESULT_CONFIRMED_EVENT_SIGNATURE: &str = "ResultConfirmed(bytes32,uint256,bool,string)";
/// Earlier manager ABI without the `success` flag. Its logs are recognised by
/// topic0 but still need `success` in their decoded args.
pub const RESULT_CONFIRMED_URI_ONLY_EVENT_SIGNATURE: &str =
    "ResultConfirmed(bytes32,uint256,string)";

const CORRELATION_FIELDS: &[&str] = &["invocationId", "correlationId"];
const PAID_FIELDS: &[&str] = &["value", "paid", "paidAmount"];
const RESULT_FIELDS: &[&str] = &["resultURI", "resultHash", "resultReference"];
const MAX_RESULT_REFERENCE_LEN: usize = 2_048;

pub fn event_signature(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Invoked => AGENT_INVOKED_EVENT_SIGNATURE,
        EventKind::Confirmed => RESULT_CONFIRMED_EVENT_SIGNATURE,
    }
}

pub fn event_topic0(kind: EventKind) -> String {
    signature_topic0(event_signature(kind))
}

fn signature_topic0(signature: &str) -> String {
    format!("0x{}", hex::encode(keccak256(signature.as_bytes()).as_slice()))
}

fn is_topic0_of(kind: EventKind, topic0: &str) -> bool {
    let legacy = match kind {
        EventKind::Invoked => None,
        EventKind::Confirmed => Some(RESULT_CONFIRMED_URI_ONLY_EVENT_SIGNATURE),
    };
    std::iter::once(event_signature(kind))
        .chain(legacy)
        .any(|signature| signature_topic0(signature) == topic0)
}

pub fn normalize_invoked(raw: &RawEventLog) -> Result<InvokedRecord, NormalizeError> {
    ensure_event_kind(raw, EventKind::Invoked)?;
    let correlation_id = optional_field(&raw.args, CORRELATION_FIELDS)
        .map(|value| parse_b256_value(value, "invocationId"))
        .transpose()?;
    let agent_id = parse_agent_id(required_field(&raw.args, &["agentId"], "agentId")?)?;
    let caller = parse_address_value(required_field(&raw.args, &["caller"], "caller")?, "caller")?;
    let paid_amount = parse_u256_value(required_field(&raw.args, PAID_FIELDS, "value")?, "value")?;
    let tx_hash = parse_tx_hash(raw)?;

    Ok(InvokedRecord {
        correlation_id,
        agent_id,
        caller,
        paid_amount,
        tx_hash,
    })
}

pub fn normalize_confirmed(raw: &RawEventLog) -> Result<ConfirmedRecord, NormalizeError> {
    ensure_event_kind(raw, EventKind::Confirmed)?;
    let correlation_id = parse_b256_value(
        required_field(&raw.args, CORRELATION_FIELDS, "invocationId")?,
        "invocationId",
    )?;
    let agent_id = optional_field(&raw.args, &["agentId"])
        .map(parse_agent_id)
        .transpose()?;
    let success = parse_success(required_field(&raw.args, &["success", "status"], "success")?)?;
    let result_reference = optional_field(&raw.args, RESULT_FIELDS)
        .map(parse_result_reference)
        .transpose()?;
    let tx_hash = parse_tx_hash(raw)?;

    Ok(ConfirmedRecord {
        correlation_id,
        agent_id,
        success,
        result_reference,
        tx_hash,
    })
}

fn ensure_event_kind(raw: &RawEventLog, expected: EventKind) -> Result<(), NormalizeError> {
    let name = raw.event_name.as_deref().map(str::trim);
    let topic0 = raw.topics.first().map(|topic| topic.trim().to_ascii_lowercase());

    let name_matches = name == Some(expected.event_name());
    let topic_matches = topic0
        .as_deref()
        .is_some_and(|topic| is_topic0_of(expected, topic));
    let name_conflicts = name.is_some() && !name_matches;
    let topic_conflicts = topic0.is_some() && !topic_matches;

    if (name_matches || topic_matches) && !name_conflicts && !topic_conflicts {
        return Ok(());
    }
    Err(NormalizeError::UnexpectedEvent {
        expected,
        name: raw.event_name.clone(),
        topic0,
    })
}

fn optional_field<'a>(args: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| args.get(*name))
        .find(|value| !value.is_null())
}

fn required_field<'a>(
    args: &'a Value,
    names: &[&str],
    canonical: &'static str,
) -> Result<&'a Value, NormalizeError> {
    optional_field(args, names).ok_or(NormalizeError::MissingField(canonical))
}

fn invalid(field: &'static str, reason: String) -> NormalizeError {
    NormalizeError::InvalidField { field, reason }
}

fn parse_tx_hash(raw: &RawEventLog) -> Result<B256, NormalizeError> {
    let hash = raw
        .transaction_hash
        .as_deref()
        .ok_or(NormalizeError::MissingField("transactionHash"))?;
    parse_b256(hash, "transactionHash").map_err(|reason| invalid("transactionHash", reason))
}

fn parse_b256_value(value: &Value, field: &'static str) -> Result<B256, NormalizeError> {
    let raw = value
        .as_str()
        .ok_or_else(|| invalid(field, "expected a hex string".to_string()))?;
    parse_b256(raw, field).map_err(|reason| invalid(field, reason))
}

fn parse_address_value(value: &Value, field: &'static str) -> Result<Address, NormalizeError> {
    let raw = value
        .as_str()
        .ok_or_else(|| invalid(field, "expected a hex string".to_string()))?;
    parse_address(raw, field).map_err(|reason| invalid(field, reason))
}

fn parse_u256_value(value: &Value, field: &'static str) -> Result<U256, NormalizeError> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| invalid(field, format!("{number} is not a non-negative integer"))),
        Value::String(raw) => parse_quantity(raw, field).map_err(|reason| invalid(field, reason)),
        other => Err(invalid(field, format!("unsupported json type: {other}"))),
    }
}

fn parse_agent_id(value: &Value) -> Result<u64, NormalizeError> {
    let wide = parse_u256_value(value, "agentId")?;
    if wide > U256::from(u64::MAX) {
        return Err(invalid("agentId", format!("{wide} does not fit in u64")));
    }
    Ok(wide.as_limbs()[0])
}

fn parse_success(value: &Value) -> Result<bool, NormalizeError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => match number.as_u64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(invalid("success", format!("{number} is not 0 or 1"))),
        },
        Value::String(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(invalid("success", format!("`{other}` is not a boolean"))),
        },
        other => Err(invalid("success", format!("unsupported json type: {other}"))),
    }
}

fn parse_result_reference(value: &Value) -> Result<String, NormalizeError> {
    let raw = value
        .as_str()
        .ok_or_else(|| invalid("resultReference", "expected a string".to_string()))?;
    if raw.len() > MAX_RESULT_REFERENCE_LEN {
        return Err(invalid(
            "resultReference",
            format!("exceeds {MAX_RESULT_REFERENCE_LEN} bytes"),
        ));
    }
    Ok(raw.to_string())
}

fn parse_b256(raw: &str, field: &str) -> Result<B256, String> {
    let digits = hex_digits(raw, field)?;
    if digits.len() != 64 {
        return Err(format!("{field} must be 32 bytes"));
    }
    B256::from_str(&digits).map_err(|error| format!("failed to parse {field}: {error}"))
}

/// Decimal strings and 0x-prefixed hex quantities, up to 256 bits. A bare
/// `0x` is zero.
fn parse_quantity(raw: &str, field: &str) -> Result<U256, String> {
    let trimmed = raw.trim();
    if !trimmed.starts_with("0x") && !trimmed.starts_with("0X") {
        return parse_decimal_u256(trimmed, field);
    }
    let digits = hex_digits(trimmed, field)?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    if digits.len() > 64 {
        return Err(format!("{field} exceeds 32 bytes"));
    }
    U256::from_str_radix(&digits, 16)
        .map_err(|error| format!("failed to parse {field} as hex: {error}"))
}

pub(crate) fn parse_decimal_u256(raw: &str, field: &str) -> Result<U256, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(format!("{field} cannot be empty"));
    }
    if !trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(format!("{field} must be a decimal string"));
    }
    U256::from_str_radix(trimmed, 10)
        .map_err(|error| format!("failed to parse {field} as decimal: {error}"))
}

/// 0x-prefixed 20-byte address, any letter case.
pub(crate) fn parse_address(raw: &str, field: &str) -> Result<Address, String> {
    let digits = hex_digits(raw, field)?;
    if digits.len() != 40 {
        return Err(format!("{field} must be a 20-byte address"));
    }
    Address::from_str(&digits).map_err(|error| format!("failed to parse {field}: {error}"))
}

/// Lowercased hex digits after a required `0x` prefix.
fn hex_digits(raw: &str, field: &str) -> Result<String, String> {
    let lowered = raw.trim().to_ascii_lowercase();
    let digits = lowered
        .strip_prefix("0x")
        .ok_or_else(|| format!("{field} must be 0x-prefixed hex"))?;
    if !digits.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return Err(format!("{field} must be valid hex"));
    }
    Ok(digits.to_string())
}
