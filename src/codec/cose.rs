//! COSE public key encoding
//!
//! Only EC2 / P-256 / ES256 keys are supported. The map is always written with
//! the same key order so both sides of a ceremony produce identical bytes.

use ciborium::value::Value;

use crate::errors::CodecError;

/// COSE algorithm identifier for ECDSA P-256 with SHA-256
pub const COSE_ALG_ES256: i64 = -7;

/// Uncompressed SEC1 point: 0x04 || x || y
pub const PUBLIC_KEY_LEN: usize = 65;

const COSE_KTY: i64 = 1;
const COSE_ALG: i64 = 3;
const COSE_CRV: i64 = -1;
const COSE_X: i64 = -2;
const COSE_Y: i64 = -3;
const KTY_EC2: i64 = 2;
const CRV_P256: i64 = 1;
const COORDINATE_LEN: usize = 32;

fn int(value: i64) -> Value {
    Value::Integer(value.into())
}

/// Encode an uncompressed P-256 point as a COSE_Key map
/// `{1: 2, 3: -7, -1: 1, -2: x, -3: y}`
///
/// # Errors
/// Returns `CodecError::InvalidInput` if the key is not a 65-byte uncompressed point.
pub fn encode_public_key_cose(public_key: &[u8]) -> Result<Vec<u8>, CodecError> {
    if public_key.len() != PUBLIC_KEY_LEN || public_key[0] != 0x04 {
        return Err(CodecError::InvalidInput(
            "Public key must be a 65-byte uncompressed P-256 point".to_string(),
        ));
    }

    let map = Value::Map(vec![
        (int(COSE_KTY), int(KTY_EC2)),
        (int(COSE_ALG), int(COSE_ALG_ES256)),
        (int(COSE_CRV), int(CRV_P256)),
        (int(COSE_X), Value::Bytes(public_key[1..33].to_vec())),
        (int(COSE_Y), Value::Bytes(public_key[33..].to_vec())),
    ]);

    let mut buf = Vec::with_capacity(77);
    ciborium::into_writer(&map, &mut buf)
        .map_err(|e| CodecError::Cbor(format!("Failed to encode COSE key: {e}")))?;
    Ok(buf)
}

/// Decode a COSE_Key back into an uncompressed P-256 point
///
/// # Errors
/// Returns an error if the bytes are not a CBOR map, or if the key type, curve
/// or algorithm is not EC2 / P-256 / ES256.
pub fn decode_public_key_cose(encoded: &[u8]) -> Result<Vec<u8>, CodecError> {
    let value: Value = ciborium::from_reader(encoded)
        .map_err(|e| CodecError::Cbor(format!("Invalid COSE key: {e}")))?;
    let Value::Map(entries) = value else {
        return Err(CodecError::InvalidInput("COSE key is not a map".to_string()));
    };

    let lookup = |label: i64| -> Option<&Value> {
        entries.iter().find_map(|(k, v)| match k {
            Value::Integer(i) if i128::from(*i) == i128::from(label) => Some(v),
            _ => None,
        })
    };
    let as_int = |v: Option<&Value>| -> Option<i128> {
        match v {
            Some(Value::Integer(i)) => Some(i128::from(*i)),
            _ => None,
        }
    };
    let as_coordinate = |v: Option<&Value>, name: &str| -> Result<Vec<u8>, CodecError> {
        match v {
            Some(Value::Bytes(b)) if b.len() == COORDINATE_LEN => Ok(b.clone()),
            _ => Err(CodecError::InvalidInput(format!(
                "Missing or invalid {name} coordinate"
            ))),
        }
    };

    if as_int(lookup(COSE_KTY)) != Some(i128::from(KTY_EC2)) {
        return Err(CodecError::InvalidInput("Unsupported COSE key type".to_string()));
    }
    if as_int(lookup(COSE_ALG)) != Some(i128::from(COSE_ALG_ES256)) {
        return Err(CodecError::InvalidInput("Unsupported COSE algorithm".to_string()));
    }
    if as_int(lookup(COSE_CRV)) != Some(i128::from(CRV_P256)) {
        return Err(CodecError::InvalidInput("Unsupported COSE curve".to_string()));
    }

    let x = as_coordinate(lookup(COSE_X), "x")?;
    let y = as_coordinate(lookup(COSE_Y), "y")?;

    let mut point = Vec::with_capacity(PUBLIC_KEY_LEN);
    point.push(0x04);
    point.extend_from_slice(&x);
    point.extend_from_slice(&y);
    Ok(point)
}
