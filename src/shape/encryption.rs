use crate::types::Value;

use super::ShapeError;

// Markers left behind when a client rewrites a query against encrypted fields
const SAFE_CONTENT_FIELD: &str = "__safeContent__";
const SAFE_CONTENT_PATH: &str = "$__safeContent__";
const INTERNAL_FLE_PREFIX: &str = "$_internalFle";

pub(super) fn check_field_name(name: &str) -> Result<(), ShapeError> {
    if name == SAFE_CONTENT_FIELD {
        return Err(ShapeError::EncryptedPayloadDetected("__safeContent__ field"));
    }
    if name.starts_with(INTERNAL_FLE_PREFIX) {
        return Err(ShapeError::EncryptedPayloadDetected("internal encryption operator"));
    }
    Ok(())
}

pub(super) fn check_value(value: &Value) -> Result<(), ShapeError> {
    match value {
        Value::String(s) if s == SAFE_CONTENT_PATH => {
            Err(ShapeError::EncryptedPayloadDetected("$__safeContent__ field path"))
        }
        Value::Binary { subtype, .. } if subtype.is_encrypted() => {
            Err(ShapeError::EncryptedPayloadDetected("encrypted binary payload"))
        }
        _ => Ok(())
    }
}
