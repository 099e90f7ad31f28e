//! JSON output-state decoder.
//!
//! Notifications on the observed key carry a flat JSON object such as
//! `{"0":true,"2":false}`.  Booleans map directly; numbers are on when
//! non-zero.  Other value types are skipped.

use log::debug;
use serde_json::Value;

use crate::app::ports::{StateDecoder, StateMap};
use crate::error::ProtocolError;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonStateDecoder;

impl StateDecoder for JsonStateDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<StateMap, ProtocolError> {
        let object: std::collections::BTreeMap<String, Value> =
            serde_json::from_slice(bytes).map_err(|_| ProtocolError::Malformed("json object"))?;

        let mut state = StateMap::new();
        for (key, value) in object {
            let on = match value {
                Value::Bool(b) => b,
                Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
                other => {
                    debug!("Decoder: skipping '{}' (unsupported value {})", key, other);
                    continue;
                }
            };
            state.insert(key, on);
        }
        Ok(state)
    }
}
