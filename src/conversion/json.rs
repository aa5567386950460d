//! JSON bindings (json, jsonb) via serde_json.

use serde_json::Value;

use crate::error::{Error, Result};
use crate::oid_map::OidMap;
use crate::protocol::types::{Oid, oid};

use super::{FromWire, ToWire, WireSize};

/// jsonb payloads start with a format version byte.
const JSONB_VERSION: u8 = 1;

crate::pg_type!(Value: "jsonb", oid = oid::JSONB, array_oid = oid::JSONB_ARRAY, size = WireSize::Dynamic);

impl ToWire for Value {
    fn wire_size(&self, _map: &OidMap) -> Result<i32> {
        let body = serde_json::to_vec(self)
            .map_err(|e| Error::Decode(format!("cannot serialize JSON value: {}", e)))?;
        Ok(1 + body.len() as i32)
    }

    fn write(&self, _map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(JSONB_VERSION);
        serde_json::to_writer(&mut *buf, self)
            .map_err(|e| Error::Decode(format!("cannot serialize JSON value: {}", e)))?;
        Ok(())
    }
}

impl FromWire<'_> for Value {
    fn accepts(oid: Oid, _map: &OidMap) -> bool {
        matches!(oid, oid::JSON | oid::JSONB)
    }

    fn read(oid: Oid, bytes: &[u8], _map: &OidMap) -> Result<Self> {
        let body = if oid == oid::JSONB {
            match bytes.split_first() {
                Some((&JSONB_VERSION, rest)) => rest,
                Some((&version, _)) => {
                    return Err(Error::Decode(format!(
                        "unsupported jsonb format version {}",
                        version
                    )));
                }
                None => return Err(Error::Decode("empty jsonb payload".into())),
            }
        } else {
            bytes
        };

        serde_json::from_slice(body).map_err(|e| Error::Decode(format!("invalid JSON: {}", e)))
    }
}
