//! Text type bindings (String, &str).

use crate::error::{Error, Result};
use crate::oid_map::OidMap;
use crate::protocol::types::{Oid, oid};

use super::{FromWire, PgType, ToWire, WireSize};

crate::pg_type!(String: "text", oid = oid::TEXT, array_oid = oid::TEXT_ARRAY, size = WireSize::Dynamic);

impl PgType for str {
    const NAME: &'static str = "text";
    const ARRAY_NAME: &'static str = "_text";
    const OID: Option<Oid> = Some(oid::TEXT);
    const ARRAY_OID: Option<Oid> = Some(oid::TEXT_ARRAY);
    const SIZE: WireSize = WireSize::Dynamic;
}

fn accepts_text(oid: Oid) -> bool {
    matches!(
        oid,
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::UNKNOWN
    )
}

fn decode_utf8(bytes: &[u8]) -> Result<&str> {
    simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Decode(format!("invalid UTF-8 in text value: {}", e)))
}

impl ToWire for str {
    fn wire_size(&self, _map: &OidMap) -> Result<i32> {
        Ok(self.len() as i32)
    }

    fn write(&self, _map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl ToWire for String {
    fn wire_size(&self, map: &OidMap) -> Result<i32> {
        self.as_str().wire_size(map)
    }

    fn write(&self, map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        self.as_str().write(map, buf)
    }
}

impl FromWire<'_> for String {
    fn accepts(oid: Oid, _map: &OidMap) -> bool {
        accepts_text(oid)
    }

    fn read(_oid: Oid, bytes: &[u8], _map: &OidMap) -> Result<Self> {
        decode_utf8(bytes).map(str::to_string)
    }
}

impl<'a> FromWire<'a> for &'a str {
    fn accepts(oid: Oid, _map: &OidMap) -> bool {
        accepts_text(oid)
    }

    fn read(_oid: Oid, bytes: &'a [u8], _map: &OidMap) -> Result<Self> {
        decode_utf8(bytes)
    }
}
