//! Byte string bindings (bytea).

use crate::error::Result;
use crate::oid_map::OidMap;
use crate::protocol::types::{Oid, oid};

use super::{FromWire, PgType, ToWire, WireSize};

crate::pg_type!(Vec<u8>: "bytea", oid = oid::BYTEA, array_oid = oid::BYTEA_ARRAY, size = WireSize::Dynamic);

impl PgType for [u8] {
    const NAME: &'static str = "bytea";
    const ARRAY_NAME: &'static str = "_bytea";
    const OID: Option<Oid> = Some(oid::BYTEA);
    const ARRAY_OID: Option<Oid> = Some(oid::BYTEA_ARRAY);
    const SIZE: WireSize = WireSize::Dynamic;
}

impl ToWire for [u8] {
    fn wire_size(&self, _map: &OidMap) -> Result<i32> {
        Ok(self.len() as i32)
    }

    fn write(&self, _map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl ToWire for Vec<u8> {
    fn wire_size(&self, map: &OidMap) -> Result<i32> {
        self.as_slice().wire_size(map)
    }

    fn write(&self, map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        self.as_slice().write(map, buf)
    }
}

impl FromWire<'_> for Vec<u8> {
    fn accepts(oid: Oid, _map: &OidMap) -> bool {
        oid == oid::BYTEA
    }

    fn read(_oid: Oid, bytes: &[u8], _map: &OidMap) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl<'a> FromWire<'a> for &'a [u8] {
    fn accepts(oid: Oid, _map: &OidMap) -> bool {
        oid == oid::BYTEA
    }

    fn read(_oid: Oid, bytes: &'a [u8], _map: &OidMap) -> Result<Self> {
        Ok(bytes)
    }
}
