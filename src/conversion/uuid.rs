//! UUID bindings (behind the `with-uuid` feature).

use uuid::Uuid;

use crate::error::Result;
use crate::oid_map::OidMap;
use crate::protocol::types::{Oid, oid};

use super::{FromWire, PgType, ToWire, WireSize, check_size};

crate::pg_type!(Uuid: "uuid", oid = oid::UUID, array_oid = oid::UUID_ARRAY, size = WireSize::Fixed(16));
crate::pg_array!(Uuid);

impl ToWire for Uuid {
    fn wire_size(&self, _map: &OidMap) -> Result<i32> {
        Ok(16)
    }

    fn write(&self, _map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl FromWire<'_> for Uuid {
    fn accepts(oid: Oid, _map: &OidMap) -> bool {
        oid == oid::UUID
    }

    fn read(_oid: Oid, bytes: &[u8], _map: &OidMap) -> Result<Self> {
        check_size(bytes, 16)?;
        let mut raw = [0u8; 16];
        raw.copy_from_slice(bytes);
        Ok(Uuid::from_bytes(raw))
    }
}
