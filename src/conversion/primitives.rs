//! Primitive type bindings (bool, integers, floats, oid).

use crate::error::{Error, Result};
use crate::oid_map::OidMap;
use crate::protocol::types::{Oid, oid};

use super::{FromWire, PgType, ToWire, WireSize, check_size};

crate::pg_type!(bool: "bool", oid = oid::BOOL, array_oid = oid::BOOL_ARRAY, size = WireSize::Fixed(1));
crate::pg_type!(i16: "int2", oid = oid::INT2, array_oid = oid::INT2_ARRAY, size = WireSize::Fixed(2));
crate::pg_type!(i32: "int4", oid = oid::INT4, array_oid = oid::INT4_ARRAY, size = WireSize::Fixed(4));
crate::pg_type!(i64: "int8", oid = oid::INT8, array_oid = oid::INT8_ARRAY, size = WireSize::Fixed(8));
crate::pg_type!(f32: "float4", oid = oid::FLOAT4, array_oid = oid::FLOAT4_ARRAY, size = WireSize::Fixed(4));
crate::pg_type!(f64: "float8", oid = oid::FLOAT8, array_oid = oid::FLOAT8_ARRAY, size = WireSize::Fixed(8));

impl ToWire for bool {
    fn wire_size(&self, _map: &OidMap) -> Result<i32> {
        Ok(1)
    }

    fn write(&self, _map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        buf.push(u8::from(*self));
        Ok(())
    }
}

impl FromWire<'_> for bool {
    fn accepts(oid: Oid, _map: &OidMap) -> bool {
        oid == oid::BOOL
    }

    fn read(_oid: Oid, bytes: &[u8], _map: &OidMap) -> Result<Self> {
        check_size(bytes, 1)?;
        Ok(bytes[0] != 0)
    }
}

macro_rules! impl_int {
    ($ty:ty, $bytes:expr, accepts: [$($oid:path),+], read: $read:expr) => {
        impl ToWire for $ty {
            fn wire_size(&self, _map: &OidMap) -> Result<i32> {
                Ok($bytes)
            }

            fn write(&self, _map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
                buf.extend_from_slice(&self.to_be_bytes());
                Ok(())
            }
        }

        impl FromWire<'_> for $ty {
            fn accepts(oid: Oid, _map: &OidMap) -> bool {
                matches!(oid, $($oid)|+)
            }

            fn read(oid: Oid, bytes: &[u8], _map: &OidMap) -> Result<Self> {
                #[allow(clippy::redundant_closure_call)]
                ($read)(oid, bytes)
            }
        }
    };
}

fn read_exact<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    check_size(bytes, N)?;
    bytes
        .try_into()
        .map_err(|_| Error::Decode("length changed under us".into()))
}

// Narrower integer columns widen implicitly; the converse never happens.

impl_int!(i16, 2, accepts: [oid::INT2], read: |_oid, bytes: &[u8]| {
    Ok(i16::from_be_bytes(read_exact::<2>(bytes)?))
});

impl_int!(i32, 4, accepts: [oid::INT2, oid::INT4], read: |oid, bytes: &[u8]| {
    match oid {
        oid::INT2 => Ok(i16::from_be_bytes(read_exact::<2>(bytes)?) as i32),
        _ => Ok(i32::from_be_bytes(read_exact::<4>(bytes)?)),
    }
});

impl_int!(i64, 8, accepts: [oid::INT2, oid::INT4, oid::INT8], read: |oid, bytes: &[u8]| {
    match oid {
        oid::INT2 => Ok(i16::from_be_bytes(read_exact::<2>(bytes)?) as i64),
        oid::INT4 => Ok(i32::from_be_bytes(read_exact::<4>(bytes)?) as i64),
        _ => Ok(i64::from_be_bytes(read_exact::<8>(bytes)?)),
    }
});

impl_int!(f32, 4, accepts: [oid::FLOAT4], read: |_oid, bytes: &[u8]| {
    Ok(f32::from_be_bytes(read_exact::<4>(bytes)?))
});

impl_int!(f64, 8, accepts: [oid::FLOAT4, oid::FLOAT8], read: |oid, bytes: &[u8]| {
    match oid {
        oid::FLOAT4 => Ok(f32::from_be_bytes(read_exact::<4>(bytes)?) as f64),
        _ => Ok(f64::from_be_bytes(read_exact::<8>(bytes)?)),
    }
});

/// Catalog OID values (`pg_type.oid` etc.) decode as plain `u32`.
pub struct PgOid(pub Oid);

impl PgType for PgOid {
    const NAME: &'static str = "oid";
    const OID: Option<Oid> = Some(oid::OID);
    const SIZE: WireSize = WireSize::Fixed(4);
}

impl ToWire for PgOid {
    fn wire_size(&self, _map: &OidMap) -> Result<i32> {
        Ok(4)
    }

    fn write(&self, _map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.0.to_be_bytes());
        Ok(())
    }
}

impl FromWire<'_> for PgOid {
    fn accepts(oid: Oid, _map: &OidMap) -> bool {
        oid == oid::OID
    }

    fn read(_oid: Oid, bytes: &[u8], _map: &OidMap) -> Result<Self> {
        Ok(PgOid(u32::from_be_bytes(read_exact::<4>(bytes)?)))
    }
}
