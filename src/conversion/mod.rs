//! Type encoding and decoding for the PostgreSQL binary format.
//!
//! Every supported Rust type is bound to a PostgreSQL type through
//! [`PgType`], writes itself through [`ToWire`] and reads itself through
//! [`FromWire`]. All three are parameterized by the connection's
//! [`OidMap`](crate::OidMap) so user-defined types resolve their OIDs at
//! run time while built-ins stay compile-time constants.

mod array;
mod bytes;
mod composite;
mod json;
mod net;
mod primitives;
mod row;
mod string;

#[cfg(feature = "with-uuid")]
mod uuid;

pub use array::{array_size_of, read_array_of, write_array_of};
pub use composite::{CompositeFields, write_composite_field};
pub use primitives::PgOid;
pub use row::{FromRow, decode_column};

use crate::error::{Error, Result};
use crate::oid_map::OidMap;
use crate::protocol::types::Oid;

/// Wire size classifier of a registered type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireSize {
    /// Payload is always exactly this many bytes.
    Fixed(usize),
    /// Payload size depends on the value.
    Dynamic,
}

/// Compile-time binding of a Rust type to a PostgreSQL type.
///
/// Built-in bindings carry their OIDs as constants; user-defined types
/// leave them `None` and rely on the OID map filled at connect time.
pub trait PgType {
    /// PostgreSQL type name, e.g. `"int4"`.
    const NAME: &'static str;
    /// Name of the array companion type, e.g. `"_int4"`. Empty when the
    /// type has no array companion.
    const ARRAY_NAME: &'static str = "";
    /// Compile-time OID, `None` for user-defined types.
    const OID: Option<Oid>;
    /// Compile-time OID of the array companion.
    const ARRAY_OID: Option<Oid> = None;
    /// Wire size classifier.
    const SIZE: WireSize;

    /// The OID of this type, consulting the map for user-defined types.
    fn oid(map: &OidMap) -> Result<Oid> {
        match Self::OID {
            Some(oid) => Ok(oid),
            None => map.oid_of(Self::NAME),
        }
    }

    /// The OID of the array companion type.
    fn array_oid(map: &OidMap) -> Result<Oid> {
        match Self::ARRAY_OID {
            Some(oid) => Ok(oid),
            None => map.oid_of(Self::ARRAY_NAME),
        }
    }
}

/// Binding of a Rust type to a PostgreSQL type.
///
/// Declares the type name, OIDs and size classifier; the array companion
/// name is derived by prefixing an underscore the way `pg_type` names
/// array types.
#[macro_export]
macro_rules! pg_type {
    ($ty:ty: $name:literal, oid = $oid:expr, array_oid = $array_oid:expr, size = $size:expr) => {
        impl $crate::conversion::PgType for $ty {
            const NAME: &'static str = $name;
            const ARRAY_NAME: &'static str = concat!("_", $name);
            const OID: Option<$crate::protocol::types::Oid> = Some($oid);
            const ARRAY_OID: Option<$crate::protocol::types::Oid> = Some($array_oid);
            const SIZE: $crate::conversion::WireSize = $size;
        }
    };
    // user-defined type: OIDs come from the map
    ($ty:ty: $name:literal) => {
        impl $crate::conversion::PgType for $ty {
            const NAME: &'static str = $name;
            const ARRAY_NAME: &'static str = concat!("_", $name);
            const OID: Option<$crate::protocol::types::Oid> = None;
            const ARRAY_OID: Option<$crate::protocol::types::Oid> = None;
            const SIZE: $crate::conversion::WireSize = $crate::conversion::WireSize::Dynamic;
        }
    };
}

/// Trait for writing a value in PostgreSQL binary format.
pub trait ToWire: PgType {
    /// Payload byte size, or -1 when the value is SQL NULL.
    ///
    /// Fixed-size types return their declared size, dynamic types compute
    /// it from the value.
    fn wire_size(&self, map: &OidMap) -> Result<i32>;

    /// Append the payload, without any length prefix. Never called for a
    /// value in null state.
    fn write(&self, map: &OidMap, buf: &mut Vec<u8>) -> Result<()>;

    /// Whether the value is in SQL NULL state.
    fn is_null(&self) -> bool {
        false
    }
}

/// Trait for reading a value from PostgreSQL binary format.
pub trait FromWire<'a>: Sized {
    /// Whether a value tagged with `oid` can decode into `Self`.
    fn accepts(oid: Oid, map: &OidMap) -> bool;

    /// Decode from SQL NULL. The default fails; nullable wrappers
    /// override it.
    fn from_null() -> Result<Self> {
        Err(Error::UnexpectedNull)
    }

    /// Decode the payload. `oid` has already passed [`accepts`][Self::accepts].
    fn read(oid: Oid, bytes: &'a [u8], map: &OidMap) -> Result<Self>;
}

/// Write a data frame: `i32` size followed by the payload, or `-1` for
/// NULL. The size field is back-filled after the payload is written.
pub fn write_frame<T: ToWire + ?Sized>(value: &T, map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
    if value.is_null() {
        buf.extend_from_slice(&(-1_i32).to_be_bytes());
        return Ok(());
    }

    let size_pos = buf.len();
    buf.extend_from_slice(&[0, 0, 0, 0]);
    value.write(map, buf)?;
    let size = (buf.len() - size_pos - 4) as i32;
    buf[size_pos..size_pos + 4].copy_from_slice(&size.to_be_bytes());
    Ok(())
}

/// Decode one cell, applying OID and NULL discipline.
///
/// Rejects an OID the target does not accept, turns NULL into the
/// target's null state (failing for non-nullable targets) and otherwise
/// delegates to [`FromWire::read`].
pub fn read_frame<'a, T: FromWire<'a>>(
    oid: Oid,
    cell: Option<&'a [u8]>,
    map: &OidMap,
) -> Result<T> {
    if !T::accepts(oid, map) {
        return Err(Error::type_mismatch(std::any::type_name::<T>(), oid));
    }
    match cell {
        None => T::from_null(),
        Some(bytes) => T::read(oid, bytes, map),
    }
}

/// Check a fixed-size payload length.
#[inline]
pub(crate) fn check_size(bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(Error::BadObjectSize {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

// === Option<T>: the nullable wrapper ===

impl<T: PgType> PgType for Option<T> {
    const NAME: &'static str = T::NAME;
    const ARRAY_NAME: &'static str = T::ARRAY_NAME;
    const OID: Option<Oid> = T::OID;
    const ARRAY_OID: Option<Oid> = T::ARRAY_OID;
    const SIZE: WireSize = T::SIZE;
}

impl<T: ToWire> ToWire for Option<T> {
    fn wire_size(&self, map: &OidMap) -> Result<i32> {
        match self {
            Some(v) => v.wire_size(map),
            None => Ok(-1),
        }
    }

    fn write(&self, map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Some(v) => v.write(map, buf),
            None => Ok(()),
        }
    }

    fn is_null(&self) -> bool {
        self.is_none()
    }
}

impl<'a, T: FromWire<'a>> FromWire<'a> for Option<T> {
    fn accepts(oid: Oid, map: &OidMap) -> bool {
        T::accepts(oid, map)
    }

    fn from_null() -> Result<Self> {
        Ok(None)
    }

    fn read(oid: Oid, bytes: &'a [u8], map: &OidMap) -> Result<Self> {
        T::read(oid, bytes, map).map(Some)
    }
}

// === References ===

impl<T: PgType + ?Sized> PgType for &T {
    const NAME: &'static str = T::NAME;
    const ARRAY_NAME: &'static str = T::ARRAY_NAME;
    const OID: Option<Oid> = T::OID;
    const ARRAY_OID: Option<Oid> = T::ARRAY_OID;
    const SIZE: WireSize = T::SIZE;
}

impl<T: ToWire + ?Sized> ToWire for &T {
    fn wire_size(&self, map: &OidMap) -> Result<i32> {
        (*self).wire_size(map)
    }

    fn write(&self, map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        (*self).write(map, buf)
    }

    fn is_null(&self) -> bool {
        (*self).is_null()
    }
}

// === Parameter tuples ===

/// An ordered set of typed query parameters.
pub trait ToParams {
    /// Number of parameters.
    fn param_count(&self) -> usize;

    /// OIDs of all parameters, resolved against the map.
    fn param_oids(&self, map: &OidMap) -> Result<Vec<Oid>>;

    /// Write every parameter as a data frame, back to back.
    fn write_frames(&self, map: &OidMap, buf: &mut Vec<u8>) -> Result<()>;
}

impl ToParams for () {
    fn param_count(&self) -> usize {
        0
    }

    fn param_oids(&self, _map: &OidMap) -> Result<Vec<Oid>> {
        Ok(Vec::new())
    }

    fn write_frames(&self, _map: &OidMap, _buf: &mut Vec<u8>) -> Result<()> {
        Ok(())
    }
}

impl<T: ToParams + ?Sized> ToParams for &T {
    fn param_count(&self) -> usize {
        (*self).param_count()
    }

    fn param_oids(&self, map: &OidMap) -> Result<Vec<Oid>> {
        (*self).param_oids(map)
    }

    fn write_frames(&self, map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        (*self).write_frames(map, buf)
    }
}

macro_rules! impl_to_params {
    ($count:expr, $($idx:tt: $T:ident),+) => {
        impl<$($T: ToWire),+> ToParams for ($($T,)+) {
            fn param_count(&self) -> usize {
                $count
            }

            fn param_oids(&self, map: &OidMap) -> Result<Vec<Oid>> {
                Ok(vec![$($T::oid(map)?),+])
            }

            fn write_frames(&self, map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
                $(write_frame(&self.$idx, map, buf)?;)+
                Ok(())
            }
        }
    };
}

impl_to_params!(1, 0: T0);
impl_to_params!(2, 0: T0, 1: T1);
impl_to_params!(3, 0: T0, 1: T1, 2: T2);
impl_to_params!(4, 0: T0, 1: T1, 2: T2, 3: T3);
impl_to_params!(5, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_to_params!(6, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
impl_to_params!(7, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6);
impl_to_params!(8, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7);
impl_to_params!(9, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8);
impl_to_params!(10, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9);
impl_to_params!(11, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10);
impl_to_params!(12, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5, 6: T6, 7: T7, 8: T8, 9: T9, 10: T10, 11: T11);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_null_state() {
        assert_eq!(Option::<i32>::from_null().unwrap(), None);
        assert!(matches!(i32::from_null(), Err(Error::UnexpectedNull)));
    }

    #[test]
    fn null_frame_is_minus_one() {
        let map = OidMap::new();
        let mut buf = Vec::new();
        write_frame(&Option::<i32>::None, &map, &mut buf).unwrap();
        assert_eq!(buf, (-1_i32).to_be_bytes());
    }

    #[test]
    fn frame_backfills_size() {
        let map = OidMap::new();
        let mut buf = Vec::new();
        write_frame(&7_i32, &map, &mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 4, 0, 0, 0, 7]);
    }

    #[test]
    fn read_frame_rejects_wrong_oid() {
        let map = OidMap::new();
        let err = read_frame::<i32>(25, Some(&[0, 0, 0, 7]), &map).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { oid: 25, .. }));
    }
}
