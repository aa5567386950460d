//! Composite (row type) bindings.
//!
//! Wire layout: `i32 nfields` followed by one typed frame per field,
//! `u32 oid; i32 size; bytes`. Fields are positional; the receive path
//! checks the field count against the target's arity.

use crate::error::{Error, Result};
use crate::oid_map::OidMap;
use crate::protocol::codec::{read_i32, read_u32};
use crate::protocol::types::{Oid, oid};

use super::{FromWire, ToWire, read_frame, write_frame};

/// Write one typed frame of a composite: the field's OID, then its data
/// frame. Used by [`composite_type!`].
pub fn write_composite_field<T: ToWire>(value: &T, map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
    let field_oid = T::oid(map)?;
    buf.extend_from_slice(&field_oid.to_be_bytes());
    write_frame(value, map, buf)
}

/// Cursor over the typed frames of a composite payload.
pub struct CompositeFields<'a> {
    remaining: &'a [u8],
}

impl<'a> CompositeFields<'a> {
    /// Parse the header, requiring exactly `expected` fields.
    pub fn parse(bytes: &'a [u8], expected: usize, rust_type: &'static str) -> Result<Self> {
        let (nfields, remaining) = read_i32(bytes)?;
        if nfields != expected as i32 {
            return Err(Error::Decode(format!(
                "composite field count mismatch for {}: expected {}, got {}",
                rust_type, expected, nfields
            )));
        }
        Ok(Self { remaining })
    }

    /// Read the next typed frame into `T`.
    pub fn next_field<T: FromWire<'a>>(&mut self, map: &OidMap) -> Result<T> {
        let (field_oid, rest) = read_u32(self.remaining)?;
        let (size, rest) = read_i32(rest)?;

        let (cell, rest) = if size < 0 {
            (None, rest)
        } else {
            let Some((bytes, rest)) = rest.split_at_checked(size as usize) else {
                return Err(Error::Decode("composite field overruns payload".into()));
            };
            (Some(bytes), rest)
        };

        self.remaining = rest;
        read_frame(field_oid, cell, map)
    }
}

/// Declare a Rust struct as a PostgreSQL composite type.
///
/// Fields are encoded and decoded positionally, matching the declared
/// order of the database type. The type and its array companion get OID
/// map entries, so the declaring source must register it.
///
/// ```ignore
/// surge_postgres::composite_type! {
///     #[derive(Debug, PartialEq)]
///     pub struct InventoryItem as "inventory_item" {
///         pub name: String,
///         pub supplier_id: i32,
///     }
/// }
/// ```
#[macro_export]
macro_rules! composite_type {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident as $pg_name:literal {
            $( $fvis:vis $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $fvis $field: $ty, )+
        }

        $crate::pg_type!($name: $pg_name);
        $crate::pg_array!($name);

        impl $crate::conversion::ToWire for $name {
            fn wire_size(&self, map: &$crate::OidMap) -> $crate::Result<i32> {
                let mut size = 4_i32;
                $(
                    size += 8;
                    let field_size = $crate::conversion::ToWire::wire_size(&self.$field, map)?;
                    if field_size > 0 {
                        size += field_size;
                    }
                )+
                Ok(size)
            }

            fn write(&self, map: &$crate::OidMap, buf: &mut Vec<u8>) -> $crate::Result<()> {
                const FIELDS: i32 = [$(stringify!($field)),+].len() as i32;
                buf.extend_from_slice(&FIELDS.to_be_bytes());
                $( $crate::conversion::write_composite_field(&self.$field, map, buf)?; )+
                Ok(())
            }
        }

        impl<'a> $crate::conversion::FromWire<'a> for $name {
            fn accepts(oid: $crate::protocol::types::Oid, map: &$crate::OidMap) -> bool {
                oid == $crate::protocol::types::oid::RECORD
                    || <Self as $crate::conversion::PgType>::oid(map).is_ok_and(|o| o == oid)
            }

            fn read(
                _oid: $crate::protocol::types::Oid,
                bytes: &'a [u8],
                map: &$crate::OidMap,
            ) -> $crate::Result<Self> {
                const FIELDS: usize = [$(stringify!($field)),+].len();
                let mut fields = $crate::conversion::CompositeFields::parse(
                    bytes,
                    FIELDS,
                    std::any::type_name::<Self>(),
                )?;
                Ok(Self {
                    $( $field: fields.next_field(map)?, )+
                })
            }
        }
    };
}

// Anonymous records (`SELECT (1, 'x')`) decode into tuples; arity is
// checked, the record OID itself cannot be.

macro_rules! impl_record_tuple {
    ($count:expr, $($idx:tt: $T:ident),+) => {
        impl<'a, $($T: FromWire<'a>),+> FromWire<'a> for ($($T,)+) {
            fn accepts(oid: Oid, _map: &OidMap) -> bool {
                oid == oid::RECORD
            }

            fn read(_oid: Oid, bytes: &'a [u8], map: &OidMap) -> Result<Self> {
                let mut fields = CompositeFields::parse(
                    bytes,
                    $count,
                    std::any::type_name::<Self>(),
                )?;
                Ok(($(
                    {
                        let value: $T = fields.next_field(map)?;
                        value
                    },
                )+))
            }
        }
    };
}

impl_record_tuple!(1, 0: T0);
impl_record_tuple!(2, 0: T0, 1: T1);
impl_record_tuple!(3, 0: T0, 1: T1, 2: T2);
impl_record_tuple!(4, 0: T0, 1: T1, 2: T2, 3: T3);
impl_record_tuple!(5, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4);
impl_record_tuple!(6, 0: T0, 1: T1, 2: T2, 3: T3, 4: T4, 5: T5);
