//! Row decoding: tuples by position, declared structs by column name.

use crate::error::{Error, Result};
use crate::oid_map::OidMap;
use crate::protocol::backend::query::{DataRow, FieldDescription};

use super::{FromWire, read_frame};

/// Trait for decoding one result row into a Rust value.
pub trait FromRow<'a>: Sized {
    /// Decode a binary-format row.
    fn from_row(
        cols: &[FieldDescription<'_>],
        row: DataRow<'a>,
        map: &OidMap,
    ) -> Result<Self>;
}

/// Decode the cell at `index` against its column description.
pub fn decode_column<'a, T: FromWire<'a>>(
    cols: &[FieldDescription<'_>],
    row: &DataRow<'a>,
    index: usize,
    map: &OidMap,
) -> Result<T> {
    let col = cols
        .get(index)
        .ok_or_else(|| Error::Decode(format!("row has no column {}", index)))?;
    let cell = row
        .get(index)
        .ok_or_else(|| Error::Decode(format!("row data ends before column {}", index)))?;
    read_frame(col.type_oid(), cell, map)
}

/// Statements without result rows decode into the unit type.
impl FromRow<'_> for () {
    fn from_row(_cols: &[FieldDescription<'_>], _row: DataRow<'_>, _map: &OidMap) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_from_row_tuple {
    ($count:literal: $($idx:tt => $T:ident),+) => {
        impl<'a, $($T: FromWire<'a>),+> FromRow<'a> for ($($T,)+) {
            fn from_row(
                cols: &[FieldDescription<'_>],
                row: DataRow<'a>,
                map: &OidMap,
            ) -> Result<Self> {
                if cols.len() < $count {
                    return Err(Error::Decode(format!(
                        "row has {} columns, tuple needs {}",
                        cols.len(),
                        $count
                    )));
                }
                Ok(($(decode_column(cols, &row, $idx, map)?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1: 0 => T1);
impl_from_row_tuple!(2: 0 => T1, 1 => T2);
impl_from_row_tuple!(3: 0 => T1, 1 => T2, 2 => T3);
impl_from_row_tuple!(4: 0 => T1, 1 => T2, 2 => T3, 3 => T4);
impl_from_row_tuple!(5: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5);
impl_from_row_tuple!(6: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6);
impl_from_row_tuple!(7: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7);
impl_from_row_tuple!(8: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8);
impl_from_row_tuple!(9: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9);
impl_from_row_tuple!(10: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10);
impl_from_row_tuple!(11: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10, 10 => T11);
impl_from_row_tuple!(12: 0 => T1, 1 => T2, 2 => T3, 3 => T4, 4 => T5, 5 => T6, 6 => T7, 7 => T8, 8 => T9, 9 => T10, 10 => T11, 11 => T12);

/// Declare a struct decoded from result rows by column *name*.
///
/// Unlike tuples, field order does not need to match the SELECT list;
/// each field is looked up in the RowDescription by its own name.
///
/// ```ignore
/// surge_postgres::row_struct! {
///     #[derive(Debug)]
///     pub struct UserRow {
///         pub id: i64,
///         pub login: String,
///     }
/// }
/// ```
#[macro_export]
macro_rules! row_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field: $ty, )+
        }

        impl<'a> $crate::conversion::FromRow<'a> for $name {
            fn from_row(
                cols: &[$crate::protocol::backend::FieldDescription<'_>],
                row: $crate::protocol::backend::DataRow<'a>,
                map: &$crate::OidMap,
            ) -> $crate::Result<Self> {
                Ok(Self {
                    $(
                        $field: {
                            let index = cols
                                .iter()
                                .position(|c| c.name == stringify!($field))
                                .ok_or_else(|| $crate::Error::Decode(format!(
                                    "no column named `{}`",
                                    stringify!($field)
                                )))?;
                            $crate::conversion::decode_column(cols, &row, index, map)?
                        },
                    )+
                })
            }
        }
    };
}
