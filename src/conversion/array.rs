//! One-dimensional array bindings.
//!
//! Wire layout: `i32 ndim; i32 has_nulls; i32 element_oid;` then per
//! dimension `i32 size; i32 lower_bound;` then one data frame per
//! element. Send always uses `ndim = 1`; receive additionally accepts
//! `ndim = 0` (the empty array) and rejects higher ranks.

use crate::error::{Error, Result};
use crate::oid_map::OidMap;
use crate::protocol::codec::{read_i32, read_u32};

use super::{FromWire, PgType, ToWire, write_frame};

/// Append a full array payload for `items`. Used by [`pg_array!`].
pub fn write_array_of<T: ToWire>(items: &[T], map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
    let element_oid = T::oid(map)?;
    let has_nulls = items.iter().any(ToWire::is_null);

    buf.extend_from_slice(&1_i32.to_be_bytes());
    buf.extend_from_slice(&i32::from(has_nulls).to_be_bytes());
    buf.extend_from_slice(&element_oid.to_be_bytes());
    buf.extend_from_slice(&(items.len() as i32).to_be_bytes());
    buf.extend_from_slice(&1_i32.to_be_bytes()); // lower bound

    for item in items {
        write_frame(item, map, buf)?;
    }
    Ok(())
}

/// Payload size of the array for `items`. Used by [`pg_array!`].
pub fn array_size_of<T: ToWire>(items: &[T], map: &OidMap) -> Result<i32> {
    let mut size = 20_i32;
    for item in items {
        size += 4;
        let item_size = item.wire_size(map)?;
        if item_size > 0 {
            size += item_size;
        }
    }
    Ok(size)
}

/// Parse a one-dimensional array of `T`. Used by [`pg_array!`].
pub fn read_array_of<'a, T>(
    rust_type: &'static str,
    bytes: &'a [u8],
    map: &OidMap,
) -> Result<Vec<T>>
where
    T: FromWire<'a>,
{
    let (ndim, rest) = read_i32(bytes)?;
    let (_has_nulls, rest) = read_i32(rest)?;
    let (element_oid, rest) = read_u32(rest)?;

    match ndim {
        0 => return Ok(Vec::new()),
        1 => {}
        // only rank one is representable; higher ranks are a mismatch
        _ => return Err(Error::type_mismatch(rust_type, element_oid)),
    }

    if !T::accepts(element_oid, map) {
        return Err(Error::type_mismatch(rust_type, element_oid));
    }

    let (len, rest) = read_i32(rest)?;
    let (_lower_bound, mut rest) = read_i32(rest)?;
    if len < 0 {
        return Err(Error::Decode(format!("negative array dimension: {}", len)));
    }

    let mut items = Vec::with_capacity(len as usize);
    for _ in 0..len {
        let (cell_len, after_len) = read_i32(rest)?;
        let (cell, after_cell) = if cell_len < 0 {
            (None, after_len)
        } else {
            let Some((bytes, after)) = after_len.split_at_checked(cell_len as usize) else {
                return Err(Error::Decode("array element overruns payload".into()));
            };
            (Some(bytes), after)
        };

        match cell {
            None => items.push(T::from_null()?),
            Some(bytes) => items.push(T::read(element_oid, bytes, map)?),
        }
        rest = after_cell;
    }

    Ok(items)
}

/// Declare array support for an element type: binds `Vec<T>` and
/// `Vec<Option<T>>` to the element's array companion type.
#[macro_export]
macro_rules! pg_array {
    ($elem:ty) => {
        $crate::pg_array!(@impl $elem);
        $crate::pg_array!(@impl Option<$elem>);
    };
    (@impl $elem:ty) => {
        impl $crate::conversion::PgType for Vec<$elem> {
            const NAME: &'static str = <$elem as $crate::conversion::PgType>::ARRAY_NAME;
            const OID: Option<$crate::protocol::types::Oid> =
                <$elem as $crate::conversion::PgType>::ARRAY_OID;
            const SIZE: $crate::conversion::WireSize = $crate::conversion::WireSize::Dynamic;
        }

        impl $crate::conversion::ToWire for Vec<$elem> {
            fn wire_size(
                &self,
                map: &$crate::OidMap,
            ) -> $crate::Result<i32> {
                $crate::conversion::array_size_of(self.as_slice(), map)
            }

            fn write(
                &self,
                map: &$crate::OidMap,
                buf: &mut Vec<u8>,
            ) -> $crate::Result<()> {
                $crate::conversion::write_array_of(self.as_slice(), map, buf)
            }
        }

        impl<'a> $crate::conversion::FromWire<'a> for Vec<$elem> {
            fn accepts(oid: $crate::protocol::types::Oid, map: &$crate::OidMap) -> bool {
                <Self as $crate::conversion::PgType>::oid(map).is_ok_and(|o| o == oid)
            }

            fn read(
                _oid: $crate::protocol::types::Oid,
                bytes: &'a [u8],
                map: &$crate::OidMap,
            ) -> $crate::Result<Self> {
                $crate::conversion::read_array_of(std::any::type_name::<Self>(), bytes, map)
            }
        }
    };
}

pg_array!(bool);
pg_array!(i16);
pg_array!(i32);
pg_array!(i64);
pg_array!(f32);
pg_array!(f64);
pg_array!(String);
pg_array!(std::net::IpAddr);
pg_array!(serde_json::Value);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{read_frame, write_frame};
    use crate::protocol::types::oid;

    fn array_round_trip<T>(value: Vec<T>) -> Vec<T>
    where
        Vec<T>: ToWire + for<'a> FromWire<'a> + PgType,
    {
        let map = OidMap::new();
        let mut buf = Vec::new();
        write_frame(&value, &map, &mut buf).unwrap();
        let oid = <Vec<T> as PgType>::OID.unwrap();
        read_frame(oid, Some(&buf[4..]), &map).unwrap()
    }

    #[test]
    fn text_array_round_trips_in_order() {
        let items = vec!["foo".to_string(), "buzz".to_string(), "bar".to_string()];
        assert_eq!(array_round_trip(items.clone()), items);
    }

    #[test]
    fn int_array_preserves_null_positions() {
        let items = vec![Some(1_i32), None, Some(3)];
        assert_eq!(array_round_trip(items.clone()), items);
    }

    #[test]
    fn empty_array_round_trips() {
        assert_eq!(array_round_trip(Vec::<i64>::new()), Vec::<i64>::new());
    }

    #[test]
    fn zero_dimensions_decode_as_empty() {
        let map = OidMap::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&0_i32.to_be_bytes());
        payload.extend_from_slice(&0_i32.to_be_bytes());
        payload.extend_from_slice(&oid::INT4.to_be_bytes());

        let items: Vec<i32> = read_frame(oid::INT4_ARRAY, Some(&payload), &map).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn multi_dimensional_input_is_rejected() {
        let map = OidMap::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&2_i32.to_be_bytes());
        payload.extend_from_slice(&0_i32.to_be_bytes());
        payload.extend_from_slice(&oid::INT4.to_be_bytes());
        payload.extend_from_slice(&[0; 16]);

        let err = read_frame::<Vec<i32>>(oid::INT4_ARRAY, Some(&payload), &map).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn null_into_plain_element_fails() {
        let map = OidMap::new();
        let mut buf = Vec::new();
        write_frame(&vec![Some(5_i32), None], &map, &mut buf).unwrap();

        let err = read_frame::<Vec<i32>>(oid::INT4_ARRAY, Some(&buf[4..]), &map).unwrap_err();
        assert!(matches!(err, Error::UnexpectedNull));
    }

    #[test]
    fn element_oid_mismatch_is_rejected() {
        let map = OidMap::new();
        let mut buf = Vec::new();
        write_frame(&vec!["a".to_string()], &map, &mut buf).unwrap();

        // text array payload into an int4 vector target
        let err = read_frame::<Vec<i32>>(oid::INT4_ARRAY, Some(&buf[4..]), &map).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }
}
