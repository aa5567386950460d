//! Network address bindings (inet).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};
use crate::oid_map::OidMap;
use crate::protocol::types::{Oid, oid};

use super::{FromWire, ToWire, WireSize, check_size};

// address families as encoded by the server: AF_INET and AF_INET + 1
const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

crate::pg_type!(IpAddr: "inet", oid = oid::INET, array_oid = oid::INET_ARRAY, size = WireSize::Dynamic);

impl ToWire for IpAddr {
    fn wire_size(&self, _map: &OidMap) -> Result<i32> {
        Ok(match self {
            IpAddr::V4(_) => 8,
            IpAddr::V6(_) => 20,
        })
    }

    fn write(&self, _map: &OidMap, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            IpAddr::V4(addr) => {
                buf.extend_from_slice(&[PGSQL_AF_INET, 32, 0, 4]);
                buf.extend_from_slice(&addr.octets());
            }
            IpAddr::V6(addr) => {
                buf.extend_from_slice(&[PGSQL_AF_INET6, 128, 0, 16]);
                buf.extend_from_slice(&addr.octets());
            }
        }
        Ok(())
    }
}

impl FromWire<'_> for IpAddr {
    fn accepts(oid: Oid, _map: &OidMap) -> bool {
        matches!(oid, oid::INET | oid::CIDR)
    }

    fn read(_oid: Oid, bytes: &[u8], _map: &OidMap) -> Result<Self> {
        let [family, _bits, _is_cidr, nb, addr @ ..] = bytes else {
            return Err(Error::Decode(format!(
                "inet payload too short: {} bytes",
                bytes.len()
            )));
        };

        match (*family, *nb) {
            (PGSQL_AF_INET, 4) => {
                check_size(addr, 4)?;
                let mut octets = [0u8; 4];
                octets.copy_from_slice(addr);
                Ok(IpAddr::V4(Ipv4Addr::from(octets)))
            }
            (PGSQL_AF_INET6, 16) => {
                check_size(addr, 16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(addr);
                Ok(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            (family, nb) => Err(Error::Decode(format!(
                "unsupported inet family {} with {} address bytes",
                family, nb
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::{read_frame, write_frame};

    #[test]
    fn ipv4_round_trips() {
        let map = OidMap::new();
        let addr: IpAddr = "192.168.0.1".parse().unwrap();

        let mut buf = Vec::new();
        write_frame(&addr, &map, &mut buf).unwrap();
        assert_eq!(&buf[4..], &[2, 32, 0, 4, 192, 168, 0, 1]);

        let back: IpAddr = read_frame(oid::INET, Some(&buf[4..]), &map).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn ipv6_round_trips() {
        let map = OidMap::new();
        let addr: IpAddr = "::1".parse().unwrap();

        let mut buf = Vec::new();
        write_frame(&addr, &map, &mut buf).unwrap();
        let back: IpAddr = read_frame(oid::INET, Some(&buf[4..]), &map).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn garbage_family_is_a_decode_error() {
        let map = OidMap::new();
        let err = read_frame::<IpAddr>(oid::INET, Some(&[9, 32, 0, 4, 1, 2, 3, 4]), &map)
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
