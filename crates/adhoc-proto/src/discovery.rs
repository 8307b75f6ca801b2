//! Reactive route discovery headers. RREQ and RREP each come in IPv4 and IPv6
//! variants distinguished by type tag rather than by an in-band length field.

use crate::wire::{
    le_ipv4,
    le_ipv6,
    le_mac,
    pack_ipv4,
    pack_ipv6,
    pack_mac,
};
use adhoc_common::MacAddr;
use alloc::vec::Vec;
use core::net::IpAddr;
use nom::{
    number::complete::{
        le_u32,
        le_u8,
    },
    IResult,
};

#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub enum AddressFamily {
    IPv4,
    IPv6,
}

fn unpack_ip(input: &[u8], family: AddressFamily) -> IResult<&[u8], IpAddr> {
    match family {
        AddressFamily::IPv4 => {
            let (input, addr) = le_ipv4(input)?;
            Ok((input, IpAddr::V4(addr)))
        }
        AddressFamily::IPv6 => {
            let (input, addr) = le_ipv6(input)?;
            Ok((input, IpAddr::V6(addr)))
        }
    }
}

fn pack_ip(buffer: &mut Vec<u8>, addr: &IpAddr) {
    match addr {
        IpAddr::V4(addr) => pack_ipv4(buffer, addr),
        IpAddr::V6(addr) => pack_ipv6(buffer, addr),
    }
}

fn family_of(addr: &IpAddr) -> AddressFamily {
    match addr {
        IpAddr::V4(_) => AddressFamily::IPv4,
        IpAddr::V6(_) => AddressFamily::IPv6,
    }
}

/// Route request, flooded hop-by-hop until it reaches the destination or a node that already
/// knows a route to it. `(src_ip, rreq_id)` is the de-duplication key kept in `SeenRequestSet`.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub struct RreqMessage {
    pub hop_count: u8,
    pub dst_ip: IpAddr,
    pub src_ip: IpAddr,
    pub rreq_id: u32,
    pub bcast_id: u32,
}

impl RreqMessage {
    /// Address family this instance would be packed with. Both `dst_ip` and `src_ip` are always
    /// the same family; mixed families are a programmer error upstream, not a wire concern.
    pub fn family(&self) -> AddressFamily {
        family_of(&self.dst_ip)
    }

    pub fn unpack(input: &[u8], family: AddressFamily) -> IResult<&[u8], Self> {
        let (input, hop_count) = le_u8(input)?;
        let (input, dst_ip) = unpack_ip(input, family)?;
        let (input, src_ip) = unpack_ip(input, family)?;
        let (input, rreq_id) = le_u32(input)?;
        let (input, bcast_id) = le_u32(input)?;
        Ok((
            input,
            Self {
                hop_count,
                dst_ip,
                src_ip,
                rreq_id,
                bcast_id,
            },
        ))
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.hop_count.to_le_bytes());
        pack_ip(&mut buffer, &self.dst_ip);
        pack_ip(&mut buffer, &self.src_ip);
        buffer.extend_from_slice(&self.rreq_id.to_le_bytes());
        buffer.extend_from_slice(&self.bcast_id.to_le_bytes());
        buffer
    }
}

/// Route reply, unicast back along the reverse path an RREQ installed. `tx_mac` is the MAC of the
/// node emitting this particular hop of the reply, so each intermediate can learn a route to
/// `src_ip` via the neighbor the reply arrived from.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub struct RrepMessage {
    pub hop_count: u8,
    pub dst_ip: IpAddr,
    pub src_ip: IpAddr,
    pub tx_mac: MacAddr,
}

impl RrepMessage {
    pub fn family(&self) -> AddressFamily {
        family_of(&self.dst_ip)
    }

    pub fn unpack(input: &[u8], family: AddressFamily) -> IResult<&[u8], Self> {
        let (input, hop_count) = le_u8(input)?;
        let (input, dst_ip) = unpack_ip(input, family)?;
        let (input, src_ip) = unpack_ip(input, family)?;
        let (input, tx_mac) = le_mac(input)?;
        Ok((
            input,
            Self {
                hop_count,
                dst_ip,
                src_ip,
                tx_mac,
            },
        ))
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.hop_count.to_le_bytes());
        pack_ip(&mut buffer, &self.dst_ip);
        pack_ip(&mut buffer, &self.src_ip);
        pack_mac(&mut buffer, &self.tx_mac);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::net::{
        Ipv4Addr,
        Ipv6Addr,
    };

    #[test]
    fn round_trips_rreq_v4() {
        let msg = RreqMessage {
            hop_count: 2,
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)),
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            rreq_id: 77,
            bcast_id: 5,
        };
        let packed = msg.pack();
        let (rest, decoded) = RreqMessage::unpack(&packed, AddressFamily::IPv4).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_rreq_v6() {
        let msg = RreqMessage {
            hop_count: 0,
            dst_ip: IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 3)),
            src_ip: IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1)),
            rreq_id: 1,
            bcast_id: 1,
        };
        let packed = msg.pack();
        let (rest, decoded) = RreqMessage::unpack(&packed, AddressFamily::IPv6).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_rrep_v4() {
        let msg = RrepMessage {
            hop_count: 1,
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)),
            tx_mac: MacAddr([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, 0x02]),
        };
        let packed = msg.pack();
        let (rest, decoded) = RrepMessage::unpack(&packed, AddressFamily::IPv4).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, msg);
    }
}
