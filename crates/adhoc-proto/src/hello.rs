//! HELLO is the neighbor-discovery beacon. It is the only header kind whose type
//! tag carries flag bits instead of just a kind number: the high nibble records which optional IP
//! suffixes are present, so the receive path can size the fixed+variable layout without
//! out-of-band knowledge.

use crate::wire::{
    le_ipv4,
    le_ipv6,
    pack_ipv4,
    pack_ipv6,
};
use alloc::vec::Vec;
use bitflags::bitflags;
use core::net::{
    Ipv4Addr,
    Ipv6Addr,
};
use nom::{
    number::complete::le_u32,
    IResult,
};

bitflags! {
    /// High nibble of the HELLO type tag. Low nibble is reserved for the kind number.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
    pub struct HelloFlags: u8 {
        const HAS_IPV4 = 0b0001_0000;
        const HAS_IPV6 = 0b0010_0000;
    }
}

/// Periodic beacon advertising this node's identity and reachable IP addresses to every neighbor
/// within radio range.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub struct HelloMessage {
    pub node_id: u32,
    pub tx_count: u32,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl HelloMessage {
    /// Flag bits this instance would be packed with. Used by the top-level dispatcher to compute
    /// the type tag byte before the fixed fields are written.
    pub fn flags(&self) -> HelloFlags {
        let mut flags = HelloFlags::empty();
        if self.ipv4.is_some() {
            flags |= HelloFlags::HAS_IPV4;
        }
        if self.ipv6.is_some() {
            flags |= HelloFlags::HAS_IPV6;
        }
        flags
    }

    pub fn unpack(input: &[u8], flags: HelloFlags) -> IResult<&[u8], Self> {
        let (input, node_id) = le_u32(input)?;
        let (input, tx_count) = le_u32(input)?;
        let (input, ipv4) = if flags.contains(HelloFlags::HAS_IPV4) {
            let (input, addr) = le_ipv4(input)?;
            (input, Some(addr))
        } else {
            (input, None)
        };
        let (input, ipv6) = if flags.contains(HelloFlags::HAS_IPV6) {
            let (input, addr) = le_ipv6(input)?;
            (input, Some(addr))
        } else {
            (input, None)
        };

        Ok((
            input,
            Self {
                node_id,
                tx_count,
                ipv4,
                ipv6,
            },
        ))
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.node_id.to_le_bytes());
        buffer.extend_from_slice(&self.tx_count.to_le_bytes());
        if let Some(ipv4) = &self.ipv4 {
            pack_ipv4(&mut buffer, ipv4);
        }
        if let Some(ipv6) = &self.ipv6 {
            pack_ipv6(&mut buffer, ipv6);
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_dual_stack() {
        let hello = HelloMessage {
            node_id: 7,
            tx_count: 42,
            ipv4: Some(Ipv4Addr::new(10, 0, 0, 1)),
            ipv6: Some(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)),
        };
        let flags = hello.flags();
        let packed = hello.pack();
        let (rest, decoded) = HelloMessage::unpack(&packed, flags).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, hello);
    }

    #[test]
    fn round_trips_ipv4_only() {
        let hello = HelloMessage {
            node_id: 1,
            tx_count: 0,
            ipv4: Some(Ipv4Addr::new(192, 168, 1, 1)),
            ipv6: None,
        };
        let flags = hello.flags();
        assert_eq!(flags, HelloFlags::HAS_IPV4);
        let packed = hello.pack();
        let (rest, decoded) = HelloMessage::unpack(&packed, flags).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, hello);
    }
}
