//! This crate (part of the adhocd project) implements serialization and deserialization for the
//! family of wire headers the routing daemon exchanges over the physical interface: neighbor
//! beacons, best-effort and reliable unicast forwarding, acknowledgements, reward feedback, and
//! reactive route discovery.
//!
//! Every multi-byte integer on the wire is little-endian. Every header kind carries a 1-byte type
//! tag as its first byte so the receive path can dispatch without knowing the length up front; for
//! `HELLO` the tag's high nibble additionally carries flag bits describing which optional IP
//! suffixes follow.
//!
//! ## Header kinds
//! | Kind | Tag | Purpose |
//! |------|-----|---------|
//! | HELLO | 0x01 (+ flags) | neighbor-discovery beacon |
//! | BROADCAST | 0x02 | flooded datagram / RREQ carrier |
//! | UNICAST | 0x03 | best-effort hop-to-hop forward |
//! | RELIABLE_DATA | 0x04 | ARQ-tracked hop-to-hop forward |
//! | ACK | 0x05 | acknowledges a RELIABLE_DATA `msg_id` |
//! | REWARD | 0x06 | reward feedback for a forwarding decision |
//! | RREQ (v4) | 0x07 | route request, IPv4 addresses |
//! | RREQ (v6) | 0x08 | route request, IPv6 addresses |
//! | RREP (v4) | 0x09 | route reply, IPv4 addresses |
//! | RREP (v6) | 0x0a | route reply, IPv6 addresses |

#![no_std]
extern crate alloc;

mod control;
mod discovery;
mod error;
mod hello;
mod wire;

pub use control::{
    AckMessage,
    BroadcastMessage,
    ReliableDataMessage,
    RewardMessage,
    UnicastMessage,
};
pub use discovery::{
    AddressFamily,
    RreqMessage,
    RrepMessage,
};
pub use error::CodecError;
pub use hello::{
    HelloFlags,
    HelloMessage,
};

use alloc::vec::Vec;
use nom::number::complete::le_u8;

const KIND_MASK: u8 = 0x0f;

const KIND_HELLO: u8 = 0x01;
const KIND_BROADCAST: u8 = 0x02;
const KIND_UNICAST: u8 = 0x03;
const KIND_RELIABLE_DATA: u8 = 0x04;
const KIND_ACK: u8 = 0x05;
const KIND_REWARD: u8 = 0x06;
const KIND_RREQ_V4: u8 = 0x07;
const KIND_RREQ_V6: u8 = 0x08;
const KIND_RREP_V4: u8 = 0x09;
const KIND_RREP_V6: u8 = 0x0a;

/// The closed set of messages exchanged between adhocd nodes. There is no `Unknown` carry-along
/// variant: an unrecognized type tag is a decode error (`CodecError::UnknownKind`), not a value
/// this enum can represent.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(HelloMessage),
    Broadcast(BroadcastMessage),
    Unicast(UnicastMessage),
    ReliableData(ReliableDataMessage),
    Ack(AckMessage),
    Reward(RewardMessage),
    Rreq(RreqMessage),
    Rrep(RrepMessage),
}

impl Message {
    /// Decodes one frame. Returns `MalformedHeader` if `input` is shorter than the kind's minimum
    /// length, `UnknownKind` if the leading type tag isn't one of the ten recognized kinds.
    pub fn decode(input: &[u8]) -> Result<Self, CodecError> {
        let (body, tag) = le_u8(input).map_err(CodecError::from)?;
        let kind = tag & KIND_MASK;
        Ok(match kind {
            KIND_HELLO => {
                let flags = HelloFlags::from_bits_truncate(tag & !KIND_MASK);
                Message::Hello(HelloMessage::unpack(body, flags).map_err(CodecError::from)?.1)
            }
            KIND_BROADCAST => Message::Broadcast(BroadcastMessage::unpack(body).map_err(CodecError::from)?.1),
            KIND_UNICAST => Message::Unicast(UnicastMessage::unpack(body).map_err(CodecError::from)?.1),
            KIND_RELIABLE_DATA => Message::ReliableData(ReliableDataMessage::unpack(body).map_err(CodecError::from)?.1),
            KIND_ACK => Message::Ack(AckMessage::unpack(body).map_err(CodecError::from)?.1),
            KIND_REWARD => Message::Reward(RewardMessage::unpack(body).map_err(CodecError::from)?.1),
            KIND_RREQ_V4 => Message::Rreq(RreqMessage::unpack(body, AddressFamily::IPv4).map_err(CodecError::from)?.1),
            KIND_RREQ_V6 => Message::Rreq(RreqMessage::unpack(body, AddressFamily::IPv6).map_err(CodecError::from)?.1),
            KIND_RREP_V4 => Message::Rrep(RrepMessage::unpack(body, AddressFamily::IPv4).map_err(CodecError::from)?.1),
            KIND_RREP_V6 => Message::Rrep(RrepMessage::unpack(body, AddressFamily::IPv6).map_err(CodecError::from)?.1),
            _ => return Err(CodecError::UnknownKind(tag)),
        })
    }

    /// Encodes this message, including its leading type tag.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        match self {
            Message::Hello(hello) => {
                buffer.push(KIND_HELLO | hello.flags().bits());
                buffer.extend(hello.pack());
            }
            Message::Broadcast(msg) => {
                buffer.push(KIND_BROADCAST);
                buffer.extend(msg.pack());
            }
            Message::Unicast(msg) => {
                buffer.push(KIND_UNICAST);
                buffer.extend(msg.pack());
            }
            Message::ReliableData(msg) => {
                buffer.push(KIND_RELIABLE_DATA);
                buffer.extend(msg.pack());
            }
            Message::Ack(msg) => {
                buffer.push(KIND_ACK);
                buffer.extend(msg.pack());
            }
            Message::Reward(msg) => {
                buffer.push(KIND_REWARD);
                buffer.extend(msg.pack());
            }
            Message::Rreq(msg) => {
                buffer.push(match msg.family() {
                    AddressFamily::IPv4 => KIND_RREQ_V4,
                    AddressFamily::IPv6 => KIND_RREQ_V6,
                });
                buffer.extend(msg.pack());
            }
            Message::Rrep(msg) => {
                buffer.push(match msg.family() {
                    AddressFamily::IPv4 => KIND_RREP_V4,
                    AddressFamily::IPv6 => KIND_RREP_V6,
                });
                buffer.extend(msg.pack());
            }
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adhoc_common::MacAddr;
    use alloc::vec;
    use core::net::{
        Ipv4Addr,
        IpAddr,
    };

    fn mac(last: u8) -> MacAddr {
        MacAddr([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, last])
    }

    #[test]
    fn round_trips_every_kind() {
        let messages = vec![
            Message::Hello(HelloMessage {
                node_id: 1,
                tx_count: 2,
                ipv4: Some(Ipv4Addr::new(10, 0, 0, 1)),
                ipv6: None,
            }),
            Message::Broadcast(BroadcastMessage {
                broadcast_id: 1,
                ttl: 4,
                src_node_id: 1,
                payload: vec![1, 2, 3],
            }),
            Message::Unicast(UnicastMessage {
                ttl: 16,
                dst_mac: mac(2),
                src_mac: mac(1),
                payload: vec![9, 9],
            }),
            Message::ReliableData(ReliableDataMessage {
                msg_id: 55,
                dst_mac: mac(2),
                src_mac: mac(1),
                payload: vec![1],
            }),
            Message::Ack(AckMessage {
                msg_id: 55,
                tx_mac: mac(2),
            }),
            Message::Reward(RewardMessage {
                reward_value: 0.5,
                msg_hash: 0xabcd,
                neighbor_mac: mac(2),
            }),
            Message::Rreq(RreqMessage {
                hop_count: 0,
                dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)),
                src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                rreq_id: 1,
                bcast_id: 1,
            }),
            Message::Rrep(RrepMessage {
                hop_count: 1,
                dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)),
                tx_mac: mac(2),
            }),
        ];

        for message in messages {
            let encoded = message.encode();
            let decoded = Message::decode(&encoded).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        let buffer = [0x7f, 0x00, 0x00];
        assert_eq!(Message::decode(&buffer), Err(CodecError::UnknownKind(0x7f)));
    }

    #[test]
    fn rejects_truncated_buffer() {
        assert_eq!(Message::decode(&[]), Err(CodecError::MalformedHeader));
        // A HELLO tag claiming both IP suffixes but with only the fixed fields present.
        let short_hello = [KIND_HELLO | 0x30, 1, 0, 0, 0, 2, 0, 0, 0];
        assert_eq!(Message::decode(&short_hello), Err(CodecError::MalformedHeader));
    }

    #[test]
    fn never_panics_on_arbitrary_prefixes() {
        let sample = Message::Rreq(RreqMessage {
            hop_count: 3,
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)),
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            rreq_id: 99,
            bcast_id: 3,
        })
        .encode();

        for prefix_len in 0..sample.len() {
            let _ = Message::decode(&sample[..prefix_len]);
        }
    }
}
