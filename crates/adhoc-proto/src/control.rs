//! The data-plane and ARQ/reward header kinds: BROADCAST (flooding carrier), UNICAST and
//! RELIABLE_DATA (the two ways a datagram travels hop-to-hop), ACK (closes a ReliableSendRecord)
//! and REWARD (the feedback message that shapes the routing table's value estimates).

use crate::wire::{
    le_mac,
    pack_mac,
};
use adhoc_common::MacAddr;
use alloc::vec::Vec;
use nom::{
    number::complete::{
        le_f32,
        le_u32,
        le_u8,
    },
    IResult,
};

/// Flooded datagram carrying an IP payload to every node in radio range. `RreqMessage` and
/// `RrepMessage` carry their own type tags and are broadcast/unicast directly rather than
/// wrapped inside this header; this kind is decoded for wire completeness but the routing path
/// has no caller that constructs one.
#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub struct BroadcastMessage {
    pub broadcast_id: u32,
    pub ttl: u8,
    pub src_node_id: u32,
    pub payload: Vec<u8>,
}

impl BroadcastMessage {
    pub fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, broadcast_id) = le_u32(input)?;
        let (input, ttl) = le_u8(input)?;
        let (input, src_node_id) = le_u32(input)?;
        Ok((
            &[],
            Self {
                broadcast_id,
                ttl,
                src_node_id,
                payload: input.to_vec(),
            },
        ))
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.broadcast_id.to_le_bytes());
        buffer.extend_from_slice(&self.ttl.to_le_bytes());
        buffer.extend_from_slice(&self.src_node_id.to_le_bytes());
        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

/// Best-effort, single hop-to-hop forward of an IP datagram along a route the sender already
/// believes in. No acknowledgement is expected; losses are silent, like any IP router.
#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub struct UnicastMessage {
    pub ttl: u8,
    pub dst_mac: MacAddr,
    pub src_mac: MacAddr,
    pub payload: Vec<u8>,
}

impl UnicastMessage {
    pub fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, ttl) = le_u8(input)?;
        let (input, dst_mac) = le_mac(input)?;
        let (input, src_mac) = le_mac(input)?;
        Ok((
            &[],
            Self {
                ttl,
                dst_mac,
                src_mac,
                payload: input.to_vec(),
            },
        ))
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.ttl.to_le_bytes());
        pack_mac(&mut buffer, &self.dst_mac);
        pack_mac(&mut buffer, &self.src_mac);
        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

/// Same payload shape as `UnicastMessage`, but the sender opens a `ReliableSendRecord` and expects
/// an `AckMessage` carrying the same `msg_id` back.
#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub struct ReliableDataMessage {
    pub msg_id: u32,
    pub dst_mac: MacAddr,
    pub src_mac: MacAddr,
    pub payload: Vec<u8>,
}

impl ReliableDataMessage {
    pub fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, msg_id) = le_u32(input)?;
        let (input, dst_mac) = le_mac(input)?;
        let (input, src_mac) = le_mac(input)?;
        Ok((
            &[],
            Self {
                msg_id,
                dst_mac,
                src_mac,
                payload: input.to_vec(),
            },
        ))
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.msg_id.to_le_bytes());
        pack_mac(&mut buffer, &self.dst_mac);
        pack_mac(&mut buffer, &self.src_mac);
        buffer.extend_from_slice(&self.payload);
        buffer
    }
}

/// Acknowledges receipt of a `ReliableDataMessage` with the same `msg_id`, sent back to the MAC
/// that forwarded it.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub struct AckMessage {
    pub msg_id: u32,
    pub tx_mac: MacAddr,
}

impl AckMessage {
    pub fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, msg_id) = le_u32(input)?;
        let (input, tx_mac) = le_mac(input)?;
        Ok((input, Self { msg_id, tx_mac }))
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.msg_id.to_le_bytes());
        pack_mac(&mut buffer, &self.tx_mac);
        buffer
    }
}

/// Feedback sent backwards along the reverse path, attributing an observed forwarding outcome to
/// `neighbor_mac`. `msg_hash` ties the reward back to the `RewardPending` record opened when the
/// corresponding frame was forwarded.
#[derive(Debug, Clone, Copy)]
pub struct RewardMessage {
    pub reward_value: f32,
    pub msg_hash: u32,
    pub neighbor_mac: MacAddr,
}

impl PartialEq for RewardMessage {
    fn eq(&self, other: &Self) -> bool {
        self.reward_value.to_bits() == other.reward_value.to_bits()
            && self.msg_hash == other.msg_hash
            && self.neighbor_mac == other.neighbor_mac
    }
}
impl Eq for RewardMessage {}

impl RewardMessage {
    pub fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, reward_value) = le_f32(input)?;
        let (input, msg_hash) = le_u32(input)?;
        let (input, neighbor_mac) = le_mac(input)?;
        Ok((
            input,
            Self {
                reward_value,
                msg_hash,
                neighbor_mac,
            },
        ))
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.reward_value.to_le_bytes());
        buffer.extend_from_slice(&self.msg_hash.to_le_bytes());
        pack_mac(&mut buffer, &self.neighbor_mac);
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac(last: u8) -> MacAddr {
        MacAddr([0xaa, 0xaa, 0xaa, 0xaa, 0xaa, last])
    }

    #[test]
    fn round_trips_broadcast_with_payload() {
        let msg = BroadcastMessage {
            broadcast_id: 9,
            ttl: 3,
            src_node_id: 1,
            payload: alloc::vec![1, 2, 3, 4],
        };
        let packed = msg.pack();
        let (rest, decoded) = BroadcastMessage::unpack(&packed).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_unicast() {
        let msg = UnicastMessage {
            ttl: 16,
            dst_mac: mac(0x02),
            src_mac: mac(0x01),
            payload: alloc::vec![0xde, 0xad, 0xbe, 0xef],
        };
        let packed = msg.pack();
        let (rest, decoded) = UnicastMessage::unpack(&packed).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_reliable_data() {
        let msg = ReliableDataMessage {
            msg_id: 123456,
            dst_mac: mac(0x02),
            src_mac: mac(0x01),
            payload: alloc::vec![7, 7, 7],
        };
        let packed = msg.pack();
        let (rest, decoded) = ReliableDataMessage::unpack(&packed).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_ack() {
        let msg = AckMessage {
            msg_id: 55,
            tx_mac: mac(0x02),
        };
        let packed = msg.pack();
        let (rest, decoded) = AckMessage::unpack(&packed).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_reward() {
        let msg = RewardMessage {
            reward_value: -0.2,
            msg_hash: 0xdead_beef,
            neighbor_mac: mac(0x03),
        };
        let packed = msg.pack();
        let (rest, decoded) = RewardMessage::unpack(&packed).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_truncated_ack() {
        let msg = AckMessage {
            msg_id: 55,
            tx_mac: mac(0x02),
        };
        let packed = msg.pack();
        assert!(AckMessage::unpack(&packed[..4]).is_err());
    }
}
