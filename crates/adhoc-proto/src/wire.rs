//! Shared little-endian parse/pack helpers used by every header kind in this crate. Everything on
//! the wire here is little-endian, unlike the big-endian convention network protocols usually
//! pick, since self-compatibility between adhocd nodes (not interop with anything else) is the
//! only contract that matters.

use adhoc_common::MacAddr;
use alloc::vec::Vec;
use core::net::{
    Ipv4Addr,
    Ipv6Addr,
};
use nom::{
    bytes::complete::take,
    number::complete::le_u8,
    IResult,
};

pub fn le_mac(input: &[u8]) -> IResult<&[u8], MacAddr> {
    let (input, bytes) = take(6usize)(input)?;
    Ok((input, MacAddr(bytes.try_into().expect("take(6) yields 6 bytes"))))
}

pub fn pack_mac(buffer: &mut Vec<u8>, mac: &MacAddr) {
    buffer.extend_from_slice(&mac.octets());
}

pub fn le_ipv4(input: &[u8]) -> IResult<&[u8], Ipv4Addr> {
    let (input, bytes) = take(4usize)(input)?;
    let octets: [u8; 4] = bytes.try_into().expect("take(4) yields 4 bytes");
    Ok((input, Ipv4Addr::from(octets)))
}

pub fn pack_ipv4(buffer: &mut Vec<u8>, addr: &Ipv4Addr) {
    buffer.extend_from_slice(&addr.octets());
}

pub fn le_ipv6(input: &[u8]) -> IResult<&[u8], Ipv6Addr> {
    let (input, bytes) = take(16usize)(input)?;
    let octets: [u8; 16] = bytes.try_into().expect("take(16) yields 16 bytes");
    Ok((input, Ipv6Addr::from(octets)))
}

pub fn pack_ipv6(buffer: &mut Vec<u8>, addr: &Ipv6Addr) {
    buffer.extend_from_slice(&addr.octets());
}

/// Every kind stores its 1-byte type tag as the first wire byte; this helper skips it once the
/// caller has already matched on it via `peek`.
pub fn skip_tag(input: &[u8]) -> IResult<&[u8], u8> {
    le_u8(input)
}
