#![no_std]
extern crate alloc;

use alloc::{
    format,
    string::{
        String,
        ToString,
    },
};
use core::{
    fmt::{
        Debug,
        Display,
        Formatter,
    },
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommonError {
    #[error("expected format aa:bb:cc:dd:ee:ff, but got '{0}'")]
    InvalidMacFormat(String),
    #[error("unable to parse hex octet => '{0}'")]
    HexParse(#[from] ParseIntError),
}

/// A IEEE 802 link-layer address. This is the identity neighbours and routing-table entries are
/// keyed by: a node has exactly one of these per physical interface, and it never changes for the
/// lifetime of the process.
#[derive(Ord, PartialOrd, Eq, PartialEq, Hash, Clone, Copy, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub const fn is_broadcast(&self) -> bool {
        let [a, b, c, d, e, f] = self.0;
        a == 0xff && b == 0xff && c == 0xff && d == 0xff && e == 0xff && f == 0xff
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(value: [u8; 6]) -> Self {
        Self(value)
    }
}

impl FromStr for MacAddr {
    type Err = CommonError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = string.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| CommonError::InvalidMacFormat(string.to_string()))?;
            *octet = u8::from_str_radix(part, 16)?;
        }
        if parts.next().is_some() {
            return Err(CommonError::InvalidMacFormat(string.to_string()));
        }
        Ok(Self(octets))
    }
}

impl Debug for MacAddr {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> core::fmt::Result {
        Display::fmt(self, formatter)
    }
}

impl Display for MacAddr {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> core::fmt::Result {
        let [a, b, c, d, e, f] = self.0;
        write!(formatter, "{}", format!("{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{f:02x}"))
    }
}
