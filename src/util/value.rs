use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Eq, Hash, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct MAC(pub [u8; 6]);

impl MAC {
    /// Parses `aa:bb:cc:dd:ee:ff` (`-` separators are accepted too).
    pub fn parse(s: &str) -> Option<MAC> {
        let groups: Vec<&str> = s.split(|c| c == ':' || c == '-').collect();
        if groups.len() != 6 {
            return None;
        }
        let mut mac = [0u8; 6];
        for (i, g) in groups.iter().enumerate() {
            if g.is_empty() || g.len() > 2 {
                return None;
            }
            mac[i] = u8::from_str_radix(g, 16).ok()?;
        }
        Some(MAC(mac))
    }

    pub fn broadcast() -> MAC {
        MAC([0xff; 6])
    }
}

impl Debug for MAC {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// A match value for one field, already in wire byte order.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum MatchValue {
    Exact(Bytes),
    Ternary { value: Bytes, mask: Bytes },
    Lpm { value: Bytes, prefix_len: i32 },
    Range { low: Bytes, high: Bytes },
    Optional(Bytes),
}

impl MatchValue {
    pub fn kind(&self) -> &'static str {
        match self {
            MatchValue::Exact(_) => "exact",
            MatchValue::Ternary { .. } => "ternary",
            MatchValue::Lpm { .. } => "lpm",
            MatchValue::Range { .. } => "range",
            MatchValue::Optional(_) => "optional",
        }
    }
}

impl Display for MatchValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchValue::Exact(v) | MatchValue::Optional(v) => write!(f, "{}", to_hex(v)),
            MatchValue::Ternary { value, mask } => {
                write!(f, "{}&&&{}", to_hex(value), to_hex(mask))
            }
            MatchValue::Lpm { value, prefix_len } => write!(f, "{}/{}", to_hex(value), prefix_len),
            MatchValue::Range { low, high } => write!(f, "{}..{}", to_hex(low), to_hex(high)),
        }
    }
}

pub fn exact<T: Encode>(v: T) -> MatchValue {
    MatchValue::Exact(v.encode())
}

pub fn lpm<T: Encode>(v: T, prefix_len: i32) -> MatchValue {
    MatchValue::Lpm {
        value: v.encode(),
        prefix_len,
    }
}

pub fn ternary<T: Encode, P: Encode>(v: T, mask: P) -> MatchValue {
    MatchValue::Ternary {
        value: v.encode(),
        mask: mask.encode(),
    }
}

pub fn range<T: Encode, P: Encode>(low: T, high: P) -> MatchValue {
    MatchValue::Range {
        low: low.encode(),
        high: high.encode(),
    }
}

pub fn optional<T: Encode>(v: T) -> MatchValue {
    MatchValue::Optional(v.encode())
}

pub trait Encode: Copy {
    fn encode(self) -> Bytes;
}

impl Encode for Ipv4Addr {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.octets().as_ref())
    }
}

impl Encode for Ipv6Addr {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.octets().as_ref())
    }
}

impl Encode for IpAddr {
    fn encode(self) -> Bytes {
        match self {
            IpAddr::V4(ip) => ip.encode(),
            IpAddr::V6(ip) => ip.encode(),
        }
    }
}

impl Encode for u8 {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.to_be_bytes().as_ref())
    }
}

impl Encode for u16 {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.to_be_bytes().as_ref())
    }
}

impl Encode for u32 {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.to_be_bytes().as_ref())
    }
}

impl Encode for u64 {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.to_be_bytes().as_ref())
    }
}

impl Encode for MAC {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_ref())
    }
}

/// Number of bytes used on the wire for a field of `bitwidth` bits.
pub fn bytes_len(bitwidth: i32) -> usize {
    (bitwidth.max(0) as usize + 7) / 8
}

/// Number of significant bits in a big-endian byte string.
pub fn bit_len(value: &[u8]) -> usize {
    match value.iter().position(|b| *b != 0) {
        Some(first) => (value.len() - first - 1) * 8 + (8 - value[first].leading_zeros() as usize),
        None => 0,
    }
}

/// Left-pads or truncates a big-endian value to exactly `bytes_len` bytes.
///
/// Truncation drops leading bytes, so callers check [`bit_len`] first.
pub fn adjust_value(value: Bytes, bytes_len: usize) -> Bytes {
    if bytes_len == value.len() {
        value
    } else if bytes_len < value.len() {
        value.slice(value.len() - bytes_len..value.len())
    } else {
        let mut padded = BytesMut::with_capacity(bytes_len);
        padded.extend(std::iter::repeat(0u8).take(bytes_len - value.len()));
        padded.extend_from_slice(value.as_ref());
        padded.freeze()
    }
}

/// Fits `value` into a field of `bitwidth` bits, or `None` if it is too wide.
pub fn fit(value: Bytes, bitwidth: i32) -> Option<Bytes> {
    if bit_len(&value) > bitwidth.max(0) as usize {
        return None;
    }
    Some(adjust_value(value, bytes_len(bitwidth)))
}

/// The all-ones value of a field of `bitwidth` bits.
pub fn max_value(bitwidth: i32) -> Bytes {
    let len = bytes_len(bitwidth);
    let mut v = vec![0xffu8; len];
    let rem = bitwidth.max(0) as usize % 8;
    if rem != 0 && len > 0 {
        v[0] = (1u8 << rem) - 1;
    }
    Bytes::from(v)
}

/// Mask with the `prefix_len` most significant bits of a `bitwidth`-bit field set.
pub fn prefix_mask(bitwidth: i32, prefix_len: i32) -> Bytes {
    let len = bytes_len(bitwidth);
    let total_bits = len * 8;
    let skip = total_bits - bitwidth.max(0) as usize;
    let mut v = vec![0u8; len];
    for bit in skip..skip + prefix_len.max(0) as usize {
        v[bit / 8] |= 0x80 >> (bit % 8);
    }
    Bytes::from(v)
}

pub fn and(a: &[u8], b: &[u8]) -> Bytes {
    a.iter().zip(b.iter()).map(|(x, y)| x & y).collect::<Vec<u8>>().into()
}

pub fn is_zero(v: &[u8]) -> bool {
    v.iter().all(|b| *b == 0)
}

pub fn to_hex(v: &[u8]) -> String {
    format!("0x{}", hex::encode(v))
}
