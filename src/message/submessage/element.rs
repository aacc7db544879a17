pub mod acknack;
pub mod data;
pub mod datafrag;
pub mod gap;
pub mod heartbeat;
pub mod heartbeatfrag;
pub mod infodst;
pub mod inforeply;
pub mod infosrc;
pub mod infots;
pub mod nackfrag;

use crate::error::{IoError, IoResult};
use crate::structure::ParameterId;
use alloc::fmt;
use bytes::{BufMut, Bytes, BytesMut};
use core::ops::{Add, AddAssign, Sub};
use serde::{Deserialize, Serialize};
use speedy::{Context, Endianness, Readable, Reader, Writable, Writer};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

// spec 9.4.2 Mapping of the PIM SubmessageElements

pub type Count = i32;

/// rtps 2.3 spec 9.3.2: SequenceNumber_t { high: i32, low: u32 }
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub i64);

impl SequenceNumber {
    pub const ZERO: Self = Self(0);
    pub const MIN: Self = Self(i64::MIN);
    pub const MAX: Self = Self(i64::MAX);
    pub const SEQUENCENUMBER_UNKNOWN: Self = Self(-1 << 32);

    pub fn from_high_low(high: i32, low: u32) -> Self {
        Self(((high as i64) << 32) | low as i64)
    }

    pub fn high(&self) -> i32 {
        (self.0 >> 32) as i32
    }

    pub fn low(&self) -> u32 {
        self.0 as u32
    }
}

impl Add for SequenceNumber {
    type Output = SequenceNumber;
    fn add(self, other: Self) -> Self {
        Self(self.0 + other.0)
    }
}

impl Sub for SequenceNumber {
    type Output = SequenceNumber;
    fn sub(self, other: Self) -> Self {
        Self(self.0 - other.0)
    }
}

impl AddAssign for SequenceNumber {
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SequenceNumber({})", self.0)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'a, C: Context> Readable<'a, C> for SequenceNumber {
    fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
        let high = reader.read_i32()?;
        let low = reader.read_u32()?;
        Ok(Self::from_high_low(high, low))
    }

    #[inline]
    fn minimum_bytes_needed() -> usize {
        8
    }
}

impl<C: Context> Writable<C> for SequenceNumber {
    fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
        writer.write_i32(self.high())?;
        writer.write_u32(self.low())
    }
}

/// rtps 2.3 spec 9.4.2.5: fragment numbers start at 1
#[derive(
    Readable,
    Writable,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct FragmentNumber(pub u32);

impl fmt::Display for FragmentNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// element type of a NumberSet bitmap
pub trait NumberSetElement: Copy + Ord + fmt::Debug {
    fn to_i64(self) -> i64;
    fn from_i64(v: i64) -> Self;
}

impl NumberSetElement for SequenceNumber {
    fn to_i64(self) -> i64 {
        self.0
    }
    fn from_i64(v: i64) -> Self {
        Self(v)
    }
}

impl NumberSetElement for FragmentNumber {
    fn to_i64(self) -> i64 {
        self.0 as i64
    }
    fn from_i64(v: i64) -> Self {
        Self(v as u32)
    }
}

pub type SequenceNumberSet = NumberSet<SequenceNumber>;
pub type FragmentNumberSet = NumberSet<FragmentNumber>;

/// rtps 2.3 spec 9.4.2.6, 9.4.2.8
///
/// Bit `i` of the set is the MSB-first bit `31 - i % 32` of `bitmap[i / 32]`
/// and stands for `bitmap_base + i`.
#[derive(Clone, PartialEq, Eq)]
pub struct NumberSet<T> {
    bitmap_base: T,
    num_bits: u32,
    bitmap: Vec<u32>,
}

impl<T: NumberSetElement> NumberSet<T> {
    pub const MAX_BITS: u32 = 256;

    pub fn new_empty(bitmap_base: T) -> Self {
        Self {
            bitmap_base,
            num_bits: 0,
            bitmap: Vec::new(),
        }
    }

    /// members outside of [bitmap_base, bitmap_base + 256) are dropped
    pub fn from_vec(bitmap_base: T, set: Vec<T>) -> Self {
        let base = bitmap_base.to_i64();
        let in_window: Vec<i64> = set
            .into_iter()
            .map(|v| v.to_i64() - base)
            .filter(|d| (0..Self::MAX_BITS as i64).contains(d))
            .collect();
        let num_bits = match in_window.iter().max() {
            Some(max) => (max + 1) as u32,
            None => 0,
        };
        let mut bitmap = vec![0; num_bits.div_ceil(32) as usize];
        for d in in_window {
            bitmap[d as usize / 32] |= 1 << (31 - d % 32);
        }
        Self {
            bitmap_base,
            num_bits,
            bitmap,
        }
    }

    pub fn base(&self) -> T {
        self.bitmap_base
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    pub fn contains(&self, value: T) -> bool {
        let d = value.to_i64() - self.bitmap_base.to_i64();
        if d < 0 || d >= self.num_bits as i64 {
            return false;
        }
        let d = d as usize;
        match self.bitmap.get(d / 32) {
            Some(word) => word & (1 << (31 - d % 32)) != 0,
            None => false,
        }
    }

    pub fn set(&self) -> Vec<T> {
        let base = self.bitmap_base.to_i64();
        (0..self.num_bits as usize)
            .filter(|i| match self.bitmap.get(i / 32) {
                Some(word) => word & (1 << (31 - i % 32)) != 0,
                None => false,
            })
            .map(|i| T::from_i64(base + i as i64))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.iter().all(|w| *w == 0)
    }

    /// rtps 2.3 spec 8.3.5.5, 8.3.5.7: base >= 1 and 0 <= numBits <= 256
    pub fn is_valid(&self) -> bool {
        self.bitmap_base.to_i64() >= 1
            && self.num_bits <= Self::MAX_BITS
            && self.bitmap.len() == self.num_bits.div_ceil(32) as usize
    }
}

impl<T: fmt::Debug + NumberSetElement> fmt::Debug for NumberSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NumberSet {{ base: {:?}, set: {:?} }}", self.bitmap_base, self.set())
    }
}

impl<'a, C: Context, T: NumberSetElement + Readable<'a, C>> Readable<'a, C> for NumberSet<T> {
    fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
        let bitmap_base: T = reader.read_value()?;
        let num_bits = reader.read_u32()?;
        if num_bits > Self::MAX_BITS {
            return Err(speedy::Error::custom(format!(
                "NumberSet numBits {} exceeds {}",
                num_bits,
                Self::MAX_BITS
            ))
            .into());
        }
        let words = num_bits.div_ceil(32) as usize;
        let mut bitmap = Vec::with_capacity(words);
        for _ in 0..words {
            bitmap.push(reader.read_u32()?);
        }
        Ok(Self {
            bitmap_base,
            num_bits,
            bitmap,
        })
    }

    #[inline]
    fn minimum_bytes_needed() -> usize {
        T::minimum_bytes_needed() + 4
    }
}

impl<C: Context, T: NumberSetElement + Writable<C>> Writable<C> for NumberSet<T> {
    fn write_to<W: ?Sized + Writer<C>>(&self, writer: &mut W) -> Result<(), C::Error> {
        writer.write_value(&self.bitmap_base)?;
        writer.write_u32(self.num_bits)?;
        for word in &self.bitmap {
            writer.write_u32(*word)?;
        }
        Ok(())
    }
}

/// rtps 2.3 spec 9.3.2.1: Time_t
#[derive(Readable, Writable, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl Timestamp {
    pub const TIME_ZERO: Self = Self {
        seconds: 0,
        fraction: 0,
    };
    pub const TIME_INVALID: Self = Self {
        seconds: 0xffffffff,
        fraction: 0xffffffff,
    };
    pub const TIME_INFINITE: Self = Self {
        seconds: 0xffffffff,
        fraction: 0xfffffffe,
    };

    #[cfg(feature = "std")]
    pub fn now() -> Option<Self> {
        let now = chrono::Utc::now();
        let seconds = u32::try_from(now.timestamp()).ok()?;
        let nanos = now.timestamp_subsec_nanos() as u64;
        Some(Self {
            seconds,
            fraction: ((nanos << 32) / 1_000_000_000) as u32,
        })
    }

    #[cfg(not(feature = "std"))]
    pub fn now() -> Option<Self> {
        None
    }
}

// spec versin 2.3 9.3.2 Mapping of the Types that Appear Within Submessages or Built-in Topic Data
#[derive(
    Readable,
    Writable,
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct Locator {
    pub kind: i32,
    pub port: u32,
    pub address: [u8; 16],
}

impl Locator {
    pub const KIND_INVALID: i32 = -1;
    pub const KIND_RESERVED: i32 = 0;
    pub const KIND_UDPV4: i32 = 1;
    pub const KIND_UDPV6: i32 = 2;
    pub const PORT_INVALID: u32 = 0;
    pub const ADDRESS_INVALID: [u8; 16] = [0; 16];
    pub const INVALID: Self = Self {
        kind: Self::KIND_INVALID,
        port: Self::PORT_INVALID,
        address: Self::ADDRESS_INVALID,
    };

    pub fn new(kind: i32, port: u32, address: [u8; 16]) -> Self {
        Self {
            kind,
            port,
            address,
        }
    }

    pub fn new_from_ipv4(port: u32, address: [u8; 4]) -> Self {
        let mut addr = [0; 16];
        addr[12..].copy_from_slice(&address);
        Self::new(Self::KIND_UDPV4, port, addr)
    }

    pub fn from_socket_addr(addr: &SocketAddr) -> Self {
        match addr.ip() {
            IpAddr::V4(v4) => Self::new_from_ipv4(addr.port() as u32, v4.octets()),
            IpAddr::V6(v6) => Self::new(Self::KIND_UDPV6, addr.port() as u32, v6.octets()),
        }
    }

    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let port = u16::try_from(self.port).ok()?;
        match self.kind {
            Self::KIND_UDPV4 => {
                let a = &self.address;
                let ip = Ipv4Addr::new(a[12], a[13], a[14], a[15]);
                Some(SocketAddr::new(IpAddr::V4(ip), port))
            }
            Self::KIND_UDPV6 => Some(SocketAddr::new(
                IpAddr::V6(Ipv6Addr::from(self.address)),
                port,
            )),
            _ => None,
        }
    }

    pub fn is_multicast(&self) -> bool {
        self.to_socket_addr()
            .map(|a| a.ip().is_multicast())
            .unwrap_or(false)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_socket_addr() {
            Some(addr) => write!(f, "{}", addr),
            None => write!(f, "Locator(kind: {}, port: {})", self.kind, self.port),
        }
    }
}

/// rtps 2.3 spec 10.2 SerializedPayloadHeader
pub type RepresentationIdentifier = [u8; 2];

pub const CDR_BE: RepresentationIdentifier = [0x00, 0x00];
pub const CDR_LE: RepresentationIdentifier = [0x00, 0x01];
pub const PL_CDR_BE: RepresentationIdentifier = [0x00, 0x02];
pub const PL_CDR_LE: RepresentationIdentifier = [0x00, 0x03];

/// rtps 2.3 spec 10 Serialized Payload Representation
///
/// The two low bits of `representation_options[1]` carry the number of
/// padding octets appended to reach 4 octet alignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedPayload {
    pub representation_identifier: RepresentationIdentifier,
    pub representation_options: [u8; 2],
    pub value: Bytes,
}

impl SerializedPayload {
    pub const HEADER_SIZE: usize = 4;

    pub fn new(representation_identifier: RepresentationIdentifier, value: Bytes) -> Self {
        Self {
            representation_identifier,
            representation_options: [0; 2],
            value,
        }
    }

    pub fn from_bytes(bytes: &Bytes) -> IoResult<Self> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(IoError::Malformed(format!(
                "serialized payload of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let representation_identifier = [bytes[0], bytes[1]];
        let mut representation_options = [bytes[2], bytes[3]];
        let padding = (representation_options[1] & 0x03) as usize;
        let end = bytes.len().saturating_sub(padding).max(Self::HEADER_SIZE);
        representation_options[1] &= !0x03;
        Ok(Self {
            representation_identifier,
            representation_options,
            value: bytes.slice(Self::HEADER_SIZE..end),
        })
    }

    /// header and value without alignment padding, the unit fragmentation splits
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        buf.put_slice(&self.representation_identifier);
        buf.put_slice(&self.representation_options);
        buf.put_slice(&self.value);
        buf.freeze()
    }

    pub fn len(&self) -> usize {
        Self::HEADER_SIZE + self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl<C: Context> Writable<C> for SerializedPayload {
    fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
        let padding = (4 - self.value.len() % 4) % 4;
        writer.write_bytes(&self.representation_identifier)?;
        writer.write_u8(self.representation_options[0])?;
        writer.write_u8((self.representation_options[1] & !0x03) | padding as u8)?;
        writer.write_bytes(&self.value)?;
        for _ in 0..padding {
            writer.write_u8(0)?;
        }
        Ok(())
    }
}

/// rtps 2.3 spec 9.4.2.11 ParameterList
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    pub parameter_id: ParameterId,
    pub value: Bytes,
}

impl Parameter {
    pub fn new(parameter_id: ParameterId, value: Bytes) -> Self {
        Self {
            parameter_id,
            value,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParameterList {
    pub parameters: Vec<Parameter>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, parameter: Parameter) {
        self.parameters.push(parameter);
    }

    pub fn get(&self, parameter_id: ParameterId) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|p| p.parameter_id == parameter_id)
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl<'a, C: Context> Readable<'a, C> for ParameterList {
    fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
        let mut parameters = Vec::new();
        loop {
            let parameter_id: ParameterId = reader.read_value()?;
            let length = reader.read_u16()? as usize;
            if parameter_id == ParameterId::PID_SENTINEL {
                return Ok(Self { parameters });
            }
            let value: Vec<u8> = reader.read_vec(length)?;
            if parameter_id != ParameterId::PID_PAD {
                parameters.push(Parameter::new(parameter_id, Bytes::from(value)));
            }
        }
    }

    #[inline]
    fn minimum_bytes_needed() -> usize {
        4
    }
}

impl<C: Context> Writable<C> for ParameterList {
    fn write_to<T: ?Sized + Writer<C>>(&self, writer: &mut T) -> Result<(), C::Error> {
        for param in &self.parameters {
            let padding = (4 - param.value.len() % 4) % 4;
            writer.write_value(&param.parameter_id)?;
            writer.write_u16((param.value.len() + padding) as u16)?;
            writer.write_bytes(&param.value)?;
            for _ in 0..padding {
                writer.write_u8(0)?;
            }
        }
        writer.write_value(&ParameterId::PID_SENTINEL)?;
        writer.write_u16(0)
    }
}

pub type GroupDigest = [u8; 4];

/// read one element at `readed_byte`, returning it with the number of octets it occupied
pub(crate) fn read_element<'b, T: Readable<'b, Endianness>>(
    endianness: Endianness,
    buffer: &'b [u8],
    readed_byte: usize,
) -> IoResult<(T, usize)> {
    let rest = buffer.get(readed_byte..).ok_or_else(|| {
        IoError::Malformed(format!(
            "element at offset {} is past the end of {} bytes",
            readed_byte,
            buffer.len()
        ))
    })?;
    let (value, len) = T::read_with_length_from_buffer_with_ctx(endianness, rest);
    Ok((value?, len))
}
