//! Multipath next-hop attribute parsing.
//!
//! The buffer is a sequence of next-hop records in native byte order, each
//! padded to a 4-byte boundary:
//!
//! ```text
//! +--------+-------+------+---------+------------------------+
//! | len:16 | fl:8  | hops | ifindex | sub-attributes ...     |
//! +--------+-------+------+---------+------------------------+
//!  \_______________ 8 bytes _______/
//! ```
//!
//! `len` covers the header and the sub-attributes. Each sub-attribute is
//! `{len: u16, type: u16, payload}`. Only the gateway and flow sub-attributes
//! are interpreted; others are skipped.

use byteorder::{ByteOrder, NativeEndian};
use fib_types::Address;
use serde::Deserialize;

use crate::error::{FibError, Result};
use crate::nexthop::{NextHop, NextHopFlags};
use crate::request::RouteRequest;
use crate::route_info::RouteInfo;

/// Size of the fixed next-hop record header.
pub const NEXTHOP_HEADER_LEN: usize = 8;
/// Size of a sub-attribute header.
pub const ATTR_HEADER_LEN: usize = 4;
/// Gateway address sub-attribute.
pub const ATTR_GATEWAY: u16 = 5;
/// Routing realm sub-attribute.
pub const ATTR_FLOW: u16 = 11;

const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// Splits the first well-formed record off `buf`.
///
/// Returns the record bytes (exactly its declared length) and the rest of the
/// buffer after alignment padding. Returns `None` if the header does not fit
/// or the declared length is shorter than the header or overruns `buf`.
fn split_record(buf: &[u8]) -> Option<(&[u8], &[u8])> {
    if buf.len() < NEXTHOP_HEADER_LEN {
        return None;
    }
    let len = usize::from(NativeEndian::read_u16(&buf[0..2]));
    if len < NEXTHOP_HEADER_LEN || len > buf.len() {
        return None;
    }
    let next = align4(len).min(buf.len());
    Some((&buf[..len], &buf[next..]))
}

/// Counts the next-hop records in `buf`.
///
/// Returns 0 if any record is malformed or bytes remain after the last
/// record; a zero count is how callers learn the buffer is unusable.
pub fn count_nexthops(buf: &[u8]) -> usize {
    let mut rest = buf;
    let mut count = 0;
    while let Some((_, next)) = split_record(rest) {
        count += 1;
        rest = next;
    }
    if rest.is_empty() {
        count
    } else {
        0
    }
}

/// Gateway and realm carried in a record's sub-attributes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SubAttrs {
    gateway: Option<Address>,
    classid: Option<u32>,
}

fn parse_sub_attrs(mut attrs: &[u8]) -> SubAttrs {
    let mut out = SubAttrs::default();
    while attrs.len() >= ATTR_HEADER_LEN {
        let len = usize::from(NativeEndian::read_u16(&attrs[0..2]));
        if len < ATTR_HEADER_LEN || len > attrs.len() {
            break;
        }
        let kind = NativeEndian::read_u16(&attrs[2..4]);
        let payload = &attrs[ATTR_HEADER_LEN..len];
        match kind {
            ATTR_GATEWAY if payload.len() >= 4 => {
                out.gateway = Some(Address::new(NativeEndian::read_u32(payload)));
            }
            ATTR_FLOW if payload.len() >= 4 => {
                out.classid = Some(NativeEndian::read_u32(payload));
            }
            _ => {}
        }
        attrs = &attrs[align4(len).min(attrs.len())..];
    }
    out
}

/// Fills the next-hop slots of `info` from `buf`.
///
/// `info` must already hold one slot per record (see [`count_nexthops`]).
/// Each hop gets the request's base flags merged with the record flags,
/// weight `hops + 1`, and gateway/realm from the sub-attributes.
///
/// On error the slots are left partially filled and the candidate must be
/// discarded.
pub fn parse_nexthops(info: &mut RouteInfo, buf: &[u8], request: &RouteRequest) -> Result<()> {
    let base_flags = request.base_nexthop_flags();
    let mut rest = buf;

    for (idx, nh) in info.nexthops_mut().iter_mut().enumerate() {
        let (record, next) = split_record(rest).ok_or_else(|| {
            FibError::invalid(format!(
                "next-hop record {} inconsistent with {} remaining bytes",
                idx,
                rest.len()
            ))
        })?;

        let flags = NextHopFlags::from_bits(base_flags | u32::from(record[2]));
        nh.set_flags(flags);
        nh.set_weight(u32::from(record[3]) + 1);
        nh.set_oif(NativeEndian::read_u32(&record[4..8]));

        let attrs = parse_sub_attrs(&record[NEXTHOP_HEADER_LEN..]);
        nh.set_gateway(attrs.gateway.unwrap_or(Address::UNSPECIFIED));
        nh.set_classid(attrs.classid.unwrap_or(0));

        rest = next;
    }

    Ok(())
}

/// Parses `buf` into standalone next hops, for matching delete requests.
pub fn decode_nexthops(buf: &[u8], request: &RouteRequest) -> Result<Vec<NextHop>> {
    let count = count_nexthops(buf);
    if count == 0 {
        return Err(FibError::invalid("malformed next-hop attribute buffer"));
    }
    let mut info = RouteInfo::new(request.protocol, request.priority);
    info.reserve_nexthops(count);
    parse_nexthops(&mut info, buf, request)?;
    Ok(info.nexthops().to_vec())
}

/// One next-hop record, for building attribute buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NextHopRecord {
    pub ifindex: u32,
    /// Record flags (low byte of the next-hop flags).
    pub flags: u8,
    /// Weight minus one.
    pub hops: u8,
    pub gateway: Option<Address>,
    pub classid: Option<u32>,
}

impl NextHopRecord {
    pub fn new(ifindex: u32) -> Self {
        Self {
            ifindex,
            ..Self::default()
        }
    }

    pub fn with_gateway(mut self, gateway: Address) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Sets the weight; values below 1 encode as 1.
    pub fn with_weight(mut self, weight: u8) -> Self {
        self.hops = weight.saturating_sub(1);
        self
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_classid(mut self, classid: u32) -> Self {
        self.classid = Some(classid);
        self
    }

    /// Appends the wire form of this record to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut attrs = Vec::new();
        if let Some(gateway) = self.gateway {
            push_u32_attr(&mut attrs, ATTR_GATEWAY, gateway.raw());
        }
        if let Some(classid) = self.classid {
            push_u32_attr(&mut attrs, ATTR_FLOW, classid);
        }

        let len = NEXTHOP_HEADER_LEN + attrs.len();
        let mut header = [0u8; NEXTHOP_HEADER_LEN];
        NativeEndian::write_u16(&mut header[0..2], len as u16);
        header[2] = self.flags;
        header[3] = self.hops;
        NativeEndian::write_u32(&mut header[4..8], self.ifindex);

        out.extend_from_slice(&header);
        out.extend_from_slice(&attrs);
        out.resize(out.len() + (align4(len) - len), 0);
    }
}

fn push_u32_attr(out: &mut Vec<u8>, kind: u16, value: u32) {
    let mut attr = [0u8; ATTR_HEADER_LEN + 4];
    NativeEndian::write_u16(&mut attr[0..2], (ATTR_HEADER_LEN + 4) as u16);
    NativeEndian::write_u16(&mut attr[2..4], kind);
    NativeEndian::write_u32(&mut attr[4..8], value);
    out.extend_from_slice(&attr);
}

/// Encodes a list of records into one attribute buffer.
pub fn encode_nexthops(records: &[NextHopRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        record.encode(&mut out);
    }
    out
}
