//! `NetFlow` v5 codec.
//!
//! A datagram is a 24 byte header followed by up to 30 records of 48 bytes
//! each. Every field is big-endian and fixed width, so a packet's encoded size
//! depends only on its record count.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::Error;

/// Encoded size of [`Header`]
pub const HEADER_SIZE: usize = 24;
/// Encoded size of [`Record`]
pub const RECORD_SIZE: usize = 48;
/// Most records a single v5 datagram may carry
pub const MAX_RECORDS: usize = 30;
/// The only version this codec speaks
pub const VERSION: u16 = 5;

/// `NetFlow` v5 packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Always [`VERSION`]
    pub version: u16,
    /// Number of records that follow
    pub count: u16,
    /// Milliseconds since the exporter started
    pub sys_uptime: u32,
    /// Export time, seconds since the Unix epoch
    pub unix_secs: u32,
    /// Export time, residual nanoseconds
    pub unix_nsecs: u32,
    /// Sequence counter of exported packets
    pub flow_sequence: u32,
    /// Type of flow switching engine
    pub engine_type: u8,
    /// Slot number of the flow switching engine
    pub engine_id: u8,
    /// Sampling interval
    pub sampling_interval: u16,
}

/// `NetFlow` v5 flow record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Record {
    /// Source IPv4 address
    pub src_addr: u32,
    /// Destination IPv4 address
    pub dst_addr: u32,
    /// Next hop IPv4 address
    pub next_hop: u32,
    /// SNMP index of the input interface
    pub input: u16,
    /// SNMP index of the output interface
    pub output: u16,
    /// Packets in the flow
    pub packets: u32,
    /// Layer 3 bytes in the flow
    pub octets: u32,
    /// `sys_uptime` at the start of the flow
    pub first: u32,
    /// `sys_uptime` when the last packet of the flow was seen
    pub last: u32,
    /// TCP/UDP source port
    pub src_port: u16,
    /// TCP/UDP destination port
    pub dst_port: u16,
    /// Unused
    pub pad1: u8,
    /// Cumulative OR of TCP flags
    pub tcp_flags: u8,
    /// IP protocol number
    pub protocol: u8,
    /// IP type of service
    pub tos: u8,
    /// Source autonomous system number
    pub src_as: u16,
    /// Destination autonomous system number
    pub dst_as: u16,
    /// Source address prefix mask bits
    pub src_mask: u8,
    /// Destination address prefix mask bits
    pub dst_mask: u8,
    /// Unused
    pub pad2: u16,
}

/// A header and its records, in packed order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// The packet header
    pub header: Header,
    /// The records, packed in this order
    pub records: Vec<Record>,
}

impl Packet {
    /// Encode this packet, see [`encode`].
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        encode(&self.header, &self.records)
    }
}

/// Encode a header and records into a single datagram payload.
///
/// The header's `count` is written as given; callers keep it in step with
/// `records`.
///
/// # Panics
///
/// Panics if more than [`MAX_RECORDS`] records are passed.
#[must_use]
pub fn encode(header: &Header, records: &[Record]) -> Bytes {
    assert!(
        records.len() <= MAX_RECORDS,
        "NetFlow v5 datagrams carry at most {MAX_RECORDS} records, got {}",
        records.len()
    );
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + RECORD_SIZE * records.len());
    put_header(&mut buf, header);
    for record in records {
        put_record(&mut buf, record);
    }
    buf.freeze()
}

fn put_header<B: BufMut>(buf: &mut B, header: &Header) {
    buf.put_u16(header.version);
    buf.put_u16(header.count);
    buf.put_u32(header.sys_uptime);
    buf.put_u32(header.unix_secs);
    buf.put_u32(header.unix_nsecs);
    buf.put_u32(header.flow_sequence);
    buf.put_u8(header.engine_type);
    buf.put_u8(header.engine_id);
    buf.put_u16(header.sampling_interval);
}

fn put_record<B: BufMut>(buf: &mut B, record: &Record) {
    buf.put_u32(record.src_addr);
    buf.put_u32(record.dst_addr);
    buf.put_u32(record.next_hop);
    buf.put_u16(record.input);
    buf.put_u16(record.output);
    buf.put_u32(record.packets);
    buf.put_u32(record.octets);
    buf.put_u32(record.first);
    buf.put_u32(record.last);
    buf.put_u16(record.src_port);
    buf.put_u16(record.dst_port);
    buf.put_u8(record.pad1);
    buf.put_u8(record.tcp_flags);
    buf.put_u8(record.protocol);
    buf.put_u8(record.tos);
    buf.put_u16(record.src_as);
    buf.put_u16(record.dst_as);
    buf.put_u8(record.src_mask);
    buf.put_u8(record.dst_mask);
    buf.put_u16(record.pad2);
}

/// Decode a datagram payload the way a v5 collector would.
///
/// The generator never receives `NetFlow`; this exists so tests and tooling
/// can check what went out on the wire.
///
/// # Errors
///
/// Fails if the version is not 5 or the buffer is shorter than the header's
/// record count requires.
pub fn decode(mut buf: &[u8]) -> Result<Packet, Error> {
    if buf.len() < HEADER_SIZE {
        return Err(Error::Truncated {
            expected: HEADER_SIZE,
            found: buf.len(),
        });
    }
    let version = buf.get_u16();
    if version != VERSION {
        return Err(Error::Version(version));
    }
    let count = buf.get_u16();
    let expected = usize::from(count) * RECORD_SIZE;
    let header = Header {
        version,
        count,
        sys_uptime: buf.get_u32(),
        unix_secs: buf.get_u32(),
        unix_nsecs: buf.get_u32(),
        flow_sequence: buf.get_u32(),
        engine_type: buf.get_u8(),
        engine_id: buf.get_u8(),
        sampling_interval: buf.get_u16(),
    };
    if buf.remaining() < expected {
        return Err(Error::Truncated {
            expected: HEADER_SIZE + expected,
            found: HEADER_SIZE + buf.remaining(),
        });
    }

    let records = (0..count)
        .map(|_| Record {
            src_addr: buf.get_u32(),
            dst_addr: buf.get_u32(),
            next_hop: buf.get_u32(),
            input: buf.get_u16(),
            output: buf.get_u16(),
            packets: buf.get_u32(),
            octets: buf.get_u32(),
            first: buf.get_u32(),
            last: buf.get_u32(),
            src_port: buf.get_u16(),
            dst_port: buf.get_u16(),
            pad1: buf.get_u8(),
            tcp_flags: buf.get_u8(),
            protocol: buf.get_u8(),
            tos: buf.get_u8(),
            src_as: buf.get_u16(),
            dst_as: buf.get_u16(),
            src_mask: buf.get_u8(),
            dst_mask: buf.get_u8(),
            pad2: buf.get_u16(),
        })
        .collect();

    Ok(Packet { header, records })
}
