//! Wire formats for the source-routed protocol.
//!
//! A protocol packet is an IPv4 header (protocol 200) followed by a fixed
//! options header and one or more option blocks:
//!
//! ```text
//! options header:  next_header(1) reserved(1) total_options_length(2)
//! option prefix:   type(1) len(1)
//!   route request  (2):  id(2) target(4) entries...      wire = len + 2
//!   route reply    (1):  flags(1) pad(1) entries...      wire = len + 3
//!   route error    (3):  code(1) flags(1) err_src(4)
//!                        err_dst(4) unreachable(4)       wire = len + 2
//!   source route  (96):  salvage(1) segments_left(1)
//!                        entries...                      wire = len + 2
//! ```
//!
//! Entries are exactly 5 bytes: an IPv4 address and a one-byte scaled
//! metric. Option lengths that do not divide into whole entries are
//! logged and tolerated; trailing bytes are ignored. All multi-byte
//! integers are network byte order (`bytes`' big-endian accessors).

use crate::net::{EtherAddr, IPV4_HEADER_LEN};
use crate::packet::Packet;
use bytes::{Buf, BufMut};
use std::net::Ipv4Addr;
use tracing::warn;

/// IP protocol number carried by this shim.
pub const SRP_PROTO: u8 = 200;

pub const TYPE_RREP: u8 = 1;
pub const TYPE_RREQ: u8 = 2;
pub const TYPE_RERR: u8 = 3;
pub const TYPE_SOURCE_ROUTE: u8 = 96;

pub const RERR_NODE_UNREACHABLE: u8 = 1;

/// One-byte hop metric marking "no usable metric".
pub const INVALID_HOP_METRIC: u8 = 0xff;
/// Composite route metric marking "no usable route".
pub const INVALID_ROUTE_METRIC: u16 = 9999;

/// Size of the fixed options header.
pub const FIXED_LEN: usize = 4;
/// Offset of the fixed options header within a protocol packet.
pub const FIXED_OFFSET: usize = IPV4_HEADER_LEN;
/// Offset of the first option block.
pub const OPTIONS_OFFSET: usize = FIXED_OFFSET + FIXED_LEN;

const ENTRY_LEN: usize = 5;

/// One hop of a recorded route: address plus the scaled metric of the
/// link *into* this hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hop {
    pub ip: Ipv4Addr,
    pub metric: u8,
}

impl Hop {
    pub fn new(ip: Ipv4Addr) -> Hop {
        Hop { ip, metric: INVALID_HOP_METRIC }
    }

    pub fn with_metric(ip: Ipv4Addr, metric: u8) -> Hop {
        Hop { ip, metric }
    }
}

/// An ordered list of hops.
pub type Route = Vec<Hop>;

pub fn reverse_route(route: &[Hop]) -> Route {
    route.iter().rev().copied().collect()
}

pub fn route_index_of(route: &[Hop], ip: Ipv4Addr) -> Option<usize> {
    route.iter().position(|h| h.ip == ip)
}

/// The route up to and including `ip`; empty when `ip` is absent.
pub fn truncate_route(route: &[Hop], ip: Ipv4Addr) -> Route {
    match route_index_of(route, ip) {
        Some(i) => route[..=i].to_vec(),
        None => Route::new(),
    }
}

fn get_ipv4(buf: &mut &[u8]) -> Ipv4Addr {
    Ipv4Addr::from(buf.get_u32())
}

fn read_entries(mut buf: &[u8], context: &str) -> Route {
    if buf.len() % ENTRY_LEN != 0 {
        warn!(len = buf.len(), context, "option length is not a whole number of entries");
    }
    let mut hops = Route::with_capacity(buf.len() / ENTRY_LEN);
    while buf.len() >= ENTRY_LEN {
        let ip = get_ipv4(&mut buf);
        let metric = buf.get_u8();
        hops.push(Hop::with_metric(ip, metric));
    }
    hops
}

/// The fixed options header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    /// The original IP protocol of the encapsulated payload.
    pub next_header: u8,
    /// Total length of the option blocks that follow.
    pub options_len: u16,
}

impl FixedHeader {
    pub fn read(packet: &Packet) -> Option<FixedHeader> {
        let data = packet.data();
        let mut buf = data.get(FIXED_OFFSET..FIXED_OFFSET + FIXED_LEN)?;
        let next_header = buf.get_u8();
        let _reserved = buf.get_u8();
        let options_len = buf.get_u16();
        Some(FixedHeader { next_header, options_len })
    }
}

/// A decoded option block, with its offset into the packet payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionBlock {
    RouteRequest { id: u16, target: Ipv4Addr, hops: Route },
    RouteReply { flags: u8, hops: Route },
    RouteError { code: u8, flags: u8, err_src: Ipv4Addr, err_dst: Ipv4Addr, unreachable: Ipv4Addr },
    SourceRoute { salvage: u8, segments_left: u8, hops: Route },
}

impl OptionBlock {
    pub fn type_code(&self) -> u8 {
        match self {
            OptionBlock::RouteRequest { .. } => TYPE_RREQ,
            OptionBlock::RouteReply { .. } => TYPE_RREP,
            OptionBlock::RouteError { .. } => TYPE_RERR,
            OptionBlock::SourceRoute { .. } => TYPE_SOURCE_ROUTE,
        }
    }
}

/// The type code of the first option block, which classifies the packet.
pub fn first_option_type(packet: &Packet) -> Option<u8> {
    packet.data().get(OPTIONS_OFFSET).copied()
}

/// Decodes the option at `offset`, returning the block and the offset of
/// the next option.
pub fn read_option(packet: &Packet, offset: usize) -> Option<(OptionBlock, usize)> {
    let data = packet.data();
    let tail = data.get(offset..)?;
    if tail.len() < 2 {
        return None;
    }
    let type_code = tail[0];
    let len = tail[1] as usize;
    match type_code {
        TYPE_RREQ => {
            // len covers id + target + entries.
            let wire = len + 2;
            let body = tail.get(2..wire)?;
            let mut buf = body;
            if buf.len() < 6 {
                return None;
            }
            let id = buf.get_u16();
            let target = get_ipv4(&mut buf);
            let hops = read_entries(buf, "route request");
            Some((OptionBlock::RouteRequest { id, target, hops }, offset + wire))
        }
        TYPE_RREP => {
            // len covers flags + entries; the pad byte is outside it.
            let wire = len + 3;
            let body = tail.get(2..wire)?;
            let mut buf = body;
            if buf.len() < 2 {
                return None;
            }
            let flags = buf.get_u8();
            let _pad = buf.get_u8();
            let hops = read_entries(buf, "route reply");
            Some((OptionBlock::RouteReply { flags, hops }, offset + wire))
        }
        TYPE_RERR => {
            let wire = len + 2;
            let body = tail.get(2..wire)?;
            let mut buf = body;
            if buf.len() < 14 {
                return None;
            }
            let code = buf.get_u8();
            let flags = buf.get_u8();
            let err_src = get_ipv4(&mut buf);
            let err_dst = get_ipv4(&mut buf);
            let unreachable = get_ipv4(&mut buf);
            Some((OptionBlock::RouteError { code, flags, err_src, err_dst, unreachable }, offset + wire))
        }
        TYPE_SOURCE_ROUTE => {
            let wire = len + 2;
            let body = tail.get(2..wire)?;
            let mut buf = body;
            if buf.len() < 2 {
                return None;
            }
            let salvage = buf.get_u8();
            let segments_left = buf.get_u8();
            let hops = read_entries(buf, "source route");
            Some((OptionBlock::SourceRoute { salvage, segments_left, hops }, offset + wire))
        }
        other => {
            warn!(type_code = other, offset, "unknown option type");
            None
        }
    }
}

/// Iterates the option blocks of a protocol packet as
/// `(offset, block)` pairs.
pub fn options(packet: &Packet) -> OptionsIter<'_> {
    let end = FixedHeader::read(packet)
        .map(|h| OPTIONS_OFFSET + h.options_len as usize)
        .unwrap_or(0)
        .min(packet.len());
    OptionsIter { packet, offset: OPTIONS_OFFSET, end }
}

pub struct OptionsIter<'a> {
    packet: &'a Packet,
    offset: usize,
    end: usize,
}

impl Iterator for OptionsIter<'_> {
    type Item = (usize, OptionBlock);

    fn next(&mut self) -> Option<(usize, OptionBlock)> {
        if self.offset >= self.end {
            return None;
        }
        let (block, next) = read_option(self.packet, self.offset)?;
        let at = self.offset;
        self.offset = next;
        Some((at, block))
    }
}

/// Builds the fixed options header plus option blocks.
pub struct OptionsBuilder {
    next_header: u8,
    body: Vec<u8>,
}

impl OptionsBuilder {
    pub fn new(next_header: u8) -> OptionsBuilder {
        OptionsBuilder { next_header, body: Vec::new() }
    }

    fn put_entries(buf: &mut Vec<u8>, hops: &[Hop]) {
        for h in hops {
            buf.put_u32(u32::from(h.ip));
            buf.put_u8(h.metric);
        }
    }

    pub fn route_request(mut self, id: u16, target: Ipv4Addr, hops: &[Hop]) -> OptionsBuilder {
        self.body.put_u8(TYPE_RREQ);
        self.body.put_u8((6 + ENTRY_LEN * hops.len()) as u8);
        self.body.put_u16(id);
        self.body.put_u32(u32::from(target));
        Self::put_entries(&mut self.body, hops);
        self
    }

    pub fn route_reply(mut self, hops: &[Hop]) -> OptionsBuilder {
        self.body.put_u8(TYPE_RREP);
        self.body.put_u8((1 + ENTRY_LEN * hops.len()) as u8);
        self.body.put_u8(0); // flags
        self.body.put_u8(0); // pad, for alignment
        Self::put_entries(&mut self.body, hops);
        self
    }

    pub fn route_error(
        mut self,
        err_src: Ipv4Addr,
        err_dst: Ipv4Addr,
        unreachable: Ipv4Addr,
    ) -> OptionsBuilder {
        self.body.put_u8(TYPE_RERR);
        self.body.put_u8(14);
        self.body.put_u8(RERR_NODE_UNREACHABLE);
        self.body.put_u8(0); // flags
        self.body.put_u32(u32::from(err_src));
        self.body.put_u32(u32::from(err_dst));
        self.body.put_u32(u32::from(unreachable));
        self
    }

    pub fn source_route(mut self, salvage: u8, segments_left: u8, hops: &[Hop]) -> OptionsBuilder {
        self.body.put_u8(TYPE_SOURCE_ROUTE);
        self.body.put_u8((2 + ENTRY_LEN * hops.len()) as u8);
        self.body.put_u8(salvage);
        self.body.put_u8(segments_left);
        Self::put_entries(&mut self.body, hops);
        self
    }

    /// The fixed header plus all option blocks.
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIXED_LEN + self.body.len());
        out.put_u8(self.next_header);
        out.put_u8(0); // reserved
        out.put_u16(self.body.len() as u16);
        out.extend_from_slice(&self.body);
        out
    }
}

// --- in-place surgery -----------------------------------------------------

/// Appends a hop entry to a packet whose only option is a route request,
/// growing the packet and fixing up both length fields. The caller
/// adjusts the IP header afterwards.
pub fn append_request_hop(packet: &mut Packet, hop: Hop) {
    let insert_at = packet.len();
    packet.put(ENTRY_LEN);
    let data = packet.data_mut();
    data[insert_at..insert_at + 4].copy_from_slice(&u32::from(hop.ip).to_be_bytes());
    data[insert_at + 4] = hop.metric;
    data[OPTIONS_OFFSET + 1] += ENTRY_LEN as u8;
    let fixed_len = u16::from_be_bytes([data[FIXED_OFFSET + 2], data[FIXED_OFFSET + 3]]);
    data[FIXED_OFFSET + 2..FIXED_OFFSET + 4]
        .copy_from_slice(&(fixed_len + ENTRY_LEN as u16).to_be_bytes());
}

/// Decrements the segments-left counter of the source-route option at
/// `offset`.
pub fn decrement_segments_left(packet: &mut Packet, offset: usize) {
    let data = packet.data_mut();
    if data.get(offset) == Some(&TYPE_SOURCE_ROUTE) && data[offset + 3] > 0 {
        data[offset + 3] -= 1;
    }
}

/// The IP address this packet should be forwarded to next, according to
/// the source-route option at `offset`; the IP-header destination once no
/// segments remain.
pub fn next_sr_hop(packet: &Packet, offset: usize) -> Option<Ipv4Addr> {
    let (block, _) = read_option(packet, offset)?;
    let OptionBlock::SourceRoute { segments_left, hops, .. } = block else {
        return None;
    };
    let segments = segments_left as usize;
    if segments > hops.len() {
        return None;
    }
    if segments == 0 {
        let ip = crate::net::Ipv4View::new(packet.data())?;
        return Some(ip.dst());
    }
    let index = hops.len() - segments;
    Some(hops[index].ip)
}

// --- annotations ----------------------------------------------------------

/// User-annotation offset of the previous forwarder's IP.
pub const LAST_HOP_IP_ANNO_OFFSET: usize = 4;

pub fn last_hop_ip(packet: &Packet) -> Ipv4Addr {
    Ipv4Addr::from(packet.user_anno_u32(LAST_HOP_IP_ANNO_OFFSET))
}

pub fn set_last_hop_ip(packet: &mut Packet, ip: Ipv4Addr) {
    packet.set_user_anno_u32(LAST_HOP_IP_ANNO_OFFSET, u32::from(ip));
}

// The previous forwarder's Ethernet address rides in three 16-bit user
// annotation slots.
const LAST_HOP_ETHER_OFFSETS: [usize; 3] = [18, 22, 26];

pub fn last_hop_ether(packet: &Packet) -> EtherAddr {
    let mut bytes = [0u8; 6];
    for (i, off) in LAST_HOP_ETHER_OFFSETS.iter().enumerate() {
        let v = packet.user_anno_u16(*off);
        bytes[2 * i..2 * i + 2].copy_from_slice(&v.to_be_bytes());
    }
    EtherAddr(bytes)
}

pub fn set_last_hop_ether(packet: &mut Packet, addr: EtherAddr) {
    for (i, off) in LAST_HOP_ETHER_OFFSETS.iter().enumerate() {
        let v = u16::from_be_bytes([addr.0[2 * i], addr.0[2 * i + 1]]);
        packet.set_user_anno_u16(*off, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{internet_checksum, Ipv4ViewMut};

    fn protocol_packet(builder: OptionsBuilder, src: Ipv4Addr, dst: Ipv4Addr) -> Packet {
        let options = builder.finish();
        let mut p = Packet::make(IPV4_HEADER_LEN + options.len());
        let total = p.len() as u16;
        {
            let data = p.data_mut();
            data[IPV4_HEADER_LEN..].copy_from_slice(&options);
            let mut ip = Ipv4ViewMut::new(data).unwrap();
            ip.build(src, dst, SRP_PROTO, 255, total);
            ip.finish();
        }
        p.set_network_header(0);
        p
    }

    fn a(n: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, n)
    }

    #[test]
    fn request_round_trip() {
        let hops = vec![Hop::with_metric(a(2), 1), Hop::with_metric(a(3), 7)];
        let p = protocol_packet(
            OptionsBuilder::new(0).route_request(42, a(9), &hops),
            a(1),
            Ipv4Addr::BROADCAST,
        );
        assert_eq!(first_option_type(&p), Some(TYPE_RREQ));
        let blocks: Vec<_> = options(&p).collect();
        assert_eq!(blocks.len(), 1);
        match &blocks[0].1 {
            OptionBlock::RouteRequest { id, target, hops: got } => {
                assert_eq!(*id, 42);
                assert_eq!(*target, a(9));
                assert_eq!(got, &hops);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn reply_with_source_route_walks_both_options() {
        let reply_hops = vec![Hop::with_metric(a(3), 2), Hop::with_metric(a(2), 2)];
        let sr_hops = vec![Hop::with_metric(a(2), 0)];
        let p = protocol_packet(
            OptionsBuilder::new(0).route_reply(&reply_hops).source_route(0, 1, &sr_hops),
            a(3),
            a(1),
        );
        let blocks: Vec<_> = options(&p).collect();
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[0].1, OptionBlock::RouteReply { .. }));
        match &blocks[1].1 {
            OptionBlock::SourceRoute { segments_left, hops, .. } => {
                assert_eq!(*segments_left, 1);
                assert_eq!(hops, &sr_hops);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn append_hop_updates_lengths_and_checksummable_header() {
        let mut p = protocol_packet(
            OptionsBuilder::new(0).route_request(7, a(9), &[]),
            a(1),
            Ipv4Addr::BROADCAST,
        );
        append_request_hop(&mut p, Hop::with_metric(a(2), 3));
        {
            let len = p.len() as u16;
            let data = p.data_mut();
            let mut ip = Ipv4ViewMut::new(data).unwrap();
            ip.set_total_len(len);
            ip.finish();
        }
        let (block, _) = read_option(&p, OPTIONS_OFFSET).unwrap();
        match block {
            OptionBlock::RouteRequest { hops, .. } => {
                assert_eq!(hops, vec![Hop::with_metric(a(2), 3)]);
            }
            other => panic!("unexpected block {other:?}"),
        }
        let fixed = FixedHeader::read(&p).unwrap();
        assert_eq!(fixed.options_len as usize, p.len() - OPTIONS_OFFSET);
        assert_eq!(internet_checksum(&p.data()[..IPV4_HEADER_LEN]), 0);
    }

    #[test]
    fn source_route_next_hop_indexing() {
        let hops = vec![Hop::with_metric(a(2), 0), Hop::with_metric(a(3), 0)];
        let mut p = protocol_packet(
            OptionsBuilder::new(6).source_route(0, 2, &hops),
            a(1),
            a(4),
        );
        // Two segments left: next hop is the first listed intermediate.
        assert_eq!(next_sr_hop(&p, OPTIONS_OFFSET), Some(a(2)));
        decrement_segments_left(&mut p, OPTIONS_OFFSET);
        assert_eq!(next_sr_hop(&p, OPTIONS_OFFSET), Some(a(3)));
        decrement_segments_left(&mut p, OPTIONS_OFFSET);
        // No segments left: the IP destination.
        assert_eq!(next_sr_hop(&p, OPTIONS_OFFSET), Some(a(4)));
    }

    #[test]
    fn route_helpers() {
        let route = vec![Hop::new(a(1)), Hop::new(a(2)), Hop::new(a(3))];
        assert_eq!(route_index_of(&route, a(2)), Some(1));
        assert_eq!(route_index_of(&route, a(9)), None);
        assert_eq!(truncate_route(&route, a(2)).len(), 2);
        assert!(truncate_route(&route, a(9)).is_empty());
        let rev = reverse_route(&route);
        assert_eq!(rev[0].ip, a(3));
        assert_eq!(rev[2].ip, a(1));
    }

    #[test]
    fn ether_annotation_round_trip() {
        let mut p = Packet::make(1);
        let addr = EtherAddr([1, 2, 3, 4, 5, 6]);
        set_last_hop_ether(&mut p, addr);
        assert_eq!(last_hop_ether(&p), addr);
        set_last_hop_ip(&mut p, a(7));
        assert_eq!(last_hop_ip(&p), a(7));
    }
}
