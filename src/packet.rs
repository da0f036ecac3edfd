//! Reference-counted packet buffers with headroom, tailroom, and a fixed
//! annotation area.
//!
//! A [`Packet`] owns (or shares) a byte buffer laid out as
//!
//! ```text
//! head ........ data ======== tail ........ end
//!   headroom      payload        tailroom
//! ```
//!
//! `clone` produces a shallow sharer of the same buffer; mutating
//! operations copy-on-write first, so clones never observe each other's
//! edits. `push`/`pull` grow and shrink at the head, `put`/`take` at the
//! tail; `push` and `put` reallocate with extra slack when the requested
//! room is not available.
//!
//! Each packet also carries a 48-byte annotation block addressed through
//! typed accessors. The offsets are part of the crate's external contract:
//! downstream elements agree on where the destination-IP annotation or the
//! last-hop Ethernet address live, not on any particular element having
//! written them.

use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::warn;

/// Default free space left before the payload by the sized constructors.
pub const DEFAULT_HEADROOM: usize = 24;

/// Size of the per-packet annotation block.
pub const ANNO_SIZE: usize = 48;

// Fixed annotation layout. The first bytes hold the typed system
// annotations; user annotations start at USER_ANNO_OFFSET and run to the
// end of the block.
const ANNO_DST_IP: usize = 0; // 4 bytes
const ANNO_IP_TOS: usize = 4;
const ANNO_IP_TTL: usize = 5;
const ANNO_IP_OFF: usize = 6; // 2 bytes
const ANNO_MAC_BROADCAST: usize = 8;
const ANNO_FIX_IP_SRC: usize = 9;
const ANNO_ICMP_PARAM_OFF: usize = 10;
const ANNO_COLOR: usize = 11;
const ANNO_VLAN_TCI: usize = 12; // 2 bytes

/// First byte of the user annotation area.
pub const USER_ANNO_OFFSET: usize = 16;

/// Default tailroom for a fresh buffer holding `len` payload bytes.
pub fn default_tailroom(len: usize) -> usize {
    56usize.saturating_sub(len).max(8)
}

/// A packet: shared byte storage plus per-packet offsets and annotations.
///
/// The storage is shared between clones; offsets, the network-header mark,
/// and the annotation block are per-packet (clones start with copies).
pub struct Packet {
    buf: Arc<Vec<u8>>,
    data: usize,
    tail: usize,
    nh: Option<usize>,
    anno: [u8; ANNO_SIZE],
}

impl Packet {
    /// An uninitialized (zero-filled) packet of `len` payload bytes with
    /// default headroom and tailroom.
    pub fn make(len: usize) -> Packet {
        Packet::make_with(DEFAULT_HEADROOM, &vec![0u8; len], default_tailroom(len))
    }

    /// A packet whose payload is a copy of `body`, with default room.
    pub fn make_from(body: &[u8]) -> Packet {
        Packet::make_with(DEFAULT_HEADROOM, body, default_tailroom(body.len()))
    }

    /// A packet with explicit headroom and tailroom around a copy of `body`.
    pub fn make_with(headroom: usize, body: &[u8], tailroom: usize) -> Packet {
        let mut buf = vec![0u8; headroom + body.len() + tailroom];
        buf[headroom..headroom + body.len()].copy_from_slice(body);
        Packet {
            buf: Arc::new(buf),
            data: headroom,
            tail: headroom + body.len(),
            nh: None,
            anno: [0; ANNO_SIZE],
        }
    }

    /// Consumes the packet. Storage is released once the last sharer is
    /// gone; provided for textual symmetry with the ownership contract
    /// that every locally held packet sees exactly one of push, enqueue,
    /// or kill.
    pub fn kill(self) {}

    pub fn len(&self) -> usize {
        self.tail - self.data
    }

    pub fn is_empty(&self) -> bool {
        self.tail == self.data
    }

    pub fn headroom(&self) -> usize {
        self.data
    }

    pub fn tailroom(&self) -> usize {
        self.buf.len() - self.tail
    }

    /// True iff another packet shares this buffer.
    pub fn shared(&self) -> bool {
        Arc::strong_count(&self.buf) > 1
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.data..self.tail]
    }

    /// Mutable payload access; copies the buffer first if it is shared.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.uniqueify();
        let (data, tail) = (self.data, self.tail);
        &mut Arc::get_mut(&mut self.buf).expect("buffer uniqueified")[data..tail]
    }

    /// Ensures this packet is the buffer's only owner, deep-copying if
    /// necessary. Offsets and room are preserved across the copy.
    pub fn uniqueify(&mut self) {
        if self.shared() {
            self.buf = Arc::new(self.buf.as_ref().clone());
        }
    }

    /// Grows the payload by `n` bytes at the head and returns the packet
    /// for writing. If the headroom is too small, reallocates into a
    /// buffer with `DEFAULT_HEADROOM + n` fresh slack (the expensive
    /// path); otherwise just moves the data pointer back.
    pub fn push(&mut self, n: usize) {
        if self.data >= n {
            self.uniqueify();
            self.data -= n;
        } else {
            self.expensive_push(n);
        }
    }

    fn expensive_push(&mut self, n: usize) {
        let headroom = DEFAULT_HEADROOM + n;
        let mut buf = vec![0u8; headroom + self.len() + self.tailroom()];
        buf[headroom..headroom + self.len()].copy_from_slice(self.data());
        let shift = headroom as isize - self.data as isize;
        self.nh = self.nh.map(|o| (o as isize + shift) as usize);
        self.tail = headroom + self.len();
        self.data = headroom - n;
        self.buf = Arc::new(buf);
    }

    /// Drops `n` bytes from the head. Overdrawing clamps to the payload
    /// length with a warning.
    pub fn pull(&mut self, n: usize) {
        let n = if n > self.len() {
            warn!(requested = n, length = self.len(), "Packet::pull overdraws payload");
            self.len()
        } else {
            n
        };
        self.data += n;
    }

    /// Grows the payload by `n` bytes at the tail, reallocating with extra
    /// slack if the tailroom is too small.
    pub fn put(&mut self, n: usize) {
        if self.tailroom() >= n {
            self.uniqueify();
            self.tail += n;
        } else {
            let tailroom = default_tailroom(0) + n;
            let mut buf = vec![0u8; self.data + self.len() + tailroom];
            let (data, tail) = (self.data, self.tail);
            buf[data..tail].copy_from_slice(self.data());
            self.buf = Arc::new(buf);
            self.tail += n;
        }
    }

    /// Drops `n` bytes from the tail, clamping with a warning like `pull`.
    pub fn take(&mut self, n: usize) {
        let n = if n > self.len() {
            warn!(requested = n, length = self.len(), "Packet::take overdraws payload");
            self.len()
        } else {
            n
        };
        self.tail -= n;
    }

    /// Marks the protocol header as starting `offset` bytes into the
    /// payload.
    pub fn set_network_header(&mut self, offset: usize) {
        debug_assert!(offset <= self.len());
        self.nh = Some(self.data + offset);
    }

    pub fn clear_network_header(&mut self) {
        self.nh = None;
    }

    pub fn has_network_header(&self) -> bool {
        self.nh.is_some()
    }

    /// Offset of the network header within the current payload, if set and
    /// still inside it.
    pub fn network_header_offset(&self) -> Option<usize> {
        self.nh.and_then(|abs| {
            (abs >= self.data && abs <= self.tail).then_some(abs - self.data)
        })
    }

    pub fn network_header(&self) -> Option<&[u8]> {
        self.network_header_offset().map(|o| &self.data()[o..])
    }

    // --- annotations -----------------------------------------------------

    pub fn anno(&self) -> &[u8; ANNO_SIZE] {
        &self.anno
    }

    pub fn copy_annotations(&mut self, other: &Packet) {
        self.anno = other.anno;
    }

    pub fn clear_annotations(&mut self) {
        self.anno = [0; ANNO_SIZE];
    }

    fn anno_u16(&self, off: usize) -> u16 {
        u16::from_be_bytes([self.anno[off], self.anno[off + 1]])
    }

    fn set_anno_u16(&mut self, off: usize, v: u16) {
        self.anno[off..off + 2].copy_from_slice(&v.to_be_bytes());
    }

    fn anno_u32(&self, off: usize) -> u32 {
        u32::from_be_bytes([self.anno[off], self.anno[off + 1], self.anno[off + 2], self.anno[off + 3]])
    }

    fn set_anno_u32(&mut self, off: usize, v: u32) {
        self.anno[off..off + 4].copy_from_slice(&v.to_be_bytes());
    }

    /// Destination (next hop) IP annotation.
    pub fn dst_ip_anno(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.anno_u32(ANNO_DST_IP))
    }

    pub fn set_dst_ip_anno(&mut self, a: Ipv4Addr) {
        self.set_anno_u32(ANNO_DST_IP, u32::from(a));
    }

    pub fn ip_tos_anno(&self) -> u8 {
        self.anno[ANNO_IP_TOS]
    }

    pub fn set_ip_tos_anno(&mut self, v: u8) {
        self.anno[ANNO_IP_TOS] = v;
    }

    pub fn ip_ttl_anno(&self) -> u8 {
        self.anno[ANNO_IP_TTL]
    }

    pub fn set_ip_ttl_anno(&mut self, v: u8) {
        self.anno[ANNO_IP_TTL] = v;
    }

    pub fn ip_off_anno(&self) -> u16 {
        self.anno_u16(ANNO_IP_OFF)
    }

    pub fn set_ip_off_anno(&mut self, v: u16) {
        self.set_anno_u16(ANNO_IP_OFF, v);
    }

    pub fn mac_broadcast_anno(&self) -> bool {
        self.anno[ANNO_MAC_BROADCAST] != 0
    }

    pub fn set_mac_broadcast_anno(&mut self, v: bool) {
        self.anno[ANNO_MAC_BROADCAST] = v as u8;
    }

    pub fn fix_ip_src_anno(&self) -> bool {
        self.anno[ANNO_FIX_IP_SRC] != 0
    }

    pub fn set_fix_ip_src_anno(&mut self, v: bool) {
        self.anno[ANNO_FIX_IP_SRC] = v as u8;
    }

    pub fn icmp_param_off_anno(&self) -> u8 {
        self.anno[ANNO_ICMP_PARAM_OFF]
    }

    pub fn set_icmp_param_off_anno(&mut self, v: u8) {
        self.anno[ANNO_ICMP_PARAM_OFF] = v;
    }

    pub fn color_anno(&self) -> u8 {
        self.anno[ANNO_COLOR]
    }

    pub fn set_color_anno(&mut self, v: u8) {
        self.anno[ANNO_COLOR] = v;
    }

    /// VLAN TCI annotation; the header-strip helpers repurpose it to hold
    /// a saved header length (0 = nothing stripped, 1 = non-payload).
    pub fn vlan_tci_anno(&self) -> u16 {
        self.anno_u16(ANNO_VLAN_TCI)
    }

    pub fn set_vlan_tci_anno(&mut self, v: u16) {
        self.set_anno_u16(ANNO_VLAN_TCI, v);
    }

    /// 32-bit user annotation word at `off` bytes into the user area.
    pub fn user_anno_u32(&self, off: usize) -> u32 {
        self.anno_u32(USER_ANNO_OFFSET + off)
    }

    pub fn set_user_anno_u32(&mut self, off: usize, v: u32) {
        self.set_anno_u32(USER_ANNO_OFFSET + off, v);
    }

    pub fn user_anno_u16(&self, off: usize) -> u16 {
        self.anno_u16(USER_ANNO_OFFSET + off)
    }

    pub fn set_user_anno_u16(&mut self, off: usize, v: u16) {
        self.set_anno_u16(USER_ANNO_OFFSET + off, v);
    }
}

impl Clone for Packet {
    /// A shallow sharer: same buffer, copied offsets and annotations.
    fn clone(&self) -> Packet {
        Packet {
            buf: Arc::clone(&self.buf),
            data: self.data,
            tail: self.tail,
            nh: self.nh,
            anno: self.anno,
        }
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len())
            .field("headroom", &self.headroom())
            .field("tailroom", &self.tailroom())
            .field("shared", &self.shared())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_defaults() {
        let p = Packet::make_from(&[1, 2, 3]);
        assert_eq!(p.headroom(), DEFAULT_HEADROOM);
        assert_eq!(p.tailroom(), 53);
        assert_eq!(p.data(), &[1, 2, 3]);
        let q = Packet::make(100);
        assert_eq!(q.tailroom(), 8);
    }

    #[test]
    fn push_then_pull_is_identity() {
        let mut p = Packet::make_from(b"payload");
        let before = p.data().to_vec();
        p.push(10);
        assert_eq!(p.len(), 17);
        p.pull(10);
        assert_eq!(p.data(), &before[..]);
    }

    #[test]
    fn expensive_push_preserves_payload() {
        let mut p = Packet::make_with(2, b"abc", 0);
        p.push(40);
        assert_eq!(p.len(), 43);
        assert_eq!(&p.data()[40..], b"abc");
        assert_eq!(p.headroom(), DEFAULT_HEADROOM);
    }

    #[test]
    fn clone_is_copy_on_write() {
        let mut p = Packet::make_from(b"hello");
        let q = p.clone();
        assert!(p.shared() && q.shared());
        p.data_mut()[0] = b'H';
        assert!(!p.shared());
        assert_eq!(p.data(), b"Hello");
        assert_eq!(q.data(), b"hello");
    }

    #[test]
    fn overdrawn_pull_clamps() {
        let mut p = Packet::make_from(b"ab");
        p.pull(10);
        assert_eq!(p.len(), 0);
        p.put(4);
        assert_eq!(p.len(), 4);
    }

    #[test]
    fn annotations_round_trip() {
        let mut p = Packet::make(1);
        p.set_dst_ip_anno(Ipv4Addr::new(10, 0, 0, 1));
        p.set_vlan_tci_anno(0x1234);
        p.set_user_anno_u32(4, 0xdeadbeef);
        let mut q = Packet::make(1);
        q.copy_annotations(&p);
        assert_eq!(q.dst_ip_anno(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(q.vlan_tci_anno(), 0x1234);
        assert_eq!(q.user_anno_u32(4), 0xdeadbeef);
    }

    #[test]
    fn network_header_survives_reallocation() {
        let mut p = Packet::make_with(0, b"ip-header-payload", 0);
        p.set_network_header(0);
        p.push(8);
        assert_eq!(p.network_header_offset(), Some(8));
    }
}
