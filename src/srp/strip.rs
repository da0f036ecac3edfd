//! Header strip/unstrip helpers for delivering protocol packets through
//! elements that expect plain IP.
//!
//! Stripping swaps the protocol headers into the bytes vacated by the IP
//! header and records the stripped length in the VLAN TCI annotation, so
//! the unstrip element can restore the packet byte-for-byte: 0 means
//! nothing was stripped, 1 marks a non-payload packet that must not be
//! restored, anything else is the saved header length.

use crate::element::{Element, AGNOSTIC};
use crate::net::{Ipv4ViewMut, IPV4_HEADER_LEN};
use crate::packet::Packet;
use crate::srp::wire;
use std::any::Any;

/// Marker for "not a data packet; do not restore".
const NON_PAYLOAD: u16 = 1;

/// Removes the protocol headers from source-routed data packets, saving
/// them for [`UnstripSrpHeader`].
#[derive(Default)]
pub struct StripSrpHeader;

impl Element for StripSrpHeader {
    fn class_name(&self) -> &'static str {
        "StripSrpHeader"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "1/1"
    }

    fn processing(&self) -> &'static str {
        AGNOSTIC
    }

    fn simple_action(&mut self, mut p: Packet) -> Option<Packet> {
        if wire::first_option_type(&p) != Some(wire::TYPE_SOURCE_ROUTE) {
            // Not a data packet; mark it so the unstrip side leaves it
            // alone.
            p.set_vlan_tci_anno(NON_PAYLOAD);
            return Some(p);
        }
        Some(swap_headers_out(p))
    }
}

/// Removes all protocol headers, swapping them into the vacated region
/// and saving the length in the VLAN TCI annotation.
fn swap_headers_out(mut p: Packet) -> Packet {
    let Some(fixed) = wire::FixedHeader::read(&p) else {
        p.set_vlan_tci_anno(NON_PAYLOAD);
        return p;
    };
    let strip = wire::FIXED_LEN + fixed.options_len as usize;
    let next_header = fixed.next_header;

    let mut saved_ip = [0u8; IPV4_HEADER_LEN];
    saved_ip.copy_from_slice(&p.data()[..IPV4_HEADER_LEN]);
    saved_ip[9] = next_header;

    {
        // Swap: the protocol headers move to the front, where the pull
        // will hide them without losing the bytes.
        let data = p.data_mut();
        let headers: Vec<u8> = data[IPV4_HEADER_LEN..IPV4_HEADER_LEN + strip].to_vec();
        data[..strip].copy_from_slice(&headers);
    }
    p.set_vlan_tci_anno(strip as u16);
    p.pull(strip);
    let total = p.len() as u16;
    {
        let data = p.data_mut();
        data[..IPV4_HEADER_LEN].copy_from_slice(&saved_ip);
        if let Some(mut ip) = Ipv4ViewMut::new(data) {
            ip.set_total_len(total);
            ip.finish();
        }
    }
    p.set_network_header(0);
    p
}

/// Restores headers saved by [`StripSrpHeader`].
#[derive(Default)]
pub struct UnstripSrpHeader;

impl Element for UnstripSrpHeader {
    fn class_name(&self) -> &'static str {
        "UnstripSrpHeader"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "1/1"
    }

    fn processing(&self) -> &'static str {
        AGNOSTIC
    }

    fn simple_action(&mut self, mut p: Packet) -> Option<Packet> {
        match p.vlan_tci_anno() {
            0 => Some(p),
            NON_PAYLOAD => {
                p.set_vlan_tci_anno(0);
                Some(p)
            }
            saved => Some(swap_headers_in(p, saved as usize)),
        }
    }
}

fn swap_headers_in(mut p: Packet, saved: usize) -> Packet {
    let mut saved_ip = [0u8; IPV4_HEADER_LEN];
    saved_ip.copy_from_slice(&p.data()[..IPV4_HEADER_LEN]);
    saved_ip[9] = wire::SRP_PROTO;

    // The saved headers sit just ahead of the current data pointer;
    // un-pull to expose them, then rebuild the front.
    p.push(saved);
    p.set_vlan_tci_anno(0);
    let total = p.len() as u16;
    {
        let data = p.data_mut();
        let headers: Vec<u8> = data[..saved].to_vec();
        data[IPV4_HEADER_LEN..IPV4_HEADER_LEN + saved].copy_from_slice(&headers);
        data[..IPV4_HEADER_LEN].copy_from_slice(&saved_ip);
        if let Some(mut ip) = Ipv4ViewMut::new(data) {
            ip.set_total_len(total);
            ip.finish();
        }
    }
    p.set_network_header(0);
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::srp::wire::{Hop, OptionsBuilder};
    use std::net::Ipv4Addr;

    fn data_packet() -> Packet {
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let b = Ipv4Addr::new(10, 0, 0, 2);
        let options = OptionsBuilder::new(17)
            .source_route(0, 1, &[Hop::with_metric(Ipv4Addr::new(10, 0, 0, 3), 0)])
            .finish();
        let body = [options.as_slice(), b"user payload"].concat();
        let mut p = Packet::make(IPV4_HEADER_LEN + body.len());
        let total = p.len() as u16;
        {
            let data = p.data_mut();
            data[IPV4_HEADER_LEN..].copy_from_slice(&body);
            let mut ip = Ipv4ViewMut::new(data).unwrap();
            ip.build(a, b, wire::SRP_PROTO, 64, total);
            ip.finish();
        }
        p.set_network_header(0);
        p
    }

    #[test]
    fn strip_then_unstrip_restores_bytes() {
        let original = data_packet();
        let mut strip = StripSrpHeader;
        let mut unstrip = UnstripSrpHeader;
        let stripped = strip.simple_action(original.clone()).unwrap();
        assert_ne!(stripped.vlan_tci_anno(), 0);
        assert!(stripped.len() < original.len());
        // The visible packet is plain IP again.
        let ip = crate::net::Ipv4View::new(stripped.data()).unwrap();
        assert_eq!(ip.protocol(), 17);
        let restored = unstrip.simple_action(stripped).unwrap();
        assert_eq!(restored.data(), original.data());
        assert_eq!(restored.vlan_tci_anno(), 0);
    }

    #[test]
    fn non_payload_marked_and_left_alone() {
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let options = OptionsBuilder::new(0).route_request(1, a, &[]).finish();
        let mut p = Packet::make(IPV4_HEADER_LEN + options.len());
        let total = p.len() as u16;
        {
            let data = p.data_mut();
            data[IPV4_HEADER_LEN..].copy_from_slice(&options);
            let mut ip = Ipv4ViewMut::new(data).unwrap();
            ip.build(a, Ipv4Addr::BROADCAST, wire::SRP_PROTO, 255, total);
            ip.finish();
        }
        let mut strip = StripSrpHeader;
        let mut unstrip = UnstripSrpHeader;
        let marked = strip.simple_action(p).unwrap();
        assert_eq!(marked.vlan_tci_anno(), 1);
        let after = unstrip.simple_action(marked).unwrap();
        assert_eq!(after.vlan_tci_anno(), 0);
    }
}
