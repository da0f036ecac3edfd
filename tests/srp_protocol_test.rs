//! Protocol-level tests for the source-routed routing subsystem: route
//! discovery across a line of nodes, send-buffer capacity and expiry,
//! and the unidirectional-link blacklist.
//!
//! Each node is a real router (route table, link cache, queues for the
//! wire side); a test harness shuttles packets between nodes according
//! to a directed adjacency relation, filling in the last-hop annotations
//! the way a neighbor table element would. Undeliverable unicasts are
//! fed back into the sender's transmission-failure input. All nodes
//! share one manual clock, so multi-second protocol timeouts run
//! instantly.

use patchbay::net::{EtherAddr, Ipv4View, Ipv4ViewMut, IPV4_HEADER_LEN};
use patchbay::srp::wire::{self, Hop, OptionBlock, OptionsBuilder};
use patchbay::{parse_string, BaseErrorHandler, Clock, Packet, Router, RouterThread, Runtime};
use std::net::Ipv4Addr;

fn addr(n: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, n)
}

fn eth(n: u8) -> EtherAddr {
    EtherAddr([2, 0, 0, 0, 0, n])
}

struct Node {
    router: Router,
    ip: Ipv4Addr,
    rt: usize,
    ctl: usize,
    data: usize,
    host: usize,
}

impl Node {
    fn new(ip: Ipv4Addr, clock: Clock) -> Node {
        let runtime = Runtime::with_default_registry();
        let config = format!(
            "lt :: LinkTable(IP {ip});
             rt :: SrpRouteTable(IP {ip}, LINKCACHE lt, DEBUG true);
             rt [0] -> host :: Counter -> Discard;
             rt [1] -> ctl :: Queue(64);
             rt [2] -> data :: Queue(64);"
        );
        let mut errh = BaseErrorHandler::new();
        let mut router =
            parse_string(&config, "node", &runtime, clock, &mut errh).expect("node parses");
        router.initialize(&mut errh).expect("node initializes");
        Node {
            ip,
            rt: router.find("rt").unwrap(),
            ctl: router.find("ctl").unwrap(),
            data: router.find("data").unwrap(),
            host: router.find("host").unwrap(),
            router,
        }
    }

    fn host_count(&self) -> u64 {
        self.router.handler_read(self.host, "count", "").unwrap().parse().unwrap()
    }

    fn read(&self, handler: &str) -> String {
        self.router.handler_read(self.rt, handler, "").unwrap()
    }
}

/// A delivered packet, as observed on the simulated medium.
struct Delivery {
    from: usize,
    to: usize,
    packet: Packet,
}

struct Net {
    nodes: Vec<Node>,
    /// Directed adjacency: `(i, j)` present means j hears i.
    links: Vec<(usize, usize)>,
    clock: Clock,
    log: Vec<Delivery>,
}

impl Net {
    fn new(ips: &[u8]) -> Net {
        let clock = Clock::manual();
        let nodes = ips.iter().map(|n| Node::new(addr(*n), clock.clone())).collect();
        Net { nodes, links: Vec::new(), clock, log: Vec::new() }
    }

    fn link_both(&mut self, i: usize, j: usize) {
        self.links.push((i, j));
        self.links.push((j, i));
    }

    fn hears(&self, from: usize, to: usize) -> bool {
        self.links.contains(&(from, to))
    }

    fn node_by_ip(&self, ip: Ipv4Addr) -> Option<usize> {
        self.nodes.iter().position(|n| n.ip == ip)
    }

    fn annotate(&self, from: usize, p: &mut Packet) {
        wire::set_last_hop_ip(p, self.nodes[from].ip);
        wire::set_last_hop_ether(p, eth(u32::from(self.nodes[from].ip) as u8));
    }

    fn deliver(&mut self, from: usize, p: Packet) {
        let dst = p.dst_ip_anno();
        if dst == Ipv4Addr::BROADCAST {
            let hearers: Vec<usize> =
                (0..self.nodes.len()).filter(|j| self.hears(from, *j)).collect();
            for j in hearers {
                let mut copy = p.clone();
                self.annotate(from, &mut copy);
                self.log.push(Delivery { from, to: j, packet: copy.clone() });
                self.nodes[j].router.push_into(self.nodes[j].rt, 1, copy);
            }
            return;
        }
        match self.node_by_ip(dst) {
            Some(j) if self.hears(from, j) => {
                let mut p = p;
                self.annotate(from, &mut p);
                self.log.push(Delivery { from, to: j, packet: p.clone() });
                self.nodes[j].router.push_into(self.nodes[j].rt, 1, p);
            }
            _ => {
                // Transmission failure: hand the packet back on input 2.
                self.nodes[from].router.push_into(self.nodes[from].rt, 2, p);
            }
        }
    }

    /// Runs timers and moves packets until the network is quiet.
    fn settle(&mut self) {
        for _ in 0..64 {
            let mut moved = false;
            for i in 0..self.nodes.len() {
                RouterThread::new(&self.nodes[i].router).process_pending(1000);
                loop {
                    let ctl = self.nodes[i].router.pull_from(self.nodes[i].ctl, 0);
                    let data = self.nodes[i].router.pull_from(self.nodes[i].data, 0);
                    if ctl.is_none() && data.is_none() {
                        break;
                    }
                    moved = true;
                    if let Some(p) = ctl {
                        self.deliver(i, p);
                    }
                    if let Some(p) = data {
                        self.deliver(i, p);
                    }
                }
            }
            if !moved {
                return;
            }
        }
        panic!("network did not settle");
    }

    fn advance_and_settle(&mut self, ms: i64) {
        self.clock.advance_msec(ms);
        self.settle();
    }
}

/// A plain IP packet, as a host would hand to input 0.
fn ip_packet(src: Ipv4Addr, dst: Ipv4Addr, proto: u8, payload: &[u8]) -> Packet {
    let mut p = Packet::make(IPV4_HEADER_LEN + payload.len());
    let total = p.len() as u16;
    {
        let data = p.data_mut();
        data[IPV4_HEADER_LEN..].copy_from_slice(payload);
        let mut ip = Ipv4ViewMut::new(data).unwrap();
        ip.build(src, dst, proto, 64, total);
        ip.finish();
    }
    p.set_network_header(0);
    p
}

/// A protocol packet built from already-encoded options.
fn protocol_packet(options: Vec<u8>, src: Ipv4Addr, dst: Ipv4Addr, ttl: u8) -> Packet {
    let mut p = Packet::make(IPV4_HEADER_LEN + options.len());
    let total = p.len() as u16;
    {
        let data = p.data_mut();
        data[IPV4_HEADER_LEN..].copy_from_slice(&options);
        let mut ip = Ipv4ViewMut::new(data).unwrap();
        ip.build(src, dst, wire::SRP_PROTO, ttl, total);
        ip.finish();
    }
    p.set_network_header(0);
    p
}

#[test_log::test]
fn route_discovery_across_a_three_node_line() {
    let mut net = Net::new(&[1, 2, 3]);
    net.link_both(0, 1); // A - B
    net.link_both(1, 2); // B - C

    // A sends an IP packet to C; no route exists yet.
    let p = ip_packet(addr(1), addr(3), 17, b"hello line");
    net.nodes[0].router.push_into(net.nodes[0].rt, 0, p);
    net.settle();

    // The packet arrived at C's host, decapsulated.
    assert_eq!(net.nodes[2].host_count(), 1);

    // B rebroadcast the request with its own address appended.
    let forwarded_rreq = net.log.iter().find_map(|d| {
        if d.from != 1 {
            return None;
        }
        match wire::read_option(&d.packet, wire::OPTIONS_OFFSET) {
            Some((OptionBlock::RouteRequest { hops, .. }, _)) if !hops.is_empty() => Some(hops),
            _ => None,
        }
    });
    assert_eq!(
        forwarded_rreq.expect("B forwards the request").last().map(|h| h.ip),
        Some(addr(2))
    );

    // C answered with a reply whose payload route is the reversed
    // accumulated route: C, B, A; it travels hop by hop toward B first.
    let reply = net.log.iter().find_map(|d| {
        if d.from != 2 || d.to != 1 {
            return None;
        }
        match wire::read_option(&d.packet, wire::OPTIONS_OFFSET) {
            Some((OptionBlock::RouteReply { hops, .. }, _)) => Some(hops),
            _ => None,
        }
    });
    let reply = reply.expect("C replies");
    assert_eq!(
        reply.iter().map(|h| h.ip).collect::<Vec<_>>(),
        vec![addr(3), addr(2), addr(1)]
    );

    // A's outgoing data packet carried a source route with next hop B.
    let data = net.log.iter().find(|d| {
        d.from == 0 && wire::first_option_type(&d.packet) == Some(wire::TYPE_SOURCE_ROUTE)
    });
    let data = data.expect("A emits source-routed data");
    assert_eq!(data.packet.dst_ip_anno(), addr(2));
    match wire::read_option(&data.packet, wire::OPTIONS_OFFSET) {
        Some((OptionBlock::SourceRoute { hops, segments_left, .. }, _)) => {
            assert_eq!(hops.iter().map(|h| h.ip).collect::<Vec<_>>(), vec![addr(2)]);
            assert_eq!(segments_left, 1);
        }
        other => panic!("unexpected option {other:?}"),
    }

    // With the route cached, a second packet goes straight out.
    let log_len = net.log.len();
    let p = ip_packet(addr(1), addr(3), 17, b"again");
    net.nodes[0].router.push_into(net.nodes[0].rt, 0, p);
    net.settle();
    assert_eq!(net.nodes[2].host_count(), 2);
    let new_requests = net.log[log_len..]
        .iter()
        .filter(|d| wire::first_option_type(&d.packet) == Some(wire::TYPE_RREQ))
        .count();
    assert_eq!(new_requests, 0, "cached route needs no new flood");
}

#[test_log::test]
fn send_buffer_caps_holds_and_expires() {
    let mut net = Net::new(&[1]);

    // Six packets for an unreachable destination: capacity five, the
    // newest overflow is dropped.
    for i in 0..6u8 {
        let p = ip_packet(addr(1), addr(9), 17, &[i]);
        net.nodes[0].router.push_into(net.nodes[0].rt, 0, p);
    }
    net.settle();
    assert_eq!(net.nodes[0].read("sendbuffer").trim(), "10.0.0.9 5");

    // Requests keep reissuing under backoff while the buffer waits.
    net.advance_and_settle(600);
    net.advance_and_settle(600);

    // After the lifetime passes, the buffer drains and querying stops.
    net.advance_and_settle(5000);
    assert_eq!(net.nodes[0].read("sendbuffer").trim(), "");

    // No further request activity once the last buffered packet died.
    net.advance_and_settle(10_000);
    net.advance_and_settle(10_000);
    assert_eq!(net.nodes[0].read("sendbuffer").trim(), "");
}

#[test_log::test]
fn blacklist_infers_and_retests_unidirectional_links() {
    // Node A alone; B exists only as crafted traffic. The A->B
    // direction is broken: A's reply transmission failed.
    let mut net = Net::new(&[1]);
    let a = addr(1);
    let b = addr(2);
    let s = addr(3);
    let target = addr(9);

    // A route reply A sent toward S via B, reported back as failed.
    let failed_reply = {
        let reversed = [Hop::with_metric(a, 1), Hop::with_metric(b, 1), Hop::with_metric(s, 1)];
        let sr = [Hop::with_metric(b, 0)];
        let options = OptionsBuilder::new(0)
            .route_reply(&reversed)
            .source_route(0, 1, &sr)
            .finish();
        protocol_packet(options, a, s, 255)
    };
    net.nodes[0].router.push_into(net.nodes[0].rt, 2, failed_reply);
    net.settle();
    assert!(net.nodes[0].read("blacklist").contains("probable"));

    // A request arriving from B is dropped while the link is probably
    // unidirectional.
    let rreq_from_b = |id: u16| {
        let options = OptionsBuilder::new(0)
            .route_request(id, target, &[Hop::with_metric(b, 1)])
            .finish();
        let mut p = protocol_packet(options, s, Ipv4Addr::BROADCAST, 200);
        wire::set_last_hop_ip(&mut p, b);
        wire::set_last_hop_ether(&mut p, eth(2));
        p
    };
    net.nodes[0].router.push_into(net.nodes[0].rt, 1, rreq_from_b(100));
    net.settle();
    assert!(net.log.is_empty(), "nothing may leave an isolated node");

    // After 45 s the entry downgrades to questionable...
    net.advance_and_settle(45_500);
    assert!(net.nodes[0].read("blacklist").contains("questionable"));

    // ...so the next request triggers a one-hop unicast test instead of
    // a forward. The test request goes to B with TTL 1.
    net.nodes[0].router.push_into(net.nodes[0].rt, 1, rreq_from_b(101));
    let test_rreq = net.nodes[0].router.pull_from(net.nodes[0].ctl, 0).expect("unicast test issued");
    let ip = Ipv4View::new(test_rreq.data()).unwrap();
    assert_eq!(ip.dst(), b);
    assert_eq!(ip.ttl(), 1);
    assert!(net.nodes[0].router.pull_from(net.nodes[0].ctl, 0).is_none(), "held, not forwarded");

    // B proves it can hear us: a source-routed data packet arrives from
    // B, clearing the blacklist entry.
    let data_from_b = {
        let options = OptionsBuilder::new(17).source_route(0, 0, &[]).finish();
        let mut p = protocol_packet(options, b, a, 64);
        wire::set_last_hop_ip(&mut p, b);
        wire::set_last_hop_ether(&mut p, eth(2));
        p
    };
    net.nodes[0].router.push_into(net.nodes[0].rt, 1, data_from_b);
    net.settle();
    assert_eq!(net.nodes[0].read("blacklist").trim(), "");
    assert_eq!(net.nodes[0].host_count(), 1);

    // The held request goes out on the next expiry sweep, with A
    // appended to the accumulated route.
    net.clock.advance_msec(15_000);
    RouterThread::new(&net.nodes[0].router).process_pending(1000);
    let forwarded = net.nodes[0].router.pull_from(net.nodes[0].ctl, 0).expect("held request forwarded");
    match wire::read_option(&forwarded, wire::OPTIONS_OFFSET) {
        Some((OptionBlock::RouteRequest { hops, .. }, _)) => {
            assert_eq!(hops.iter().map(|h| h.ip).collect::<Vec<_>>(), vec![b, a]);
        }
        other => panic!("unexpected option {other:?}"),
    }
    assert_eq!(forwarded.dst_ip_anno(), Ipv4Addr::BROADCAST);
}
