//! The source-routed on-demand routing element.
//!
//! Three push inputs, three push outputs:
//!
//! - input 0: IP packets from the local host;
//! - input 1: inbound protocol packets, already demultiplexed;
//! - input 2: packets whose transmission to a next hop failed;
//! - output 0: packets for the local host (decapsulated);
//! - output 1: protocol control packets for the wire;
//! - output 2: forwardable data packets for the wire.
//!
//! Routes are discovered by flooding route requests that accumulate a hop
//! list; the target answers with a route reply carrying the reversed
//! route; data is then wrapped in a source-route option listing the
//! remaining hops. Transmission failures invalidate links, raise route
//! errors toward packet sources, and feed a blacklist that infers
//! unidirectional links (a reply that cannot be delivered back over a
//! link we heard a request on is the telltale). Packets with no route
//! wait in a bounded per-destination send buffer while requests go out
//! under exponential backoff.

use crate::config::args::Args;
use crate::element::{Context, Element, ElementRef, PUSH};
use crate::error::ErrorHandler;
use crate::handler::{HandlerInfo, HandlerRegistry};
use crate::net::{EtherAddr, Ipv4View, Ipv4ViewMut, IPV4_HEADER_LEN};
use crate::packet::Packet;
use crate::srp::link_cache::LinkCache;
use crate::srp::tables::*;
use crate::srp::wire::{self, Hop, OptionBlock, Route};
use crate::timer::TimerId;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// Wire size of a route-reply option carrying `n` entries.
fn rrep_wire_len(n: usize) -> usize {
    4 + 5 * n
}

/// Wire size of the route-error option (fixed).
const RERR_WIRE_LEN: usize = 16;

/// The routing element. See the module docs for the port contract.
pub struct SrpRouteTable {
    ip: Ipv4Addr,
    link_cache: ElementRef,
    out_queue: Option<ElementRef>,
    metric: Option<ElementRef>,
    use_blacklist: bool,
    debug: bool,

    sendbuffer: HashMap<Ipv4Addr, Vec<BufferedPacket>>,
    forwarded: HashMap<ForwardedReqKey, ForwardedReqVal>,
    initiated: HashMap<Ipv4Addr, InitiatedRequest>,
    blacklist: HashMap<Ipv4Addr, BlacklistEntry>,

    sendbuffer_check_routes: bool,
    rreq_id: u16,

    rreq_expire_timer: Option<TimerId>,
    rreq_issue_timer: Option<TimerId>,
    sendbuffer_timer: Option<TimerId>,
    blacklist_timer: Option<TimerId>,
}

impl Default for SrpRouteTable {
    fn default() -> SrpRouteTable {
        SrpRouteTable {
            ip: Ipv4Addr::UNSPECIFIED,
            link_cache: ElementRef(usize::MAX),
            out_queue: None,
            metric: None,
            use_blacklist: true,
            debug: false,
            sendbuffer: HashMap::new(),
            forwarded: HashMap::new(),
            initiated: HashMap::new(),
            blacklist: HashMap::new(),
            sendbuffer_check_routes: false,
            rreq_id: 0,
            rreq_expire_timer: None,
            rreq_issue_timer: None,
            sendbuffer_timer: None,
            blacklist_timer: None,
        }
    }
}

macro_rules! chatter {
    ($self:ident, $($arg:tt)*) => {
        if $self.debug {
            debug!($($arg)*);
        }
    };
}

impl SrpRouteTable {
    // --- collaborators ---------------------------------------------------

    fn with_link_cache<R>(
        &self,
        ctx: &Context<'_>,
        f: impl FnOnce(&mut dyn LinkCache) -> R,
    ) -> Option<R> {
        ctx.with_element_mut(self.link_cache, |e| e.as_link_cache_mut().map(f))?
    }

    fn best_route(&self, ctx: &Context<'_>, dst: Ipv4Addr) -> Vec<Ipv4Addr> {
        self.with_link_cache(ctx, |lc| lc.best_route(dst)).unwrap_or_default()
    }

    fn add_route_to_link_cache(&self, ctx: &Context<'_>, route: &[Hop]) {
        self.with_link_cache(ctx, |lc| {
            for pair in route.windows(2) {
                let metric = pair[1].metric;
                let metric = if metric == wire::INVALID_HOP_METRIC {
                    wire::INVALID_ROUTE_METRIC as u32
                } else {
                    metric as u32
                };
                lc.update_link(pair[0].ip, pair[1].ip, metric);
            }
        });
    }

    fn invalidate_link(&self, ctx: &Context<'_>, a: Ipv4Addr, b: Ipv4Addr) {
        self.with_link_cache(ctx, |lc| lc.invalidate_link(a, b));
    }

    /// The scaled metric of the link from the neighbor that handed us
    /// this packet, by its Ethernet address. Hop count when no metric
    /// element is configured.
    fn get_metric(&self, ctx: &Context<'_>, other: EtherAddr) -> u8 {
        let Some(metric) = self.metric else {
            return 1;
        };
        ctx.with_element(metric, |e| {
            let Some(m) = e.as_metric() else {
                return wire::INVALID_HOP_METRIC;
            };
            let value = m.get_link_metric(ctx.router(), other, false);
            let c = m.scale_to_char(value);
            if !value.good() || c >= wire::INVALID_HOP_METRIC {
                wire::INVALID_HOP_METRIC
            } else {
                c
            }
        })
        .unwrap_or(wire::INVALID_HOP_METRIC)
    }

    /// The composite metric of an accumulated route; hop count when no
    /// metric element is configured.
    fn route_metric(&self, ctx: &Context<'_>, route: &[Hop]) -> u16 {
        if route.len() < 2 {
            warn!("route metric of a route shorter than two nodes");
            return wire::INVALID_ROUTE_METRIC;
        }
        let Some(metric) = self.metric else {
            return route.len() as u16;
        };
        ctx.with_element(metric, |e| {
            let Some(m) = e.as_metric() else {
                return wire::INVALID_ROUTE_METRIC;
            };
            if route[1].metric == wire::INVALID_HOP_METRIC {
                return wire::INVALID_ROUTE_METRIC;
            }
            let mut acc = m.unscale_from_char(route[1].metric);
            for hop in &route[2..] {
                if hop.metric == wire::INVALID_HOP_METRIC {
                    return wire::INVALID_ROUTE_METRIC;
                }
                acc = m.append_metric(acc, m.unscale_from_char(hop.metric));
            }
            if acc.good() {
                m.scale_to_char(acc) as u16
            } else {
                wire::INVALID_ROUTE_METRIC
            }
        })
        .unwrap_or(wire::INVALID_ROUTE_METRIC)
    }

    fn metric_preferable(&self, ctx: &Context<'_>, a: u16, b: u16) -> bool {
        if self.metric.is_none() {
            return a < b;
        }
        if a == wire::INVALID_ROUTE_METRIC || b == wire::INVALID_ROUTE_METRIC {
            return a != 0; // arbitrary when either side is invalid
        }
        ctx.with_element(self.metric.unwrap_or(ElementRef(usize::MAX)), |e| {
            e.as_metric().is_some_and(|m| {
                m.metric_val_lt(m.unscale_from_char(a as u8), m.unscale_from_char(b as u8))
            })
        })
        .unwrap_or(false)
    }

    // --- blacklist -------------------------------------------------------

    fn check_blacklist(&self, ip: Ipv4Addr) -> Option<BlacklistStatus> {
        if !self.use_blacklist {
            return None;
        }
        self.blacklist.get(&ip).map(|e| e.status)
    }

    fn set_blacklist(&mut self, ip: Ipv4Addr, status: Option<BlacklistStatus>, now: crate::timestamp::Timestamp) {
        self.blacklist.remove(&ip);
        if let Some(status) = status {
            self.blacklist.insert(ip, BlacklistEntry { time_updated: now, status });
        }
    }

    // --- packet building -------------------------------------------------

    /// Builds a fresh protocol packet: IPv4 header, fixed options header,
    /// and `options` (already encoded).
    fn make_protocol_packet(&self, options: Vec<u8>, src: Ipv4Addr, dst: Ipv4Addr, ttl: u8) -> Packet {
        let mut p = Packet::make(IPV4_HEADER_LEN + options.len());
        let total = p.len() as u16;
        {
            let data = p.data_mut();
            data[IPV4_HEADER_LEN..].copy_from_slice(&options);
            if let Some(mut ip) = Ipv4ViewMut::new(data) {
                ip.build(src, dst, wire::SRP_PROTO, ttl, total);
                ip.finish();
            }
        }
        p.set_network_header(0);
        p
    }

    /// Wraps a plain IP packet with the fixed header and a source-route
    /// option for `route`, and sets the next-hop annotation. `route`
    /// includes both endpoints.
    fn add_srp_header(&self, mut p: Packet, route: &[Ipv4Addr]) -> Packet {
        debug_assert!(route.len() >= 2);
        let hop_count = route.len() - 2;
        let hops: Route =
            route[1..route.len() - 1].iter().map(|ip| Hop::with_metric(*ip, 0)).collect();
        let options =
            wire::OptionsBuilder::new(Ipv4View::new(p.data()).map_or(0, |ip| ip.protocol()))
                .source_route(0, hop_count as u8, &hops)
                .finish();

        let mut saved_ip = [0u8; IPV4_HEADER_LEN];
        saved_ip.copy_from_slice(&p.data()[..IPV4_HEADER_LEN]);

        p.push(options.len());
        let total = p.len() as u16;
        {
            let data = p.data_mut();
            data[..IPV4_HEADER_LEN].copy_from_slice(&saved_ip);
            data[IPV4_HEADER_LEN..IPV4_HEADER_LEN + options.len()].copy_from_slice(&options);
            if let Some(mut ip) = Ipv4ViewMut::new(data) {
                ip.set_protocol(wire::SRP_PROTO);
                ip.set_total_len(total);
                ip.finish();
            }
        }
        p.set_network_header(0);
        p.set_dst_ip_anno(route[1]);
        chatter!(self, next_hop = %route[1], "wrapped data packet with source route");
        p
    }

    /// Removes every protocol header, leaving the original IP packet.
    fn strip_headers(&self, mut p: Packet) -> Packet {
        let Some(fixed) = wire::FixedHeader::read(&p) else {
            warn!("strip on a packet with no protocol header");
            return p;
        };
        let strip = wire::FIXED_LEN + fixed.options_len as usize;
        let mut saved_ip = [0u8; IPV4_HEADER_LEN];
        saved_ip.copy_from_slice(&p.data()[..IPV4_HEADER_LEN]);
        saved_ip[9] = fixed.next_header;
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
        chatter!(self, removed = strip, "stripped protocol headers");
        p
    }

    // --- route extraction ------------------------------------------------

    /// The route a request has accumulated so far:
    /// `[ip source, entries...]`.
    fn extract_request_route(p: &Packet) -> Route {
        let Some(ip) = Ipv4View::new(p.data()) else { return Route::new() };
        let mut route = vec![Hop::new(ip.src())];
        if let Some((OptionBlock::RouteRequest { hops, .. }, _)) =
            wire::read_option(p, wire::OPTIONS_OFFSET)
        {
            route.extend(hops);
        }
        route
    }

    /// The route carried by a reply: `[target, ..., requester]` (the
    /// reverse of the accumulated request route).
    fn extract_reply_route(p: &Packet) -> Route {
        match wire::read_option(p, wire::OPTIONS_OFFSET) {
            Some((OptionBlock::RouteReply { hops, .. }, _)) => hops,
            _ => Route::new(),
        }
    }

    /// The full path of the source-route option at `offset`:
    /// `[ip source, entries..., ip destination]`.
    fn extract_source_route(p: &Packet, offset: usize) -> Route {
        let Some(ip) = Ipv4View::new(p.data()) else { return Route::new() };
        let mut route = vec![Hop::new(ip.src())];
        if let Some((OptionBlock::SourceRoute { hops, .. }, _)) = wire::read_option(p, offset) {
            route.extend(hops);
        }
        route.push(Hop::new(ip.dst()));
        route
    }

    // --- control packet origination --------------------------------------

    /// Builds and emits a route request for `dst`; a unicast request with
    /// TTL 1 is the unidirectionality test.
    fn issue_rreq(&mut self, ctx: &Context<'_>, dst: Ipv4Addr, ttl: u8, unicast: bool) {
        let options = wire::OptionsBuilder::new(0)
            .route_request(self.rreq_id, dst, &[])
            .finish();
        let ip_dst = if unicast { dst } else { Ipv4Addr::BROADCAST };
        let mut p = self.make_protocol_packet(options, self.ip, ip_dst, ttl);
        p.set_dst_ip_anno(ip_dst);
        self.rreq_id = self.rreq_id.wrapping_add(1);
        chatter!(self, target = %dst, unicast, "issuing route request");
        ctx.output(1).push(p);
    }

    /// Builds and emits a route reply toward `requester`. `reversed` is
    /// the reverse of the accumulated request route, `[me, ...,
    /// requester]`; it is both the reply's payload route and its
    /// delivery source route.
    fn issue_rrep(&mut self, ctx: &Context<'_>, requester: Ipv4Addr, reversed: &[Hop]) {
        if reversed.len() < 2 {
            warn!("reply route shorter than two hops");
            return;
        }
        let sr_hops: Route = reversed[1..reversed.len() - 1].to_vec();
        let options = wire::OptionsBuilder::new(0)
            .route_reply(reversed)
            .source_route(0, sr_hops.len() as u8, &sr_hops)
            .finish();
        let mut p = self.make_protocol_packet(options, self.ip, requester, 255);
        p.set_dst_ip_anno(reversed[1].ip);
        chatter!(self, requester = %requester, next_hop = %reversed[1].ip, "issuing route reply");
        ctx.output(1).push(p);
    }

    /// Builds and emits a route error about the broken link
    /// `bad_src -> bad_dst`, delivered to `src` along `rev_route`
    /// (`[me, ..., src]`).
    fn issue_rerr(
        &mut self,
        ctx: &Context<'_>,
        bad_src: Ipv4Addr,
        bad_dst: Ipv4Addr,
        src: Ipv4Addr,
        rev_route: &[Hop],
    ) {
        if rev_route.len() < 2 {
            warn!("route error path shorter than two hops");
            return;
        }
        let sr_hops: Route = rev_route[1..rev_route.len() - 1].to_vec();
        let options = wire::OptionsBuilder::new(0)
            .route_error(bad_src, src, bad_dst)
            .source_route(0, sr_hops.len() as u8, &sr_hops)
            .finish();
        let mut p = self.make_protocol_packet(options, bad_src, src, 255);
        p.set_dst_ip_anno(rev_route[1].ip);
        chatter!(self, bad_src = %bad_src, bad_dst = %bad_dst, "issuing route error");
        ctx.output(1).push(p);
    }

    // --- forwarding ------------------------------------------------------

    /// Rebroadcasts a request after appending our own hop entry.
    fn forward_rreq(&self, ctx: &Context<'_>, mut p: Packet) {
        let last_eth = wire::last_hop_ether(&p);
        wire::append_request_hop(&mut p, Hop::with_metric(self.ip, self.get_metric(ctx, last_eth)));
        let total = p.len() as u16;
        {
            let data = p.data_mut();
            if let Some(mut ip) = Ipv4ViewMut::new(data) {
                ip.decrement_ttl();
                ip.set_total_len(total);
                ip.finish();
            }
        }
        p.set_dst_ip_anno(Ipv4Addr::BROADCAST);
        chatter!(self, "forwarding route request");
        ctx.output(1).push(p);
    }

    /// Advances the source-route option at `offset` and pushes the packet
    /// out `port` with the next-hop annotation set.
    fn forward_sr(&self, ctx: &Context<'_>, mut p: Packet, offset: usize, port: usize) {
        if offset > p.len() {
            chatter!(self, offset, len = p.len(), "source-route offset beyond packet");
            p.kill();
            return;
        }
        wire::decrement_segments_left(&mut p, offset);
        match wire::next_sr_hop(&p, offset) {
            Some(next) => {
                p.set_dst_ip_anno(next);
                chatter!(self, next_hop = %next, "forwarding along source route");
                ctx.output(port).push(p);
            }
            None => {
                warn!("source route option not found where expected");
                p.kill();
            }
        }
    }

    fn forward_rrep(&self, ctx: &Context<'_>, p: Packet) {
        let n = Self::extract_reply_route(&p).len();
        self.forward_sr(ctx, p, wire::OPTIONS_OFFSET + rrep_wire_len(n), 1);
    }

    fn forward_rerr(&self, ctx: &Context<'_>, p: Packet) {
        self.forward_sr(ctx, p, wire::OPTIONS_OFFSET + RERR_WIRE_LEN, 1);
    }

    fn forward_data(&self, ctx: &Context<'_>, p: Packet) {
        self.forward_sr(ctx, p, wire::OPTIONS_OFFSET, 2);
    }

    // --- send buffer and request origination -----------------------------

    fn buffer_packet(&mut self, ctx: &Context<'_>, p: Packet) {
        let Some(ip) = Ipv4View::new(p.data()) else {
            p.kill();
            return;
        };
        let dst = ip.dst();
        let buffer = self.sendbuffer.entry(dst).or_default();
        if buffer.len() >= SENDBUFFER_MAX_LENGTH {
            chatter!(self, dst = %dst, "send buffer full; dropping packet");
            p.kill();
        } else {
            buffer.push(BufferedPacket::new(p, ctx.now()));
            chatter!(self, dst = %dst, buffered = buffer.len(), "buffered packet awaiting route");
        }
    }

    fn start_issuing_request(&mut self, ctx: &Context<'_>, host: Ipv4Addr) {
        if self.initiated.contains_key(&host) {
            return;
        }
        self.initiated.insert(host, InitiatedRequest::new(host, ctx.now()));
        self.issue_rreq(ctx, host, RREQ_TTL1, false);
    }

    fn stop_issuing_request(&mut self, host: Ipv4Addr) {
        self.initiated.remove(&host);
    }

    /// Removes packets whose source route crosses the link `a -> b` from
    /// the configured outbound queue.
    fn yank_broken_link(&self, ctx: &Context<'_>, a: Ipv4Addr, b: Ipv4Addr) {
        let Some(outq) = self.out_queue else { return };
        let yanked = ctx
            .with_element_mut(outq, |e| {
                e.as_storage_mut().map(|s| {
                    s.yank(&mut |p| link_filter(p, a, b))
                })
            })
            .flatten()
            .unwrap_or_default();
        if !yanked.is_empty() {
            chatter!(self, count = yanked.len(), "yanked packets with broken link");
        }
        for p in yanked {
            p.kill();
        }
    }

    // --- input handlers --------------------------------------------------

    /// Input 0: an IP packet from the local host.
    fn handle_local(&mut self, ctx: &Context<'_>, p: Packet) {
        let Some(ip) = Ipv4View::new(p.data()) else {
            warn!("local packet without an IP header");
            p.kill();
            return;
        };
        let dst = ip.dst();
        chatter!(self, dst = %dst, "local packet");
        if dst == self.ip {
            ctx.output(0).push(p);
            return;
        }
        let route = self.best_route(ctx, dst);
        if route.len() > 1 {
            let p = self.add_srp_header(p, &route);
            ctx.output(2).push(p);
        } else {
            chatter!(self, dst = %dst, "no route; buffering and querying");
            self.buffer_packet(ctx, p);
            self.start_issuing_request(ctx, dst);
        }
    }

    /// Input 1, route request.
    fn handle_rreq(&mut self, ctx: &Context<'_>, p: Packet) {
        let (src_addr, target, id, ttl) = {
            let Some(ip) = Ipv4View::new(p.data()) else {
                p.kill();
                return;
            };
            let Some((OptionBlock::RouteRequest { id, target, .. }, _)) =
                wire::read_option(&p, wire::OPTIONS_OFFSET)
            else {
                p.kill();
                return;
            };
            (ip.src(), target, id, ip.ttl())
        };

        // Accumulate ourselves onto the recorded route and feed the whole
        // route into the link cache.
        let mut request_route = Self::extract_request_route(&p);
        let last_eth = wire::last_hop_ether(&p);
        request_route.push(Hop::with_metric(self.ip, self.get_metric(ctx, last_eth)));
        self.add_route_to_link_cache(ctx, &request_route);

        if self.ip == src_addr {
            chatter!(self, "our own request came back; dropping");
            p.kill();
            return;
        }
        if self.ip == target {
            let reversed = wire::reverse_route(&request_route);
            chatter!(self, requester = %src_addr, "request reached its target; replying");
            self.issue_rrep(ctx, src_addr, &reversed);
            p.kill();
            return;
        }

        // Forwarding decision.
        if ttl <= 1 {
            chatter!(self, "time to live expired; dropping request");
            p.kill();
            return;
        }
        if wire::route_index_of(&request_route, self.ip) != Some(request_route.len() - 1) {
            chatter!(self, "already listed in this request; dropping");
            p.kill();
            return;
        }

        let key = ForwardedReqKey { src: src_addr, target, id };
        let this_metric = self.route_metric(ctx, &request_route);
        let old_metric = self.forwarded.get(&key).map(|v| v.best_metric);
        if let Some(old_metric) = old_metric {
            if !self.metric_preferable(ctx, this_metric, old_metric) {
                chatter!(self, "already forwarded this request with a better route; dropping");
                p.kill();
                return;
            }
        }

        let now = ctx.now();
        let last_forwarder = wire::last_hop_ip(&p);
        match self.check_blacklist(last_forwarder) {
            Some(BlacklistStatus::Probable) => {
                chatter!(self, neighbor = %last_forwarder, "request came over a probably unidirectional link; dropping");
                p.kill();
            }
            Some(BlacklistStatus::Questionable) => {
                if old_metric.is_some() {
                    // A test for this request is already outstanding; we
                    // drop the better copy rather than track several.
                    chatter!(self, "unidirectionality test already issued; dropping");
                    p.kill();
                    return;
                }
                chatter!(self, neighbor = %last_forwarder, "link questionable; issuing one-hop test request");
                self.issue_rreq(ctx, last_forwarder, 1, true);
                self.forwarded.insert(
                    key,
                    ForwardedReqVal {
                        time_forwarded: now,
                        best_metric: wire::INVALID_ROUTE_METRIC,
                        time_unidtest_issued: now,
                        pending: Some(p),
                    },
                );
            }
            None => {
                if let Some(old) = self.forwarded.get_mut(&key) {
                    if let Some(stale) = old.pending.take() {
                        // A better copy arrived over a clear link while a
                        // test was outstanding; give up on the test.
                        stale.kill();
                    }
                }
                self.forwarded.insert(
                    key,
                    ForwardedReqVal {
                        time_forwarded: now,
                        best_metric: this_metric,
                        time_unidtest_issued: now,
                        pending: None,
                    },
                );
                self.forward_rreq(ctx, p);
            }
        }
    }

    /// Input 1, route reply.
    fn handle_rrep(&mut self, ctx: &Context<'_>, p: Packet) {
        let reply_route = Self::extract_reply_route(&p);
        // The payload runs target-to-requester; the forward route is its
        // reverse.
        let forward = wire::reverse_route(&reply_route);
        self.add_route_to_link_cache(ctx, &forward);

        chatter!(self, hops = reply_route.len(), "received route reply");

        // Fresh route information: look at the send buffer on the next
        // tick.
        self.sendbuffer_check_routes = true;
        if let Some(timer) = self.sendbuffer_timer {
            ctx.timer(timer).schedule_now();
        }

        let now = ctx.now();
        let last_forwarder = wire::last_hop_ip(&p);
        self.set_blacklist(last_forwarder, None, now);

        let Some(ip) = Ipv4View::new(p.data()) else {
            p.kill();
            return;
        };
        if ip.dst() == self.ip {
            if let Some(first) = reply_route.first() {
                chatter!(self, discovered = %first.ip, "route reply reached us; route discovered");
                self.stop_issuing_request(first.ip);
            }
            p.kill();
        } else {
            self.forward_rrep(ctx, p);
        }
    }

    /// Input 1, route error.
    fn handle_rerr(&mut self, ctx: &Context<'_>, p: Packet) {
        let Some((OptionBlock::RouteError { code, err_src, err_dst, unreachable, .. }, _)) =
            wire::read_option(&p, wire::OPTIONS_OFFSET)
        else {
            p.kill();
            return;
        };
        if code != wire::RERR_NODE_UNREACHABLE {
            warn!(code, "route error with unsupported code; dropping");
            p.kill();
            return;
        }
        chatter!(self, err_src = %err_src, unreachable = %unreachable, "received route error");
        self.invalidate_link(ctx, err_src, unreachable);

        if err_dst == self.ip {
            p.kill();
        } else {
            self.forward_rerr(ctx, p);
        }
        self.yank_broken_link(ctx, err_src, unreachable);
    }

    /// Input 1, source-routed data.
    fn handle_data(&mut self, ctx: &Context<'_>, p: Packet) {
        let now = ctx.now();
        let last_forwarder = wire::last_hop_ip(&p);
        self.set_blacklist(last_forwarder, None, now);

        let Some(ip) = Ipv4View::new(p.data()) else {
            p.kill();
            return;
        };
        if ip.dst() == self.ip {
            let p = self.strip_headers(p);
            ctx.output(0).push(p);
        } else {
            self.forward_data(ctx, p);
        }
    }

    /// Input 2: transmission to the next hop failed.
    fn handle_tx_failure(&mut self, ctx: &Context<'_>, p: Packet) {
        let bad_src = self.ip;
        let Some(first_type) = wire::first_option_type(&p) else {
            p.kill();
            return;
        };

        let (bad_dst, sr_offset) = match first_type {
            wire::TYPE_RREQ => {
                // The only unicast requests are our own one-hop
                // unidirectionality tests.
                match wire::read_option(&p, wire::OPTIONS_OFFSET) {
                    Some((OptionBlock::RouteRequest { target, .. }, _)) => {
                        (Some(target), wire::OPTIONS_OFFSET)
                    }
                    _ => (None, wire::OPTIONS_OFFSET),
                }
            }
            wire::TYPE_RREP => {
                let n = Self::extract_reply_route(&p).len();
                let offset = wire::OPTIONS_OFFSET + rrep_wire_len(n);
                (wire::next_sr_hop(&p, offset), offset)
            }
            wire::TYPE_RERR => {
                let offset = wire::OPTIONS_OFFSET + RERR_WIRE_LEN;
                (wire::next_sr_hop(&p, offset), offset)
            }
            _ => (wire::next_sr_hop(&p, wire::OPTIONS_OFFSET), wire::OPTIONS_OFFSET),
        };
        let Some(bad_dst) = bad_dst else {
            warn!("transmission failure on an unparseable packet; dropping");
            p.kill();
            return;
        };
        chatter!(self, bad_dst = %bad_dst, "transmission failed toward next hop");

        if first_type == wire::TYPE_RREP || first_type == wire::TYPE_RREQ {
            // A reply (or one-hop test) we could not deliver over a link
            // we heard from: the signature of a unidirectional link.
            let now = ctx.now();
            self.set_blacklist(bad_dst, Some(BlacklistStatus::Probable), now);
        }

        self.invalidate_link(ctx, bad_src, bad_dst);

        let Some(ip) = Ipv4View::new(p.data()) else {
            p.kill();
            return;
        };
        if ip.src() == self.ip {
            // We sourced it; nobody upstream to tell.
            p.kill();
            return;
        }

        let source_route = Self::extract_source_route(&p, sr_offset);
        let trunc = wire::truncate_route(&source_route, self.ip);
        if trunc.is_empty() {
            warn!("own address missing from failed packet's source route; dropping");
            p.kill();
            return;
        }
        let rev = wire::reverse_route(&trunc);
        let origin = source_route[0].ip;
        self.issue_rerr(ctx, bad_src, bad_dst, origin, &rev);
        self.yank_broken_link(ctx, bad_src, bad_dst);
        p.kill();
    }

    // --- timer hooks -----------------------------------------------------

    /// Resolves outstanding unidirectionality tests and expires old
    /// forwarded-request entries.
    fn rreq_expire_hook(&mut self, ctx: &Context<'_>) {
        let now = ctx.now();

        let keys: Vec<ForwardedReqKey> = self.forwarded.keys().copied().collect();
        for key in keys {
            let (pending, test_issued) = match self.forwarded.get_mut(&key) {
                Some(v) => (v.pending.take(), v.time_unidtest_issued),
                None => continue,
            };
            if let Some(pending) = pending {
                let req_route = Self::extract_request_route(&pending);
                let last_forwarder = req_route.last().map(|h| h.ip).unwrap_or(Ipv4Addr::UNSPECIFIED);
                let test_age = (now - test_issued).msecval();
                match self.check_blacklist(last_forwarder) {
                    None => {
                        chatter!(self, neighbor = %last_forwarder, "unidirectionality test succeeded; forwarding held request");
                        // The test came back clean, so the metric over
                        // this link is the best we know for the request.
                        let last_eth = wire::last_hop_ether(&pending);
                        let mut route = req_route;
                        route.push(Hop::with_metric(self.ip, self.get_metric(ctx, last_eth)));
                        let best = self.route_metric(ctx, &route);
                        self.forward_rreq(ctx, pending);
                        if let Some(val) = self.forwarded.get_mut(&key) {
                            val.best_metric = best;
                        }
                    }
                    Some(BlacklistStatus::Probable) => {
                        chatter!(self, "unidirectionality test failed; dropping held request");
                        pending.kill();
                    }
                    Some(BlacklistStatus::Questionable) => {
                        if test_age > BLACKLIST_UNITEST_TIMEOUT_MS {
                            chatter!(self, "unidirectionality test timed out; dropping held request");
                            pending.kill();
                        } else if let Some(val) = self.forwarded.get_mut(&key) {
                            val.pending = Some(pending);
                        }
                    }
                }
            }
        }

        self.forwarded.retain(|_, v| {
            let keep = (now - v.time_forwarded).msecval() <= RREQ_TIMEOUT_MS;
            if !keep {
                if let Some(p) = v.pending.take() {
                    p.kill();
                }
            }
            keep
        });

        if let Some(timer) = self.rreq_expire_timer {
            ctx.timer(timer).schedule_after_msec(RREQ_EXPIRE_TIMER_INTERVAL_MS);
        }
    }

    /// Drains buffered packets for destinations that acquired routes and
    /// expires the rest.
    fn sendbuffer_hook(&mut self, ctx: &Context<'_>) {
        let now = ctx.now();
        let mut total = 0usize;
        let mut check_next_time = false;

        let mut map = std::mem::take(&mut self.sendbuffer);
        let mut stop_hosts: Vec<Ipv4Addr> = Vec::new();
        for (dst, buffer) in map.iter_mut() {
            if buffer.is_empty() {
                continue;
            }
            if self.sendbuffer_check_routes {
                let route = self.best_route(ctx, *dst);
                if route.len() > 1 {
                    chatter!(self, dst = %dst, buffered = buffer.len(), "route available; draining send buffer");
                    if total < SENDBUFFER_MAX_BURST {
                        let take = buffer.len().min(SENDBUFFER_MAX_BURST - total);
                        for bp in buffer.drain(..take) {
                            let p = self.add_srp_header(bp.packet, &route);
                            ctx.output(2).push(p);
                            total += 1;
                        }
                        if !buffer.is_empty() {
                            check_next_time = true;
                        }
                    }
                    // A routed destination's leftovers are not expired.
                    continue;
                }
                chatter!(self, dst = %dst, "still no route");
            }

            let before = buffer.len();
            let (kept, expired): (Vec<_>, Vec<_>) = buffer
                .drain(..)
                .partition(|bp| (now - bp.time_added).msecval() < SENDBUFFER_TIMEOUT_MS);
            for bp in expired {
                chatter!(self, "packet expired in send buffer");
                bp.packet.kill();
            }
            *buffer = kept;
            if before > 0 && buffer.is_empty() {
                // The last packet for this destination just expired;
                // stop asking for a route to it.
                stop_hosts.push(*dst);
            }
        }
        map.retain(|_, b| !b.is_empty());
        self.sendbuffer = map;
        for host in stop_hosts {
            self.stop_issuing_request(host);
        }

        self.sendbuffer_check_routes = check_next_time;
        if let Some(timer) = self.sendbuffer_timer {
            ctx.timer(timer).schedule_after_msec(SENDBUFFER_TIMER_INTERVAL_MS);
        }
    }

    /// Reissues requests whose backoff has elapsed; cancels those whose
    /// destination became routable.
    fn rreq_issue_hook(&mut self, ctx: &Context<'_>) {
        let now = ctx.now();
        let targets: Vec<Ipv4Addr> = self.initiated.keys().copied().collect();
        let mut remove: Vec<Ipv4Addr> = Vec::new();
        for target in targets {
            if self.best_route(ctx, target).len() > 1 {
                // A route arrived by some other means.
                remove.push(target);
                continue;
            }
            let reissue = {
                let Some(req) = self.initiated.get_mut(&target) else { continue };
                if (now - req.time_last_issued).msecval() > req.backoff_interval_ms {
                    req.reissue(now);
                    Some(req.ttl)
                } else {
                    None
                }
            };
            if let Some(ttl) = reissue {
                chatter!(self, target = %target, "reissuing route request");
                self.issue_rreq(ctx, target, ttl, false);
            }
        }
        for target in remove {
            self.initiated.remove(&target);
        }
        if let Some(timer) = self.rreq_issue_timer {
            ctx.timer(timer).schedule_after_msec(RREQ_ISSUE_TIMER_INTERVAL_MS);
        }
    }

    /// Downgrades old probable entries to questionable.
    fn blacklist_hook(&mut self, ctx: &Context<'_>) {
        let now = ctx.now();
        for (ip, entry) in self.blacklist.iter_mut() {
            if entry.status == BlacklistStatus::Probable
                && (now - entry.time_updated).msecval() > BLACKLIST_ENTRY_TIMEOUT_MS
            {
                chatter!(self, neighbor = %ip, "downgrading blacklist entry to questionable");
                entry.status = BlacklistStatus::Questionable;
            }
        }
        if let Some(timer) = self.blacklist_timer {
            ctx.timer(timer).schedule_after_msec(BLACKLIST_TIMER_INTERVAL_MS);
        }
    }

    // --- diagnostics -----------------------------------------------------

    fn blacklist_string(&self) -> String {
        let mut entries: Vec<_> = self.blacklist.iter().collect();
        entries.sort_by_key(|(ip, _)| **ip);
        let mut out = String::new();
        for (ip, e) in entries {
            let status = match e.status {
                BlacklistStatus::Probable => "probable",
                BlacklistStatus::Questionable => "questionable",
            };
            let _ = writeln!(out, "{ip} {status} {}", e.time_updated);
        }
        out
    }

    fn sendbuffer_string(&self) -> String {
        let mut entries: Vec<_> = self.sendbuffer.iter().collect();
        entries.sort_by_key(|(ip, _)| **ip);
        let mut out = String::new();
        for (ip, b) in entries {
            let _ = writeln!(out, "{ip} {}", b.len());
        }
        out
    }
}

/// True for packets whose source route uses the link `a - b` in either
/// order.
fn link_filter(p: &Packet, a: Ipv4Addr, b: Ipv4Addr) -> bool {
    let Some(ip) = Ipv4View::new(p.data()) else { return false };
    if ip.protocol() != wire::SRP_PROTO {
        return false;
    }
    for (offset, block) in wire::options(p) {
        if matches!(block, OptionBlock::SourceRoute { .. }) {
            let route = SrpRouteTable::extract_source_route(p, offset);
            let (Some(i), Some(j)) =
                (wire::route_index_of(&route, a), wire::route_index_of(&route, b))
            else {
                return false;
            };
            return i.abs_diff(j) == 1;
        }
    }
    false
}

fn read_blacklist(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any().downcast_ref::<SrpRouteTable>().map_or_else(String::new, |t| t.blacklist_string())
}

fn read_sendbuffer(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any().downcast_ref::<SrpRouteTable>().map_or_else(String::new, |t| t.sendbuffer_string())
}

impl Element for SrpRouteTable {
    fn class_name(&self) -> &'static str {
        "SrpRouteTable"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "3/3"
    }

    fn processing(&self) -> &'static str {
        PUSH
    }

    fn configure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        let mut ip = self.ip;
        let mut link_cache = ElementRef(usize::MAX);
        let mut out_queue = None;
        let mut metric = None;
        let mut use_blacklist = self.use_blacklist;
        let mut debug = self.debug;
        let mut parser = Args::new(args, ctx, errh);
        parser
            .read_mp("IP", &mut ip)
            .read_mp_cast("LINKCACHE", "LinkCache", &mut link_cache)
            .read_opt_cast("OUTQUEUE", "Storage", &mut out_queue)
            .read_opt_cast("METRIC", "LinkMetric", &mut metric)
            .read("USE_BLACKLIST", &mut use_blacklist)
            .read("DEBUG", &mut debug);
        parser.complete()?;
        self.ip = ip;
        self.link_cache = link_cache;
        self.out_queue = out_queue;
        self.metric = metric;
        self.use_blacklist = use_blacklist;
        self.debug = debug;
        Ok(())
    }

    fn initialize(&mut self, ctx: &Context<'_>, _errh: &mut dyn ErrorHandler) -> Result<(), ()> {
        self.rreq_id = (ctx.now().sec() & 0xffff) as u16;

        let expire = ctx.new_timer();
        ctx.timer(expire).schedule_after_msec(RREQ_EXPIRE_TIMER_INTERVAL_MS);
        self.rreq_expire_timer = Some(expire);

        let sendbuffer = ctx.new_timer();
        ctx.timer(sendbuffer).schedule_after_msec(SENDBUFFER_TIMER_INTERVAL_MS);
        self.sendbuffer_timer = Some(sendbuffer);

        let issue = ctx.new_timer();
        ctx.timer(issue).schedule_after_msec(RREQ_ISSUE_TIMER_INTERVAL_MS);
        self.rreq_issue_timer = Some(issue);

        let blacklist = ctx.new_timer();
        ctx.timer(blacklist).schedule_after_msec(BLACKLIST_TIMER_INTERVAL_MS);
        self.blacklist_timer = Some(blacklist);
        Ok(())
    }

    fn add_handlers(&self, reg: &mut HandlerRegistry<'_>) {
        reg.add_read("blacklist", read_blacklist, 0);
        reg.add_read("sendbuffer", read_sendbuffer, 0);
    }

    fn push(&mut self, port: usize, p: Packet, ctx: &Context<'_>) {
        match port {
            0 => self.handle_local(ctx, p),
            1 => match wire::first_option_type(&p) {
                Some(wire::TYPE_RREQ) => self.handle_rreq(ctx, p),
                Some(wire::TYPE_RREP) => self.handle_rrep(ctx, p),
                Some(wire::TYPE_RERR) => self.handle_rerr(ctx, p),
                Some(wire::TYPE_SOURCE_ROUTE) => self.handle_data(ctx, p),
                other => {
                    chatter!(self, option = ?other, "unexpected protocol packet; dropping");
                    p.kill();
                }
            },
            _ => self.handle_tx_failure(ctx, p),
        }
    }

    fn run_timer(&mut self, timer: TimerId, ctx: &Context<'_>) {
        if Some(timer) == self.rreq_expire_timer {
            self.rreq_expire_hook(ctx);
        } else if Some(timer) == self.sendbuffer_timer {
            self.sendbuffer_hook(ctx);
        } else if Some(timer) == self.rreq_issue_timer {
            self.rreq_issue_hook(ctx);
        } else if Some(timer) == self.blacklist_timer {
            self.blacklist_hook(ctx);
        }
    }

    fn cleanup(&mut self, _stage: crate::element::CleanupStage) {
        for (_, buffer) in self.sendbuffer.drain() {
            for bp in buffer {
                bp.packet.kill();
            }
        }
        for (_, val) in self.forwarded.drain() {
            if let Some(p) = val.pending {
                p.kill();
            }
        }
    }
}
