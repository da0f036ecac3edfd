//! The element abstraction: one node in the router graph.
//!
//! Elements declare their identity statically — class name, acceptable
//! port counts, per-port push/pull processing, a flow code — and implement
//! a small set of lifecycle and runtime callbacks. The router owns every
//! element in an arena and hands each callback a [`Context`], the handle
//! through which an element reaches its ports, its timers and tasks, and
//! the rest of the router. Elements never hold references to each other;
//! they hold indices ([`ElementRef`]) resolved at configure time.
//!
//! Processing modes follow the push/pull discipline: a push output calls
//! downstream, a pull input calls upstream, and agnostic ports take
//! whichever orientation validation propagates to them. An element that
//! only transforms single packets implements [`Element::simple_action`]
//! and inherits push and pull plumbing from the trait's defaults.

use crate::error::ErrorHandler;
use crate::handler::HandlerRegistry;
use crate::packet::Packet;
use crate::router::Router;
use crate::srp::link_cache::LinkCache;
use crate::srp::metric::{DeliveryRateSource, LinkMetric};
use crate::task::TaskId;
use crate::timer::TimerId;
use crate::timestamp::Timestamp;
use std::any::Any;
use tracing::error;

/// Push/pull orientation of one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Push,
    Pull,
    Agnostic,
}

impl PortKind {
    pub fn name(self) -> &'static str {
        match self {
            PortKind::Push => "push",
            PortKind::Pull => "pull",
            PortKind::Agnostic => "agnostic",
        }
    }
}

/// Common processing specifications.
pub const AGNOSTIC: &str = "a/a";
pub const PUSH: &str = "h/h";
pub const PULL: &str = "l/l";
pub const PUSH_TO_PULL: &str = "h/l";
pub const PULL_TO_PUSH: &str = "l/h";

/// Parses one side of a processing spec into `n` port kinds; the last
/// character extends to all further ports.
fn parse_processing_side(side: &str, n: usize, errh: &mut dyn ErrorHandler) -> Vec<PortKind> {
    let mut kinds = Vec::with_capacity(n);
    let mut last = PortKind::Agnostic;
    let mut chars = side.chars();
    for _ in 0..n {
        if let Some(c) = chars.next() {
            last = match c {
                'h' => PortKind::Push,
                'l' => PortKind::Pull,
                'a' => PortKind::Agnostic,
                other => {
                    let _ = errh.error(&format!("bad processing code character `{other}`"));
                    PortKind::Agnostic
                }
            };
        }
        kinds.push(last);
    }
    kinds
}

/// Expands a processing spec string into per-port kinds for the given
/// arities. A spec without `/` applies to both sides.
pub fn parse_processing(
    spec: &str,
    ninputs: usize,
    noutputs: usize,
    errh: &mut dyn ErrorHandler,
) -> (Vec<PortKind>, Vec<PortKind>) {
    let (ins, outs) = spec.split_once('/').unwrap_or((spec, spec));
    (
        parse_processing_side(ins, ninputs, errh),
        parse_processing_side(outs, noutputs, errh),
    )
}

/// One side of a port-count specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CountSide {
    Range(usize, usize),
    /// `=` or `=+k`: the chosen input count plus an offset.
    SameAsInputs(usize),
}

/// A parsed port-count specification (`"1/1"`, `"3/3"`, `"1-/="`, ...).
///
/// Each side is `lo`, `lo-hi`, `lo-`, `-hi`, bare `-` (anything), or on
/// the output side `=` / `=+k`. A spec without `/` applies to both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortCountSpec {
    inputs: CountSide,
    outputs: CountSide,
}

impl PortCountSpec {
    pub fn parse(spec: &str) -> Option<PortCountSpec> {
        let (ins, outs) = spec.split_once('/').unwrap_or((spec, spec));
        let inputs = Self::parse_side(ins, false)?;
        let outputs = Self::parse_side(outs, true)?;
        Some(PortCountSpec { inputs, outputs })
    }

    fn parse_side(side: &str, allow_same: bool) -> Option<CountSide> {
        if let Some(rest) = side.strip_prefix('=') {
            if !allow_same {
                return None;
            }
            if rest.is_empty() {
                return Some(CountSide::SameAsInputs(0));
            }
            let k = rest.strip_prefix('+')?.parse().ok()?;
            return Some(CountSide::SameAsInputs(k));
        }
        if side == "-" {
            return Some(CountSide::Range(0, usize::MAX));
        }
        if let Some((lo, hi)) = side.split_once('-') {
            let lo = if lo.is_empty() { 0 } else { lo.parse().ok()? };
            let hi = if hi.is_empty() { usize::MAX } else { hi.parse().ok()? };
            return Some(CountSide::Range(lo, hi));
        }
        let n = side.parse().ok()?;
        Some(CountSide::Range(n, n))
    }

    /// Clamps used arities into the acceptable ranges, resolving `=` forms
    /// from the clamped input count.
    pub fn resolve(&self, used_in: usize, used_out: usize) -> (usize, usize) {
        let nin = match self.inputs {
            CountSide::Range(lo, hi) => used_in.clamp(lo, hi),
            CountSide::SameAsInputs(_) => used_in,
        };
        let nout = match self.outputs {
            CountSide::Range(lo, hi) => used_out.clamp(lo, hi),
            CountSide::SameAsInputs(k) => nin + k,
        };
        (nin, nout)
    }
}

/// The highest lifecycle point an element reached, handed to `cleanup` so
/// the element knows which resources it actually owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CleanupStage {
    BeforeConfigure,
    ConfigureFailed,
    Configured,
    InitializeFailed,
    Initialized,
    RouterLive,
}

/// Configure-phase constants; lower phases configure and initialize first.
pub const CONFIGURE_PHASE_FIRST: i32 = 0;
pub const CONFIGURE_PHASE_INFO: i32 = 20;
pub const CONFIGURE_PHASE_PRIVILEGED: i32 = 90;
pub const CONFIGURE_PHASE_DEFAULT: i32 = 100;

/// A resolved reference to another element in the same router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementRef(pub usize);

/// An element: one node in the router graph.
///
/// Only `class_name`, `as_any`, and `as_any_mut` lack defaults; everything
/// else has the conventional behavior (one agnostic input and output,
/// complete flow, identity `simple_action`).
pub trait Element: 'static {
    fn class_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Acceptable `(ninputs, noutputs)` ranges; see [`PortCountSpec`].
    fn port_count(&self) -> &'static str {
        "1/1"
    }

    /// Per-port push/pull/agnostic codes; see [`parse_processing`].
    fn processing(&self) -> &'static str {
        AGNOSTIC
    }

    /// Port-to-port reachability; see [`crate::flow::FlowCode`].
    fn flow_code(&self) -> &'static str {
        crate::flow::COMPLETE_FLOW
    }

    /// Single-letter element flags with optional numeric values.
    fn flags(&self) -> &'static str {
        ""
    }

    fn configure_phase(&self) -> i32 {
        CONFIGURE_PHASE_DEFAULT
    }

    /// Name-based polymorphism check: does this element answer to `name`
    /// as a class or interface name?
    fn cast(&self, name: &str) -> bool {
        name == self.class_name()
    }

    /// Optional secondary interfaces, reached through `cast`-style escapes.
    fn as_metric(&self) -> Option<&dyn LinkMetric> {
        None
    }

    fn as_link_cache(&self) -> Option<&dyn LinkCache> {
        None
    }

    fn as_link_cache_mut(&mut self) -> Option<&mut dyn LinkCache> {
        None
    }

    fn as_storage(&self) -> Option<&dyn Storage> {
        None
    }

    fn as_storage_mut(&mut self) -> Option<&mut dyn Storage> {
        None
    }

    fn as_delivery_rate_source(&self) -> Option<&dyn DeliveryRateSource> {
        None
    }

    /// Adjusts the discovered arities into this element's acceptable
    /// ranges. The default parses `port_count()`.
    fn notify_nports(
        &mut self,
        ninputs: &mut usize,
        noutputs: &mut usize,
        errh: &mut dyn ErrorHandler,
    ) {
        match PortCountSpec::parse(self.port_count()) {
            Some(spec) => {
                let (nin, nout) = spec.resolve(*ninputs, *noutputs);
                *ninputs = nin;
                *noutputs = nout;
            }
            None => {
                let _ = errh.error(&format!(
                    "{}: bad port count specification `{}`",
                    self.class_name(),
                    self.port_count()
                ));
            }
        }
    }

    /// Parses this element's configuration arguments. All elements are
    /// configured (in configure-phase order) even if earlier ones failed,
    /// so errors accumulate in `errh`.
    fn configure(
        &mut self,
        _args: Vec<String>,
        _ctx: &Context<'_>,
        _errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        Ok(())
    }

    /// Registers element-specific handlers. Standard handlers are
    /// installed separately.
    fn add_handlers(&self, _reg: &mut HandlerRegistry<'_>) {}

    /// Acquires runtime resources. The first initialize failure aborts
    /// router initialization.
    fn initialize(&mut self, _ctx: &Context<'_>, _errh: &mut dyn ErrorHandler) -> Result<(), ()> {
        Ok(())
    }

    /// Accepts state from `old`, the corresponding element of a router
    /// being hot-swapped out. Errors are reported but not fatal.
    fn take_state(&mut self, _old: &mut dyn Element, _errh: &mut dyn ErrorHandler) {}

    /// Name of the old-router element to take state from; `None` means an
    /// element with this element's own name.
    fn hotswap_element(&self) -> Option<String> {
        None
    }

    /// Releases resources; `stage` is the highest lifecycle point reached.
    fn cleanup(&mut self, _stage: CleanupStage) {}

    fn can_live_reconfigure(&self) -> bool {
        false
    }

    /// Applies a new configuration to a live element. Must be
    /// transactional: on failure the previous configuration stays active.
    fn live_reconfigure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        if self.can_live_reconfigure() {
            self.configure(args, ctx, errh)
        } else {
            errh.error("cannot reconfigure a live element")
        }
    }

    /// Receives a packet on a push input. The default runs
    /// `simple_action` and pushes any result out the same-numbered output.
    fn push(&mut self, port: usize, p: Packet, ctx: &Context<'_>) {
        if let Some(q) = self.simple_action(p) {
            ctx.output(port).push(q);
        }
    }

    /// Produces a packet for a pull output. The default pulls the
    /// same-numbered input through `simple_action`.
    fn pull(&mut self, port: usize, ctx: &Context<'_>) -> Option<Packet> {
        self.simple_action(ctx.input(port).pull()?)
    }

    /// Transforms one packet. Must account for its argument: return it
    /// (possibly modified), return `None` after disposing of it, or
    /// redirect it out a side port itself.
    fn simple_action(&mut self, p: Packet) -> Option<Packet> {
        Some(p)
    }

    /// Runs one scheduled quantum of work; returns whether any work was
    /// done. Reschedule the task to run again.
    fn run_task(&mut self, _task: TaskId, _ctx: &Context<'_>) -> bool {
        false
    }

    /// A timer owned by this element expired.
    fn run_timer(&mut self, _timer: TimerId, _ctx: &Context<'_>) {}

    /// A file descriptor registered with `add_select` became ready.
    fn selected(&mut self, _fd: i32, _mask: u8, _ctx: &Context<'_>) {}

    /// Local low-level remote procedure call escape hatch.
    fn llrpc(&mut self, _command: u32, _data: &mut dyn Any) -> Result<(), ()> {
        Err(())
    }

    /// Consulted when the runcount drops to zero or below; returning true
    /// asks the driver to continue (the element must have raised the
    /// runcount itself).
    fn router_stop_requested(&mut self, _ctx: &Context<'_>) -> bool {
        false
    }
}

/// Packet storage interface, implemented by queue-like elements.
pub trait Storage {
    fn queue_len(&self) -> usize;
    fn capacity(&self) -> usize;

    /// Removes and returns every queued packet matching `pred`, preserving
    /// the order of the rest.
    fn yank(&mut self, pred: &mut dyn FnMut(&Packet) -> bool) -> Vec<Packet>;
}

/// The handle through which an element callback reaches its router.
///
/// A context is scoped to one element for the duration of one callback;
/// `output(i)` and `input(i)` resolve through the router's connection
/// tables built during validation.
pub struct Context<'a> {
    router: &'a Router,
    eindex: usize,
}

impl<'a> Context<'a> {
    pub(crate) fn new(router: &'a Router, eindex: usize) -> Context<'a> {
        Context { router, eindex }
    }

    pub fn router(&self) -> &Router {
        self.router
    }

    /// This element's index in the router.
    pub fn element_index(&self) -> usize {
        self.eindex
    }

    /// This element's configured name.
    pub fn name(&self) -> &str {
        self.router.ename(self.eindex)
    }

    pub fn now(&self) -> Timestamp {
        self.router.clock().now()
    }

    pub fn ninputs(&self) -> usize {
        self.router.ninputs(self.eindex)
    }

    pub fn noutputs(&self) -> usize {
        self.router.noutputs(self.eindex)
    }

    pub fn output(&self, port: usize) -> OutputPort<'a> {
        OutputPort { router: self.router, element: self.eindex, port }
    }

    pub fn input(&self, port: usize) -> InputPort<'a> {
        InputPort { router: self.router, element: self.eindex, port }
    }

    /// Pushes to `port` if it exists, otherwise disposes of the packet.
    pub fn checked_push_output(&self, port: usize, p: Packet) {
        if port < self.noutputs() {
            self.output(port).push(p);
        } else {
            p.kill();
        }
    }

    /// Looks up an element by configuration name.
    pub fn find_element(&self, name: &str) -> Option<ElementRef> {
        self.router.find_index(self.eindex, name).map(ElementRef)
    }

    /// Runs `f` with a shared borrow of another element. Returns `None`
    /// if the reference is stale or the element is busy on this call
    /// stack.
    pub fn with_element<R>(&self, er: ElementRef, f: impl FnOnce(&dyn Element) -> R) -> Option<R> {
        self.router.with_element(er.0, f)
    }

    /// Runs `f` with an exclusive borrow of another element.
    pub fn with_element_mut<R>(
        &self,
        er: ElementRef,
        f: impl FnOnce(&mut dyn Element) -> R,
    ) -> Option<R> {
        self.router.with_element_mut(er.0, f)
    }

    /// Creates a timer owned by this element.
    pub fn new_timer(&self) -> TimerId {
        self.router.new_timer(self.eindex)
    }

    pub fn timer(&self, id: TimerId) -> TimerRef<'a> {
        TimerRef { router: self.router, id }
    }

    /// Creates a task owned by this element.
    pub fn new_task(&self) -> TaskId {
        self.router.new_task(self.eindex)
    }

    pub fn task(&self, id: TaskId) -> TaskRef<'a> {
        TaskRef { router: self.router, id }
    }

    pub fn set_runcount(&self, n: i32) {
        self.router.set_runcount(n);
    }

    pub fn adjust_runcount(&self, delta: i32) {
        self.router.adjust_runcount(delta);
    }

    /// Registers interest in `fd`; see [`crate::scheduler`] for masks.
    pub fn add_select(&self, fd: i32, mask: u8) {
        self.router.add_select(fd, self.eindex, mask);
    }

    pub fn remove_select(&self, fd: i32, mask: u8) {
        self.router.remove_select(fd, self.eindex, mask);
    }
}

/// An element's view of one of its output ports.
#[derive(Clone, Copy)]
pub struct OutputPort<'a> {
    router: &'a Router,
    element: usize,
    port: usize,
}

impl OutputPort<'_> {
    /// Transfers `p` to the connected input. On an unconnected or
    /// misdirected port the packet is dropped and the error is
    /// element-local, per the runtime error policy.
    pub fn push(&self, p: Packet) {
        self.router.deliver_push(self.element, self.port, p);
    }

    pub fn connected(&self) -> bool {
        self.router.output_target(self.element, self.port).is_some()
    }
}

/// An element's view of one of its input ports.
#[derive(Clone, Copy)]
pub struct InputPort<'a> {
    router: &'a Router,
    element: usize,
    port: usize,
}

impl InputPort<'_> {
    /// Asks the connected upstream output for a packet.
    pub fn pull(&self) -> Option<Packet> {
        self.router.deliver_pull(self.element, self.port)
    }

    pub fn connected(&self) -> bool {
        self.router.input_source(self.element, self.port).is_some()
    }
}

/// A handle to a timer, bound to a router.
#[derive(Clone, Copy)]
pub struct TimerRef<'a> {
    router: &'a Router,
    id: TimerId,
}

impl TimerRef<'_> {
    pub fn schedule_after_msec(&self, ms: i64) {
        let now = self.router.clock().now();
        self.router.timers_mut(|t| t.schedule_after_msec(self.id, now, ms));
    }

    pub fn schedule_after(&self, delta: Timestamp) {
        let now = self.router.clock().now();
        self.router.timers_mut(|t| t.schedule_after(self.id, now, delta));
    }

    pub fn schedule_now(&self) {
        let now = self.router.clock().now();
        self.router.timers_mut(|t| t.schedule_now(self.id, now));
    }

    pub fn unschedule(&self) {
        self.router.timers_mut(|t| t.unschedule(self.id));
    }

    pub fn scheduled(&self) -> bool {
        self.router.timers_mut(|t| t.scheduled(self.id))
    }
}

/// A handle to a task, bound to a router.
#[derive(Clone, Copy)]
pub struct TaskRef<'a> {
    router: &'a Router,
    id: TaskId,
}

impl TaskRef<'_> {
    pub fn reschedule(&self) {
        self.router.tasks_mut(|t| t.schedule(self.id));
    }

    pub fn unschedule(&self) {
        self.router.tasks_mut(|t| t.unschedule(self.id));
    }

    pub fn scheduled(&self) -> bool {
        self.router.tasks_mut(|t| t.is_scheduled(self.id))
    }

    /// Adjusts the task's tickets; zero unschedules it.
    pub fn set_tickets(&self, n: u32) {
        self.router.tasks_mut(|t| t.set_tickets(self.id, n));
    }

    pub fn tickets(&self) -> u32 {
        self.router.tasks_mut(|t| t.tickets(self.id))
    }
}

/// Reports a packet dropped because its destination element was busy on
/// the current call stack (a reentrant delivery).
pub(crate) fn reentrant_drop(class: &str, name: &str, port: usize, p: Packet) {
    error!(element = name, class, port, "reentrant delivery; dropping packet");
    p.kill();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SilentErrorHandler;

    #[test]
    fn port_count_forms() {
        let spec = PortCountSpec::parse("1/1").unwrap();
        assert_eq!(spec.resolve(0, 0), (1, 1));
        assert_eq!(spec.resolve(3, 3), (1, 1));

        let spec = PortCountSpec::parse("1-2/-").unwrap();
        assert_eq!(spec.resolve(0, 7), (1, 7));
        assert_eq!(spec.resolve(5, 0), (2, 0));

        let spec = PortCountSpec::parse("-/1").unwrap();
        assert_eq!(spec.resolve(9, 0), (9, 1));

        let spec = PortCountSpec::parse("2/=").unwrap();
        assert_eq!(spec.resolve(2, 0), (2, 2));

        let spec = PortCountSpec::parse("1-/=+1").unwrap();
        assert_eq!(spec.resolve(4, 0), (4, 5));

        assert!(PortCountSpec::parse("=/1").is_none());
        assert!(PortCountSpec::parse("x/1").is_none());
    }

    #[test]
    fn bare_spec_applies_to_both_sides() {
        let spec = PortCountSpec::parse("3").unwrap();
        assert_eq!(spec.resolve(0, 0), (3, 3));
    }

    #[test]
    fn processing_codes_extend() {
        let mut errh = SilentErrorHandler::new();
        let (ins, outs) = parse_processing("hl/a", 3, 2, &mut errh);
        assert_eq!(ins, vec![PortKind::Push, PortKind::Pull, PortKind::Pull]);
        assert_eq!(outs, vec![PortKind::Agnostic, PortKind::Agnostic]);
        assert_eq!(errh.n_errors(), 0);
    }
}
