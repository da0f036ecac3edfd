//! The router: owner of the element arena, the connection graph, and the
//! machinery that validates, configures, initializes, runs, and tears
//! down a configuration.
//!
//! Ownership follows the arena-with-indices design: the router holds
//! every element in a `RefCell` slot and elements refer to each other
//! only by index, which removes reference cycles and makes hot-swap a
//! matter of walking two arenas. A packet traveling a push chain borrows
//! each element it passes through for exactly the duration of that
//! element's `push`; the one illegal shape — a chain that re-enters an
//! element already on the stack — is converted into an element-local
//! packet drop rather than unbounded recursion.
//!
//! Initialization runs the fixed sequence: discover arities, validate
//! ports and push/pull consistency, order elements by configure phase,
//! configure everything (accumulating errors), install handlers,
//! initialize in order (first failure aborts), optionally transfer state
//! from a hot-swapped predecessor, then go live. Cleanup runs in reverse
//! configure order and tells each element the highest lifecycle stage it
//! actually reached.

use crate::element::{
    reentrant_drop, CleanupStage, Context, Element, PortKind, parse_processing,
};
use crate::error::{ContextErrorHandler, ErrorHandler, RouterError};
use crate::flow::FlowCode;
use crate::handler::{
    flags as hflags, HandlerIndex, HandlerInfo, HandlerOp, HandlerRegistry, HandlerTable,
    FIRST_GLOBAL_HANDLER,
};
use crate::packet::Packet;
use crate::runtime::Runtime;
use crate::task::{TaskId, TaskSet};
use crate::timer::{TimerId, TimerSet};
use crate::timestamp::Clock;
use serde::Serialize;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Runcount floor; saturating below this would otherwise risk rollover.
pub const STOP_RUNCOUNT: i32 = -0x4000_0000;

/// Lifecycle states of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RouterState {
    New,
    Preconfigure,
    Preinitialize,
    Live,
    Dead,
}

/// A port endpoint: `(element index, port number)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId {
    pub element: usize,
    pub port: usize,
}

impl PortId {
    pub fn new(element: usize, port: usize) -> PortId {
        PortId { element, port }
    }
}

/// A connection from an output endpoint to an input endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub from: PortId,
    pub to: PortId,
}

#[derive(Debug, Clone, Copy)]
struct Selector {
    fd: i32,
    element: usize,
    mask: u8,
}

/// A wakeup bit: one bit of a 32-bit word allocated in groups, set and
/// cleared atomically. Readers observe eventual consistency.
#[derive(Clone)]
pub struct NotifierSignal {
    word: Arc<AtomicU32>,
    mask: u32,
}

impl NotifierSignal {
    pub fn active(&self) -> bool {
        self.word.load(Ordering::Relaxed) & self.mask != 0
    }

    pub fn set(&self) {
        self.word.fetch_or(self.mask, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.word.fetch_and(!self.mask, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct SignalAlloc {
    words: Vec<Arc<AtomicU32>>,
    used_in_last: u32,
}

impl SignalAlloc {
    fn allocate(&mut self) -> NotifierSignal {
        if self.words.is_empty() || self.used_in_last == 32 {
            self.words.push(Arc::new(AtomicU32::new(0)));
            self.used_in_last = 0;
        }
        let word = Arc::clone(self.words.last().expect("signal group exists"));
        let mask = 1 << self.used_in_last;
        self.used_in_last += 1;
        NotifierSignal { word, mask }
    }
}

/// Summary of a router's shape, serializable for diagnostics.
#[derive(Debug, Serialize)]
pub struct RouterInfo {
    pub elements: Vec<ElementInfo>,
    pub connections: Vec<String>,
    pub requirements: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ElementInfo {
    pub name: String,
    pub class: String,
    pub configuration: String,
}

/// Receives ports during a graph traversal; see [`Router::visit`].
pub trait RouterVisitor {
    /// Called once per reached port. Returning false prunes descent
    /// through this port without stopping the overall traversal.
    fn visit(
        &mut self,
        element: usize,
        is_output: bool,
        port: usize,
        from_element: usize,
        from_port: usize,
        distance: usize,
    ) -> bool;
}

/// The element graph and everything needed to run it.
pub struct Router {
    runtime: Arc<Runtime>,
    clock: Clock,

    // Topology; frozen once state reaches PRECONFIGURE.
    elements: Vec<RefCell<Box<dyn Element>>>,
    names: Vec<String>,
    classes: Vec<&'static str>,
    configurations: RefCell<Vec<String>>,
    landmarks: Vec<String>,
    connections: Vec<Connection>,
    requirements: Vec<String>,
    flow_overrides: Vec<Option<FlowCode>>,

    // Derived during validation.
    ninputs: Vec<usize>,
    noutputs: Vec<usize>,
    input_kind: Vec<Vec<PortKind>>,
    output_kind: Vec<Vec<PortKind>>,
    out_links: Vec<Vec<Option<PortId>>>,
    in_links: Vec<Vec<Option<PortId>>>,
    conn_by_input: Vec<usize>,
    conn_by_output: Vec<usize>,
    configure_order: Vec<usize>,
    flow_codes: Vec<FlowCode>,

    state: Cell<RouterState>,
    stages: RefCell<Vec<CleanupStage>>,
    runcount: AtomicI32,

    timers: RefCell<TimerSet>,
    tasks: RefCell<TaskSet>,
    selectors: RefCell<Vec<Selector>>,
    signals: RefCell<SignalAlloc>,
    handlers: RefCell<HandlerTable>,
    attachments: RefCell<HashMap<String, Box<dyn Any>>>,
    flat_config: RefCell<Option<String>>,
    compact_config: Cell<bool>,
    hotswap: RefCell<Option<Box<Router>>>,
}

impl Router {
    pub fn new(runtime: Arc<Runtime>) -> Router {
        Router::with_clock(runtime, Clock::system())
    }

    pub fn with_clock(runtime: Arc<Runtime>, clock: Clock) -> Router {
        Router {
            runtime,
            clock,
            elements: Vec::new(),
            names: Vec::new(),
            classes: Vec::new(),
            configurations: RefCell::new(Vec::new()),
            landmarks: Vec::new(),
            connections: Vec::new(),
            requirements: Vec::new(),
            flow_overrides: Vec::new(),
            ninputs: Vec::new(),
            noutputs: Vec::new(),
            input_kind: Vec::new(),
            output_kind: Vec::new(),
            out_links: Vec::new(),
            in_links: Vec::new(),
            conn_by_input: Vec::new(),
            conn_by_output: Vec::new(),
            configure_order: Vec::new(),
            flow_codes: Vec::new(),
            state: Cell::new(RouterState::New),
            stages: RefCell::new(Vec::new()),
            runcount: AtomicI32::new(1),
            timers: RefCell::new(TimerSet::default()),
            tasks: RefCell::new(TaskSet::default()),
            selectors: RefCell::new(Vec::new()),
            signals: RefCell::new(SignalAlloc::default()),
            handlers: RefCell::new(HandlerTable::default()),
            attachments: RefCell::new(HashMap::new()),
            flat_config: RefCell::new(None),
            compact_config: Cell::new(false),
            hotswap: RefCell::new(None),
        }
    }

    // --- construction ----------------------------------------------------

    /// Adds an element under `name`. Fails once the topology is frozen or
    /// when the name is already taken.
    pub fn add_element(
        &mut self,
        element: Box<dyn Element>,
        name: &str,
        configuration: &str,
        landmark: &str,
    ) -> Result<usize, RouterError> {
        if self.state.get() != RouterState::New {
            return Err(RouterError::InitializeFailed("topology is frozen".into()));
        }
        if self.names.iter().any(|n| n == name) {
            return Err(RouterError::InitializeFailed(format!("duplicate element name `{name}`")));
        }
        let index = self.elements.len();
        self.classes.push(element.class_name());
        self.elements.push(RefCell::new(element));
        self.names.push(name.to_string());
        self.configurations.borrow_mut().push(configuration.to_string());
        self.landmarks.push(landmark.to_string());
        self.flow_overrides.push(None);
        self.stages.borrow_mut().push(CleanupStage::BeforeConfigure);
        Ok(index)
    }

    pub fn add_connection(
        &mut self,
        from_element: usize,
        from_port: usize,
        to_element: usize,
        to_port: usize,
    ) -> Result<(), RouterError> {
        if self.state.get() != RouterState::New {
            return Err(RouterError::InitializeFailed("topology is frozen".into()));
        }
        let c = Connection {
            from: PortId::new(from_element, from_port),
            to: PortId::new(to_element, to_port),
        };
        // Duplicate connections collapse to one.
        if !self.connections.contains(&c) {
            self.connections.push(c);
        }
        Ok(())
    }

    pub fn add_requirement(&mut self, requirement: &str) {
        self.requirements.push(requirement.to_string());
    }

    /// Overrides one element's static flow code.
    pub fn set_flow_code_override(&mut self, eindex: usize, code: FlowCode) {
        if let Some(slot) = self.flow_overrides.get_mut(eindex) {
            *slot = Some(code);
        }
    }

    pub fn set_flat_configuration(&self, text: String) {
        *self.flat_config.borrow_mut() = Some(text);
    }

    /// Drops the stored textual configuration, per the `compact_config`
    /// requirement.
    pub fn set_compact_config(&self) {
        self.compact_config.set(true);
        *self.flat_config.borrow_mut() = None;
    }

    /// Installs the router whose state should be transferred after this
    /// router initializes.
    pub fn set_hotswap_router(&self, old: Router) {
        *self.hotswap.borrow_mut() = Some(Box::new(old));
    }

    // --- accessors -------------------------------------------------------

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn state(&self) -> RouterState {
        self.state.get()
    }

    pub fn nelements(&self) -> usize {
        self.elements.len()
    }

    pub fn ename(&self, eindex: usize) -> &str {
        &self.names[eindex]
    }

    pub fn eclass(&self, eindex: usize) -> &'static str {
        self.classes[eindex]
    }

    pub fn econfiguration(&self, eindex: usize) -> String {
        self.configurations.borrow()[eindex].clone()
    }

    pub fn set_configuration(&self, eindex: usize, configuration: String) {
        self.configurations.borrow_mut()[eindex] = configuration;
    }

    pub fn elandmark(&self, eindex: usize) -> &str {
        &self.landmarks[eindex]
    }

    pub fn requirements(&self) -> &[String] {
        &self.requirements
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn ninputs(&self, eindex: usize) -> usize {
        self.ninputs.get(eindex).copied().unwrap_or(0)
    }

    pub fn noutputs(&self, eindex: usize) -> usize {
        self.noutputs.get(eindex).copied().unwrap_or(0)
    }

    pub fn input_is_pull(&self, eindex: usize, port: usize) -> bool {
        self.input_kind
            .get(eindex)
            .and_then(|k| k.get(port))
            .is_some_and(|k| *k == PortKind::Pull)
    }

    pub fn output_is_push(&self, eindex: usize, port: usize) -> bool {
        self.output_kind
            .get(eindex)
            .and_then(|k| k.get(port))
            .is_some_and(|k| *k == PortKind::Push)
    }

    /// The input fed by push output `(eindex, port)`, once validated.
    pub fn output_target(&self, eindex: usize, port: usize) -> Option<PortId> {
        *self.out_links.get(eindex)?.get(port)?
    }

    /// The output feeding pull input `(eindex, port)`, once validated.
    pub fn input_source(&self, eindex: usize, port: usize) -> Option<PortId> {
        *self.in_links.get(eindex)?.get(port)?
    }

    /// Finds an element by configuration name, searching outward through
    /// the compound-name scopes of `context` (`a/b/x`, then `a/x`, then
    /// `x`).
    pub fn find_index(&self, context: usize, name: &str) -> Option<usize> {
        let ctx_name = self.names.get(context).map(String::as_str).unwrap_or("");
        let mut prefix = ctx_name;
        loop {
            prefix = match prefix.rfind('/') {
                Some(pos) => &prefix[..pos],
                None => {
                    return self.names.iter().position(|n| n == name);
                }
            };
            let qualified = format!("{prefix}/{name}");
            if let Some(i) = self.names.iter().position(|n| *n == qualified) {
                return Some(i);
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn info(&self) -> RouterInfo {
        RouterInfo {
            elements: (0..self.nelements())
                .map(|i| ElementInfo {
                    name: self.names[i].clone(),
                    class: self.classes[i].to_string(),
                    configuration: self.econfiguration(i),
                })
                .collect(),
            connections: self
                .connections
                .iter()
                .map(|c| {
                    format!(
                        "{} [{}] -> [{}] {}",
                        self.names[c.from.element], c.from.port, c.to.port, self.names[c.to.element]
                    )
                })
                .collect(),
            requirements: self.requirements.clone(),
        }
    }

    /// The router's configuration as declaration and connection
    /// statements. Empty after a `compact_config` requirement.
    pub fn flat_configuration_string(&self) -> String {
        if self.compact_config.get() {
            return String::new();
        }
        if let Some(text) = self.flat_config.borrow().as_ref() {
            return text.clone();
        }
        let mut out = String::new();
        for i in 0..self.nelements() {
            let conf = self.econfiguration(i);
            let _ = writeln!(out, "{} :: {}({});", self.names[i], self.classes[i], conf);
        }
        for c in &self.connections {
            let _ = writeln!(
                out,
                "{} [{}] -> [{}] {};",
                self.names[c.from.element], c.from.port, c.to.port, self.names[c.to.element]
            );
        }
        out
    }

    pub fn element_list_string(&self) -> String {
        let mut out = String::new();
        for i in 0..self.nelements() {
            let _ = writeln!(out, "{} :: {}", self.names[i], self.classes[i]);
        }
        out
    }

    /// Human-readable port description, the `ports` handler's format.
    pub fn element_ports_string(&self, eindex: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} input(s), {} output(s)", self.ninputs(eindex), self.noutputs(eindex));
        for p in 0..self.ninputs(eindex) {
            let kind = self.input_kind[eindex][p].name();
            match self.input_source(eindex, p) {
                Some(src) => {
                    let _ = writeln!(out, "input {p}: {kind} <- {} [{}]", self.names[src.element], src.port);
                }
                None => {
                    let froms: Vec<String> = self
                        .connections_to(PortId::new(eindex, p))
                        .map(|c| format!("{} [{}]", self.names[c.from.element], c.from.port))
                        .collect();
                    let _ = writeln!(out, "input {p}: {kind} <- {}", froms.join(", "));
                }
            }
        }
        for p in 0..self.noutputs(eindex) {
            let kind = self.output_kind[eindex][p].name();
            match self.output_target(eindex, p) {
                Some(dst) => {
                    let _ = writeln!(out, "output {p}: {kind} -> {} [{}]", self.names[dst.element], dst.port);
                }
                None => {
                    let tos: Vec<String> = self
                        .connections_from(PortId::new(eindex, p))
                        .map(|c| format!("{} [{}]", self.names[c.to.element], c.to.port))
                        .collect();
                    let _ = writeln!(out, "output {p}: {kind} -> {}", tos.join(", "));
                }
            }
        }
        out
    }

    fn connections_from(&self, port: PortId) -> impl Iterator<Item = &Connection> {
        // conn_by_output is sorted by `from`, enabling a binary search for
        // the first match.
        let start = self.conn_by_output.partition_point(|&i| self.connections[i].from < port);
        self.conn_by_output[start..]
            .iter()
            .map(move |&i| &self.connections[i])
            .take_while(move |c| c.from == port)
    }

    fn connections_to(&self, port: PortId) -> impl Iterator<Item = &Connection> {
        let start = self.conn_by_input.partition_point(|&i| self.connections[i].to < port);
        self.conn_by_input[start..]
            .iter()
            .map(move |&i| &self.connections[i])
            .take_while(move |c| c.to == port)
    }

    // --- element access --------------------------------------------------

    pub(crate) fn with_element<R>(&self, eindex: usize, f: impl FnOnce(&dyn Element) -> R) -> Option<R> {
        let cell = self.elements.get(eindex)?;
        match cell.try_borrow() {
            Ok(e) => Some(f(&**e)),
            Err(_) => None,
        }
    }

    pub(crate) fn with_element_mut<R>(
        &self,
        eindex: usize,
        f: impl FnOnce(&mut dyn Element) -> R,
    ) -> Option<R> {
        let cell = self.elements.get(eindex)?;
        match cell.try_borrow_mut() {
            Ok(mut e) => Some(f(&mut **e)),
            Err(_) => None,
        }
    }

    // --- runcount --------------------------------------------------------

    pub fn runcount(&self) -> i32 {
        self.runcount.load(Ordering::Acquire)
    }

    /// Replaces the runcount; values at or below zero request a stop.
    pub fn set_runcount(&self, n: i32) {
        self.runcount.store(n.max(STOP_RUNCOUNT), Ordering::Release);
    }

    /// Atomic saturating add. The result saturates at `i32::MAX` above
    /// and [`STOP_RUNCOUNT`] below so repeated adjustments cannot roll
    /// over; a result at or below zero requests a stop.
    pub fn adjust_runcount(&self, delta: i32) {
        let mut current = self.runcount.load(Ordering::Acquire);
        loop {
            let new = current.saturating_add(delta).max(STOP_RUNCOUNT);
            match self.runcount.compare_exchange_weak(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.runcount() <= 0
    }

    // --- timers / tasks / signals / selects ------------------------------

    pub(crate) fn new_timer(&self, eindex: usize) -> TimerId {
        self.timers.borrow_mut().create(eindex)
    }

    pub(crate) fn timers_mut<R>(&self, f: impl FnOnce(&mut TimerSet) -> R) -> R {
        f(&mut self.timers.borrow_mut())
    }

    pub(crate) fn new_task(&self, eindex: usize) -> TaskId {
        self.tasks.borrow_mut().create(eindex)
    }

    pub(crate) fn tasks_mut<R>(&self, f: impl FnOnce(&mut TaskSet) -> R) -> R {
        f(&mut self.tasks.borrow_mut())
    }

    pub fn new_notifier_signal(&self) -> NotifierSignal {
        self.signals.borrow_mut().allocate()
    }

    pub(crate) fn add_select(&self, fd: i32, eindex: usize, mask: u8) {
        let mut sel = self.selectors.borrow_mut();
        if let Some(s) = sel.iter_mut().find(|s| s.fd == fd && s.element == eindex) {
            s.mask |= mask;
        } else {
            sel.push(Selector { fd, element: eindex, mask });
        }
    }

    pub(crate) fn remove_select(&self, fd: i32, eindex: usize, mask: u8) {
        let mut sel = self.selectors.borrow_mut();
        sel.retain_mut(|s| {
            if s.fd == fd && s.element == eindex {
                s.mask &= !mask;
                s.mask != 0
            } else {
                true
            }
        });
    }

    pub(crate) fn selectors_snapshot(&self) -> Vec<(i32, usize, u8)> {
        self.selectors.borrow().iter().map(|s| (s.fd, s.element, s.mask)).collect()
    }

    // --- attachments -----------------------------------------------------

    /// Stores a named singleton shared across elements.
    pub fn set_attachment(&self, name: &str, value: Box<dyn Any>) {
        self.attachments.borrow_mut().insert(name.to_string(), value);
    }

    pub fn with_attachment<R>(
        &self,
        name: &str,
        f: impl FnOnce(Option<&mut dyn Any>) -> R,
    ) -> R {
        let mut map = self.attachments.borrow_mut();
        f(map.get_mut(name).map(|b| &mut **b))
    }

    // --- packet dispatch -------------------------------------------------

    pub(crate) fn deliver_push(&self, from_element: usize, from_port: usize, p: Packet) {
        let Some(target) = self.output_target(from_element, from_port) else {
            error!(
                element = self.names.get(from_element).map(String::as_str).unwrap_or("?"),
                port = from_port,
                "push on unconnected output; dropping packet"
            );
            p.kill();
            return;
        };
        self.push_into(target.element, target.port, p);
    }

    /// Injects a packet into an element's input, as a connected upstream
    /// output would.
    pub fn push_into(&self, eindex: usize, port: usize, p: Packet) {
        let Some(cell) = self.elements.get(eindex) else {
            error!(eindex, "push into nonexistent element; dropping packet");
            p.kill();
            return;
        };
        match cell.try_borrow_mut() {
            Ok(mut e) => e.push(port, p, &Context::new(self, eindex)),
            Err(_) => reentrant_drop(self.classes[eindex], &self.names[eindex], port, p),
        }
    }

    pub(crate) fn deliver_pull(&self, to_element: usize, to_port: usize) -> Option<Packet> {
        let src = self.input_source(to_element, to_port)?;
        self.pull_from(src.element, src.port)
    }

    /// Pulls a packet from an element's output, as a connected downstream
    /// input would.
    pub fn pull_from(&self, eindex: usize, port: usize) -> Option<Packet> {
        self.elements.get(eindex)?;
        match self.elements[eindex].try_borrow_mut() {
            Ok(mut e) => e.pull(port, &Context::new(self, eindex)),
            Err(_) => {
                error!(
                    element = self.names[eindex].as_str(),
                    port, "reentrant pull; returning nothing"
                );
                None
            }
        }
    }

    // --- timer and task execution (driven by the scheduler) --------------

    /// Fires every timer expired at the current clock reading, in expiry
    /// order. Returns how many fired.
    pub(crate) fn run_timers(&self) -> usize {
        const OVERRUN_WARN_MS: i64 = 1000;
        let now = self.clock.now();
        let mut fired = 0;
        loop {
            // The set borrow is released before dispatch so the element
            // can reschedule from `run_timer`.
            let next = self.timers.borrow_mut().pop_expired(now);
            let Some((timer, eindex, expiry)) = next else { break };
            if !self.clock.is_manual() && (now - expiry).msecval() > OVERRUN_WARN_MS {
                warn!(
                    element = self.names.get(eindex).map(String::as_str).unwrap_or("?"),
                    late_ms = (now - expiry).msecval(),
                    "timer overrun"
                );
            }
            if let Ok(mut e) = self.elements[eindex].try_borrow_mut() {
                e.run_timer(timer, &Context::new(self, eindex));
            }
            fired += 1;
        }
        fired
    }

    /// Runs the next scheduled task, if any. Returns whether one ran.
    pub(crate) fn run_one_task(&self) -> bool {
        let next = self.tasks.borrow_mut().take_next();
        let Some((task, eindex)) = next else { return false };
        if let Ok(mut e) = self.elements[eindex].try_borrow_mut() {
            e.run_task(task, &Context::new(self, eindex));
        }
        self.tasks.borrow_mut().charge(task);
        true
    }

    pub(crate) fn any_task_scheduled(&self) -> bool {
        self.tasks.borrow().any_scheduled()
    }

    pub(crate) fn next_timer_expiry(&self) -> Option<crate::timestamp::Timestamp> {
        self.timers.borrow_mut().next_expiry()
    }

    pub(crate) fn dispatch_selected(&self, fd: i32, eindex: usize, mask: u8) {
        if let Ok(mut e) = self.elements[eindex].try_borrow_mut() {
            e.selected(fd, mask, &Context::new(self, eindex));
        }
    }

    /// Consults elements about a runcount-requested stop. True means some
    /// element re-armed the runcount and the driver should continue.
    pub(crate) fn handle_stop_request(&self) -> bool {
        for i in 0..self.nelements() {
            let resumed = self
                .with_element_mut(i, |e| e.router_stop_requested(&Context::new(self, i)))
                .unwrap_or(false);
            if resumed && self.runcount() > 0 {
                info!(element = self.names[i].as_str(), "element resumed a stopping router");
                return true;
            }
        }
        false
    }

    // --- validation ------------------------------------------------------

    fn context_message(&self, eindex: usize) -> String {
        format!(
            "While configuring {} :: {} ({}):",
            self.names[eindex], self.classes[eindex], self.landmarks[eindex]
        )
    }

    fn check_requirements(&self, errh: &mut dyn ErrorHandler) {
        for req in &self.requirements {
            if req == "compact_config" {
                continue;
            }
            if !self.runtime.provides(req) {
                let _ = errh.error(&format!("unsatisfied requirement `{req}`"));
            }
        }
    }

    /// Discovers arities, clamps them through `notify_nports`, and checks
    /// connection ranges.
    fn check_ports(&mut self, errh: &mut dyn ErrorHandler) {
        let n = self.elements.len();
        let mut used_in = vec![0usize; n];
        let mut used_out = vec![0usize; n];
        for c in &self.connections {
            if let Some(u) = used_out.get_mut(c.from.element) {
                *u = (*u).max(c.from.port + 1);
            }
            if let Some(u) = used_in.get_mut(c.to.element) {
                *u = (*u).max(c.to.port + 1);
            }
        }
        self.ninputs = vec![0; n];
        self.noutputs = vec![0; n];
        for i in 0..n {
            let mut nin = used_in[i];
            let mut nout = used_out[i];
            {
                let mut e = self.elements[i].borrow_mut();
                let mut cerrh = ContextErrorHandler::new(errh, self.context_message(i));
                e.notify_nports(&mut nin, &mut nout, &mut cerrh);
            }
            self.ninputs[i] = nin;
            self.noutputs[i] = nout;
        }
        for c in &self.connections {
            if c.from.element >= n || c.from.port >= self.noutputs[c.from.element] {
                let _ = errh.lerror(
                    self.landmarks.get(c.from.element).map(String::as_str).unwrap_or(""),
                    &format!(
                        "`{}' has no output {}",
                        self.names.get(c.from.element).map(String::as_str).unwrap_or("?"),
                        c.from.port
                    ),
                );
            }
            if c.to.element >= n || c.to.port >= self.ninputs[c.to.element] {
                let _ = errh.lerror(
                    self.landmarks.get(c.to.element).map(String::as_str).unwrap_or(""),
                    &format!(
                        "`{}' has no input {}",
                        self.names.get(c.to.element).map(String::as_str).unwrap_or("?"),
                        c.to.port
                    ),
                );
            }
        }
    }

    /// Assigns push/pull to every port: declared kinds seed the
    /// assignment, then known values propagate across connections and
    /// through each element's flow-code-reachable agnostic port pairs
    /// until a fixed point. Conflicts are hard errors naming the element,
    /// the port, and both claimed kinds.
    fn check_push_and_pull(&mut self, errh: &mut dyn ErrorHandler) {
        let n = self.elements.len();
        let mut declared_in = Vec::with_capacity(n);
        let mut declared_out = Vec::with_capacity(n);
        self.flow_codes = Vec::with_capacity(n);
        for i in 0..n {
            let e = self.elements[i].borrow();
            let mut cerrh = ContextErrorHandler::new(errh, self.context_message(i));
            let (ins, outs) = parse_processing(e.processing(), self.ninputs[i], self.noutputs[i], &mut cerrh);
            declared_in.push(ins);
            declared_out.push(outs);
            let code = match &self.flow_overrides[i] {
                Some(c) => c.clone(),
                None => match FlowCode::parse(e.flow_code()) {
                    Some(c) => c,
                    None => {
                        let _ = cerrh.error(&format!("bad flow code `{}`", e.flow_code()));
                        FlowCode::default()
                    }
                },
            };
            self.flow_codes.push(code);
        }

        self.input_kind = declared_in.clone();
        self.output_kind = declared_out.clone();

        let mut changed = true;
        while changed {
            changed = false;
            // Connections force both endpoints to one orientation.
            for c in &self.connections {
                if c.from.element >= n
                    || c.to.element >= n
                    || c.from.port >= self.noutputs[c.from.element]
                    || c.to.port >= self.ninputs[c.to.element]
                {
                    continue;
                }
                let fk = self.output_kind[c.from.element][c.from.port];
                let tk = self.input_kind[c.to.element][c.to.port];
                match (fk, tk) {
                    (PortKind::Agnostic, PortKind::Agnostic) => {}
                    (PortKind::Agnostic, k) => {
                        self.output_kind[c.from.element][c.from.port] = k;
                        changed = true;
                    }
                    (k, PortKind::Agnostic) => {
                        self.input_kind[c.to.element][c.to.port] = k;
                        changed = true;
                    }
                    (a, b) if a != b => {
                        let _ = errh.lerror(
                            &self.landmarks[c.from.element],
                            &format!(
                                "`{}' output {} is {} but `{}' input {} is {}",
                                self.names[c.from.element],
                                c.from.port,
                                a.name(),
                                self.names[c.to.element],
                                c.to.port,
                                b.name()
                            ),
                        );
                        return;
                    }
                    _ => {}
                }
            }
            // Agnostic subgraphs inside an element collapse through the
            // flow code: a resolved agnostic input forces its reachable
            // agnostic outputs, and vice versa.
            for e in 0..n {
                for i in 0..self.ninputs[e] {
                    if declared_in[e][i] != PortKind::Agnostic {
                        continue;
                    }
                    for o in 0..self.noutputs[e] {
                        if declared_out[e][o] != PortKind::Agnostic || !self.flow_codes[e].forward(i, o) {
                            continue;
                        }
                        let ik = self.input_kind[e][i];
                        let ok = self.output_kind[e][o];
                        match (ik, ok) {
                            (PortKind::Agnostic, PortKind::Agnostic) => {}
                            (PortKind::Agnostic, k) => {
                                self.input_kind[e][i] = k;
                                changed = true;
                            }
                            (k, PortKind::Agnostic) => {
                                self.output_kind[e][o] = k;
                                changed = true;
                            }
                            (a, b) if a != b => {
                                let _ = errh.lerror(
                                    &self.landmarks[e],
                                    &format!(
                                        "`{}' input {} is {} but output {} is {}",
                                        self.names[e], i, a.name(), o, b.name()
                                    ),
                                );
                                return;
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        // Whatever is still agnostic saw no packet flow; push is the
        // conventional resolution.
        for e in 0..n {
            for k in self.input_kind[e].iter_mut().chain(self.output_kind[e].iter_mut()) {
                if *k == PortKind::Agnostic {
                    *k = PortKind::Push;
                }
            }
        }
    }

    /// Checks that every active port has exactly one counterpart, warns
    /// about unconnected passive ports, and builds the dispatch links.
    fn check_completeness(&mut self, errh: &mut dyn ErrorHandler) {
        let n = self.elements.len();

        let mut by_out: Vec<usize> = (0..self.connections.len()).collect();
        by_out.sort_by_key(|&i| (self.connections[i].from, self.connections[i].to));
        let mut by_in: Vec<usize> = (0..self.connections.len()).collect();
        by_in.sort_by_key(|&i| (self.connections[i].to, self.connections[i].from));
        self.conn_by_output = by_out;
        self.conn_by_input = by_in;

        self.out_links = (0..n).map(|e| vec![None; self.noutputs[e]]).collect();
        self.in_links = (0..n).map(|e| vec![None; self.ninputs[e]]).collect();

        let mut out_count: Vec<Vec<usize>> = (0..n).map(|e| vec![0; self.noutputs[e]]).collect();
        let mut in_count: Vec<Vec<usize>> = (0..n).map(|e| vec![0; self.ninputs[e]]).collect();
        for c in &self.connections {
            if c.from.element >= n
                || c.to.element >= n
                || c.from.port >= self.noutputs[c.from.element]
                || c.to.port >= self.ninputs[c.to.element]
            {
                continue;
            }
            out_count[c.from.element][c.from.port] += 1;
            in_count[c.to.element][c.to.port] += 1;
            self.out_links[c.from.element][c.from.port] = Some(c.to);
            self.in_links[c.to.element][c.to.port] = Some(c.from);
        }

        for e in 0..n {
            for p in 0..self.noutputs[e] {
                let push = self.output_kind[e][p] == PortKind::Push;
                match (push, out_count[e][p]) {
                    (true, 0) => {
                        let _ = errh.lerror(
                            &self.landmarks[e],
                            &format!("`{}' push output {} not connected", self.names[e], p),
                        );
                    }
                    (true, c) if c > 1 => {
                        let _ = errh.lerror(
                            &self.landmarks[e],
                            &format!("`{}' push output {} connected {c} times", self.names[e], p),
                        );
                    }
                    (false, 0) => {
                        errh.lwarning(
                            &self.landmarks[e],
                            &format!("`{}' pull output {} not connected", self.names[e], p),
                        );
                    }
                    _ => {}
                }
                if !push {
                    // Pull outputs are passive; nothing to dispatch to.
                    self.out_links[e][p] = None;
                }
            }
            for p in 0..self.ninputs[e] {
                let pull = self.input_kind[e][p] == PortKind::Pull;
                match (pull, in_count[e][p]) {
                    (true, 0) => {
                        let _ = errh.lerror(
                            &self.landmarks[e],
                            &format!("`{}' pull input {} not connected", self.names[e], p),
                        );
                    }
                    (true, c) if c > 1 => {
                        let _ = errh.lerror(
                            &self.landmarks[e],
                            &format!("`{}' pull input {} connected {c} times", self.names[e], p),
                        );
                    }
                    (false, 0) => {
                        errh.lwarning(
                            &self.landmarks[e],
                            &format!("`{}' push input {} not connected", self.names[e], p),
                        );
                    }
                    _ => {}
                }
                if !pull {
                    self.in_links[e][p] = None;
                }
            }
        }
    }

    // --- lifecycle -------------------------------------------------------

    /// Runs the full initialization sequence; on success the router is
    /// LIVE. On failure every element that got anywhere is cleaned up in
    /// reverse configure order and the router is DEAD.
    pub fn initialize(&mut self, errh: &mut dyn ErrorHandler) -> Result<(), RouterError> {
        if self.state.get() != RouterState::New {
            return Err(RouterError::InitializeFailed("router already initialized".into()));
        }
        if self.elements.is_empty() {
            return Err(RouterError::Empty);
        }

        let before = errh.n_errors();
        self.check_requirements(errh);
        self.check_ports(errh);
        if errh.n_errors() == before {
            self.check_push_and_pull(errh);
        }
        if errh.n_errors() == before {
            self.check_completeness(errh);
        }
        if errh.n_errors() != before {
            self.state.set(RouterState::Dead);
            return Err(RouterError::ConfigureFailed(errh.n_errors() - before));
        }

        // Configure phases order both configuration and initialization;
        // the sort is stable so declaration order breaks ties.
        let mut order: Vec<usize> = (0..self.elements.len()).collect();
        order.sort_by_key(|&i| self.elements[i].borrow().configure_phase());
        self.configure_order = order;

        self.state.set(RouterState::Preconfigure);

        // Every element is configured even after failures, so all
        // configuration errors surface in one pass.
        let mut any_failed = false;
        for &i in &self.configure_order.clone() {
            let args = crate::config::parse::split_args(&self.econfiguration(i));
            let result = {
                let mut cerrh = ContextErrorHandler::new(errh, self.context_message(i));
                let ctx = Context::new(self, i);
                match self.elements[i].try_borrow_mut() {
                    Ok(mut e) => e.configure(args, &ctx, &mut cerrh),
                    Err(_) => cerrh.error("element busy during configure"),
                }
            };
            let mut stages = self.stages.borrow_mut();
            if result.is_ok() {
                stages[i] = CleanupStage::Configured;
            } else {
                stages[i] = CleanupStage::ConfigureFailed;
                any_failed = true;
            }
        }
        if any_failed {
            let count = errh.n_errors() - before;
            self.cleanup_elements();
            self.state.set(RouterState::Dead);
            return Err(RouterError::ConfigureFailed(count.max(1)));
        }

        // Standard handlers first, then the element's own, which may
        // override standard read callbacks by name.
        for i in 0..self.elements.len() {
            self.install_standard_handlers(i);
            let mut table = self.handlers.borrow_mut();
            let mut reg = HandlerRegistry::new(&mut table, i);
            self.elements[i].borrow().add_handlers(&mut reg);
        }

        self.state.set(RouterState::Preinitialize);
        for &i in &self.configure_order.clone() {
            let result = {
                let mut cerrh = ContextErrorHandler::new(errh, self.context_message(i));
                let ctx = Context::new(self, i);
                match self.elements[i].try_borrow_mut() {
                    Ok(mut e) => e.initialize(&ctx, &mut cerrh),
                    Err(_) => cerrh.error("element busy during initialize"),
                }
            };
            let mut stages = self.stages.borrow_mut();
            if result.is_ok() {
                stages[i] = CleanupStage::Initialized;
            } else {
                stages[i] = CleanupStage::InitializeFailed;
                drop(stages);
                let msg = format!("element `{}` failed to initialize", self.names[i]);
                self.cleanup_elements();
                self.state.set(RouterState::Dead);
                return Err(RouterError::InitializeFailed(msg));
            }
        }

        // Hot-swap state transfer; errors are reported, never fatal.
        if let Some(mut old) = self.hotswap.borrow_mut().take() {
            self.take_state(&mut old, errh);
            old.please_die();
        }

        for stage in self.stages.borrow_mut().iter_mut() {
            *stage = CleanupStage::RouterLive;
        }
        self.state.set(RouterState::Live);
        debug!(elements = self.nelements(), "router is live");
        Ok(())
    }

    /// Transfers state from `old` into this router's elements. The
    /// default pairing is by fully qualified name and class; an element
    /// may designate another source via `hotswap_element`.
    pub fn take_state(&self, old: &mut Router, errh: &mut dyn ErrorHandler) {
        for i in 0..self.nelements() {
            let source_name = self.elements[i]
                .borrow()
                .hotswap_element()
                .unwrap_or_else(|| self.names[i].clone());
            let Some(oi) = old.find(&source_name) else { continue };
            if old.classes[oi] != self.classes[i] {
                continue;
            }
            let result = {
                let mut cerrh = ContextErrorHandler::new(errh, self.context_message(i));
                match (self.elements[i].try_borrow_mut(), old.elements[oi].try_borrow_mut()) {
                    (Ok(mut new_e), Ok(mut old_e)) => {
                        new_e.take_state(&mut **old_e, &mut cerrh);
                        Ok(())
                    }
                    _ => cerrh.error("element busy during take_state"),
                }
            };
            if result.is_err() {
                // Reported above; hot-swap continues with other elements.
                continue;
            }
        }
    }

    /// Marks the router dead and cleans up its elements.
    pub fn please_die(&mut self) {
        if self.state.get() != RouterState::Dead {
            self.cleanup_elements();
            self.state.set(RouterState::Dead);
        }
    }

    fn cleanup_elements(&self) {
        // Reverse configure order; elements that never got a phase slot
        // (validation failed early) clean up in reverse index order.
        let order: Vec<usize> = if self.configure_order.len() == self.elements.len() {
            self.configure_order.iter().rev().copied().collect()
        } else {
            (0..self.elements.len()).rev().collect()
        };
        for i in order {
            let stage = self.stages.borrow()[i];
            if let Ok(mut e) = self.elements[i].try_borrow_mut() {
                e.cleanup(stage);
            }
        }
    }

    /// Applies a new configuration to a live element, transactionally.
    pub fn live_reconfigure(
        &self,
        eindex: usize,
        configuration: &str,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), RouterError> {
        if eindex >= self.nelements() {
            return Err(RouterError::NoSuchElement(format!("#{eindex}")));
        }
        if !self.elements[eindex].borrow().can_live_reconfigure() {
            return Err(RouterError::HandlerPermission(self.names[eindex].clone(), "writable"));
        }
        let args = crate::config::parse::split_args(configuration);
        let result = {
            let mut cerrh = ContextErrorHandler::new(errh, self.context_message(eindex));
            let ctx = Context::new(self, eindex);
            match self.elements[eindex].try_borrow_mut() {
                Ok(mut e) => e.live_reconfigure(args, &ctx, &mut cerrh),
                Err(_) => cerrh.error("element busy during reconfigure"),
            }
        };
        match result {
            Ok(()) => {
                self.set_configuration(eindex, configuration.to_string());
                Ok(())
            }
            Err(()) => Err(RouterError::InitializeFailed(format!(
                "live reconfigure of `{}` failed",
                self.names[eindex]
            ))),
        }
    }

    // --- handlers --------------------------------------------------------

    fn install_standard_handlers(&self, eindex: usize) {
        use crate::handler::standard;
        let can_reconfigure = self.elements[eindex].borrow().can_live_reconfigure();
        let mut table = self.handlers.borrow_mut();
        table.add_read(eindex, "name", standard::read_name, 0, hflags::CALM);
        table.add_read(eindex, "class", standard::read_class, 0, hflags::CALM);
        table.add_read(eindex, "config", standard::read_config, 0, hflags::CALM);
        if can_reconfigure {
            table.add_write(eindex, "config", standard::write_config, 0, 0);
        }
        table.add_read(eindex, "ports", standard::read_ports, 0, hflags::CALM);
        table.add_read(eindex, "handlers", standard::read_handlers, 0, hflags::CALM);
    }

    /// Resolves `name` on `element`, applying the star-handler protocol:
    /// if the lookup fails and the element has a writable `*` handler,
    /// that handler is invoked with the missing name and the lookup is
    /// retried once.
    pub fn resolve_handler(&self, element: Option<usize>, name: &str) -> Option<HandlerIndex> {
        match element {
            Some(e) => {
                if let Some(h) = self.handlers.borrow().find(e, name) {
                    return Some(h);
                }
                let star = self.handlers.borrow().find(e, "*");
                if let Some(star) = star {
                    let writable = self.handlers.borrow().get(star).is_some_and(|h| h.writable());
                    if writable {
                        let mut errh = crate::error::SilentErrorHandler::new();
                        let _ = self.handler_write_index(star, e, name, &mut errh);
                        return self.handlers.borrow().find(e, name);
                    }
                }
                None
            }
            None => self
                .runtime
                .find_global_handler(name)
                .map(|i| i + FIRST_GLOBAL_HANDLER),
        }
    }

    /// Resolves a textual handler reference: `elem.hname`, `.hname` (the
    /// global set), or bare `hname` (the context element first, then the
    /// global set). Returns the element (None for global) and handler
    /// index.
    pub fn resolve_handler_name(
        &self,
        context: Option<usize>,
        spec: &str,
    ) -> Option<(Option<usize>, HandlerIndex)> {
        if let Some(hname) = spec.strip_prefix('.') {
            return self.resolve_handler(None, hname).map(|h| (None, h));
        }
        if let Some((ename, hname)) = spec.rsplit_once('.') {
            let eindex = match context {
                Some(ctx) => self.find_index(ctx, ename)?,
                None => self.find(ename)?,
            };
            return self.resolve_handler(Some(eindex), hname).map(|h| (Some(eindex), h));
        }
        if let Some(ctx) = context {
            if let Some(h) = self.resolve_handler(Some(ctx), spec) {
                return Some((Some(ctx), h));
            }
        }
        self.resolve_handler(None, spec).map(|h| (None, h))
    }

    pub fn handler_info(&self, index: HandlerIndex) -> Option<(String, u32)> {
        if index >= FIRST_GLOBAL_HANDLER {
            self.runtime
                .global_handler(index - FIRST_GLOBAL_HANDLER)
                .map(|h| (h.name().to_string(), h.flags()))
        } else {
            self.handlers.borrow().get(index).map(|h| (h.name().to_string(), h.flags()))
        }
    }

    /// Reads element `eindex`'s handler `name`.
    pub fn handler_read(&self, eindex: usize, name: &str, param: &str) -> Result<String, RouterError> {
        if eindex >= self.nelements() {
            return Err(RouterError::NoSuchElement(format!("#{eindex}")));
        }
        let index = self
            .resolve_handler(Some(eindex), name)
            .ok_or_else(|| RouterError::NoSuchHandler(format!("{}.{}", self.names[eindex], name)))?;
        self.handler_read_index(index, eindex, param)
    }

    fn handler_read_index(&self, index: HandlerIndex, eindex: usize, param: &str) -> Result<String, RouterError> {
        let h = self
            .handlers
            .borrow()
            .get(index)
            .cloned()
            .ok_or_else(|| RouterError::NoSuchHandler(format!("#{index}")))?;
        if !h.readable() {
            return Err(RouterError::HandlerPermission(h.name().to_string(), "readable"));
        }
        let info = HandlerInfo { name: h.name(), user: h.read_user(), param };
        let ctx = Context::new(self, eindex);
        if h.flags() & hflags::READ_COMPREHENSIVE != 0 {
            let comp = h.comprehensive_fn().ok_or_else(|| {
                RouterError::HandlerPermission(h.name().to_string(), "readable")
            })?;
            let mut value = String::new();
            let mut errh = crate::error::SilentErrorHandler::new();
            let ok = self
                .with_element_mut(eindex, |e| {
                    comp(HandlerOp::Read, &mut value, e, &info, &ctx, &mut errh)
                })
                .unwrap_or(Err(()));
            return match ok {
                Ok(()) => Ok(value),
                Err(()) => Err(RouterError::NoSuchHandler(h.name().to_string())),
            };
        }
        let read = h
            .read_fn()
            .ok_or_else(|| RouterError::HandlerPermission(h.name().to_string(), "readable"))?;
        self.with_element(eindex, |e| read(e, &info, &ctx))
            .ok_or_else(|| RouterError::HandlerPermission(h.name().to_string(), "readable now"))
    }

    /// Writes `value` to element `eindex`'s handler `name`.
    pub fn handler_write(
        &self,
        eindex: usize,
        name: &str,
        value: &str,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), RouterError> {
        if eindex >= self.nelements() {
            return Err(RouterError::NoSuchElement(format!("#{eindex}")));
        }
        let index = self
            .resolve_handler(Some(eindex), name)
            .ok_or_else(|| RouterError::NoSuchHandler(format!("{}.{}", self.names[eindex], name)))?;
        self.handler_write_index(index, eindex, value, errh)
            .map_err(|_| RouterError::HandlerWriteFailed(name.to_string()))
    }

    /// Reads a handler from the runtime's global set.
    pub fn global_handler_read(&self, name: &str, param: &str) -> Result<String, RouterError> {
        self.runtime
            .global_read(name, param)
            .ok_or_else(|| RouterError::NoSuchHandler(format!(".{name}")))
    }

    /// Writes a handler in the runtime's global set.
    pub fn global_handler_write(
        &self,
        name: &str,
        value: &str,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), RouterError> {
        match self.runtime.global_write(name, value, errh) {
            Some(Ok(())) => Ok(()),
            Some(Err(())) => Err(RouterError::HandlerWriteFailed(format!(".{name}"))),
            None => Err(RouterError::NoSuchHandler(format!(".{name}"))),
        }
    }

    fn handler_write_index(
        &self,
        index: HandlerIndex,
        eindex: usize,
        value: &str,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        let h = match self.handlers.borrow().get(index).cloned() {
            Some(h) => h,
            None => return Err(()),
        };
        if !h.writable() {
            return errh.error(&format!("handler `{}` not writable", h.name()));
        }
        let info = HandlerInfo { name: h.name(), user: h.write_user(), param: "" };
        let ctx = Context::new(self, eindex);
        if h.flags() & hflags::WRITE_COMPREHENSIVE != 0 {
            if let Some(comp) = h.comprehensive_fn() {
                let mut v = value.to_string();
                return self
                    .with_element_mut(eindex, |e| comp(HandlerOp::Write, &mut v, e, &info, &ctx, errh))
                    .unwrap_or(Err(()));
            }
        }
        let write = match h.write_fn() {
            Some(w) => w,
            None => return errh.error(&format!("handler `{}` not writable", h.name())),
        };
        self.with_element_mut(eindex, |e| write(value, e, &info, &ctx, errh))
            .unwrap_or(Err(()))
    }

    /// Installs a read handler at runtime. The handler table is
    /// append-only while the router is live; concurrent modification is
    /// the caller's business to serialize.
    pub fn add_read_handler(
        &self,
        eindex: usize,
        name: &str,
        cb: crate::handler::ReadHandler,
        user: u64,
    ) {
        self.handlers.borrow_mut().add_read(eindex, name, cb, user, 0);
    }

    /// Installs a write handler at runtime.
    pub fn add_write_handler(
        &self,
        eindex: usize,
        name: &str,
        cb: crate::handler::WriteHandler,
        user: u64,
    ) {
        self.handlers.borrow_mut().add_write(eindex, name, cb, user, 0);
    }

    pub fn element_handler_names(&self, eindex: usize) -> Vec<(String, String)> {
        let table = self.handlers.borrow();
        table
            .element_handlers(eindex)
            .into_iter()
            .filter_map(|h| table.get(h).map(|h| (h.name().to_string(), h.flags_string())))
            .collect()
    }

    // --- traversal -------------------------------------------------------

    /// Breadth-first traversal of the ports reachable from `start`.
    /// `forward` follows packet flow downstream (outputs to inputs);
    /// backward follows it upstream. `start_port` restricts the starting
    /// ports to one.
    pub fn visit(
        &self,
        start: usize,
        forward: bool,
        start_port: Option<usize>,
        visitor: &mut dyn RouterVisitor,
    ) {
        use std::collections::VecDeque;
        let mut queue: VecDeque<(PortId, bool, usize, usize, usize)> = VecDeque::new();
        let mut seen: Vec<(PortId, bool)> = Vec::new();

        let nstart = if forward { self.noutputs(start) } else { self.ninputs(start) };
        for p in 0..nstart {
            if start_port.is_some_and(|sp| sp != p) {
                continue;
            }
            let from = PortId::new(start, p);
            if forward {
                for c in self.connections_from(from) {
                    queue.push_back((c.to, false, start, p, 1));
                }
            } else {
                for c in self.connections_to(from) {
                    queue.push_back((c.from, true, start, p, 1));
                }
            }
        }

        while let Some((port, is_output, from_e, from_p, dist)) = queue.pop_front() {
            if seen.contains(&(port, is_output)) {
                continue;
            }
            seen.push((port, is_output));
            if !visitor.visit(port.element, is_output, port.port, from_e, from_p, dist) {
                continue;
            }
            let e = port.element;
            if forward {
                if is_output {
                    for c in self.connections_from(port) {
                        queue.push_back((c.to, false, e, port.port, dist + 1));
                    }
                } else {
                    for o in 0..self.noutputs(e) {
                        if self.flow_codes.get(e).is_some_and(|f| f.forward(port.port, o)) {
                            queue.push_back((PortId::new(e, o), true, e, port.port, dist));
                        }
                    }
                }
            } else if is_output {
                for i in 0..self.ninputs(e) {
                    if self.flow_codes.get(e).is_some_and(|f| f.forward(i, port.port)) {
                        queue.push_back((PortId::new(e, i), false, e, port.port, dist));
                    }
                }
            } else {
                for c in self.connections_to(port) {
                    queue.push_back((c.from, true, e, port.port, dist + 1));
                }
            }
        }
    }

    /// Elements downstream of `eindex`'s output `port` (or all outputs).
    pub fn downstream_elements(&self, eindex: usize, port: Option<usize>) -> Vec<usize> {
        struct Collect(Vec<usize>);
        impl RouterVisitor for Collect {
            fn visit(&mut self, element: usize, _o: bool, _p: usize, _fe: usize, _fp: usize, _d: usize) -> bool {
                if !self.0.contains(&element) {
                    self.0.push(element);
                }
                true
            }
        }
        let mut c = Collect(Vec::new());
        self.visit(eindex, true, port, &mut c);
        c.0
    }

    /// Elements upstream of `eindex`'s input `port` (or all inputs).
    pub fn upstream_elements(&self, eindex: usize, port: Option<usize>) -> Vec<usize> {
        struct Collect(Vec<usize>);
        impl RouterVisitor for Collect {
            fn visit(&mut self, element: usize, _o: bool, _p: usize, _fe: usize, _fp: usize, _d: usize) -> bool {
                if !self.0.contains(&element) {
                    self.0.push(element);
                }
                true
            }
        }
        let mut c = Collect(Vec::new());
        self.visit(eindex, false, port, &mut c);
        c.0
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        if self.state.get() != RouterState::Dead && self.state.get() != RouterState::New {
            self.cleanup_elements();
            self.state.set(RouterState::Dead);
        }
    }
}
