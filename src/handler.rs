//! Named read/write handlers: the observation and control endpoints of
//! elements.
//!
//! Handlers are stored once per router in a deduplicated pool: many
//! elements install byte-identical handlers (every `Counter` has the same
//! `count` handler), so each distinct record is kept once with a use
//! count, and per-element chains reference pool slots. Callbacks are
//! plain function pointers plus a small opaque user word, which is what
//! makes records comparable and therefore shareable.
//!
//! A read handler and a write handler may share one name on one element;
//! adding one kind preserves the other. An element may also install a
//! handler named `*`: when a lookup fails, the `*` handler's write
//! callback is invoked with the missing name, giving the element a chance
//! to materialize the handler on demand before the lookup is retried.

use crate::element::{Context, Element};
use crate::error::ErrorHandler;
use std::fmt;
use std::ptr;

/// Handler flag bits.
pub mod flags {
    pub const READ: u32 = 1 << 0;
    pub const WRITE: u32 = 1 << 1;
    /// The read callback accepts a parameter string.
    pub const READ_PARAM: u32 = 1 << 2;
    pub const READ_COMPREHENSIVE: u32 = 1 << 3;
    pub const WRITE_COMPREHENSIVE: u32 = 1 << 4;
    /// Reading has no side effects and is cheap.
    pub const CALM: u32 = 1 << 5;
    pub const EXPENSIVE: u32 = 1 << 6;
    pub const UNCOMMON: u32 = 1 << 7;
    pub const DEPRECATED: u32 = 1 << 8;
    pub const BUTTON: u32 = 1 << 9;
    pub const CHECKBOX: u32 = 1 << 10;
    pub const RAW: u32 = 1 << 11;
}

/// Operation selector for comprehensive handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOp {
    Read,
    Write,
}

/// Extra call information passed to handler callbacks.
pub struct HandlerInfo<'a> {
    /// The handler's name as looked up.
    pub name: &'a str,
    /// The opaque per-side user word stored with the handler.
    pub user: u64,
    /// The read parameter, empty unless the caller supplied one.
    pub param: &'a str,
}

pub type ReadHandler = fn(&dyn Element, &HandlerInfo<'_>, &Context<'_>) -> String;

pub type WriteHandler =
    fn(&str, &mut dyn Element, &HandlerInfo<'_>, &Context<'_>, &mut dyn ErrorHandler) -> Result<(), ()>;

/// Handles both directions in one function; `value` is in-out.
pub type ComprehensiveHandler = fn(
    HandlerOp,
    &mut String,
    &mut dyn Element,
    &HandlerInfo<'_>,
    &Context<'_>,
    &mut dyn ErrorHandler,
) -> Result<(), ()>;

/// One handler record.
#[derive(Clone)]
pub struct Handler {
    name: String,
    read: Option<ReadHandler>,
    write: Option<WriteHandler>,
    comprehensive: Option<ComprehensiveHandler>,
    read_user: u64,
    write_user: u64,
    flags: u32,
}

impl Handler {
    fn blank(name: &str) -> Handler {
        Handler {
            name: name.to_string(),
            read: None,
            write: None,
            comprehensive: None,
            read_user: 0,
            write_user: 0,
            flags: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn readable(&self) -> bool {
        self.flags & flags::READ != 0
    }

    pub fn writable(&self) -> bool {
        self.flags & flags::WRITE != 0
    }

    pub fn read_fn(&self) -> Option<ReadHandler> {
        self.read
    }

    pub fn write_fn(&self) -> Option<WriteHandler> {
        self.write
    }

    pub fn comprehensive_fn(&self) -> Option<ComprehensiveHandler> {
        self.comprehensive
    }

    pub fn read_user(&self) -> u64 {
        self.read_user
    }

    pub fn write_user(&self) -> u64 {
        self.write_user
    }

    /// Single-letter flag summary, as printed by the `handlers` handler.
    pub fn flags_string(&self) -> String {
        let mut s = String::new();
        if self.readable() {
            s.push('r');
        }
        if self.writable() {
            s.push('w');
        }
        if self.flags & flags::READ_PARAM != 0 {
            s.push('+');
        }
        if self.flags & flags::CALM != 0 {
            s.push('c');
        }
        if self.flags & flags::EXPENSIVE != 0 {
            s.push('$');
        }
        if self.flags & flags::UNCOMMON != 0 {
            s.push('U');
        }
        if self.flags & flags::DEPRECATED != 0 {
            s.push('D');
        }
        if self.flags & flags::BUTTON != 0 {
            s.push('b');
        }
        if self.flags & flags::CHECKBOX != 0 {
            s.push('x');
        }
        if self.flags & flags::RAW != 0 {
            s.push('%');
        }
        s
    }

    fn same_content(&self, other: &Handler) -> bool {
        fn same_read(a: Option<ReadHandler>, b: Option<ReadHandler>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(f), Some(g)) => ptr::fn_addr_eq(f, g),
                _ => false,
            }
        }
        fn same_write(a: Option<WriteHandler>, b: Option<WriteHandler>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(f), Some(g)) => ptr::fn_addr_eq(f, g),
                _ => false,
            }
        }
        fn same_comp(a: Option<ComprehensiveHandler>, b: Option<ComprehensiveHandler>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(f), Some(g)) => ptr::fn_addr_eq(f, g),
                _ => false,
            }
        }
        self.name == other.name
            && self.flags == other.flags
            && self.read_user == other.read_user
            && self.write_user == other.write_user
            && same_read(self.read, other.read)
            && same_write(self.write, other.write)
            && same_comp(self.comprehensive, other.comprehensive)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({} {})", self.name, self.flags_string())
    }
}

/// Index of a handler; values at or above [`FIRST_GLOBAL_HANDLER`] address
/// the runtime's global handler set instead of a router's pool.
pub type HandlerIndex = usize;

/// Sentinel base for global handler indices, well above any plausible
/// per-router pool size.
pub const FIRST_GLOBAL_HANDLER: HandlerIndex = 0x4000_0000;

const NONE: i32 = -1;

#[derive(Debug, Clone, Copy)]
struct EhandlerNode {
    handler: i32,
    next: i32,
}

/// The per-router handler store.
pub(crate) struct HandlerTable {
    pool: Vec<Handler>,
    use_count: Vec<u32>,
    next_by_name: Vec<i32>,
    /// Sorted by name; each entry heads a chain of pool slots sharing the
    /// name (with differing content).
    name_index: Vec<(String, i32)>,
    free_head: i32,
    ehandler_first_by_element: Vec<i32>,
    ehandlers: Vec<EhandlerNode>,
}

impl Default for HandlerTable {
    fn default() -> HandlerTable {
        HandlerTable::new(0)
    }
}

impl HandlerTable {
    pub fn new(nelements: usize) -> HandlerTable {
        HandlerTable {
            pool: Vec::new(),
            use_count: Vec::new(),
            next_by_name: Vec::new(),
            name_index: Vec::new(),
            free_head: NONE,
            ehandler_first_by_element: vec![NONE; nelements],
            ehandlers: Vec::new(),
        }
    }

    /// Pool slot of element `eindex`'s handler `name`, if installed.
    pub fn find(&self, eindex: usize, name: &str) -> Option<HandlerIndex> {
        let mut node = *self.ehandler_first_by_element.get(eindex)?;
        while node != NONE {
            let n = self.ehandlers[node as usize];
            if self.pool[n.handler as usize].name == name {
                return Some(n.handler as usize);
            }
            node = n.next;
        }
        None
    }

    pub fn get(&self, index: HandlerIndex) -> Option<&Handler> {
        self.pool.get(index)
    }

    /// Pool slots installed on `eindex`, in installation order.
    pub fn element_handlers(&self, eindex: usize) -> Vec<HandlerIndex> {
        let mut out = Vec::new();
        let mut node = self.ehandler_first_by_element.get(eindex).copied().unwrap_or(NONE);
        while node != NONE {
            let n = self.ehandlers[node as usize];
            out.push(n.handler as usize);
            node = n.next;
        }
        out.reverse(); // chains grow at the head
        out
    }

    pub fn add_read(&mut self, eindex: usize, name: &str, cb: ReadHandler, user: u64, extra: u32) {
        let mut h = Handler::blank(name);
        h.read = Some(cb);
        h.read_user = user;
        h.flags = flags::READ | extra;
        self.add(eindex, h);
    }

    pub fn add_write(&mut self, eindex: usize, name: &str, cb: WriteHandler, user: u64, extra: u32) {
        let mut h = Handler::blank(name);
        h.write = Some(cb);
        h.write_user = user;
        h.flags = flags::WRITE | extra;
        self.add(eindex, h);
    }

    pub fn add_comprehensive(
        &mut self,
        eindex: usize,
        name: &str,
        cb: ComprehensiveHandler,
        user: u64,
        extra: u32,
    ) {
        let mut h = Handler::blank(name);
        h.comprehensive = Some(cb);
        h.read_user = user;
        h.flags = flags::READ
            | flags::WRITE
            | flags::READ_COMPREHENSIVE
            | flags::WRITE_COMPREHENSIVE
            | extra;
        self.add(eindex, h);
    }

    /// Installs `incoming` on `eindex`, combining with any existing
    /// same-named handler: a new read side preserves the old write side
    /// and vice versa. The pool is searched for an identical record
    /// before a new slot is allocated.
    fn add(&mut self, eindex: usize, incoming: Handler) {
        if eindex >= self.ehandler_first_by_element.len() {
            self.ehandler_first_by_element.resize(eindex + 1, NONE);
        }

        // Combine with the currently installed record, if any.
        let existing_node = self.find_node(eindex, &incoming.name);
        let merged = match existing_node {
            Some(node) => {
                let old = &self.pool[self.ehandlers[node].handler as usize];
                let mut m = old.clone();
                if incoming.flags & flags::READ != 0 {
                    m.read = incoming.read;
                    m.read_user = incoming.read_user;
                }
                if incoming.flags & flags::WRITE != 0 {
                    m.write = incoming.write;
                    m.write_user = incoming.write_user;
                }
                if incoming.comprehensive.is_some() {
                    m.comprehensive = incoming.comprehensive;
                }
                m.flags |= incoming.flags;
                m
            }
            None => incoming,
        };

        let slot = self.intern(merged);

        match existing_node {
            Some(node) => {
                let old_slot = self.ehandlers[node].handler;
                if old_slot != slot {
                    self.release(old_slot as usize);
                    self.use_count[slot as usize] += 1;
                    self.ehandlers[node].handler = slot;
                }
            }
            None => {
                self.use_count[slot as usize] += 1;
                let node = self.ehandlers.len() as i32;
                self.ehandlers.push(EhandlerNode {
                    handler: slot,
                    next: self.ehandler_first_by_element[eindex],
                });
                self.ehandler_first_by_element[eindex] = node;
            }
        }
    }

    fn find_node(&self, eindex: usize, name: &str) -> Option<usize> {
        let mut node = *self.ehandler_first_by_element.get(eindex)?;
        while node != NONE {
            let n = self.ehandlers[node as usize];
            if self.pool[n.handler as usize].name == name {
                return Some(node as usize);
            }
            node = n.next;
        }
        None
    }

    /// Returns the pool slot holding a record identical to `h`, creating
    /// one (reusing a freed slot if possible) when none exists.
    fn intern(&mut self, h: Handler) -> i32 {
        let chain_pos = self.name_index.binary_search_by(|(n, _)| n.as_str().cmp(&h.name));
        if let Ok(pos) = chain_pos {
            let mut slot = self.name_index[pos].1;
            while slot != NONE {
                if self.pool[slot as usize].same_content(&h) {
                    return slot;
                }
                slot = self.next_by_name[slot as usize];
            }
        }

        let slot = if self.free_head != NONE {
            let slot = self.free_head;
            self.free_head = self.next_by_name[slot as usize];
            self.pool[slot as usize] = h;
            slot
        } else {
            self.pool.push(h);
            self.use_count.push(0);
            self.next_by_name.push(NONE);
            (self.pool.len() - 1) as i32
        };

        match chain_pos {
            Ok(pos) => {
                self.next_by_name[slot as usize] = self.name_index[pos].1;
                self.name_index[pos].1 = slot;
            }
            Err(pos) => {
                self.next_by_name[slot as usize] = NONE;
                self.name_index.insert(pos, (self.pool[slot as usize].name.clone(), slot));
            }
        }
        slot
    }

    /// Drops one use of a pool slot; at zero the slot leaves its name
    /// chain and joins the free list.
    fn release(&mut self, slot: usize) {
        self.use_count[slot] -= 1;
        if self.use_count[slot] > 0 {
            return;
        }
        let name = self.pool[slot].name.clone();
        if let Ok(pos) = self.name_index.binary_search_by(|(n, _)| n.as_str().cmp(&name)) {
            let mut cur = self.name_index[pos].1;
            if cur == slot as i32 {
                self.name_index[pos].1 = self.next_by_name[slot];
                if self.name_index[pos].1 == NONE {
                    self.name_index.remove(pos);
                }
            } else {
                while cur != NONE && self.next_by_name[cur as usize] != slot as i32 {
                    cur = self.next_by_name[cur as usize];
                }
                if cur != NONE {
                    self.next_by_name[cur as usize] = self.next_by_name[slot];
                }
            }
        }
        self.next_by_name[slot] = self.free_head;
        self.free_head = slot as i32;
    }

    #[cfg(test)]
    fn pool_len(&self) -> usize {
        self.pool.len()
    }
}

/// The registration interface handed to [`Element::add_handlers`].
pub struct HandlerRegistry<'a> {
    table: &'a mut HandlerTable,
    eindex: usize,
}

impl<'a> HandlerRegistry<'a> {
    pub(crate) fn new(table: &'a mut HandlerTable, eindex: usize) -> HandlerRegistry<'a> {
        HandlerRegistry { table, eindex }
    }

    pub fn add_read(&mut self, name: &str, cb: ReadHandler, user: u64) {
        self.table.add_read(self.eindex, name, cb, user, 0);
    }

    pub fn add_read_with_flags(&mut self, name: &str, cb: ReadHandler, user: u64, extra: u32) {
        self.table.add_read(self.eindex, name, cb, user, extra);
    }

    pub fn add_write(&mut self, name: &str, cb: WriteHandler, user: u64) {
        self.table.add_write(self.eindex, name, cb, user, 0);
    }

    pub fn add_write_with_flags(&mut self, name: &str, cb: WriteHandler, user: u64, extra: u32) {
        self.table.add_write(self.eindex, name, cb, user, extra);
    }

    pub fn add_read_write(&mut self, name: &str, r: ReadHandler, w: WriteHandler, user: u64) {
        self.table.add_read(self.eindex, name, r, user, 0);
        self.table.add_write(self.eindex, name, w, user, 0);
    }

    pub fn add_comprehensive(&mut self, name: &str, cb: ComprehensiveHandler, user: u64, extra: u32) {
        self.table.add_comprehensive(self.eindex, name, cb, user, extra);
    }
}

/// The standard handlers installed on every element.
pub(crate) mod standard {
    use super::*;

    pub fn read_name(_e: &dyn Element, _i: &HandlerInfo<'_>, ctx: &Context<'_>) -> String {
        ctx.name().to_string()
    }

    pub fn read_class(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
        e.class_name().to_string()
    }

    pub fn read_config(_e: &dyn Element, _i: &HandlerInfo<'_>, ctx: &Context<'_>) -> String {
        ctx.router().econfiguration(ctx.element_index())
    }

    /// Live reconfiguration through the `config` handler. The element is
    /// already exclusively borrowed by handler dispatch, so the
    /// reconfigure call goes straight to it; the stored configuration is
    /// only replaced on success.
    pub fn write_config(
        value: &str,
        e: &mut dyn Element,
        _i: &HandlerInfo<'_>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        let args = crate::config::parse::split_args(value);
        e.live_reconfigure(args, ctx, errh)?;
        ctx.router().set_configuration(ctx.element_index(), value.to_string());
        Ok(())
    }

    pub fn read_ports(_e: &dyn Element, _i: &HandlerInfo<'_>, ctx: &Context<'_>) -> String {
        ctx.router().element_ports_string(ctx.element_index())
    }

    pub fn read_handlers(_e: &dyn Element, _i: &HandlerInfo<'_>, ctx: &Context<'_>) -> String {
        let mut out = String::new();
        for (name, flags) in ctx.router().element_handler_names(ctx.element_index()) {
            out.push_str(&name);
            out.push('\t');
            out.push_str(&flags);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_a(_e: &dyn Element, _i: &HandlerInfo<'_>, _c: &Context<'_>) -> String {
        "a".into()
    }

    fn read_b(_e: &dyn Element, _i: &HandlerInfo<'_>, _c: &Context<'_>) -> String {
        "b".into()
    }

    fn write_a(
        _v: &str,
        _e: &mut dyn Element,
        _i: &HandlerInfo<'_>,
        _c: &Context<'_>,
        _errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        Ok(())
    }

    #[test]
    fn identical_handlers_share_one_slot() {
        let mut t = HandlerTable::new(3);
        t.add_read(0, "count", read_a, 0, 0);
        t.add_read(1, "count", read_a, 0, 0);
        t.add_read(2, "count", read_a, 0, 0);
        assert_eq!(t.pool_len(), 1);
        assert_eq!(t.find(0, "count"), t.find(2, "count"));
    }

    #[test]
    fn different_content_gets_distinct_slots() {
        let mut t = HandlerTable::new(2);
        t.add_read(0, "x", read_a, 0, 0);
        t.add_read(1, "x", read_b, 0, 0);
        assert_ne!(t.find(0, "x"), t.find(1, "x"));
    }

    #[test]
    fn read_and_write_combine_under_one_name() {
        let mut t = HandlerTable::new(1);
        t.add_read(0, "config", read_a, 0, 0);
        t.add_write(0, "config", write_a, 7, 0);
        let h = t.get(t.find(0, "config").unwrap()).unwrap();
        assert!(h.readable() && h.writable());
        assert_eq!(h.write_user(), 7);
        assert!(h.read_fn().is_some());
    }

    #[test]
    fn last_writer_wins_for_same_kind() {
        let mut t = HandlerTable::new(1);
        t.add_read(0, "x", read_a, 0, 0);
        t.add_read(0, "x", read_b, 0, 0);
        let h = t.get(t.find(0, "x").unwrap()).unwrap();
        assert!(ptr::fn_addr_eq(h.read_fn().unwrap(), read_b as ReadHandler));
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut t = HandlerTable::new(2);
        t.add_read(0, "x", read_a, 0, 0);
        let before = t.pool_len();
        // Overriding drops the old slot's last use; the new record can
        // reuse it.
        t.add_read(0, "x", read_b, 0, 0);
        t.add_read(1, "y", read_a, 0, 0);
        assert!(t.pool_len() <= before + 1);
    }

    #[test]
    fn element_handler_listing_in_install_order() {
        let mut t = HandlerTable::new(1);
        t.add_read(0, "alpha", read_a, 0, 0);
        t.add_read(0, "beta", read_b, 0, 0);
        let names: Vec<_> = t
            .element_handlers(0)
            .into_iter()
            .map(|h| t.get(h).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }
}
