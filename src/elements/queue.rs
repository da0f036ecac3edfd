//! Queue: the push-to-pull boundary.

use crate::config::args::Args;
use crate::element::{Context, Element, Storage, PUSH_TO_PULL};
use crate::error::ErrorHandler;
use crate::handler::{flags, HandlerInfo, HandlerRegistry};
use crate::packet::Packet;
use crate::router::NotifierSignal;
use crate::task::TaskId;
use std::any::Any;
use std::collections::VecDeque;

const DEFAULT_CAPACITY: usize = 1000;

/// A bounded FIFO of packets. Upstream pushes in, downstream pulls out;
/// arrivals beyond the capacity are dropped and counted. A notifier
/// signal tracks nonemptiness, and pull-side tasks may register to be
/// woken when the queue goes nonempty.
pub struct Queue {
    packets: VecDeque<Packet>,
    capacity: usize,
    drops: u64,
    highwater: usize,
    signal: Option<NotifierSignal>,
    listeners: Vec<TaskId>,
}

impl Default for Queue {
    fn default() -> Queue {
        Queue {
            packets: VecDeque::new(),
            capacity: DEFAULT_CAPACITY,
            drops: 0,
            highwater: 0,
            signal: None,
            listeners: Vec::new(),
        }
    }
}

impl Queue {
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn drops(&self) -> u64 {
        self.drops
    }

    /// Registers a task to wake when the queue becomes nonempty.
    pub fn add_listener(&mut self, task: TaskId) {
        if !self.listeners.contains(&task) {
            self.listeners.push(task);
        }
    }
}

fn read_length(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any().downcast_ref::<Queue>().map_or_else(String::new, |q| q.len().to_string())
}

fn read_capacity(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any().downcast_ref::<Queue>().map_or_else(String::new, |q| q.capacity.to_string())
}

fn read_drops(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any().downcast_ref::<Queue>().map_or_else(String::new, |q| q.drops.to_string())
}

fn read_highwater(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any().downcast_ref::<Queue>().map_or_else(String::new, |q| q.highwater.to_string())
}

fn write_reset_counts(
    _v: &str,
    e: &mut dyn Element,
    _i: &HandlerInfo<'_>,
    _ctx: &Context<'_>,
    _errh: &mut dyn ErrorHandler,
) -> Result<(), ()> {
    if let Some(q) = e.as_any_mut().downcast_mut::<Queue>() {
        q.drops = 0;
        q.highwater = q.packets.len();
    }
    Ok(())
}

impl Element for Queue {
    fn class_name(&self) -> &'static str {
        "Queue"
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
        PUSH_TO_PULL
    }

    fn cast(&self, name: &str) -> bool {
        name == "Queue" || name == "Storage"
    }

    fn as_storage(&self) -> Option<&dyn Storage> {
        Some(self)
    }

    fn as_storage_mut(&mut self) -> Option<&mut dyn Storage> {
        Some(self)
    }

    fn configure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        let mut capacity = self.capacity;
        let mut parser = Args::new(args, ctx, errh);
        parser.read_p("CAPACITY", &mut capacity);
        parser.complete()?;
        self.capacity = capacity;
        Ok(())
    }

    fn can_live_reconfigure(&self) -> bool {
        true
    }

    fn live_reconfigure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        self.configure(args, ctx, errh)?;
        while self.packets.len() > self.capacity {
            if let Some(p) = self.packets.pop_back() {
                p.kill();
                self.drops += 1;
            }
        }
        Ok(())
    }

    fn initialize(&mut self, ctx: &Context<'_>, _errh: &mut dyn ErrorHandler) -> Result<(), ()> {
        self.signal = Some(ctx.router().new_notifier_signal());
        Ok(())
    }

    fn add_handlers(&self, reg: &mut HandlerRegistry<'_>) {
        reg.add_read_with_flags("length", read_length, 0, flags::CALM);
        reg.add_read("capacity", read_capacity, 0);
        reg.add_read_with_flags("drops", read_drops, 0, flags::CALM);
        reg.add_read("highwater_length", read_highwater, 0);
        reg.add_write_with_flags("reset_counts", write_reset_counts, 0, flags::BUTTON);
    }

    fn take_state(&mut self, old: &mut dyn Element, _errh: &mut dyn ErrorHandler) {
        if let Some(old) = old.as_any_mut().downcast_mut::<Queue>() {
            while self.packets.len() < self.capacity {
                match old.packets.pop_front() {
                    Some(p) => self.packets.push_back(p),
                    None => break,
                }
            }
            self.drops += old.drops;
            self.highwater = self.highwater.max(self.packets.len());
            if let (Some(signal), false) = (&self.signal, self.packets.is_empty()) {
                signal.set();
            }
        }
    }

    fn push(&mut self, _port: usize, p: Packet, ctx: &Context<'_>) {
        if self.packets.len() >= self.capacity {
            self.drops += 1;
            p.kill();
            return;
        }
        let was_empty = self.packets.is_empty();
        self.packets.push_back(p);
        self.highwater = self.highwater.max(self.packets.len());
        if was_empty {
            if let Some(signal) = &self.signal {
                signal.set();
            }
            for task in &self.listeners {
                ctx.task(*task).reschedule();
            }
        }
    }

    fn pull(&mut self, _port: usize, _ctx: &Context<'_>) -> Option<Packet> {
        let p = self.packets.pop_front();
        if self.packets.is_empty() {
            if let Some(signal) = &self.signal {
                signal.clear();
            }
        }
        p
    }

    fn cleanup(&mut self, _stage: crate::element::CleanupStage) {
        self.packets.clear();
    }
}

impl Storage for Queue {
    fn queue_len(&self) -> usize {
        self.packets.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn yank(&mut self, pred: &mut dyn FnMut(&Packet) -> bool) -> Vec<Packet> {
        let mut yanked = Vec::new();
        let mut kept = VecDeque::with_capacity(self.packets.len());
        for p in self.packets.drain(..) {
            if pred(&p) {
                yanked.push(p);
            } else {
                kept.push_back(p);
            }
        }
        self.packets = kept;
        if self.packets.is_empty() {
            if let Some(signal) = &self.signal {
                signal.clear();
            }
        }
        yanked
    }
}
