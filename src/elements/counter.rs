//! Counter: counts packets and bytes passing through.

use crate::element::{Context, Element, AGNOSTIC};
use crate::error::ErrorHandler;
use crate::handler::{flags, HandlerInfo, HandlerRegistry};
use crate::packet::Packet;
use std::any::Any;

/// Pass-through packet and byte counter. The counts survive hot-swap.
#[derive(Default)]
pub struct Counter {
    count: u64,
    byte_count: u64,
}

impl Counter {
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }
}

fn read_count(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any().downcast_ref::<Counter>().map_or_else(String::new, |c| c.count.to_string())
}

fn read_byte_count(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any().downcast_ref::<Counter>().map_or_else(String::new, |c| c.byte_count.to_string())
}

fn write_reset(
    _v: &str,
    e: &mut dyn Element,
    _i: &HandlerInfo<'_>,
    _ctx: &Context<'_>,
    _errh: &mut dyn ErrorHandler,
) -> Result<(), ()> {
    if let Some(c) = e.as_any_mut().downcast_mut::<Counter>() {
        c.count = 0;
        c.byte_count = 0;
    }
    Ok(())
}

impl Element for Counter {
    fn class_name(&self) -> &'static str {
        "Counter"
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

    fn can_live_reconfigure(&self) -> bool {
        true
    }

    fn add_handlers(&self, reg: &mut HandlerRegistry<'_>) {
        reg.add_read_with_flags("count", read_count, 0, flags::CALM);
        reg.add_read_with_flags("byte_count", read_byte_count, 0, flags::CALM);
        reg.add_write_with_flags("reset_counts", write_reset, 0, flags::BUTTON);
    }

    fn take_state(&mut self, old: &mut dyn Element, _errh: &mut dyn ErrorHandler) {
        if let Some(old) = old.as_any().downcast_ref::<Counter>() {
            self.count = old.count;
            self.byte_count = old.byte_count;
        }
    }

    fn simple_action(&mut self, p: Packet) -> Option<Packet> {
        self.count += 1;
        self.byte_count += p.len() as u64;
        Some(p)
    }
}
