//! Tee: duplicates packets to every output.

use crate::element::{Context, Element, PUSH};
use crate::packet::Packet;
use std::any::Any;

/// Pushes a clone of each arriving packet out every output; the original
/// leaves through the last one.
#[derive(Default)]
pub struct Tee;

impl Element for Tee {
    fn class_name(&self) -> &'static str {
        "Tee"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "1/1-"
    }

    fn processing(&self) -> &'static str {
        PUSH
    }

    fn push(&mut self, _port: usize, p: Packet, ctx: &Context<'_>) {
        let n = ctx.noutputs();
        for port in 0..n.saturating_sub(1) {
            ctx.output(port).push(p.clone());
        }
        if n > 0 {
            ctx.output(n - 1).push(p);
        } else {
            p.kill();
        }
    }
}
