//! Discard: drops everything it is given.

use crate::element::{Context, Element};
use crate::error::ErrorHandler;
use crate::handler::{flags, HandlerInfo, HandlerRegistry};
use crate::packet::Packet;
use crate::task::TaskId;
use std::any::Any;

/// A sink. On a push input it drops arrivals directly; behind a pull
/// path it runs a task that drains the upstream.
#[derive(Default)]
pub struct Discard {
    count: u64,
    task: Option<TaskId>,
    has_wakeup: bool,
}

impl Discard {
    pub fn count(&self) -> u64 {
        self.count
    }
}

fn read_count(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any().downcast_ref::<Discard>().map_or_else(String::new, |d| d.count.to_string())
}

impl Element for Discard {
    fn class_name(&self) -> &'static str {
        "Discard"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "1/0"
    }

    fn processing(&self) -> &'static str {
        "a/"
    }

    fn initialize(&mut self, ctx: &Context<'_>, _errh: &mut dyn ErrorHandler) -> Result<(), ()> {
        if ctx.router().input_is_pull(ctx.element_index(), 0) {
            let task = ctx.new_task();
            self.task = Some(task);
            self.has_wakeup = crate::elements::unqueue::listen_upstream(ctx, task);
            ctx.task(task).reschedule();
        }
        Ok(())
    }

    fn add_handlers(&self, reg: &mut HandlerRegistry<'_>) {
        reg.add_read_with_flags("count", read_count, 0, flags::CALM);
    }

    fn push(&mut self, _port: usize, p: Packet, _ctx: &Context<'_>) {
        self.count += 1;
        p.kill();
    }

    fn run_task(&mut self, _task: TaskId, ctx: &Context<'_>) -> bool {
        match ctx.input(0).pull() {
            Some(p) => {
                self.count += 1;
                p.kill();
                if let Some(task) = self.task {
                    ctx.task(task).reschedule();
                }
                true
            }
            None => {
                if !self.has_wakeup {
                    // No wakeup coming; keep polling.
                    if let Some(task) = self.task {
                        ctx.task(task).reschedule();
                    }
                }
                false
            }
        }
    }
}
