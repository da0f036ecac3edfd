//! Unqueue: the pull-to-push boundary.

use crate::config::args::Args;
use crate::element::{Context, Element, PULL_TO_PUSH};
use crate::error::ErrorHandler;
use crate::handler::{flags, HandlerInfo, HandlerRegistry};
use crate::task::TaskId;
use std::any::Any;

/// Registers `task` as a wake listener with the element feeding this
/// element's input 0, when that element is a [`Queue`]. Other upstreams
/// provide no wakeup; the task then stays scheduled and polls.
pub(crate) fn listen_upstream(ctx: &Context<'_>, task: TaskId) -> bool {
    let Some(src) = ctx.router().input_source(ctx.element_index(), 0) else {
        return false;
    };
    ctx.router()
        .with_element_mut(src.element, |e| {
            match e.as_any_mut().downcast_mut::<crate::elements::Queue>() {
                Some(q) => {
                    q.add_listener(task);
                    true
                }
                None => false,
            }
        })
        .unwrap_or(false)
}

fn unqueue_read_count(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any().downcast_ref::<Unqueue>().map_or_else(String::new, |u| u.count.to_string())
}

/// Pulls packets from its input under task control and pushes them
/// downstream, up to `BURST` per quantum.
pub struct Unqueue {
    burst: usize,
    count: u64,
    task: Option<TaskId>,
    /// Whether the upstream offers wakeups; without them the task polls.
    has_wakeup: bool,
}

impl Default for Unqueue {
    fn default() -> Unqueue {
        Unqueue { burst: 1, count: 0, task: None, has_wakeup: false }
    }
}

impl Element for Unqueue {
    fn class_name(&self) -> &'static str {
        "Unqueue"
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
        PULL_TO_PUSH
    }

    fn configure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        let mut burst = self.burst;
        let mut parser = Args::new(args, ctx, errh);
        parser.read_p("BURST", &mut burst);
        parser.complete()?;
        self.burst = burst.max(1);
        Ok(())
    }

    fn initialize(&mut self, ctx: &Context<'_>, _errh: &mut dyn ErrorHandler) -> Result<(), ()> {
        let task = ctx.new_task();
        self.task = Some(task);
        self.has_wakeup = listen_upstream(ctx, task);
        ctx.task(task).reschedule();
        Ok(())
    }

    fn add_handlers(&self, reg: &mut HandlerRegistry<'_>) {
        reg.add_read_with_flags("count", unqueue_read_count, 0, flags::CALM);
    }

    fn run_task(&mut self, task: TaskId, ctx: &Context<'_>) -> bool {
        let mut moved = 0;
        while moved < self.burst {
            match ctx.input(0).pull() {
                Some(p) => {
                    self.count += 1;
                    moved += 1;
                    ctx.output(0).push(p);
                }
                None => break,
            }
        }
        if moved > 0 || !self.has_wakeup {
            ctx.task(task).reschedule();
        }
        moved > 0
    }
}
