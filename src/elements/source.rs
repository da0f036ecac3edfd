//! Packet sources: task-driven and timer-driven.

use crate::config::args::Args;
use crate::element::{Context, Element, PUSH};
use crate::error::ErrorHandler;
use crate::handler::{flags, HandlerInfo, HandlerRegistry};
use crate::packet::Packet;
use crate::task::TaskId;
use crate::timer::TimerId;
use crate::timestamp::Timestamp;
use std::any::Any;

const DEFAULT_DATA: &str = "Random bunch of bytes";

/// Pushes copies of a configured payload as fast as the scheduler allows,
/// up to `LIMIT` packets (`-1` = unlimited), `BURST` per quantum. With
/// `STOP true` the router's runcount is decremented when the limit is
/// reached.
pub struct InfiniteSource {
    data: String,
    limit: i64,
    burst: usize,
    active: bool,
    stop: bool,
    count: u64,
    task: Option<TaskId>,
}

impl Default for InfiniteSource {
    fn default() -> InfiniteSource {
        InfiniteSource {
            data: DEFAULT_DATA.to_string(),
            limit: -1,
            burst: 1,
            active: true,
            stop: false,
            count: 0,
            task: None,
        }
    }
}

fn source_read_count(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any()
        .downcast_ref::<InfiniteSource>()
        .map_or_else(String::new, |s| s.count.to_string())
}

fn timed_read_count(e: &dyn Element, _i: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    e.as_any()
        .downcast_ref::<TimedSource>()
        .map_or_else(String::new, |s| s.count.to_string())
}

fn source_write_active(
    v: &str,
    e: &mut dyn Element,
    _i: &HandlerInfo<'_>,
    ctx: &Context<'_>,
    errh: &mut dyn ErrorHandler,
) -> Result<(), ()> {
    let Some(active) = crate::config::parse::parse_bool(v) else {
        return errh.error("expected true or false");
    };
    if let Some(s) = e.as_any_mut().downcast_mut::<InfiniteSource>() {
        s.active = active;
        if let (true, Some(task)) = (active, s.task) {
            ctx.task(task).reschedule();
        }
    }
    Ok(())
}

impl Element for InfiniteSource {
    fn class_name(&self) -> &'static str {
        "InfiniteSource"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "0/1"
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
        let mut data = self.data.clone();
        let mut limit = self.limit;
        let mut burst = self.burst;
        let mut active = self.active;
        let mut stop = self.stop;
        let mut parser = Args::new(args, ctx, errh);
        parser
            .read_p("DATA", &mut data)
            .read_p("LIMIT", &mut limit)
            .read_p("BURST", &mut burst)
            .read_p("ACTIVE", &mut active)
            .read("STOP", &mut stop);
        parser.complete()?;
        self.data = data;
        self.limit = limit;
        self.burst = burst.max(1);
        self.active = active;
        self.stop = stop;
        Ok(())
    }

    fn initialize(&mut self, ctx: &Context<'_>, _errh: &mut dyn ErrorHandler) -> Result<(), ()> {
        let task = ctx.new_task();
        self.task = Some(task);
        if self.active {
            ctx.task(task).reschedule();
        }
        Ok(())
    }

    fn add_handlers(&self, reg: &mut HandlerRegistry<'_>) {
        reg.add_read_with_flags("count", source_read_count, 0, flags::CALM);
        reg.add_write_with_flags("active", source_write_active, 0, flags::CHECKBOX);
    }

    fn run_task(&mut self, task: TaskId, ctx: &Context<'_>) -> bool {
        if !self.active {
            return false;
        }
        let mut sent = 0;
        while sent < self.burst {
            if self.limit >= 0 && (self.count as i64) >= self.limit {
                if self.stop {
                    ctx.adjust_runcount(-1);
                }
                self.active = false;
                return sent > 0;
            }
            ctx.output(0).push(Packet::make_from(self.data.as_bytes()));
            self.count += 1;
            sent += 1;
        }
        ctx.task(task).reschedule();
        true
    }
}

const DEFAULT_INTERVAL_MS: i64 = 500;

/// Pushes one copy of a configured payload per timer interval.
pub struct TimedSource {
    data: String,
    interval: Timestamp,
    count: u64,
    timer: Option<TimerId>,
}

impl Default for TimedSource {
    fn default() -> TimedSource {
        TimedSource {
            data: DEFAULT_DATA.to_string(),
            interval: Timestamp::from_msec(DEFAULT_INTERVAL_MS),
            count: 0,
            timer: None,
        }
    }
}

impl Element for TimedSource {
    fn class_name(&self) -> &'static str {
        "TimedSource"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "0/1"
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
        let mut interval = self.interval;
        let mut data = self.data.clone();
        let mut parser = Args::new(args, ctx, errh);
        parser.read_p("INTERVAL", &mut interval).read_p("DATA", &mut data);
        parser.complete()?;
        self.interval = interval;
        self.data = data;
        Ok(())
    }

    fn initialize(&mut self, ctx: &Context<'_>, _errh: &mut dyn ErrorHandler) -> Result<(), ()> {
        let timer = ctx.new_timer();
        self.timer = Some(timer);
        ctx.timer(timer).schedule_after(self.interval);
        Ok(())
    }

    fn add_handlers(&self, reg: &mut HandlerRegistry<'_>) {
        reg.add_read_with_flags("count", timed_read_count, 0, flags::CALM);
    }

    fn run_timer(&mut self, timer: TimerId, ctx: &Context<'_>) {
        if Some(timer) != self.timer {
            return;
        }
        ctx.output(0).push(Packet::make_from(self.data.as_bytes()));
        self.count += 1;
        ctx.timer(timer).schedule_after(self.interval);
    }
}
