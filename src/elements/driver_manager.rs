//! DriverManager: keeps a stopping router alive a configured number of
//! times.

use crate::config::args::Args;
use crate::element::{Context, Element};
use crate::error::ErrorHandler;
use std::any::Any;

/// When the runcount requests a stop, this element may re-arm it.
/// `ITERATIONS n` allows `n` stop requests to be absorbed before the
/// router is finally allowed to die.
#[derive(Default)]
pub struct DriverManager {
    remaining: u32,
}

impl Element for DriverManager {
    fn class_name(&self) -> &'static str {
        "DriverManager"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "0/0"
    }

    fn configure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        let mut iterations = self.remaining;
        let mut parser = Args::new(args, ctx, errh);
        parser.read_p("ITERATIONS", &mut iterations);
        parser.complete()?;
        self.remaining = iterations;
        Ok(())
    }

    fn router_stop_requested(&mut self, ctx: &Context<'_>) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        ctx.set_runcount(1);
        true
    }
}
