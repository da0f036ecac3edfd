//! Print: logs a summary of every passing packet.

use crate::config::args::Args;
use crate::element::{Context, Element, AGNOSTIC};
use crate::error::ErrorHandler;
use crate::packet::Packet;
use std::any::Any;
use std::fmt::Write as _;
use tracing::info;

const DEFAULT_MAX: usize = 24;

/// Logs label, length, and a hex prefix of each packet, then passes it
/// along unchanged.
pub struct Print {
    label: String,
    max_length: usize,
}

impl Default for Print {
    fn default() -> Print {
        Print { label: String::new(), max_length: DEFAULT_MAX }
    }
}

impl Element for Print {
    fn class_name(&self) -> &'static str {
        "Print"
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

    fn configure(
        &mut self,
        args: Vec<String>,
        ctx: &Context<'_>,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), ()> {
        let mut label = self.label.clone();
        let mut max_length = self.max_length;
        let mut parser = Args::new(args, ctx, errh);
        parser.read_p("LABEL", &mut label).read("MAXLENGTH", &mut max_length);
        parser.complete()?;
        self.label = label;
        self.max_length = max_length;
        Ok(())
    }

    fn can_live_reconfigure(&self) -> bool {
        true
    }

    fn simple_action(&mut self, p: Packet) -> Option<Packet> {
        let mut hex = String::new();
        for b in p.data().iter().take(self.max_length) {
            let _ = write!(hex, "{b:02x} ");
        }
        info!(label = self.label.as_str(), len = p.len(), "{}", hex.trim_end());
        Some(p)
    }
}
