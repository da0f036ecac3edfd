//! # Patchbay — a modular packet-processing router framework
//!
//! Patchbay wires small, composable processing units — **elements** —
//! into directed graphs that form complete packet-handling pipelines.
//! A textual configuration declares elements and connections:
//!
//! ```text
//! src :: InfiniteSource(LIMIT 100) -> q :: Queue(64)
//!     -> Unqueue -> Counter -> Discard;
//! ```
//!
//! The router validates the graph (port counts, push/pull consistency,
//! flow reachability), configures and initializes every element in
//! configure-phase order, and then a cooperative scheduler drives packet
//! flow: push chains run downstream, pull chains upstream, stride-
//! scheduled tasks and one-shot timers supply the impetus. Named
//! handlers expose observation and control endpoints on every element,
//! and a live router can be hot-swapped for a freshly built one with
//! per-element state transfer.
//!
//! ## Crate layout
//!
//! - [`packet`]: copy-on-write packet buffers with headroom, tailroom,
//!   and the fixed annotation area.
//! - [`element`]: the `Element` trait, port specifications, and the
//!   per-callback [`element::Context`].
//! - [`router`]: the element arena, graph validation, lifecycle, and
//!   handler dispatch.
//! - [`scheduler`], [`task`], [`timer`]: the cooperative driver loop,
//!   stride scheduling, and timers.
//! - [`handler`]: the deduplicated handler table.
//! - [`config`]: typed value parsers, the `Args` builder, and the
//!   configuration-language lexer.
//! - [`elements`]: the standard element library.
//! - [`srp`]: a source-routed ad-hoc routing subsystem built on the
//!   runtime — request flooding, reply routing, error propagation, a
//!   link cache, send buffering, and a unidirectional-link blacklist.

pub mod config;
pub mod element;
pub mod elements;
pub mod error;
pub mod flow;
pub mod handler;
pub mod net;
pub mod packet;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod scheduler;
pub mod srp;
pub mod task;
pub mod timer;
pub mod timestamp;

pub use crate::config::lexer::{parse_file, parse_string};
pub use crate::element::{CleanupStage, Context, Element, ElementRef};
pub use crate::error::{BaseErrorHandler, ErrorHandler, RouterError, SilentErrorHandler};
pub use crate::packet::Packet;
pub use crate::registry::ElementRegistry;
pub use crate::router::{Router, RouterState};
pub use crate::runtime::Runtime;
pub use crate::scheduler::RouterThread;
pub use crate::timestamp::{Clock, Timestamp};
