//! The standard element library: sources, sinks, queues, and small
//! pass-through utilities that most configurations are built from.

mod counter;
mod discard;
mod driver_manager;
mod print;
mod queue;
mod source;
mod tee;
pub(crate) mod unqueue;

pub use counter::Counter;
pub use discard::Discard;
pub use driver_manager::DriverManager;
pub use print::Print;
pub use queue::Queue;
pub use source::{InfiniteSource, TimedSource};
pub use tee::Tee;
pub use unqueue::Unqueue;

use crate::registry::ElementRegistry;

pub fn register_all(reg: &mut ElementRegistry) {
    reg.register("Counter", || Box::new(Counter::default()));
    reg.register("Discard", || Box::new(Discard::default()));
    reg.register("DriverManager", || Box::new(DriverManager::default()));
    reg.register("InfiniteSource", || Box::new(InfiniteSource::default()));
    reg.register("Print", || Box::new(Print::default()));
    reg.register("Queue", || Box::new(Queue::default()));
    reg.register("Tee", || Box::new(Tee::default()));
    reg.register("TimedSource", || Box::new(TimedSource::default()));
    reg.register("Unqueue", || Box::new(Unqueue::default()));
}
