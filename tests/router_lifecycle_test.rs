//! Router lifecycle scenarios: packet flow end to end, push/pull
//! validation, runcount stops, hot-swap state transfer, and handler
//! dispatch.

use patchbay::element::{Context, Element};
use patchbay::error::CollectingErrorHandler;
use patchbay::handler::HandlerInfo;
use patchbay::{
    parse_string, BaseErrorHandler, Clock, ErrorHandler, Packet, RouterThread, Runtime,
    SilentErrorHandler,
};

fn load(config: &str) -> patchbay::Router {
    let runtime = Runtime::with_default_registry();
    let mut errh = BaseErrorHandler::new();
    let mut router = parse_string(config, "test", &runtime, Clock::system(), &mut errh)
        .expect("parse failed");
    router.initialize(&mut errh).expect("initialize failed");
    router
}

fn read(router: &patchbay::Router, element: &str, handler: &str) -> String {
    let e = router.find(element).expect("element exists");
    router.handler_read(e, handler, "").expect("handler read")
}

#[test]
fn packets_flow_from_source_to_sink() {
    let router = load(
        "src :: InfiniteSource(DATA \"abc\", LIMIT 7, STOP true)
            -> c :: Counter
            -> sink :: Discard;",
    );
    RouterThread::new(&router).driver();
    assert_eq!(read(&router, "c", "count"), "7");
    assert_eq!(read(&router, "sink", "count"), "7");
    assert_eq!(read(&router, "c", "byte_count"), "21");
}

#[test]
fn single_packet_drop_counts_once() {
    let router = load("c :: Counter -> sink :: Discard;");
    let c = router.find("c").unwrap();
    router.push_into(c, 0, Packet::make_from(&[0x01, 0x02, 0x03]));
    assert_eq!(read(&router, "c", "count"), "1");
    assert_eq!(read(&router, "sink", "count"), "1");
}

#[test]
fn agnostic_ports_resolve_across_a_queue() {
    let router = load(
        "src :: InfiniteSource(LIMIT 3, STOP true)
            -> agn :: Counter
            -> q :: Queue(8)
            -> pull_side :: Counter
            -> sink :: Discard;",
    );
    let agn = router.find("agn").unwrap();
    let pull_side = router.find("pull_side").unwrap();
    // Push propagates into the agnostic element before the queue...
    assert!(router.output_is_push(agn, 0));
    assert!(!router.input_is_pull(agn, 0));
    // ...and pull propagates into the one after it.
    assert!(router.input_is_pull(pull_side, 0));
    assert!(!router.output_is_push(pull_side, 0));
    RouterThread::new(&router).driver();
    assert_eq!(read(&router, "pull_side", "count"), "3");
}

#[test]
fn push_pull_conflict_is_a_topology_error() {
    // An agnostic element squeezed between a push output and a pull
    // input cannot be both; validation must name it.
    let runtime = Runtime::with_default_registry();
    let mut errh = CollectingErrorHandler::new();
    let mut router = parse_string(
        "src :: InfiniteSource -> agn :: Counter -> uq :: Unqueue -> Discard;",
        "test",
        &runtime,
        Clock::system(),
        &mut errh,
    )
    .expect("parse is fine; validation fails later");
    assert!(router.initialize(&mut errh).is_err());
    let all = errh.messages().join("\n");
    assert!(all.contains("agn"), "conflict must name the element: {all}");
    assert!(all.contains("push") && all.contains("pull"), "{all}");
}

#[test]
fn runcount_stop_quiesces_the_driver() {
    let router = load("src :: InfiniteSource -> c :: Counter -> Discard;");
    router.set_runcount(-1);
    // Driver must notice the stop within bounded work and return.
    RouterThread::new(&router).driver();
    assert!(router.stop_requested());
}

#[test]
fn adjust_runcount_saturates() {
    let router = load("Idle :: Counter -> Discard; src :: InfiniteSource(LIMIT 0) -> Idle;");
    router.set_runcount(i32::MAX);
    router.adjust_runcount(5);
    assert_eq!(router.runcount(), i32::MAX);
    router.adjust_runcount(i32::MIN);
    router.adjust_runcount(i32::MIN);
    // Saturation holds a floor; another positive adjustment recovers.
    router.adjust_runcount(1);
    assert!(router.runcount() > i32::MIN + 1000);
}

#[test]
fn driver_manager_resumes_a_stopping_router() {
    let router = load(
        "DriverManager(ITERATIONS 1);
         src :: InfiniteSource(LIMIT 3, STOP true) -> c :: Counter -> Discard;",
    );
    RouterThread::new(&router).driver();
    assert_eq!(read(&router, "c", "count"), "3");
}

#[test]
fn hot_swap_transfers_counter_state() {
    let old = load("src :: InfiniteSource(LIMIT 42, STOP true) -> c :: Counter -> Discard;");
    RouterThread::new(&old).driver();
    assert_eq!(read(&old, "c", "count"), "42");

    let runtime = Runtime::with_default_registry();
    let mut errh = BaseErrorHandler::new();
    let mut new = parse_string(
        "src :: InfiniteSource(LIMIT 0) -> c :: Counter -> Discard;",
        "test",
        &runtime,
        Clock::system(),
        &mut errh,
    )
    .unwrap();
    new.set_hotswap_router(old);
    new.initialize(&mut errh).unwrap();
    assert_eq!(read(&new, "c", "count"), "42");
}

#[test]
fn hot_swap_transfers_queued_packets() {
    let old = load("c :: Counter -> q :: Queue(16);");
    let c = old.find("c").unwrap();
    for _ in 0..5 {
        old.push_into(c, 0, Packet::make_from(b"queued"));
    }
    assert_eq!(read(&old, "q", "length"), "5");

    let runtime = Runtime::with_default_registry();
    let mut errh = BaseErrorHandler::new();
    let mut new = parse_string("c :: Counter -> q :: Queue(16);", "test", &runtime, Clock::system(), &mut errh)
        .unwrap();
    new.set_hotswap_router(old);
    new.initialize(&mut errh).unwrap();
    assert_eq!(read(&new, "q", "length"), "5");
}

#[test]
fn reentrant_cycle_becomes_a_local_drop() {
    // A direct self-loop is legal topology; a packet that comes straight
    // back is dropped instead of recursing.
    let router = load("c :: Counter -> c;");
    let c = router.find("c").unwrap();
    router.push_into(c, 0, Packet::make_from(b"x"));
    assert_eq!(read(&router, "c", "count"), "1");
}

#[test]
fn standard_handlers_answer() {
    let router = load("q :: Queue(17) -> Unqueue -> Discard;");
    assert_eq!(read(&router, "q", "name"), "q");
    assert_eq!(read(&router, "q", "class"), "Queue");
    assert_eq!(read(&router, "q", "config"), "17");
    assert!(read(&router, "q", "ports").contains("output 0: pull"));
    let handlers = read(&router, "q", "handlers");
    assert!(handlers.contains("length") && handlers.contains("config"));
}

#[test]
fn handler_references_resolve_in_all_three_forms() {
    let router = load("q :: Queue(8) -> u :: Unqueue -> Discard;");
    let q = router.find("q").unwrap();
    // elem.hname
    assert!(router.resolve_handler_name(None, "q.length").is_some());
    // bare hname against a context element
    assert!(router.resolve_handler_name(Some(q), "length").is_some());
    // a bare name with no element match falls through to the global set
    assert!(router.resolve_handler_name(Some(q), "no_such_handler").is_none());
    // .hname addresses the global set, which is empty here
    assert!(router.resolve_handler_name(None, ".version").is_none());
}

#[test]
fn live_reconfigure_is_transactional() {
    let router = load("q :: Queue(4) -> Unqueue -> Discard;");
    let q = router.find("q").unwrap();
    let mut errh = SilentErrorHandler::new();
    router.handler_write(q, "config", "9", &mut errh).unwrap();
    assert_eq!(read(&router, "q", "capacity"), "9");
    assert_eq!(read(&router, "q", "config"), "9");
    // A bad value leaves the old configuration in place.
    assert!(router.handler_write(q, "config", "CAPACITY soon", &mut errh).is_err());
    assert_eq!(read(&router, "q", "capacity"), "9");
}

#[test]
fn queue_counts_drops_when_full() {
    let router = load("c :: Counter -> q :: Queue(2);");
    let c = router.find("c").unwrap();
    for _ in 0..5 {
        router.push_into(c, 0, Packet::make_from(b"p"));
    }
    assert_eq!(read(&router, "q", "length"), "2");
    assert_eq!(read(&router, "q", "drops"), "3");
}

#[test]
fn downstream_traversal_reaches_the_sink() {
    let router = load("src :: InfiniteSource(LIMIT 0) -> c :: Counter -> q :: Queue -> Unqueue -> d :: Discard;");
    let src = router.find("src").unwrap();
    let d = router.find("d").unwrap();
    let downstream = router.downstream_elements(src, None);
    assert!(downstream.contains(&d));
    let upstream = router.upstream_elements(d, None);
    assert!(upstream.contains(&src));
}

// --- a test element exercising the star-handler protocol ------------------

#[derive(Default)]
struct Starry;

fn star_read(_e: &dyn Element, info: &HandlerInfo<'_>, _ctx: &Context<'_>) -> String {
    format!("materialized {}", info.name)
}

fn star_write(
    value: &str,
    _e: &mut dyn Element,
    _info: &HandlerInfo<'_>,
    ctx: &Context<'_>,
    _errh: &mut dyn ErrorHandler,
) -> Result<(), ()> {
    // The value is the name that failed to resolve; materialize it.
    ctx.router().add_read_handler(ctx.element_index(), value, star_read, 0);
    Ok(())
}

impl Element for Starry {
    fn class_name(&self) -> &'static str {
        "Starry"
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "0/0"
    }

    fn add_handlers(&self, reg: &mut patchbay::handler::HandlerRegistry<'_>) {
        reg.add_write("*", star_write, 0);
    }
}

#[test]
fn star_handler_materializes_names_on_demand() {
    let mut registry = patchbay::registry::default_registry();
    registry.register("Starry", || Box::new(Starry));
    let runtime = Runtime::new(registry);
    let mut errh = BaseErrorHandler::new();
    let mut router = parse_string("s :: Starry;", "test", &runtime, Clock::system(), &mut errh).unwrap();
    router.initialize(&mut errh).unwrap();
    let s = router.find("s").unwrap();
    assert_eq!(router.handler_read(s, "anything", "").unwrap(), "materialized anything");
    assert!(router.handler_read(s, "name", "").unwrap() == "s");
}
