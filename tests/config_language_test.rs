//! Configuration-language tests: declarations, chains, explicit ports,
//! compound elements and tunnels, anonymous names, requirements, and
//! error reporting with landmarks.

use patchbay::error::CollectingErrorHandler;
use patchbay::{parse_string, BaseErrorHandler, Clock, ErrorHandler, RouterThread, Runtime};

fn load(config: &str) -> patchbay::Router {
    let runtime = Runtime::with_default_registry();
    let mut errh = BaseErrorHandler::new();
    let mut router =
        parse_string(config, "test", &runtime, Clock::system(), &mut errh).expect("parse failed");
    router.initialize(&mut errh).expect("initialize failed");
    router
}

fn count_of(router: &patchbay::Router, element: &str) -> u64 {
    let e = router.find(element).expect("element exists");
    router.handler_read(e, "count", "").expect("count handler").parse().expect("numeric")
}

#[test]
fn chains_desugar_into_pairwise_connections() {
    let router = load("a :: Counter -> b :: Counter -> c :: Counter -> Discard;");
    let conns = router.connections();
    assert_eq!(conns.len(), 3);
    let a = router.find("a").unwrap();
    let b = router.find("b").unwrap();
    assert_eq!(router.output_target(a, 0).map(|p| p.element), Some(b));
}

#[test]
fn explicit_ports_wire_where_told() {
    let router = load(
        "src :: InfiniteSource(LIMIT 4, STOP true) -> t :: Tee;
         t [0] -> c0 :: Counter -> Discard;
         t [1] -> c1 :: Counter -> Discard;",
    );
    RouterThread::new(&router).driver();
    assert_eq!(count_of(&router, "c0"), 4);
    assert_eq!(count_of(&router, "c1"), 4);
}

#[test]
fn implicit_ports_allocate_in_order() {
    // Unnumbered reuse of an element takes its next free port.
    let router = load(
        "src :: InfiniteSource(LIMIT 2, STOP true) -> t :: Tee;
         t -> c0 :: Counter -> Discard;
         t -> c1 :: Counter -> Discard;",
    );
    RouterThread::new(&router).driver();
    assert_eq!(count_of(&router, "c0"), 2);
    assert_eq!(count_of(&router, "c1"), 2);
}

#[test]
fn comments_and_strings_are_respected() {
    let router = load(
        "// a line comment
         src :: InfiniteSource(DATA \"with, comma // not a comment\", LIMIT 1, STOP true)
         /* block
            comment */ -> c :: Counter -> Discard;",
    );
    RouterThread::new(&router).driver();
    assert_eq!(count_of(&router, "c"), 1);
}

#[test]
fn anonymous_elements_get_distinct_names() {
    let router = load(
        "src :: InfiniteSource(LIMIT 1, STOP true) -> Counter -> Counter -> Discard;",
    );
    let info = router.info();
    let counters: Vec<_> = info.elements.iter().filter(|e| e.class == "Counter").collect();
    assert_eq!(counters.len(), 2);
    assert_ne!(counters[0].name, counters[1].name);
    assert!(counters[0].name.starts_with("Counter@"));
}

#[test]
fn compound_elements_inline_with_prefixed_names() {
    let router = load(
        "elementclass Meter {
             input -> c :: Counter -> output;
         }
         src :: InfiniteSource(LIMIT 5, STOP true) -> m :: Meter -> Discard;",
    );
    RouterThread::new(&router).driver();
    assert_eq!(count_of(&router, "m/c"), 5);
    // Tunnels are spliced out of the element list.
    assert!(router.info().elements.iter().all(|e| e.name != "m"));
}

#[test]
fn nested_compounds_expand_transitively() {
    let router = load(
        "elementclass Inner { input -> c :: Counter -> output; }
         elementclass Outer { input -> i :: Inner -> output; }
         src :: InfiniteSource(LIMIT 3, STOP true) -> o :: Outer -> Discard;",
    );
    RouterThread::new(&router).driver();
    assert_eq!(count_of(&router, "o/i/c"), 3);
}

#[test]
fn compound_scoping_keeps_names_local() {
    let mut errh = CollectingErrorHandler::new();
    let runtime = Runtime::with_default_registry();
    // `hidden` lives inside the compound; the outer scope cannot see it.
    let result = parse_string(
        "elementclass M { input -> hidden :: Counter -> output; }
         src :: InfiniteSource -> m :: M -> Discard;
         hidden -> Discard;",
        "test",
        &runtime,
        Clock::system(),
        &mut errh,
    );
    assert!(result.is_err());
    assert!(errh.messages().iter().any(|m| m.contains("undeclared element `hidden`")), "{:?}", errh.messages());
}

#[test]
fn cycles_are_legal_topology() {
    let runtime = Runtime::with_default_registry();
    let mut errh = BaseErrorHandler::new();
    let mut router = parse_string(
        "a :: Counter -> b :: Counter -> a;",
        "test",
        &runtime,
        Clock::system(),
        &mut errh,
    )
    .unwrap();
    router.initialize(&mut errh).expect("cycles must validate");
}

#[test]
fn unknown_class_is_reported_with_landmark() {
    let runtime = Runtime::with_default_registry();
    let mut errh = CollectingErrorHandler::new();
    let result = parse_string("x :: NoSuchThing;", "conf.pb", &runtime, Clock::system(), &mut errh);
    assert!(result.is_err());
    assert!(
        errh.messages().iter().any(|m| m.contains("conf.pb:1") && m.contains("NoSuchThing")),
        "{:?}",
        errh.messages()
    );
}

#[test]
fn syntax_errors_recover_at_semicolons() {
    let runtime = Runtime::with_default_registry();
    let mut errh = CollectingErrorHandler::new();
    let result = parse_string(
        "%%% garbage;
         c :: Counter -> Discard;",
        "test",
        &runtime,
        Clock::system(),
        &mut errh,
    );
    // The bad statement is reported; the good one still parses.
    assert!(result.is_err());
    assert!(errh.n_errors() >= 1);
}

#[test]
fn requirements_must_be_provided() {
    let runtime = Runtime::with_default_registry();
    let mut errh = CollectingErrorHandler::new();
    let mut router = parse_string(
        "require(grid); c :: Counter -> Discard;",
        "test",
        &runtime,
        Clock::system(),
        &mut errh,
    )
    .unwrap();
    assert!(router.initialize(&mut errh).is_err());

    runtime.provide("grid");
    let mut errh2 = BaseErrorHandler::new();
    let mut router2 = parse_string(
        "require(grid); c :: Counter -> Discard;",
        "test",
        &runtime,
        Clock::system(),
        &mut errh2,
    )
    .unwrap();
    router2.initialize(&mut errh2).expect("provided requirement satisfies");
}

#[test]
fn compact_config_drops_the_stored_text() {
    let router = load("require(compact_config); c :: Counter -> Discard;");
    assert_eq!(router.flat_configuration_string(), "");

    let router2 = load("c :: Counter -> Discard;");
    assert!(router2.flat_configuration_string().contains("Counter"));
}

#[test]
fn configure_errors_accumulate_across_elements() {
    // Both bad configurations are reported in one pass.
    let runtime = Runtime::with_default_registry();
    let mut errh = CollectingErrorHandler::new();
    let mut router = parse_string(
        "a :: Queue(CAPACITY soon) -> Unqueue -> Discard;
         b :: Queue(CAPACITY later) -> Unqueue -> Discard;",
        "test",
        &runtime,
        Clock::system(),
        &mut errh,
    )
    .unwrap();
    assert!(router.initialize(&mut errh).is_err());
    let all = errh.messages().join("\n");
    assert!(all.contains("While configuring a") && all.contains("While configuring b"), "{all}");
}

#[test]
fn configurations_load_from_files() {
    use std::io::Write as _;
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "src :: InfiniteSource(LIMIT 2, STOP true) -> c :: Counter -> Discard;")
        .expect("write config");
    let runtime = Runtime::with_default_registry();
    let mut errh = BaseErrorHandler::new();
    let mut router =
        patchbay::parse_file(file.path(), &runtime, Clock::system(), &mut errh).expect("parses");
    router.initialize(&mut errh).expect("initializes");
    RouterThread::new(&router).driver();
    assert_eq!(count_of(&router, "c"), 2);
}

#[test]
fn port_out_of_range_is_a_topology_error() {
    let runtime = Runtime::with_default_registry();
    let mut errh = CollectingErrorHandler::new();
    let mut router = parse_string(
        "c :: Counter; src :: InfiniteSource -> [3] c; c -> Discard;",
        "test",
        &runtime,
        Clock::system(),
        &mut errh,
    )
    .unwrap();
    assert!(router.initialize(&mut errh).is_err());
    assert!(errh.messages().iter().any(|m| m.contains("has no input 3")), "{:?}", errh.messages());
}
