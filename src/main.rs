//! The patchbay driver: loads a router configuration, initializes it,
//! and runs the scheduler until the router stops.

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use patchbay::config::parse;
use patchbay::{BaseErrorHandler, Clock, ErrorHandler, RouterThread, Runtime};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "patchbay", version, about = "A modular packet-processing router")]
struct Cli {
    /// Router configuration file.
    file: Option<PathBuf>,

    /// Inline router configuration.
    #[arg(short = 'e', long = "expression", conflicts_with = "file")]
    expression: Option<String>,

    /// Initialize the router, then exit without running the driver.
    #[arg(short = 'q', long = "quit")]
    quit: bool,

    /// Run for at most this long (e.g. `5s`, `500ms`), then stop.
    #[arg(short = 't', long = "time")]
    time: Option<String>,

    /// Print a handler (`element.handler`) after the driver finishes.
    #[arg(long = "handler")]
    handlers: Vec<String>,

    /// List the available element classes and exit.
    #[arg(long = "list-elements")]
    list_elements: bool,

    /// Print the initialized router's shape as JSON.
    #[arg(long = "report")]
    report: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("patchbay=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let runtime = Runtime::with_default_registry();

    if cli.list_elements {
        for name in runtime.registry().names() {
            println!("{name}");
        }
        return Ok(());
    }

    let (config, landmark) = match (&cli.file, &cli.expression) {
        (Some(path), None) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            (text, path.to_string_lossy().into_owned())
        }
        (None, Some(expr)) => (expr.clone(), "<expression>".to_string()),
        _ => bail!("supply a configuration file or -e EXPRESSION"),
    };

    let time_limit = match &cli.time {
        Some(t) => match parse::parse_seconds(t) {
            Ok(t) => Some(Duration::from_millis(t.msecval().max(0) as u64)),
            Err(_) => bail!("bad time limit `{t}`"),
        },
        None => None,
    };

    let mut errh = BaseErrorHandler::new();
    let mut router = patchbay::parse_string(&config, &landmark, &runtime, Clock::system(), &mut errh)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    router.initialize(&mut errh).map_err(|e| anyhow::anyhow!("{e}"))?;
    if errh.n_warnings() > 0 {
        info!(warnings = errh.n_warnings(), "router initialized with warnings");
    } else {
        info!(elements = router.nelements(), "router initialized");
    }

    if cli.report {
        println!("{}", serde_json::to_string_pretty(&router.info())?);
    }

    if !cli.quit {
        let thread = RouterThread::new(&router);
        match time_limit {
            Some(limit) => thread.driver_for(limit),
            None => thread.driver(),
        }
        info!("driver finished");
    }

    let mut status = 0;
    for spec in &cli.handlers {
        // `element.name`, `.name` for the global set.
        let result = match spec.split_once('.') {
            Some(("", hname)) => router.global_handler_read(hname, ""),
            Some((ename, hname)) => match router.find(ename) {
                Some(eindex) => router.handler_read(eindex, hname, ""),
                None => Err(patchbay::RouterError::NoSuchElement(ename.to_string())),
            },
            None => router.global_handler_read(spec, ""),
        };
        match result {
            Ok(value) => print!("{spec}:\n{value}\n"),
            Err(e) => {
                error!(handler = spec.as_str(), "{e}");
                status = 1;
            }
        }
    }

    if status != 0 {
        bail!("handler errors");
    }
    Ok(())
}
