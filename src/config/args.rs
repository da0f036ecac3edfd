//! The `Args` builder: declarative parsing of element configuration
//! strings.
//!
//! An element's configuration is a list of arguments, each either
//! positional or a `KEYWORD value` pair. The builder is used in
//! configure methods as a chain:
//!
//! ```ignore
//! let mut args = Args::new(conf, ctx, errh);
//! args.read_mp("IP", &mut self.ip)
//!     .read_opt("METRIC", &mut self.metric)
//!     .read("USE_BLACKLIST", &mut self.use_blacklist)
//!     .read("DEBUG", &mut self.debug);
//! args.complete()?;
//! ```
//!
//! `read_mp` arguments are mandatory and may be satisfied positionally or
//! by keyword; `read`/`read_opt` are optional keywords. Values are stored
//! only when their argument parses completely, so a failed configure
//! leaves the element's previous values untouched. `complete` reports
//! missing mandatory arguments and anything left unconsumed.

use crate::config::parse::{self, NumStatus};
use crate::element::{Context, ElementRef};
use crate::error::ErrorHandler;
use crate::net::EtherAddr;
use crate::timestamp::Timestamp;
use std::net::{Ipv4Addr, Ipv6Addr};

/// A type parseable from one configuration argument.
pub trait ArgParse: Sized {
    fn parse_arg(s: &str, ctx: Option<&Context<'_>>) -> Result<Self, String>;
}

fn num_err(what: &str, status: NumStatus) -> String {
    match status {
        NumStatus::Range => format!("{what} out of range"),
        _ => format!("expected {what}"),
    }
}

impl ArgParse for String {
    fn parse_arg(s: &str, _ctx: Option<&Context<'_>>) -> Result<String, String> {
        Ok(parse::unquote(s))
    }
}

impl ArgParse for bool {
    fn parse_arg(s: &str, _ctx: Option<&Context<'_>>) -> Result<bool, String> {
        parse::parse_bool(s).ok_or_else(|| "expected true or false".to_string())
    }
}

macro_rules! arg_parse_int {
    ($t:ty, $f:path, $what:expr) => {
        impl ArgParse for $t {
            fn parse_arg(s: &str, _ctx: Option<&Context<'_>>) -> Result<$t, String> {
                $f(s).map_err(|e| num_err($what, e))
            }
        }
    };
}

arg_parse_int!(u8, parse::parse_u8, "byte");
arg_parse_int!(u16, parse::parse_u16, "16-bit unsigned integer");
arg_parse_int!(u32, parse::parse_u32, "unsigned integer");
arg_parse_int!(u64, parse::parse_u64, "unsigned integer");
arg_parse_int!(i32, parse::parse_i32, "integer");
arg_parse_int!(i64, parse::parse_i64, "integer");

impl ArgParse for usize {
    fn parse_arg(s: &str, _ctx: Option<&Context<'_>>) -> Result<usize, String> {
        parse::parse_u64(s)
            .map_err(|e| num_err("unsigned integer", e))
            .and_then(|v| usize::try_from(v).map_err(|_| "unsigned integer out of range".into()))
    }
}

impl ArgParse for Ipv4Addr {
    fn parse_arg(s: &str, _ctx: Option<&Context<'_>>) -> Result<Ipv4Addr, String> {
        parse::parse_ip_address(s).ok_or_else(|| "expected IP address".to_string())
    }
}

impl ArgParse for Ipv6Addr {
    fn parse_arg(s: &str, _ctx: Option<&Context<'_>>) -> Result<Ipv6Addr, String> {
        parse::parse_ip6_address(s).ok_or_else(|| "expected IPv6 address".to_string())
    }
}

impl ArgParse for EtherAddr {
    fn parse_arg(s: &str, _ctx: Option<&Context<'_>>) -> Result<EtherAddr, String> {
        parse::parse_ethernet_address(s).ok_or_else(|| "expected Ethernet address".to_string())
    }
}

impl ArgParse for Timestamp {
    fn parse_arg(s: &str, _ctx: Option<&Context<'_>>) -> Result<Timestamp, String> {
        parse::parse_seconds(s).map_err(|e| num_err("time", e))
    }
}

impl ArgParse for ElementRef {
    fn parse_arg(s: &str, ctx: Option<&Context<'_>>) -> Result<ElementRef, String> {
        let ctx = ctx.ok_or_else(|| "element references need a router".to_string())?;
        ctx.find_element(s).ok_or_else(|| format!("no element named `{s}`"))
    }
}

#[derive(Debug)]
struct Item {
    text: String,
    consumed: bool,
}

/// The argument parser; see the module docs for the protocol.
pub struct Args<'a, 'r> {
    items: Vec<Item>,
    ctx: Option<&'a Context<'r>>,
    errh: &'a mut dyn ErrorHandler,
    failed: bool,
    ignore_rest: bool,
}

impl<'a, 'r> Args<'a, 'r> {
    pub fn new(
        conf: Vec<String>,
        ctx: &'a Context<'r>,
        errh: &'a mut dyn ErrorHandler,
    ) -> Args<'a, 'r> {
        Args {
            items: conf.into_iter().map(|text| Item { text, consumed: false }).collect(),
            ctx: Some(ctx),
            errh,
            failed: false,
            ignore_rest: false,
        }
    }

    /// A context-free parser, for tests and for values that never contain
    /// element references.
    pub fn without_context(conf: Vec<String>, errh: &'a mut dyn ErrorHandler) -> Args<'a, 'r> {
        Args {
            items: conf.into_iter().map(|text| Item { text, consumed: false }).collect(),
            ctx: None,
            errh,
            failed: false,
            ignore_rest: false,
        }
    }

    fn keyword_value(text: &str, name: &str) -> Option<String> {
        let rest = text.strip_prefix(name)?;
        let rest = rest.strip_prefix(|c: char| c.is_whitespace())?;
        Some(rest.trim_start().to_string())
    }

    /// True iff the argument looks like any `KEYWORD value` pair; such
    /// arguments never satisfy positional reads.
    fn is_keyword_form(text: &str) -> bool {
        let first = text.split_whitespace().next().unwrap_or("");
        !first.is_empty()
            && first.chars().next().is_some_and(|c| c.is_ascii_uppercase())
            && first.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            && text.len() > first.len()
    }

    fn take_keyword(&mut self, name: &str) -> Option<String> {
        for item in &mut self.items {
            if item.consumed {
                continue;
            }
            if let Some(value) = Self::keyword_value(&item.text, name) {
                item.consumed = true;
                return Some(value);
            }
        }
        None
    }

    fn take_positional(&mut self) -> Option<String> {
        for item in &mut self.items {
            if item.consumed || Self::is_keyword_form(&item.text) {
                continue;
            }
            item.consumed = true;
            return Some(item.text.clone());
        }
        None
    }

    fn store<T: ArgParse>(&mut self, name: &str, raw: &str, store: &mut T) {
        match T::parse_arg(raw, self.ctx) {
            Ok(v) => *store = v,
            Err(msg) => {
                self.failed = true;
                let _ = self.errh.error(&format!("{name}: {msg}"));
            }
        }
    }

    /// Mandatory argument, positional or `NAME value`.
    pub fn read_mp<T: ArgParse>(&mut self, name: &str, store: &mut T) -> &mut Self {
        match self.take_keyword(name).or_else(|| self.take_positional()) {
            Some(raw) => self.store(name, &raw, store),
            None => {
                self.failed = true;
                let _ = self.errh.error(&format!("missing mandatory {name} argument"));
            }
        }
        self
    }

    /// Optional keyword argument; absent keywords leave `store` alone.
    pub fn read<T: ArgParse>(&mut self, name: &str, store: &mut T) -> &mut Self {
        if let Some(raw) = self.take_keyword(name) {
            self.store(name, &raw, store);
        }
        self
    }

    /// Optional positional-or-keyword argument.
    pub fn read_p<T: ArgParse>(&mut self, name: &str, store: &mut T) -> &mut Self {
        if let Some(raw) = self.take_keyword(name).or_else(|| self.take_positional()) {
            self.store(name, &raw, store);
        }
        self
    }

    /// Optional keyword stored as `Some(value)` when present.
    pub fn read_opt<T: ArgParse>(&mut self, name: &str, store: &mut Option<T>) -> &mut Self {
        if let Some(raw) = self.take_keyword(name) {
            match T::parse_arg(&raw, self.ctx) {
                Ok(v) => *store = Some(v),
                Err(msg) => {
                    self.failed = true;
                    let _ = self.errh.error(&format!("{name}: {msg}"));
                }
            }
        }
        self
    }

    /// Optional keyword with a confirmation flag set iff it was present
    /// and parsed.
    pub fn read_confirm<T: ArgParse>(
        &mut self,
        name: &str,
        store: &mut T,
        present: &mut bool,
    ) -> &mut Self {
        *present = false;
        if let Some(raw) = self.take_keyword(name) {
            match T::parse_arg(&raw, self.ctx) {
                Ok(v) => {
                    *store = v;
                    *present = true;
                }
                Err(msg) => {
                    self.failed = true;
                    let _ = self.errh.error(&format!("{name}: {msg}"));
                }
            }
        }
        self
    }

    /// Mandatory element reference that must also answer `cast(class)`.
    pub fn read_mp_cast(&mut self, name: &str, class: &'static str, store: &mut ElementRef) -> &mut Self {
        let mut er = ElementRef(usize::MAX);
        self.read_mp(name, &mut er);
        self.check_cast(name, class, er, |er| *store = er);
        self
    }

    /// Optional element reference with a cast check.
    pub fn read_opt_cast(
        &mut self,
        name: &str,
        class: &'static str,
        store: &mut Option<ElementRef>,
    ) -> &mut Self {
        let mut er = None;
        self.read_opt(name, &mut er);
        if let Some(er) = er {
            self.check_cast(name, class, er, |er| *store = Some(er));
        }
        self
    }

    fn check_cast(
        &mut self,
        name: &str,
        class: &'static str,
        er: ElementRef,
        commit: impl FnOnce(ElementRef),
    ) {
        if er.0 == usize::MAX {
            return; // read_mp already reported
        }
        let ok = self
            .ctx
            .and_then(|ctx| ctx.with_element(er, |e| e.cast(class)))
            .unwrap_or(false);
        if ok {
            commit(er);
        } else {
            self.failed = true;
            let _ = self.errh.error(&format!("{name} element is not a {class}"));
        }
    }

    /// Accept and ignore any remaining arguments.
    pub fn ignore_rest(&mut self) -> &mut Self {
        self.ignore_rest = true;
        self
    }

    /// Finishes parsing: unconsumed arguments (unless ignored) and any
    /// earlier failure produce an error result.
    pub fn complete(&mut self) -> Result<(), ()> {
        if !self.ignore_rest {
            for item in &self.items {
                if !item.consumed {
                    self.failed = true;
                    if Self::is_keyword_form(&item.text) {
                        let kw = item.text.split_whitespace().next().unwrap_or("");
                        let _ = self.errh.error(&format!("unknown keyword `{kw}`"));
                    } else {
                        let _ = self.errh.error(&format!("too many arguments (`{}`)", item.text));
                    }
                }
            }
        }
        if self.failed { Err(()) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SilentErrorHandler;

    fn run(conf: &[&str], f: impl FnOnce(&mut Args<'_, '_>)) -> (Result<(), ()>, usize) {
        let mut errh = SilentErrorHandler::new();
        let conf: Vec<String> = conf.iter().map(|s| s.to_string()).collect();
        let mut args = Args::without_context(conf, &mut errh);
        f(&mut args);
        let r = args.complete();
        (r, errh.n_errors())
    }

    #[test]
    fn positional_and_keyword_mix() {
        let mut ip = Ipv4Addr::UNSPECIFIED;
        let mut debug = false;
        let (r, _) = run(&["10.0.0.1", "DEBUG true"], |a| {
            a.read_mp("IP", &mut ip).read("DEBUG", &mut debug);
        });
        assert!(r.is_ok());
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 1));
        assert!(debug);
    }

    #[test]
    fn keyword_satisfies_mandatory() {
        let mut ip = Ipv4Addr::UNSPECIFIED;
        let (r, _) = run(&["IP 10.0.0.2"], |a| {
            a.read_mp("IP", &mut ip);
        });
        assert!(r.is_ok());
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn missing_mandatory_is_an_error() {
        let mut ip = Ipv4Addr::UNSPECIFIED;
        let (r, n) = run(&[], |a| {
            a.read_mp("IP", &mut ip);
        });
        assert!(r.is_err());
        assert_eq!(n, 1);
    }

    #[test]
    fn unknown_keyword_rejected_unless_ignored() {
        let (r, _) = run(&["BOGUS 1"], |_| {});
        assert!(r.is_err());
        let (r, _) = run(&["BOGUS 1"], |a| {
            a.ignore_rest();
        });
        assert!(r.is_ok());
    }

    #[test]
    fn failed_parse_leaves_previous_value() {
        let mut n: u32 = 7;
        let (r, _) = run(&["COUNT soon"], |a| {
            a.read("COUNT", &mut n);
        });
        assert!(r.is_err());
        assert_eq!(n, 7);
    }

    #[test]
    fn confirm_flag_reports_presence() {
        let mut limit: u32 = 0;
        let mut have_limit = false;
        let (r, _) = run(&["LIMIT 5"], |a| {
            a.read_confirm("LIMIT", &mut limit, &mut have_limit);
        });
        assert!(r.is_ok());
        assert!(have_limit);
        assert_eq!(limit, 5);

        let mut have_limit2 = true;
        let (r, _) = run(&[], |a| {
            a.read_confirm("LIMIT", &mut limit, &mut have_limit2);
        });
        assert!(r.is_ok());
        assert!(!have_limit2);
    }

    #[test]
    fn too_many_positionals_rejected() {
        let mut s = String::new();
        let (r, _) = run(&["one", "two"], |a| {
            a.read_mp("WORD", &mut s);
        });
        assert!(r.is_err());
    }
}
