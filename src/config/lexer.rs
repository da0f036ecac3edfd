//! The configuration lexer: turns textual router descriptions into a
//! configured (but uninitialized) [`Router`].
//!
//! The language has four statement kinds — element declarations,
//! connections, `elementclass` definitions, and `require()` — separated
//! by semicolons. Compound element classes define subgraphs whose
//! `input`/`output` tunnels stand in for the compound's external ports;
//! instantiation inlines the body under a `name/` prefix and the tunnels
//! are spliced out of the final connection list. Anonymous declarations
//! get synthesized `Class@N` names. Diagnostics carry `file:line`
//! landmarks.

use crate::config::parse;
use crate::error::{ErrorHandler, RouterError};
use crate::registry::ElementRegistry;
use crate::router::Router;
use crate::runtime::Runtime;
use crate::timestamp::Clock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lexeme {
    Eof,
    Ident(String),
    Arrow,
    ColonColon,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    Comma,
    Semicolon,
    Elementclass,
    Require,
    Garbage(char),
}

impl Lexeme {
    fn describe(&self) -> String {
        match self {
            Lexeme::Eof => "end of configuration".into(),
            Lexeme::Ident(s) => format!("`{s}`"),
            Lexeme::Arrow => "`->`".into(),
            Lexeme::ColonColon => "`::`".into(),
            Lexeme::LBrace => "`{`".into(),
            Lexeme::RBrace => "`}`".into(),
            Lexeme::LBracket => "`[`".into(),
            Lexeme::RBracket => "`]`".into(),
            Lexeme::LParen => "`(`".into(),
            Lexeme::Comma => "`,`".into(),
            Lexeme::Semicolon => "`;`".into(),
            Lexeme::Elementclass => "`elementclass`".into(),
            Lexeme::Require => "`require`".into(),
            Lexeme::Garbage(c) => format!("`{c}`"),
        }
    }
}

#[derive(Debug, Clone)]
enum ElemKind {
    Class(String),
    Tunnel,
}

#[derive(Debug, Clone)]
struct ElemDecl {
    name: String,
    kind: ElemKind,
    config: String,
    landmark: String,
}

#[derive(Debug, Clone)]
struct CompoundDef {
    name: String,
    body: String,
    body_line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Endpoint {
    element: usize,
    port: usize,
}

/// One parsing position, saved and restored around compound bodies.
struct Source {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

/// The lexer-parser; one instance builds one router.
pub struct Lexer<'a> {
    registry: &'a ElementRegistry,
    filename: String,
    source: Source,
    pushback: Option<Lexeme>,

    elements: Vec<ElemDecl>,
    element_map: HashMap<String, usize>,
    connections: Vec<(Endpoint, Endpoint)>,
    /// Tunnel pairs `(enter, exit)`: a packet sent into `enter` emerges
    /// from `exit`'s outgoing connections.
    tunnel_pairs: Vec<(usize, usize)>,
    requirements: Vec<String>,
    compounds: Vec<CompoundDef>,
    prefix: String,
    anon_counter: usize,
    next_implicit_out: Vec<usize>,
    next_implicit_in: Vec<usize>,
    original_text: String,
}

impl<'a> Lexer<'a> {
    pub fn new(config: &str, filename: &str, registry: &'a ElementRegistry) -> Lexer<'a> {
        Lexer {
            registry,
            filename: filename.to_string(),
            source: Source { chars: config.chars().collect(), pos: 0, line: 1 },
            pushback: None,
            elements: Vec::new(),
            element_map: HashMap::new(),
            connections: Vec::new(),
            tunnel_pairs: Vec::new(),
            requirements: Vec::new(),
            compounds: Vec::new(),
            prefix: String::new(),
            anon_counter: 0,
            next_implicit_out: Vec::new(),
            next_implicit_in: Vec::new(),
            original_text: config.to_string(),
        }
    }

    fn landmark(&self) -> String {
        format!("{}:{}", self.filename, self.source.line)
    }

    // --- tokenization ----------------------------------------------------

    fn peek_char(&self) -> Option<char> {
        self.source.chars.get(self.source.pos).copied()
    }

    fn peek_char_at(&self, ahead: usize) -> Option<char> {
        self.source.chars.get(self.source.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.source.pos += 1;
        if c == '\n' {
            self.source.line += 1;
        }
        Some(c)
    }

    fn skip_space_and_comments(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_char_at(1) == Some('/') => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek_char_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    let mut prev = ' ';
                    while let Some(c) = self.bump() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        prev = c;
                    }
                }
                _ => return,
            }
        }
    }

    fn is_ident_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || c == '@'
    }

    fn next_lexeme(&mut self) -> Lexeme {
        self.skip_space_and_comments();
        let Some(c) = self.peek_char() else { return Lexeme::Eof };
        if Self::is_ident_char(c) {
            let mut word = String::new();
            while let Some(c) = self.peek_char() {
                if Self::is_ident_char(c) {
                    word.push(c);
                    self.bump();
                } else if c == '/'
                    && self.peek_char_at(1).is_some_and(Self::is_ident_char)
                    && !word.is_empty()
                {
                    // `/` joins components of a compound path.
                    word.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            return match word.as_str() {
                "elementclass" => Lexeme::Elementclass,
                "require" => Lexeme::Require,
                _ => Lexeme::Ident(word),
            };
        }
        self.bump();
        match c {
            '-' if self.peek_char() == Some('>') => {
                self.bump();
                Lexeme::Arrow
            }
            ':' if self.peek_char() == Some(':') => {
                self.bump();
                Lexeme::ColonColon
            }
            '{' => Lexeme::LBrace,
            '}' => Lexeme::RBrace,
            '[' => Lexeme::LBracket,
            ']' => Lexeme::RBracket,
            '(' => Lexeme::LParen,
            ',' => Lexeme::Comma,
            ';' => Lexeme::Semicolon,
            other => Lexeme::Garbage(other),
        }
    }

    fn lex(&mut self) -> Lexeme {
        match self.pushback.take() {
            Some(t) => t,
            None => self.next_lexeme(),
        }
    }

    fn unlex(&mut self, t: Lexeme) {
        debug_assert!(self.pushback.is_none());
        self.pushback = Some(t);
    }

    /// Reads a raw configuration span: everything up to the parenthesis
    /// matching an already-consumed `(`, strings respected, comments
    /// replaced by a space.
    fn lex_config(&mut self) -> String {
        let mut out = String::new();
        let mut depth = 1usize;
        while let Some(c) = self.peek_char() {
            match c {
                '(' => {
                    depth += 1;
                    out.push(c);
                    self.bump();
                }
                ')' => {
                    depth -= 1;
                    self.bump();
                    if depth == 0 {
                        return out;
                    }
                    out.push(c);
                }
                '"' | '\'' => {
                    out.push(c);
                    self.bump();
                    self.copy_string_tail(c, &mut out);
                }
                '/' if self.peek_char_at(1) == Some('/') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                    out.push(' ');
                }
                '/' if self.peek_char_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    let mut prev = ' ';
                    while let Some(c) = self.bump() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        prev = c;
                    }
                    out.push(' ');
                }
                _ => {
                    out.push(c);
                    self.bump();
                }
            }
        }
        out
    }

    fn copy_string_tail(&mut self, quote: char, out: &mut String) {
        while let Some(c) = self.bump() {
            out.push(c);
            if c == '\\' && quote == '"' {
                if let Some(next) = self.bump() {
                    out.push(next);
                }
            } else if c == quote {
                return;
            }
        }
    }

    /// Reads a compound body: text up to the brace matching an
    /// already-consumed `{`.
    fn lex_compound_body(&mut self) -> (String, usize) {
        let start_line = self.source.line;
        let mut out = String::new();
        let mut depth = 1usize;
        while let Some(c) = self.peek_char() {
            match c {
                '{' => {
                    depth += 1;
                    out.push(c);
                    self.bump();
                }
                '}' => {
                    depth -= 1;
                    self.bump();
                    if depth == 0 {
                        return (out, start_line);
                    }
                    out.push(c);
                }
                '"' | '\'' => {
                    out.push(c);
                    self.bump();
                    self.copy_string_tail(c, &mut out);
                }
                _ => {
                    out.push(c);
                    self.bump();
                }
            }
        }
        (out, start_line)
    }

    // --- element bookkeeping ---------------------------------------------

    fn add_decl(&mut self, name: String, kind: ElemKind, config: String, landmark: String) -> usize {
        let index = self.elements.len();
        self.element_map.insert(name.clone(), index);
        self.elements.push(ElemDecl { name, kind, config, landmark });
        self.next_implicit_out.push(0);
        self.next_implicit_in.push(0);
        index
    }

    fn lookup_compound(&self, name: &str) -> Option<CompoundDef> {
        // Later definitions shadow earlier ones.
        self.compounds.iter().rev().find(|c| c.name == name).cloned()
    }

    fn anon_name(&mut self, class: &str) -> String {
        self.anon_counter += 1;
        format!("{}{}@{}", self.prefix, class, self.anon_counter)
    }

    /// Declares an element (or compound instance) and returns its index.
    fn declare(
        &mut self,
        name: String,
        class: &str,
        config: String,
        errh: &mut dyn ErrorHandler,
    ) -> Option<usize> {
        if let Some(def) = self.lookup_compound(class) {
            if !config.trim().is_empty() {
                errh.lwarning(
                    &self.landmark(),
                    &format!("configuration of compound `{name}` ignored"),
                );
            }
            return self.instantiate_compound(&name, &def, errh);
        }
        if self.registry.contains(class) {
            let landmark = self.landmark();
            return Some(self.add_decl(name, ElemKind::Class(class.to_string()), config, landmark));
        }
        let _ = errh.lerror(&self.landmark(), &format!("unknown element class `{class}`"));
        None
    }

    /// Inlines a compound body under `name/`, creating the tunnel trio
    /// (`name`, `name/input`, `name/output`) and their pairs.
    fn instantiate_compound(
        &mut self,
        name: &str,
        def: &CompoundDef,
        errh: &mut dyn ErrorHandler,
    ) -> Option<usize> {
        let landmark = self.landmark();
        let main = self.add_decl(name.to_string(), ElemKind::Tunnel, String::new(), landmark.clone());
        let input = self.add_decl(format!("{name}/input"), ElemKind::Tunnel, String::new(), landmark.clone());
        let output = self.add_decl(format!("{name}/output"), ElemKind::Tunnel, String::new(), landmark);
        self.tunnel_pairs.push((main, input));
        self.tunnel_pairs.push((output, main));

        // Parse the body in place, under the instance prefix, with the
        // compound-definition scope still visible.
        let saved_source = std::mem::replace(
            &mut self.source,
            Source { chars: def.body.chars().collect(), pos: 0, line: def.body_line },
        );
        let saved_prefix = std::mem::replace(&mut self.prefix, format!("{name}/"));
        let saved_pushback = self.pushback.take();
        let scope_depth = self.compounds.len();

        while self.parse_statement(errh) {}

        self.compounds.truncate(scope_depth);
        self.pushback = saved_pushback;
        self.prefix = saved_prefix;
        self.source = saved_source;
        Some(main)
    }

    // --- statements ------------------------------------------------------

    /// Parses one statement; false at end of input.
    fn parse_statement(&mut self, errh: &mut dyn ErrorHandler) -> bool {
        match self.lex() {
            Lexeme::Eof => false,
            Lexeme::Semicolon => true,
            Lexeme::Elementclass => {
                self.parse_elementclass(errh);
                true
            }
            Lexeme::Require => {
                self.parse_require(errh);
                true
            }
            t @ (Lexeme::Ident(_) | Lexeme::LBracket) => {
                self.unlex(t);
                self.parse_connection(errh);
                true
            }
            other => {
                let _ = errh.lerror(
                    &self.landmark(),
                    &format!("expected a statement, found {}", other.describe()),
                );
                self.skip_to_semicolon();
                true
            }
        }
    }

    fn skip_to_semicolon(&mut self) {
        loop {
            match self.lex() {
                Lexeme::Eof | Lexeme::Semicolon => return,
                _ => {}
            }
        }
    }

    fn parse_elementclass(&mut self, errh: &mut dyn ErrorHandler) {
        let name = match self.lex() {
            Lexeme::Ident(n) => n,
            other => {
                let _ = errh.lerror(
                    &self.landmark(),
                    &format!("expected element class name, found {}", other.describe()),
                );
                self.skip_to_semicolon();
                return;
            }
        };
        match self.lex() {
            Lexeme::LBrace => {}
            other => {
                let _ = errh.lerror(
                    &self.landmark(),
                    &format!("expected `{{` after elementclass, found {}", other.describe()),
                );
                self.skip_to_semicolon();
                return;
            }
        }
        let (body, body_line) = self.lex_compound_body();
        self.compounds.push(CompoundDef { name, body, body_line });
    }

    fn parse_require(&mut self, errh: &mut dyn ErrorHandler) {
        match self.lex() {
            Lexeme::LParen => {}
            other => {
                let _ = errh.lerror(
                    &self.landmark(),
                    &format!("expected `(` after require, found {}", other.describe()),
                );
                self.skip_to_semicolon();
                return;
            }
        }
        let config = self.lex_config();
        for req in parse::split_args(&config) {
            let req = parse::unquote(&req);
            if !req.is_empty() {
                self.requirements.push(req);
            }
        }
    }

    /// Parses `[p]? element [p]? (-> [p]? element [p]?)* ;` — a bare
    /// element reference or declaration, or a connection chain.
    fn parse_connection(&mut self, errh: &mut dyn ErrorHandler) {
        let Some((mut prev, _, mut prev_out)) = self.parse_endpoint(errh) else {
            self.skip_to_semicolon();
            return;
        };
        loop {
            match self.lex() {
                Lexeme::Arrow => {}
                Lexeme::Semicolon | Lexeme::Eof => return,
                other => {
                    let _ = errh.lerror(
                        &self.landmark(),
                        &format!("expected `->` or `;`, found {}", other.describe()),
                    );
                    self.skip_to_semicolon();
                    return;
                }
            }
            let Some((next, next_in, next_out)) = self.parse_endpoint(errh) else {
                self.skip_to_semicolon();
                return;
            };
            let from_port = match prev_out {
                Some(p) => p,
                None => {
                    let p = self.next_implicit_out[prev];
                    self.next_implicit_out[prev] = p + 1;
                    p
                }
            };
            let to_port = match next_in {
                Some(p) => p,
                None => {
                    let p = self.next_implicit_in[next];
                    self.next_implicit_in[next] = p + 1;
                    p
                }
            };
            self.connections.push((
                Endpoint { element: prev, port: from_port },
                Endpoint { element: next, port: to_port },
            ));
            prev = next;
            prev_out = next_out;
        }
    }

    /// Parses one endpoint: `(element, input_port, output_port)`. The
    /// input port applies when the endpoint is a connection target, the
    /// output port when it is a source.
    fn parse_endpoint(
        &mut self,
        errh: &mut dyn ErrorHandler,
    ) -> Option<(usize, Option<usize>, Option<usize>)> {
        let in_port = self.parse_port(errh);
        let element = self.parse_element_ref(errh)?;
        let out_port = self.parse_port(errh);
        Some((element, in_port, out_port))
    }

    fn parse_port(&mut self, errh: &mut dyn ErrorHandler) -> Option<usize> {
        match self.lex() {
            Lexeme::LBracket => {}
            other => {
                self.unlex(other);
                return None;
            }
        }
        let port = match self.lex() {
            Lexeme::Ident(word) => match parse::parse_u32(&word) {
                Ok(p) => Some(p as usize),
                Err(_) => {
                    let _ = errh.lerror(&self.landmark(), &format!("bad port number `{word}`"));
                    None
                }
            },
            other => {
                let _ = errh.lerror(
                    &self.landmark(),
                    &format!("expected port number, found {}", other.describe()),
                );
                self.unlex(other);
                None
            }
        };
        match self.lex() {
            Lexeme::RBracket => {}
            other => {
                let _ = errh.lerror(
                    &self.landmark(),
                    &format!("expected `]`, found {}", other.describe()),
                );
                self.unlex(other);
            }
        }
        port
    }

    /// Parses an element reference, declaring it if the statement is a
    /// declaration (`name :: Class(...)`) or an anonymous use
    /// (`Class(...)`).
    fn parse_element_ref(&mut self, errh: &mut dyn ErrorHandler) -> Option<usize> {
        let name = match self.lex() {
            Lexeme::Ident(n) => n,
            other => {
                let _ = errh.lerror(
                    &self.landmark(),
                    &format!("expected element name, found {}", other.describe()),
                );
                self.unlex(other);
                return None;
            }
        };

        // `name :: Class(config)` — an explicit declaration.
        match self.lex() {
            Lexeme::ColonColon => {
                let class = match self.lex() {
                    Lexeme::Ident(c) => c,
                    other => {
                        let _ = errh.lerror(
                            &self.landmark(),
                            &format!("expected element class, found {}", other.describe()),
                        );
                        self.unlex(other);
                        return None;
                    }
                };
                let config = match self.lex() {
                    Lexeme::LParen => self.lex_config(),
                    other => {
                        self.unlex(other);
                        String::new()
                    }
                };
                let qualified = format!("{}{}", self.prefix, name);
                if self.element_map.contains_key(&qualified) {
                    let _ = errh.lerror(
                        &self.landmark(),
                        &format!("redeclaration of element `{name}`"),
                    );
                    return self.element_map.get(&qualified).copied();
                }
                return self.declare(qualified, &class, config, errh);
            }
            other => self.unlex(other),
        }

        // Tunnels: `input` / `output` resolve inside a compound body.
        if name == "input" || name == "output" {
            let qualified = format!("{}{}", self.prefix, name);
            if let Some(&i) = self.element_map.get(&qualified) {
                return Some(i);
            }
            let _ = errh.lerror(
                &self.landmark(),
                &format!("`{name}` used outside a compound element"),
            );
            return None;
        }

        // An existing element in the current scope.
        let qualified = format!("{}{}", self.prefix, name);
        if let Some(&i) = self.element_map.get(&qualified) {
            return Some(i);
        }

        // A class name used anonymously: `Class` or `Class(config)`.
        if self.lookup_compound(&name).is_some() || self.registry.contains(&name) {
            let config = match self.lex() {
                Lexeme::LParen => self.lex_config(),
                other => {
                    self.unlex(other);
                    String::new()
                }
            };
            let anon = self.anon_name(&name);
            return self.declare(anon, &name, config, errh);
        }

        let _ = errh.lerror(&self.landmark(), &format!("undeclared element `{name}`"));
        None
    }

    // --- tunnel expansion and router creation ----------------------------

    fn is_tunnel(&self, element: usize) -> bool {
        matches!(self.elements[element].kind, ElemKind::Tunnel)
    }

    /// Real input endpoints reached by sending into `to` (splicing
    /// through tunnel enter-ends).
    fn expand_to(&self, to: Endpoint, depth: usize, errh: &mut dyn ErrorHandler) -> Vec<Endpoint> {
        if depth > 64 {
            let _ = errh.error("tunnel expansion too deep (cycle through compound ports?)");
            return Vec::new();
        }
        let Some(&(_, exit)) = self.tunnel_pairs.iter().find(|(enter, _)| *enter == to.element) else {
            return vec![to];
        };
        let mut out = Vec::new();
        for (f, t) in &self.connections {
            if f.element == exit && f.port == to.port {
                out.extend(self.expand_to(*t, depth + 1, errh));
            }
        }
        if out.is_empty() {
            errh.lwarning(
                &self.elements[to.element].landmark,
                &format!("tunnel `{}` input {} not connected", self.elements[to.element].name, to.port),
            );
        }
        out
    }

    /// Real output endpoints that feed `from` (splicing through tunnel
    /// exit-ends).
    fn expand_from(&self, from: Endpoint, depth: usize, errh: &mut dyn ErrorHandler) -> Vec<Endpoint> {
        if depth > 64 {
            let _ = errh.error("tunnel expansion too deep (cycle through compound ports?)");
            return Vec::new();
        }
        let Some(&(enter, _)) = self.tunnel_pairs.iter().find(|(_, exit)| *exit == from.element) else {
            return vec![from];
        };
        let mut out = Vec::new();
        for (f, t) in &self.connections {
            if t.element == enter && t.port == from.port {
                out.extend(self.expand_from(*f, depth + 1, errh));
            }
        }
        if out.is_empty() {
            errh.lwarning(
                &self.elements[from.element].landmark,
                &format!("tunnel `{}` output {} not connected", self.elements[from.element].name, from.port),
            );
        }
        out
    }

    /// Builds the router: instantiates element classes, expands tunnels
    /// out of the connection list, and records requirements.
    pub fn create_router(
        mut self,
        runtime: &Arc<Runtime>,
        clock: Clock,
        errh: &mut dyn ErrorHandler,
    ) -> Result<Router, RouterError> {
        let before = errh.n_errors();
        while self.parse_statement(errh) {}

        let mut router = Router::with_clock(Arc::clone(runtime), clock);

        // Element indices shift as tunnels drop out.
        let mut mapping: Vec<Option<usize>> = Vec::with_capacity(self.elements.len());
        for decl in &self.elements {
            match &decl.kind {
                ElemKind::Tunnel => mapping.push(None),
                ElemKind::Class(class) => match self.registry.create(class) {
                    Some(element) => {
                        let idx = router
                            .add_element(element, &decl.name, &decl.config, &decl.landmark)
                            .map_err(|e| {
                                let _ = errh.lerror(&decl.landmark, &e.to_string());
                                e
                            })?;
                        mapping.push(Some(idx));
                    }
                    None => {
                        let _ = errh
                            .lerror(&decl.landmark, &format!("unknown element class `{class}`"));
                        mapping.push(None);
                    }
                },
            }
        }

        for (f, t) in self.connections.clone() {
            if self.is_tunnel(f.element) || self.is_tunnel(t.element) {
                continue; // spliced below via expansion of real endpoints
            }
            let (Some(fe), Some(te)) = (mapping[f.element], mapping[t.element]) else { continue };
            router.add_connection(fe, f.port, te, t.port)?;
        }
        // Connections that touch tunnels contribute their fully expanded
        // forms. Interior tunnel-to-tunnel legs are traversed by the
        // recursive expansion from the real endpoints.
        for (f, t) in self.connections.clone() {
            if self.is_tunnel(f.element) || !self.is_tunnel(t.element) {
                continue;
            }
            let tos = self.expand_to(t, 0, errh);
            for t in &tos {
                let (Some(fe), Some(te)) = (mapping[f.element], mapping[t.element]) else {
                    continue;
                };
                router.add_connection(fe, f.port, te, t.port)?;
            }
        }
        // Finally, tunnel-sourced connections whose real sources sit
        // outside (e.g. body `input -> x`): expand the source side.
        for (f, t) in self.connections.clone() {
            if !self.is_tunnel(f.element) || self.is_tunnel(t.element) {
                continue;
            }
            let froms = self.expand_from(f, 0, errh);
            let Some(te) = mapping[t.element] else { continue };
            for f in &froms {
                let Some(fe) = mapping[f.element] else { continue };
                router.add_connection(fe, f.port, te, t.port)?;
            }
        }

        let compact = self.requirements.iter().any(|r| r == "compact_config");
        for req in &self.requirements {
            router.add_requirement(req);
        }
        if compact {
            router.set_compact_config();
        } else {
            router.set_flat_configuration(self.original_text.clone());
        }

        if errh.n_errors() != before {
            return Err(RouterError::ConfigureFailed(errh.n_errors() - before));
        }
        Ok(router)
    }
}

/// Parses `config` text into an uninitialized router.
pub fn parse_string(
    config: &str,
    filename: &str,
    runtime: &Arc<Runtime>,
    clock: Clock,
    errh: &mut dyn ErrorHandler,
) -> Result<Router, RouterError> {
    Lexer::new(config, filename, runtime.registry()).create_router(runtime, clock, errh)
}

/// Reads and parses a configuration file.
pub fn parse_file(
    path: &std::path::Path,
    runtime: &Arc<Runtime>,
    clock: Clock,
    errh: &mut dyn ErrorHandler,
) -> Result<Router, RouterError> {
    let text = std::fs::read_to_string(path)?;
    parse_string(&text, &path.to_string_lossy(), runtime, clock, errh)
}
