//! Flow codes: per-element port-to-port reachability specifications.
//!
//! A flow code is two strings separated by `/` — input port codes, then
//! output port codes. Each position is a letter, a bracketed letter set
//! (`[abz]`), or `#`, the port-identity marker; the last code on each side
//! extends to all further ports. A packet arriving on input `i` may reach
//! output `j` iff their codes share a letter, or both contain `#` and
//! `i == j`. Validation uses the match relation to propagate push/pull
//! orientation through agnostic elements, and the visitor traversal uses
//! it to prune unreachable paths.

/// One port's code: a set of letters (as a 52-bit mask) plus the `#`
/// identity marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PortCode {
    letters: u64,
    identity: bool,
}

impl PortCode {
    fn add_letter(&mut self, c: u8) -> bool {
        let bit = match c {
            b'a'..=b'z' => c - b'a',
            b'A'..=b'Z' => 26 + (c - b'A'),
            _ => return false,
        };
        self.letters |= 1 << bit;
        true
    }

    /// True iff a packet may flow between a port with this code and one
    /// with `other`. `same_port` is whether the two ports share an index,
    /// which is what `#` matches on.
    pub fn matches(&self, other: &PortCode, same_port: bool) -> bool {
        (self.letters & other.letters) != 0 || (self.identity && other.identity && same_port)
    }
}

/// A parsed flow code; answers reachability queries for arbitrary port
/// indices by extending the last code on each side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowCode {
    inputs: Vec<PortCode>,
    outputs: Vec<PortCode>,
}

/// The default flow code: every input reaches every output.
pub const COMPLETE_FLOW: &str = "x/x";

impl FlowCode {
    /// Parses `spec`, e.g. `"xy/x"`, `"#/#"`, or `"[abc]h/a"`. Returns
    /// `None` on malformed specs (empty side, unbalanced brackets, or a
    /// character that is not a letter, `#`, or brackets).
    pub fn parse(spec: &str) -> Option<FlowCode> {
        let (ins, outs) = spec.split_once('/')?;
        Some(FlowCode { inputs: parse_side(ins)?, outputs: parse_side(outs)? })
    }

    fn input_code(&self, port: usize) -> &PortCode {
        extended(&self.inputs, port)
    }

    fn output_code(&self, port: usize) -> &PortCode {
        extended(&self.outputs, port)
    }

    /// May a packet arriving on input `i` leave through output `j`?
    pub fn forward(&self, i: usize, j: usize) -> bool {
        self.input_code(i).matches(self.output_code(j), i == j)
    }
}

impl Default for FlowCode {
    fn default() -> FlowCode {
        FlowCode::parse(COMPLETE_FLOW).unwrap_or(FlowCode { inputs: Vec::new(), outputs: Vec::new() })
    }
}

fn extended(codes: &[PortCode], port: usize) -> &PortCode {
    static EMPTY: PortCode = PortCode { letters: 0, identity: false };
    if codes.is_empty() {
        &EMPTY
    } else {
        &codes[port.min(codes.len() - 1)]
    }
}

fn parse_side(side: &str) -> Option<Vec<PortCode>> {
    let mut codes = Vec::new();
    let bytes = side.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let mut code = PortCode::default();
        match bytes[i] {
            b'[' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b']' {
                    if bytes[i] == b'#' {
                        code.identity = true;
                    } else if !code.add_letter(bytes[i]) {
                        return None;
                    }
                    i += 1;
                }
                if i == bytes.len() {
                    return None; // unbalanced bracket
                }
                i += 1;
            }
            b'#' => {
                code.identity = true;
                i += 1;
            }
            c => {
                if !code.add_letter(c) {
                    return None;
                }
                i += 1;
            }
        }
        codes.push(code);
    }
    if codes.is_empty() { None } else { Some(codes) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_flow_connects_everything() {
        let f = FlowCode::parse("x/x").unwrap();
        assert!(f.forward(0, 0));
        assert!(f.forward(3, 7));
    }

    #[test]
    fn disjoint_letters_do_not_match() {
        let f = FlowCode::parse("xy/z").unwrap();
        assert!(!f.forward(0, 0));
        let g = FlowCode::parse("xy/y").unwrap();
        assert!(g.forward(0, 0));
    }

    #[test]
    fn identity_matches_same_port_only() {
        let f = FlowCode::parse("#/#").unwrap();
        assert!(f.forward(2, 2));
        assert!(!f.forward(1, 2));
    }

    #[test]
    fn last_code_extends() {
        // input 0 reaches only output 0; all later inputs reach output 1+.
        let f = FlowCode::parse("ab/a[b#]").unwrap();
        assert!(f.forward(0, 0));
        assert!(f.forward(0, 1));
        assert!(f.forward(5, 9));
    }

    #[test]
    fn malformed_specs_rejected() {
        assert!(FlowCode::parse("x").is_none());
        assert!(FlowCode::parse("/x").is_none());
        assert!(FlowCode::parse("[ab/x").is_none());
        assert!(FlowCode::parse("1/x").is_none());
    }
}
