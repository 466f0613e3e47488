// Copyright 2024 Cornell University
// released under BSD 3-Clause License
// author: Kevin Laeufer <laeufer@cornell.edu>

use rustc_hash::FxHashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// An AIGER literal: `2 * var + sign`. The constants false and true are `0`
/// and `1`.
pub type AigerLiteral = u32;

pub const FALSE_LITERAL: AigerLiteral = 0;
pub const TRUE_LITERAL: AigerLiteral = 1;

#[inline]
pub fn negate(lit: AigerLiteral) -> AigerLiteral {
    lit ^ 1
}

#[inline]
pub fn strip(lit: AigerLiteral) -> AigerLiteral {
    lit & !1
}

#[inline]
pub fn var_of(lit: AigerLiteral) -> u32 {
    lit >> 1
}

#[inline]
pub fn is_negated(lit: AigerLiteral) -> bool {
    lit & 1 == 1
}

/// A state holding element. `reset` is the initial value: `Some` for a
/// constant reset, `None` when the latch starts in an arbitrary state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latch {
    pub current: AigerLiteral,
    pub next: AigerLiteral,
    pub reset: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AndGate {
    pub lhs: AigerLiteral,
    pub rhs0: AigerLiteral,
    pub rhs1: AigerLiteral,
}

/// An And-Inverter-Graph as read from an AIGER file (ASCII `aag` or binary
/// `aig`, both pre-1.9 and 1.9 headers).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aig {
    pub max_var: u32,
    pub inputs: Vec<AigerLiteral>,
    pub latches: Vec<Latch>,
    pub outputs: Vec<AigerLiteral>,
    pub bads: Vec<AigerLiteral>,
    pub constraints: Vec<AigerLiteral>,
    pub num_justice: usize,
    pub num_fairness: usize,
    pub ands: Vec<AndGate>,
}

#[derive(Debug, Error)]
pub enum AigerError {
    #[error("failed to read AIGER input: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {msg}")]
    Malformed { line: usize, msg: String },
    #[error("the and gates contain a combinational cycle")]
    CombinationalCycle,
}

impl Aig {
    /// Reads either format, detected from the magic word in the header.
    pub fn read(mut input: impl Read) -> Result<Aig, AigerError> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        let mut reader = Reader::new(&bytes);
        let header = Header::parse(&mut reader)?;
        if header.binary {
            read_binary(reader, header)
        } else {
            read_ascii(reader, header)
        }
    }

    pub fn read_from_str(input: &str) -> Result<Aig, AigerError> {
        Self::read(input.as_bytes())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Aig, AigerError> {
        let file = std::fs::File::open(path)?;
        Self::read(std::io::BufReader::new(file))
    }

    /// True iff variable numbering is contiguous (inputs, then latches, then
    /// and gates) and every gate refers only to smaller literals.
    pub fn is_reencoded(&self) -> bool {
        let num_inputs = self.inputs.len() as u32;
        let num_latches = self.latches.len() as u32;
        let inputs_ok = self
            .inputs
            .iter()
            .enumerate()
            .all(|(i, lit)| *lit == 2 * (i as u32 + 1));
        let latches_ok = self
            .latches
            .iter()
            .enumerate()
            .all(|(i, latch)| latch.current == 2 * (num_inputs + i as u32 + 1));
        let ands_ok = self.ands.iter().enumerate().all(|(i, gate)| {
            gate.lhs == 2 * (num_inputs + num_latches + i as u32 + 1)
                && gate.rhs0 < gate.lhs
                && gate.rhs1 <= gate.rhs0
        });
        inputs_ok && latches_ok && ands_ok
    }

    /// Renumbers all literals into the contiguous layout and reorders the
    /// gates topologically. No-op when the graph is already reencoded.
    pub fn reencode(&mut self) -> Result<(), AigerError> {
        if self.is_reencoded() {
            return Ok(());
        }

        let num_inputs = self.inputs.len() as u32;
        let num_latches = self.latches.len() as u32;

        // constant + terminals keep their roles, only their numbering moves
        let mut var_map = FxHashMap::default();
        var_map.insert(0u32, 0u32);
        for (i, lit) in self.inputs.iter().enumerate() {
            var_map.insert(var_of(*lit), i as u32 + 1);
        }
        for (i, latch) in self.latches.iter().enumerate() {
            var_map.insert(var_of(latch.current), num_inputs + i as u32 + 1);
        }

        let gate_of_var: FxHashMap<u32, usize> = self
            .ands
            .iter()
            .enumerate()
            .map(|(i, gate)| (var_of(gate.lhs), i))
            .collect();

        // depth first, operands before outputs
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unseen,
            Active,
            Done,
        }
        let mut marks = vec![Mark::Unseen; self.ands.len()];
        let mut order = Vec::with_capacity(self.ands.len());
        for root in 0..self.ands.len() {
            if marks[root] == Mark::Done {
                continue;
            }
            let mut stack = vec![(root, false)];
            while let Some((gate, expanded)) = stack.pop() {
                if expanded {
                    marks[gate] = Mark::Done;
                    order.push(gate);
                    continue;
                }
                match marks[gate] {
                    Mark::Done => continue,
                    Mark::Active => return Err(AigerError::CombinationalCycle),
                    Mark::Unseen => {}
                }
                marks[gate] = Mark::Active;
                stack.push((gate, true));
                for rhs in [self.ands[gate].rhs0, self.ands[gate].rhs1] {
                    if let Some(child) = gate_of_var.get(&var_of(rhs)) {
                        if marks[*child] == Mark::Active {
                            return Err(AigerError::CombinationalCycle);
                        }
                        if marks[*child] == Mark::Unseen {
                            stack.push((*child, false));
                        }
                    }
                }
            }
        }

        for (position, gate) in order.iter().enumerate() {
            var_map.insert(
                var_of(self.ands[*gate].lhs),
                num_inputs + num_latches + position as u32 + 1,
            );
        }

        let map_lit = |lit: AigerLiteral| -> AigerLiteral {
            let var = var_map
                .get(&var_of(lit))
                .expect("literal refers to an undeclared variable");
            2 * var + (lit & 1)
        };

        let ands = order
            .iter()
            .map(|gate| {
                let old = self.ands[*gate];
                let rhs0 = map_lit(old.rhs0);
                let rhs1 = map_lit(old.rhs1);
                AndGate {
                    lhs: map_lit(old.lhs),
                    rhs0: rhs0.max(rhs1),
                    rhs1: rhs0.min(rhs1),
                }
            })
            .collect();
        self.ands = ands;

        for (i, lit) in self.inputs.iter_mut().enumerate() {
            debug_assert!(!is_negated(*lit));
            *lit = 2 * (i as u32 + 1);
        }
        for latch in self.latches.iter_mut() {
            latch.current = map_lit(latch.current);
            latch.next = map_lit(latch.next);
        }
        for lit in self
            .outputs
            .iter_mut()
            .chain(self.bads.iter_mut())
            .chain(self.constraints.iter_mut())
        {
            *lit = map_lit(*lit);
        }
        self.max_var = num_inputs + num_latches + self.ands.len() as u32;

        debug_assert!(self.is_reencoded());
        Ok(())
    }
}

struct Header {
    binary: bool,
    max_var: u32,
    num_inputs: usize,
    num_latches: usize,
    num_outputs: usize,
    num_ands: usize,
    num_bads: usize,
    num_constraints: usize,
    num_justice: usize,
    num_fairness: usize,
}

impl Header {
    fn parse(reader: &mut Reader) -> Result<Header, AigerError> {
        let line = reader.next_line()?;
        let mut tokens = line.split_ascii_whitespace();
        let magic = tokens.next().unwrap_or("");
        let binary = match magic {
            "aag" => false,
            "aig" => true,
            other => {
                return Err(reader.error(format!("expected `aag` or `aig`, found `{other}`")))
            }
        };
        let mut counts = [0usize; 9];
        let mut found = 0;
        for (i, slot) in counts.iter_mut().enumerate() {
            match tokens.next() {
                Some(tok) => {
                    *slot = tok
                        .parse()
                        .map_err(|_| reader.error(format!("invalid header count `{tok}`")))?;
                    found = i + 1;
                }
                None => break,
            }
        }
        if found < 5 {
            return Err(reader.error("header needs at least the M I L O A counts".to_string()));
        }
        if tokens.next().is_some() {
            return Err(reader.error("trailing tokens after the header counts".to_string()));
        }
        Ok(Header {
            binary,
            max_var: counts[0] as u32,
            num_inputs: counts[1],
            num_latches: counts[2],
            num_outputs: counts[3],
            num_ands: counts[4],
            num_bads: counts[5],
            num_constraints: counts[6],
            num_justice: counts[7],
            num_fairness: counts[8],
        })
    }
}

/// A cursor over the raw input, needed because the binary format mixes
/// line-based sections with a byte-encoded gate section.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            line: 0,
        }
    }

    fn error(&self, msg: String) -> AigerError {
        AigerError::Malformed {
            line: self.line,
            msg,
        }
    }

    fn next_line(&mut self) -> Result<&'a str, AigerError> {
        if self.pos >= self.bytes.len() {
            return Err(self.error("unexpected end of input".to_string()));
        }
        let start = self.pos;
        let end = self.bytes[start..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|off| start + off)
            .unwrap_or(self.bytes.len());
        self.pos = (end + 1).min(self.bytes.len());
        self.line += 1;
        std::str::from_utf8(&self.bytes[start..end])
            .map(|s| s.trim_end_matches('\r'))
            .map_err(|_| self.error("line is not valid utf-8".to_string()))
    }

    fn next_byte(&mut self) -> Result<u8, AigerError> {
        if self.pos >= self.bytes.len() {
            return Err(self.error("unexpected end of binary gate data".to_string()));
        }
        let byte = self.bytes[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// One 7-bit variable-length delta from the binary gate section.
    fn next_delta(&mut self) -> Result<u32, AigerError> {
        let mut result: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = self.next_byte()?;
            if shift > 28 {
                return Err(self.error("binary delta does not fit in 32 bits".to_string()));
            }
            result |= ((byte & 0x7f) as u32) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }
}

fn parse_literal(reader: &Reader, token: &str, max_var: u32) -> Result<AigerLiteral, AigerError> {
    let lit: AigerLiteral = token
        .parse()
        .map_err(|_| reader.error(format!("invalid literal `{token}`")))?;
    if var_of(lit) > max_var {
        return Err(reader.error(format!("literal {lit} exceeds the maximum variable")));
    }
    Ok(lit)
}

fn parse_literal_line(reader: &mut Reader, max_var: u32) -> Result<AigerLiteral, AigerError> {
    let line = reader.next_line()?;
    let mut tokens = line.split_ascii_whitespace();
    let lit = match tokens.next() {
        Some(tok) => parse_literal(reader, tok, max_var)?,
        None => return Err(reader.error("expected a literal".to_string())),
    };
    if tokens.next().is_some() {
        return Err(reader.error("trailing tokens after literal".to_string()));
    }
    Ok(lit)
}

fn parse_reset(
    reader: &Reader,
    token: Option<&str>,
    current: AigerLiteral,
    max_var: u32,
) -> Result<Option<bool>, AigerError> {
    match token {
        None => Ok(Some(false)),
        Some(tok) => match parse_literal(reader, tok, max_var)? {
            FALSE_LITERAL => Ok(Some(false)),
            TRUE_LITERAL => Ok(Some(true)),
            lit if lit == current => Ok(None),
            lit => Err(reader.error(format!(
                "latch reset must be 0, 1 or the latch literal, found {lit}"
            ))),
        },
    }
}

/// The sections following the latches are identical in both formats.
fn read_common_sections(reader: &mut Reader, header: &Header, aig: &mut Aig) -> Result<(), AigerError> {
    for _ in 0..header.num_outputs {
        let lit = parse_literal_line(reader, header.max_var)?;
        aig.outputs.push(lit);
    }
    for _ in 0..header.num_bads {
        let lit = parse_literal_line(reader, header.max_var)?;
        aig.bads.push(lit);
    }
    for _ in 0..header.num_constraints {
        let lit = parse_literal_line(reader, header.max_var)?;
        aig.constraints.push(lit);
    }
    // justice properties are rejected later by the builder, but their layout
    // (a count line per property, then that many literal lines) still has to
    // be consumed to reach the gate section
    let mut justice_sizes = Vec::with_capacity(header.num_justice);
    for _ in 0..header.num_justice {
        let line = reader.next_line()?;
        let size: usize = line
            .trim()
            .parse()
            .map_err(|_| reader.error(format!("invalid justice size `{line}`")))?;
        justice_sizes.push(size);
    }
    for size in justice_sizes {
        for _ in 0..size {
            let _ = parse_literal_line(reader, header.max_var)?;
        }
    }
    for _ in 0..header.num_fairness {
        let _ = parse_literal_line(reader, header.max_var)?;
    }
    aig.num_justice = header.num_justice;
    aig.num_fairness = header.num_fairness;
    Ok(())
}

fn read_ascii(mut reader: Reader, header: Header) -> Result<Aig, AigerError> {
    let mut aig = Aig {
        max_var: header.max_var,
        ..Aig::default()
    };

    for _ in 0..header.num_inputs {
        let lit = parse_literal_line(&mut reader, header.max_var)?;
        if lit < 2 || is_negated(lit) {
            return Err(reader.error(format!("input must be an even literal >= 2, found {lit}")));
        }
        aig.inputs.push(lit);
    }

    for _ in 0..header.num_latches {
        let line = reader.next_line()?;
        let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
        if tokens.len() < 2 || tokens.len() > 3 {
            return Err(reader.error("latch line must be `current next [reset]`".to_string()));
        }
        let current = parse_literal(&reader, tokens[0], header.max_var)?;
        if current < 2 || is_negated(current) {
            return Err(reader.error(format!("latch must be an even literal >= 2, found {current}")));
        }
        let next = parse_literal(&reader, tokens[1], header.max_var)?;
        let reset = parse_reset(&reader, tokens.get(2).copied(), current, header.max_var)?;
        aig.latches.push(Latch {
            current,
            next,
            reset,
        });
    }

    read_common_sections(&mut reader, &header, &mut aig)?;

    for _ in 0..header.num_ands {
        let line = reader.next_line()?;
        let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
        if tokens.len() != 3 {
            return Err(reader.error("and gate line must be `lhs rhs0 rhs1`".to_string()));
        }
        let lhs = parse_literal(&reader, tokens[0], header.max_var)?;
        if lhs < 2 || is_negated(lhs) {
            return Err(reader.error(format!("gate output must be an even literal, found {lhs}")));
        }
        let rhs0 = parse_literal(&reader, tokens[1], header.max_var)?;
        let rhs1 = parse_literal(&reader, tokens[2], header.max_var)?;
        aig.ands.push(AndGate { lhs, rhs0, rhs1 });
    }

    // the symbol table and comments are irrelevant for model checking
    Ok(aig)
}

fn read_binary(mut reader: Reader, header: Header) -> Result<Aig, AigerError> {
    let mut aig = Aig {
        max_var: header.max_var,
        ..Aig::default()
    };
    let num_inputs = header.num_inputs as u32;

    // terminals are implicit in the binary format
    for i in 0..num_inputs {
        aig.inputs.push(2 * (i + 1));
    }
    for i in 0..header.num_latches {
        let current = 2 * (num_inputs + i as u32 + 1);
        let line = reader.next_line()?;
        let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
        if tokens.is_empty() || tokens.len() > 2 {
            return Err(reader.error("latch line must be `next [reset]`".to_string()));
        }
        let next = parse_literal(&reader, tokens[0], header.max_var)?;
        let reset = parse_reset(&reader, tokens.get(1).copied(), current, header.max_var)?;
        aig.latches.push(Latch {
            current,
            next,
            reset,
        });
    }

    read_common_sections(&mut reader, &header, &mut aig)?;

    for i in 0..header.num_ands {
        let lhs = 2 * (num_inputs + header.num_latches as u32 + i as u32 + 1);
        let delta0 = reader.next_delta()?;
        if delta0 > lhs {
            return Err(reader.error(format!("gate {lhs}: delta {delta0} underflows")));
        }
        let rhs0 = lhs - delta0;
        let delta1 = reader.next_delta()?;
        if delta1 > rhs0 {
            return Err(reader.error(format!("gate {lhs}: delta {delta1} underflows")));
        }
        let rhs1 = rhs0 - delta1;
        aig.ands.push(AndGate { lhs, rhs0, rhs1 });
    }

    Ok(aig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_an_ascii_and_gate() {
        let aig = Aig::read_from_str("aag 3 2 0 1 1\n2\n4\n6\n6 4 2\n").unwrap();
        assert_eq!(aig.max_var, 3);
        assert_eq!(aig.inputs, vec![2, 4]);
        assert_eq!(aig.outputs, vec![6]);
        assert_eq!(
            aig.ands,
            vec![AndGate {
                lhs: 6,
                rhs0: 4,
                rhs1: 2
            }]
        );
        assert!(aig.is_reencoded());
    }

    #[test]
    fn parses_latches_with_reset_values() {
        let src = "aag 3 0 3 0 0\n2 2 0\n4 4 1\n6 6 6\n";
        let aig = Aig::read_from_str(src).unwrap();
        assert_eq!(aig.latches[0].reset, Some(false));
        assert_eq!(aig.latches[1].reset, Some(true));
        assert_eq!(aig.latches[2].reset, None);
        // pre-1.9 files have no reset column and default to zero
        let old = Aig::read_from_str("aag 1 0 1 0 0\n2 3\n").unwrap();
        assert_eq!(old.latches[0].reset, Some(false));
        assert_eq!(old.latches[0].next, 3);
    }

    #[test]
    fn parses_a_bad_state_header() {
        let src = "aag 1 0 1 0 0 1\n2 1\n3\n";
        let aig = Aig::read_from_str(src).unwrap();
        assert!(aig.outputs.is_empty());
        assert_eq!(aig.bads, vec![3]);
    }

    #[test]
    fn parses_the_binary_format() {
        // same gate as the ascii test: 6 = 4 & 2
        let mut bytes = b"aig 3 2 0 1 1\n6\n".to_vec();
        bytes.extend_from_slice(&[2, 2]);
        let aig = Aig::read(bytes.as_slice()).unwrap();
        assert_eq!(aig.inputs, vec![2, 4]);
        assert_eq!(aig.outputs, vec![6]);
        assert_eq!(
            aig.ands,
            vec![AndGate {
                lhs: 6,
                rhs0: 4,
                rhs1: 2
            }]
        );
    }

    #[test]
    fn parses_multi_byte_binary_deltas() {
        // single gate with lhs 260 referencing literal 2: delta0 = 258 needs
        // two bytes (0x82 0x02)
        let mut bytes = b"aig 130 129 0 1 1\n260\n".to_vec();
        bytes.extend_from_slice(&[0x82, 0x02, 0x00]);
        let aig = Aig::read(bytes.as_slice()).unwrap();
        assert_eq!(
            aig.ands,
            vec![AndGate {
                lhs: 260,
                rhs0: 2,
                rhs1: 2
            }]
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Aig::read_from_str("").is_err());
        assert!(Aig::read_from_str("aag 1 0 0\n").is_err());
        assert!(Aig::read_from_str("nope 0 0 0 0 0\n").is_err());
        // literal out of range
        assert!(Aig::read_from_str("aag 1 1 0 0 0\n4\n").is_err());
        // truncated gate section
        assert!(Aig::read_from_str("aag 3 2 0 0 1\n2\n4\n").is_err());
    }

    #[test]
    fn reencodes_out_of_order_gates() {
        // gate 8 refers to gate 6 which is declared after it
        let src = "aag 4 1 1 1 2\n2\n4 8\n8\n8 6 2\n6 4 2\n";
        let mut aig = Aig::read_from_str(src).unwrap();
        assert!(!aig.is_reencoded());
        aig.reencode().unwrap();
        assert!(aig.is_reencoded());
        assert_eq!(aig.inputs, vec![2]);
        assert_eq!(aig.latches[0].current, 4);
        // 6 = 4 & 2 comes first now, 8 = 6 & 2 second
        assert_eq!(
            aig.ands,
            vec![
                AndGate {
                    lhs: 6,
                    rhs0: 4,
                    rhs1: 2
                },
                AndGate {
                    lhs: 8,
                    rhs0: 6,
                    rhs1: 2
                },
            ]
        );
        assert_eq!(aig.latches[0].next, 8);
        assert_eq!(aig.outputs, vec![8]);
    }

    #[test]
    fn reencode_detects_cycles() {
        let src = "aag 3 1 0 1 2\n2\n4\n4 6 2\n6 4 2\n";
        let mut aig = Aig::read_from_str(src).unwrap();
        assert!(matches!(
            aig.reencode(),
            Err(AigerError::CombinationalCycle)
        ));
    }

    #[test]
    fn reencode_is_a_no_op_on_reencoded_graphs() {
        let src = "aag 3 2 0 1 1\n2\n4\n6\n6 4 2\n";
        let mut aig = Aig::read_from_str(src).unwrap();
        let before = aig.clone();
        aig.reencode().unwrap();
        assert_eq!(aig, before);
    }
}
