//! p-code disassembler (SPEC_FULL.md §4.6): per-instruction stack simulation
//! producing an IR tree, plus statement segmentation (stack empty ⇒ end).

use std::{error, fmt};

use crate::cursor::Cursor;
use crate::opcode::{self, CompilerTier, OpcodeDef};

const STACK_CAP: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Truncated { offset: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { offset } => write!(f, "p-code truncated mid-instruction at offset {offset:#x}"),
        }
    }
}

impl error::Error for Error {}

impl From<crate::cursor::Error> for Error {
    fn from(e: crate::cursor::Error) -> Self {
        match e {
            crate::cursor::Error::BufferOverflow { offset, .. } => Error::Truncated { offset },
            crate::cursor::Error::BadMagic { offset, .. } => Error::Truncated { offset },
        }
    }
}

/// One decoded p-code instruction (SPEC_FULL.md §3 "Instruction"). `stack`
/// holds back-edges to the operand-producing instructions consumed when
/// this instruction's discipline popped the simulated stack.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub offset: u16,
    pub opcode: &'static OpcodeDef,
    pub args: Vec<u16>,
    pub stack: Vec<usize>,
    pub begin: bool,
    pub end: bool,
    pub line: u16,
}

/// A contiguous run of instructions delimited by the simulated stack
/// returning to empty (SPEC_FULL.md §3 "Statement"). Classification and
/// scope assignment are filled in by `crate::control_flow`.
#[derive(Debug, Clone)]
pub struct Statement {
    pub start_inst: usize,
    pub end_inst: usize,
    pub start_offset: u16,
    pub end_offset: u16,
    pub start_line: u16,
    pub end_line: u16,
    pub classification: crate::control_flow::Classification,
    pub branch_target: Option<usize>,
    pub destination_count: u32,
    pub classified_count: u32,
    pub scope: Option<usize>,
}

/// Looks up the line number attributed to `offset`: the greatest debug-line
/// record whose `pcode_offset <= offset` (SPEC_FULL.md §4.6 step 2).
fn line_for_offset(debug_lines: &[(u16, u16)], offset: u16) -> u16 {
    let idx = debug_lines.partition_point(|&(pcode_offset, _)| pcode_offset <= offset);
    if idx == 0 {
        0
    } else {
        debug_lines[idx - 1].1
    }
}

struct Stack {
    items: Vec<usize>,
}

impl Stack {
    fn new() -> Self {
        Self { items: Vec::new() }
    }

    fn push(&mut self, idx: usize) {
        if self.items.len() >= STACK_CAP {
            log::warn!("p-code stack overflow at instruction {idx}, discarding push");
            return;
        }
        self.items.push(idx);
    }

    fn pop_n(&mut self, n: u8) -> Vec<usize> {
        let n = n as usize;
        let take = n.min(self.items.len());
        if take < n {
            log::warn!("p-code stack underflow: wanted {n}, had {}", self.items.len());
        }
        let start = self.items.len() - take;
        self.items.split_off(start)
    }
}

/// Decodes `code` into instructions and segments them into statements
/// (SPEC_FULL.md §4.6).
pub fn disassemble(
    code: &[u8],
    debug_lines: &[(u16, u16)],
    tier: CompilerTier,
) -> Result<(Vec<Instruction>, Vec<Statement>), Error> {
    let mut c = Cursor::new(code);
    let mut instructions = Vec::new();
    let mut statements = Vec::new();
    let mut stack = Stack::new();
    let mut current_statement: Option<usize> = None;

    while !c.is_at_end() {
        let offset = c.offset() as u16;
        let id = c.read_u16().map_err(Error::from)?;
        let def = tier.lookup(id);
        let mut args = Vec::with_capacity(def.arg_count as usize);
        for _ in 0..def.arg_count {
            args.push(c.read_u16().map_err(Error::from)?);
        }

        let line = line_for_offset(debug_lines, offset);
        let idx = instructions.len();
        let arity = opcode::stack_arity(def, &args);

        let operands = apply_discipline(def, arity, idx, &mut stack);

        let begin = current_statement.is_none();
        if begin {
            current_statement = Some(statements.len());
            statements.push(Statement {
                start_inst: idx,
                end_inst: idx,
                start_offset: offset,
                end_offset: offset,
                start_line: line,
                end_line: line,
                classification: crate::control_flow::Classification::Expression,
                branch_target: None,
                destination_count: 0,
                classified_count: 0,
                scope: None,
            });
        }
        let stmt_idx = current_statement.expect("statement opened above when begin");
        {
            let stmt = &mut statements[stmt_idx];
            stmt.end_inst = idx;
            stmt.end_offset = offset;
            stmt.start_line = stmt.start_line.min(line);
            stmt.end_line = stmt.end_line.max(line);
        }

        let end = stack.items.is_empty();
        if end {
            current_statement = None;
        }

        instructions.push(Instruction { offset, opcode: def, args, stack: operands, begin, end, line });
    }

    if !stack.items.is_empty() {
        log::warn!("p-code stack non-empty ({} items) at script end", stack.items.len());
    }

    Ok((instructions, statements))
}

fn apply_discipline(def: &OpcodeDef, arity: u8, this_idx: usize, stack: &mut Stack) -> Vec<usize> {
    use crate::opcode::StackDiscipline as D;
    match def.discipline {
        D::None | D::Unknown => Vec::new(),
        D::Result | D::ResultIndirect | D::Dotcall | D::Classcall => {
            let operands = stack.pop_n(arity);
            stack.push(this_idx);
            operands
        }
        D::Action | D::ActionIndirect => stack.pop_n(arity),
        D::Popn | D::PopnIndirect => {
            let kept = stack.pop_n(1);
            let operands = stack.pop_n(arity.saturating_sub(1));
            for k in kept {
                stack.push(k);
            }
            operands
        }
        D::TweakIndirect | D::TweakIndirect1 => {
            let depth = arity.max(1) as usize;
            if stack.items.len() >= depth {
                let pos = stack.items.len() - depth;
                let replaced = stack.items[pos];
                stack.items[pos] = this_idx;
                vec![replaced]
            } else {
                stack.push(this_idx);
                Vec::new()
            }
        }
        D::CloneIndirect => {
            if let Some(&top) = stack.items.last() {
                stack.push(this_idx);
                vec![top]
            } else {
                stack.push(this_idx);
                Vec::new()
            }
        }
        D::PeekResult | D::PeekResultIndirect => {
            stack.push(this_idx);
            Vec::new()
        }
    }
}

/// The script-scoped bundle owning the instruction array, statement array
/// and scope tree (SPEC_FULL.md §3 "Disassembly").
pub struct Disassembly {
    pub instructions: Vec<Instruction>,
    pub statements: Vec<Statement>,
    pub scopes: Vec<crate::control_flow::Scope>,
}

impl Disassembly {
    pub fn build(code: &[u8], debug_lines: &[(u16, u16)], tier: CompilerTier) -> Result<Self, Error> {
        let (instructions, mut statements) = disassemble(code, debug_lines, tier)?;
        let scopes = crate::control_flow::classify(&instructions, &mut statements);
        Ok(Self { instructions, statements, scopes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_instr(buf: &mut Vec<u8>, id: u16, args: &[u16]) {
        buf.extend_from_slice(&id.to_le_bytes());
        for a in args {
            buf.extend_from_slice(&a.to_le_bytes());
        }
    }

    #[test]
    fn precedence_example_s3_segments_one_statement() {
        // a - (b + c) * d: PUSH a; PUSH b; PUSH c; ADD; PUSH d; MULT; SUB
        let mut code = Vec::new();
        push_instr(&mut code, 1, &[0]); // PUSH_LOCAL a
        push_instr(&mut code, 1, &[1]); // PUSH_LOCAL b
        push_instr(&mut code, 1, &[2]); // PUSH_LOCAL c
        push_instr(&mut code, 10, &[]); // ADD
        push_instr(&mut code, 1, &[3]); // PUSH_LOCAL d
        push_instr(&mut code, 12, &[]); // MULT
        push_instr(&mut code, 11, &[]); // SUB

        let tier = CompilerTier::Pb120;
        let (instructions, statements) = disassemble(&code, &[], tier).unwrap();
        assert_eq!(instructions.len(), 7);
        assert_eq!(statements.len(), 1);
        assert!(instructions[0].begin);
        assert!(instructions.last().unwrap().end);
    }

    #[test]
    fn debug_line_lookup_picks_greatest_not_exceeding() {
        let lines = [(0u16, 10u16), (8, 11), (20, 12)];
        assert_eq!(line_for_offset(&lines, 0), 10);
        assert_eq!(line_for_offset(&lines, 9), 11);
        assert_eq!(line_for_offset(&lines, 100), 12);
    }
}
