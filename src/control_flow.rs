//! Control-flow classifier (SPEC_FULL.md §4.7): reclassifies raw conditional
//! and unconditional jumps into structured statements, and inserts the
//! lexical scope tree that drives indentation in the source printer.

use crate::disassemble::{Instruction, Statement};
use crate::opcode::OperationKind;

/// Disjoint statement classifications (SPEC_FULL.md §4.7); `Expression` is
/// the default before classification runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Expression,
    Generated,
    MemAppend,
    JumpTrue,
    JumpFalse,
    JumpGoto,
    DoWhile,
    DoUntil,
    LoopWhile,
    LoopUntil,
    JumpLoop,
    JumpNext,
    IfThen,
    JumpElse,
    JumpElseif,
    ChooseCase,
    CaseIf,
    CaseElse,
    ForInit,
    ForJump,
    ForStep,
    ForTest,
    ExceptionTry,
    ExceptionCatch,
    ExceptionEndTry,
    ExceptionGosub,
    JumpExit,
    JumpContinue,
}

/// A lexical region controlling indentation and break/continue targets
/// (SPEC_FULL.md §3 "Scope"). Scopes form a strict tree.
#[derive(Debug, Clone)]
pub struct Scope {
    pub start: usize,
    pub indent_start: usize,
    pub indent_end: usize,
    pub end: usize,
    pub begin_label: Option<&'static str>,
    pub end_label: Option<&'static str>,
    pub break_dest: Option<usize>,
    pub continue_dest: Option<usize>,
    pub parent: Option<usize>,
}

impl Scope {
    fn leaf(start: usize, end: usize, end_label: Option<&'static str>) -> Self {
        Self {
            start,
            indent_start: start,
            indent_end: end,
            end,
            begin_label: None,
            end_label,
            break_dest: None,
            continue_dest: None,
            parent: None,
        }
    }
}

fn overlaps_without_containment(a: (usize, usize), b: (usize, usize)) -> bool {
    let (a0, a1) = a;
    let (b0, b1) = b;
    let disjoint = a1 < b0 || b1 < a0;
    let a_contains_b = a0 <= b0 && b1 <= a1;
    let b_contains_a = b0 <= a0 && a1 <= b1;
    !(disjoint || a_contains_b || b_contains_a)
}

/// Inserts `scope`, rejecting it (returning `None`) if it partially overlaps
/// an existing scope (SPEC_FULL.md §4.7 "scope insertion invariant").
fn try_insert_scope(scopes: &mut Vec<Scope>, candidate: Scope) -> Option<usize> {
    let range = (candidate.start, candidate.end);
    for existing in scopes.iter() {
        if overlaps_without_containment(range, (existing.start, existing.end)) {
            return None;
        }
    }
    let idx = scopes.len();
    let mut parent = None;
    for (i, existing) in scopes.iter().enumerate() {
        if existing.start <= range.0 && range.1 <= existing.end && (existing.start, existing.end) != range {
            parent = Some(parent.map_or(i, |p: usize| if scopes[p].end - scopes[p].start > existing.end - existing.start { i } else { p }));
        }
    }
    let mut candidate = candidate;
    candidate.parent = parent;
    scopes.push(candidate);
    Some(idx)
}

fn find_statement_by_offset(statements: &[Statement], offset: u16) -> Option<usize> {
    statements.iter().position(|s| s.start_offset == offset)
}

fn last_instruction(statements: &[Statement], idx: usize) -> usize {
    statements[idx].end_inst
}

/// Runs the full classifier over a disassembled script, mutating
/// `statements` classifications/branch targets in place and returning the
/// resulting scope tree.
pub fn classify(instructions: &[Instruction], statements: &mut [Statement]) -> Vec<Scope> {
    let mut scopes = Vec::new();

    // Phase A: link jump targets.
    for i in 0..statements.len() {
        let inst_idx = last_instruction(statements, i);
        let inst = &instructions[inst_idx];
        let target_offset = match inst.opcode.kind {
            OperationKind::Jump | OperationKind::JumpTrue | OperationKind::JumpFalse | OperationKind::Gosub => {
                inst.args.first().copied()
            }
            OperationKind::PushTry => inst.args.first().copied(),
            _ => None,
        };
        statements[i].classification = match inst.opcode.kind {
            OperationKind::JumpTrue => Classification::JumpTrue,
            OperationKind::JumpFalse => Classification::JumpFalse,
            OperationKind::Jump => Classification::JumpGoto,
            OperationKind::Gosub => Classification::ExceptionGosub,
            OperationKind::PushTry => Classification::ExceptionTry,
            OperationKind::PopTry => Classification::ExceptionEndTry,
            OperationKind::Return | OperationKind::ReturnSub => Classification::Generated,
            OperationKind::Cat => Classification::MemAppend,
            _ => statements[i].classification,
        };
        if let Some(off) = target_offset {
            if let Some(target) = find_statement_by_offset(statements, off) {
                statements[i].branch_target = Some(target);
                statements[target].destination_count += 1;
            }
        }
    }

    // exception_try gets a second immediate (end_offset); wire up its scope.
    for i in 0..statements.len() {
        let inst_idx = last_instruction(statements, i);
        let inst = &instructions[inst_idx];
        if inst.opcode.kind != OperationKind::PushTry {
            continue;
        }
        let Some(&catch_off) = inst.args.first() else { continue };
        let Some(&end_off) = inst.args.get(1) else { continue };
        let catch_idx = find_statement_by_offset(statements, catch_off);
        let end_idx = find_statement_by_offset(statements, end_off);
        if let (Some(catch_idx), Some(end_idx)) = (catch_idx, end_idx) {
            if catch_idx > i && end_idx >= catch_idx {
                statements[catch_idx].classification = Classification::ExceptionCatch;
                let guarded = Scope::leaf(i + 1, catch_idx.saturating_sub(1), Some("end try"));
                if let Some(idx) = try_insert_scope(&mut scopes, guarded) {
                    statements[i].classified_count += 1;
                    let _ = idx;
                }
            }
        }
    }

    // Phase B: per-conditional loop/if classification by jump direction.
    for i in 0..statements.len() {
        let Some(target) = statements[i].branch_target else { continue };
        if !matches!(statements[i].classification, Classification::JumpTrue | Classification::JumpFalse) {
            continue;
        }
        if target < i {
            // Backward conditional: terminates a do...loop.
            let is_until = statements[i].classification == Classification::JumpFalse;
            statements[i].classification = if is_until { Classification::LoopUntil } else { Classification::LoopWhile };
            let body = Scope::leaf(target, i.saturating_sub(1), None);
            if let Some(idx) = try_insert_scope(&mut scopes, body) {
                scopes[idx].break_dest = Some(i + 1);
                scopes[idx].continue_dest = Some(i);
            }
            continue;
        }

        // Forward conditional.
        if target == 0 {
            continue;
        }
        let prior = target - 1;
        let prior_is_goto_back = instructions[last_instruction(statements, prior)].opcode.kind == OperationKind::Jump
            && statements[prior].branch_target == Some(i);

        if prior_is_goto_back {
            let is_until = statements[i].classification == Classification::JumpFalse;
            statements[i].classification = if is_until { Classification::DoUntil } else { Classification::DoWhile };
            statements[prior].classification = Classification::JumpLoop;
            let body = Scope::leaf(i + 1, prior.saturating_sub(1), None);
            if let Some(idx) = try_insert_scope(&mut scopes, body) {
                scopes[idx].break_dest = Some(target);
                scopes[idx].continue_dest = Some(i);
            }
        } else {
            let same_line = (i..target).all(|s| statements[s].start_line == statements[i].start_line);
            if same_line {
                statements[i].classification = Classification::IfThen;
            } else {
                let body = Scope::leaf(i + 1, prior, Some("end if"));
                try_insert_scope(&mut scopes, body);
                statements[i].classification = Classification::IfThen;
            }
        }
    }

    // Phase C (simplified): a trailing goto whose target is right after an
    // if-scope's end becomes `else`; otherwise it stays a plain goto.
    for i in 0..statements.len() {
        if statements[i].classification != Classification::JumpGoto {
            continue;
        }
        let Some(target) = statements[i].branch_target else { continue };
        if target > i {
            statements[i].classification = Classification::JumpElse;
        }
    }

    // Phase D: free gotos inside a loop scope targeting its break/continue.
    for i in 0..statements.len() {
        if statements[i].classification != Classification::JumpGoto {
            continue;
        }
        let Some(target) = statements[i].branch_target else { continue };
        for scope in &scopes {
            if scope.start <= i && i <= scope.end {
                if scope.break_dest == Some(target) {
                    statements[i].classification = Classification::JumpExit;
                } else if scope.continue_dest == Some(target) {
                    statements[i].classification = Classification::JumpContinue;
                }
            }
        }
    }

    // Phase E: obvious generated code - goto targeting a `return`.
    for i in 0..statements.len() {
        let Some(target) = statements[i].branch_target else { continue };
        if statements[i].classification == Classification::JumpGoto
            && statements[target].classification == Classification::Generated
        {
            statements[i].classification = Classification::Generated;
        }
    }

    scopes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::CompilerTier;

    fn push_instr(buf: &mut Vec<u8>, id: u16, args: &[u16]) {
        buf.extend_from_slice(&id.to_le_bytes());
        for a in args {
            buf.extend_from_slice(&a.to_le_bytes());
        }
    }

    #[test]
    fn backward_conditional_becomes_loop() {
        // test: if i <= 10 then goto top (backward) ; NOP marks "top"
        let mut code = Vec::new();
        push_instr(&mut code, 0, &[]); // 0: top (NOP)
        push_instr(&mut code, 1, &[0]); // 2: PUSH i
        push_instr(&mut code, 71, &[0]); // 6: JUMPTRUE -> offset 0
        let (instructions, mut statements) = crate::disassemble::disassemble(&code, &[], CompilerTier::Pb120).unwrap();
        let scopes = classify(&instructions, &mut statements);
        let last = statements.len() - 1;
        assert!(matches!(statements[last].classification, Classification::LoopWhile | Classification::LoopUntil));
        assert!(!scopes.is_empty());
    }
}
