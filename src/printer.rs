//! Source printer (SPEC_FULL.md §4.8) and document assembly (§4.8.1,
//! grounded on the original's `write_class`/`write_group`).
//!
//! Two stages: `print_expression` walks the IR tree recursively, emitting
//! operand trees per opcode template with precedence-aware parenthesising;
//! `emit_statements` walks a script's statement list maintaining indent
//! depth and scope labels. `write_group`/`write_class` assemble the
//! per-class and per-group documents around those two primitives.

use std::fmt::Write as _;

use crate::arena::Arena;
use crate::class_group::model::{ClassDefinition, ClassGroup, Script, TypeKind, Variable};
use crate::control_flow::Classification;
use crate::data_table::DataTable;
use crate::disassemble::{Disassembly, Instruction};
use crate::opcode::Token;

pub struct PrintContext<'a> {
    pub locals: &'a [Variable<'a>],
    pub resources: Option<&'a DataTable>,
    pub unicode: bool,
    pub arena: &'a Arena,
}

/// Precedence-aware expression printer (SPEC_FULL.md §4.8 stage 1). Renders
/// the operand tree rooted at `inst_idx`; `budget` is the caller's incoming
/// precedence, used to decide whether this subtree needs parentheses.
pub fn print_expression(instructions: &[Instruction], inst_idx: usize, budget: u8, ctx: &PrintContext<'_>) -> String {
    let inst = &instructions[inst_idx];
    let body = render_template(instructions, inst, ctx);
    if inst.opcode.precedence < budget && inst.opcode.precedence > 0 {
        format!("({body})")
    } else {
        body
    }
}

fn render_template(instructions: &[Instruction], inst: &Instruction, ctx: &PrintContext<'_>) -> String {
    let mut out = String::new();
    let mut operand_index = 0u32;
    let infix = is_binary_infix(inst.opcode.template);
    for (_slot, tok) in inst.opcode.template.iter().enumerate() {
        match tok {
            Token::Stack(i) => {
                let Some(&operand) = inst.stack.get(*i as usize) else { continue };
                // The RHS of a binary operator recurses with a raised budget
                // so that a same-precedence right operand still fails the
                // `child.precedence < budget` test in print_expression and
                // gets parenthesised (SPEC_FULL.md §4.8 stage 1).
                let is_rhs = operand_index > 0 && infix;
                let budget = if is_rhs { inst.opcode.precedence.saturating_add(1) } else { inst.opcode.precedence };
                out.push_str(&print_expression(instructions, operand, budget, ctx));
                operand_index += 1;
            }
            Token::StackCsv | Token::StackDotCsv => {
                let sep = if matches!(tok, Token::StackDotCsv) { "." } else { ", " };
                let rendered: Vec<String> =
                    inst.stack.iter().map(|&o| print_expression(instructions, o, 0, ctx)).collect();
                out.push_str(&rendered.join(sep));
            }
            Token::Local(i) => {
                let idx = *inst.args.get(*i as usize).unwrap_or(&0) as usize;
                out.push_str(ctx.locals.get(idx).map(|v| v.name).unwrap_or("/* local */"));
            }
            Token::Shared(i) | Token::Ext(i) | Token::Type(i) => {
                let idx = inst.args.get(*i as usize).copied().unwrap_or(0);
                let _ = write!(out, "var_{idx}");
            }
            Token::ArgInt(i) => {
                let v = inst.args.get(*i as usize).copied().unwrap_or(0) as i16;
                let _ = write!(out, "{v}");
            }
            Token::ArgBool(i) => {
                let v = inst.args.get(*i as usize).copied().unwrap_or(0);
                out.push_str(if v != 0 { "true" } else { "false" });
            }
            Token::ArgLong(i) => {
                let v = inst.args.get(*i as usize).copied().unwrap_or(0) as i16;
                let _ = write!(out, "{v}");
            }
            Token::ArgLongHex(i) => {
                let v = inst.args.get(*i as usize).copied().unwrap_or(0);
                let _ = write!(out, "{v:#06x}");
            }
            Token::ArgCsv => {
                let parts: Vec<String> = inst.args.iter().map(|a| a.to_string()).collect();
                out.push_str(&parts.join(", "));
            }
            Token::MethodFlags(_) | Token::FuncClass => {}
            Token::Res(i) | Token::ResString(i) | Token::ResStringConst(i) => {
                let handle = inst.args.get(*i as usize).copied().unwrap_or(0xffff);
                if let Some(table) = ctx.resources {
                    if let Ok(rendered) = table.format_resource(None, handle, ctx.unicode, ctx.arena) {
                        out.push_str(rendered);
                    }
                }
            }
            Token::End => {}
            Token::Literal(s) => out.push_str(s),
        }
    }
    out
}

fn is_binary_infix(template: &[Token]) -> bool {
    matches!(template.first(), Some(Token::Stack(0))) && template.iter().any(|t| matches!(t, Token::Stack(1)))
}

/// Statement emission (SPEC_FULL.md §4.8 stage 2): walks a script's
/// statements in order, tracking indent depth via the scope tree, and
/// producing indentation-correct PowerScript text. Generated statements are
/// dropped unless `show_generated` is set.
pub fn emit_statements(disasm: &Disassembly, ctx: &PrintContext<'_>, show_generated: bool, out: &mut String) {
    let mut indent: i32 = 1;
    for (i, stmt) in disasm.statements.iter().enumerate() {
        if stmt.classification == Classification::Generated && !show_generated {
            continue;
        }
        for scope in &disasm.scopes {
            if scope.indent_start == i {
                if let Some(label) = scope.begin_label {
                    push_line(out, indent, label);
                }
                indent += 1;
            }
        }

        let text = render_statement(disasm, i, ctx);
        if !text.is_empty() {
            push_line(out, indent, &text);
        }

        for scope in &disasm.scopes {
            if scope.indent_end == i {
                indent = (indent - 1).max(0);
                if let Some(label) = scope.end_label {
                    push_line(out, indent, label);
                }
            }
        }

        if stmt.destination_count > 0 && stmt.classified_count == 0 {
            push_line(out, indent, &format!("Offset_{}:", stmt.start_offset));
        }
    }
}

fn push_line(out: &mut String, indent: i32, text: &str) {
    for _ in 0..indent.max(0) {
        out.push('\t');
    }
    out.push_str(text);
    out.push('\n');
}

fn render_statement(disasm: &Disassembly, idx: usize, ctx: &PrintContext<'_>) -> String {
    let stmt = &disasm.statements[idx];
    let expr = || print_expression(&disasm.instructions, stmt.end_inst, 0, ctx);
    match stmt.classification {
        Classification::ExceptionTry => "try".to_string(),
        Classification::ExceptionEndTry => "end try".to_string(),
        Classification::ExceptionCatch => "catch (exception e)".to_string(),
        Classification::ExceptionGosub => String::new(),
        Classification::DoWhile | Classification::LoopWhile => format!("do while {}", expr()),
        Classification::DoUntil | Classification::LoopUntil => format!("do until {}", expr()),
        Classification::JumpLoop | Classification::JumpNext => "loop".to_string(),
        Classification::IfThen => format!("if {} then", expr()),
        Classification::JumpElse => "else".to_string(),
        Classification::JumpElseif => format!("elseif {} then", expr()),
        Classification::JumpExit => "exit".to_string(),
        Classification::JumpContinue => "continue".to_string(),
        Classification::JumpGoto => format!("goto Offset_{}", stmt.start_offset),
        Classification::JumpTrue | Classification::JumpFalse => expr(),
        Classification::Generated => String::new(),
        _ => expr(),
    }
}

/// `write_forward`: the `forward` block (type declarations plus
/// non-user-defined globals), grounded on `output.c`'s `write_forward`.
fn write_forward(group: &ClassGroup<'_>, out: &mut String) {
    out.push_str("forward\n");
    for (name, class) in group.class_types() {
        let within = class.parent.map(|p| format!(" within {p}")).unwrap_or_default();
        let auto = if class.autoinstantiate { " autoinstantiate" } else { "" };
        let _ = writeln!(out, "\ttype {name} from {}{within}{auto}", class.ancestor);
        let _ = writeln!(out, "end type");
    }
    for v in &group.global_variables {
        if !v.flags.user_defined {
            let _ = writeln!(out, "\tglobal {} {}", v.type_name, v.name);
        }
    }
    out.push_str("end forward\n\n");
}

fn write_variable_decl(v: &Variable<'_>, out: &mut String) {
    let access = v.read_access.unwrap_or("");
    let modifiers = match (v.flags.constant, v.flags.indirect) {
        (true, true) => "constant indirect ",
        (true, false) => "constant ",
        (false, true) => "indirect ",
        (false, false) => "",
    };
    let dims = v.dimensions.unwrap_or("");
    let init = if v.initial_values.is_empty() { String::new() } else { format!(" = {}", v.initial_values.join(", ")) };
    let _ = writeln!(out, "{access}{modifiers}{}{dims} {}{init}", v.type_name, v.name);
}

/// `write_variables`: one declaration per line, grouped under a heading.
fn write_variables(heading: &str, vars: &[Variable<'_>], out: &mut String) {
    if vars.is_empty() {
        return;
    }
    let _ = writeln!(out, "{heading}");
    for v in vars {
        out.push('\t');
        write_variable_decl(v, out);
    }
    out.push('\n');
}

fn script_signature(script: &Script<'_>) -> String {
    let access = script.access.map(|a| format!("{a} ")).unwrap_or_default();
    let kw = if script.return_type.is_some() { "function" } else { "subroutine" };
    let ret = script.return_type.map(|r| format!("{r} ")).unwrap_or_default();
    let args: Vec<String> = script
        .arguments
        .iter()
        .map(|a| {
            let access = a.access.map(|x| format!("{x} ")).unwrap_or_default();
            let dims = a.dimensions.unwrap_or("");
            let name = a.name.unwrap_or("");
            format!("{access}{}{dims} {name}", a.type_name)
        })
        .collect();
    let throws = if script.throws.is_empty() { String::new() } else { format!(" throws ({})", script.throws.join(", ")) };
    let rpc = if script.rpc { " rpcfunc" } else { "" };
    let library =
        script.library.map(|l| format!(" library \"{l}\"")).unwrap_or_default();
    let alias = script.external_name.map(|a| format!(" alias for \"{a}\"")).unwrap_or_default();
    if script.event {
        format!("event {ret}{}({})", script.name, args.join(", "))
    } else {
        format!("{access}{ret}{kw} {}({}){throws}{rpc}{library}{alias}", script.name, args.join(", "))
    }
}

/// `write_script_body`: signature, local declarations, disassembled body,
/// `end function`/`end subroutine`/`end event` (grounded on `output.c`).
fn write_script_body(script: &Script<'_>, compiler_version: u16, unicode: bool, arena: &Arena, out: &mut String) {
    let _ = writeln!(out, "{};", script_signature(script));
    for v in &script.local_variables {
        out.push('\t');
        write_variable_decl(v, out);
    }
    if let Some(code) = script.code {
        let tier = crate::opcode::CompilerTier::for_version(compiler_version);
        if let Ok(disasm) = Disassembly::build(code, &script.debug_lines, tier) {
            let ctx = PrintContext {
                locals: &script.local_variables,
                resources: script.resources.as_ref(),
                unicode,
                arena,
            };
            emit_statements(&disasm, &ctx, false, out);
        }
    }
    let closer = if script.event { "end event" } else if script.return_type.is_some() { "end function" } else { "end subroutine" };
    let _ = writeln!(out, "{closer}\n");
}

/// `write_class` (grounded on `output.c`): type declaration, instance vars,
/// `end type`, then prototypes and implemented scripts (non-event first).
fn write_class(name: &str, class: &ClassDefinition<'_>, compiler_version: u16, unicode: bool, arena: &Arena, out: &mut String) {
    let within = class.parent.map(|p| format!(" within {p}")).unwrap_or_default();
    let _ = writeln!(out, "type {name} from {}{within}", class.ancestor);
    for v in &class.instance_variables {
        out.push('\t');
        write_variable_decl(v, out);
    }
    for s in class.scripts.iter().filter(|s| s.event && !s.in_ancestor) {
        let _ = writeln!(out, "\tevent {}", s.name);
    }
    out.push_str("end type\n\n");

    let external: Vec<&Script<'_>> = class.scripts.iter().filter(|s| s.library.is_some()).collect();
    if !external.is_empty() {
        out.push_str("type prototypes\n");
        for s in &external {
            let _ = writeln!(out, "\t{};", script_signature(s));
        }
        out.push_str("end prototypes\n\n");
    }

    write_variables("type variables", &class.instance_variables, out);

    let declared_only: Vec<&Script<'_>> =
        class.scripts.iter().filter(|s| !s.implemented() && s.library.is_none()).collect();
    if !declared_only.is_empty() {
        out.push_str("forward prototypes\n");
        for s in &declared_only {
            let _ = writeln!(out, "\t{};", script_signature(s));
        }
        out.push_str("end prototypes\n\n");
    }

    for s in class.scripts.iter().filter(|s| s.implemented() && !s.event) {
        write_script_body(s, compiler_version, unicode, arena, out);
    }
    for s in class.scripts.iter().filter(|s| s.implemented() && s.event) {
        write_script_body(s, compiler_version, unicode, arena, out);
    }
}

fn write_enum(name: &str, en: &crate::class_group::model::Enumeration<'_>, out: &mut String) {
    let _ = writeln!(out, "type {name} from enumeration");
    for (value_name, value) in &en.values {
        let _ = writeln!(out, "\t{value_name} = {value}");
    }
    out.push_str("end type\n\n");
}

/// `write_group` (grounded on `output.c`): forward block, shared variables,
/// global variables (intentionally repeating the forward block's globals —
/// both headings are valid PowerScript, see DESIGN.md), then each class.
pub fn write_group(group: &ClassGroup<'_>, unicode: bool, arena: &Arena) -> String {
    let mut out = String::new();
    write_forward(group, &mut out);

    let user_defined: Vec<Variable<'_>> = group.global_variables.iter().filter(|v| v.flags.user_defined).cloned().collect();
    let non_user_defined: Vec<Variable<'_>> = group.global_variables.iter().filter(|v| !v.flags.user_defined).cloned().collect();
    write_variables("shared variables", &user_defined, &mut out);
    write_variables("global variables", &non_user_defined, &mut out);

    for entry in &group.types {
        match &entry.kind {
            TypeKind::Class(class) => {
                write_class(entry.name, class, group.compiler_version, unicode, arena, &mut out)
            }
            TypeKind::Enum(en) => write_enum(entry.name, en, &mut out),
            TypeKind::InitSource | TypeKind::SharedSource | TypeKind::GlobalSource => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class_group::model::{AccessFlags, TypeEntry};
    use crate::opcode::CompilerTier;

    fn push_instr(buf: &mut Vec<u8>, id: u16, args: &[u16]) {
        buf.extend_from_slice(&id.to_le_bytes());
        for a in args {
            buf.extend_from_slice(&a.to_le_bytes());
        }
    }

    fn local(name: &'static str) -> Variable<'static> {
        Variable {
            read_access: None,
            write_access: None,
            type_name: "int",
            name,
            dimensions: None,
            initial_values: Vec::new(),
            flags: AccessFlags::default(),
        }
    }

    #[test]
    fn same_precedence_rhs_is_parenthesised() {
        // a - (b + c): PUSH a; PUSH b; PUSH c; ADD; SUB
        let mut code = Vec::new();
        push_instr(&mut code, 1, &[0]); // PUSH_LOCAL a
        push_instr(&mut code, 1, &[1]); // PUSH_LOCAL b
        push_instr(&mut code, 1, &[2]); // PUSH_LOCAL c
        push_instr(&mut code, 10, &[]); // ADD
        push_instr(&mut code, 11, &[]); // SUB

        let (instructions, _statements) =
            crate::disassemble::disassemble(&code, &[], CompilerTier::Pb120).unwrap();
        let locals = vec![local("a"), local("b"), local("c")];
        let arena = Arena::new();
        let ctx = PrintContext { locals: &locals, resources: None, unicode: false, arena: &arena };

        let last = instructions.len() - 1;
        let rendered = print_expression(&instructions, last, 0, &ctx);
        assert_eq!(rendered, "a - (b + c)");
    }

    #[test]
    fn trivial_class_s2_renders_forward_and_end_subroutine() {
        let arena = Arena::new();
        let class = ClassDefinition {
            ancestor: "nonvisualobject",
            parent: None,
            autoinstantiate: false,
            instance_variables: Vec::new(),
            scripts: vec![Script {
                name: "of_say",
                access: Some("public"),
                signature: None,
                external_name: None,
                library: None,
                return_type: None,
                event_type: None,
                local_variables: Vec::new(),
                arguments: Vec::new(),
                throws: Vec::new(),
                method_id: 1,
                method_number: 1,
                event: false,
                hidden: false,
                system: false,
                rpc: false,
                in_ancestor: false,
                code: Some(&[]),
                debug_lines: Vec::new(),
                resources: None,
            }],
        };
        let group = ClassGroup {
            compiler_version: 325,
            global_variables: Vec::new(),
            types: vec![TypeEntry { name: "u_hello", kind: TypeKind::Class(class) }],
        };
        let text = write_group(&group, false, &arena);
        assert!(text.starts_with("forward"));
        assert!(text.contains("type u_hello from nonvisualobject"));
        assert!(text.contains("end subroutine"));
        let _ = AccessFlags::default();
    }
}
