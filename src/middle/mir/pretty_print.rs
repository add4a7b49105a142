use colored::Colorize;
use itertools::Itertools;

use crate::{
    index::Index,
    middle::mir::{
        Callee, Constant, Function, InstrKind, Operand, Terminator,
    },
};

/// Renders a function's control-flow graph as readable text, mostly for
/// `--dump-mir` and test snapshots.
pub fn pretty_print_function(function: &Function) -> String {
    let mut out = String::new();

    let params = function
        .params
        .iter()
        .map(|param| param.name.value())
        .join(", ");

    out.push_str(&format!(
        "{} {}({}) {{\n",
        "fn".magenta(),
        function.name.value().blue(),
        params
    ));

    for (id, block) in function.blocks.enumerate() {
        out.push_str(&format!("{}\n", format!("bb{}:", id.index()).bright_red()));

        for instruction in &block.instructions {
            out.push_str(&format!("    {}\n", render_instruction(function, &instruction.kind)));
        }

        let terminator = match &block.terminator {
            Terminator::Goto(target) => {
                format!("{} bb{}", "goto".cyan(), target.index())
            }
            Terminator::Branch {
                condition,
                then_block,
                else_block,
            } => format!(
                "{} {} bb{} bb{}",
                "br".cyan(),
                render_operand(function, condition),
                then_block.index(),
                else_block.index()
            ),
            Terminator::Return(Some(value)) => {
                format!("{} {}", "ret".cyan(), render_operand(function, value))
            }
            Terminator::Return(None) => format!("{}", "ret".cyan()),
        };
        out.push_str(&format!("    {terminator}\n"));
    }

    out.push_str("}\n");
    out
}

fn render_instruction(function: &Function, kind: &InstrKind) -> String {
    let slot = |id| render_slot(function, id);
    let operand = |op| render_operand(function, op);

    match kind {
        InstrKind::Copy { dst, src } => format!("{} = {}", slot(*dst), operand(src)),
        InstrKind::Unary { dst, op, operand: o, .. } => {
            format!("{} = {op:?} {}", slot(*dst), operand(o))
        }
        InstrKind::Binary {
            dst,
            op,
            lhs,
            rhs,
            kind,
        } => format!(
            "{} = {op:?}<{kind:?}> {} {}",
            slot(*dst),
            operand(lhs),
            operand(rhs)
        ),
        InstrKind::Call {
            dst,
            callee,
            args,
            pure,
        } => {
            let callee = match callee {
                Callee::Fn(id) => format!("fn#{}", id.index()),
                Callee::Builtin(builtin) => builtin.name().to_owned(),
            };
            let args = args.iter().map(operand).join(", ");
            let prefix = match dst {
                Some(dst) => format!("{} = ", slot(*dst)),
                None => String::new(),
            };
            let suffix = if *pure { "" } else { " !" };

            format!("{prefix}{}({args}){suffix}", callee.green())
        }
        InstrKind::IndexRead { dst, base, index } => {
            format!("{} = {}[{}]", slot(*dst), operand(base), operand(index))
        }
        InstrKind::IndexWrite { base, index, value } => {
            format!("{}[{}] = {}", slot(*base), operand(index), operand(value))
        }
        InstrKind::FieldRead { dst, base, field } => {
            format!("{} = {}${}", slot(*dst), operand(base), field.value())
        }
        InstrKind::FieldWrite { base, field, value } => {
            format!("{}${} = {}", slot(*base), field.value(), operand(value))
        }
        InstrKind::MakeVector { dst, elements } => {
            format!("{} = [{}]", slot(*dst), elements.iter().map(operand).join(", "))
        }
        InstrKind::MakeRecord { dst, fields } => {
            let fields = fields
                .iter()
                .map(|(name, value)| format!("{}: {}", name.value(), operand(value)))
                .join(", ");
            format!("{} = {{{fields}}}", slot(*dst))
        }
        InstrKind::Range { dst, start, end } => {
            format!("{} = {}..{}", slot(*dst), operand(start), operand(end))
        }
        InstrKind::Phi { dst, sources } => {
            let sources = sources
                .iter()
                .map(|(block, value)| format!("bb{} -> {}", block.index(), operand(value)))
                .join(", ");
            format!("{} = {}({sources})", slot(*dst), "phi".bright_green())
        }
    }
}

pub fn render_slot(function: &Function, id: super::SlotId) -> String {
    match function.slots[id].name {
        Some(name) => format!("%{}", name.value()).yellow().to_string(),
        None => format!("%t{}", id.index()).yellow().to_string(),
    }
}

pub fn render_operand(function: &Function, operand: &Operand) -> String {
    match operand {
        Operand::Slot(slot) => render_slot(function, *slot),
        Operand::Const(constant) => render_constant(constant).purple().to_string(),
    }
}

pub fn render_constant(constant: &Constant) -> String {
    match constant {
        Constant::Int(value) => format!("{value}L"),
        Constant::Double(value) => format!("{value:?}"),
        Constant::Logical(true) => "TRUE".to_owned(),
        Constant::Logical(false) => "FALSE".to_owned(),
        Constant::Str(value) => format!("{value:?}"),
        Constant::Null => "NULL".to_owned(),
    }
}
