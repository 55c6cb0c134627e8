use std::{
    io::{self, BufWriter, Write},
    path::Path,
};

use anyhow::bail;
use leakscope::{
    assembly::{decode_stream, Instruction, Operand},
    classfile::{Constant, ConstantPool},
    ClassFile,
};
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{flag_names, load_class},
};

#[derive(Debug, Serialize)]
struct MethodListing {
    name: String,
    descriptor: String,
    access: String,
    max_stack: u16,
    max_locals: u16,
    instructions: Vec<InstructionLine>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    exception_table: Vec<HandlerLine>,
}

#[derive(Debug, Serialize)]
struct InstructionLine {
    offset: u32,
    mnemonic: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    operand: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
}

#[derive(Debug, Serialize)]
struct HandlerLine {
    start: u16,
    end: u16,
    handler: u16,
    catch_type: String,
}

pub fn run(path: &Path, method_filter: Option<&str>, opts: &GlobalOptions) -> anyhow::Result<()> {
    let (_, class) = load_class(path)?;
    let listings = collect(&class, method_filter)?;

    if let Some(name) = method_filter {
        if listings.is_empty() {
            bail!("no method named '{name}' with a body found");
        }
    }

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    let stdout = io::stdout();
    let mut w = BufWriter::new(stdout.lock());
    writeln!(w, "class {}", class.name()?)?;
    for listing in &listings {
        write_listing(&mut w, listing)?;
    }
    w.flush()?;
    Ok(())
}

fn collect(class: &ClassFile, method_filter: Option<&str>) -> anyhow::Result<Vec<MethodListing>> {
    let pool = &class.constant_pool;
    let mut listings = Vec::new();

    for method in class.methods() {
        let name = method.name(pool)?;
        if method_filter.is_some_and(|filter| filter != name) {
            continue;
        }
        let Some(code) = method.code(pool)? else {
            continue;
        };

        let instructions = decode_stream(&code.code)?
            .iter()
            .map(|instruction| InstructionLine {
                offset: instruction.offset,
                mnemonic: instruction.mnemonic,
                operand: instruction.operand.to_string(),
                comment: describe(instruction, pool),
            })
            .collect();

        let exception_table = code
            .exception_table
            .iter()
            .map(|handler| HandlerLine {
                start: handler.start_pc,
                end: handler.end_pc,
                handler: handler.handler_pc,
                catch_type: if handler.catch_type == 0 {
                    "any".to_string()
                } else {
                    pool.class_name(handler.catch_type)
                        .map_or_else(|_| format!("#{}", handler.catch_type), |n| n.into_owned())
                },
            })
            .collect();

        listings.push(MethodListing {
            name: name.into_owned(),
            descriptor: method.descriptor(pool)?.into_owned(),
            access: flag_names(method.access_flags.iter_names()),
            max_stack: code.max_stack,
            max_locals: code.max_locals,
            instructions,
            exception_table,
        });
    }

    Ok(listings)
}

/// Resolves the constant an instruction refers to, javap style.
fn describe(instruction: &Instruction, pool: &ConstantPool) -> Option<String> {
    let index = match instruction.operand {
        Operand::Constant(index)
        | Operand::InvokeInterface { index, .. }
        | Operand::MultiArray { index, .. } => index,
        _ => return None,
    };

    let text = match pool.get(index).ok()? {
        Constant::FieldRef { .. } => format!("Field {}", pool.member_ref(index).ok()?),
        Constant::MethodRef { .. } => format!("Method {}", pool.member_ref(index).ok()?),
        Constant::InterfaceMethodRef { .. } => {
            format!("InterfaceMethod {}", pool.member_ref(index).ok()?)
        }
        Constant::Class { .. } => format!("class {}", pool.class_name(index).ok()?),
        Constant::String { string_index } => {
            format!("String {:?}", pool.utf8(*string_index).ok()?)
        }
        Constant::Integer(value) => format!("int {value}"),
        Constant::Long(value) => format!("long {value}l"),
        Constant::Float(bits) => format!("float {}f", f32::from_bits(*bits)),
        Constant::Double(bits) => format!("double {}d", f64::from_bits(*bits)),
        Constant::InvokeDynamic { .. } => {
            format!("InvokeDynamic {}", pool.invoke_dynamic_descriptor(index).ok()?)
        }
        _ => return None,
    };
    Some(text)
}

fn write_listing(w: &mut impl Write, listing: &MethodListing) -> io::Result<()> {
    writeln!(w)?;
    writeln!(
        w,
        "  {} {}{}",
        listing.access, listing.name, listing.descriptor
    )?;
    writeln!(
        w,
        "    stack={}, locals={}",
        listing.max_stack, listing.max_locals
    )?;
    for line in &listing.instructions {
        write!(w, "    {:>5}: {:<15}", line.offset, line.mnemonic)?;
        if !line.operand.is_empty() {
            write!(w, " {}", line.operand)?;
        }
        if let Some(comment) = &line.comment {
            write!(w, "  // {comment}")?;
        }
        writeln!(w)?;
    }
    if !listing.exception_table.is_empty() {
        writeln!(w, "    Exception table:")?;
        writeln!(w, "       from    to  target  type")?;
        for handler in &listing.exception_table {
            writeln!(
                w,
                "      {:>5} {:>5} {:>7}  {}",
                handler.start, handler.end, handler.handler, handler.catch_type
            )?;
        }
    }
    Ok(())
}
