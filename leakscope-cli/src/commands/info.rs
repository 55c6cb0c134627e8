use std::path::Path;

use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{flag_names, load_class},
    output::{print_output, Align, Columns},
};

#[derive(Debug, Serialize)]
pub struct ClassInfo {
    pub name: String,
    pub version: String,
    pub access: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub super_class: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    pub constant_pool_size: usize,
    pub field_count: usize,
    pub method_count: usize,
    pub methods: Vec<MethodSummary>,
}

#[derive(Debug, Serialize)]
pub struct MethodSummary {
    pub name: String,
    pub descriptor: String,
    pub access: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_stack: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_locals: Option<u16>,
}

pub fn run(path: &Path, opts: &GlobalOptions) -> anyhow::Result<()> {
    let (_, class) = load_class(path)?;
    let pool = &class.constant_pool;

    let mut methods = Vec::with_capacity(class.methods().len());
    for method in class.methods() {
        let code = method.code(pool)?;
        methods.push(MethodSummary {
            name: method.name(pool)?.into_owned(),
            descriptor: method.descriptor(pool)?.into_owned(),
            access: flag_names(method.access_flags.iter_names()),
            code_length: code.as_ref().map(|code| code.code.len()),
            max_stack: code.as_ref().map(|code| code.max_stack),
            max_locals: code.as_ref().map(|code| code.max_locals),
        });
    }

    let interfaces = class
        .interfaces
        .iter()
        .map(|index| pool.class_name(*index).map(|name| name.into_owned()))
        .collect::<leakscope::Result<Vec<_>>>()?;

    let info = ClassInfo {
        name: class.name()?.into_owned(),
        version: format!("{}.{}", class.major_version, class.minor_version),
        access: flag_names(class.access_flags.iter_names()),
        super_class: class.super_name()?.map(|name| name.into_owned()),
        interfaces,
        constant_pool_size: pool.len(),
        field_count: class.fields.len(),
        method_count: class.methods().len(),
        methods,
    };

    print_output(&info, opts, |info| {
        println!("Class:          {}", info.name);
        println!("Version:        {}", info.version);
        println!("Access:         {}", info.access);
        if let Some(super_class) = &info.super_class {
            println!("Super class:    {super_class}");
        }
        if !info.interfaces.is_empty() {
            println!("Interfaces:     {}", info.interfaces.join(", "));
        }
        println!("Constant pool:  {}", info.constant_pool_size);
        println!("Fields:         {}", info.field_count);
        println!("Methods:        {}", info.method_count);

        if !info.methods.is_empty() {
            println!("\nMethods:");
            let mut columns = Columns::new(&[
                ("Name", Align::Left),
                ("Descriptor", Align::Left),
                ("Access", Align::Left),
                ("Code", Align::Right),
                ("Stack", Align::Right),
                ("Locals", Align::Right),
            ])
            .indent("  ");
            let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
            for method in &info.methods {
                columns.row(vec![
                    method.name.clone(),
                    method.descriptor.clone(),
                    method.access.clone(),
                    or_dash(method.code_length.map(|len| len.to_string())),
                    or_dash(method.max_stack.map(|value| value.to_string())),
                    or_dash(method.max_locals.map(|value| value.to_string())),
                ]);
            }
            columns.print();
        }
    })
}
