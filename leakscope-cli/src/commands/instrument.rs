use std::{borrow::Cow, path::Path, str::FromStr};

use anyhow::{anyhow, Context};
use leakscope::{instrument::TransformSummary, AgentConfig, ClassTransformer, TokenSource};
use log::info;
use serde::Serialize;

use crate::{
    app::GlobalOptions,
    commands::common::{file_display_name, load_class, resolve_output_path},
};

pub struct InstrumentOptions<'a> {
    pub output: Option<&'a Path>,
    pub suffix: &'a str,
    pub options: Option<&'a str>,
    pub target: Option<&'a str>,
    pub dispose: Option<&'a str>,
    pub tracker: Option<&'a str>,
    pub token: Option<&'a str>,
    pub class_name: Option<&'a str>,
    pub global: &'a GlobalOptions,
}

#[derive(Debug, Serialize)]
struct InstrumentReport {
    file: String,
    class: String,
    target: String,
    instrumented: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    methods: Vec<MethodReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dropped_attributes: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MethodReport {
    name: String,
    descriptor: String,
    event: String,
    blocks: usize,
    max_stack: u16,
    max_locals: u16,
}

fn build_config(opts: &InstrumentOptions) -> anyhow::Result<AgentConfig> {
    let mut config = match opts.options {
        Some(options) => AgentConfig::parse_options(options)?,
        None => AgentConfig::default(),
    };
    if let Some(target) = opts.target {
        config = config.with_target(target);
    }
    if let Some(dispose) = opts.dispose {
        config = config.with_dispose(dispose);
    }
    if let Some(tracker) = opts.tracker {
        config = config.with_tracker(tracker);
    }
    if let Some(token) = opts.token {
        let token = TokenSource::from_str(token)
            .map_err(|_| anyhow!("token must be 'identity' or 'tracker', got '{token}'"))?;
        config = config.with_token(token);
    }
    Ok(config)
}

/// Runs the transformer the way a class-load hook would. `None` means the class was passed
/// through unchanged.
fn transform_class(
    transformer: &ClassTransformer,
    class_name: &str,
    bytes: &[u8],
) -> anyhow::Result<Option<(Vec<u8>, TransformSummary)>> {
    let (output, summary) = transformer
        .transform_with_summary(class_name, bytes)
        .with_context(|| format!("failed to instrument {class_name}"))?;
    match (output, summary) {
        (Cow::Owned(output), Some(summary)) => Ok(Some((output, summary))),
        _ => Ok(None),
    }
}

pub fn run(path: &Path, opts: &InstrumentOptions) -> anyhow::Result<()> {
    let config = build_config(opts)?;
    let (bytes, class) = load_class(path)?;
    let class_name = match opts.class_name {
        Some(name) => name.to_string(),
        None => class.name()?.into_owned(),
    };
    let transformer = ClassTransformer::new(config.clone());

    let mut report = InstrumentReport {
        file: file_display_name(path),
        class: class_name.clone(),
        target: config.target.clone(),
        instrumented: false,
        output: None,
        methods: Vec::new(),
        skipped: Vec::new(),
        dropped_attributes: Vec::new(),
    };

    if let Some((output, summary)) = transform_class(&transformer, &class_name, &bytes)? {
        let output_path = resolve_output_path(path, opts.output, opts.suffix);
        std::fs::write(&output_path, output)
            .with_context(|| format!("failed to write output: {}", output_path.display()))?;
        info!("Wrote {}", output_path.display());

        report.instrumented = true;
        report.output = Some(output_path.display().to_string());
        report.methods = summary
            .methods
            .iter()
            .map(|method| MethodReport {
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                event: method.kind.to_string(),
                blocks: method.blocks,
                max_stack: method.max_stack,
                max_locals: method.max_locals,
            })
            .collect();
        report.skipped = summary.skipped;
        report.dropped_attributes = summary.dropped_attributes;
    }

    if opts.global.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if !report.instrumented {
        eprintln!(
            "{} is not the target {}, nothing to do",
            report.class, report.target
        );
        return Ok(());
    }

    eprintln!(
        "Instrumented {} -> {}",
        report.file,
        report.output.as_deref().unwrap_or_default()
    );
    for method in &report.methods {
        eprintln!(
            "  {}{}  {} block(s) ({}), stack={} locals={}",
            method.name,
            method.descriptor,
            method.blocks,
            method.event,
            method.max_stack,
            method.max_locals
        );
    }
    for skipped in &report.skipped {
        eprintln!("  skipped {skipped} (no body)");
    }
    if !report.dropped_attributes.is_empty() {
        eprintln!("  dropped: {}", report.dropped_attributes.join(", "));
    }
    Ok(())
}
