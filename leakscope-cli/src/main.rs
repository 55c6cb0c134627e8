mod app;
mod commands;
mod output;

use clap::Parser;

use crate::app::{Cli, Command};

fn main() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        eprintln!("\nCancelled.");
        std::process::exit(130);
    })?;

    let cli = Cli::parse();

    // Show leakscope info+ on stderr unless --json; --verbose enables debug; RUST_LOG overrides
    if !cli.global.json {
        let level = if cli.global.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };
        env_logger::Builder::new()
            .filter_module("leakscope", level)
            .parse_default_env()
            .target(env_logger::Target::Stderr)
            .format_timestamp(None)
            .format_module_path(false)
            .format_target(false)
            .init();
    }

    match &cli.command {
        Command::Info { path } => commands::info::run(path, &cli.global),
        Command::Disasm { path, method } => {
            commands::disasm::run(path, method.as_deref(), &cli.global)
        }
        Command::Instrument {
            path,
            output,
            suffix,
            options,
            target,
            dispose,
            tracker,
            token,
            class_name,
        } => commands::instrument::run(
            path,
            &commands::instrument::InstrumentOptions {
                output: output.as_deref(),
                suffix,
                options: options.as_deref(),
                target: target.as_deref(),
                dispose: dispose.as_deref(),
                tracker: tracker.as_deref(),
                token: token.as_deref(),
                class_name: class_name.as_deref(),
                global: &cli.global,
            },
        ),
    }
}
