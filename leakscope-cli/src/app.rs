use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// leakscope - JVM class file inspection and leak tracking instrumentation
#[derive(Debug, Parser)]
#[command(name = "leakscope", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Display class overview: name, version, super class, counts, and methods.
    Info {
        /// Path to the .class file.
        #[arg(value_name = "CLASS")]
        path: PathBuf,
    },

    /// Disassemble method bodies (javap-style output).
    Disasm {
        /// Path to the .class file.
        #[arg(value_name = "CLASS")]
        path: PathBuf,

        /// Disassemble only methods with this name.
        #[arg(long, value_name = "NAME")]
        method: Option<String>,
    },

    /// Instrument the lifecycle methods of the target class.
    Instrument {
        /// Path to the .class file.
        #[arg(value_name = "CLASS")]
        path: PathBuf,

        /// Output file or directory.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Output filename suffix (default: "_instrumented").
        #[arg(long, default_value = "_instrumented")]
        suffix: String,

        /// Agent option string, e.g. "target=a.b.C,dispose=close".
        #[arg(long, value_name = "OPTIONS")]
        options: Option<String>,

        /// Target class (dotted or internal form). Defaults to the agent default.
        #[arg(long, value_name = "CLASS")]
        target: Option<String>,

        /// Zero-argument disposal method name.
        #[arg(long, value_name = "NAME")]
        dispose: Option<String>,

        /// Class receiving the static add/remove/token calls.
        #[arg(long, value_name = "CLASS")]
        tracker: Option<String>,

        /// Identity token source: identity or tracker.
        #[arg(long, value_name = "SOURCE")]
        token: Option<String>,

        /// Name the class is loaded under (dotted or internal form). Defaults to its own name.
        #[arg(long, value_name = "NAME")]
        class_name: Option<String>,
    },
}
