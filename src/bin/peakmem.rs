use clap::Parser;
use log::{debug, error};
use peakmem::config::{
    Backend, MemoryUnit, MonitorConfig, OutputConfig, PeakConfig, ReportFormat, Scope,
};
use peakmem::core::constants::{exit_codes, LOG_ENV};
use peakmem::{run_monitor, CommandSpec, PeakError, Result};
use std::ffi::OsString;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::exit;

/// Run a command and report the peak resident memory of its process tree.
///
/// The command's stdin, stdout and stderr are passed through untouched. The
/// peak is printed on stderr once the command has exited, and peakmem exits
/// with the command's exit status (128+N if it was killed by signal N, 127
/// if it was not found, 126 if it could not be executed, 125 on an internal
/// failure).
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about)]
struct Args {
    /// Sampling interval in milliseconds
    #[clap(short, long, value_name = "MS", default_value = "1000")]
    interval: u64,

    /// How to read the process table
    #[clap(short, long, value_enum, default_value_t = Backend::Ps)]
    backend: Backend,

    /// Sum every process in the table instead of the command's process tree
    #[clap(long)]
    all_processes: bool,

    /// Unit for the reported peak
    #[clap(short, long, value_enum, default_value_t = MemoryUnit::Kb)]
    unit: MemoryUnit,

    /// Emit the report as a single JSON object
    #[clap(short, long)]
    json: bool,

    /// Write the report to FILE instead of stderr
    #[clap(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Disable colored output
    #[clap(long)]
    no_color: bool,

    /// Command to run, followed by its arguments
    #[clap(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<OsString>,
}

impl Args {
    fn into_parts(self) -> Result<(CommandSpec, PeakConfig)> {
        let monitor = MonitorConfig::builder()
            .interval_ms(self.interval)
            .backend(self.backend)
            .scope(if self.all_processes {
                Scope::System
            } else {
                Scope::Tree
            })
            .build()?;

        let color = !self.no_color && self.output.is_none() && io::stderr().is_terminal();
        let output = OutputConfig {
            format: if self.json {
                ReportFormat::Json
            } else {
                ReportFormat::Human
            },
            unit: self.unit,
            path: self.output,
            color,
        };

        let command = CommandSpec::from_argv(self.command)?;
        Ok((command, PeakConfig { monitor, output }))
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or(LOG_ENV, "warn")).init();

    let args = Args::parse();
    let (command, config) = match args.into_parts() {
        Ok(parts) => parts,
        Err(err) => fail(err),
    };
    colored::control::set_override(config.output.color);

    // The terminal sends SIGINT to the child as well; stay alive to report
    // whatever the child does with it.
    if let Err(err) = ctrlc::set_handler(|| debug!("interrupt received, waiting for child")) {
        error!("could not install interrupt handler: {}", err);
        exit(exit_codes::SUPERVISOR_FAILURE);
    }

    match run_monitor(&command, &config) {
        Ok(code) => exit(code),
        Err(err) => fail(err),
    }
}

fn fail(err: PeakError) -> ! {
    // best effort: stderr may be the thing that failed
    let _ = writeln!(io::stderr(), "peakmem: {}", err);
    exit(err.exit_code());
}
