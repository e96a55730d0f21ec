//! Runs the PMP access-control case sequence against the software hart.

use std::env;
use std::ffi::OsString;
use std::io::{self, Write};

use env_logger::Env;
use pmp_core::{Console, Harness, HarnessConfig, HarnessError, SimHart};

const USAGE_TEXT: &str = "\
Usage: pmp-harness [options]

Runs the six machine- and user-mode access-control cases and prints one
verdict per case followed by PASS or the failure count.

Options:
  -h, --help  Show this help message

Environment:
  RUST_LOG    Log filter for diagnostics on stderr (default: warn)

Exit status:
  0  every case passed
  1  one or more cases failed, or the shared regions could not be configured
  2  the trap handler halted on an unexpected condition
";

#[derive(Debug, PartialEq, Eq)]
enum ParseResult {
    Run,
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    match args.next() {
        None => Ok(ParseResult::Run),
        Some(arg) if arg == "-h" || arg == "--help" => Ok(ParseResult::Help),
        Some(arg) => Err(format!("unexpected argument: {}", arg.to_string_lossy())),
    }
}

/// Console backed by standard output.
struct StdoutConsole {
    out: io::Stdout,
}

impl Console for StdoutConsole {
    fn puts(&mut self, text: &str) {
        if let Err(error) = self.out.write_all(text.as_bytes()) {
            log::error!("console write failed: {error}");
        }
    }
}

fn run() -> i32 {
    let config = HarnessConfig::default();
    let console = StdoutConsole { out: io::stdout() };
    let mut harness = Harness::new(SimHart::new(&config), console, config);

    let code = match harness.run_suite() {
        Ok(report) if report.all_passed() => 0,
        Ok(_) | Err(HarnessError::Setup(_)) => 1,
        Err(error @ (HarnessError::Fatal(_) | HarnessError::Transition(_))) => {
            log::error!("run halted: {error}");
            2
        }
    };

    let (hart, mut console) = harness.into_parts();
    if let Err(error) = console.out.flush() {
        log::error!("console flush failed: {error}");
    }
    log::info!(
        "{} traps taken, {} access faults",
        hart.traps_taken(),
        hart.access_faults_taken()
    );
    code
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Run) => run(),
        Err(error) => {
            eprintln!("error: {error}");
            eprintln!("{USAGE_TEXT}");
            1
        }
    };

    std::process::exit(exit_code);
}
