//! CLI entry point: `tinyvm <path> [-D {0|1|2|3}]`.

use std::path::PathBuf;
use std::process::ExitCode;

use log::{info, warn};

use tinyvm::debug::{DebugLevel, StdinStepGate};
use tinyvm::engine::{run_to_completion, Cpu};
use tinyvm::loader;

struct Args {
    path: PathBuf,
    debug: DebugLevel,
}

fn parse_args() -> Result<Args, String> {
    let mut argv = std::env::args().skip(1);
    let mut path = None;
    let mut debug = DebugLevel::FinalDumpOnly;

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "-D" => {
                let level = argv
                    .next()
                    .ok_or_else(|| "-D requires an argument".to_string())?;
                let level: u8 = level
                    .parse()
                    .map_err(|_| format!("-D expects a number, got {level:?}"))?;
                debug = DebugLevel::from_level(level)
                    .ok_or_else(|| format!("-D must be 0, 1, 2 or 3, got {level}"))?;
            }
            other if path.is_none() => path = Some(PathBuf::from(other)),
            other => return Err(format!("unexpected argument: {other}")),
        }
    }

    let path = path.ok_or_else(|| "usage: tinyvm <path> [-D {0|1|2|3}]".to_string())?;
    Ok(Args { path, debug })
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let source = match std::fs::read_to_string(&args.path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("failed to read {}: {err}", args.path.display());
            return ExitCode::FAILURE;
        }
    };

    let (image, warnings) = loader::load(&source);
    for warning in &warnings {
        warn!("{warning}");
        eprintln!("warning: {warning}");
    }
    info!(
        "loaded {}: {} data entries, {} instructions, {} loader warnings",
        args.path.display(),
        image.data.len(),
        image.instructions.len(),
        warnings.len(),
    );

    let mut cpu = match Cpu::new(image, args.debug) {
        Ok(cpu) => cpu,
        Err(err) => {
            eprintln!("failed to build program image: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut step_gate = StdinStepGate;
    match run_to_completion(&mut cpu, &mut step_gate) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("engine error: {err}");
            ExitCode::FAILURE
        }
    }
}
