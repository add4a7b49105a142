use std::{path::PathBuf, process::ExitCode};

use clap::{CommandFactory, Parser as ClapParser, error::ErrorKind};
use rrc::{
    CompileOptions, DEFAULT_ERROR_CAP, OptLevel, compile,
    frontend::{SourceFile, SourceFileOrigin},
};

#[derive(Debug, ClapParser)]
#[command(version, about = "Compiles RR source into runnable R", long_about = None)]
pub struct Args {
    /// RR source file to compile
    source_file: PathBuf,

    /// Where to write the generated R (defaults to the input with a .R
    /// extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Optimization level: -O0 (none), -O1 (basic), -O2 (full)
    #[arg(short = 'O', default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=2))]
    opt_level: u8,

    /// Configure the generated program's runtime guards as cheap
    /// passthroughs
    #[arg(long)]
    no_runtime: bool,

    /// Annotate generated statements with their RR source lines
    #[arg(long)]
    comments: bool,

    /// Maximum number of syntax errors collected before the parse gives up
    #[arg(long, default_value_t = DEFAULT_ERROR_CAP)]
    error_cap: usize,

    /// Print the optimized MIR to stderr
    #[arg(long)]
    dump_mir: bool,
}

fn main() -> ExitCode {
    env_logger::init();

    let args = Args::parse();

    if !args.source_file.exists() {
        Args::command()
            .error(
                ErrorKind::InvalidValue,
                format!("Source file '{}' does not exist!", args.source_file.display()),
            )
            .exit()
    }

    if !args.source_file.is_file() {
        Args::command()
            .error(
                ErrorKind::InvalidValue,
                format!("Input path '{}' is not a file!", args.source_file.display()),
            )
            .exit()
    }

    let contents = match std::fs::read_to_string(&args.source_file) {
        Ok(contents) => contents,
        Err(error) => {
            eprintln!(
                "error: failed to read '{}': {error}",
                args.source_file.display()
            );
            return ExitCode::FAILURE;
        }
    };

    let source = SourceFile {
        contents,
        origin: SourceFileOrigin::File(args.source_file.clone()),
    };

    let options = CompileOptions {
        opt_level: match args.opt_level {
            0 => OptLevel::None,
            1 => OptLevel::Basic,
            _ => OptLevel::Full,
        },
        emit_comments: args.comments,
        error_cap: args.error_cap,
        runtime_checks: !args.no_runtime,
        dump_mir: args.dump_mir,
    };

    let output = compile(&source, &options);

    for diagnostic in &output.diagnostics {
        eprint!("{}", diagnostic.render(&source));
    }

    if let Some(dump) = &output.mir_dump {
        eprint!("{dump}");
    }

    let Some(r_source) = output.r_source else {
        eprintln!("error: could not compile '{}'", args.source_file.display());
        return ExitCode::FAILURE;
    };

    let output_path = args
        .output
        .unwrap_or_else(|| args.source_file.with_extension("R"));

    if let Err(error) = std::fs::write(&output_path, r_source) {
        eprintln!(
            "error: failed to write '{}': {error}",
            output_path.display()
        );
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
