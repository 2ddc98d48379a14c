// CLI binary: errors are reported to stderr and end the process.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::Level;

use cover::computation::ComputationResult;
use cover::dsl::builtins::BUILTINS;
use cover::error::CoverError;
use cover::files::{read_json, write_json};
use cover::settings::{self, Settings};
use cover::state::{HostState, RunOutcome};

// ── CLI argument parsing ─────────────────────────────────────────

#[derive(Parser)]
#[command(name = "cover", about = "Interpreter for a small C subset", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a script and run its main()
    Run {
        /// Script path, or "-" for stdin
        file: String,
        /// Computation result to start from (JSON)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Where to write the final computation result (JSON)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Print the final computation result to stdout
        #[arg(long)]
        print_result: bool,
    },
    /// Compile a script and report diagnostics without running it
    Check { file: PathBuf },
    /// List the builtin functions
    Builtins,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Settings, CoverError> {
    match path {
        Some(path) => settings::load_settings(path),
        None => Ok(Settings::default()),
    }
}

// ── Commands ─────────────────────────────────────────────────────

fn run_script(
    settings: Settings,
    file: &str,
    input: Option<&Path>,
    output: Option<&Path>,
    print_result: bool,
) -> Result<(), CoverError> {
    let input: ComputationResult = match input {
        Some(path) => read_json(path)?,
        None => ComputationResult::default(),
    };
    let report_exit_code = settings.report_exit_code;
    let state = HostState::new(settings);

    let mut stdout = std::io::stdout();
    let RunOutcome { exit_code, result } = if file == "-" {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source)?;
        state.run_source(&source, input, &mut stdout)?
    } else {
        state.run_file(Path::new(file), input, &mut stdout)?
    };

    if let (Some(code), true) = (exit_code, report_exit_code) {
        println!("Program exited with code: {code}");
    }
    if print_result {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    if let Some(path) = output {
        write_json(path, &result)?;
    }
    stdout.flush()?;
    Ok(())
}

fn check_script(settings: &Settings, file: &Path) -> Result<(), CoverError> {
    let program = cover::dsl::compile_file(file, settings)?;
    println!(
        "OK: {} function(s), main {}",
        program.functions.len(),
        if program.main.is_some() { "found" } else { "missing" }
    );
    Ok(())
}

fn list_builtins() {
    let mut category = "";
    for builtin in BUILTINS {
        if builtin.category != category {
            category = builtin.category;
            println!("\n{category}:");
        }
        println!("  {:<48} {}", builtin.signature(), builtin.description);
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = load_config(cli.config.as_deref()).and_then(|settings| match cli.command {
        Commands::Run {
            file,
            input,
            output,
            print_result,
        } => run_script(
            settings,
            &file,
            input.as_deref(),
            output.as_deref(),
            print_result,
        ),
        Commands::Check { file } => check_script(&settings, &file),
        Commands::Builtins => {
            list_builtins();
            Ok(())
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
