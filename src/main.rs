use std::process;

use clap::{Parser, Subcommand};

use mutexec::output;
use mutexec::test_runner::RunnerRegistry;
use mutexec::worker::{self, WorkerArgs};

#[derive(Parser)]
#[command(name = "mutexec", version, about = "Sandboxed mutant execution engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a test runner worker process. Spawned by the engine, one per
    /// sandbox slot; not meant for interactive use.
    Worker {
        /// Registered test runner implementation to host
        #[arg(long)]
        runner: String,
        /// Port assigned to this worker's sandbox slot
        #[arg(long, default_value = "0")]
        port: u16,
        /// Log level for worker diagnostics on stderr
        #[arg(long, default_value = "info")]
        log_level: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Worker {
            runner,
            port,
            log_level,
        } => {
            let args = WorkerArgs {
                runner,
                port,
                log_level,
            };
            match worker::run_worker(&args, &RunnerRegistry::with_builtins()) {
                Ok(()) => 0,
                Err(e) => {
                    output::print_error(&format!("worker failed: {}", e));
                    1
                }
            }
        }
    };

    process::exit(exit_code);
}
