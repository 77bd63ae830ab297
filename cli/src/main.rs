mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "strider", about = "strider hybrid MPC solver CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configuration-space regulator benchmark on the analytic
    /// 7-joint chain
    Regulator {
        /// Newton iterations to run
        #[arg(long, default_value_t = 30)]
        iterations: usize,
        /// Worker threads of the solver pool
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Enable the filter line search
        #[arg(long)]
        line_search: bool,
        /// Path to a SolverOptions JSON file (overrides the defaults)
        #[arg(long)]
        options: Option<String>,
    },
    /// Run the hybrid benchmark: touch-down and lift-off events on a chain
    /// with point contacts
    Hybrid {
        /// Newton iterations to run
        #[arg(long, default_value_t = 20)]
        iterations: usize,
        /// Worker threads of the solver pool
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Impulse (touch-down) time inside the 1 s horizon
        #[arg(long, default_value_t = 0.33)]
        impulse_time: f64,
        /// Lift-off time inside the 1 s horizon
        #[arg(long, default_value_t = 0.62)]
        lift_time: f64,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Regulator { iterations, threads, line_search, options } => {
            commands::regulator::run(iterations, threads, line_search, options)
        }
        Commands::Hybrid { iterations, threads, impulse_time, lift_time } => {
            commands::hybrid::run(iterations, threads, impulse_time, lift_time)
        }
    }
}
