use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

/// Strata incremental build tool for modular Fortran projects.
///
/// Discovers programs, modules and submodules under the source root, resolves
/// their `use` dependencies and compiles only what changed.
///
/// EXAMPLES:
///     strata build                   Build programs in the source root
///     strata build solver apps//     Build a program and every app
///     strata build --release -j 8    Optimized build on 8 workers
///     strata list                    Show discovered units
///     strata deps solver             Show what solver links
///
/// ENVIRONMENT VARIABLES:
///     STRATA_FC       Compiler command
///     STRATA_PROFILE  Default build profile
///     STRATA_JOBS     Default number of parallel jobs
///     STRATA_JSON     Set to '1' for JSON output by default
///     STRATA_LOG      Log filter (e.g. 'strata_build=debug')
#[derive(Parser)]
#[command(name = "strata")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build targets
    ///
    /// A target is a unit name (`solver`), a path relative to the source root
    /// (`apps/solver.f90`), a directory of programs (`apps/`), or a directory
    /// tree (`apps//`). Without targets, programs in the source root are built.
    ///
    /// EXAMPLES:
    ///     strata build                   Build with default profile
    ///     strata build --release         Build optimized release
    ///     strata build --profile=bench   Build with a custom profile
    #[command(visible_alias = "b")]
    Build {
        /// Targets to build
        targets: Vec<String>,
        /// Build profile (dev, release, or custom)
        #[arg(long, short = 'p')]
        profile: Option<String>,
        /// Build in release mode (shorthand for --profile=release)
        #[arg(long)]
        release: bool,
        /// Number of parallel jobs
        #[arg(long, short = 'j')]
        jobs: Option<usize>,
        /// Stop starting new actions after the first failure
        #[arg(long)]
        fail_fast: bool,
        /// Rescan every source without touching the persistent cache
        #[arg(long)]
        no_cache: bool,
        /// Verbose output
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Quiet output (errors only)
        #[arg(long, short = 'q')]
        quiet: bool,
        /// JSON output
        #[arg(long)]
        json: bool,
        /// Project directory
        #[arg(long, short = 'C', default_value = ".")]
        project_dir: PathBuf,
    },

    /// List discovered units
    ///
    /// Shows every program, module and submodule with its id and path, followed
    /// by files that were rejected and why.
    #[command(visible_alias = "ls")]
    List {
        /// JSON output
        #[arg(long)]
        json: bool,
        /// Project directory
        #[arg(long, short = 'C', default_value = ".")]
        project_dir: PathBuf,
    },

    /// Show the dependencies of a target
    ///
    /// Prints the direct imports, the transitive module closure and, for
    /// programs, the units linked into the executable.
    Deps {
        /// Target to inspect
        target: String,
        /// JSON output
        #[arg(long)]
        json: bool,
        /// Project directory
        #[arg(long, short = 'C', default_value = ".")]
        project_dir: PathBuf,
    },

    /// Generate shell completions
    ///
    /// EXAMPLES:
    ///     strata completions bash > ~/.bash_completions/strata.bash
    ///     strata completions zsh > ~/.zfunc/_strata
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Commands {
    fn verbose(&self) -> bool {
        matches!(self, Commands::Build { verbose: true, .. })
    }
}

fn init_logging(cli_config: &config::Config, verbose: bool) {
    let filter = EnvFilter::try_new(cli_config.log_directive(verbose))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let cli_config = config::Config::from_env();
    init_logging(&cli_config, cli.command.verbose());

    match cli.command {
        Commands::Build {
            targets,
            profile,
            release,
            jobs,
            fail_fast,
            no_cache,
            verbose,
            quiet,
            json,
            project_dir,
        } => {
            // Command-line flag overrides environment variable
            let use_json = json || cli_config.default_json;
            let args = commands::build::BuildArgs {
                targets,
                profile,
                release,
                jobs,
                fail_fast,
                no_cache,
                verbose,
                quiet,
                json: use_json,
                project_dir: Some(project_dir),
            };
            if !commands::build::run(args)? {
                std::process::exit(1);
            }
        }
        Commands::List { json, project_dir } => {
            commands::list::run(&project_dir, json || cli_config.default_json)?;
        }
        Commands::Deps {
            target,
            json,
            project_dir,
        } => {
            commands::deps::run(&project_dir, &target, json || cli_config.default_json)?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
        }
    }

    Ok(())
}
