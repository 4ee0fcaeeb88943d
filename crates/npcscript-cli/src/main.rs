use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use npcscript_host::{
    EntityId, ExecutionContext, ScriptCompiler, ScriptMetadata, ScriptingConfig, SessionId,
    TaskState,
};

mod console;

use console::ConsoleSink;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enables debug logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Scripting config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a script and print its metadata
    Check {
        /// Script file to check
        path: PathBuf,
    },
    /// Play a script's dialog in the terminal
    Run {
        /// Script file to run
        path: PathBuf,

        /// Session id the dialog is addressed to
        #[arg(long, default_value_t = 1)]
        session: u32,

        /// Entity id the dialog comes from
        #[arg(long, default_value_t = 1)]
        entity: u32,
    },
}

fn init_logging(debug: u8) {
    let default_level = match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<ScriptingConfig> {
    match path {
        Some(path) => ScriptingConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(ScriptingConfig::default()),
    }
}

fn check(compiler: &ScriptCompiler, path: &Path) -> Result<()> {
    let metadata = compiler.extract(path)?;

    print!("{}", toml::to_string_pretty(&metadata)?);
    match &metadata.code {
        Some(code) => println!("# bytecode: {} bytes", code.len()),
        None => println!("# bytecode: none"),
    }

    Ok(())
}

fn play(
    compiler: &ScriptCompiler,
    path: &Path,
    session: SessionId,
    entity: EntityId,
) -> Result<()> {
    let metadata: ScriptMetadata = compiler.extract(path)?;
    let Some(code) = metadata.code.as_ref() else {
        println!("{} has nothing to say.", metadata.name);
        return Ok(());
    };

    let sink = Arc::new(ConsoleSink::new(io::stdout(), metadata.name.clone()));
    let mut context = ExecutionContext::with_config(session, entity, sink, compiler.config())?;

    if !context.run(code) {
        bail!("Failed to load bytecode for {}", path.display());
    }

    let stdin = io::stdin();
    let mut input = String::new();
    while context.state() == Some(TaskState::Suspended) {
        input.clear();
        if stdin.lock().read_line(&mut input)? == 0 {
            info!("Input closed, abandoning dialog with {}", metadata.name);
            break;
        }
        context.resume();
    }

    if context.state() == Some(TaskState::Failed) {
        bail!("{} failed, see the log for details", path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = load_config(cli.config.as_deref())?;
    let compiler = ScriptCompiler::new(config);

    let result = match &cli.command {
        Command::Check { path } => check(&compiler, path),
        Command::Run {
            path,
            session,
            entity,
        } => play(&compiler, path, SessionId(*session), EntityId(*entity)),
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }

    result
}
