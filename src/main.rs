//==================================================
// File: main.rs
//==================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: SolvraEmbed console entry point
// Objective: Run a script file or an interactive console inside one execution
//            context of the in-process Host
//==================================================

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use solvra_embed::{
    BridgeConfig, CompileStatus, ContextHandle, ContextManager, InProcessHost, initialize_process,
    logging, shutdown_process,
};

#[derive(Parser, Debug)]
#[command(name = "solvra-embed", about = "Host/Script embedding bridge console")]
pub struct Args {
    /// Script file to run. Starts the interactive console when omitted.
    pub script: Option<PathBuf>,

    /// Load bridge options from this TOML file instead of the default location.
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit.
    #[arg(long = "show-config")]
    pub show_config: bool,

    /// Echo Script tracebacks to stderr.
    #[arg(long = "print-stack")]
    pub print_stack: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?.with_env_overrides()?,
        None => BridgeConfig::load_or_default()?,
    };
    if args.print_stack {
        config = config.with_print_stack(true);
    }
    if args.show_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    logging::init("solvra-embed", &config.log_filter);

    let host = InProcessHost::new();
    let loader = host.system_class_loader();
    let bridge = initialize_process(host, config).context("initialising bridge")?;
    let manager = bridge.contexts();
    let ctx = manager.create_context(Some(loader))?;

    let outcome = match &args.script {
        Some(path) => manager
            .run(ctx, path)
            .with_context(|| format!("running {}", path.display())),
        None => console(manager, ctx),
    };
    manager.close(ctx)?;
    shutdown_process();
    outcome
}

fn console(manager: &ContextManager, ctx: ContextHandle) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut pending = String::new();
    prompt(&mut stdout, false)?;
    for line in stdin.lock().lines() {
        let line = line.context("reading console input")?;
        if !pending.is_empty() {
            pending.push('\n');
        }
        pending.push_str(&line);
        // blank line flushes a continuation block
        let status = if line.trim().is_empty() && !pending.trim().is_empty() {
            CompileStatus::Complete
        } else {
            match manager.compile_check(ctx, &pending) {
                Ok(status) => status,
                Err(err) => {
                    eprintln!("{err}");
                    pending.clear();
                    prompt(&mut stdout, false)?;
                    continue;
                }
            }
        };
        if status == CompileStatus::Complete {
            if !pending.trim().is_empty() {
                if let Err(err) = manager.eval(ctx, &pending) {
                    eprintln!("{err}");
                }
            }
            pending.clear();
        }
        prompt(&mut stdout, !pending.is_empty())?;
    }
    println!();
    Ok(())
}

fn prompt(stdout: &mut io::Stdout, continuation: bool) -> Result<()> {
    write!(stdout, "{}", if continuation { "... " } else { ">>> " })?;
    stdout.flush()?;
    Ok(())
}
