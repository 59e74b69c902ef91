// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! spacey-vault - load, inspect and watch the scripts of a notes vault
//!
//! ## Features
//!
//! - Resolve modules by path, `[[wikilink]]`, `[markdown](link)` or URL
//! - Show transpiled code of Markdown and TypeScript modules
//! - Watch the vault and reload modules as their dependencies change
//! - Interactive shell with completion of vault paths

mod repl;
mod scan;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use scan::ScanEvaluator;
use spacey_modules::{
    Context, DirectoryVault, ImportOptions, ModuleHost, Require, RequireOptions, Resolve, Settings,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Settings file looked up in the vault root when `--config` is not given
const SETTINGS_FILE: &str = ".spacey-vault.toml";

#[derive(Parser)]
#[command(name = "spacey-vault", version, about = "Load, inspect and watch the scripts of a notes vault")]
struct Cli {
    /// Vault root directory
    #[arg(short = 'C', long, default_value = ".")]
    vault: PathBuf,

    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log loader activity
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Load a module with require() and print its exports
    Require {
        id: String,
        /// Directory relative ids are resolved from
        #[arg(long)]
        cwd: Option<String>,
    },
    /// Load a module as an ES module and print its namespace
    Import {
        id: String,
        #[arg(long)]
        cwd: Option<String>,
        /// Do not provide CommonJS bindings
        #[arg(long)]
        no_interop: bool,
    },
    /// Print the transpiled code of a module
    Code {
        id: String,
        #[arg(long)]
        cwd: Option<String>,
    },
    /// Load a module and print the modules it required
    Deps { id: String },
    /// Load modules, then reload them whenever something they use changes
    Watch { ids: Vec<String> },
    /// List the files known to the loader
    Files,
    /// Start the interactive shell (default)
    Shell,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "spacey_modules=debug,spacey_vault=debug"
    } else {
        "spacey_modules=warn,spacey_vault=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => {
            let path = cli.vault.join(SETTINGS_FILE);
            if !path.is_file() {
                tracing::debug!("no {} in vault, using default settings", SETTINGS_FILE);
                return Ok(Settings::default());
            }
            path
        }
    };
    Settings::load(&path).with_context(|| format!("cannot load settings from {}", path.display()))
}

async fn open_host(cli: &Cli) -> anyhow::Result<(Arc<DirectoryVault>, Arc<ModuleHost>)> {
    let settings = load_settings(cli)?;
    let vault = Arc::new(
        DirectoryVault::open(&cli.vault).with_context(|| format!("cannot open vault {}", cli.vault.display()))?,
    );
    let host = ModuleHost::builder(vault.clone(), Arc::new(ScanEvaluator))
        .settings(settings)
        .build()
        .context("cannot set up the module loader")?;
    host.start().await;
    tracing::debug!(root = %vault.root().display(), "module host started");
    Ok((vault, Arc::new(host)))
}

fn main_require(host: &ModuleHost) -> anyhow::Result<Arc<Require>> {
    host.require().context("the main realm has no loader")
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let (vault, host) = open_host(&cli).await?;

    match cli.command.unwrap_or(Command::Shell) {
        Command::Require { id, cwd } => {
            let exports = main_require(&host)?.require(&id, RequireOptions { cwd })?;
            println!("{}", repl::format_value(&exports));
        }
        Command::Import { id, cwd, no_interop } => {
            let options = ImportOptions {
                cwd,
                common_js_interop: !no_interop,
            };
            let namespace = main_require(&host)?.import(&id, options).await?;
            println!("{}", repl::format_value(&namespace));
        }
        Command::Code { id, cwd } => {
            let context = Context {
                cwds: vec![cwd],
                parents: Vec::new(),
            };
            let resolved = main_require(&host)?
                .resolver()
                .aresolve(&id, &context)
                .await?
                .with_context(|| format!("cannot find module '{id}'"))?;
            println!("{} {}", "//".dimmed(), resolved.id.cyan());
            println!("{}", resolved.code);
        }
        Command::Deps { id } => {
            let require = main_require(&host)?;
            require.require(&id, RequireOptions::default())?;
            repl::print_dependencies(&require, &id);
        }
        Command::Watch { ids } => watch(&vault, &host, &ids).await?,
        Command::Files => {
            let mut paths = host.file_cache().paths();
            paths.sort();
            for path in paths {
                println!("{path}");
            }
        }
        Command::Shell => {
            let runtime = tokio::runtime::Handle::current();
            let shell = Arc::clone(&host);
            tokio::task::spawn_blocking(move || {
                let mut repl = repl::Repl::new(shell, runtime)?;
                repl.run()
            })
            .await??;
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Load `ids`, then follow vault changes until interrupted
async fn watch(vault: &DirectoryVault, host: &ModuleHost, ids: &[String]) -> anyhow::Result<()> {
    let (_watcher, mut events) = vault.watch()?;
    let require = main_require(host)?;
    let subscription = require.on_invalidate().listen(|id: &String| {
        println!("{} {}", "invalidated".yellow(), id);
    });
    load_all(&require, ids);
    println!("{} {}", "watching".dimmed(), display_root(vault.root()).cyan());

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                host.handle_vault_event(event).await;
                load_all(&require, ids);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    require.on_invalidate().unlisten(subscription);
    Ok(())
}

/// Require every id not currently cached, reporting failures
fn load_all(require: &Arc<Require>, ids: &[String]) {
    for id in ids {
        let cached = require
            .aliased(id)
            .is_some_and(|canonical| require.is_cached(&canonical));
        if cached {
            continue;
        }
        match require.require(id, RequireOptions::default()) {
            Ok(_) => println!("{} {}", "loaded".green(), id),
            Err(e) => repl::print_error(&e),
        }
    }
}

fn display_root(root: &Path) -> String {
    dirs::home_dir()
        .and_then(|home| root.strip_prefix(&home).ok().map(|rest| Path::new("~").join(rest)))
        .unwrap_or_else(|| root.to_path_buf())
        .display()
        .to_string()
}
