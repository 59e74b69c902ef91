// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Interactive shell over a vault's module loader.

use owo_colors::OwoColorize;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Config, Editor, Helper};
use spacey_modules::{
    Context, ImportOptions, ModuleError, ModuleHost, PropertyKey, Require, RequireOptions, Resolve,
    Value,
};
use std::borrow::Cow;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Shell configuration constants
const HISTORY_FILE: &str = ".spacey_vault_history";
const MAX_HISTORY_SIZE: usize = 1000;

/// Shell commands; everything but `.exit` takes effect in the main realm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    Exit,
    Clear,
    Version,
    Require,
    Import,
    Code,
    Deps,
    Invalidate,
    ClearCache,
    Cwd,
    Files,
}

impl ReplCommand {
    /// Parse a command from input string
    pub fn parse(input: &str) -> Option<(Self, Option<&str>)> {
        let input = input.trim();
        let rest = input.strip_prefix('.')?;

        let mut parts = rest.splitn(2, char::is_whitespace);
        let cmd = parts.next()?.to_lowercase();
        let arg = parts.next().map(str::trim).filter(|arg| !arg.is_empty());

        let command = match cmd.as_str() {
            "help" | "h" | "?" => ReplCommand::Help,
            "exit" | "quit" | "q" => ReplCommand::Exit,
            "clear" | "cls" => ReplCommand::Clear,
            "version" | "v" => ReplCommand::Version,
            "require" | "r" => ReplCommand::Require,
            "import" | "i" => ReplCommand::Import,
            "code" | "c" => ReplCommand::Code,
            "deps" | "d" => ReplCommand::Deps,
            "invalidate" => ReplCommand::Invalidate,
            "clear-cache" => ReplCommand::ClearCache,
            "cwd" => ReplCommand::Cwd,
            "files" | "ls" => ReplCommand::Files,
            _ => return None,
        };
        Some((command, arg))
    }

    /// Get all available commands for help/completion
    pub fn all_commands() -> &'static [(&'static str, &'static str)] {
        &[
            (".help", "Show this help message"),
            (".exit", "Exit the shell"),
            (".clear", "Clear the screen"),
            (".version", "Show version information"),
            (".require <id>", "Load a module with require() (also: bare input)"),
            (".import <id>", "Load a module as an ES module"),
            (".code <id>", "Show the transpiled code of a module"),
            (".deps <id>", "Show the modules a cached module required"),
            (".invalidate <id>", "Evict a module and everything that required it"),
            (".clear-cache", "Evict every cached module"),
            (".cwd [dir]", "Show or set the working directory for relative ids"),
            (".files", "List the files known to the loader"),
        ]
    }
}

/// Helper for rustyline that completes commands and vault paths
struct VaultHelper {
    commands: Vec<String>,
    host: Arc<ModuleHost>,
}

impl VaultHelper {
    fn new(host: Arc<ModuleHost>) -> Self {
        let commands = ReplCommand::all_commands()
            .iter()
            .filter_map(|(cmd, _)| cmd.split_whitespace().next())
            .map(String::from)
            .collect();
        Self { commands, host }
    }

    fn candidates(&self, line: &str, word: &str) -> Vec<String> {
        if line.trim_start().starts_with('.') && !line.contains(char::is_whitespace) {
            return self
                .commands
                .iter()
                .filter(|cmd| cmd.starts_with(word))
                .cloned()
                .collect();
        }
        let mut paths: Vec<String> = self
            .host
            .file_cache()
            .paths()
            .into_iter()
            .filter(|path| path.starts_with(word))
            .collect();
        paths.sort();
        paths
    }
}

fn word_start(line: &str) -> usize {
    line.rfind(char::is_whitespace).map(|i| i + 1).unwrap_or(0)
}

impl Completer for VaultHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let start = word_start(&line[..pos]);
        let word = &line[start..pos];
        if word.is_empty() {
            return Ok((pos, vec![]));
        }

        let matches = self
            .candidates(&line[..pos], word)
            .into_iter()
            .map(|candidate| Pair {
                replacement: candidate[word.len()..].to_string(),
                display: candidate,
            })
            .collect();
        Ok((pos, matches))
    }
}

impl Hinter for VaultHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<Self::Hint> {
        if pos < line.len() {
            return None;
        }
        let word = &line[word_start(line)..];
        if word.len() < 2 {
            return None;
        }
        self.candidates(line, word)
            .into_iter()
            .find(|candidate| candidate.len() > word.len())
            .map(|candidate| (&candidate[word.len()..]).dimmed().to_string())
    }
}

impl Highlighter for VaultHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let Some(rest) = line.strip_prefix('.') else {
            return Cow::Borrowed(line);
        };
        let split = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (command, argument) = rest.split_at(split);
        Cow::Owned(format!("{}{}", format!(".{command}").magenta(), argument.green()))
    }

    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

impl Validator for VaultHelper {}

impl Helper for VaultHelper {}

/// The interactive shell
pub struct Repl {
    host: Arc<ModuleHost>,
    runtime: Handle,
    cwd: Option<String>,
    editor: Editor<VaultHelper, DefaultHistory>,
    history_path: PathBuf,
}

impl Repl {
    /// Create a shell; `runtime` drives asynchronous loads
    pub fn new(host: Arc<ModuleHost>, runtime: Handle) -> rustyline::Result<Self> {
        let config = Config::builder()
            .history_ignore_dups(true)?
            .history_ignore_space(true)
            .max_history_size(MAX_HISTORY_SIZE)?
            .auto_add_history(true)
            .build();

        let mut editor = Editor::with_config(config)?;
        editor.set_helper(Some(VaultHelper::new(Arc::clone(&host))));

        let history_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spacey")
            .join(HISTORY_FILE);

        if let Some(parent) = history_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = editor.load_history(&history_path);

        Ok(Self {
            host,
            runtime,
            cwd: None,
            editor,
            history_path,
        })
    }

    /// Run the shell main loop; blocks the calling thread
    pub fn run(&mut self) -> rustyline::Result<()> {
        self.print_banner();

        loop {
            let prompt = self.format_prompt();

            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();

                    if trimmed.is_empty() {
                        continue;
                    }

                    if let Some((cmd, arg)) = ReplCommand::parse(trimmed) {
                        match self.execute_command(cmd, arg) {
                            CommandResult::Continue => continue,
                            CommandResult::Exit => break,
                        }
                    }

                    if trimmed.starts_with('.') {
                        eprintln!(
                            "{}: unknown command '{}'",
                            "Error".red().bold(),
                            trimmed.cyan()
                        );
                        continue;
                    }
                    self.require_and_print(trimmed);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C".dimmed());
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "^D".dimmed());
                    break;
                }
                Err(err) => {
                    eprintln!("{}: {:?}", "Error".red().bold(), err);
                    break;
                }
            }
        }

        let _ = self.editor.save_history(&self.history_path);
        println!();
        Ok(())
    }

    fn print_banner(&self) {
        println!();
        println!(
            "  {} {} {}",
            "Spacey Vault".white().bold(),
            "v".dimmed(),
            env!("CARGO_PKG_VERSION").bright_yellow()
        );
        println!(
            "  {} {}",
            self.host.file_cache().len().to_string().cyan(),
            "files known to the loader".dimmed()
        );
        println!(
            "  {} {} {}",
            "Type".dimmed(),
            ".help".cyan(),
            "for available commands".dimmed()
        );
        println!();
    }

    fn format_prompt(&self) -> String {
        match &self.cwd {
            Some(cwd) => format!("{} {} ", "vault".bright_green().bold(), format!("{cwd}>").dimmed()),
            None => format!("{} ", "vault>".bright_green().bold()),
        }
    }

    fn require(&self) -> Option<Arc<Require>> {
        let require = self.host.require();
        if require.is_none() {
            eprintln!("{}: the main realm has no loader", "Error".red().bold());
        }
        require
    }

    fn execute_command(&mut self, cmd: ReplCommand, arg: Option<&str>) -> CommandResult {
        match (cmd, arg) {
            (ReplCommand::Help, _) => self.print_help(),
            (ReplCommand::Exit, _) => return CommandResult::Exit,
            (ReplCommand::Clear, _) => print!("\x1B[2J\x1B[H"),
            (ReplCommand::Version, _) => {
                println!("{}: {}", "spacey-vault".bright_cyan().bold(), env!("CARGO_PKG_VERSION").yellow());
                println!("{}: {}", "spacey-modules".dimmed(), spacey_modules::VERSION);
            }
            (ReplCommand::Require, Some(id)) => self.require_and_print(id),
            (ReplCommand::Import, Some(id)) => self.import_and_print(id),
            (ReplCommand::Code, Some(id)) => self.print_code(id),
            (ReplCommand::Deps, Some(id)) => {
                if let Some(require) = self.require() {
                    print_dependencies(&require, id);
                }
            }
            (ReplCommand::Invalidate, Some(id)) => {
                if let Some(require) = self.require() {
                    require.invalidate(id);
                }
            }
            (ReplCommand::ClearCache, _) => {
                self.host.clear_cache(self.host.main_realm());
            }
            (ReplCommand::Cwd, arg) => {
                if let Some(dir) = arg {
                    self.cwd = (dir != "/").then(|| dir.trim_matches('/').to_string());
                }
                println!("{}", self.cwd.as_deref().unwrap_or("/").cyan());
            }
            (ReplCommand::Files, _) => {
                let mut paths = self.host.file_cache().paths();
                paths.sort();
                for path in paths {
                    println!("{path}");
                }
            }
            (cmd, None) => {
                eprintln!(
                    "{}: {} {}",
                    "Error".red().bold(),
                    format!("{cmd:?}").to_lowercase().cyan(),
                    "requires a module id".dimmed()
                );
            }
        }
        CommandResult::Continue
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Commands:".white().bold());
        println!();

        for (cmd, desc) in ReplCommand::all_commands() {
            println!("  {:20} {}", cmd.cyan(), desc.dimmed());
        }

        println!();
        println!("{}", "Keyboard Shortcuts:".white().bold());
        println!();
        println!("  {:20} {}", "Ctrl+C".yellow(), "Cancel current input".dimmed());
        println!("  {:20} {}", "Ctrl+D".yellow(), "Exit the shell".dimmed());
        println!("  {:20} {}", "Tab".yellow(), "Complete commands and paths".dimmed());
        println!("  {:20} {}", "↑/↓".yellow(), "Navigate history".dimmed());
        println!();
    }

    fn require_and_print(&self, id: &str) {
        let Some(require) = self.require() else {
            return;
        };
        let options = RequireOptions { cwd: self.cwd.clone() };
        match require.require(id, options) {
            Ok(value) => println!("{}", format_value(&value)),
            Err(e) => print_error(&e),
        }
    }

    fn import_and_print(&self, id: &str) {
        let Some(require) = self.require() else {
            return;
        };
        let options = ImportOptions {
            cwd: self.cwd.clone(),
            ..ImportOptions::default()
        };
        match self.runtime.block_on(require.import(id, options)) {
            Ok(value) => println!("{}", format_value(&value)),
            Err(e) => print_error(&e),
        }
    }

    fn print_code(&self, id: &str) {
        let Some(require) = self.require() else {
            return;
        };
        let context = Context {
            cwds: vec![self.cwd.clone()],
            parents: Vec::new(),
        };
        match self.runtime.block_on(require.resolver().aresolve(id, &context)) {
            Ok(Some(resolved)) => {
                println!("{} {}", "//".dimmed(), resolved.id.cyan());
                println!("{}", resolved.code);
            }
            Ok(None) => print_error(&ModuleError::module_not_found(id)),
            Err(e) => print_error(&e),
        }
    }
}

/// Result of executing a shell command
enum CommandResult {
    Continue,
    Exit,
}

/// Print the modules `id` required, as a tree of canonical ids
pub fn print_dependencies(require: &Require, id: &str) {
    let root = require.aliased(id).unwrap_or_else(|| id.to_string());
    let mut seen = HashSet::new();
    print_tree(require, &root, 0, &mut seen);
}

fn print_tree(require: &Require, id: &str, depth: usize, seen: &mut HashSet<String>) {
    let indent = "  ".repeat(depth);
    if !seen.insert(id.to_string()) {
        println!("{indent}{} {}", id.dimmed(), "(seen)".dimmed());
        return;
    }
    println!("{indent}{}", id.cyan());
    for specifier in require.dependencies(id) {
        let canonical = require.aliased(&specifier).unwrap_or(specifier);
        print_tree(require, &canonical, depth + 1, seen);
    }
}

/// Format a value for display with syntax coloring
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".blue().dimmed().to_string(),
        Value::Null => "null".blue().to_string(),
        Value::Bool(b) => b.to_string().yellow().to_string(),
        Value::Number(_) => value.to_string().yellow().to_string(),
        Value::String(s) => format!("'{}'", s).green().to_string(),
        Value::Function(function) => format!("[Function: {}]", function.name()).magenta().to_string(),
        Value::Object(object) => format_keys(value.to_string(), object.own_keys(), |key| {
            object.get_own_property(key).is_some_and(|property| property.enumerable)
        }),
        Value::Facade(facade) => format_keys(value.to_string(), facade.own_keys(), |key| {
            facade.get_own_property(key).is_some_and(|property| property.enumerable)
        }),
    }
}

fn format_keys(tag: String, keys: Vec<PropertyKey>, enumerable: impl Fn(&PropertyKey) -> bool) -> String {
    let keys: Vec<String> = keys
        .iter()
        .filter(|key| matches!(key, PropertyKey::String(_)) && enumerable(key))
        .map(ToString::to_string)
        .collect();
    if keys.is_empty() {
        return tag.cyan().to_string();
    }
    format!("{} {{ {} }}", tag.cyan(), keys.join(", "))
}

/// Print a formatted error message
pub fn print_error(error: &ModuleError) {
    let error_str = error.to_string();

    if let Some(colon_pos) = error_str.find(':') {
        let (error_type, message) = error_str.split_at(colon_pos);
        eprintln!("{}{}", error_type.red().bold(), message);
    } else {
        eprintln!("{}", error_str.red());
    }
}
