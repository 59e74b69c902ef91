// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Shared fixtures: a line-oriented script evaluator, a fake TypeScript
//! compiler and a fake network
//!
//! The evaluator understands one statement per line:
//!
//! ```text
//! tick NAME                      bump counter NAME
//! throw MESSAGE                  fail the evaluation
//! sleep MS                       (modules only) suspend
//! module.exports = EXPR
//! module.exports.NAME = EXPR
//! exports.NAME = EXPR
//! delete exports.NAME
//! export const NAME = EXPR       (modules only)
//! export default EXPR            (modules only)
//! ```
//!
//! Expressions are JSON literals, `undefined`, `exports`, `module.exports`,
//! `app`, `cwd`, `process.a.b`, `fn NAME` (a function bumping NAME),
//! `class NAME` and `require("x").a.b` or `self["require"]("x")`.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value as Json;
use spacey_modules::error::{ModuleError, Result};
use spacey_modules::evaluator::{Evaluator, ModuleSource, ScriptScope};
use spacey_modules::fetch::Fetch;
use spacey_modules::transpile::{CompileRequest, ModuleKind, TypeScriptCompiler};
use spacey_modules::{
    Function, MemoryVault, ModuleHost, Object, PropertyDescriptor, Require, RequireOptions,
    Settings, Symbol, Value,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

static REQUIRE_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:require|self\["(?:[^"\\]|\\.)*"\])\(("(?:[^"\\]|\\.)*")\)((?:\.[A-Za-z_$][\w$]*)*)$"#)
        .expect("valid regex")
});

type Counters = Arc<Mutex<HashMap<String, usize>>>;

#[derive(Debug, Clone)]
enum Expr {
    Literal(Json),
    Undefined,
    Exports,
    ModuleExports,
    App,
    Cwd,
    Process(Vec<String>),
    Fn(String),
    Class(String),
    Require { specifier: String, path: Vec<String> },
}

#[derive(Debug, Clone)]
enum Statement {
    Tick(String),
    Throw(String),
    Sleep(u64),
    SetModuleExports(Expr),
    SetModuleExportsProperty(String, Expr),
    SetExportsProperty(String, Expr),
    DeleteExportsProperty(String),
    Export(String, Expr),
    ExportDefault(Expr),
}

impl Statement {
    fn module_only(&self) -> bool {
        matches!(self, Statement::Sleep(_) | Statement::Export(..) | Statement::ExportDefault(_))
    }
}

fn parse_expr(expr: &str) -> std::result::Result<Expr, String> {
    let expr = expr.trim();
    match expr {
        "undefined" => return Ok(Expr::Undefined),
        "exports" => return Ok(Expr::Exports),
        "module.exports" => return Ok(Expr::ModuleExports),
        "app" => return Ok(Expr::App),
        "cwd" => return Ok(Expr::Cwd),
        _ => {}
    }
    if let Some(name) = expr.strip_prefix("fn ") {
        return Ok(Expr::Fn(name.trim().to_string()));
    }
    if let Some(name) = expr.strip_prefix("class ") {
        return Ok(Expr::Class(name.trim().to_string()));
    }
    if let Some(path) = expr.strip_prefix("process.") {
        return Ok(Expr::Process(path.split('.').map(String::from).collect()));
    }
    if let Some(captures) = REQUIRE_CALL.captures(expr) {
        let specifier: String = serde_json::from_str(&captures[1]).map_err(|e| e.to_string())?;
        let path = captures[2]
            .split('.')
            .filter(|key| !key.is_empty())
            .map(String::from)
            .collect();
        return Ok(Expr::Require { specifier, path });
    }
    serde_json::from_str(expr)
        .map(Expr::Literal)
        .map_err(|_| format!("unexpected expression `{expr}`"))
}

fn split_assignment(line: &str) -> std::result::Result<(&str, Expr), String> {
    let (target, expr) = line
        .split_once(" = ")
        .ok_or_else(|| format!("unexpected statement `{line}`"))?;
    Ok((target.trim(), parse_expr(expr)?))
}

fn parse_statement(line: &str) -> std::result::Result<Statement, String> {
    if line.starts_with("import ") || line.starts_with("await ") {
        return Err(format!("`{line}` is only valid in a module"));
    }
    if let Some(name) = line.strip_prefix("tick ") {
        return Ok(Statement::Tick(name.trim().to_string()));
    }
    if let Some(message) = line.strip_prefix("throw ") {
        return Ok(Statement::Throw(message.trim().to_string()));
    }
    if let Some(ms) = line.strip_prefix("sleep ") {
        return ms.trim().parse().map(Statement::Sleep).map_err(|e| format!("{e}"));
    }
    if let Some(name) = line.strip_prefix("delete exports.") {
        return Ok(Statement::DeleteExportsProperty(name.trim().to_string()));
    }
    if let Some(expr) = line.strip_prefix("export default ") {
        return Ok(Statement::ExportDefault(parse_expr(expr)?));
    }
    if let Some(rest) = line
        .strip_prefix("export const ")
        .or_else(|| line.strip_prefix("export let "))
    {
        let (name, expr) = split_assignment(rest)?;
        return Ok(Statement::Export(name.to_string(), expr));
    }
    let (target, expr) = split_assignment(line)?;
    if target == "module.exports" {
        return Ok(Statement::SetModuleExports(expr));
    }
    if let Some(name) = target.strip_prefix("module.exports.") {
        return Ok(Statement::SetModuleExportsProperty(name.to_string(), expr));
    }
    if let Some(name) = target.strip_prefix("exports.") {
        return Ok(Statement::SetExportsProperty(name.to_string(), expr));
    }
    Err(format!("cannot assign to `{target}`"))
}

fn parse_program(id: &str, code: &str, module: bool) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();
    for (index, line) in code.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") || (index == 0 && line.starts_with("#!")) {
            continue;
        }
        let statement = parse_statement(line).map_err(|e| ModuleError::syntax(id, e))?;
        if statement.module_only() && !module {
            return Err(ModuleError::syntax(id, format!("`{line}` is only valid in a module")));
        }
        statements.push(statement);
    }
    Ok(statements)
}

fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::Object(Object::from_entries(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| (index.to_string(), json_to_value(item))),
        )),
        Json::Object(map) => Value::Object(Object::from_entries(
            map.iter().map(|(key, value)| (key.clone(), json_to_value(value))),
        )),
    }
}

/// Bindings of one evaluation
struct Frame {
    id: String,
    module: Option<Object>,
    exports: Value,
    process: Object,
    app: Value,
    require: Arc<Require>,
    counters: Counters,
    namespace: Vec<(String, Value)>,
}

impl Frame {
    fn module(&self) -> Result<&Object> {
        self.module
            .as_ref()
            .ok_or_else(|| ModuleError::evaluation(&self.id, "module is not defined"))
    }

    fn eval(&self, expr: &Expr) -> Result<Value> {
        Ok(match expr {
            Expr::Literal(json) => json_to_value(json),
            Expr::Undefined => Value::Undefined,
            Expr::Exports => self.exports.clone(),
            Expr::ModuleExports => self.module()?.get("exports"),
            Expr::App => self.app.clone(),
            Expr::Cwd => self
                .require
                .context()
                .cwd()
                .map_or(Value::Null, Value::from),
            Expr::Process(path) => path
                .iter()
                .fold(Value::Object(self.process.clone()), |value, key| value.get(key.as_str())),
            Expr::Fn(name) => {
                let counters = Arc::clone(&self.counters);
                let counter = name.clone();
                Value::Function(Function::new(name.as_str(), move |_, _| {
                    *counters.lock().entry(counter.clone()).or_default() += 1;
                    Ok(Value::Undefined)
                }))
            }
            Expr::Class(name) => {
                let class = name.clone();
                Value::Function(
                    Function::new(name.as_str(), move |_, _| {
                        Err(ModuleError::type_error(format!(
                            "Class constructor {class} cannot be invoked without 'new'"
                        )))
                    })
                    .with_constructor(|_, new_target| {
                        Ok(Value::from(Object::from_entries([("constructed_by", new_target.name())])))
                    }),
                )
            }
            Expr::Require { specifier, path } => {
                let value = self.require.require(specifier, RequireOptions::default())?;
                path.iter().fold(value, |value, key| value.get(key.as_str()))
            }
        })
    }

    fn run(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Tick(name) => {
                *self.counters.lock().entry(name.clone()).or_default() += 1;
            }
            Statement::Throw(message) => return Err(ModuleError::evaluation(&self.id, message.as_str())),
            Statement::Sleep(_) => {}
            Statement::SetModuleExports(expr) => {
                let value = self.eval(expr)?;
                self.module()?.set("exports", value);
            }
            Statement::SetModuleExportsProperty(name, expr) => {
                let value = self.eval(expr)?;
                self.module()?.get("exports").set(name.as_str(), value);
            }
            Statement::SetExportsProperty(name, expr) => {
                let value = self.eval(expr)?;
                if !self.exports.set(name.as_str(), value) {
                    return Err(ModuleError::type_error(format!("cannot set exports.{name}")));
                }
            }
            Statement::DeleteExportsProperty(name) => {
                if let Value::Object(exports) = &self.exports {
                    exports.delete(&name.as_str().into());
                }
            }
            Statement::Export(name, expr) => {
                let value = self.eval(expr)?;
                self.namespace.push((name.clone(), value));
            }
            Statement::ExportDefault(expr) => {
                let value = self.eval(expr)?;
                self.namespace.push(("default".to_string(), value));
            }
        }
        Ok(())
    }
}

/// Evaluator for the line language described in the module docs
#[derive(Default)]
pub struct LineEvaluator {
    counters: Counters,
    scripts: AtomicUsize,
    modules: AtomicUsize,
}

impl LineEvaluator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// How often `tick NAME` ran
    pub fn count(&self, name: &str) -> usize {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Number of CommonJS bodies run
    pub fn scripts(&self) -> usize {
        self.scripts.load(Ordering::SeqCst)
    }

    /// Number of ES modules loaded
    pub fn modules(&self) -> usize {
        self.modules.load(Ordering::SeqCst)
    }
}

impl Evaluator for LineEvaluator {
    fn check_script(&self, id: &str, code: &str) -> Result<()> {
        parse_program(id, code, false).map(|_| ())
    }

    fn run_script(&self, scope: ScriptScope<'_>) -> Result<()> {
        self.scripts.fetch_add(1, Ordering::SeqCst);
        let statements = parse_program(scope.id, scope.code, false)?;
        let mut frame = Frame {
            id: scope.id.to_string(),
            module: Some(scope.module.clone()),
            exports: scope.exports,
            process: scope.process.clone(),
            app: scope.app.clone(),
            require: Arc::clone(scope.require),
            counters: Arc::clone(&self.counters),
            namespace: Vec::new(),
        };
        for statement in &statements {
            frame.run(statement)?;
        }
        Ok(())
    }

    fn run_module(&self, source: ModuleSource) -> BoxFuture<'static, Result<Object>> {
        self.modules.fetch_add(1, Ordering::SeqCst);
        let counters = Arc::clone(&self.counters);
        Box::pin(async move {
            let statements = parse_program(&source.id, &source.code, true)?;
            let module = match &source.prelude {
                Some(prelude) if prelude.starts_with("export let module=") => {
                    let exports = Object::new();
                    exports.define_property(Symbol::ToStringTag, PropertyDescriptor::hidden("Module"));
                    Some(Object::from_entries([("exports", exports)]))
                }
                Some(_) => return Err(ModuleError::syntax(&source.id, "malformed prelude")),
                None => None,
            };
            let mut frame = Frame {
                id: source.id.clone(),
                exports: module.as_ref().map_or(Value::Undefined, |m| m.get("exports")),
                module: module.clone(),
                process: source.process,
                app: source.app,
                require: source.require,
                counters,
                namespace: Vec::new(),
            };
            for statement in &statements {
                if let Statement::Sleep(ms) = statement {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                    continue;
                }
                frame.run(statement)?;
            }
            let mut namespace = std::mem::take(&mut frame.namespace);
            if let Some(module) = module {
                namespace.push(("module".to_string(), Value::Object(module)));
            }
            Ok(Object::module_namespace(namespace))
        })
    }
}

/// Compiler turning `export const NAME = EXPR` into `exports.NAME = EXPR`
/// for CommonJS output; `TYPE ERROR` anywhere fails compilation
#[derive(Default)]
pub struct FakeTypeScript {
    compiles: AtomicUsize,
}

impl FakeTypeScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl TypeScriptCompiler for FakeTypeScript {
    fn compile(&self, request: &CompileRequest) -> std::result::Result<String, Vec<String>> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        let mut out = Vec::new();
        for line in request.source.lines() {
            let trimmed = line.trim();
            if trimmed.contains("TYPE ERROR") {
                return Err(vec![format!("error TS2322: {trimmed}")]);
            }
            let common_js = request.module == ModuleKind::CommonJs;
            if let Some(expr) = trimmed.strip_prefix("export default ").filter(|_| common_js) {
                out.push(format!("exports.default = {expr}"));
            } else if let Some((name, expr)) = trimmed
                .strip_prefix("export const ")
                .and_then(|rest| rest.split_once(" = "))
            {
                let name = name.split(':').next().unwrap_or(name).trim();
                if common_js {
                    out.push(format!("exports.{name} = {expr}"));
                } else {
                    out.push(format!("export const {name} = {expr}"));
                }
            } else {
                out.push(line.to_string());
            }
        }
        Ok(out.join("\n"))
    }
}

/// Network serving fixed bodies
#[derive(Default)]
pub struct FakeFetch {
    bodies: Mutex<HashMap<String, String>>,
    redirects: Mutex<HashMap<String, String>>,
    fetches: Mutex<Vec<String>>,
}

impl FakeFetch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: &str) {
        self.bodies.lock().insert(url.to_string(), body.to_string());
    }

    pub fn redirect(&self, from: &str, to: &str) {
        self.redirects.lock().insert(from.to_string(), to.to_string());
    }

    /// URLs fetched so far, in order
    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }
}

#[async_trait]
impl Fetch for FakeFetch {
    async fn resolve_redirect(&self, url: &str) -> Result<String> {
        Ok(self.redirects.lock().get(url).cloned().unwrap_or_else(|| url.to_string()))
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.fetches.lock().push(url.to_string());
        self.bodies
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| ModuleError::network(url, "HTTP 404 Not Found"))
    }
}

/// Settings preloading every script and note
pub fn settings() -> Settings {
    Settings {
        preloading_rules: vec![r"+/\.(?:[jt]s|md)$/u".to_string()],
        worker_threads: 2,
        ..Settings::default()
    }
}

/// A started host over an in-memory vault
pub struct Fixture {
    pub vault: Arc<MemoryVault>,
    pub evaluator: Arc<LineEvaluator>,
    pub typescript: Arc<FakeTypeScript>,
    pub fetch: Arc<FakeFetch>,
    pub host: ModuleHost,
}

impl Fixture {
    pub async fn new(files: &[(&str, &str)]) -> Self {
        Self::with_settings(files, settings()).await
    }

    pub async fn with_settings(files: &[(&str, &str)], settings: Settings) -> Self {
        let vault = Arc::new(MemoryVault::with_files(files.iter().copied()));
        let evaluator = LineEvaluator::new();
        let typescript = FakeTypeScript::new();
        let fetch = FakeFetch::new();
        let host = ModuleHost::builder(vault.clone(), evaluator.clone())
            .settings(settings)
            .compiler(typescript.clone())
            .fetch(fetch.clone())
            .build()
            .expect("host builds");
        host.start().await;
        Self {
            vault,
            evaluator,
            typescript,
            fetch,
            host,
        }
    }

    pub fn require(&self) -> Arc<Require> {
        self.host.require().expect("main realm has a loader")
    }

    /// Write a file and let the host see the change
    pub async fn write(&self, path: &str, content: &str) {
        let event = self.vault.write(path, content);
        self.host.handle_vault_event(event).await;
    }

    pub async fn remove(&self, path: &str) {
        let event = self.vault.remove(path);
        self.host.handle_vault_event(event).await;
    }

    pub async fn rename(&self, from: &str, to: &str) {
        let event = self.vault.rename(from, to);
        self.host.handle_vault_event(event).await;
    }
}

/// `require(id)` with default options
pub fn require(require: &Arc<Require>, id: &str) -> Result<Value> {
    require.require(id, RequireOptions::default())
}
