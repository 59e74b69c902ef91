// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! TypeScript transpilation
//!
//! The compiler itself is pluggable through [`TypeScriptCompiler`]. A file
//! is treated as TypeScript when its header says so, or when it declares no
//! language and has a `.ts`/`.mts` extension. Synchronous transpilation
//! emits CommonJS; asynchronous transpilation emits ES modules and runs on
//! the worker pool.

use super::{ContentHeader, Source, Transpile};
use crate::error::{ModuleError, Result};
use crate::events::EventEmitter;
use crate::file_cache::IdentityToken;
use crate::pool::WorkerPool;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::{Map, Value as Json};
use std::collections::HashMap;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Module format emitted by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    CommonJs,
    NodeNext,
}

impl ModuleKind {
    /// Short format name: `cjs` or `esm`
    pub fn format(self) -> &'static str {
        match self {
            ModuleKind::CommonJs => "cjs",
            ModuleKind::NodeNext => "esm",
        }
    }

    fn option_name(self) -> &'static str {
        match self {
            ModuleKind::CommonJs => "CommonJS",
            ModuleKind::NodeNext => "NodeNext",
        }
    }

    fn from_option(value: &Json) -> Option<Self> {
        match value {
            Json::String(name) if name.eq_ignore_ascii_case("commonjs") => Some(ModuleKind::CommonJs),
            Json::String(_) => Some(ModuleKind::NodeNext),
            Json::Number(n) if n.as_u64() == Some(1) => Some(ModuleKind::CommonJs),
            Json::Number(_) => Some(ModuleKind::NodeNext),
            _ => None,
        }
    }
}

/// A single compilation job
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub source: Arc<str>,
    pub module: ModuleKind,
    /// Effective compiler options, header options applied last
    pub compiler_options: Map<String, Json>,
}

impl CompileRequest {
    fn new(source: Arc<str>, default_module: ModuleKind, header: &ContentHeader) -> Self {
        let mut compiler_options = Map::new();
        compiler_options.insert("inlineSourceMap".into(), Json::Bool(true));
        compiler_options.insert("inlineSources".into(), Json::Bool(true));
        compiler_options.insert("module".into(), Json::from(default_module.option_name()));
        compiler_options.insert("target".into(), Json::from("ESNext"));
        if let Some(options) = &header.compiler_options {
            compiler_options.extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let module = compiler_options
            .get("module")
            .and_then(ModuleKind::from_option)
            .unwrap_or(default_module);
        Self {
            source,
            module,
            compiler_options,
        }
    }
}

/// Compiles TypeScript to JavaScript
pub trait TypeScriptCompiler: Send + Sync {
    /// Compile, returning diagnostics on failure
    fn compile(&self, request: &CompileRequest) -> std::result::Result<String, Vec<String>>;
}

/// Compiler that pipes the source through an external command
///
/// `{format}` in any argument expands to `cjs` or `esm`; the effective
/// compiler options are passed as JSON in `SPACEY_COMPILER_OPTIONS`.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: String,
    args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a command line; `None` when it is empty
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl TypeScriptCompiler for CommandCompiler {
    fn compile(&self, request: &CompileRequest) -> std::result::Result<String, Vec<String>> {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{format}", request.module.format()))
            .collect();
        let options = Json::Object(request.compiler_options.clone()).to_string();
        let mut child = Command::new(&self.program)
            .args(&args)
            .env("SPACEY_COMPILER_OPTIONS", options)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| vec![format!("failed to run {}: {e}", self.program)])?;

        let writer = child.stdin.take().map(|mut stdin| {
            let source = request.source.clone();
            std::thread::spawn(move || stdin.write_all(source.as_bytes()))
        });
        let output = child
            .wait_with_output()
            .map_err(|e| vec![format!("failed to wait for {}: {e}", self.program)])?;
        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("compiler closed stdin early: {e}"),
                Err(_) => return Err(vec!["compiler input thread panicked".to_string()]),
            }
        }

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostics: Vec<String> = stderr.lines().map(String::from).collect();
        if diagnostics.is_empty() {
            diagnostics.push(format!("{} exited with {}", self.program, output.status));
        }
        Err(diagnostics)
    }
}

type PendingOutput = Shared<BoxFuture<'static, Result<Option<String>>>>;

/// Transpiles TypeScript sources, caching output per identity
pub struct TypeScriptTranspile {
    compiler: Option<Arc<dyn TypeScriptCompiler>>,
    workers: WorkerPool,
    cache: Mutex<HashMap<IdentityToken, Result<String>>>,
    acache: Mutex<HashMap<IdentityToken, PendingOutput>>,
    on_invalidate: EventEmitter<()>,
}

impl TypeScriptTranspile {
    /// Create a transpiler; without a compiler, TypeScript sources fail to load
    pub fn new(compiler: Option<Arc<dyn TypeScriptCompiler>>, workers: WorkerPool) -> Self {
        Self {
            compiler,
            workers,
            cache: Mutex::new(HashMap::new()),
            acache: Mutex::new(HashMap::new()),
            on_invalidate: EventEmitter::new(),
        }
    }

    fn effective_header(source: &Source, header: Option<&ContentHeader>) -> ContentHeader {
        let mut header = header
            .cloned()
            .unwrap_or_else(|| ContentHeader::parse(&source.content));
        if header.language.is_none() && matches!(source.extension(), "ts" | "mts") {
            header.language = Some("TypeScript".to_string());
        }
        header
    }

    fn compile(compiler: Option<&Arc<dyn TypeScriptCompiler>>, request: &CompileRequest) -> Result<String> {
        let compiler = compiler
            .ok_or_else(|| ModuleError::Transpile("no TypeScript compiler is configured".into()))?;
        compiler
            .compile(request)
            .map_err(|diagnostics| ModuleError::Transpile(diagnostics.join("\n")))
    }

    /// Synchronous transpilation with an explicit header
    #[instrument(skip_all, fields(path = source.path.as_deref()))]
    pub fn transpile_with_header(
        &self,
        source: &Source,
        header: Option<&ContentHeader>,
    ) -> Result<Option<String>> {
        if let Some(identity) = source.identity {
            if let Some(cached) = self.cache.lock().get(&identity) {
                return cached.clone().map(Some);
            }
        }
        let header = Self::effective_header(source, header);
        if !header.is_typescript() {
            return Ok(None);
        }
        let request = CompileRequest::new(source.content.clone(), ModuleKind::CommonJs, &header);
        let result = Self::compile(self.compiler.as_ref(), &request);
        if let Some(identity) = source.identity {
            self.cache.lock().insert(identity, result.clone());
        }
        result.map(Some)
    }

    #[cfg(test)]
    pub(crate) fn cached_identities(&self) -> usize {
        self.cache.lock().len() + self.acache.lock().len()
    }

    /// Asynchronous transpilation with an explicit header
    pub async fn atranspile_with_header(
        &self,
        source: &Source,
        header: Option<&ContentHeader>,
    ) -> Result<Option<String>> {
        let Some(identity) = source.identity else {
            return self.pending(source, header).await;
        };
        let pending = {
            let mut acache = self.acache.lock();
            match acache.get(&identity) {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.pending(source, header).shared();
                    acache.insert(identity, pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    fn pending(
        &self,
        source: &Source,
        header: Option<&ContentHeader>,
    ) -> BoxFuture<'static, Result<Option<String>>> {
        let header = Self::effective_header(source, header);
        if !header.is_typescript() {
            return futures::future::ready(Ok(None)).boxed();
        }
        let request = CompileRequest::new(source.content.clone(), ModuleKind::NodeNext, &header);
        let compiler = self.compiler.clone();
        let workers = self.workers.clone();
        async move {
            workers
                .run(move || Self::compile(compiler.as_ref(), &request))
                .await?
                .map(Some)
        }
        .boxed()
    }
}

#[async_trait]
impl Transpile for TypeScriptTranspile {
    fn on_invalidate(&self) -> &EventEmitter<()> {
        &self.on_invalidate
    }

    fn transpile(&self, source: &Source) -> Result<Option<String>> {
        self.transpile_with_header(source, None)
    }

    async fn atranspile(&self, source: &Source) -> Result<Option<String>> {
        self.atranspile_with_header(source, None).await
    }

    fn invalidate(&self, identity: IdentityToken) {
        self.cache.lock().remove(&identity);
        self.acache.lock().remove(&identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        calls: AtomicUsize,
        modules: Mutex<Vec<ModuleKind>>,
    }

    impl TypeScriptCompiler for Recorder {
        fn compile(&self, request: &CompileRequest) -> std::result::Result<String, Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.modules.lock().push(request.module);
            if request.source.contains("@@error") {
                return Err(vec!["TS1005: ';' expected.".to_string()]);
            }
            Ok(format!("/* {} */ {}", request.module.format(), request.source))
        }
    }

    fn transpiler() -> (Arc<Recorder>, TypeScriptTranspile) {
        let recorder = Arc::new(Recorder::default());
        let compiler: Arc<dyn TypeScriptCompiler> = recorder.clone();
        let transpile = TypeScriptTranspile::new(Some(compiler), WorkerPool::new(1));
        (recorder, transpile)
    }

    #[test]
    fn test_javascript_is_not_transpiled() {
        let (recorder, transpile) = transpiler();
        let source = Source::new("let x = 1").with_path("a.js");
        assert_eq!(transpile.transpile(&source).unwrap(), None);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_extension_and_header_select_typescript() {
        let (_, transpile) = transpiler();
        let by_extension = Source::new("let x = 1").with_path("a.mts");
        assert_eq!(
            transpile.transpile(&by_extension).unwrap().as_deref(),
            Some("/* cjs */ let x = 1")
        );

        let by_header = Source::new("// {\"language\": \"TypeScript\"}\nlet y = 2").with_path("b.js");
        assert!(transpile.transpile(&by_header).unwrap().is_some());

        let opted_out = Source::new("// {\"language\": \"JavaScript\"}\nlet z = 3").with_path("c.ts");
        assert_eq!(transpile.transpile(&opted_out).unwrap(), None);
    }

    #[test]
    fn test_sync_cache_is_keyed_by_identity() {
        let (recorder, transpile) = transpiler();
        let identity = IdentityToken::fresh();
        let source = Source::new("let x = 1").with_path("a.ts").with_identity(identity);
        transpile.transpile(&source).unwrap();
        transpile.transpile(&source).unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);

        transpile.invalidate(identity);
        transpile.transpile(&source).unwrap();
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_compile_errors_are_cached() {
        let (recorder, transpile) = transpiler();
        let source = Source::new("@@error").with_path("bad.ts").with_identity(IdentityToken::fresh());
        let err = transpile.transpile(&source).unwrap_err();
        assert!(err.to_string().contains("TS1005"));
        assert!(transpile.transpile(&source).is_err());
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_header_may_override_module_kind() {
        let (recorder, transpile) = transpiler();
        let header = ContentHeader {
            language: Some("TypeScript".into()),
            compiler_options: serde_json::json!({"module": "ESNext"}).as_object().cloned(),
        };
        transpile
            .transpile_with_header(&Source::new("let x = 1"), Some(&header))
            .unwrap();
        assert_eq!(*recorder.modules.lock(), vec![ModuleKind::NodeNext]);
    }

    #[tokio::test]
    async fn test_async_emits_es_modules_once() {
        let (recorder, transpile) = transpiler();
        let source = Source::new("export const x = 1")
            .with_path("a.ts")
            .with_identity(IdentityToken::fresh());
        let (a, b) = tokio::join!(transpile.atranspile(&source), transpile.atranspile(&source));
        assert_eq!(a.unwrap().as_deref(), Some("/* esm */ export const x = 1"));
        assert_eq!(b.unwrap().as_deref(), Some("/* esm */ export const x = 1"));
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_compiler() {
        let transpile = TypeScriptTranspile::new(None, WorkerPool::new(1));
        let err = transpile.transpile(&Source::new("x").with_path("a.ts")).unwrap_err();
        assert!(matches!(err, ModuleError::Transpile(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_compiler_pipes_source() {
        let compiler = CommandCompiler::from_command(&["cat".to_string()]).unwrap();
        let request = CompileRequest::new(Arc::from("let x = 1"), ModuleKind::CommonJs, &ContentHeader::default());
        assert_eq!(compiler.compile(&request).unwrap(), "let x = 1");
        assert!(CommandCompiler::from_command(&[]).is_none());
    }
}
