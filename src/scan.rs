// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Evaluator that follows a module's literal `require("...")` calls
//!
//! No script engine is embedded in the CLI. Instead every module is
//! "evaluated" by loading the modules it requires through the same loader,
//! which exercises resolution, transpilation, caching and invalidation
//! exactly as a real engine would. The exports of a module map each
//! specifier it required to that module's exports.

use futures::future::{BoxFuture, FutureExt};
use spacey_modules::error::Result;
use spacey_modules::evaluator::{Evaluator, ModuleSource, ScriptScope};
use spacey_modules::rewrite::{check_script, find_require_calls};
use spacey_modules::{Object, PropertyDescriptor, Require, RequireOptions, Symbol, Value};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ScanEvaluator;

impl ScanEvaluator {
    fn load_requires(id: &str, code: &str, require: &Arc<Require>, exports: &Value) -> Result<()> {
        for call in find_require_calls(id, code)? {
            let value = require.require(&call.specifier, RequireOptions::default())?;
            exports.set(call.specifier.as_str(), value);
        }
        Ok(())
    }
}

impl Evaluator for ScanEvaluator {
    fn check_script(&self, id: &str, code: &str) -> Result<()> {
        check_script(id, code)
    }

    fn run_script(&self, scope: ScriptScope<'_>) -> Result<()> {
        Self::load_requires(scope.id, scope.code, scope.require, &scope.exports)
    }

    fn run_module(&self, source: ModuleSource) -> BoxFuture<'static, Result<Object>> {
        async move {
            let exports = Object::new();
            exports.define_property(Symbol::ToStringTag, PropertyDescriptor::hidden("Module"));
            Self::load_requires(&source.id, &source.code, &source.require, &Value::from(exports.clone()))?;
            let mut namespace = vec![("default".to_string(), Value::from(exports.clone()))];
            if source.prelude.is_some() {
                namespace.push(("module".to_string(), Value::from(Object::from_entries([("exports", exports)]))));
            }
            Ok(Object::module_namespace(namespace))
        }
        .boxed()
    }
}
