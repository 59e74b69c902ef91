// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! CommonJS view of an imported ES module
//!
//! Importing with CommonJS interop yields a [`ModuleFacade`] over two
//! records: the `module.exports` object the body filled in, and the ES
//! namespace the module loader produced. Reads prefer the exports object
//! and fall back to the namespace, so `default` and named ES bindings stay
//! visible. Writes, deletes and definitions go to the exports object, the
//! namespace itself being immutable.

use crate::error::{ModuleError, Result};
use crate::value::{Function, Object, PropertyDescriptor, PropertyKey, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

struct FacadeInner {
    exports: Object,
    namespace: Object,
    /// Wrappers handed out for namespace functions, keyed by function identity
    functions: Mutex<HashMap<usize, Function>>,
}

/// Exports of an ES module loaded with CommonJS interop
#[derive(Clone)]
pub struct ModuleFacade(Arc<FacadeInner>);

impl ModuleFacade {
    /// Present `namespace` with `exports` taking precedence
    pub fn new(exports: Object, namespace: Object) -> Self {
        Self(Arc::new(FacadeInner {
            exports,
            namespace,
            functions: Mutex::new(HashMap::new()),
        }))
    }

    /// The CommonJS exports object
    pub fn exports(&self) -> &Object {
        &self.0.exports
    }

    /// The ES module namespace
    pub fn namespace(&self) -> &Object {
        &self.0.namespace
    }

    /// Read from the exports, falling back to the namespace
    ///
    /// Namespace functions come back bound to the facade.
    pub fn get(&self, key: impl Into<PropertyKey>) -> Value {
        let key = key.into();
        if self.0.exports.has(&key) {
            return self.0.exports.get(key);
        }
        match self.0.namespace.get(key) {
            Value::Function(function) => Value::Function(self.wrap(function)),
            value => value,
        }
    }

    /// Assign on the exports
    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> bool {
        self.0.exports.set(key, value)
    }

    /// Delete from the exports; namespace bindings stay visible
    pub fn delete(&self, key: &PropertyKey) -> bool {
        self.0.exports.delete(key)
    }

    /// Define on the exports
    pub fn define_property(&self, key: impl Into<PropertyKey>, descriptor: PropertyDescriptor) -> bool {
        self.0.exports.define_property(key, descriptor)
    }

    /// Whether either the exports or the namespace has `key`
    pub fn has(&self, key: &PropertyKey) -> bool {
        self.0.exports.has(key) || self.0.namespace.has(key)
    }

    /// Own keys of the exports object followed by the namespace's remaining keys
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        let mut keys = self.0.exports.own_keys();
        for key in self.0.namespace.own_keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Own property of the exports, else of the namespace
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        self.0
            .exports
            .get_own_property(key)
            .or_else(|| self.0.namespace.get_own_property(key))
    }

    /// Prototype of the exports
    pub fn prototype(&self) -> Option<Object> {
        self.0.exports.prototype()
    }

    /// Set the prototype of the exports
    pub fn set_prototype(&self, prototype: Option<Object>) -> bool {
        self.0.exports.set_prototype(prototype)
    }

    /// Whether the exports accept new properties
    pub fn is_extensible(&self) -> bool {
        self.0.exports.is_extensible()
    }

    /// Stop new properties from being added to the exports
    pub fn prevent_extensions(&self) {
        self.0.exports.prevent_extensions();
    }

    /// Call the function stored under `key` with the facade as receiver
    pub fn call(&self, key: impl Into<PropertyKey>, args: &[Value]) -> Result<Value> {
        let key = key.into();
        match self.get(key.clone()) {
            Value::Function(function) => function.call(&Value::Facade(self.clone()), args),
            _ => Err(ModuleError::type_error(format!("{key} is not a function"))),
        }
    }

    /// Construct the class stored under `key`
    pub fn construct(&self, key: impl Into<PropertyKey>, args: &[Value]) -> Result<Value> {
        let key = key.into();
        match self.get(key.clone()) {
            Value::Function(function) => function.construct(args, None),
            _ => Err(ModuleError::type_error(format!("{key} is not a constructor"))),
        }
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ModuleFacade) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Wrapper redirecting a facade receiver to the namespace
    ///
    /// `new` through the wrapper constructs the original function, and a
    /// `new.target` of the wrapper itself is replaced by the original.
    fn wrap(&self, function: Function) -> Function {
        let identity = function.identity();
        if let Some(wrapper) = self.0.functions.lock().get(&identity) {
            return wrapper.clone();
        }

        let facade: Weak<FacadeInner> = Arc::downgrade(&self.0);
        let target = function.clone();
        let mut wrapper = Function::new(function.name().to_string(), move |this, args| {
            let this = match (this, facade.upgrade()) {
                (Value::Facade(receiver), Some(inner)) if Arc::ptr_eq(&receiver.0, &inner) => {
                    Value::Object(inner.namespace.clone())
                }
                _ => this.clone(),
            };
            target.call(&this, args)
        });
        if function.is_constructor() {
            let wrapper_identity = Arc::new(OnceLock::new());
            let own_identity = Arc::clone(&wrapper_identity);
            let target = function.clone();
            wrapper = wrapper.with_constructor(move |args, new_target| {
                if own_identity.get() == Some(&new_target.identity()) {
                    target.construct(args, None)
                } else {
                    target.construct(args, Some(new_target))
                }
            });
            let _ = wrapper_identity.set(wrapper.identity());
        }

        self.0
            .functions
            .lock()
            .entry(identity)
            .or_insert(wrapper)
            .clone()
    }
}

impl fmt::Debug for ModuleFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleFacade")
            .field("exports", &self.0.exports)
            .field("namespace", &self.0.namespace)
            .finish()
    }
}
