// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Script values exchanged between the loader and the evaluator
//!
//! Objects are shared, mutable property bags with ordered keys, an optional
//! prototype and per-property attributes. They are reference types: cloning
//! an [`Object`] yields another handle to the same storage.

use crate::error::{ModuleError, Result};
use crate::require::ModuleFacade;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Well-known symbols used by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// `Symbol.toStringTag`
    ToStringTag,
}

/// Property key: a string or a well-known symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// String-named property
    String(String),
    /// Symbol-named property
    Symbol(Symbol),
}

impl From<&str> for PropertyKey {
    fn from(key: &str) -> Self {
        Self::String(key.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(key: String) -> Self {
        Self::String(key)
    }
}

impl From<Symbol> for PropertyKey {
    fn from(symbol: Symbol) -> Self {
        Self::Symbol(symbol)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKey::String(key) => f.write_str(key),
            PropertyKey::Symbol(Symbol::ToStringTag) => f.write_str("Symbol(Symbol.toStringTag)"),
        }
    }
}

/// Data property with its attributes
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub value: Value,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl PropertyDescriptor {
    /// Ordinary writable, enumerable, configurable property
    pub fn data(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Non-enumerable property that can still be changed
    pub fn hidden(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Non-writable, non-enumerable, non-configurable property
    pub fn frozen(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }
}

struct ObjectData {
    properties: Vec<(PropertyKey, PropertyDescriptor)>,
    prototype: Option<Object>,
    extensible: bool,
}

impl ObjectData {
    fn position(&self, key: &PropertyKey) -> Option<usize> {
        self.properties.iter().position(|(k, _)| k == key)
    }
}

/// Shared, mutable script object
#[derive(Clone)]
pub struct Object(Arc<RwLock<ObjectData>>);

impl Object {
    /// Create an empty extensible object without a prototype
    pub fn new() -> Self {
        Self::with_prototype(None)
    }

    /// Create an empty object inheriting from `prototype`
    pub fn with_prototype(prototype: Option<Object>) -> Self {
        Self(Arc::new(RwLock::new(ObjectData {
            properties: Vec::new(),
            prototype,
            extensible: true,
        })))
    }

    /// Build an object from ordinary properties
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<PropertyKey>,
        V: Into<Value>,
    {
        let object = Self::new();
        for (key, value) in entries {
            object.set(key, value);
        }
        object
    }

    /// Build a module namespace object
    ///
    /// Exported bindings are writable but non-configurable, the object is
    /// not extensible and carries a locked `Symbol.toStringTag` of `"Module"`.
    pub fn module_namespace<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<PropertyKey>,
        V: Into<Value>,
    {
        let mut properties: Vec<(PropertyKey, PropertyDescriptor)> = Vec::new();
        for (key, value) in entries {
            let key = key.into();
            let descriptor = PropertyDescriptor {
                value: value.into(),
                writable: true,
                enumerable: true,
                configurable: false,
            };
            match properties.iter_mut().find(|(k, _)| *k == key) {
                Some((_, existing)) => *existing = descriptor,
                None => properties.push((key, descriptor)),
            }
        }
        properties.push((
            PropertyKey::Symbol(Symbol::ToStringTag),
            PropertyDescriptor::frozen("Module"),
        ));
        Self(Arc::new(RwLock::new(ObjectData {
            properties,
            prototype: None,
            extensible: false,
        })))
    }

    /// Own property descriptor
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        let data = self.0.read();
        data.position(key).map(|index| data.properties[index].1.clone())
    }

    /// Whether the object has an own property
    pub fn has_own(&self, key: &PropertyKey) -> bool {
        self.0.read().position(key).is_some()
    }

    /// Whether the property exists on the object or its prototype chain
    pub fn has(&self, key: &PropertyKey) -> bool {
        let mut current = Some(self.clone());
        while let Some(object) = current {
            if object.has_own(key) {
                return true;
            }
            current = object.prototype();
        }
        false
    }

    /// Read a property, following the prototype chain
    pub fn get(&self, key: impl Into<PropertyKey>) -> Value {
        let key = key.into();
        let mut current = Some(self.clone());
        while let Some(object) = current {
            if let Some(descriptor) = object.get_own_property(&key) {
                return descriptor.value;
            }
            current = object.prototype();
        }
        Value::Undefined
    }

    /// Assign a property, returning `false` when the assignment is rejected
    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let value = value.into();
        {
            let mut data = self.0.write();
            if let Some(index) = data.position(&key) {
                let descriptor = &mut data.properties[index].1;
                if !descriptor.writable {
                    return false;
                }
                descriptor.value = value;
                return true;
            }
        }
        if let Some(prototype) = self.prototype() {
            if let Some(inherited) = prototype.lookup(&key) {
                if !inherited.writable {
                    return false;
                }
            }
        }
        let mut data = self.0.write();
        if !data.extensible {
            return false;
        }
        data.properties.push((key, PropertyDescriptor::data(value)));
        true
    }

    fn lookup(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        let mut current = Some(self.clone());
        while let Some(object) = current {
            if let Some(descriptor) = object.get_own_property(key) {
                return Some(descriptor);
            }
            current = object.prototype();
        }
        None
    }

    /// Define or redefine an own property
    pub fn define_property(&self, key: impl Into<PropertyKey>, descriptor: PropertyDescriptor) -> bool {
        let key = key.into();
        let mut data = self.0.write();
        match data.position(&key) {
            Some(index) => {
                let existing = &mut data.properties[index].1;
                if !existing.configurable {
                    let same_shape = !descriptor.configurable
                        && descriptor.enumerable == existing.enumerable
                        && (existing.writable || !descriptor.writable);
                    if !same_shape {
                        return false;
                    }
                    if !existing.writable && !descriptor.value.same_value(&existing.value) {
                        return false;
                    }
                }
                *existing = descriptor;
                true
            }
            None if data.extensible => {
                data.properties.push((key, descriptor));
                true
            }
            None => false,
        }
    }

    /// Delete an own property, returning `false` for non-configurable ones
    pub fn delete(&self, key: &PropertyKey) -> bool {
        let mut data = self.0.write();
        match data.position(key) {
            Some(index) if !data.properties[index].1.configurable => false,
            Some(index) => {
                data.properties.remove(index);
                true
            }
            None => true,
        }
    }

    /// Own keys in insertion order
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        self.0.read().properties.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn prototype(&self) -> Option<Object> {
        self.0.read().prototype.clone()
    }

    /// Replace the prototype, rejecting cycles and changes on sealed objects
    pub fn set_prototype(&self, prototype: Option<Object>) -> bool {
        let unchanged = match (&self.prototype(), &prototype) {
            (None, None) => true,
            (Some(current), Some(next)) => current.ptr_eq(next),
            _ => false,
        };
        if unchanged {
            return true;
        }
        if !self.is_extensible() {
            return false;
        }
        let mut cursor = prototype.clone();
        while let Some(object) = cursor {
            if object.ptr_eq(self) {
                return false;
            }
            cursor = object.prototype();
        }
        self.0.write().prototype = prototype;
        true
    }

    pub fn is_extensible(&self) -> bool {
        self.0.read().extensible
    }

    pub fn prevent_extensions(&self) {
        self.0.write().extensible = false;
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.own_keys().iter().map(ToString::to_string).collect();
        f.debug_struct("Object").field("keys", &keys).finish()
    }
}

type CallFn = dyn Fn(&Value, &[Value]) -> Result<Value> + Send + Sync;
type ConstructFn = dyn Fn(&[Value], &Function) -> Result<Value> + Send + Sync;

/// Callable value backed by a Rust closure
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    call: Arc<CallFn>,
    construct: Option<Arc<ConstructFn>>,
}

impl Function {
    /// Create a plain callable function
    pub fn new(
        name: impl Into<Arc<str>>,
        call: impl Fn(&Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            call: Arc::new(call),
            construct: None,
        }
    }

    /// Make the function constructible
    ///
    /// The constructor receives the arguments and the `new.target` function.
    pub fn with_constructor(
        mut self,
        construct: impl Fn(&[Value], &Function) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        self.construct = Some(Arc::new(construct));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call with an explicit receiver
    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value> {
        (self.call)(this, args)
    }

    /// Construct, with `new.target` defaulting to the function itself
    pub fn construct(&self, args: &[Value], new_target: Option<&Function>) -> Result<Value> {
        let construct = self
            .construct
            .as_ref()
            .ok_or_else(|| ModuleError::type_error(format!("{} is not a constructor", self.name)))?;
        construct(args, new_target.unwrap_or(self))
    }

    pub fn is_constructor(&self) -> bool {
        self.construct.is_some()
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.call) as *const () as usize
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Function) -> bool {
        self.identity() == other.identity()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name)
    }
}

/// A script value
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Object(Object),
    Function(Function),
    /// Namespace returned by an import with CommonJS interop
    Facade(ModuleFacade),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn as_facade(&self) -> Option<&ModuleFacade> {
        match self {
            Value::Facade(facade) => Some(facade),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Property read on objects and facades; other values have none
    pub fn get(&self, key: impl Into<PropertyKey>) -> Value {
        match self {
            Value::Object(object) => object.get(key),
            Value::Facade(facade) => facade.get(key),
            _ => Value::Undefined,
        }
    }

    /// Property assignment on objects and facades
    pub fn set(&self, key: impl Into<PropertyKey>, value: impl Into<Value>) -> bool {
        match self {
            Value::Object(object) => object.set(key, value),
            Value::Facade(facade) => facade.set(key, value),
            _ => false,
        }
    }

    /// `typeof`-style type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Object(_) | Value::Facade(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }

    /// SameValue comparison: primitives by value, references by identity
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                (a.is_nan() && b.is_nan()) || (a == b && a.is_sign_negative() == b.is_sign_negative())
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Facade(a), Value::Facade(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(_) => write!(f, "{self}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(object) => object.fmt(f),
            Value::Function(function) => function.fmt(f),
            Value::Facade(facade) => facade.fmt(f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if n.is_nan() => f.write_str("NaN"),
            Value::Number(n) if n.is_infinite() => {
                f.write_str(if *n > 0.0 { "Infinity" } else { "-Infinity" })
            }
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e21 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
            Value::Function(function) => write!(f, "function {}() {{ [native code] }}", function.name()),
            Value::Object(_) | Value::Facade(_) => match self.get(Symbol::ToStringTag) {
                Value::String(tag) => write!(f, "[object {tag}]"),
                _ => f.write_str("[object Object]"),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}
