//! Owners: the objects generated units attach to.
//!
//! An [`OwnerType`] declares state fields and static capabilities (UnitScript
//! written by the developer, or native Rust closures). An [`Owner`] is one
//! instance with its own state. Calls are dispatched as follows:
//!
//! * instance calls: Singleton context, Instance context, static
//!   capabilities, secure stdlib
//! * type calls: Type context, static type capabilities, secure stdlib
//!
//! Blocked host operations are intercepted before any of these.

use crate::error::{AgencyError, AgencyResult, Stage, ValidationErrorKind};
use crate::registry::{ExecutionRegistry, GeneratedUnit, OwnerRef, ScopeKind};
use crate::sandbox::{is_shadowed, shadow_violation, ExecutionContext};
use crate::trace::{Fault, Frame, FrameOrigin};
use indexmap::IndexMap;
use itertools::Itertools;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use unitscript::runtime::{secure_stdlib, Arity, BuiltinFunction, DEFAULT_MAX_CALL_DEPTH};
use unitscript::{Evaluator, Host, RuntimeError, RuntimeResult, UnitDef, Value};
use uuid::Uuid;

pub type NativeFn = dyn Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync;

/// A capability implemented in Rust.
#[derive(Clone)]
pub struct NativeCapability {
    name: String,
    arity: Arity,
    func: Arc<NativeFn>,
}

impl NativeCapability {
    pub fn call(&self, args: &[Value]) -> RuntimeResult<Value> {
        if !self.arity.accepts(args.len()) {
            return Err(RuntimeError::ArityMismatch {
                function: self.name.clone(),
                expected: self.arity.to_string(),
                actual: args.len(),
            });
        }
        (self.func)(args)
    }
}

impl fmt::Debug for NativeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<native {}/{}>", self.name, self.arity)
    }
}

/// Capability declared with the owner type.
#[derive(Debug, Clone)]
pub enum Capability {
    Script(Arc<UnitDef>),
    Native(NativeCapability),
}

impl Capability {
    pub fn arity(&self) -> Arity {
        match self {
            Capability::Script(unit) => Arity::Fixed(unit.arity()),
            Capability::Native(native) => native.arity,
        }
    }

    pub fn source(&self) -> Option<&str> {
        match self {
            Capability::Script(unit) => Some(&unit.source),
            Capability::Native(_) => None,
        }
    }
}

/// What a pipeline sees of an owner when writing prompts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Introspection {
    pub type_name: String,
    pub fields: Vec<String>,
    pub capabilities: Vec<String>,
}

impl Introspection {
    pub fn field_list(&self) -> String {
        self.fields.join(", ")
    }

    pub fn capability_list(&self) -> String {
        self.capabilities.join(", ")
    }
}

pub struct OwnerTypeBuilder {
    name: String,
    fields: IndexMap<String, Value>,
    type_fields: IndexMap<String, Value>,
    sources: Vec<String>,
    capabilities: IndexMap<String, Capability>,
    type_capabilities: IndexMap<String, Capability>,
    max_call_depth: usize,
}

impl OwnerTypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
            type_fields: IndexMap::new(),
            sources: Vec::new(),
            capabilities: IndexMap::new(),
            type_capabilities: IndexMap::new(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    /// Instance state field with its initial value.
    pub fn field(mut self, name: &str, initial: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), initial.into());
        self
    }

    /// Field of the type itself, visible as `self.<name>` in type-level units.
    pub fn type_field(mut self, name: &str, initial: impl Into<Value>) -> Self {
        self.type_fields.insert(name.to_string(), initial.into());
        self
    }

    /// Static capabilities written in UnitScript. `define self.x` units become
    /// type capabilities, the rest instance capabilities.
    pub fn script(mut self, source: &str) -> Self {
        self.sources.push(source.to_string());
        self
    }

    pub fn native<F>(mut self, name: &str, arity: Arity, func: F) -> Self
    where
        F: Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        self.capabilities.insert(
            name.to_string(),
            Capability::Native(NativeCapability {
                name: name.to_string(),
                arity,
                func: Arc::new(func),
            }),
        );
        self
    }

    pub fn type_native<F>(mut self, name: &str, arity: Arity, func: F) -> Self
    where
        F: Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        self.type_capabilities.insert(
            name.to_string(),
            Capability::Native(NativeCapability {
                name: name.to_string(),
                arity,
                func: Arc::new(func),
            }),
        );
        self
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn build(mut self) -> AgencyResult<Arc<OwnerType>> {
        for source in std::mem::take(&mut self.sources) {
            let units = unitscript::parse(&source).map_err(|e| AgencyError::Validation {
                kind: ValidationErrorKind::Syntax,
                detail: format!("static capabilities of {}: {}", self.name, e),
                attempt: None,
                generated_code: None,
            })?;
            for unit in units {
                let table = if unit.type_level {
                    &mut self.type_capabilities
                } else {
                    &mut self.capabilities
                };
                table.insert(unit.name.clone(), Capability::Script(Arc::new(unit)));
            }
        }

        Ok(Arc::new(OwnerType {
            type_state: Mutex::new(self.type_fields),
            name: self.name,
            fields: self.fields,
            capabilities: self.capabilities,
            type_capabilities: self.type_capabilities,
            instance_context: OnceCell::new(),
            type_context: OnceCell::new(),
            registry: RwLock::new(ExecutionRegistry::new()),
            install_lock: Mutex::new(()),
            max_call_depth: self.max_call_depth,
        }))
    }
}

pub struct OwnerType {
    name: String,
    fields: IndexMap<String, Value>,
    type_state: Mutex<IndexMap<String, Value>>,
    capabilities: IndexMap<String, Capability>,
    type_capabilities: IndexMap<String, Capability>,
    instance_context: OnceCell<Arc<ExecutionContext>>,
    type_context: OnceCell<Arc<ExecutionContext>>,
    /// Instance and Type scope units of this type.
    registry: RwLock<ExecutionRegistry>,
    install_lock: Mutex<()>,
    max_call_depth: usize,
}

impl fmt::Debug for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerType")
            .field("name", &self.name)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("capabilities", &self.capabilities.keys().collect::<Vec<_>>())
            .finish()
    }
}

// Units are installed whole and registry entries replaced whole, so a
// poisoned guard still protects consistent data.
fn read_registry(lock: &RwLock<ExecutionRegistry>) -> RwLockReadGuard<'_, ExecutionRegistry> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_registry(lock: &RwLock<ExecutionRegistry>) -> RwLockWriteGuard<'_, ExecutionRegistry> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn context_names(cell: &OnceCell<Arc<ExecutionContext>>) -> Vec<String> {
    cell.get().map(|ctx| ctx.names()).unwrap_or_default()
}

impl OwnerType {
    pub fn builder(name: impl Into<String>) -> OwnerTypeBuilder {
        OwnerTypeBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Initial values of the instance state fields.
    pub fn field_defaults(&self) -> &IndexMap<String, Value> {
        &self.fields
    }

    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.get(name)
    }

    pub fn type_capability(&self, name: &str) -> Option<&Capability> {
        self.type_capabilities.get(name)
    }

    /// New instance with the declared field defaults.
    pub fn instantiate(self: &Arc<Self>) -> Owner {
        Owner {
            id: Uuid::new_v4(),
            state: Mutex::new(self.fields.clone()),
            owner_type: Arc::clone(self),
            singleton_context: OnceCell::new(),
            singleton_registry: RwLock::new(ExecutionRegistry::new()),
            install_lock: Mutex::new(()),
        }
    }

    /// Call a type-level unit or capability.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value, Fault> {
        let mut state = self.type_state.lock().map_err(|_| {
            Fault::new(
                RuntimeError::InternalError(format!("type state of {} is poisoned", self.name)),
                Vec::new(),
            )
        })?;
        Dispatcher::new(self, None, &mut state).run(name, args)
    }

    pub fn get_type_field(&self, name: &str) -> Option<Value> {
        self.type_state.lock().ok()?.get(name).cloned()
    }

    pub fn responds_to(&self, name: &str) -> bool {
        self.arity_of(name).is_some()
    }

    pub fn arity_of(&self, name: &str) -> Option<Arity> {
        if is_shadowed(name) {
            return None;
        }
        if let Some(unit) = self.type_context.get().and_then(|ctx| ctx.resolve(name).ok().flatten()) {
            return Some(Arity::Fixed(unit.arity()));
        }
        if let Some(cap) = self.type_capabilities.get(name) {
            return Some(cap.arity());
        }
        secure_stdlib().lookup(name).map(|f| f.arity)
    }

    /// Source of a type-level unit: generated first, then static.
    pub fn lookup_source(&self, name: &str) -> Option<String> {
        if let Some(unit) = read_registry(&self.registry).get(ScopeKind::Type, name) {
            return Some(unit.source.clone());
        }
        self.type_capabilities
            .get(name)
            .and_then(|cap| cap.source())
            .map(str::to_string)
    }

    /// Generated unit of this type in `scope` (Instance or Type).
    pub fn find_unit(&self, scope: ScopeKind, name: &str) -> Option<GeneratedUnit> {
        read_registry(&self.registry).get(scope, name).cloned()
    }

    /// Every Instance and Type unit generated for this type.
    pub fn generated_units(&self) -> Vec<GeneratedUnit> {
        read_registry(&self.registry).units().cloned().collect()
    }

    pub fn introspect(&self) -> Introspection {
        let fields: Vec<String> = self
            .type_state
            .lock()
            .map(|state| state.keys().cloned().collect())
            .unwrap_or_default();
        let capabilities: Vec<String> = self
            .type_capabilities
            .keys()
            .cloned()
            .chain(context_names(&self.type_context))
            .unique()
            .collect();
        Introspection {
            type_name: self.name.clone(),
            fields,
            capabilities,
        }
    }

    pub(crate) fn install_guard(&self) -> MutexGuard<'_, ()> {
        self.install_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One instance of an [`OwnerType`].
pub struct Owner {
    id: Uuid,
    owner_type: Arc<OwnerType>,
    state: Mutex<IndexMap<String, Value>>,
    singleton_context: OnceCell<Arc<ExecutionContext>>,
    /// Singleton scope units of this instance only.
    singleton_registry: RwLock<ExecutionRegistry>,
    install_lock: Mutex<()>,
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("type", &self.owner_type.name)
            .field("id", &self.id)
            .finish()
    }
}

impl Owner {
    pub fn new(owner_type: &Arc<OwnerType>) -> Self {
        owner_type.instantiate()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn owner_type(&self) -> &Arc<OwnerType> {
        &self.owner_type
    }

    pub fn type_name(&self) -> &str {
        &self.owner_type.name
    }

    pub fn owner_ref(&self) -> OwnerRef {
        OwnerRef::Instance {
            type_name: self.owner_type.name.clone(),
            id: self.id,
        }
    }

    /// Call `name` on this instance. The returned fault carries the unit
    /// frames active when the error was raised, innermost first.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value, Fault> {
        let mut state = self.state.lock().map_err(|_| {
            Fault::new(
                RuntimeError::InternalError(format!(
                    "state of {} is poisoned",
                    self.owner_ref()
                )),
                Vec::new(),
            )
        })?;
        Dispatcher::new(&self.owner_type, Some(self), &mut state).run(name, args)
    }

    /// [`Owner::invoke`] with the fault wrapped as an [`AgencyError`].
    pub fn call(&self, name: &str, args: Vec<Value>) -> AgencyResult<Value> {
        Ok(self.invoke(name, args)?)
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.state.lock().ok()?.get(name).cloned()
    }

    pub fn set_field(&self, name: &str, value: impl Into<Value>) -> AgencyResult<()> {
        let mut state = self.state.lock().map_err(|_| {
            AgencyError::Configuration(format!("state of {} is poisoned", self.owner_ref()))
        })?;
        state.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Snapshot of the instance state.
    pub fn state(&self) -> IndexMap<String, Value> {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or_default()
    }

    pub fn responds_to(&self, name: &str) -> bool {
        self.arity_of(name).is_some()
    }

    pub fn arity_of(&self, name: &str) -> Option<Arity> {
        if is_shadowed(name) {
            return None;
        }
        let generated = [
            self.singleton_context.get(),
            self.owner_type.instance_context.get(),
        ];
        for ctx in generated.into_iter().flatten() {
            if let Ok(Some(unit)) = ctx.resolve(name) {
                return Some(Arity::Fixed(unit.arity()));
            }
        }
        if let Some(cap) = self.owner_type.capabilities.get(name) {
            return Some(cap.arity());
        }
        secure_stdlib().lookup(name).map(|f| f.arity)
    }

    /// The generated unit `name` visible from this instance, Singleton first.
    pub fn find_unit(&self, name: &str) -> Option<GeneratedUnit> {
        if let Some(unit) = read_registry(&self.singleton_registry).get(ScopeKind::Singleton, name) {
            return Some(unit.clone());
        }
        self.owner_type.find_unit(ScopeKind::Instance, name)
    }

    /// Current source of `name`: a generated unit when one is installed,
    /// otherwise the static capability source.
    pub fn lookup_source(&self, name: &str) -> Option<String> {
        if let Some(unit) = self.find_unit(name) {
            return Some(unit.source);
        }
        self.owner_type
            .capabilities
            .get(name)
            .and_then(|cap| cap.source())
            .map(str::to_string)
    }

    /// [`Owner::lookup_source`] with the generating description prepended
    /// as comment lines.
    pub fn annotated_source(&self, name: &str) -> Option<String> {
        match self.find_unit(name) {
            Some(unit) => Some(unit.annotated_source()),
            None => self.lookup_source(name),
        }
    }

    /// Names of generated units visible from this instance.
    pub fn installed_unit_names(&self) -> Vec<String> {
        read_registry(&self.singleton_registry)
            .names(ScopeKind::Singleton)
            .into_iter()
            .chain(read_registry(&self.owner_type.registry).names(ScopeKind::Instance))
            .unique()
            .collect()
    }

    pub fn introspect(&self) -> Introspection {
        let fields: Vec<String> = self
            .state
            .lock()
            .map(|state| state.keys().cloned().collect())
            .unwrap_or_else(|_| self.owner_type.fields.keys().cloned().collect());
        let capabilities: Vec<String> = self
            .owner_type
            .capabilities
            .keys()
            .cloned()
            .chain(context_names(&self.owner_type.instance_context))
            .chain(context_names(&self.singleton_context))
            .unique()
            .collect();
        Introspection {
            type_name: self.owner_type.name.clone(),
            fields,
            capabilities,
        }
    }

    pub(crate) fn install_guard(&self) -> MutexGuard<'_, ()> {
        self.install_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Where a pipeline run installs its units.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Instance(&'a Owner),
    Type(&'a OwnerType),
}

impl<'a> From<&'a Owner> for Target<'a> {
    fn from(owner: &'a Owner) -> Self {
        Target::Instance(owner)
    }
}

impl<'a> From<&'a OwnerType> for Target<'a> {
    fn from(owner_type: &'a OwnerType) -> Self {
        Target::Type(owner_type)
    }
}

impl<'a> From<&'a Arc<OwnerType>> for Target<'a> {
    fn from(owner_type: &'a Arc<OwnerType>) -> Self {
        Target::Type(owner_type.as_ref())
    }
}

impl<'a> Target<'a> {
    pub fn owner_type(&self) -> &'a OwnerType {
        match *self {
            Target::Instance(owner) => &owner.owner_type,
            Target::Type(owner_type) => owner_type,
        }
    }

    pub fn owner_ref(&self) -> OwnerRef {
        match self {
            Target::Instance(owner) => owner.owner_ref(),
            Target::Type(owner_type) => OwnerRef::Type(owner_type.name.clone()),
        }
    }

    pub fn introspect(&self) -> Introspection {
        match self {
            Target::Instance(owner) => owner.introspect(),
            Target::Type(owner_type) => owner_type.introspect(),
        }
    }

    pub fn supports(&self, scope: ScopeKind) -> bool {
        !matches!((self, scope), (Target::Type(_), ScopeKind::Singleton))
    }

    /// Context for `scope`, created on first use.
    pub(crate) fn context(&self, scope: ScopeKind) -> AgencyResult<Arc<ExecutionContext>> {
        let owner_type = self.owner_type();
        let (cell, label) = match (self, scope) {
            (Target::Instance(owner), ScopeKind::Singleton) => {
                (&owner.singleton_context, owner.owner_ref().to_string())
            }
            (Target::Type(_), ScopeKind::Singleton) => {
                return Err(AgencyError::generation(
                    Stage::Install,
                    None,
                    format!("singleton scope needs an instance of {}", owner_type.name),
                ))
            }
            (_, ScopeKind::Instance) => (
                &owner_type.instance_context,
                format!("{}/instance", owner_type.name),
            ),
            (_, ScopeKind::Type) => (&owner_type.type_context, format!("{}/type", owner_type.name)),
        };
        Ok(Arc::clone(
            cell.get_or_init(|| Arc::new(ExecutionContext::new(label, scope))),
        ))
    }

    pub(crate) fn record(&self, unit: GeneratedUnit) -> AgencyResult<()> {
        match (self, unit.scope) {
            (Target::Instance(owner), ScopeKind::Singleton) => {
                write_registry(&owner.singleton_registry).record(unit);
            }
            (Target::Type(_), ScopeKind::Singleton) => {
                return Err(AgencyError::generation(
                    Stage::Install,
                    None,
                    "singleton units need an owner instance",
                ))
            }
            _ => {
                write_registry(&self.owner_type().registry).record(unit);
            }
        }
        Ok(())
    }
}

enum Resolved {
    Blocked,
    Unit(Arc<UnitDef>, FrameOrigin),
    Native(NativeCapability),
    Builtin(&'static BuiltinFunction),
}

/// [`Host`] for one top-level invocation. Tracks the active unit frames and
/// keeps the stack at the first failure.
struct Dispatcher<'a> {
    owner_type: &'a OwnerType,
    /// `None` for type-level calls.
    owner: Option<&'a Owner>,
    state: &'a mut IndexMap<String, Value>,
    evaluator: Evaluator,
    frames: Vec<Frame>,
    fault_trace: Option<Vec<Frame>>,
}

impl<'a> Dispatcher<'a> {
    fn new(
        owner_type: &'a OwnerType,
        owner: Option<&'a Owner>,
        state: &'a mut IndexMap<String, Value>,
    ) -> Self {
        Self {
            owner_type,
            owner,
            state,
            evaluator: Evaluator::new(),
            frames: Vec::new(),
            fault_trace: None,
        }
    }

    fn run(mut self, name: &str, args: Vec<Value>) -> Result<Value, Fault> {
        match self.call(name, args) {
            Some(Ok(value)) => Ok(value),
            Some(Err(error)) => Err(Fault::new(error, self.fault_trace.take().unwrap_or_default())),
            None => Err(Fault::new(
                RuntimeError::UndefinedSymbol(name.to_string()),
                Vec::new(),
            )),
        }
    }

    fn resolve(&self, name: &str) -> RuntimeResult<Option<Resolved>> {
        if is_shadowed(name) {
            return Ok(Some(Resolved::Blocked));
        }

        let (contexts, statics) = match self.owner {
            Some(owner) => (
                [
                    owner.singleton_context.get(),
                    self.owner_type.instance_context.get(),
                ],
                &self.owner_type.capabilities,
            ),
            None => (
                [self.owner_type.type_context.get(), None],
                &self.owner_type.type_capabilities,
            ),
        };
        for ctx in contexts.into_iter().flatten() {
            if let Some(unit) = ctx.resolve(name)? {
                return Ok(Some(Resolved::Unit(unit, FrameOrigin::Generated(ctx.scope()))));
            }
        }
        match statics.get(name) {
            Some(Capability::Script(unit)) => {
                return Ok(Some(Resolved::Unit(Arc::clone(unit), FrameOrigin::Static)))
            }
            Some(Capability::Native(native)) => return Ok(Some(Resolved::Native(native.clone()))),
            None => {}
        }
        Ok(secure_stdlib().lookup(name).map(Resolved::Builtin))
    }

    fn run_unit(
        &mut self,
        unit: Arc<UnitDef>,
        origin: FrameOrigin,
        args: Vec<Value>,
    ) -> RuntimeResult<Value> {
        if self.frames.len() >= self.owner_type.max_call_depth {
            return Err(RuntimeError::StackOverflow(unit.name.clone()));
        }
        self.frames.push(Frame {
            symbol: unit.name.clone(),
            origin,
            line: unit.line(),
        });
        let evaluator = self.evaluator.clone();
        let result = evaluator.call_unit(&unit, args, self);
        if result.is_err() && self.fault_trace.is_none() {
            self.fault_trace = Some(self.frames.iter().rev().cloned().collect());
        }
        self.frames.pop();
        result
    }
}

impl Host for Dispatcher<'_> {
    fn call(&mut self, name: &str, args: Vec<Value>) -> Option<RuntimeResult<Value>> {
        let resolved = match self.resolve(name) {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return None,
            Err(e) => return Some(Err(e)),
        };
        Some(match resolved {
            Resolved::Blocked => Err(shadow_violation(name, &self.owner_type.name)),
            Resolved::Builtin(builtin) => builtin.call(&args),
            Resolved::Native(native) => native.call(&args),
            Resolved::Unit(unit, origin) => self.run_unit(unit, origin, args),
        })
    }

    fn get_field(&self, name: &str) -> RuntimeResult<Value> {
        Ok(self.state.get(name).cloned().unwrap_or_default())
    }

    fn set_field(&mut self, name: &str, value: Value) -> RuntimeResult<()> {
        self.state.insert(name.to_string(), value);
        Ok(())
    }
}
