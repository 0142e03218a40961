//! The composition engine and composite registry (the pool).
//!
//! Packages register [`Contribution`]s while the process loads; a single
//! [`Registry::build`] pass then linearizes every name's contributions into a
//! deterministic precedence order, runs their setup hooks as a
//! chain-of-responsibility, and folds their attribute definitions into one
//! [`CompositeType`] per name. The build either publishes a complete registry
//! or fails as a whole — readers never observe a partial build, and lookups
//! after a successful build need no locking.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::ast::Domain;
use crate::context::Context;
use crate::contribution::{AttributeDef, Capability, Contribution, Kind, SetupHook};
use crate::error::{Error, KernelResult, ValidationError};
use crate::eval::expression::{ExpressionEvaluator, Value};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("contribution to {name} from package {package} is already registered")]
    DuplicateContribution { name: String, package: String },
    #[error("package {package}, contributing to {name}, depends on unknown package {missing}")]
    MissingDependency {
        name: String,
        package: String,
        missing: String,
    },
    #[error("dependency cycle while composing {name}: {chain}")]
    DependencyCycle { name: String, chain: String },
    #[error("contributions to {name} disagree on kind: {first} vs {second}")]
    KindMismatch {
        name: String,
        first: Kind,
        second: Kind,
    },
    #[error("registry is already built")]
    AlreadyBuilt,
    #[error("registry is not built yet")]
    NotBuilt,
    #[error("no composite type named {0}")]
    NotFound(String),
    #[error("composite type {name} has no attribute {attribute}")]
    UnknownAttribute { name: String, attribute: String },
    #[error("attribute {attribute} is not list-valued")]
    NotListValued { attribute: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// In-progress composite definition threaded through the setup-hook chain.
///
/// Hooks receive it by value and return a new one; nothing is shared between
/// links, so the engine can apply the results deterministically.
#[derive(Debug, Clone)]
pub struct TypeConfig {
    name: String,
    kind: Kind,
    capabilities: Vec<Capability>,
    attributes: BTreeMap<String, AttributeDef>,
}

impl TypeConfig {
    fn new(name: String, kind: Kind) -> Self {
        Self {
            name,
            kind,
            capabilities: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.get(name)
    }

    /// Replace-or-insert an attribute definition. Later contributions override
    /// earlier ones attribute by attribute.
    pub fn define(mut self, attribute: AttributeDef) -> Self {
        self.attributes.insert(attribute.name.clone(), attribute);
        self
    }

    /// Register a capability, keeping the first occurrence's position.
    pub fn capability(mut self, capability: Capability) -> Self {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Append items to a list-valued attribute's default instead of replacing
    /// it. Creates the attribute when absent. This is the merge primitive
    /// hooks use when replace semantics would lose sibling contributions.
    pub fn merge_list(
        mut self,
        attribute: &str,
        items: Vec<crate::ast::Literal>,
    ) -> RegistryResult<Self> {
        use crate::ast::{Expression, Literal};
        use crate::contribution::AttrKind;

        let entry = self
            .attributes
            .entry(attribute.to_string())
            .or_insert_with(|| {
                AttributeDef::new(attribute, AttrKind::List)
                    .with_default(Expression::Literal(Literal::List(Vec::new())))
            });
        match &mut entry.default {
            Some(Expression::Literal(Literal::List(existing))) => existing.extend(items),
            None => entry.default = Some(Expression::Literal(Literal::List(items))),
            _ => {
                return Err(RegistryError::NotListValued {
                    attribute: attribute.to_string(),
                })
            }
        }
        Ok(self)
    }
}

/// Drives setup hooks from the most specific contribution toward the base.
///
/// `parent` hands control to the next-less-specific link, mirroring
/// call-the-parent semantics across packages. Every link runs exactly once per
/// build: links a hook skipped by not delegating are invoked afterwards,
/// base-first, so skipping reorders but never suppresses an ancestor.
pub struct HookChain<'a> {
    lineage: &'a [Arc<Contribution>], // base-first
    stack: RefCell<Vec<usize>>,
    invoked: RefCell<Vec<bool>>,
    invocations: Cell<usize>,
}

impl<'a> HookChain<'a> {
    fn new(lineage: &'a [Arc<Contribution>]) -> Self {
        Self {
            lineage,
            stack: RefCell::new(Vec::new()),
            invoked: RefCell::new(vec![false; lineage.len()]),
            invocations: Cell::new(0),
        }
    }

    /// Invoke the next link toward the base and return its configuration.
    /// Past the base the configuration comes back unchanged.
    pub fn parent(&self, config: TypeConfig) -> RegistryResult<TypeConfig> {
        let below = self
            .stack
            .borrow()
            .last()
            .copied()
            .unwrap_or(self.lineage.len());
        let next = (0..below)
            .rev()
            .find(|&index| !self.invoked.borrow()[index]);
        match next {
            Some(index) => self.invoke(index, config),
            None => Ok(config),
        }
    }

    fn invoke(&self, index: usize, config: TypeConfig) -> RegistryResult<TypeConfig> {
        self.invoked.borrow_mut()[index] = true;
        self.invocations.set(self.invocations.get() + 1);
        self.stack.borrow_mut().push(index);
        let contribution = &self.lineage[index];
        let result = match &contribution.setup_hook {
            Some(hook) => hook.setup(contribution, config, self),
            None => {
                // Default link: inherit first, then lay down declared
                // attributes with replace semantics.
                let config = self.parent(config)?;
                Ok(apply_declared(contribution, config))
            }
        };
        self.stack.borrow_mut().pop();
        result
    }

    fn run(&self, initial: TypeConfig) -> RegistryResult<TypeConfig> {
        let mut config = self.parent(initial)?;
        loop {
            let skipped = self.invoked.borrow().iter().position(|done| !done);
            match skipped {
                Some(index) => config = self.invoke(index, config)?,
                None => break,
            }
        }
        Ok(config)
    }

    fn invocations(&self) -> usize {
        self.invocations.get()
    }
}

/// Apply a contribution's declared capabilities and attributes to a config.
/// This is what a contribution without a custom hook does after inheriting.
pub fn apply_declared(contribution: &Contribution, mut config: TypeConfig) -> TypeConfig {
    for capability in &contribution.capabilities {
        config = config.capability(capability.clone());
    }
    for attribute in &contribution.attributes {
        config = config.define(attribute.clone());
    }
    config
}

/// The merged, immutable runtime type for one name. Owned by the registry and
/// shared as `Arc`; safe for unsynchronized concurrent use.
#[derive(Debug)]
pub struct CompositeType {
    name: String,
    kind: Kind,
    capabilities: Vec<Capability>,
    attributes: BTreeMap<String, AttributeDef>,
    lineage: Vec<Arc<Contribution>>, // base-first
}

impl CompositeType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeDef> {
        self.attributes.values()
    }

    pub fn attribute_names(&self) -> Vec<&str> {
        self.attributes.keys().map(String::as_str).collect()
    }

    /// Contributions base-first, as folded.
    pub fn lineage(&self) -> &[Arc<Contribution>] {
        &self.lineage
    }

    /// Contributions in precedence order, most specific first.
    pub fn precedence(&self) -> impl Iterator<Item = &Arc<Contribution>> {
        self.lineage.iter().rev()
    }

    /// Evaluate every attribute default against `context`.
    pub fn default_values(
        &self,
        context: &Context,
        evaluator: &ExpressionEvaluator,
    ) -> KernelResult<BTreeMap<String, Value>> {
        let mut values = BTreeMap::new();
        for attribute in self.attributes.values() {
            if let Some(default) = &attribute.default {
                values.insert(attribute.name.clone(), evaluator.evaluate(default, context)?);
            }
        }
        Ok(values)
    }

    /// Resolve an attribute's relational filter to concrete literals. Returns
    /// `None` for attributes without a domain.
    pub fn attribute_domain(
        &self,
        name: &str,
        context: &Context,
        evaluator: &ExpressionEvaluator,
    ) -> KernelResult<Option<Domain>> {
        let attribute = self
            .attribute(name)
            .ok_or_else(|| RegistryError::UnknownAttribute {
                name: self.name.clone(),
                attribute: name.to_string(),
            })?;
        match &attribute.domain {
            Some(domain) => Ok(Some(evaluator.evaluate_domain(domain, context)?)),
            None => Ok(None),
        }
    }

    /// Evaluate a derived attribute against `context`.
    pub fn compute(
        &self,
        name: &str,
        context: &Context,
        evaluator: &ExpressionEvaluator,
    ) -> KernelResult<Value> {
        let attribute = self
            .attribute(name)
            .ok_or_else(|| RegistryError::UnknownAttribute {
                name: self.name.clone(),
                attribute: name.to_string(),
            })?;
        let compute = attribute.compute.as_ref().ok_or_else(|| {
            Error::internal(format!(
                "attribute {} of {} is not computed",
                name, self.name
            ))
        })?;
        Ok(evaluator.evaluate(compute, context)?)
    }

    /// Check one record's values: required attributes must be present and
    /// non-null (unless defaulted), and every constraint on a provided value
    /// must hold against the context overlaid with the record. Required checks
    /// run first; constraints are only evaluated for attributes the record
    /// actually carries.
    pub fn validate(
        &self,
        values: &BTreeMap<String, Value>,
        context: &Context,
        evaluator: &ExpressionEvaluator,
    ) -> KernelResult<()> {
        let provided = |attribute: &AttributeDef| {
            values
                .get(&attribute.name)
                .map(|value| !matches!(value, Value::Null))
                .unwrap_or(false)
        };
        for attribute in self.attributes.values() {
            if attribute.required && !provided(attribute) && attribute.default.is_none() {
                return Err(ValidationError::new("field ${field} of ${entity} is required")
                    .with_arg("field", &attribute.name)
                    .with_arg("entity", &self.name)
                    .into());
            }
        }
        let scoped = context.overlay(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        for attribute in self.attributes.values() {
            if !provided(attribute) {
                continue;
            }
            if let Some(constraint) = &attribute.constraint {
                match evaluator.evaluate(constraint, &scoped)? {
                    Value::Boolean(true) => {}
                    Value::Boolean(false) => {
                        return Err(ValidationError::new(
                            "value of ${field} on ${entity} violates its constraint",
                        )
                        .with_arg("field", &attribute.name)
                        .with_arg("entity", &self.name)
                        .into());
                    }
                    other => {
                        return Err(Error::internal(format!(
                            "constraint for {} evaluated to a non-boolean: {:?}",
                            attribute.name, other
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Process-wide pool of composite types: single-writer during registration and
/// build, read-only and lock-free afterwards.
#[derive(Debug, Default)]
pub struct Registry {
    pending: DashMap<String, Vec<Arc<Contribution>>>,
    packages: DashMap<String, Vec<String>>, // package -> declared dependencies
    built: OnceLock<BTreeMap<String, Arc<CompositeType>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a contribution to the pending graph for its name.
    #[tracing::instrument(
        skip(self, contribution),
        fields(name = %contribution.name, package = %contribution.package),
        level = "debug"
    )]
    pub fn register(&self, contribution: Contribution) -> RegistryResult<()> {
        if self.built.get().is_some() {
            return Err(RegistryError::AlreadyBuilt);
        }
        {
            let mut deps = self
                .packages
                .entry(contribution.package.clone())
                .or_default();
            for dep in &contribution.depends_on {
                if !deps.contains(dep) {
                    deps.push(dep.clone());
                }
            }
        }
        let mut entry = self.pending.entry(contribution.name.clone()).or_default();
        if entry
            .iter()
            .any(|existing| existing.package == contribution.package)
        {
            return Err(RegistryError::DuplicateContribution {
                name: contribution.name.clone(),
                package: contribution.package.clone(),
            });
        }
        debug!("contribution registered");
        entry.push(Arc::new(contribution));
        Ok(())
    }

    /// Compose every registered name. Runs once; the registry is read-only
    /// afterwards.
    #[tracing::instrument(skip(self))]
    pub fn build(&self) -> RegistryResult<()> {
        if self.built.get().is_some() {
            return Err(RegistryError::AlreadyBuilt);
        }

        let dependencies: HashMap<String, Vec<String>> = self
            .packages
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut composites = BTreeMap::new();
        for entry in self.pending.iter() {
            let name = entry.key();
            let contributions = entry.value();
            let composite = compose(name, contributions, &dependencies)?;
            composites.insert(name.clone(), Arc::new(composite));
        }

        let count = composites.len();
        self.built
            .set(composites)
            .map_err(|_| RegistryError::AlreadyBuilt)?;
        info!(count, "composite registry built");
        Ok(())
    }

    /// Look up a built composite type.
    pub fn get(&self, name: &str) -> RegistryResult<Arc<CompositeType>> {
        let built = self.built.get().ok_or(RegistryError::NotBuilt)?;
        built
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn is_built(&self) -> bool {
        self.built.get().is_some()
    }

    pub fn names(&self) -> Vec<String> {
        match self.built.get() {
            Some(built) => built.keys().cloned().collect(),
            None => Vec::new(),
        }
    }
}

fn compose(
    name: &str,
    contributions: &[Arc<Contribution>],
    dependencies: &HashMap<String, Vec<String>>,
) -> RegistryResult<CompositeType> {
    let kind = contributions[0].kind;
    for contribution in &contributions[1..] {
        if contribution.kind != kind {
            return Err(RegistryError::KindMismatch {
                name: name.to_string(),
                first: kind,
                second: contribution.kind,
            });
        }
    }

    for contribution in contributions {
        for dep in &contribution.depends_on {
            if !dependencies.contains_key(dep) {
                return Err(RegistryError::MissingDependency {
                    name: name.to_string(),
                    package: contribution.package.clone(),
                    missing: dep.clone(),
                });
            }
        }
    }

    let mut closures = HashMap::new();
    for contribution in contributions {
        if !closures.contains_key(&contribution.package) {
            let closure = dependency_closure(&contribution.package, dependencies, name)?;
            closures.insert(contribution.package.clone(), closure);
        }
    }

    let lineage = linearize(name, contributions, &closures)?;
    debug!(
        name,
        order = ?lineage.iter().map(|c| c.package.as_str()).collect::<Vec<_>>(),
        "linearized"
    );

    let chain = HookChain::new(&lineage);
    let config = chain.run(TypeConfig::new(name.to_string(), kind))?;
    debug_assert_eq!(chain.invocations(), lineage.len());

    Ok(CompositeType {
        name: config.name,
        kind: config.kind,
        capabilities: config.capabilities,
        attributes: config.attributes,
        lineage,
    })
}

/// Transitive dependency set of one package, failing on cycles with the full
/// offending chain.
fn dependency_closure(
    package: &str,
    dependencies: &HashMap<String, Vec<String>>,
    name: &str,
) -> RegistryResult<HashSet<String>> {
    fn visit(
        package: &str,
        dependencies: &HashMap<String, Vec<String>>,
        name: &str,
        chain: &mut Vec<String>,
        closure: &mut HashSet<String>,
    ) -> RegistryResult<()> {
        if let Some(start) = chain.iter().position(|seen| seen == package) {
            let mut cycle = chain[start..].to_vec();
            cycle.push(package.to_string());
            return Err(RegistryError::DependencyCycle {
                name: name.to_string(),
                chain: cycle.join(" -> "),
            });
        }
        chain.push(package.to_string());
        if let Some(deps) = dependencies.get(package) {
            for dep in deps {
                let first_visit = closure.insert(dep.clone());
                if first_visit {
                    visit(dep, dependencies, name, chain, closure)?;
                }
            }
        }
        chain.pop();
        Ok(())
    }

    let mut closure = HashSet::new();
    let mut chain = Vec::new();
    visit(package, dependencies, name, &mut chain, &mut closure)?;
    Ok(closure)
}

/// Deterministic base-first ordering: every contribution precedes any
/// contribution whose package transitively depends on its package; ties break
/// by registration order.
fn linearize(
    name: &str,
    contributions: &[Arc<Contribution>],
    closures: &HashMap<String, HashSet<String>>,
) -> RegistryResult<Vec<Arc<Contribution>>> {
    let mut remaining: Vec<Arc<Contribution>> = contributions.to_vec();
    let mut lineage = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|candidate| {
            let closure = &closures[&candidate.package];
            remaining
                .iter()
                .all(|other| other.package == candidate.package || !closure.contains(&other.package))
        });
        match ready {
            Some(index) => lineage.push(remaining.remove(index)),
            None => {
                let chain = remaining
                    .iter()
                    .map(|c| c.package.clone())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(RegistryError::DependencyCycle {
                    name: name.to_string(),
                    chain,
                });
            }
        }
    }
    Ok(lineage)
}
