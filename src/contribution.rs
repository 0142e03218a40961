//! Partial definitions of named entities, as supplied by packages.
//!
//! A package never defines a whole runtime type by itself: it registers one
//! [`Contribution`] per logical name, and the composition engine
//! ([`crate::registry`]) folds every contribution sharing that name into a
//! single composite type. Contributions are immutable once registered.

use std::fmt;
use std::sync::Arc;

use crate::ast::{Domain, Expression};
use crate::registry::{HookChain, RegistryResult, TypeConfig};

/// What a contribution composes into. Every contribution to one name must
/// agree on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Kind {
    /// Stored entity with a persisted record shape.
    Structural,
    /// Presentation-only entity; no storage of its own.
    View,
    Report,
    /// Multi-step interactive procedure.
    Procedure,
}

/// Base behaviors a contribution assumes of its composite.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    Persistable,
    Displayable,
    Custom(String),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Persistable => write!(f, "persistable"),
            Capability::Displayable => write!(f, "displayable"),
            Capability::Custom(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrKind {
    Boolean,
    Integer,
    Float,
    Char,
    DateTime,
    List,
    Map,
    /// Link to another composite; dotted paths traverse it.
    Reference { target: String },
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrKind::Boolean => write!(f, "boolean"),
            AttrKind::Integer => write!(f, "integer"),
            AttrKind::Float => write!(f, "float"),
            AttrKind::Char => write!(f, "char"),
            AttrKind::DateTime => write!(f, "datetime"),
            AttrKind::List => write!(f, "list"),
            AttrKind::Map => write!(f, "map"),
            AttrKind::Reference { target } => write!(f, "reference({})", target),
        }
    }
}

/// Immutable attribute definition. Dynamic behavior is carried as expressions
/// and domains, never as code: defaults, constraints and relational filters
/// are resolved against the execution context when the composite is used.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    pub name: String,
    pub kind: AttrKind,
    pub required: bool,
    pub readonly: bool,
    /// Evaluated against the current context when a record is initialized.
    pub default: Option<Expression>,
    /// Relational filter for reference attributes; operands may reference the
    /// context and are resolved at query time.
    pub domain: Option<Domain>,
    /// Boolean record rule, evaluated against the context overlaid with the
    /// record's values.
    pub constraint: Option<Expression>,
    /// Derived attribute: the value is computed from this expression instead
    /// of being stored.
    pub compute: Option<Expression>,
}

impl AttributeDef {
    pub fn new(name: impl Into<String>, kind: AttrKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            readonly: false,
            default: None,
            domain: None,
            constraint: None,
            compute: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn with_default(mut self, default: Expression) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn with_constraint(mut self, constraint: Expression) -> Self {
        self.constraint = Some(constraint);
        self
    }

    pub fn computed(mut self, compute: Expression) -> Self {
        self.compute = Some(compute);
        self
    }

    pub fn is_computed(&self) -> bool {
        self.compute.is_some()
    }
}

/// Setup logic a contribution runs while its composite is assembled.
///
/// Hooks receive the in-progress [`TypeConfig`] by value and return a new one;
/// `chain.parent(config)` hands control to the next-less-specific
/// contribution, before or after the hook's own changes. Closures with the
/// matching signature implement this trait directly.
pub trait SetupHook: Send + Sync {
    fn setup(
        &self,
        own: &Contribution,
        config: TypeConfig,
        chain: &HookChain<'_>,
    ) -> RegistryResult<TypeConfig>;
}

impl<F> SetupHook for F
where
    F: Fn(&Contribution, TypeConfig, &HookChain<'_>) -> RegistryResult<TypeConfig> + Send + Sync,
{
    fn setup(
        &self,
        own: &Contribution,
        config: TypeConfig,
        chain: &HookChain<'_>,
    ) -> RegistryResult<TypeConfig> {
        self(own, config, chain)
    }
}

/// One package's partial definition of a named entity.
#[derive(Clone)]
pub struct Contribution {
    pub name: String,
    pub package: String,
    pub kind: Kind,
    pub capabilities: Vec<Capability>,
    pub attributes: Vec<AttributeDef>,
    /// Packages that must be composed before this one.
    pub depends_on: Vec<String>,
    pub(crate) setup_hook: Option<Arc<dyn SetupHook>>,
}

impl fmt::Debug for Contribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contribution")
            .field("name", &self.name)
            .field("package", &self.package)
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities)
            .field("attributes", &self.attributes)
            .field("depends_on", &self.depends_on)
            .field("setup_hook", &self.setup_hook.as_ref().map(|_| "<hook>"))
            .finish()
    }
}

impl Contribution {
    pub fn builder(name: impl Into<String>, package: impl Into<String>) -> ContributionBuilder {
        ContributionBuilder {
            name: name.into(),
            package: package.into(),
            kind: Kind::Structural,
            capabilities: Vec::new(),
            attributes: Vec::new(),
            depends_on: Vec::new(),
            setup_hook: None,
        }
    }

    pub fn has_hook(&self) -> bool {
        self.setup_hook.is_some()
    }
}

pub struct ContributionBuilder {
    name: String,
    package: String,
    kind: Kind,
    capabilities: Vec<Capability>,
    attributes: Vec<AttributeDef>,
    depends_on: Vec<String>,
    setup_hook: Option<Arc<dyn SetupHook>>,
}

impl ContributionBuilder {
    pub fn kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn attribute(mut self, attribute: AttributeDef) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn depends_on(mut self, package: impl Into<String>) -> Self {
        self.depends_on.push(package.into());
        self
    }

    pub fn setup_hook(mut self, hook: impl SetupHook + 'static) -> Self {
        self.setup_hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Contribution {
        Contribution {
            name: self.name,
            package: self.package,
            kind: self.kind,
            capabilities: self.capabilities,
            attributes: self.attributes,
            depends_on: self.depends_on,
            setup_hook: self.setup_hook,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let contribution = Contribution::builder("party.address", "party")
            .capability(Capability::Persistable)
            .attribute(AttributeDef::new("city", AttrKind::Char).required())
            .depends_on("base")
            .build();
        assert_eq!(contribution.name, "party.address");
        assert_eq!(contribution.package, "party");
        assert_eq!(contribution.kind, Kind::Structural);
        assert_eq!(contribution.depends_on, vec!["base".to_string()]);
        assert!(!contribution.has_hook());
        assert!(contribution.attributes[0].required);
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(Kind::Structural.to_string(), "structural");
        assert_eq!("procedure".parse::<Kind>().unwrap(), Kind::Procedure);
    }

    #[test]
    fn test_attr_kind_display() {
        let kind = AttrKind::Reference {
            target: "party.party".to_string(),
        };
        assert_eq!(kind.to_string(), "reference(party.party)");
    }
}
