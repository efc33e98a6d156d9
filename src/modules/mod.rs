//! Enrichment modules: catalog, selection and invocation
//!
//! The catalog is fetched once from the misp-modules service at startup and is
//! read-only afterwards. Selection is a pure function over it; invocation goes
//! through the [`ModuleInvoker`] trait so the loop can run against fakes.

mod invoker;
mod selector;
mod service;

pub use invoker::{EnrichmentRequest, EnrichmentResponse, ModuleInvoker, ResultGroup};
pub use selector::{select_modules, AllowList};
pub use service::ModuleService;

use serde::{Deserialize, Serialize};

/// Capability a module must declare for this engine to run it
pub const EXPANSION: &str = "expansion";

/// One module as described by the service's `/modules` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,

    /// Top-level kind ("expansion", "import", "export"); older services omit it
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default)]
    pub meta: ModuleMeta,

    #[serde(rename = "mispattributes", default)]
    pub attributes: ModuleAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMeta {
    #[serde(rename = "module-type", default)]
    pub module_type: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Attribute types a module accepts and produces
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleAttributes {
    #[serde(default)]
    pub input: Vec<String>,

    #[serde(default)]
    pub output: Vec<String>,
}

impl ModuleDescriptor {
    /// Whether the module declares the given capability, either in
    /// `meta.module-type` or as its top-level `type`
    pub fn has_capability(&self, capability: &str) -> bool {
        self.kind.as_deref() == Some(capability)
            || self.meta.module_type.iter().any(|t| t == capability)
    }

    pub fn accepts(&self, attribute_type: &str) -> bool {
        self.attributes.input.iter().any(|t| t == attribute_type)
    }
}

/// Module descriptors in the order the service returned them
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    modules: Vec<ModuleDescriptor>,
}

impl Catalog {
    pub fn new(modules: Vec<ModuleDescriptor>) -> Self {
        Self { modules }
    }

    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    /// Modules that declare the expansion capability
    pub fn expansion_modules(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.iter().filter(|m| m.has_capability(EXPANSION))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
