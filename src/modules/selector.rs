// Module selection: capability, input type, then the operator's allow-list

use super::{Catalog, ModuleDescriptor, EXPANSION};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

/// Keyword that enables every matching module
const ALL_KEYWORD: &str = "ALL";

/// Operator restriction on which modules may run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowList {
    /// Every catalog module with a matching capability and input type
    All,
    /// Only the named modules
    Only(BTreeSet<String>),
}

impl AllowList {
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AllowList::Only(names.into_iter().map(Into::into).collect())
    }

    pub fn permits(&self, module_name: &str) -> bool {
        match self {
            AllowList::All => true,
            AllowList::Only(names) => names.contains(module_name),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawAllowList {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for AllowList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawAllowList::deserialize(deserializer)? {
            RawAllowList::One(s) if s == ALL_KEYWORD => AllowList::All,
            RawAllowList::One(s) => AllowList::only([s]),
            RawAllowList::Many(names) => AllowList::only(names),
        })
    }
}

impl Serialize for AllowList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AllowList::All => serializer.serialize_str(ALL_KEYWORD),
            AllowList::Only(names) => names.serialize(serializer),
        }
    }
}

/// Modules eligible to enrich an attribute of `attribute_type`, in catalog order
pub fn select_modules<'a>(
    attribute_type: &str,
    catalog: &'a Catalog,
    allow_list: &AllowList,
) -> Vec<&'a ModuleDescriptor> {
    catalog
        .modules()
        .iter()
        .filter(|m| m.has_capability(EXPANSION))
        .filter(|m| m.accepts(attribute_type))
        .filter(|m| allow_list.permits(&m.name))
        .collect()
}
