//! Resource declarations.
//!
//! Each typed entity of the topology implements [`Resource`] and lowers
//! itself to a [`ResourceDecl`]: a kind, a logical name and a property map
//! of [`Expr`] values. Declarations are what the graph and the provisioning
//! engine consume; the typed entities are what builders and the validator
//! reason about.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use skiff_common::error::Result;
use skiff_common::types::{ResourceKind, ResourceName};

use crate::output::{AttributeSource, Expr, Output};

/// Input properties of a declaration, keyed by field name.
pub type Properties = BTreeMap<String, Expr>;

/// A typed entity that can be declared to the provisioning engine.
pub trait Resource {
    /// Logical name, stable across re-application.
    fn name(&self) -> &ResourceName;

    /// Resource kind.
    fn kind(&self) -> ResourceKind;

    /// Input properties.
    fn properties(&self) -> Properties;

    /// Ordering edges not visible in the properties.
    fn depends_on(&self) -> BTreeSet<ResourceName> {
        BTreeSet::new()
    }

    /// Refers to one of this resource's attributes.
    fn attr(&self, attribute: &str) -> Output<String> {
        Output::attribute(self.name(), attribute)
    }

    /// Lowers the entity to a declaration.
    fn declare(&self) -> ResourceDecl {
        ResourceDecl {
            name: self.name().clone(),
            kind: self.kind(),
            properties: self.properties(),
            depends_on: self.depends_on(),
        }
    }
}

/// A resource as seen by the graph and the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDecl {
    /// Logical name.
    pub name: ResourceName,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Input properties.
    pub properties: Properties,
    /// Explicit ordering edges.
    pub depends_on: BTreeSet<ResourceName>,
}

impl ResourceDecl {
    /// Returns every resource that must exist before this one.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<ResourceName> {
        let mut deps = self.depends_on.clone();
        for expr in self.properties.values() {
            deps.extend(expr.dependencies());
        }
        let _ = deps.remove(&self.name);
        deps
    }

    /// Resolves every property into a JSON object.
    ///
    /// # Errors
    ///
    /// Returns an error if any property reads an attribute that is not known.
    pub fn resolve(&self, source: &dyn AttributeSource) -> Result<Value> {
        let mut map = serde_json::Map::new();
        for (key, expr) in &self.properties {
            let _ = map.insert(key.clone(), expr.resolve(source)?);
        }
        Ok(Value::Object(map))
    }

    /// Returns the property expression for `field`.
    #[must_use]
    pub fn property(&self, field: &str) -> Option<&Expr> {
        self.properties.get(field)
    }
}

/// Builds a [`Properties`] map from `(name, expr)` pairs.
pub fn properties<K: Into<String>>(fields: impl IntoIterator<Item = (K, Expr)>) -> Properties {
    fields.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bucket {
        name: ResourceName,
        after: ResourceName,
    }

    impl Resource for Bucket {
        fn name(&self) -> &ResourceName {
            &self.name
        }

        fn kind(&self) -> ResourceKind {
            ResourceKind::LogGroup
        }

        fn properties(&self) -> Properties {
            properties([
                ("retention", Expr::literal(3)),
                ("self_ref", self.attr("name").into()),
            ])
        }

        fn depends_on(&self) -> BTreeSet<ResourceName> {
            BTreeSet::from([self.after.clone()])
        }
    }

    #[test]
    fn declaration_merges_explicit_and_property_edges() {
        let bucket = Bucket {
            name: ResourceName::new("logs"),
            after: ResourceName::new("role"),
        };
        let decl = bucket.declare();
        assert_eq!(decl.kind, ResourceKind::LogGroup);
        let deps: Vec<_> = decl.dependencies().into_iter().collect();
        assert_eq!(deps, vec![ResourceName::new("role")], "self edges are dropped");
    }

    #[test]
    fn property_lookup_by_field() {
        let bucket = Bucket {
            name: ResourceName::new("logs"),
            after: ResourceName::new("role"),
        };
        let decl = bucket.declare();
        assert_eq!(decl.property("retention"), Some(&Expr::literal(3)));
        assert!(decl.property("missing").is_none());
    }
}
