//! Image registry declaration.

use serde::{Deserialize, Serialize};
use skiff_common::types::{ResourceKind, ResourceName};

use crate::output::{Expr, Output};
use crate::resource::{Properties, Resource, properties};

/// Whether an image tag may be pushed twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagMutability {
    /// Tags may be overwritten.
    Mutable,
    /// A pushed tag is final.
    Immutable,
}

impl TagMutability {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Mutable => "MUTABLE",
            Self::Immutable => "IMMUTABLE",
        }
    }
}

/// Registry storing the service's built images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    name: ResourceName,
    /// Tag policy.
    pub tag_mutability: TagMutability,
}

impl Registry {
    /// Declares the immutable-tag registry for a service.
    ///
    /// The registry's logical name is the service name itself.
    #[must_use]
    pub fn for_service(service_name: &str) -> Self {
        tracing::debug!(service = service_name, "declaring registry");
        Self {
            name: ResourceName::new(service_name),
            tag_mutability: TagMutability::Immutable,
        }
    }

    /// URI images are pushed to and pulled from.
    #[must_use]
    pub fn repository_url(&self) -> Output<String> {
        self.attr("repository_url")
    }
}

impl Resource for Registry {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Registry
    }

    fn properties(&self) -> Properties {
        properties([
            ("name", Expr::literal(self.name.as_str())),
            (
                "image_tag_mutability",
                Expr::literal(self.tag_mutability.as_str()),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_named_after_service_and_immutable() {
        let registry = Registry::for_service("ts-express-server");
        assert_eq!(registry.name().as_str(), "ts-express-server");
        assert_eq!(registry.tag_mutability, TagMutability::Immutable);
        let decl = registry.declare();
        assert_eq!(
            decl.property("image_tag_mutability"),
            Some(&Expr::literal("IMMUTABLE"))
        );
    }

    #[test]
    fn repository_url_is_deferred() {
        let registry = Registry::for_service("api");
        let url = registry.repository_url();
        assert!(!url.is_known());
        assert!(url.dependencies().contains(registry.name()));
    }
}
