//! Deferred values.
//!
//! Many fields of a topology (a role ARN, a load balancer DNS name) only
//! exist once the provisioning engine has created the resource they belong
//! to. Builders never see those values: they hold an [`Output`], an
//! expression tree that names the attributes it needs and describes how to
//! combine them. The engine resolves it later against whatever state it has.
//!
//! Declaring and resolving are separate phases, so a builder cannot read a
//! deferred value out of order: the only way to use one is to embed it in
//! another expression, and every embedded attribute becomes a graph edge.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde_json::Value;
use skiff_common::error::{Result, SkiffError};
use skiff_common::types::ResourceName;

/// Read access to the attributes of resources that already exist.
pub trait AttributeSource {
    /// Returns the value of `attribute` on `resource`, if known.
    fn attribute(&self, resource: &ResourceName, attribute: &str) -> Option<Value>;
}

/// Untyped expression over literal values and resource attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expr {
    /// A value known at declaration time.
    Literal {
        /// The value.
        value: Value,
    },
    /// An attribute of another resource, known once it exists.
    Attribute {
        /// Resource producing the attribute.
        resource: ResourceName,
        /// Attribute name.
        attribute: String,
    },
    /// String concatenation of the parts.
    Concat {
        /// Parts, each resolving to a string or number.
        parts: Vec<Expr>,
    },
    /// A list of values.
    List {
        /// Items in order.
        items: Vec<Expr>,
    },
    /// One element of a list-valued expression.
    Index {
        /// Expression resolving to a list.
        list: Box<Expr>,
        /// Zero-based position.
        index: usize,
    },
    /// An object with named fields.
    Object {
        /// Fields keyed by name.
        fields: BTreeMap<String, Expr>,
    },
}

impl Expr {
    /// Wraps a known value.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    /// Builds an object expression from `(name, expr)` pairs.
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Self)>) -> Self {
        Self::Object {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Builds a list expression.
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        Self::List {
            items: items.into_iter().collect(),
        }
    }

    /// Returns every resource this expression reads from.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<ResourceName> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(&mut deps);
        deps
    }

    fn collect_dependencies(&self, deps: &mut BTreeSet<ResourceName>) {
        match self {
            Self::Literal { .. } => {}
            Self::Attribute { resource, .. } => {
                let _ = deps.insert(resource.clone());
            }
            Self::Concat { parts: items } | Self::List { items } => {
                for item in items {
                    item.collect_dependencies(deps);
                }
            }
            Self::Index { list, .. } => list.collect_dependencies(deps),
            Self::Object { fields } => {
                for value in fields.values() {
                    value.collect_dependencies(deps);
                }
            }
        }
    }

    /// Returns `true` if the expression reads no resource attribute.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.dependencies().is_empty()
    }

    /// Resolves the expression against existing resource attributes.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::Unresolved`] naming the first attribute that has
    /// no value yet, or a topology error if an index or concatenation is
    /// applied to a value of the wrong shape.
    pub fn resolve(&self, source: &dyn AttributeSource) -> Result<Value> {
        match self {
            Self::Literal { value } => Ok(value.clone()),
            Self::Attribute {
                resource,
                attribute,
            } => source
                .attribute(resource, attribute)
                .ok_or_else(|| SkiffError::Unresolved {
                    resource: resource.to_string(),
                    attribute: attribute.clone(),
                }),
            Self::Concat { parts } => {
                let mut out = String::new();
                for part in parts {
                    match part.resolve(source)? {
                        Value::String(s) => out.push_str(&s),
                        Value::Number(n) => out.push_str(&n.to_string()),
                        other => {
                            return Err(SkiffError::topology(
                                "expression",
                                "concat",
                                format!("cannot concatenate {other}"),
                            ));
                        }
                    }
                }
                Ok(Value::String(out))
            }
            Self::List { items } => items
                .iter()
                .map(|item| item.resolve(source))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Self::Index { list, index } => match list.resolve(source)? {
                Value::Array(mut items) if *index < items.len() => Ok(items.swap_remove(*index)),
                other => Err(SkiffError::topology(
                    "expression",
                    "index",
                    format!("no element {index} in {other}"),
                )),
            },
            Self::Object { fields } => {
                let mut map = serde_json::Map::new();
                for (key, value) in fields {
                    let _ = map.insert(key.clone(), value.resolve(source)?);
                }
                Ok(Value::Object(map))
            }
        }
    }

    /// Resolves the expression, returning `None` while any input is unknown.
    #[must_use]
    pub fn try_resolve(&self, source: &dyn AttributeSource) -> Option<Value> {
        self.resolve(source).ok()
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { value: Value::String(s) } => write!(f, "{s}"),
            Self::Literal { value } => write!(f, "{value}"),
            Self::Attribute {
                resource,
                attribute,
            } => write!(f, "${{{resource}.{attribute}}}"),
            Self::Concat { parts } => parts.iter().try_for_each(|p| write!(f, "{p}")),
            Self::List { items } => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Index { list, index } => write!(f, "{list}[{index}]"),
            Self::Object { fields } => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A typed deferred value.
///
/// `T` records what the expression resolves to; it has no runtime
/// representation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Output<T> {
    expr: Expr,
    #[serde(skip)]
    _ty: PhantomData<fn() -> T>,
}

impl<T> Output<T> {
    const fn from_expr(expr: Expr) -> Self {
        Self {
            expr,
            _ty: PhantomData,
        }
    }

    /// Refers to an attribute of another resource.
    pub fn attribute(resource: &ResourceName, attribute: &str) -> Self {
        Self::from_expr(Expr::Attribute {
            resource: resource.clone(),
            attribute: attribute.to_string(),
        })
    }

    /// Returns the underlying expression.
    #[must_use]
    pub const fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Returns every resource this value reads from.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<ResourceName> {
        self.expr.dependencies()
    }

    /// Returns `true` if the value is known at declaration time.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.expr.is_known()
    }
}

impl<T: Into<Value>> Output<T> {
    /// Wraps a value known at declaration time.
    pub fn known(value: T) -> Self {
        Self::from_expr(Expr::literal(value))
    }
}

impl Output<String> {
    /// Concatenates string-valued parts.
    pub fn concat(parts: impl IntoIterator<Item = Self>) -> Self {
        Self::from_expr(Expr::Concat {
            parts: parts.into_iter().map(|p| p.expr).collect(),
        })
    }
}

impl Output<Vec<String>> {
    /// Collects string-valued outputs into a list.
    pub fn list(items: impl IntoIterator<Item = Output<String>>) -> Self {
        Self::from_expr(Expr::list(items.into_iter().map(|i| i.expr)))
    }

    /// Selects one element of the list.
    #[must_use]
    pub fn index(&self, index: usize) -> Output<String> {
        Output::from_expr(Expr::Index {
            list: Box::new(self.expr.clone()),
            index,
        })
    }
}

impl From<&str> for Output<String> {
    fn from(value: &str) -> Self {
        Self::known(value.to_string())
    }
}

impl<T> From<Output<T>> for Expr {
    fn from(output: Output<T>) -> Self {
        output.expr
    }
}

impl<T> fmt::Display for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)
    }
}
