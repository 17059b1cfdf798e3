//! Entity metadata: classes, properties and the registry.
//!
//! Metadata is an explicit descriptor table. Every entity class lists its
//! properties with their kinds, which is all the merge engine, change
//! tracker and persistence layer need to walk an entity graph.

use crate::error::{ModelError, ModelResult};
use crate::value::ScalarType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Backing semantics of a collection property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Ordered, duplicates allowed.
    List,
    /// Insertion ordered, no duplicates.
    Set,
}

/// Kind of an entity property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyKind {
    /// Plain value.
    Scalar {
        /// Declared value type.
        ty: ScalarType,
    },
    /// Reference to another entity.
    Reference {
        /// Target class name.
        target: String,
    },
    /// Collection of references to other entities.
    Collection {
        /// Element class name.
        target: String,
        /// List or set semantics.
        collection: CollectionKind,
    },
    /// Embedded value object, owned by the entity that holds it.
    Embedded {
        /// Embeddable class name.
        target: String,
    },
}

impl PropertyKind {
    /// Returns `true` for reference, collection and embedded properties.
    pub fn is_class(&self) -> bool {
        !matches!(self, PropertyKind::Scalar { .. })
    }

    /// Returns the target class name for class-typed properties.
    pub fn target(&self) -> Option<&str> {
        match self {
            PropertyKind::Scalar { .. } => None,
            PropertyKind::Reference { target }
            | PropertyKind::Collection { target, .. }
            | PropertyKind::Embedded { target } => Some(target),
        }
    }

    /// Returns the collection semantics for collection properties.
    pub fn collection_kind(&self) -> Option<CollectionKind> {
        match self {
            PropertyKind::Collection { collection, .. } => Some(*collection),
            _ => None,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            PropertyKind::Scalar { .. } => "a scalar value",
            PropertyKind::Reference { .. } => "an entity reference",
            PropertyKind::Collection { .. } => "an entity collection",
            PropertyKind::Embedded { .. } => "an embedded entity",
        }
    }
}

/// Descriptor of one entity property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaProperty {
    /// Property name.
    pub name: String,
    /// Property kind.
    pub kind: PropertyKind,
    /// Read-only properties are never written by merge or by callers.
    #[serde(default)]
    pub read_only: bool,
    /// Mandatory properties must be non-null on save.
    #[serde(default)]
    pub mandatory: bool,
}

impl MetaProperty {
    /// Returns a description of the kind this property expects.
    pub fn expected(&self) -> &'static str {
        self.kind.describe()
    }
}

/// How the persistence layer assigns ids to new entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Random UUID assigned on save when missing.
    Uuid,
    /// Per-class numeric sequence assigned on save.
    Sequence,
    /// The application must assign the id before saving.
    Assigned,
}

impl IdStrategy {
    fn scalar_type(self) -> ScalarType {
        match self {
            IdStrategy::Uuid => ScalarType::Uuid,
            IdStrategy::Sequence => ScalarType::Integer,
            IdStrategy::Assigned => ScalarType::Text,
        }
    }
}

/// Descriptor of an entity class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaClass {
    name: String,
    properties: Vec<MetaProperty>,
    by_name: HashMap<String, usize>,
    id_property: Option<String>,
    id_strategy: IdStrategy,
    embeddable: bool,
    soft_delete: bool,
    instance_name: Vec<String>,
}

impl MetaClass {
    /// Starts building a class descriptor.
    pub fn builder(name: impl Into<String>) -> MetaClassBuilder {
        MetaClassBuilder::new(name)
    }

    /// Returns the class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns all properties in declaration order.
    pub fn properties(&self) -> &[MetaProperty] {
        &self.properties
    }

    /// Looks up a property by name.
    pub fn property(&self, name: &str) -> Option<&MetaProperty> {
        self.by_name.get(name).map(|&i| &self.properties[i])
    }

    /// Looks up a property by name, failing for unknown names.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownProperty`] if the class has no such property.
    pub fn require(&self, name: &str) -> ModelResult<&MetaProperty> {
        self.property(name)
            .ok_or_else(|| ModelError::unknown_property(&self.name, name))
    }

    /// Name of the primary key property, absent for embeddables.
    pub fn id_property(&self) -> Option<&str> {
        self.id_property.as_deref()
    }

    /// Returns `true` if `name` is the primary key property.
    pub fn is_id_property(&self, name: &str) -> bool {
        self.id_property.as_deref() == Some(name)
    }

    /// Id assignment strategy.
    pub fn id_strategy(&self) -> IdStrategy {
        self.id_strategy
    }

    /// Embeddable classes are value objects without identity of their own.
    pub fn is_embeddable(&self) -> bool {
        self.embeddable
    }

    /// Soft-deleted classes are marked deleted instead of being removed.
    pub fn is_soft_delete(&self) -> bool {
        self.soft_delete
    }

    /// Properties that make up the human readable instance name.
    pub fn instance_name(&self) -> &[String] {
        &self.instance_name
    }

    /// Iterates scalar properties.
    pub fn scalar_properties(&self) -> impl Iterator<Item = &MetaProperty> {
        self.properties.iter().filter(|p| !p.kind.is_class())
    }

    /// Iterates reference, collection and embedded properties.
    pub fn class_properties(&self) -> impl Iterator<Item = &MetaProperty> {
        self.properties.iter().filter(|p| p.kind.is_class())
    }
}

/// Builder for [`MetaClass`].
#[derive(Debug)]
pub struct MetaClassBuilder {
    name: String,
    properties: Vec<MetaProperty>,
    id_property: Option<String>,
    id_strategy: IdStrategy,
    embeddable: bool,
    soft_delete: bool,
    instance_name: Vec<String>,
}

impl MetaClassBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            id_property: None,
            id_strategy: IdStrategy::Uuid,
            embeddable: false,
            soft_delete: false,
            instance_name: Vec::new(),
        }
    }

    fn push(mut self, name: impl Into<String>, kind: PropertyKind) -> Self {
        self.properties.push(MetaProperty {
            name: name.into(),
            kind,
            read_only: false,
            mandatory: false,
        });
        self
    }

    /// Declares the primary key property.
    #[must_use]
    pub fn id(mut self, name: impl Into<String>, strategy: IdStrategy) -> Self {
        let name = name.into();
        self.id_property = Some(name.clone());
        self.id_strategy = strategy;
        self.push(
            name,
            PropertyKind::Scalar {
                ty: strategy.scalar_type(),
            },
        )
    }

    /// Declares a scalar property.
    #[must_use]
    pub fn scalar(self, name: impl Into<String>, ty: ScalarType) -> Self {
        self.push(name, PropertyKind::Scalar { ty })
    }

    /// Declares a reference property.
    #[must_use]
    pub fn reference(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.push(
            name,
            PropertyKind::Reference {
                target: target.into(),
            },
        )
    }

    /// Declares a list-backed collection property.
    #[must_use]
    pub fn list(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.push(
            name,
            PropertyKind::Collection {
                target: target.into(),
                collection: CollectionKind::List,
            },
        )
    }

    /// Declares a set-backed collection property.
    #[must_use]
    pub fn set(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.push(
            name,
            PropertyKind::Collection {
                target: target.into(),
                collection: CollectionKind::Set,
            },
        )
    }

    /// Declares an embedded property.
    #[must_use]
    pub fn embedded(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.push(
            name,
            PropertyKind::Embedded {
                target: target.into(),
            },
        )
    }

    /// Marks the most recently declared property read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        if let Some(p) = self.properties.last_mut() {
            p.read_only = true;
        }
        self
    }

    /// Marks the most recently declared property mandatory.
    #[must_use]
    pub fn mandatory(mut self) -> Self {
        if let Some(p) = self.properties.last_mut() {
            p.mandatory = true;
        }
        self
    }

    /// Marks the class as an embeddable value object.
    #[must_use]
    pub fn embeddable(mut self) -> Self {
        self.embeddable = true;
        self
    }

    /// Enables soft deletion for the class.
    #[must_use]
    pub fn soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    /// Sets the instance name properties.
    #[must_use]
    pub fn instance_name<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.instance_name = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a fully specified property descriptor.
    #[must_use]
    pub fn property(mut self, property: MetaProperty) -> Self {
        self.properties.push(property);
        self
    }

    fn build(self) -> ModelResult<MetaClass> {
        let mut by_name = HashMap::with_capacity(self.properties.len());
        for (i, p) in self.properties.iter().enumerate() {
            if by_name.insert(p.name.clone(), i).is_some() {
                return Err(ModelError::configuration(format!(
                    "duplicate property {}.{}",
                    self.name, p.name
                )));
            }
        }
        if self.embeddable && self.id_property.is_some() {
            return Err(ModelError::configuration(format!(
                "embeddable class {} cannot declare an id",
                self.name
            )));
        }
        if !self.embeddable && self.id_property.is_none() {
            return Err(ModelError::configuration(format!(
                "entity class {} has no id property",
                self.name
            )));
        }
        for name in &self.instance_name {
            if !by_name.contains_key(name) {
                return Err(ModelError::configuration(format!(
                    "instance name of {} refers to unknown property {name}",
                    self.name
                )));
            }
        }
        Ok(MetaClass {
            name: self.name,
            properties: self.properties,
            by_name,
            id_property: self.id_property,
            id_strategy: self.id_strategy,
            embeddable: self.embeddable,
            soft_delete: self.soft_delete,
            instance_name: self.instance_name,
        })
    }
}

/// Registry of all entity classes.
#[derive(Debug, Default)]
pub struct Metadata {
    classes: HashMap<String, Arc<MetaClass>>,
}

impl Metadata {
    /// Starts building a registry.
    pub fn builder() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    /// Looks up a class by name.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownClass`] if no class has this name.
    pub fn class(&self, name: &str) -> ModelResult<&Arc<MetaClass>> {
        self.classes
            .get(name)
            .ok_or_else(|| ModelError::unknown_class(name))
    }

    /// Iterates all registered classes.
    pub fn classes(&self) -> impl Iterator<Item = &Arc<MetaClass>> {
        self.classes.values()
    }

    /// Number of registered classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` if no class is registered.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Builder for [`Metadata`].
#[derive(Debug, Default)]
pub struct MetadataBuilder {
    classes: Vec<MetaClassBuilder>,
}

impl MetadataBuilder {
    /// Adds a class.
    #[must_use]
    pub fn class(mut self, class: MetaClassBuilder) -> Self {
        self.classes.push(class);
        self
    }

    /// Validates the descriptors and builds the registry.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Configuration`] for duplicate classes or
    /// properties, dangling targets, embedded properties whose target is not
    /// embeddable, and reference or collection properties targeting an
    /// embeddable.
    pub fn build(self) -> ModelResult<Arc<Metadata>> {
        let mut classes = HashMap::with_capacity(self.classes.len());
        for builder in self.classes {
            let class = builder.build()?;
            let name = class.name.clone();
            if classes.insert(name.clone(), Arc::new(class)).is_some() {
                return Err(ModelError::configuration(format!(
                    "duplicate class {name}"
                )));
            }
        }

        for class in classes.values() {
            for p in class.class_properties() {
                let Some(target) = p.kind.target() else {
                    continue;
                };
                let target_class: &Arc<MetaClass> = classes.get(target).ok_or_else(|| {
                    ModelError::configuration(format!(
                        "{}.{} targets unknown class {target}",
                        class.name, p.name
                    ))
                })?;
                let embedded = matches!(p.kind, PropertyKind::Embedded { .. });
                if embedded != target_class.embeddable {
                    return Err(ModelError::configuration(format!(
                        "{}.{} is {} but {target} {} embeddable",
                        class.name,
                        p.name,
                        p.expected(),
                        if target_class.embeddable { "is" } else { "is not" }
                    )));
                }
            }
        }

        Ok(Arc::new(Metadata { classes }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModelResult<Arc<Metadata>> {
        Metadata::builder()
            .class(
                MetaClass::builder("Customer")
                    .id("id", IdStrategy::Uuid)
                    .scalar("name", ScalarType::Text)
                    .embedded("address", "Address")
                    .instance_name(["name"]),
            )
            .class(
                MetaClass::builder("Address")
                    .embeddable()
                    .scalar("city", ScalarType::Text),
            )
            .build()
    }

    #[test]
    fn builds_registry() {
        let meta = sample().unwrap();
        assert_eq!(meta.len(), 2);
        let customer = meta.class("Customer").unwrap();
        assert_eq!(customer.id_property(), Some("id"));
        assert!(customer.is_id_property("id"));
        assert_eq!(customer.scalar_properties().count(), 2);
        assert_eq!(customer.class_properties().count(), 1);
        assert!(meta.class("Address").unwrap().is_embeddable());
    }

    #[test]
    fn unknown_class() {
        let meta = sample().unwrap();
        assert!(matches!(
            meta.class("Nope"),
            Err(ModelError::UnknownClass { .. })
        ));
    }

    #[test]
    fn embedded_target_must_be_embeddable() {
        let result = Metadata::builder()
            .class(
                MetaClass::builder("Order")
                    .id("id", IdStrategy::Uuid)
                    .embedded("customer", "Customer"),
            )
            .class(MetaClass::builder("Customer").id("id", IdStrategy::Uuid))
            .build();
        assert!(matches!(result, Err(ModelError::Configuration { .. })));
    }

    #[test]
    fn reference_cannot_target_embeddable() {
        let result = Metadata::builder()
            .class(
                MetaClass::builder("Order")
                    .id("id", IdStrategy::Uuid)
                    .reference("address", "Address"),
            )
            .class(MetaClass::builder("Address").embeddable())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn dangling_target() {
        let result = Metadata::builder()
            .class(
                MetaClass::builder("Order")
                    .id("id", IdStrategy::Uuid)
                    .list("lines", "OrderLine"),
            )
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn entity_needs_id() {
        let result = Metadata::builder()
            .class(MetaClass::builder("Thing").scalar("x", ScalarType::Integer))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_property() {
        let result = Metadata::builder()
            .class(
                MetaClass::builder("Thing")
                    .id("id", IdStrategy::Sequence)
                    .scalar("id", ScalarType::Integer),
            )
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn sequence_id_is_integer() {
        let meta = Metadata::builder()
            .class(MetaClass::builder("Thing").id("id", IdStrategy::Sequence))
            .build()
            .unwrap();
        let id = meta.class("Thing").unwrap().property("id").unwrap();
        assert_eq!(
            id.kind,
            PropertyKind::Scalar {
                ty: ScalarType::Integer
            }
        );
    }
}
