//! Fetch plans.
//!
//! A fetch plan is a property-inclusion tree: which properties of a class
//! are expected to be loaded, and for class-typed properties, which plan
//! applies to the referenced entities.

use crate::error::{ModelError, ModelResult};
use crate::meta::{MetaClass, Metadata};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Name of the plan with every scalar property.
pub const LOCAL: &str = "_local";
/// Name of the plan with the id and instance name properties.
pub const INSTANCE_NAME: &str = "_instance_name";
/// Name of the union of [`LOCAL`] and [`INSTANCE_NAME`].
pub const BASE: &str = "_base";

/// Property-inclusion tree for one entity class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPlan {
    /// Class the plan applies to.
    pub class: String,
    /// Included properties, with a nested plan for class-typed properties.
    #[serde(default)]
    pub properties: BTreeMap<String, Option<FetchPlan>>,
}

impl FetchPlan {
    /// Creates an empty plan.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Adds a property without a nested plan.
    #[must_use]
    pub fn add(mut self, property: impl Into<String>) -> Self {
        self.properties.insert(property.into(), None);
        self
    }

    /// Adds a class-typed property with a nested plan.
    #[must_use]
    pub fn add_nested(mut self, property: impl Into<String>, plan: FetchPlan) -> Self {
        self.properties.insert(property.into(), Some(plan));
        self
    }

    /// Returns `true` if the plan includes the property.
    pub fn includes(&self, property: &str) -> bool {
        self.properties.contains_key(property)
    }

    /// Returns the nested plan of a property.
    pub fn nested(&self, property: &str) -> Option<&FetchPlan> {
        self.properties.get(property).and_then(Option::as_ref)
    }

    /// Adds everything from `other` into this plan.
    pub fn extend(&mut self, other: &FetchPlan) {
        for (name, nested) in &other.properties {
            let Some(slot) = self.properties.get_mut(name) else {
                self.properties.insert(name.clone(), nested.clone());
                continue;
            };
            if let Some(theirs) = nested {
                if let Some(mine) = slot.as_mut() {
                    mine.extend(theirs);
                } else {
                    *slot = Some(theirs.clone());
                }
            }
        }
    }

    /// Plan with every scalar property of the class.
    pub fn local(meta: &MetaClass) -> Self {
        let mut plan = Self::new(meta.name());
        for p in meta.scalar_properties() {
            plan.properties.insert(p.name.clone(), None);
        }
        plan
    }

    /// Plan with the id and the instance name properties.
    ///
    /// Class-typed instance name properties get the instance name plan of
    /// their target, so a reference renders through its own name.
    ///
    /// # Errors
    ///
    /// Returns an error if a target class is not registered.
    pub fn instance_name(metadata: &Metadata, meta: &MetaClass) -> ModelResult<Self> {
        Self::instance_name_bounded(metadata, meta, 4)
    }

    fn instance_name_bounded(metadata: &Metadata, meta: &MetaClass, depth: usize) -> ModelResult<Self> {
        let mut plan = Self::new(meta.name());
        if let Some(id) = meta.id_property() {
            plan.properties.insert(id.to_string(), None);
        }
        for name in meta.instance_name() {
            let property = meta.require(name)?;
            let nested = match property.kind.target() {
                Some(target) if depth > 0 => Some(Self::instance_name_bounded(
                    metadata,
                    metadata.class(target)?,
                    depth - 1,
                )?),
                _ => None,
            };
            plan.properties.insert(name.clone(), nested);
        }
        Ok(plan)
    }

    /// Union of [`FetchPlan::local`] and [`FetchPlan::instance_name`].
    ///
    /// # Errors
    ///
    /// Returns an error if a target class is not registered.
    pub fn base(metadata: &Metadata, meta: &MetaClass) -> ModelResult<Self> {
        let mut plan = Self::local(meta);
        plan.extend(&Self::instance_name(metadata, meta)?);
        Ok(plan)
    }

    /// Checks every property and nested plan against the metadata.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::FetchPlan`] for unknown properties, nested
    /// plans on scalar properties and nested plans of the wrong class.
    pub fn validate(&self, metadata: &Metadata) -> ModelResult<()> {
        let meta = metadata.class(&self.class)?;
        for (name, nested) in &self.properties {
            let property = meta
                .property(name)
                .ok_or_else(|| ModelError::fetch_plan(format!("{}.{name} does not exist", self.class)))?;
            if let Some(nested) = nested {
                match property.kind.target() {
                    Some(target) if target == nested.class => nested.validate(metadata)?,
                    Some(target) => {
                        return Err(ModelError::fetch_plan(format!(
                            "{}.{name} targets {target}, nested plan is for {}",
                            self.class, nested.class
                        )))
                    }
                    None => {
                        return Err(ModelError::fetch_plan(format!(
                            "{}.{name} is scalar and cannot have a nested plan",
                            self.class
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

/// Serialized form of a named fetch plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanDescriptor {
    class: String,
    name: String,
    #[serde(default)]
    extends: Option<String>,
    #[serde(default)]
    properties: Vec<PropertyDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PropertyDescriptor {
    name: String,
    #[serde(default)]
    plan: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlanDocument {
    plans: Vec<PlanDescriptor>,
}

/// Repository of named fetch plans.
///
/// The builtin names [`LOCAL`], [`INSTANCE_NAME`] and [`BASE`] resolve for
/// every class; other names must be registered first.
#[derive(Debug)]
pub struct FetchPlanRepository {
    metadata: Arc<Metadata>,
    plans: HashMap<(String, String), FetchPlan>,
}

impl FetchPlanRepository {
    /// Creates a repository with only the builtin plans.
    pub fn new(metadata: Arc<Metadata>) -> Self {
        Self {
            metadata,
            plans: HashMap::new(),
        }
    }

    /// Metadata the plans are checked against.
    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    /// Registers a named plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the plan does not match the metadata or the name
    /// shadows a builtin.
    pub fn register(&mut self, name: impl Into<String>, plan: FetchPlan) -> ModelResult<()> {
        let name = name.into();
        if name.starts_with('_') {
            return Err(ModelError::fetch_plan(format!(
                "plan name {name} is reserved"
            )));
        }
        plan.validate(&self.metadata)?;
        self.plans.insert((plan.class.clone(), name), plan);
        Ok(())
    }

    /// Resolves a plan by class and name.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown classes and unregistered names.
    pub fn resolve(&self, class: &str, name: &str) -> ModelResult<FetchPlan> {
        let meta = self.metadata.class(class)?;
        match name {
            LOCAL => Ok(FetchPlan::local(meta)),
            INSTANCE_NAME => FetchPlan::instance_name(&self.metadata, meta),
            BASE => FetchPlan::base(&self.metadata, meta),
            _ => self
                .plans
                .get(&(class.to_string(), name.to_string()))
                .cloned()
                .ok_or_else(|| ModelError::fetch_plan(format!("no plan {name} for {class}"))),
        }
    }

    /// Registers every plan of a JSON document.
    ///
    /// Plans may extend and nest other plans by name, including plans
    /// defined earlier in the same document. Returns the number of plans
    /// registered.
    ///
    /// ```json
    /// { "plans": [
    ///   { "class": "Order", "name": "order-edit", "extends": "_local",
    ///     "properties": [ { "name": "customer", "plan": "_instance_name" } ] }
    /// ] }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON or plans that do not resolve.
    pub fn load_json(&mut self, json: &str) -> ModelResult<usize> {
        let doc: PlanDocument =
            serde_json::from_str(json).map_err(|e| ModelError::fetch_plan(e.to_string()))?;
        let count = doc.plans.len();
        for descriptor in doc.plans {
            let plan = self.build(&descriptor)?;
            self.register(descriptor.name, plan)?;
        }
        Ok(count)
    }

    fn build(&self, descriptor: &PlanDescriptor) -> ModelResult<FetchPlan> {
        let meta = self.metadata.class(&descriptor.class)?;
        let mut plan = match &descriptor.extends {
            Some(parent) => self.resolve(&descriptor.class, parent)?,
            None => FetchPlan::new(&descriptor.class),
        };
        for property in &descriptor.properties {
            let nested = match (&property.plan, meta.require(&property.name)?.kind.target()) {
                (Some(plan_name), Some(target)) => Some(self.resolve(target, plan_name)?),
                (Some(_), None) => {
                    return Err(ModelError::fetch_plan(format!(
                        "{}.{} is scalar and cannot have a nested plan",
                        descriptor.class, property.name
                    )))
                }
                (None, _) => None,
            };
            plan.properties.insert(property.name.clone(), nested);
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::IdStrategy;
    use crate::value::ScalarType;

    fn metadata() -> Arc<Metadata> {
        Metadata::builder()
            .class(
                MetaClass::builder("Customer")
                    .id("id", IdStrategy::Uuid)
                    .scalar("name", ScalarType::Text)
                    .scalar("email", ScalarType::Text)
                    .instance_name(["name"]),
            )
            .class(
                MetaClass::builder("Order")
                    .id("id", IdStrategy::Sequence)
                    .scalar("number", ScalarType::Text)
                    .reference("customer", "Customer")
                    .instance_name(["number", "customer"]),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn builtin_plans() {
        let repo = FetchPlanRepository::new(metadata());
        let local = repo.resolve("Order", LOCAL).unwrap();
        assert!(local.includes("id"));
        assert!(local.includes("number"));
        assert!(!local.includes("customer"));

        let name = repo.resolve("Order", INSTANCE_NAME).unwrap();
        assert!(name.includes("customer"));
        let nested = name.nested("customer").unwrap();
        assert!(nested.includes("name"));
        assert!(!nested.includes("email"));

        let base = repo.resolve("Order", BASE).unwrap();
        assert!(base.includes("number"));
        assert!(base.nested("customer").is_some());
    }

    #[test]
    fn register_and_resolve() {
        let mut repo = FetchPlanRepository::new(metadata());
        let plan = FetchPlan::new("Order")
            .add("number")
            .add_nested("customer", FetchPlan::new("Customer").add("email"));
        repo.register("order-brief", plan.clone()).unwrap();
        assert_eq!(repo.resolve("Order", "order-brief").unwrap(), plan);
        assert!(repo.resolve("Customer", "order-brief").is_err());
    }

    #[test]
    fn reserved_names_rejected() {
        let mut repo = FetchPlanRepository::new(metadata());
        assert!(repo.register("_mine", FetchPlan::new("Order")).is_err());
    }

    #[test]
    fn invalid_plans_rejected() {
        let mut repo = FetchPlanRepository::new(metadata());
        let bad = FetchPlan::new("Order").add("missing");
        assert!(repo.register("bad", bad).is_err());
        let bad = FetchPlan::new("Order").add_nested("number", FetchPlan::new("Customer"));
        assert!(repo.register("bad", bad).is_err());
        let bad = FetchPlan::new("Order").add_nested("customer", FetchPlan::new("Order"));
        assert!(repo.register("bad", bad).is_err());
    }

    #[test]
    fn load_from_json() {
        let mut repo = FetchPlanRepository::new(metadata());
        let json = r#"{ "plans": [
            { "class": "Customer", "name": "customer-contact", "extends": "_instance_name",
              "properties": [ { "name": "email" } ] },
            { "class": "Order", "name": "order-edit", "extends": "_local",
              "properties": [ { "name": "customer", "plan": "customer-contact" } ] }
        ] }"#;
        assert_eq!(repo.load_json(json).unwrap(), 2);
        let plan = repo.resolve("Order", "order-edit").unwrap();
        assert!(plan.includes("number"));
        let customer = plan.nested("customer").unwrap();
        assert!(customer.includes("email"));
        assert!(customer.includes("name"));
    }

    #[test]
    fn malformed_json() {
        let mut repo = FetchPlanRepository::new(metadata());
        assert!(matches!(
            repo.load_json("{"),
            Err(ModelError::FetchPlan { .. })
        ));
    }

    #[test]
    fn extend_merges_nested() {
        let mut a = FetchPlan::new("Order").add_nested("customer", FetchPlan::new("Customer").add("name"));
        let b = FetchPlan::new("Order")
            .add("number")
            .add_nested("customer", FetchPlan::new("Customer").add("email"));
        a.extend(&b);
        assert!(a.includes("number"));
        let c = a.nested("customer").unwrap();
        assert!(c.includes("name") && c.includes("email"));
    }
}
