//! Entity and instance identifiers.

use crate::error::{ModelError, ModelResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Persistent identifier of an entity.
///
/// An entity without an id is "new": it has never been saved. Ids are
/// assigned either by the application or by the persistence layer on save.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EntityId {
    /// UUID identifier.
    Uuid(Uuid),
    /// Numeric (usually sequence generated) identifier.
    Long(i64),
    /// Natural text key.
    Text(String),
}

impl EntityId {
    /// Creates a new random UUID identifier.
    #[must_use]
    pub fn random() -> Self {
        Self::Uuid(Uuid::new_v4())
    }

    /// Reads an id out of a property value.
    ///
    /// Returns `Ok(None)` for `Null` (the entity has no id yet).
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidId`] for values that cannot identify an
    /// entity, such as floats or booleans.
    pub fn from_value(value: &Value) -> ModelResult<Option<Self>> {
        match value {
            Value::Null => Ok(None),
            Value::Uuid(u) => Ok(Some(Self::Uuid(*u))),
            Value::Integer(n) => Ok(Some(Self::Long(*n))),
            Value::Text(s) => Ok(Some(Self::Text(s.clone()))),
            other => Err(ModelError::invalid_id(format!(
                "{other:?} cannot be used as an entity id"
            ))),
        }
    }

    /// Converts the id back into a property value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Uuid(u) => Value::Uuid(*u),
            Self::Long(n) => Value::Integer(*n),
            Self::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({self})")
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Long(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self::Uuid(uuid)
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        Self::Long(n)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl TryFrom<&Value> for EntityId {
    type Error = ModelError;

    fn try_from(value: &Value) -> ModelResult<Self> {
        Self::from_value(value)?.ok_or_else(|| ModelError::invalid_id("null id"))
    }
}

/// Identity of one in-memory entity instance.
///
/// Structural clones keep the instance id of their source, so a detached
/// copy, the managed copy and a copy returned from storage can all be
/// correlated even while the entity has no [`EntityId`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Creates a new random instance id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_means_no_id() {
        assert_eq!(EntityId::from_value(&Value::Null).unwrap(), None);
        assert!(EntityId::try_from(&Value::Null).is_err());
    }

    #[test]
    fn value_conversion() {
        let id = EntityId::Long(42);
        assert_eq!(EntityId::from_value(&id.to_value()).unwrap(), Some(id));

        let id = EntityId::random();
        assert_eq!(EntityId::from_value(&id.to_value()).unwrap(), Some(id));
    }

    #[test]
    fn float_is_not_an_id() {
        assert!(matches!(
            EntityId::from_value(&Value::Float(1.5)),
            Err(ModelError::InvalidId { .. })
        ));
    }

    #[test]
    fn instance_ids_are_unique() {
        assert_ne!(InstanceId::new(), InstanceId::new());
    }

    #[test]
    fn display() {
        assert_eq!(EntityId::Long(7).to_string(), "7");
        assert_eq!(EntityId::from("abc").to_string(), "abc");
    }
}
