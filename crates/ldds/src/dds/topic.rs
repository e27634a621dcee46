// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ldds contributors

//! Topics: a name bound to a type descriptor and topic QoS.

use std::sync::Arc;

use crate::qos::Qos;

/// Shape of the data on a topic, as far as the core needs to know: the
/// registered type name and how instance keys are derived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub type_name: String,
    /// Whether samples carry a key (unkeyed topics have one instance).
    pub keyed: bool,
    /// Identity of the key type; equal key classes on different topics
    /// share instance handles.
    pub key_class: String,
    /// Whether the serialized key has a bounded maximum of 16 bytes, in
    /// which case the key hash is the key itself rather than its MD5.
    pub bounded_key: bool,
}

impl TypeDescriptor {
    /// Descriptor for a keyed type whose key may exceed 16 bytes.
    #[must_use]
    pub fn keyed(type_name: &str, key_class: &str) -> TypeDescriptor {
        TypeDescriptor {
            type_name: type_name.to_string(),
            keyed: true,
            key_class: key_class.to_string(),
            bounded_key: false,
        }
    }

    /// Descriptor for an unkeyed type.
    #[must_use]
    pub fn unkeyed(type_name: &str) -> TypeDescriptor {
        TypeDescriptor {
            type_name: type_name.to_string(),
            keyed: false,
            key_class: String::new(),
            bounded_key: true,
        }
    }
}

pub(crate) struct TopicInner {
    pub name: String,
    pub type_desc: TypeDescriptor,
    pub qos: Qos,
    /// Guid prefix of the owning participant; endpoint creation on a
    /// different participant is an illegal operation.
    pub owner: crate::core::guid::GuidPrefix,
}

/// A named, typed channel within a participant.
#[derive(Clone)]
pub struct Topic {
    pub(crate) inner: Arc<TopicInner>,
}

impl Topic {
    pub(crate) fn new(
        name: &str,
        type_desc: TypeDescriptor,
        qos: Qos,
        owner: crate::core::guid::GuidPrefix,
    ) -> Topic {
        Topic {
            inner: Arc::new(TopicInner {
                name: name.to_string(),
                type_desc,
                qos,
                owner,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn type_descriptor(&self) -> &TypeDescriptor {
        &self.inner.type_desc
    }

    #[must_use]
    pub fn qos(&self) -> &Qos {
        &self.inner.qos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptors() {
        let k = TypeDescriptor::keyed("SensorReading", "SensorKey");
        assert!(k.keyed);
        assert_eq!(k.key_class, "SensorKey");
        let u = TypeDescriptor::unkeyed("LogLine");
        assert!(!u.keyed);
        assert!(u.bounded_key);
    }
}
