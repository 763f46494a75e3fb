//! Feature identification keys.
//!
//! A [`FeatureKey`] names an abstract capability. It is either a free-form
//! string (`"IMailer"`), a type tag (`FeatureKey::of::<dyn Mailer>()`), or a
//! type tag qualified by a name for several features of one type.

use std::any::{TypeId, type_name};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use haqn_support::rendering::shorten_type_name;

/// Uniquely identifies a feature in a registry.
///
/// Keys are cheap to clone. String keys and type keys never compare equal,
/// even when the string happens to spell the type's name.
///
/// # Examples
/// ```
/// use haqn_container::key::FeatureKey;
///
/// let by_name = FeatureKey::name("IMailer");
/// assert_eq!(by_name, FeatureKey::from("IMailer"));
///
/// let by_type = FeatureKey::of::<String>();
/// assert_eq!(by_type.type_name(), Some("alloc::string::String"));
///
/// let primary = FeatureKey::named::<String>("primary_db");
/// let replica = FeatureKey::named::<String>("replica_db");
/// assert_ne!(primary, replica);
/// ```
#[derive(Clone)]
pub struct FeatureKey {
    kind: KeyKind,
}

#[derive(Clone)]
enum KeyKind {
    Name(Arc<str>),
    Type {
        type_id: TypeId,
        type_name: &'static str,
        name: Option<Arc<str>>,
    },
}

impl FeatureKey {
    /// Creates a key from a free-form name.
    #[inline]
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        Self {
            kind: KeyKind::Name(name.into()),
        }
    }

    /// Creates a key for type `T`.
    ///
    /// A private marker type makes a sentinel key nobody else can spell.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            kind: KeyKind::Type {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                name: None,
            },
        }
    }

    /// Creates a key for type `T` qualified by `name`.
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: impl Into<Arc<str>>) -> Self {
        Self {
            kind: KeyKind::Type {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                name: Some(name.into()),
            },
        }
    }

    /// Returns the [`TypeId`] for type keys.
    pub fn type_id(&self) -> Option<TypeId> {
        match &self.kind {
            KeyKind::Type { type_id, .. } => Some(*type_id),
            KeyKind::Name(_) => None,
        }
    }

    /// Returns the full type name for type keys.
    pub fn type_name(&self) -> Option<&'static str> {
        match &self.kind {
            KeyKind::Type { type_name, .. } => Some(*type_name),
            KeyKind::Name(_) => None,
        }
    }

    /// Returns the string name: the whole key for string keys, the
    /// qualifier for named type keys.
    pub fn name_str(&self) -> Option<&str> {
        match &self.kind {
            KeyKind::Name(name) => Some(&**name),
            KeyKind::Type { name, .. } => name.as_deref(),
        }
    }

    /// Short human-readable label, used for suggestions in error messages.
    pub fn label(&self) -> Cow<'_, str> {
        match &self.kind {
            KeyKind::Name(name) => Cow::Borrowed(&**name),
            KeyKind::Type {
                type_name,
                name: None,
                ..
            } => Cow::Owned(shorten_type_name(type_name)),
            KeyKind::Type {
                type_name,
                name: Some(name),
                ..
            } => Cow::Owned(format!("{}#{name}", shorten_type_name(type_name))),
        }
    }
}

impl PartialEq for FeatureKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (KeyKind::Name(a), KeyKind::Name(b)) => a == b,
            (
                KeyKind::Type {
                    type_id: a, name: an, ..
                },
                KeyKind::Type {
                    type_id: b, name: bn, ..
                },
            ) => a == b && an == bn,
            _ => false,
        }
    }
}

impl Eq for FeatureKey {}

// type_name is left out: it is derived from type_id.
impl Hash for FeatureKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.kind {
            KeyKind::Name(name) => {
                0u8.hash(state);
                name.hash(state);
            }
            KeyKind::Type { type_id, name, .. } => {
                1u8.hash(state);
                type_id.hash(state);
                name.hash(state);
            }
        }
    }
}

impl From<&str> for FeatureKey {
    fn from(name: &str) -> Self {
        FeatureKey::name(name)
    }
}

impl From<String> for FeatureKey {
    fn from(name: String) -> Self {
        FeatureKey::name(name)
    }
}

impl From<&FeatureKey> for FeatureKey {
    fn from(key: &FeatureKey) -> Self {
        key.clone()
    }
}

impl fmt::Debug for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            KeyKind::Name(name) => write!(f, "FeatureKey({name:?})"),
            KeyKind::Type {
                type_name,
                name: None,
                ..
            } => write!(f, "FeatureKey({type_name})"),
            KeyKind::Type {
                type_name,
                name: Some(name),
                ..
            } => write!(f, "FeatureKey({type_name}, name={name:?})"),
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            KeyKind::Name(name) => write!(f, "{name:?}"),
            KeyKind::Type {
                type_name,
                name: None,
                ..
            } => write!(f, "{type_name}"),
            KeyKind::Type {
                type_name,
                name: Some(name),
                ..
            } => write!(f, "{type_name} (name={name:?})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Sentinel;

    #[test]
    fn string_keys_compare_by_content() {
        assert_eq!(FeatureKey::name("IService"), FeatureKey::from(String::from("IService")));
        assert_ne!(FeatureKey::name("IService"), FeatureKey::name("iservice"));
    }

    #[test]
    fn special_characters_are_fine() {
        let key = FeatureKey::from("name with spaces #@");
        assert_eq!(key.name_str(), Some("name with spaces #@"));
        assert_eq!(key.label(), "name with spaces #@");
    }

    #[test]
    fn type_key_knows_its_type() {
        let key = FeatureKey::of::<Sentinel>();
        assert!(key.type_name().unwrap().contains("Sentinel"));
        assert_eq!(key.type_id(), Some(TypeId::of::<Sentinel>()));
        assert_eq!(key.name_str(), None);
        assert_eq!(key.label(), "Sentinel");
    }

    #[test]
    fn name_and_type_keys_never_collide() {
        let by_name = FeatureKey::name(type_name::<String>());
        assert_ne!(by_name, FeatureKey::of::<String>());
    }

    #[test]
    fn named_type_keys_differ_by_qualifier() {
        assert_ne!(FeatureKey::named::<String>("a"), FeatureKey::named::<String>("b"));
        assert_ne!(FeatureKey::named::<String>("a"), FeatureKey::of::<String>());
        assert_eq!(FeatureKey::named::<String>("a").label(), "String#a");
    }

    #[test]
    fn keys_work_in_hashmaps() {
        let mut map = HashMap::new();
        map.insert(FeatureKey::name("IClock"), 1);
        map.insert(FeatureKey::of::<Sentinel>(), 2);
        assert_eq!(map.get(&FeatureKey::from("IClock")), Some(&1));
        assert_eq!(map.get(&FeatureKey::of::<Sentinel>()), Some(&2));
        assert_eq!(map.get(&FeatureKey::of::<String>()), None);
    }

    #[test]
    fn trait_objects_as_keys() {
        trait Mailer {}
        let key = FeatureKey::of::<dyn Mailer>();
        assert!(format!("{key}").contains("Mailer"));
    }

    #[test]
    fn display_quotes_string_keys() {
        assert_eq!(FeatureKey::name("svc").to_string(), "\"svc\"");
    }
}
