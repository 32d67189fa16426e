//! Small predicates and accessors shared by every other crate.
//!
//! Nil means "absent or JSON null" throughout. Accessors never panic on a
//! value of the wrong shape; they treat it as nil.

use std::sync::Arc;

use serde_json::Value;

/// Shareable equality used by the stream operators.
pub type EqualsPredicate<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Structural equality.
pub fn is_equal<T: PartialEq + ?Sized>(left: &T, right: &T) -> bool {
    left == right
}

/// The default equality for `T`, boxed for sharing.
pub fn default_equality<T: PartialEq + 'static>() -> EqualsPredicate<T> {
    Arc::new(|left: &T, right: &T| is_equal(left, right))
}

/// Returns a predicate that tests a value against `comparison`.
pub fn is_equal_to<T>(comparison: T) -> impl Fn(&T) -> bool
where
    T: PartialEq,
{
    move |value| is_equal(value, &comparison)
}

/// Like [`is_equal_to`], but compares `transform(value)` instead of the value.
pub fn is_equal_to_by<R, T, F>(comparison: T, transform: F) -> impl Fn(&R) -> bool
where
    T: PartialEq,
    F: Fn(&R) -> T,
{
    move |value| is_equal(&transform(value), &comparison)
}

pub fn is_nil(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

pub fn is_not_nil(value: Option<&Value>) -> bool {
    !is_nil(value)
}

pub fn is_string(value: &Value) -> bool {
    value.is_string()
}

/// Reads `key` from an object. Missing keys, null values and non-objects all
/// come back as `None`.
pub fn get_property<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let found = value.as_object().and_then(|object| object.get(key));
    if is_nil(found) {
        None
    } else {
        found
    }
}

pub fn get_property_or(value: &Value, key: &str, default: Value) -> Value {
    get_property(value, key).cloned().unwrap_or(default)
}

/// Generates an accessor for `key`. The accessor yields `Value::Null` when the
/// property is nil.
pub fn pluck_property(key: impl Into<String>) -> impl Fn(&Value) -> Value + Clone {
    let key = key.into();
    move |value| get_property_or(value, &key, Value::Null)
}

pub fn const_generator<T: Clone>(value: T) -> impl Fn() -> T {
    move || value.clone()
}

/// Opaque random identifier, e.g. `i4f0c1e9b2d6a4b7c`.
pub fn random_identifier() -> String {
    let id = uuid::Uuid::new_v4().as_u128() as u64;
    format!("i{id:x}")
}
