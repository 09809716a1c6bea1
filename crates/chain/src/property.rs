//! Per-exchange key-value storage shared between middleware.
//!
//! A [`PropertyList`] lives inside every [`Request`](crate::Request) and
//! [`Response`](crate::Response). Middleware earlier in the chain uses it to hand state to
//! middleware later in the chain (an authenticated user id, a parsed session, a timer).
//!
//! Each key maps to exactly one [`Property`]. Writing a key again replaces the previous value,
//! and any owned handle stored under that key is released right away.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// A single typed value stored in a [`PropertyList`].
#[derive(Debug)]
pub enum Property {
    Text(String),
    Integer(i64),
    Real(f64),
    /// An arbitrary value owned by the property and released exactly once.
    Handle(OwnedHandle),
}

impl Property {
    /// Returns the text value, or `None` if this property holds another variant.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Property::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Property::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Property::Real(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&OwnedHandle> {
        match self {
            Property::Handle(handle) => Some(handle),
            _ => None,
        }
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Property::Text(value)
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Property::Text(value.to_owned())
    }
}

impl From<i64> for Property {
    fn from(value: i64) -> Self {
        Property::Integer(value)
    }
}

impl From<i32> for Property {
    fn from(value: i32) -> Self {
        Property::Integer(i64::from(value))
    }
}

impl From<f64> for Property {
    fn from(value: f64) -> Self {
        Property::Real(value)
    }
}

impl From<OwnedHandle> for Property {
    fn from(handle: OwnedHandle) -> Self {
        Property::Handle(handle)
    }
}

type AnyValue = Box<dyn Any + Send>;
type Destructor = Box<dyn FnOnce(AnyValue) + Send>;

/// An opaque value exclusively owned by a [`Property`].
///
/// The value is released when the handle is dropped: either by its own `Drop`, or by the
/// destructor passed to [`OwnedHandle::with_destructor`]. Both paths run exactly once.
pub struct OwnedHandle {
    value: Option<AnyValue>,
    destructor: Option<Destructor>,
}

impl OwnedHandle {
    pub fn new<T: Send + 'static>(value: T) -> Self {
        Self { value: Some(Box::new(value)), destructor: None }
    }

    /// Wraps `value` and calls `destructor` with it when the handle is released.
    pub fn with_destructor<T, F>(value: T, destructor: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let destructor: Destructor = Box::new(move |any: AnyValue| {
            if let Ok(value) = any.downcast::<T>() {
                destructor(*value);
            }
        });
        Self { value: Some(Box::new(value)), destructor: Some(destructor) }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.as_deref().and_then(|value| value.downcast_ref::<T>())
    }

    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.value.as_deref_mut().and_then(|value| value.downcast_mut::<T>())
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if let (Some(value), Some(destructor)) = (self.value.take(), self.destructor.take()) {
            destructor(value);
        }
    }
}

impl fmt::Debug for OwnedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle").field("custom_destructor", &self.destructor.is_some()).finish_non_exhaustive()
    }
}

/// A map from string keys to [`Property`] values.
///
/// Typed getters never fail: a missing key, or a key holding another variant, yields the zero
/// value of the requested type.
#[derive(Debug, Default)]
pub struct PropertyList {
    entries: HashMap<String, Property>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, releasing whatever was stored there before.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Property>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Stores an arbitrary owned value under `key`.
    pub fn set_object<T: Send + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.set(key, OwnedHandle::new(value));
    }

    /// Stores an owned value that is released through `destructor`.
    pub fn set_object_with<T, F>(&mut self, key: impl Into<String>, value: T, destructor: F)
    where
        T: Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        self.set(key, OwnedHandle::with_destructor(value, destructor));
    }

    pub fn get(&self, key: &str) -> Option<&Property> {
        self.entries.get(key)
    }

    pub fn get_text(&self, key: &str) -> &str {
        self.get(key).and_then(Property::as_text).unwrap_or_default()
    }

    pub fn get_integer(&self, key: &str) -> i64 {
        self.get(key).and_then(Property::as_integer).unwrap_or_default()
    }

    pub fn get_real(&self, key: &str) -> f64 {
        self.get(key).and_then(Property::as_real).unwrap_or_default()
    }

    pub fn get_object<T: 'static>(&self, key: &str) -> Option<&T> {
        self.get(key).and_then(Property::as_handle).and_then(|handle| handle.downcast_ref::<T>())
    }

    pub fn get_object_mut<T: 'static>(&mut self, key: &str) -> Option<&mut T> {
        match self.entries.get_mut(key) {
            Some(Property::Handle(handle)) => handle.downcast_mut(),
            _ => None,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Removes `key` and hands its property back to the caller.
    pub fn remove(&mut self, key: &str) -> Option<Property> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn last_write_wins() {
        let mut list = PropertyList::new();
        list.set("user", "alice");
        assert_eq!(list.get_text("user"), "alice");

        list.set("user", "bob");
        assert_eq!(list.get_text("user"), "bob");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn typed_values() {
        let mut list = PropertyList::new();
        list.set("count", 42_i64);
        list.set("ratio", 0.5);
        list.set("name", String::from("micro"));

        assert_eq!(list.get_integer("count"), 42);
        assert!((list.get_real("ratio") - 0.5).abs() < f64::EPSILON);
        assert_eq!(list.get_text("name"), "micro");
    }

    #[test]
    fn absent_keys_yield_zero_values() {
        let list = PropertyList::new();
        assert_eq!(list.get_text("missing"), "");
        assert_eq!(list.get_integer("missing"), 0);
        assert!(list.get_real("missing").abs() < f64::EPSILON);
        assert!(list.get_object::<String>("missing").is_none());
        assert!(!list.has("missing"));
    }

    #[test]
    fn mismatched_variant_yields_zero_value() {
        let mut list = PropertyList::new();
        list.set("count", 7_i64);
        assert_eq!(list.get_text("count"), "");
        assert!(list.get_real("count").abs() < f64::EPSILON);
    }

    #[test]
    fn objects_are_downcast_by_type() {
        let mut list = PropertyList::new();
        list.set_object("session", vec![1u8, 2, 3]);

        assert_eq!(list.get_object::<Vec<u8>>("session"), Some(&vec![1, 2, 3]));
        assert!(list.get_object::<String>("session").is_none());

        list.get_object_mut::<Vec<u8>>("session").unwrap().push(4);
        assert_eq!(list.get_object::<Vec<u8>>("session").unwrap().len(), 4);
    }

    #[test]
    fn overwrite_releases_previous_handle_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut list = PropertyList::new();

        list.set_object("guard", DropCounter(Arc::clone(&drops)));
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        list.set("guard", 1_i64);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        drop(list);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn custom_destructor_runs_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);

        let mut list = PropertyList::new();
        list.set_object_with("buffer", String::from("payload"), move |value: String| {
            assert_eq!(value, "payload");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(list.get_object::<String>("buffer").map(String::as_str), Some("payload"));

        drop(list);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_hands_ownership_back() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut list = PropertyList::new();
        list.set_object("guard", DropCounter(Arc::clone(&drops)));

        let removed = list.remove("guard");
        assert!(removed.is_some());
        assert!(!list.has("guard"));
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(removed);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(list.remove("guard").is_none());
    }
}
