//! Per-route and per-request state handed to handlers.
//!
//! - [`Extensions`]: a type-keyed map of values attached to a route at
//!   registration time and passed to its handler on every call.
//! - [`PathParams`]: values captured by `:name` segments of the matched route.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

/// Type-erased map holding at most one value per type.
///
/// # Examples
///
/// ```
/// use spindle::context::Extensions;
///
/// struct Greeting(&'static str);
///
/// let params = Extensions::new().with(Greeting("hello")).with(3_u32);
/// assert_eq!(params.get::<Greeting>().map(|g| g.0), Some("hello"));
/// assert_eq!(params.get::<u32>(), Some(&3));
/// assert!(params.get::<String>().is_none());
/// ```
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with<T>(mut self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.insert(value);
        self
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Path parameters captured from the matched route pattern.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures `:name` segments of `pattern` against the matching segments of `path`.
    ///
    /// Both arguments are `/`-separated without leading slash. Pattern segments
    /// beyond the end of `path` capture nothing.
    ///
    /// ```
    /// use spindle::context::PathParams;
    ///
    /// let params = PathParams::capture("users/:id/posts/:post", "users/7/posts/12");
    /// assert_eq!(params.get("id"), Some("7"));
    /// assert_eq!(params.get("post"), Some("12"));
    /// ```
    pub fn capture(pattern: &str, path: &str) -> Self {
        let map = pattern
            .split('/')
            .zip(path.split('/'))
            .filter_map(|(segment, value)| {
                let name = segment.strip_prefix(':')?;
                Some((name.to_owned(), value.to_owned()))
            })
            .collect();
        Self { map }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.map.remove(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
