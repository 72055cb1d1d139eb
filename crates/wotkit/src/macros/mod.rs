// Generates an insertion-ordered collection wrapping an `IndexMap` whose
// keys are `String`s.
macro_rules! map {
    (
        $(#[$attr:meta])*
        pub struct $name:ident(IndexMap<String, $value:ty, DefaultHashBuilder>);
    ) => {
        $(#[$attr])*
        pub struct $name(IndexMap<String, $value, DefaultHashBuilder>);

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl IntoIterator for $name {
            type Item = (String, $value);
            type IntoIter = indexmap::map::IntoIter<String, $value>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.into_iter()
            }
        }

        impl<'a> IntoIterator for &'a $name {
            type Item = (&'a String, &'a $value);
            type IntoIter = indexmap::map::Iter<'a, String, $value>;

            fn into_iter(self) -> Self::IntoIter {
                self.0.iter()
            }
        }

        impl $name {
            #[doc = concat!("Creates an empty [`", stringify!($name), "`].")]
            #[must_use]
            #[inline]
            pub fn new() -> Self {
                Self(IndexMap::with_hasher(DefaultHashBuilder::default()))
            }

            #[doc = concat!("Inserts an element into [`", stringify!($name), "`].")]
            ///
            /// An element with the same name is replaced, keeping its position.
            #[must_use]
            #[inline]
            pub fn insert(mut self, name: impl Into<String>, value: $value) -> Self {
                self.0.insert(name.into(), value);
                self
            }

            #[doc = concat!("Adds an element to [`", stringify!($name), "`].")]
            #[inline]
            pub fn add(&mut self, name: impl Into<String>, value: $value) {
                self.0.insert(name.into(), value);
            }

            /// Retrieves an element by name.
            #[must_use]
            #[inline]
            pub fn get(&self, name: &str) -> Option<&$value> {
                self.0.get(name)
            }

            /// Retrieves a mutable element by name.
            #[must_use]
            #[inline]
            pub fn get_mut(&mut self, name: &str) -> Option<&mut $value> {
                self.0.get_mut(name)
            }

            /// Checks whether an element with the given name exists.
            #[must_use]
            #[inline]
            pub fn contains(&self, name: &str) -> bool {
                self.0.contains_key(name)
            }

            #[doc = concat!("Checks whether [`", stringify!($name), "`] is empty.")]
            #[must_use]
            #[inline]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Returns the number of elements.
            #[must_use]
            #[inline]
            pub fn len(&self) -> usize {
                self.0.len()
            }

            /// Iterates over all names.
            ///
            /// **Iterates over the elements in the order they were inserted.**
            #[inline]
            pub fn names(&self) -> indexmap::map::Keys<'_, String, $value> {
                self.0.keys()
            }

            /// Returns an iterator over all elements.
            ///
            /// **Iterates over the elements in the order they were inserted.**
            #[inline]
            pub fn iter(&self) -> indexmap::map::Iter<'_, String, $value> {
                self.0.iter()
            }
        }
    };
}

pub(crate) use map;
