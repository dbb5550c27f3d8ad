//! Multi-valued string map used for headers, parameters and response defaults.

/// An ordered, multi-valued string map.
///
/// Keys keep their insertion order and each key maps to an ordered list of
/// values. Lookups exist in exact and ASCII case-insensitive flavors; header
/// maps are built with lower-cased keys and looked up case-insensitively,
/// parameter maps are exact-keyed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, Vec<String>)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a value under the given key, creating the key if absent.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Replaces all values of the given key with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, values)) => {
                values.clear();
                values.push(value);
            }
            None => self.entries.push((name, vec![value])),
        }
    }

    /// Replaces the key case-insensitively: every existing key that equals
    /// `name` ignoring ASCII case is removed first.
    pub fn set_ignore_case(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.entries.push((name, vec![value.into()]));
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_ignore_case(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn first_ignore_case(&self, name: &str) -> Option<&str> {
        self.get_ignore_case(name)
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Appends every entry of `other`, keeping existing values.
    pub fn extend(&mut self, other: &FieldMap) {
        for (name, values) in other.iter() {
            for value in values {
                self.append(name, value.clone());
            }
        }
    }

    /// Returns a copy with all keys lower-cased, merging entries whose keys
    /// collide after lower-casing.
    pub fn lowercased(&self) -> FieldMap {
        let mut out = FieldMap::new();
        for (name, values) in self.iter() {
            let lower = name.to_ascii_lowercase();
            for value in values {
                out.append(lower.clone(), value.clone());
            }
        }
        out
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.append(k, v);
        }
        map
    }
}
