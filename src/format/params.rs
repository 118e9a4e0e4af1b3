use std::fmt;

use indexmap::IndexMap;

/// An ordered `key=value` parameter list carried by [`Message`] records.
///
/// Yate answers must echo the parameters in their current order, so the
/// insertion order is preserved.
///
/// [`Message`]: super::Message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(IndexMap<String, String>);

impl Params {
    /// Create an empty parameter list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a parameter by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Set a parameter, keeping its position if the key already exists.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Remove a parameter by key.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.shift_remove(key)
    }

    /// Whether the list contains no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of parameters in the list.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the parameters in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a tail of already-decoded `key=value` fields.
    ///
    /// Only the first `=` separates the key from the value,
    /// a field without `=` yields an empty value.
    pub(super) fn parse<I>(fields: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self(
            fields
                .into_iter()
                .map(|field| match field.as_ref().split_once('=') {
                    Some((key, value)) => (key.to_owned(), value.to_owned()),
                    None => (field.as_ref().to_owned(), String::new()),
                })
                .collect(),
        )
    }

    /// The `key=value` wire fields, in order, still to be upcode-encoded.
    pub(super) fn fields(&self) -> impl Iterator<Item = String> + '_ {
        self.0.iter().map(|(k, v)| format!("{k}={v}"))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Params {
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (k, v)) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(":")?;
            }
            write!(f, "{k}={v}")?;
        }

        Ok(())
    }
}
