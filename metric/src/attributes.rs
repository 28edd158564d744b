use std::{borrow::Cow, collections::BTreeMap};

/// Dimensions attached to a single metric recording, e.g. `kind=secret`.
///
/// Stored as a sorted map so two [`Attributes`] built from the same key/value pairs in a
/// different order compare and hash equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attributes(BTreeMap<Cow<'static, str>, Cow<'static, str>>);

impl Attributes {
    /// An empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite one dimension.
    pub fn insert(
        &mut self,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
    ) {
        self.0.insert(key.into(), value.into());
    }
}

impl<'a, const N: usize> From<[(&'a str, &'a str); N]> for Attributes {
    fn from(pairs: [(&'a str, &'a str); N]) -> Self {
        let mut attrs = Self::new();
        for (k, v) in pairs {
            attrs.insert(k.to_string(), v.to_string());
        }
        attrs
    }
}

impl From<()> for Attributes {
    fn from(_: ()) -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_independent_equality() {
        let a: Attributes = [("kind", "secret"), ("encrypted", "true")].into();
        let mut b = Attributes::new();
        b.insert("encrypted", "true");
        b.insert("kind", "secret");
        assert_eq!(a, b);
    }
}
