//! Helpers for use in serde field attributes.

/// True when a value equals the zero value of its type. Pair with
/// `#[serde(skip_serializing_if = "serde_helpers::is_default", default)]` to
/// omit a field entirely when it carries no information, the way the query
/// modifiers and index options in this crate do.
pub fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

#[cfg(test)]
mod test {
    use super::is_default;

    #[test]
    fn zero_values() {
        assert!(is_default(&0i32));
        assert!(is_default(&false));
        assert!(is_default(&String::new()));
        assert!(!is_default(&1i64));
        assert!(!is_default(&true));
    }
}
