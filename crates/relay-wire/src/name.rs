/// A parsed `namespace.local` full name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullName {
    pub namespace: String,
    pub local: String,
}

impl FullName {
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}.{}", self.namespace, self.local).into_bytes()
    }
}

impl std::fmt::Display for FullName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.namespace, self.local)
    }
}

/// Split a full name on its rightmost dot: `(namespace, local)`. A name
/// with no dot yields `(default_ns, name)`.
pub fn split_name(bytes: &[u8], default_ns: &str) -> FullName {
    let s = String::from_utf8_lossy(bytes);
    match s.rfind('.') {
        Some(idx) => FullName::new(&s[..idx], &s[idx + 1..]),
        None => FullName::new(default_ns, s.as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_dot_uses_default_namespace() {
        let full = split_name(b"alice", "n1");
        assert_eq!(full, FullName::new("n1", "alice"));
    }

    #[test]
    fn single_dot_splits_cleanly() {
        let full = split_name(b"n1.alice", "n2");
        assert_eq!(full, FullName::new("n1", "alice"));
    }

    #[test]
    fn rightmost_dot_is_the_separator() {
        // Unlike a naive two-pop split, the namespace keeps every segment
        // left of the last dot.
        let full = split_name(b"a.b.c", "n1");
        assert_eq!(full, FullName::new("a.b", "c"));
    }

    #[test]
    fn display_round_trips_through_split() {
        let full = FullName::new("n1", "alice");
        let rendered = full.to_string();
        let reparsed = split_name(rendered.as_bytes(), "ignored");
        assert_eq!(full, reparsed);
    }
}
