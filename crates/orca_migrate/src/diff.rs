use std::collections::BTreeSet;

use crate::dto::ImageIdentity;

/// Images present in `source` but absent from `destination`.
///
/// Identities are compared on all four fields, so a tag that points to another
/// digest on the destination still counts as missing. The result is ordered,
/// which keeps difference files stable between runs.
pub fn diff(source: &BTreeSet<ImageIdentity>, destination: &BTreeSet<ImageIdentity>) -> BTreeSet<ImageIdentity> {
    source.difference(destination)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[(&str, &str, &str, &str)]) -> BTreeSet<ImageIdentity> {
        ids.iter()
            .map(|(r, p, t, d)| ImageIdentity::new(*r, *p, *t, *d))
            .collect()
    }

    #[test]
    fn subtracts_destination_from_source() {
        let source = set(&[("R", "a", "v1", "d1"), ("R", "a", "v2", "d2")]);
        let destination = set(&[("R", "a", "v1", "d1")]);

        assert_eq!(diff(&source, &destination), set(&[("R", "a", "v2", "d2")]));
    }

    #[test]
    fn set_identities() {
        let a = set(&[("R", "a", "v1", "d1"), ("S", "b", "latest", "d9")]);
        let empty = BTreeSet::new();

        assert!(diff(&a, &a).is_empty());
        assert_eq!(diff(&a, &empty), a);
        assert!(diff(&empty, &a).is_empty());
    }

    #[test]
    fn retargeted_tag_is_missing() {
        let source = set(&[("R", "a", "latest", "sha256:new")]);
        let destination = set(&[("R", "a", "latest", "sha256:old")]);

        assert_eq!(diff(&source, &destination), source);
    }

    #[test]
    fn destination_extras_are_ignored() {
        let source = set(&[("R", "a", "v1", "d1")]);
        let destination = set(&[("R", "a", "v1", "d1"), ("R", "z", "v0", "d0")]);

        assert!(diff(&source, &destination).is_empty());
    }
}
