/// Content hash of a raw payload (hex blake3)
pub fn content_hash(payload: &str) -> String {
    blake3::hash(payload.as_bytes()).to_hex().to_string()
}

/// Fingerprint over a module's own content hash and the current fingerprints of
/// its dependencies. Dependencies must be supplied in a stable (sorted) order;
/// `None` marks a dependency with no cached state yet.
pub fn fingerprint<'a, I>(content_hash: &str, dependencies: I) -> String
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"self:");
    hasher.update(content_hash.as_bytes());
    for (id, dep_fingerprint) in dependencies {
        hasher.update(b"\0dep:");
        hasher.update(id.as_bytes());
        hasher.update(b"=");
        hasher.update(dep_fingerprint.unwrap_or("missing").as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }

    #[test]
    fn test_fingerprint_depends_on_dependencies() {
        let base = fingerprint("h", Vec::new());
        let with_dep = fingerprint("h", vec![("a", Some("fa"))]);
        let missing_dep = fingerprint("h", vec![("a", None)]);
        let changed_dep = fingerprint("h", vec![("a", Some("fb"))]);

        assert_ne!(base, with_dep);
        assert_ne!(with_dep, missing_dep);
        assert_ne!(with_dep, changed_dep);
        assert_eq!(with_dep, fingerprint("h", vec![("a", Some("fa"))]));
    }
}
