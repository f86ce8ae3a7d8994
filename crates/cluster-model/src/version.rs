//! Version comparison between image tags and reported versions

/// Whether a version reported by the cluster satisfies an expected version
///
/// Image tags carry a distribution suffix (`v1.17.4-rancher1-3`) that the
/// kubelet does not report (`v1.17.4`), so the expected tag also matches when
/// it extends the reported version with a `-` suffix. A leading `v` is
/// ignored on both sides.
pub fn versions_match(expected: &str, reported: &str) -> bool {
    let expected = expected.trim().trim_start_matches('v');
    let reported = reported.trim().trim_start_matches('v');
    if reported.is_empty() {
        return false;
    }
    if expected == reported {
        return true;
    }
    expected
        .strip_prefix(reported)
        .is_some_and(|rest| rest.starts_with('-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(versions_match("v1.17.4-rancher1-3", "v1.17.4-rancher1-3"));
        assert!(versions_match("v1.17.4", "1.17.4"));
    }

    #[test]
    fn test_image_tag_matches_kubelet_version() {
        assert!(versions_match("v1.17.4-rancher1-3", "v1.17.4"));
    }

    #[test]
    fn test_mismatch() {
        assert!(!versions_match("v1.17.4-rancher1-3", "v1.16.8"));
        // v1.17.4 must not satisfy v1.17.40
        assert!(!versions_match("v1.17.40", "v1.17.4"));
        // a more specific report does not satisfy a shorter expectation
        assert!(!versions_match("v1.17.4", "v1.17.4-rancher1-3"));
        assert!(!versions_match("v1.17.4", ""));
    }
}
