//! Update decision: should the candidate image be installed?

use crate::version::VersionDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Skip,
}

/// `Proceed` iff the version strings differ.
///
/// This is not an ordering check: a candidate whose version sorts "lower"
/// than the running one is still installed, so serving an older image
/// downgrades the fleet.
pub fn decide(current: &VersionDescriptor, candidate: &VersionDescriptor) -> Decision {
    if candidate.version() == current.version() {
        Decision::Skip
    } else {
        Decision::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::BuildInfo;
    use proptest::prelude::*;

    fn v(s: &str) -> VersionDescriptor {
        VersionDescriptor::new(s)
    }

    #[test]
    fn test_same_version_skips() {
        assert_eq!(decide(&v("1.0.0"), &v("1.0.0")), Decision::Skip);
    }

    #[test]
    fn test_different_version_proceeds() {
        assert_eq!(decide(&v("1.0.0"), &v("1.1.0")), Decision::Proceed);
    }

    // Present behaviour: an older candidate still counts as an update
    #[test]
    fn test_lower_version_is_still_applied() {
        assert_eq!(decide(&v("2.0.0"), &v("1.9.9")), Decision::Proceed);
        assert_eq!(decide(&v("1.0.0"), &v("0.0.1")), Decision::Proceed);
    }

    #[test]
    fn test_comparison_is_exact() {
        assert_eq!(decide(&v("1.0.0"), &v("v1.0.0")), Decision::Proceed);
        assert_eq!(decide(&v("1.0.0"), &v("1.0.0 ")), Decision::Proceed);
        assert_eq!(decide(&v("1.0"), &v("1.0.0")), Decision::Proceed);
    }

    #[test]
    fn test_build_metadata_is_ignored() {
        let mut build = BuildInfo::default();
        build.secure_version = 7;
        let candidate = VersionDescriptor::with_build("1.0.0", build);
        assert_eq!(decide(&v("1.0.0"), &candidate), Decision::Skip);
    }

    #[test]
    fn test_long_versions_with_shared_prefix_proceed() {
        let prefix = "1.0.0-build.".repeat(3);
        let current = v(&format!("{prefix}aaaa"));
        let candidate = v(&format!("{prefix}bbbb"));
        assert_eq!(decide(&current, &candidate), Decision::Proceed);
        assert_eq!(decide(&current, &current.clone()), Decision::Skip);
    }

    proptest! {
        #[test]
        fn prop_equal_versions_skip(s in "[ -~]{0,64}") {
            prop_assert_eq!(decide(&v(&s), &v(&s)), Decision::Skip);
        }

        #[test]
        fn prop_distinct_versions_proceed(a in "[ -~]{0,64}", b in "[ -~]{0,64}") {
            prop_assume!(a != b);
            prop_assert_eq!(decide(&v(&a), &v(&b)), Decision::Proceed);
        }

        #[test]
        fn prop_distinct_suffix_past_field_width_proceeds(
            prefix in "[ -~]{32,48}",
            a in "[a-z]{1,8}",
            b in "[a-z]{1,8}",
        ) {
            prop_assume!(a != b);
            let current = v(&format!("{prefix}{a}"));
            let candidate = v(&format!("{prefix}{b}"));
            prop_assert_eq!(decide(&current, &candidate), Decision::Proceed);
        }
    }
}
