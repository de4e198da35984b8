//! Capability matching for transport-layer policy checks.
//!
//! A pure function over flat capability strings; callers evaluate it before
//! invoking the orchestrator. This is not a policy engine.

/// Grants every capability.
pub const WILDCARD: &str = "*:*";

/// True when the granted set satisfies any of the required capabilities, or
/// when nothing is required.
pub fn has_capability(granted: &[String], required: &[String]) -> bool {
    if required.is_empty() {
        return true;
    }
    required
        .iter()
        .any(|req| granted.iter().any(|cap| cap == req || cap == WILDCARD))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn matches_exact_capability() {
        assert!(has_capability(
            &caps(&["users:read", "users:write"]),
            &caps(&["users:write"]),
        ));
        assert!(!has_capability(
            &caps(&["users:read"]),
            &caps(&["users:write"]),
        ));
    }

    #[test]
    fn any_required_capability_suffices() {
        assert!(has_capability(
            &caps(&["reports:read"]),
            &caps(&["users:write", "reports:read"]),
        ));
    }

    #[test]
    fn wildcard_grants_everything() {
        assert!(has_capability(&caps(&[WILDCARD]), &caps(&["anything:at_all"])));
    }

    #[test]
    fn empty_requirement_always_passes() {
        assert!(has_capability(&[], &[]));
        assert!(has_capability(&caps(&["users:read"]), &[]));
    }

    #[test]
    fn empty_grant_fails_nonempty_requirement() {
        assert!(!has_capability(&[], &caps(&["users:read"])));
    }
}
