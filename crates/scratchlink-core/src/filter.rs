//! Discovery filter evaluation
//!
//! An advertisement without a local name is never reported. A filter entry
//! matches when every criterion it sets holds: exact `name`, `namePrefix`, and
//! all listed `services`. Entries in a list are OR'd; an empty list accepts
//! every named advertisement.

use crate::types::{Advertisement, DiscoverFilter};

impl DiscoverFilter {
    /// Whether this single entry accepts the advertisement
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        let name = advertisement.local_name.as_str();

        if let Some(expected) = self.name.as_deref().filter(|n| !n.is_empty()) {
            if expected != name {
                return false;
            }
        }

        if let Some(prefix) = self.name_prefix.as_deref().filter(|p| !p.is_empty()) {
            if !name.starts_with(prefix) {
                return false;
            }
        }

        self.services
            .iter()
            .all(|service| advertisement.has_service(service))
    }
}

/// Evaluate a filter list against one advertisement
pub fn matches_any(filters: &[DiscoverFilter], advertisement: &Advertisement) -> bool {
    if advertisement.local_name.is_empty() {
        return false;
    }

    filters.is_empty() || filters.iter().any(|filter| filter.matches(advertisement))
}
