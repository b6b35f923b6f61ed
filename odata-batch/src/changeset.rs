// Dependency ordering and Content-ID substitution inside a changeset.

use crate::error::{BatchError, BatchResult, MessageKey};
use crate::request::ODataRequest;
use std::collections::HashSet;
use tracing::debug;

/// `$`-prefixed segments that are system resources, not Content-ID
/// references.
const RESERVED_SEGMENTS: [&str; 12] = [
    "count", "value", "ref", "entity", "all", "crossjoin", "batch", "metadata", "each", "root", "it", "query",
];

/// Content-ID a request path refers to: its first `$<id>` segment that is
/// not a system resource.
pub fn reference_of(path: &str) -> Option<&str> {
    path.split('/')
        .filter_map(|segment| segment.strip_prefix('$'))
        .find(|token| !token.is_empty() && !RESERVED_SEGMENTS.contains(token))
}

/// Level-order topological sort of changeset members.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChangesetSorter;

impl ChangesetSorter {
    pub fn sort(&self, requests: Vec<ODataRequest>) -> BatchResult<Vec<ODataRequest>> {
        let mut ids = HashSet::new();
        for request in &requests {
            if let Some(id) = request.content_id() {
                if !ids.insert(id) {
                    return Err(BatchError::new(
                        MessageKey::DuplicateContentId,
                        format!("Content-ID '{}' is used more than once in a changeset", id),
                    ));
                }
            }
        }

        let (mut sorted, mut pending): (Vec<_>, Vec<_>) =
            requests.into_iter().partition(|r| reference_of(&r.path).is_none());
        debug!(roots = sorted.len(), pending = pending.len(), "changeset roots");

        let mut level = 0;
        while !pending.is_empty() {
            let known: HashSet<String> = sorted.iter().filter_map(|r| r.content_id.clone()).collect();
            let (ready, waiting): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|r| reference_of(&r.path).is_some_and(|id| known.contains(id)));
            if ready.is_empty() {
                let unresolved: Vec<&str> = waiting.iter().filter_map(|r| reference_of(&r.path)).collect();
                return Err(BatchError::invalid_content_id(format!(
                    "Unresolvable Content-ID references: ${}",
                    unresolved.join(", $")
                )));
            }
            level += 1;
            debug!(level, emitted = ready.len(), waiting = waiting.len(), "changeset level");
            sorted.extend(ready);
            pending = waiting;
        }
        Ok(sorted)
    }
}

/// Replace every `$<content_id>` segment with `resource_path`. Only whole
/// segments match, so `$1` leaves `$10` alone.
pub fn substitute_content_id(request: &mut ODataRequest, content_id: &str, resource_path: &str) -> bool {
    let target = format!("${}", content_id);
    let resource = resource_path.trim_matches('/');
    let mut replaced = false;
    let segments: Vec<&str> = request
        .path
        .split('/')
        .map(|segment| {
            if segment == target {
                replaced = true;
                resource
            } else {
                segment
            }
        })
        .collect();
    if replaced {
        request.path = segments.join("/");
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn request(path: &str, id: &str) -> ODataRequest {
        ODataRequest::new(Method::POST, path).with_content_id(id)
    }

    fn ids(requests: &[ODataRequest]) -> Vec<&str> {
        requests.iter().filter_map(ODataRequest::content_id).collect()
    }

    #[test]
    fn test_reference_extraction() {
        assert_eq!(reference_of("/$1"), Some("1"));
        assert_eq!(reference_of("/$new/Orders"), Some("new"));
        assert_eq!(reference_of("/Customers"), None);
        assert_eq!(reference_of("/$metadata"), None);
        assert_eq!(reference_of("/$batch"), None);
        assert_eq!(reference_of("/$"), None);
        assert_eq!(reference_of("/Customers/$1"), Some("1"));
        assert_eq!(reference_of("/Customers(1)/$ref"), None);
    }

    #[test]
    fn test_roots_keep_original_order() {
        let sorted = ChangesetSorter
            .sort(vec![request("/$a", "b"), request("/People", "a"), request("/Orders", "c")])
            .unwrap();
        assert_eq!(ids(&sorted), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_chain_sorts_through_levels() {
        let sorted = ChangesetSorter
            .sort(vec![
                request("/$2/Items", "3"),
                request("/$1/Orders", "2"),
                request("/Customers", "1"),
            ])
            .unwrap();
        assert_eq!(ids(&sorted), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_duplicate_content_id_rejected() {
        let err = ChangesetSorter
            .sort(vec![request("/People", "1"), request("/Orders", "1")])
            .unwrap_err();
        assert_eq!(err.key, MessageKey::DuplicateContentId);
    }

    #[test]
    fn test_cycle_and_dangling_fail() {
        let err = ChangesetSorter
            .sort(vec![request("/$2", "1"), request("/$1", "2")])
            .unwrap_err();
        assert_eq!(err.key, MessageKey::InvalidContentId);

        let err = ChangesetSorter.sort(vec![request("/$9", "1")]).unwrap_err();
        assert_eq!(err.key, MessageKey::InvalidContentId);
        assert!(err.message.contains("$9"));
    }

    #[test]
    fn test_substitution_is_segment_aware() {
        let mut exact = request("/$1/Orders", "2");
        assert!(substitute_content_id(&mut exact, "1", "Customers(7)"));
        assert_eq!(exact.path, "/Customers(7)/Orders");

        let mut longer = request("/$10", "3");
        assert!(!substitute_content_id(&mut longer, "1", "/Customers(7)"));
        assert_eq!(longer.path, "/$10");

        let mut nested = request("/Orders/$1/Items", "5");
        assert!(substitute_content_id(&mut nested, "1", "/Customers(7)"));
        assert_eq!(nested.path, "/Orders/Customers(7)/Items");

        let mut bare = request("/$1", "4");
        assert!(substitute_content_id(&mut bare, "1", "/Customers(7)/"));
        assert_eq!(bare.path, "/Customers(7)");
    }
}
