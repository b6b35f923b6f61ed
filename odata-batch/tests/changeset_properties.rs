// Changeset ordering properties: dependencies always precede dependents,
// and unsortable graphs are rejected.

use http::Method;
use odata_batch::{ChangesetSorter, MessageKey, ODataRequest};
use proptest::prelude::*;

fn request(path: &str, id: &str) -> ODataRequest {
    ODataRequest::new(Method::POST, path).with_content_id(id)
}

fn position(sorted: &[ODataRequest], id: &str) -> usize {
    sorted
        .iter()
        .position(|r| r.content_id() == Some(id))
        .unwrap_or(usize::MAX)
}

/// Random forest: every node optionally points at an earlier node.
fn forest() -> impl Strategy<Value = Vec<(usize, Option<usize>)>> {
    (1usize..16)
        .prop_flat_map(|n| {
            (0..n)
                .map(|i| {
                    if i == 0 {
                        Just(None).boxed()
                    } else {
                        proptest::option::of(0..i).boxed()
                    }
                })
                .collect::<Vec<_>>()
        })
        .prop_map(|parents| parents.into_iter().enumerate().collect::<Vec<_>>())
        .prop_shuffle()
}

fn to_requests(nodes: &[(usize, Option<usize>)]) -> Vec<ODataRequest> {
    nodes
        .iter()
        .map(|(id, parent)| match parent {
            Some(p) => request(&format!("/${}/Items", p), &id.to_string()),
            None => request("/Things", &id.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod scenario_tests {
    use super::*;

    #[test]
    fn test_customer_order_item_chain() {
        let requests = vec![
            request("/Orders/$2/Items", "3"),
            request("/Customers/$1", "2"),
            request("/Customers", "1"),
        ];
        let sorted = ChangesetSorter.sort(requests).unwrap();
        let ids: Vec<_> = sorted.iter().filter_map(ODataRequest::content_id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_diamond_siblings_follow_their_ancestor() {
        let requests = vec![
            request("/$root1/Left", "left"),
            request("/$root1/Right", "right"),
            request("/Things", "root1"),
        ];
        let sorted = ChangesetSorter.sort(requests).unwrap();
        let ids: Vec<_> = sorted.iter().filter_map(ODataRequest::content_id).collect();
        assert_eq!(ids, vec!["root1", "left", "right"]);
    }

    #[test]
    fn test_reserved_segments_are_roots() {
        let requests = vec![request("/$metadata", "1"), request("/$1/Items", "2")];
        let sorted = ChangesetSorter.sort(requests).unwrap();
        assert_eq!(sorted[0].content_id(), Some("1"));
    }
}

proptest! {
    #[test]
    fn prop_dependencies_precede_dependents(nodes in forest()) {
        let sorted = ChangesetSorter.sort(to_requests(&nodes)).unwrap();
        prop_assert_eq!(sorted.len(), nodes.len());
        for (id, parent) in &nodes {
            if let Some(parent) = parent {
                prop_assert!(
                    position(&sorted, &parent.to_string()) < position(&sorted, &id.to_string()),
                    "{} sorted before its dependency {}", id, parent
                );
            }
        }
    }

    #[test]
    fn prop_cycles_are_rejected(len in 1usize..10) {
        let requests: Vec<_> = (0..len)
            .map(|i| request(&format!("/${}", (i + 1) % len), &i.to_string()))
            .collect();
        let err = ChangesetSorter.sort(requests).unwrap_err();
        prop_assert_eq!(err.key, MessageKey::InvalidContentId);
    }

    #[test]
    fn prop_dangling_reference_rejected(nodes in forest(), target in "x[a-z]{3,8}") {
        let mut requests = to_requests(&nodes);
        requests.push(request(&format!("/${}/Items", target), "dangling"));
        let err = ChangesetSorter.sort(requests).unwrap_err();
        prop_assert_eq!(err.key, MessageKey::InvalidContentId);
    }
}
