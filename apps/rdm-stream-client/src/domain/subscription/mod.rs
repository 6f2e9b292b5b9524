//! Subscription Planning
//!
//! Turns the flat list of requested items into the batch item requests sent
//! after login.
//!
//! # Design
//!
//! - Items are grouped by domain model in first-seen order, so the same
//!   input always yields the same requests.
//! - One request is sent per domain group; all of its items share the
//!   request's stream ID.
//! - Stream IDs reserve one slot per item: group `i` gets
//!   `base + (items in groups 0..i)`. The server answers a batch request on
//!   per-item streams following the request ID, which is why the slots are
//!   kept even though only one ID travels on the wire.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Types
// =============================================================================

/// A stream identifier chosen by the client.
pub type StreamId = i64;

/// One requested item, optionally tagged with a domain model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemSpec {
    /// Domain model name; `None` lets the server default apply.
    pub domain: Option<String>,
    /// Item name (RIC).
    pub name: String,
}

impl ItemSpec {
    /// Item with an explicit domain.
    #[must_use]
    pub fn new(domain: Option<String>, name: impl Into<String>) -> Self {
        Self {
            domain,
            name: name.into(),
        }
    }

    /// Item using the server default domain.
    #[must_use]
    pub fn untagged(name: impl Into<String>) -> Self {
        Self::new(None, name)
    }
}

/// Field view for a request: names or numeric field IDs, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ViewFields {
    /// Numeric field identifiers (FIDs).
    Ids(Vec<i32>),
    /// Field names.
    Names(Vec<String>),
}

impl ViewFields {
    /// Number of fields in the view.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Ids(ids) => ids.len(),
            Self::Names(names) => names.len(),
        }
    }

    /// True when the view names no field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A batch item request for one domain group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// Stream ID of the request.
    pub stream_id: StreamId,
    /// Domain model; `None` means the server default.
    pub domain: Option<String>,
    /// Item names, never empty.
    pub items: Vec<String>,
    /// Optional field view.
    pub view: Option<ViewFields>,
    /// `false` for snapshot requests.
    pub streaming: bool,
}

/// Errors raised while planning subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// No item was requested.
    #[error("subscription plan requires at least one item")]
    EmptyRequest,

    /// Stream IDs starting at the base would pass `StreamId::MAX`.
    #[error("stream ids from base {base} overflow")]
    StreamIdOverflow {
        /// Requested base stream ID.
        base: StreamId,
    },
}

// =============================================================================
// Subscription Planner
// =============================================================================

/// Builds the item requests for a session.
///
/// # Example
///
/// ```rust
/// use rdm_stream_client::domain::subscription::{ItemSpec, SubscriptionPlanner};
///
/// let items = vec![
///     ItemSpec::new(Some("MarketPrice".into()), "VOD.L"),
///     ItemSpec::new(Some("MarketByPrice".into()), "BT.L"),
///     ItemSpec::new(Some("MarketPrice".into()), "BP.L"),
/// ];
/// let planner = SubscriptionPlanner::new(items, None, true);
///
/// let requests = planner.plan(2).unwrap();
/// assert_eq!(requests.len(), 2);
/// assert_eq!(requests[0].stream_id, 2);
/// assert_eq!(requests[0].items, vec!["VOD.L", "BP.L"]);
/// assert_eq!(requests[1].stream_id, 4);
/// ```
#[derive(Debug, Clone)]
pub struct SubscriptionPlanner {
    items: Vec<ItemSpec>,
    view: Option<ViewFields>,
    streaming: bool,
}

impl SubscriptionPlanner {
    /// Create a planner.
    ///
    /// An empty view is treated as no view.
    #[must_use]
    pub fn new(items: Vec<ItemSpec>, view: Option<ViewFields>, streaming: bool) -> Self {
        Self {
            items,
            view: view.filter(|v| !v.is_empty()),
            streaming,
        }
    }

    /// Number of items the plan will request.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Requested items.
    #[must_use]
    pub fn items(&self) -> &[ItemSpec] {
        &self.items
    }

    /// Group items by domain and assign stream IDs starting at `base_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::EmptyRequest`] if no item was configured and
    /// [`PlanError::StreamIdOverflow`] if the ID block does not fit after
    /// `base_id`.
    pub fn plan(&self, base_id: StreamId) -> Result<Vec<SubscriptionRequest>, PlanError> {
        if self.items.is_empty() {
            return Err(PlanError::EmptyRequest);
        }

        let mut groups: Vec<(Option<&str>, Vec<String>)> = Vec::new();
        for item in &self.items {
            let domain = item.domain.as_deref();
            match groups.iter_mut().find(|(d, _)| *d == domain) {
                Some((_, names)) => names.push(item.name.clone()),
                None => groups.push((domain, vec![item.name.clone()])),
            }
        }

        let overflow = PlanError::StreamIdOverflow { base: base_id };
        let mut next_id = base_id;
        let mut requests = Vec::with_capacity(groups.len());
        for (domain, items) in groups {
            let stream_id = next_id;
            let slots = StreamId::try_from(items.len()).map_err(|_| overflow.clone())?;
            next_id = stream_id.checked_add(slots).ok_or_else(|| overflow.clone())?;
            requests.push(SubscriptionRequest {
                stream_id,
                domain: domain.map(str::to_string),
                items,
                view: self.view.clone(),
                streaming: self.streaming,
            });
        }

        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tagged(domain: &str, name: &str) -> ItemSpec {
        ItemSpec::new(Some(domain.to_string()), name)
    }

    #[test]
    fn empty_input_is_rejected() {
        let planner = SubscriptionPlanner::new(vec![], None, true);
        assert_eq!(planner.plan(2), Err(PlanError::EmptyRequest));
    }

    #[test]
    fn stream_id_overflow_is_an_error() {
        let planner = SubscriptionPlanner::new(
            vec![tagged("MarketPrice", "A"), tagged("MarketByPrice", "B")],
            None,
            true,
        );
        assert_eq!(
            planner.plan(StreamId::MAX),
            Err(PlanError::StreamIdOverflow {
                base: StreamId::MAX
            })
        );

        let requests = planner.plan(StreamId::MAX - 2).unwrap();
        assert_eq!(requests[1].stream_id, StreamId::MAX - 1);
    }

    #[test]
    fn single_untagged_group() {
        let planner = SubscriptionPlanner::new(
            vec![ItemSpec::untagged("VOD.L"), ItemSpec::untagged("BT.L")],
            None,
            true,
        );
        let requests = planner.plan(2).unwrap();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].stream_id, 2);
        assert_eq!(requests[0].domain, None);
        assert_eq!(requests[0].items, vec!["VOD.L", "BT.L"]);
        assert!(requests[0].streaming);
    }

    #[test]
    fn groups_follow_first_seen_order() {
        let planner = SubscriptionPlanner::new(
            vec![
                tagged("MarketByOrder", "A"),
                tagged("MarketPrice", "B"),
                tagged("MarketByOrder", "C"),
                ItemSpec::untagged("D"),
                tagged("MarketPrice", "E"),
            ],
            None,
            false,
        );
        let requests = planner.plan(10).unwrap();

        let domains: Vec<_> = requests.iter().map(|r| r.domain.as_deref()).collect();
        assert_eq!(
            domains,
            vec![Some("MarketByOrder"), Some("MarketPrice"), None]
        );
        assert_eq!(requests[0].items, vec!["A", "C"]);
        assert_eq!(requests[1].items, vec!["B", "E"]);
        assert_eq!(requests[2].items, vec!["D"]);

        let ids: Vec<_> = requests.iter().map(|r| r.stream_id).collect();
        assert_eq!(ids, vec![10, 12, 14]);
        assert!(requests.iter().all(|r| !r.streaming));
    }

    #[test]
    fn view_is_shared_and_empty_view_dropped() {
        let view = ViewFields::Ids(vec![22, 25]);
        let planner = SubscriptionPlanner::new(
            vec![tagged("MarketPrice", "A"), tagged("MarketByPrice", "B")],
            Some(view.clone()),
            true,
        );
        let requests = planner.plan(2).unwrap();
        assert!(requests.iter().all(|r| r.view.as_ref() == Some(&view)));

        let planner =
            SubscriptionPlanner::new(vec![tagged("MarketPrice", "A")], Some(ViewFields::Names(vec![])), true);
        assert_eq!(planner.plan(2).unwrap()[0].view, None);
    }

    fn item_strategy() -> impl Strategy<Value = ItemSpec> {
        (
            prop::option::of(prop::sample::select(vec![
                "MarketPrice",
                "MarketByOrder",
                "MarketByPrice",
                "MarketMaker",
            ])),
            "[A-Z]{1,4}\\.[A-Z]",
        )
            .prop_map(|(domain, name)| ItemSpec::new(domain.map(str::to_string), name))
    }

    proptest! {
        #[test]
        fn every_item_lands_in_exactly_one_group(
            items in prop::collection::vec(item_strategy(), 1..40),
            base in 2i64..1000,
        ) {
            let planner = SubscriptionPlanner::new(items.clone(), None, true);
            let requests = planner.plan(base).unwrap();

            let total: usize = requests.iter().map(|r| r.items.len()).sum();
            prop_assert_eq!(total, items.len());

            // Each input item is found in the group of its domain, in input order.
            for request in &requests {
                let expected: Vec<String> = items
                    .iter()
                    .filter(|i| i.domain == request.domain)
                    .map(|i| i.name.clone())
                    .collect();
                prop_assert_eq!(&request.items, &expected);
            }

            // Groups appear in first-seen domain order.
            let mut seen: Vec<Option<String>> = Vec::new();
            for item in &items {
                if !seen.contains(&item.domain) {
                    seen.push(item.domain.clone());
                }
            }
            let order: Vec<Option<String>> = requests.iter().map(|r| r.domain.clone()).collect();
            prop_assert_eq!(order, seen);
        }

        #[test]
        fn stream_ids_are_prefix_sums(
            items in prop::collection::vec(item_strategy(), 1..40),
            base in 2i64..1000,
        ) {
            let requests = SubscriptionPlanner::new(items, None, true).plan(base).unwrap();

            let mut expected = base;
            for request in &requests {
                prop_assert_eq!(request.stream_id, expected);
                expected += request.items.len() as i64;
            }
        }
    }
}
