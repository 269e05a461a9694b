//! Filters deciding from an object's namespace and name alone whether a
//! reconcile request concerns this controller instance

use std::fmt;
use std::sync::Arc;

use gantry_common::NamespacedName;

/// Outcome of a namespaced-name filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// The object is relevant
    Accept,
    /// The object is ignored, with the reason logged by the reconciler
    Reject(String),
}

impl FilterDecision {
    /// True for [`FilterDecision::Accept`]
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterDecision::Accept)
    }
}

/// Pure predicate over object identity.
///
/// Filters are wired as `Arc<dyn NamespacedNameFilter>` and compared by
/// identity (`Arc::ptr_eq`) when verifying what a reconciler was built with.
pub trait NamespacedNameFilter: Send + Sync + fmt::Debug {
    /// Decide whether `nsname` is relevant
    fn filter(&self, nsname: &NamespacedName) -> FilterDecision;

    /// Boolean form of [`NamespacedNameFilter::filter`]
    fn accepts(&self, nsname: &NamespacedName) -> bool {
        self.filter(nsname).is_accept()
    }
}

/// Filter used when none is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl NamespacedNameFilter for AcceptAll {
    fn filter(&self, _nsname: &NamespacedName) -> FilterDecision {
        FilterDecision::Accept
    }
}

/// Accept-all filter as a shareable handle
pub fn accept_all() -> Arc<dyn NamespacedNameFilter> {
    Arc::new(AcceptAll)
}

/// Accepts only the GatewayClass this controller is configured for
#[derive(Debug, Clone)]
pub struct GatewayClassFilter {
    gateway_class_name: String,
}

impl NamespacedNameFilter for GatewayClassFilter {
    fn filter(&self, nsname: &NamespacedName) -> FilterDecision {
        if nsname.name == self.gateway_class_name {
            FilterDecision::Accept
        } else {
            FilterDecision::Reject(format!(
                "GatewayClass is ignored because this controller only supports the GatewayClass {}",
                self.gateway_class_name
            ))
        }
    }
}

/// Filter for the GatewayClass named `gateway_class_name`
pub fn create_filter_for_gateway_class(
    gateway_class_name: impl Into<String>,
) -> Arc<dyn NamespacedNameFilter> {
    Arc::new(GatewayClassFilter {
        gateway_class_name: gateway_class_name.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_all_accepts_everything() {
        let filter = accept_all();
        for nsname in [
            NamespacedName::new("default", "web"),
            NamespacedName::cluster("nginx"),
            NamespacedName::default(),
        ] {
            assert!(filter.accepts(&nsname), "rejected {}", nsname);
        }
    }

    #[test]
    fn gateway_class_filter_matches_name_only() {
        let filter = create_filter_for_gateway_class("nginx");
        assert_eq!(
            filter.filter(&NamespacedName::cluster("nginx")),
            FilterDecision::Accept
        );
        // GatewayClass is cluster-scoped; a namespace doesn't change the outcome
        assert!(filter.accepts(&NamespacedName::new("ignored", "nginx")));
    }

    #[test]
    fn gateway_class_filter_explains_rejection() {
        let filter = create_filter_for_gateway_class("nginx");
        match filter.filter(&NamespacedName::cluster("istio")) {
            FilterDecision::Reject(reason) => {
                assert_eq!(
                    reason,
                    "GatewayClass is ignored because this controller only supports the GatewayClass nginx"
                );
            }
            FilterDecision::Accept => panic!("expected rejection"),
        }
    }

    #[test]
    fn filters_are_distinguishable_by_identity() {
        let a = create_filter_for_gateway_class("nginx");
        let b = create_filter_for_gateway_class("nginx");
        assert!(Arc::ptr_eq(&a, &a.clone()));
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
