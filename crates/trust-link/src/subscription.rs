//! Subscription set.

#![allow(missing_docs)]

use indexmap::IndexSet;
use smol_str::SmolStr;

use crate::protocol::OutboundMessage;

/// Variables the caller currently watches, replaced wholesale on each call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    namespace: SmolStr,
    names: IndexSet<SmolStr>,
    declared: bool,
}

impl SubscriptionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set. Duplicate names collapse, order is kept.
    ///
    /// Returns `true` if the set differs from the previous one.
    pub fn replace<I, S>(&mut self, names: I, namespace: impl Into<SmolStr>) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        let names = names
            .into_iter()
            .map(Into::into)
            .filter(|name: &SmolStr| !name.trim().is_empty())
            .collect::<IndexSet<_>>();
        let namespace = namespace.into();
        let changed = !self.declared
            || self.namespace != namespace
            || !self.names.iter().eq(names.iter());
        self.namespace = namespace;
        self.names = names;
        self.declared = true;
        changed
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace.as_str()
    }

    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.names.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// True once `replace` was called at least once.
    #[must_use]
    pub fn is_declared(&self) -> bool {
        self.declared
    }

    /// Full subscribe message for the current set; `None` before the first
    /// declaration. An empty declared set still produces a message so the
    /// controller drops its old subscription.
    #[must_use]
    pub fn message(&self) -> Option<OutboundMessage> {
        self.declared.then(|| OutboundMessage::Subscribe {
            variables: self.names.iter().cloned().collect(),
            path: self.namespace.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_to_send_before_first_declaration() {
        let set = SubscriptionSet::new();
        assert!(!set.is_declared());
        assert!(set.message().is_none());
    }

    #[test]
    fn replace_is_wholesale_and_deduplicated() {
        let mut set = SubscriptionSet::new();
        assert!(set.replace(["Counter", "Speed", "Counter", " "], "main-st"));
        assert_eq!(set.len(), 2);
        assert!(!set.replace(["Counter", "Speed"], "main-st"));
        assert!(set.replace(["Level"], "tank-st"));
        assert_eq!(
            set.message(),
            Some(OutboundMessage::Subscribe {
                variables: vec!["Level".into()],
                path: "tank-st".into(),
            })
        );
    }

    #[test]
    fn empty_declaration_still_produces_message() {
        let mut set = SubscriptionSet::new();
        set.replace(Vec::<SmolStr>::new(), "main-st");
        assert!(set.is_empty());
        assert_eq!(
            set.message(),
            Some(OutboundMessage::Subscribe {
                variables: Vec::new(),
                path: "main-st".into(),
            })
        );
    }
}
