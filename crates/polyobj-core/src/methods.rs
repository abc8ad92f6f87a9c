//! Method override chains.
//!
//! Two [`SlotMap`]s describe virtual dispatch on a handle:
//!
//! - `methods`: dispatcher → the method currently answering it (the head)
//! - `supermethods`: method → the method it overrode
//!
//! Following `supermethods` from a dispatcher's head walks its chain from the
//! most recent override down to the first implementation ever pushed.

use smallvec::SmallVec;

use crate::ids::{DispatcherId, MethodId};
use crate::slot_map::SlotMap;

pub(crate) type RemovedLinks = SmallVec<[MethodId; 4]>;

#[derive(Debug, Default)]
pub struct MethodChain {
    methods: SlotMap<DispatcherId, MethodId>,
    supermethods: SlotMap<MethodId, MethodId>,
}

impl MethodChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `method` the head for `dispatcher`, linking it to the previous
    /// head. Returns `false` if nothing changed.
    ///
    /// A method may override at most once; pushing the current head again or
    /// pushing a method already linked elsewhere is a programming error.
    pub fn push(&mut self, dispatcher: DispatcherId, method: MethodId) -> bool {
        let Some(prior) = self.methods.get(dispatcher) else {
            self.methods.insert(dispatcher, method);
            return true;
        };
        debug_assert_ne!(prior, method, "method pushed twice onto {dispatcher:?}");
        if prior == method {
            return false;
        }
        if self.supermethods.contains_key(method) {
            debug_assert!(false, "{method:?} already overrides another method");
        } else {
            self.supermethods.insert(method, prior);
        }
        self.methods.insert(dispatcher, method);
        true
    }

    pub fn resolve(&self, dispatcher: DispatcherId) -> Option<MethodId> {
        self.methods.get(dispatcher)
    }

    pub fn super_of(&self, method: MethodId) -> Option<MethodId> {
        self.supermethods.get(method)
    }

    /// Walks `dispatcher`'s chain from the head. Bounded by the number of
    /// links so a corrupted chain cannot loop forever.
    fn chain(&self, dispatcher: DispatcherId) -> impl Iterator<Item = MethodId> + '_ {
        let limit = self.supermethods.len() + 1;
        std::iter::successors(self.resolve(dispatcher), move |&m| self.super_of(m)).take(limit)
    }

    pub fn contains(&self, dispatcher: DispatcherId, method: MethodId) -> bool {
        self.chain(dispatcher).any(|m| m == method)
    }

    /// Removes `method` and every override above it from `dispatcher`'s
    /// chain, returning the removed methods head first. The dispatcher falls
    /// back to what `method` overrode, or is cleared if nothing remains.
    pub fn remove_span(&mut self, dispatcher: DispatcherId, method: MethodId) -> RemovedLinks {
        let mut removed = RemovedLinks::new();
        if !self.contains(dispatcher, method) {
            return removed;
        }
        let mut below = None;
        let mut link = self.resolve(dispatcher);
        while let Some(current) = link {
            removed.push(current);
            let next = self.supermethods.remove(current);
            if current == method {
                below = next;
                break;
            }
            link = next;
        }
        match below {
            Some(fallback) => self.methods.insert(dispatcher, fallback),
            None => {
                self.methods.remove(dispatcher);
            }
        }
        removed
    }

    /// Takes a single method out of `dispatcher`'s chain, splicing the link
    /// above it onto the method below. Used when the class that pushed the
    /// method goes away.
    pub fn unlink(&mut self, dispatcher: DispatcherId, method: MethodId) {
        let below = self.supermethods.get(method);
        if self.resolve(dispatcher) == Some(method) {
            self.supermethods.remove(method);
            match below {
                Some(fallback) => self.methods.insert(dispatcher, fallback),
                None => {
                    self.methods.remove(dispatcher);
                }
            }
            return;
        }
        let above = self.chain(dispatcher).find(|&m| self.super_of(m) == Some(method));
        let Some(above) = above else {
            return;
        };
        self.supermethods.remove(method);
        match below {
            Some(fallback) => self.supermethods.insert(above, fallback),
            None => {
                self.supermethods.remove(above);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.supermethods.is_empty()
    }

    pub fn clear(&mut self) {
        self.methods.clear();
        self.supermethods.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(raw: usize) -> DispatcherId {
        DispatcherId::from_raw(raw).unwrap()
    }

    fn m(raw: usize) -> MethodId {
        MethodId::from_raw(raw).unwrap()
    }

    fn chain_of(chain: &MethodChain, dispatcher: DispatcherId) -> Vec<usize> {
        chain.chain(dispatcher).map(MethodId::as_raw).collect()
    }

    #[test]
    fn first_push_has_no_super() {
        let mut chain = MethodChain::new();
        assert!(chain.push(d(1), m(100)));
        assert_eq!(chain.resolve(d(1)), Some(m(100)));
        assert_eq!(chain.super_of(m(100)), None);
    }

    #[test]
    fn override_links_to_previous_head() {
        let mut chain = MethodChain::new();
        chain.push(d(1), m(100));
        chain.push(d(1), m(200));
        assert_eq!(chain.resolve(d(1)), Some(m(200)));
        assert_eq!(chain.super_of(m(200)), Some(m(100)));
        assert_eq!(chain.super_of(m(100)), None);
    }

    #[test]
    fn dispatchers_are_independent() {
        let mut chain = MethodChain::new();
        chain.push(d(1), m(100));
        chain.push(d(2), m(300));
        assert_eq!(chain.resolve(d(1)), Some(m(100)));
        assert_eq!(chain.resolve(d(2)), Some(m(300)));
        assert_eq!(chain.resolve(d(3)), None);
    }

    #[test]
    fn remove_span_falls_back_below() {
        let mut chain = MethodChain::new();
        chain.push(d(1), m(100));
        chain.push(d(1), m(200));
        chain.push(d(1), m(300));

        let removed = chain.remove_span(d(1), m(200));
        assert_eq!(removed.as_slice(), &[m(300), m(200)]);
        assert_eq!(chain.resolve(d(1)), Some(m(100)));
        assert_eq!(chain.super_of(m(300)), None);
        assert_eq!(chain.super_of(m(200)), None);
    }

    #[test]
    fn remove_span_of_base_clears_dispatcher() {
        let mut chain = MethodChain::new();
        chain.push(d(1), m(100));
        chain.push(d(1), m(200));

        chain.remove_span(d(1), m(100));
        assert_eq!(chain.resolve(d(1)), None);
        assert!(chain.is_empty());
    }

    #[test]
    fn remove_span_of_unknown_method_is_noop() {
        let mut chain = MethodChain::new();
        chain.push(d(1), m(100));
        assert!(chain.remove_span(d(1), m(999)).is_empty());
        assert!(chain.remove_span(d(2), m(100)).is_empty());
        assert_eq!(chain.resolve(d(1)), Some(m(100)));
    }

    #[test]
    fn unlink_head_restores_previous() {
        let mut chain = MethodChain::new();
        chain.push(d(1), m(100));
        chain.push(d(1), m(200));
        chain.unlink(d(1), m(200));
        assert_eq!(chain.resolve(d(1)), Some(m(100)));
        assert_eq!(chain.super_of(m(200)), None);
    }

    #[test]
    fn unlink_middle_splices_chain() {
        let mut chain = MethodChain::new();
        chain.push(d(1), m(100));
        chain.push(d(1), m(200));
        chain.push(d(1), m(300));

        chain.unlink(d(1), m(200));
        assert_eq!(chain_of(&chain, d(1)), vec![300, 100]);

        chain.unlink(d(1), m(100));
        assert_eq!(chain_of(&chain, d(1)), vec![300]);
        assert_eq!(chain.super_of(m(300)), None);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "pushed twice")]
    fn pushing_current_head_again_asserts() {
        let mut chain = MethodChain::new();
        chain.push(d(1), m(100));
        chain.push(d(1), m(100));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "already overrides")]
    fn method_overriding_twice_asserts() {
        let mut chain = MethodChain::new();
        chain.push(d(1), m(50));
        chain.push(d(1), m(100));
        chain.push(d(2), m(300));
        chain.push(d(2), m(100));
    }

    #[test]
    fn method_can_be_pushed_again_after_removal() {
        let mut chain = MethodChain::new();
        chain.push(d(1), m(100));
        chain.push(d(1), m(200));
        chain.remove_span(d(1), m(200));
        assert!(chain.push(d(1), m(200)));
        assert_eq!(chain.super_of(m(200)), Some(m(100)));
    }
}
