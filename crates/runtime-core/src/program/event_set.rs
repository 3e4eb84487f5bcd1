use crate::program::EventId;

const WORD_BITS: usize = u64::BITS as usize;

/// Set of event declaration indices packed into machine words.
///
/// States carry one of these per handler family (defers, transition triggers,
/// do triggers) and receive points carry one for their case set, so membership
/// tests on the dispatch hot path are a shift and a mask.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventSet {
    words: Vec<u64>,
}

impl EventSet {
    /// Empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: Vec::new() }
    }

    /// Builds a set from event ids.
    #[must_use]
    pub fn from_events<I: IntoIterator<Item = EventId>>(events: I) -> Self {
        let mut set = Self::new();
        for event in events {
            set.insert(event);
        }
        set
    }

    /// Inserts an event id.
    pub fn insert(&mut self, event: EventId) {
        let index = event.index();
        let word = index / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % WORD_BITS);
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, event: EventId) -> bool {
        let index = event.index();
        self.words
            .get(index / WORD_BITS)
            .is_some_and(|word| word & (1 << (index % WORD_BITS)) != 0)
    }

    /// True when no event is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    /// Iterates the member event ids in ascending order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl Iterator<Item = EventId> + '_ {
        self.words.iter().enumerate().flat_map(|(word_index, word)| {
            (0..WORD_BITS)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| EventId::new((word_index * WORD_BITS + bit) as u32))
        })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::EventSet;
    use crate::program::EventId;

    #[test]
    fn empty_set_contains_nothing() {
        let set = EventSet::new();
        assert!(set.is_empty());
        assert!(!set.contains(EventId::new(0)));
        assert!(!set.contains(EventId::new(200)));
    }

    #[test]
    fn membership_across_word_boundaries() {
        let set = EventSet::from_events([EventId::new(0), EventId::new(63), EventId::new(64)]);
        assert!(set.contains(EventId::new(0)));
        assert!(set.contains(EventId::new(63)));
        assert!(set.contains(EventId::new(64)));
        assert!(!set.contains(EventId::new(1)));
        assert!(!set.contains(EventId::new(128)));
    }

    #[test]
    fn iter_yields_members_in_order() {
        let set = EventSet::from_events([EventId::new(65), EventId::new(3), EventId::new(3)]);
        let members: Vec<_> = set.iter().collect();
        assert_eq!(members, vec![EventId::new(3), EventId::new(65)]);
    }

    proptest! {
        #[test]
        fn inserted_ids_are_members(ids in prop::collection::vec(0u32..500, 0..40)) {
            let set = EventSet::from_events(ids.iter().copied().map(EventId::new));
            for id in &ids {
                prop_assert!(set.contains(EventId::new(*id)));
            }
            prop_assert_eq!(set.iter().count(), {
                let mut unique = ids.clone();
                unique.sort_unstable();
                unique.dedup();
                unique.len()
            });
        }
    }
}
