//! Ordered phases of a resumable procedure.

use std::collections::BTreeMap;
use std::fmt;

/// A phase of a resumable procedure.
///
/// `SEQUENCE` lists every phase in execution order; its first entry is the
/// initial phase.
pub trait Phase: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// All phases, in order.
    const SEQUENCE: &'static [Self];

    /// Name persisted in the registry.
    fn name(self) -> &'static str;
}

/// Integer rank of every phase, built once per procedure.
#[derive(Debug, Clone)]
pub struct PhaseRanks<P: Phase> {
    by_name: BTreeMap<&'static str, (usize, P)>,
    initial: P,
}

impl<P: Phase> PhaseRanks<P> {
    /// Builds the table from `P::SEQUENCE`.
    ///
    /// Returns `None` if the sequence is empty or two phases share a name.
    #[must_use]
    pub fn build() -> Option<Self> {
        let initial = *P::SEQUENCE.first()?;
        let mut by_name = BTreeMap::new();
        for (rank, phase) in P::SEQUENCE.iter().enumerate() {
            if by_name.insert(phase.name(), (rank, *phase)).is_some() {
                return None;
            }
        }
        Some(Self { by_name, initial })
    }

    /// The initial phase.
    #[must_use]
    pub const fn initial(&self) -> P {
        self.initial
    }

    /// Rank of `phase`.
    #[must_use]
    pub fn rank(&self, phase: P) -> usize {
        self.by_name.get(phase.name()).map_or(0, |(rank, _)| *rank)
    }

    /// Phase called `name`, if any.
    #[must_use]
    pub fn parse(&self, name: &str) -> Option<P> {
        self.by_name.get(name).map(|(_, phase)| *phase)
    }

    /// Returns true if `current` is at or past `target`.
    #[must_use]
    pub fn reached(&self, current: P, target: P) -> bool {
        self.rank(current) >= self.rank(target)
    }

    /// Number of phases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Always false for a built table.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Drill {
        Start,
        Middle,
        End,
    }

    impl Phase for Drill {
        const SEQUENCE: &'static [Self] = &[Self::Start, Self::Middle, Self::End];

        fn name(self) -> &'static str {
            match self {
                Self::Start => "START",
                Self::Middle => "MIDDLE",
                Self::End => "END",
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Clashing {
        A,
        B,
    }

    impl Phase for Clashing {
        const SEQUENCE: &'static [Self] = &[Self::A, Self::B];

        fn name(self) -> &'static str {
            "SAME"
        }
    }

    #[test]
    fn test_ranks_follow_sequence() {
        let ranks = PhaseRanks::<Drill>::build().expect("ranks");
        assert_eq!(ranks.initial(), Drill::Start);
        assert_eq!(ranks.rank(Drill::Start), 0);
        assert_eq!(ranks.rank(Drill::End), 2);
        assert_eq!(ranks.len(), 3);
        assert!(!ranks.is_empty());
    }

    #[test]
    fn test_reached() {
        let ranks = PhaseRanks::<Drill>::build().expect("ranks");
        assert!(ranks.reached(Drill::Middle, Drill::Start));
        assert!(ranks.reached(Drill::Middle, Drill::Middle));
        assert!(!ranks.reached(Drill::Middle, Drill::End));
    }

    #[test]
    fn test_parse() {
        let ranks = PhaseRanks::<Drill>::build().expect("ranks");
        assert_eq!(ranks.parse("MIDDLE"), Some(Drill::Middle));
        assert_eq!(ranks.parse("middle"), None);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        assert!(PhaseRanks::<Clashing>::build().is_none());
    }
}
