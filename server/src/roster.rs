//! Round participants and their infection state

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfectionState {
    Infected,
    Uninfected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerRecord {
    pub id: u32,
    pub state: InfectionState,
}

/// Players in the current round. Each id holds exactly one state, so the
/// infected and uninfected sets always partition the roster.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    players: BTreeMap<u32, InfectionState>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a roster where `infected` ids start infected and every other
    /// id in `ids` starts uninfected.
    pub fn with_infected(ids: &[u32], infected: &[u32]) -> Self {
        let players = ids
            .iter()
            .map(|id| {
                let state = if infected.contains(id) {
                    InfectionState::Infected
                } else {
                    InfectionState::Uninfected
                };
                (*id, state)
            })
            .collect();
        Self { players }
    }

    pub fn insert(&mut self, id: u32, state: InfectionState) {
        self.players.insert(id, state);
    }

    pub fn remove(&mut self, id: u32) -> Option<InfectionState> {
        self.players.remove(&id)
    }

    pub fn state(&self, id: u32) -> Option<InfectionState> {
        self.players.get(&id).copied()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.players.contains_key(&id)
    }

    /// Marks a player infected. Returns true only if they were uninfected.
    pub fn infect(&mut self, id: u32) -> bool {
        match self.players.get_mut(&id) {
            Some(state) if *state == InfectionState::Uninfected => {
                *state = InfectionState::Infected;
                true
            }
            _ => false,
        }
    }

    pub fn infected_count(&self) -> usize {
        self.count(InfectionState::Infected)
    }

    pub fn uninfected_count(&self) -> usize {
        self.count(InfectionState::Uninfected)
    }

    fn count(&self, wanted: InfectionState) -> usize {
        self.players.values().filter(|s| **s == wanted).count()
    }

    pub fn infected_ids(&self) -> Vec<u32> {
        self.ids_in(InfectionState::Infected)
    }

    pub fn uninfected_ids(&self) -> Vec<u32> {
        self.ids_in(InfectionState::Uninfected)
    }

    fn ids_in(&self, wanted: InfectionState) -> Vec<u32> {
        self.players
            .iter()
            .filter(|(_, s)| **s == wanted)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.players.keys().copied().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = PlayerRecord> + '_ {
        self.players
            .iter()
            .map(|(id, state)| PlayerRecord { id: *id, state: *state })
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }
}

/// Picks `count` distinct ids from `candidates`, avoiding `excluded`.
///
/// When fewer than `count` candidates are outside `excluded`, all of them
/// are taken and the rest are drawn uniformly from the excluded candidates.
/// Never returns more ids than there are candidates.
pub fn select_initial_infected<R: Rng + ?Sized>(
    candidates: &[u32],
    count: usize,
    excluded: &BTreeSet<u32>,
    rng: &mut R,
) -> Vec<u32> {
    let (fresh, repeat): (Vec<u32>, Vec<u32>) = candidates
        .iter()
        .copied()
        .partition(|id| !excluded.contains(id));

    if fresh.len() >= count {
        return fresh.choose_multiple(rng, count).copied().collect();
    }

    let shortfall = count - fresh.len();
    let mut chosen = fresh;
    chosen.extend(repeat.choose_multiple(rng, shortfall).copied());
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_with_infected_partitions_ids() {
        let roster = Roster::with_infected(&[1, 2, 3, 4], &[2]);
        assert_eq!(roster.len(), 4);
        assert_eq!(roster.infected_ids(), vec![2]);
        assert_eq!(roster.uninfected_ids(), vec![1, 3, 4]);
        assert_eq!(roster.infected_count() + roster.uninfected_count(), roster.len());
    }

    #[test]
    fn test_infect_is_idempotent() {
        let mut roster = Roster::with_infected(&[1, 2, 3], &[1]);
        assert!(roster.infect(2));
        assert!(!roster.infect(2));
        assert!(!roster.infect(1));
        assert!(!roster.infect(99));
        assert_eq!(roster.state(2), Some(InfectionState::Infected));
        assert_eq!(roster.uninfected_ids(), vec![3]);
    }

    #[test]
    fn test_insert_and_remove() {
        let mut roster = Roster::new();
        roster.insert(5, InfectionState::Infected);
        assert!(roster.contains(5));
        assert_eq!(roster.remove(5), Some(InfectionState::Infected));
        assert_eq!(roster.remove(5), None);
        assert!(roster.is_empty());
    }

    #[test]
    fn test_records() {
        let roster = Roster::with_infected(&[1, 2], &[2]);
        let records: Vec<PlayerRecord> = roster.records().collect();
        assert_eq!(
            records,
            vec![
                PlayerRecord {
                    id: 1,
                    state: InfectionState::Uninfected
                },
                PlayerRecord {
                    id: 2,
                    state: InfectionState::Infected
                },
            ]
        );
    }

    #[test]
    fn test_selection_avoids_previous_infected() {
        let candidates: Vec<u32> = (1..=10).collect();
        let excluded: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..200 {
            let picked = select_initial_infected(&candidates, 3, &excluded, &mut rng);
            assert_eq!(picked.len(), 3);
            assert!(picked.iter().all(|id| !excluded.contains(id)));
            let distinct: BTreeSet<u32> = picked.iter().copied().collect();
            assert_eq!(distinct.len(), 3);
        }
    }

    #[test]
    fn test_selection_relaxes_exclusion_on_shortfall() {
        let candidates = vec![1, 2, 3, 4];
        let excluded: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(9);

        let mut seen_repeats = BTreeSet::new();
        for _ in 0..200 {
            let picked = select_initial_infected(&candidates, 2, &excluded, &mut rng);
            assert_eq!(picked.len(), 2);
            // The only fresh candidate is always taken.
            assert!(picked.contains(&4));
            seen_repeats.extend(picked.iter().copied().filter(|id| *id != 4));
        }
        // The remainder is spread over all previously infected ids.
        assert_eq!(seen_repeats, excluded);
    }

    #[test]
    fn test_selection_never_exceeds_candidates() {
        let mut rng = StdRng::seed_from_u64(0);
        let picked = select_initial_infected(&[7, 8], 5, &BTreeSet::new(), &mut rng);
        assert_eq!(picked.len(), 2);
    }
}
