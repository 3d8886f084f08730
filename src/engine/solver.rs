//! Meld enumeration and optimal-cover search over a hand mask.
//!
//! Candidates are generated deterministically (fixed rank/suit iteration
//! order), then a branch-and-bound search over mutually disjoint candidates
//! picks the best cover for one of three objectives. Results are memoized
//! process-wide, keyed by `(mask, objective, threshold)`.

use crate::engine::card::{CardId, CardMask, Rank, Suit};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeldKind {
    Set,
    Run,
}

/// A candidate or chosen meld: a kind, its card-id mask, and which of its
/// cards (if any) are jokers standing in for a rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meld {
    pub kind: MeldKind,
    pub cards: CardMask,
    pub joker_ranks: Vec<(CardId, Rank)>,
    pub points: u32,
}

impl Meld {
    pub fn card_count(&self) -> u32 {
        self.cards.popcount()
    }

    pub fn joker_count(&self) -> usize {
        self.joker_ranks.len()
    }

    /// A four-suit jokerless set is sealed: immutable once laid down.
    pub fn is_sealed(&self) -> bool {
        self.kind == MeldKind::Set && self.card_count() == 4 && self.joker_count() == 0
    }

    pub fn represented_rank(&self, id: CardId) -> Option<Rank> {
        self.joker_ranks.iter().find(|(j, _)| *j == id).map(|(_, r)| *r)
    }

    fn set_rank(&self) -> Option<Rank> {
        if self.kind != MeldKind::Set {
            return None;
        }
        self.cards
            .iter()
            .find_map(|c| c.rank())
            .or_else(|| self.joker_ranks.first().map(|(_, r)| *r))
    }

    fn run_suit(&self) -> Option<Suit> {
        if self.kind != MeldKind::Run {
            return None;
        }
        self.cards.iter().find_map(|c| c.suit())
    }

    /// Lowest/highest rank index spanned by the run, joker-filled positions
    /// included.
    fn run_span(&self) -> Option<(u8, u8)> {
        if self.kind != MeldKind::Run {
            return None;
        }
        let mut idxs: Vec<u8> = self.cards.iter().filter_map(|c| c.rank()).map(|r| r.index()).collect();
        idxs.extend(self.joker_ranks.iter().map(|(_, r)| r.index()));
        let lo = *idxs.iter().min()?;
        let hi = *idxs.iter().max()?;
        Some((lo, hi))
    }

    /// Whether `card`, played from a hand onto this table meld, is a legal
    /// sarf: a joker swap (trading a table joker for the card it stands in
    /// for) or a jokerless extension. Sealed sets accept neither.
    pub fn classify_extension(&self, card: CardId) -> Option<SarfKind> {
        if self.is_sealed() {
            return None;
        }
        match self.kind {
            MeldKind::Set => {
                if card.is_joker() {
                    return None;
                }
                let rank = self.set_rank()?;
                if card.rank()? != rank {
                    return None;
                }
                let suit = card.suit()?;
                if self.cards.iter().any(|c| c.suit() == Some(suit)) {
                    return None;
                }
                if let Some((joker_id, _)) = self.joker_ranks.first() {
                    return Some(SarfKind::JokerSwap(*joker_id));
                }
                if self.card_count() >= 4 {
                    return None;
                }
                Some(SarfKind::Extend)
            }
            MeldKind::Run => {
                let suit = self.run_suit()?;
                let (lo, hi) = self.run_span()?;
                if card.is_joker() {
                    if !self.joker_ranks.is_empty() {
                        return None;
                    }
                    let lo_open = lo > 0;
                    let hi_open = (hi as usize) + 1 < Rank::ALL.len();
                    if lo_open ^ hi_open { Some(SarfKind::Extend) } else { None }
                } else {
                    if card.suit()? != suit {
                        return None;
                    }
                    let idx = card.rank()?.index() as i16;
                    if idx == lo as i16 - 1 || idx == hi as i16 + 1 {
                        return Some(SarfKind::Extend);
                    }
                    if let Some((joker_id, jr)) = self.joker_ranks.first() {
                        if jr.index() as i16 == idx {
                            return Some(SarfKind::JokerSwap(*joker_id));
                        }
                    }
                    None
                }
            }
        }
    }

    /// Apply a sarf classified by [`Meld::classify_extension`], returning the
    /// mutated meld and the joker card (if any) handed back to the actor.
    pub fn extend(&self, card: CardId) -> Option<(Meld, Option<CardId>)> {
        let kind = self.classify_extension(card)?;
        let mut next = self.clone();
        match kind {
            SarfKind::JokerSwap(joker) => {
                next.cards.remove(joker);
                next.cards.insert(card);
                next.joker_ranks.retain(|(j, _)| *j != joker);
                Some((next, Some(joker)))
            }
            SarfKind::Extend => {
                match self.kind {
                    MeldKind::Set => {
                        let rank = self.set_rank().expect("set extension implies a set rank");
                        next.cards.insert(card);
                        next.points += rank.points();
                    }
                    MeldKind::Run => {
                        if card.is_joker() {
                            let (lo, hi) = self.run_span().expect("run extension implies a span");
                            let represented = if lo > 0 {
                                Rank::ALL[lo as usize - 1]
                            } else {
                                Rank::ALL[hi as usize + 1]
                            };
                            next.cards.insert(card);
                            next.joker_ranks.push((card, represented));
                            next.points += represented.points();
                        } else {
                            let rank = card.rank().expect("non-joker extension card has a rank");
                            next.cards.insert(card);
                            next.points += rank.points();
                        }
                    }
                }
                Some((next, None))
            }
        }
    }
}

/// How a card played from hand legally attaches to an existing table meld.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SarfKind {
    /// Swaps out the table joker this id was standing in for.
    JokerSwap(CardId),
    /// Grows the meld by one card without touching any joker.
    Extend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Objective {
    MaxCards,
    MinDeadwoodAtThreshold,
    First14,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverResult {
    pub melds: Vec<Meld>,
    pub covered: CardMask,
    pub covered_count: u32,
    pub total_points: u32,
    pub jokers_used: usize,
    /// For `MinDeadwoodAtThreshold`: whether `total_points >= threshold`.
    /// For `First14`: whether `covered_count` reached the target.
    /// Always `true` for `MaxCards`.
    pub success: bool,
}

impl CoverResult {
    fn empty() -> CoverResult {
        CoverResult {
            melds: Vec::new(),
            covered: CardMask::EMPTY,
            covered_count: 0,
            total_points: 0,
            jokers_used: 0,
            success: false,
        }
    }
}

fn cartesian(pools: &[&Vec<CardId>]) -> Vec<Vec<CardId>> {
    let mut result = vec![Vec::new()];
    for pool in pools {
        let mut next = Vec::with_capacity(result.len() * pool.len());
        for partial in &result {
            for &id in pool.iter() {
                let mut extended = partial.clone();
                extended.push(id);
                next.push(extended);
            }
        }
        result = next;
    }
    result
}

fn generate_sets(mask: CardMask) -> Vec<Meld> {
    let mut out = Vec::new();
    for rank in Rank::ALL {
        let mut ids_by_suit: [Vec<CardId>; 4] = Default::default();
        for (si, &suit) in Suit::ALL.iter().enumerate() {
            for copy in 0..2u8 {
                let id = CardId::standard(suit, rank, copy);
                if mask.contains(id) {
                    ids_by_suit[si].push(id);
                }
            }
        }
        let present_suits: Vec<usize> = (0..4).filter(|&i| !ids_by_suit[i].is_empty()).collect();
        let jokers: Vec<CardId> = (0..2u8).map(CardId::joker).filter(|&j| mask.contains(j)).collect();
        let n = present_suits.len();

        for subset_bits in 1u32..(1 << n) {
            let chosen: Vec<usize> = (0..n)
                .filter(|&b| subset_bits & (1 << b) != 0)
                .map(|b| present_suits[b])
                .collect();
            if chosen.len() < 2 {
                continue;
            }
            let pools: Vec<&Vec<CardId>> = chosen.iter().map(|&s| &ids_by_suit[s]).collect();
            for combo in cartesian(&pools) {
                if chosen.len() >= 3 {
                    out.push(build_set(&combo, rank, None));
                }
                if chosen.len() + 1 <= 4 {
                    for &j in &jokers {
                        out.push(build_set(&combo, rank, Some(j)));
                    }
                }
            }
        }
    }
    out
}

fn build_set(ids: &[CardId], rank: Rank, joker: Option<CardId>) -> Meld {
    let mut mask = CardMask::from_ids(ids.iter().copied());
    let mut joker_ranks = Vec::new();
    let mut points = ids.len() as u32 * rank.points();
    if let Some(j) = joker {
        mask.insert(j);
        joker_ranks.push((j, rank));
        points += rank.points();
    }
    Meld { kind: MeldKind::Set, cards: mask, joker_ranks, points }
}

fn generate_runs(mask: CardMask) -> Vec<Meld> {
    let mut out = Vec::new();
    for &suit in &Suit::ALL {
        let mut ids_by_rank: Vec<Vec<CardId>> = vec![Vec::new(); Rank::ALL.len()];
        for (ri, &rank) in Rank::ALL.iter().enumerate() {
            for copy in 0..2u8 {
                let id = CardId::standard(suit, rank, copy);
                if mask.contains(id) {
                    ids_by_rank[ri].push(id);
                }
            }
        }
        let jokers: Vec<CardId> = (0..2u8).map(CardId::joker).filter(|&j| mask.contains(j)).collect();

        let n = Rank::ALL.len();
        for lo in 0..n {
            for hi in (lo + 2)..n {
                let missing: Vec<usize> = (lo..=hi).filter(|&i| ids_by_rank[i].is_empty()).collect();
                if missing.len() > 1 {
                    continue;
                }
                if missing.len() == 1 && jokers.is_empty() {
                    continue;
                }
                let pools: Vec<&Vec<CardId>> =
                    (lo..=hi).filter(|&i| !ids_by_rank[i].is_empty()).map(|i| &ids_by_rank[i]).collect();
                for combo in cartesian(&pools) {
                    if missing.is_empty() {
                        out.push(build_run(&combo, lo, hi, None));
                    } else {
                        let gap_idx = missing[0];
                        for &j in &jokers {
                            out.push(build_run(&combo, lo, hi, Some((j, Rank::ALL[gap_idx]))));
                        }
                    }
                }
            }
        }
    }
    out
}

fn build_run(ids: &[CardId], lo: usize, hi: usize, joker: Option<(CardId, Rank)>) -> Meld {
    let mut mask = CardMask::from_ids(ids.iter().copied());
    let mut joker_ranks = Vec::new();
    let points: u32 = (lo..=hi).map(|i| Rank::ALL[i].points()).sum();
    if let Some((j, r)) = joker {
        mask.insert(j);
        joker_ranks.push((j, r));
    }
    Meld { kind: MeldKind::Run, cards: mask, joker_ranks, points }
}

/// Every maximal-per-window legal meld whose cards are a subset of `mask`,
/// in a fixed deterministic order (rank-major for sets, suit/window-major for runs).
pub fn enumerate_melds(mask: CardMask) -> Vec<Meld> {
    let mut melds = generate_sets(mask);
    melds.extend(generate_runs(mask));
    melds
}

#[derive(Clone)]
struct CoverState {
    chosen: Vec<usize>,
    covered: CardMask,
    covered_count: u32,
    total_points: u32,
    jokers_used: usize,
}

impl CoverState {
    fn empty() -> CoverState {
        CoverState { chosen: Vec::new(), covered: CardMask::EMPTY, covered_count: 0, total_points: 0, jokers_used: 0 }
    }
}

struct Search<'a> {
    melds: &'a [Meld],
    objective: Objective,
    threshold: u32,
    target_cards: u32,
    hand_mask: CardMask,
    hand_size: u32,
    best: Option<CoverState>,
}

impl<'a> Search<'a> {
    fn success(&self, s: &CoverState) -> bool {
        match self.objective {
            Objective::MaxCards => true,
            Objective::MinDeadwoodAtThreshold => s.total_points >= self.threshold,
            Objective::First14 => s.covered_count >= self.target_cards,
        }
    }

    /// True iff `a` should replace `self.best`. Tie-break order is fixed:
    /// primary objective, then fewer jokers used, then more covered cards,
    /// then a lexicographically smaller meld-id list — except
    /// `MinDeadwoodAtThreshold`'s own success ties break on points before
    /// jokers, per its contract.
    fn better(&self, a: &CoverState, b: &CoverState) -> bool {
        let a_ok = self.success(a);
        let b_ok = self.success(b);
        if a_ok != b_ok {
            return a_ok && !b_ok;
        }
        let primary = |s: &CoverState| match self.objective {
            Objective::MaxCards => s.covered_count,
            Objective::MinDeadwoodAtThreshold => {
                if a_ok { s.covered_count } else { s.total_points }
            }
            Objective::First14 => s.covered_count,
        };
        let secondary = |s: &CoverState| match self.objective {
            Objective::MaxCards => s.covered_count,
            Objective::MinDeadwoodAtThreshold => {
                if a_ok { s.total_points } else { s.covered_count }
            }
            Objective::First14 => s.covered_count,
        };
        let key = |s: &CoverState| {
            (primary(s), secondary(s), std::cmp::Reverse(s.jokers_used), std::cmp::Reverse(s.chosen.clone()))
        };
        key(a) > key(b)
    }

    fn consider(&mut self, s: CoverState) {
        let replace = match &self.best {
            None => true,
            Some(best) => self.better(&s, best),
        };
        if replace {
            self.best = Some(s);
        }
    }

    fn upper_bound(&self, s: &CoverState) -> u32 {
        s.covered_count + self.hand_mask.difference(s.covered).popcount()
    }

    fn solve(&mut self, idx: usize, state: CoverState) {
        if idx == self.melds.len() {
            self.consider(state);
            return;
        }
        if let Some(best) = &self.best {
            if self.success(best) {
                let bound = self.upper_bound(&state);
                let worth_continuing = match self.objective {
                    Objective::MaxCards => bound > best.covered_count,
                    Objective::MinDeadwoodAtThreshold => bound >= best.covered_count,
                    Objective::First14 => bound >= best.covered_count,
                };
                if !worth_continuing {
                    return;
                }
            }
        }

        self.solve(idx + 1, state.clone());

        let m = &self.melds[idx];
        if m.cards.intersection(state.covered).is_empty() {
            let mut next = state;
            next.chosen.push(idx);
            next.covered = next.covered.union(m.cards);
            next.covered_count = next.covered.popcount();
            next.total_points += m.points;
            next.jokers_used += m.joker_count();
            self.solve(idx + 1, next);
        }
    }
}

type MemoKey = (u64, u64, Objective, u32);

const MEMO_CAP: usize = 4096;

fn memo() -> &'static DashMap<MemoKey, CoverResult> {
    static MEMO: OnceLock<DashMap<MemoKey, CoverResult>> = OnceLock::new();
    MEMO.get_or_init(DashMap::new)
}

/// Finds the best card-disjoint cover of `mask` by legal melds under `objective`.
/// `threshold` is only meaningful for [`Objective::MinDeadwoodAtThreshold`].
/// Deterministic: identical arguments always produce a structurally identical result.
pub fn best_cover(mask: CardMask, objective: Objective, threshold: u32) -> CoverResult {
    let key: MemoKey = (mask.lo, mask.hi, objective, threshold);
    if let Some(cached) = memo().get(&key) {
        return cached.clone();
    }

    let melds = enumerate_melds(mask);
    let hand_size = mask.popcount();
    let mut search = Search {
        melds: &melds,
        objective,
        threshold,
        target_cards: hand_size.min(14),
        hand_mask: mask,
        hand_size,
        best: None,
    };
    search.solve(0, CoverState::empty());

    let result = match search.best {
        None => CoverResult::empty(),
        Some(ref state) => {
            let chosen_melds: Vec<Meld> = state.chosen.iter().map(|&i| melds[i].clone()).collect();
            CoverResult {
                success: search.success(&state),
                melds: chosen_melds,
                covered: state.covered,
                covered_count: state.covered_count,
                total_points: state.total_points,
                jokers_used: state.jokers_used,
            }
        }
    };

    if memo().len() >= MEMO_CAP {
        memo().clear();
    }
    memo().insert(key, result.clone());
    result
}


#[cfg(test)]
mod tests_props_solver {
    use super::*;
    use crate::engine::card::{full_deck, NUM_CARDS};
    use proptest::prelude::*;
    use std::collections::HashSet;

    /// A random hand mask with a bounded popcount, drawn from the full
    /// 106-card universe without replacement.
    fn hand_mask(max_size: usize) -> impl Strategy<Value = CardMask> {
        proptest::sample::subsequence((0..NUM_CARDS as u8).collect::<Vec<_>>(), 0..=max_size)
            .prop_map(|ids| CardMask::from_ids(ids.into_iter().map(CardId)))
    }

    fn meld_is_legal(meld: &Meld) -> bool {
        if meld.joker_count() > 1 {
            return false;
        }
        match meld.kind {
            MeldKind::Set => {
                let ranks: HashSet<Option<Rank>> = meld.cards.iter().map(|c| c.rank()).collect();
                let non_joker_ranks: HashSet<Rank> = meld.cards.iter().filter_map(|c| c.rank()).collect();
                let suits: Vec<Suit> = meld.cards.iter().filter_map(|c| c.suit()).collect();
                let distinct_suits: HashSet<Suit> = suits.iter().copied().collect();
                ranks.len() <= 2
                    && non_joker_ranks.len() <= 1
                    && suits.len() == distinct_suits.len()
                    && meld.card_count() <= 4
            }
            MeldKind::Run => {
                let suits: HashSet<Suit> = meld.cards.iter().filter_map(|c| c.suit()).collect();
                if suits.len() > 1 {
                    return false;
                }
                let mut idxs: Vec<u8> = meld.cards.iter().filter_map(|c| c.rank()).map(|r| r.index()).collect();
                idxs.extend(meld.joker_ranks.iter().map(|(_, r)| r.index()));
                idxs.sort_unstable();
                idxs.windows(2).all(|w| w[1] == w[0] + 1) && idxs.len() == meld.card_count() as usize
            }
        }
    }

    proptest! {
        #![proptest_config(crate::engine::test_support::proptest_config())]

        /// Meld legality: every meld the solver is willing to propose is
        /// either a same-rank distinct-suit set or a same-suit consecutive
        /// run, each with at most one joker.
        #[test]
        fn prop_enumerated_melds_are_always_legal(mask in hand_mask(18)) {
            for meld in enumerate_melds(mask) {
                prop_assert!(meld_is_legal(&meld), "illegal meld proposed: {meld:?}");
                prop_assert!(meld.cards.is_subset(mask));
            }
        }

        /// Solver determinism: repeated calls with identical arguments
        /// produce a structurally identical cover.
        #[test]
        fn prop_best_cover_is_deterministic(mask in hand_mask(16), threshold in 0u32..120) {
            let a = best_cover(mask, Objective::MinDeadwoodAtThreshold, threshold);
            let b = best_cover(mask, Objective::MinDeadwoodAtThreshold, threshold);
            prop_assert_eq!(a.covered, b.covered);
            prop_assert_eq!(a.total_points, b.total_points);
            prop_assert_eq!(a.covered_count, b.covered_count);
            prop_assert_eq!(a.jokers_used, b.jokers_used);
            prop_assert_eq!(a.success, b.success);
        }

        /// Solver monotonicity: a successful cover always clears the
        /// threshold it was asked to hit; the chosen melds stay disjoint and
        /// inside the hand.
        #[test]
        fn prop_best_cover_respects_threshold_and_disjointness(mask in hand_mask(16), threshold in 0u32..120) {
            let result = best_cover(mask, Objective::MinDeadwoodAtThreshold, threshold);
            if result.success {
                prop_assert!(result.total_points >= threshold);
            }
            prop_assert!(result.covered.is_subset(mask));
            let mut seen = CardMask::EMPTY;
            for meld in &result.melds {
                prop_assert!(meld.cards.intersection(seen).is_empty(), "overlapping melds in cover");
                seen = seen.union(meld.cards);
            }
            prop_assert_eq!(seen, result.covered);
        }

        /// Card conservation through the full deck: `enumerate_melds` never
        /// proposes a meld touching a card outside the mask it was given.
        #[test]
        fn prop_full_deck_melds_stay_within_universe(_unit in Just(())) {
            let full = CardMask::from_ids(full_deck());
            for meld in enumerate_melds(full) {
                prop_assert!(meld.cards.is_subset(full));
            }
        }
    }
}
