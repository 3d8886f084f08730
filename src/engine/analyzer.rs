//! Per-card hand analysis: structural metrics, the linear `keep_value`
//! scoring formula used to rank discard candidates, and seeded opponent
//! demand estimation.

use crate::engine::card::{CardId, CardMask, Rank, Suit};
use crate::engine::solver::{self, Objective};
use crate::engine::state::{self, KonkanState};
use rand::{Rng, SeedableRng};
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pressure a single card puts on its holder from the rest of the table:
/// the chance an opponent who has already come down can sarf it away, the
/// averaged chance an opponent not yet down could come down if they held it,
/// and a progress-scaled penalty for sitting on high points late in a round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemandEstimate {
    pub sarf_risk: f64,
    pub come_down_risk: f64,
    pub exposure_pressure: f64,
}

impl DemandEstimate {
    pub fn total(&self) -> f64 {
        self.sarf_risk + self.come_down_risk + self.exposure_pressure
    }
}

/// Structural signals for one card in a hand, plus the opponent demand it
/// attracts. `keep_value` folds all of these into the single ranking score
/// the discard-candidate generator sorts by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardMetrics {
    pub card: CardId,
    pub points: u32,
    pub in_baseline_cover: bool,
    pub cover_points_drop: u32,
    pub cover_cards_drop: u32,
    pub set_potential: u32,
    pub run_left: u32,
    pub run_right: u32,
    pub run_span: u32,
    pub needs_for_run: u32,
    pub gap_bridge: bool,
    pub near_run: bool,
    pub duplicates_same_suit: u32,
    pub exposure_penalty: f64,
    pub opponent_demand: DemandEstimate,
}

impl CardMetrics {
    /// Weighted sum of every signal above. Lower means safer to discard;
    /// the discard-candidate generator ranks ascending by this value.
    pub fn keep_value(&self) -> f64 {
        let mut v = 0.0;
        if self.in_baseline_cover {
            v += 12.0;
        }
        v += self.cover_points_drop as f64 * 1.2;
        v += self.cover_cards_drop as f64 * 2.5;
        v += (self.set_potential as i64 - 2).max(0) as f64 * 2.0;
        v += (self.run_left + self.run_right) as f64 * 2.5;
        if self.near_run {
            v += 3.5;
        }
        if self.gap_bridge {
            v += 4.5;
        }
        if self.needs_for_run == 1 {
            v += 1.5;
        }
        if self.duplicates_same_suit > 0 {
            v -= self.duplicates_same_suit as f64;
        }
        v -= self.exposure_penalty * 1.2;
        v -= self.opponent_demand.total() * 3.5;
        v
    }
}

fn count_consecutive(mask: CardMask, card: CardId, step: i16) -> u32 {
    let Some(suit) = card.suit() else { return 0 };
    let Some(rank) = card.rank() else { return 0 };
    let mut count = 0;
    let mut idx = rank.index() as i16 + step;
    while (0..Rank::ALL.len() as i16).contains(&idx) {
        let r = Rank::ALL[idx as usize];
        if (0..2u8).any(|copy| mask.contains(CardId::standard(suit, r, copy))) {
            count += 1;
            idx += step;
        } else {
            break;
        }
    }
    count
}

fn count_same_suit_duplicates(mask: CardMask, card: CardId) -> u32 {
    let Some(suit) = card.suit() else { return 0 };
    let Some(rank) = card.rank() else { return 0 };
    (0..2u8)
        .filter(|&copy| {
            let other = CardId::standard(suit, rank, copy);
            other != card && mask.contains(other)
        })
        .count() as u32
}

/// Progress through the round: 0 early on, saturating toward 1 as turns
/// accumulate relative to how many cards are still in play.
fn progress_fraction(state: &KonkanState) -> f64 {
    let denominator = (state.public.draw_pile.len() + state.public.turn_index as usize + state.public.discard_pile.len())
        .max(8);
    (state.public.turn_index as f64 / denominator as f64).min(1.0)
}

/// Redeal everyone but `actor`'s hidden cards (opponent hands plus the draw
/// pile) consistently with what `actor` can already see. The discard pile
/// and the table are public, so they never move.
pub fn sample_world<R: Rng + ?Sized>(state: &KonkanState, rng: &mut R, actor: usize) -> KonkanState {
    let mut world = state.clone_shallow();
    let mut pool: Vec<CardId> = Vec::new();
    for (i, p) in world.players.iter().enumerate() {
        if i != actor {
            pool.extend(p.hand.iter());
        }
    }
    pool.extend(world.public.draw_pile.iter().copied());
    pool.shuffle(rng);

    for i in 0..world.players.len() {
        if i == actor {
            continue;
        }
        let hand_size = world.players[i].hand.popcount() as usize;
        let mut hand = CardMask::EMPTY;
        for _ in 0..hand_size {
            if let Some(card) = pool.pop() {
                hand.insert(card);
            }
        }
        world.players[i].hand = hand;
    }
    world.public.draw_pile = pool;
    world
}

/// Whether `player`, having already come down, could extend some table meld
/// with `card` right now.
pub fn card_enables_sarf(state: &KonkanState, player: usize, card: CardId) -> bool {
    if !state.players[player].has_come_down {
        return false;
    }
    state.table.iter().any(|m| m.meld.classify_extension(card).is_some())
}

/// Whether discarding `card` as `actor` would hand the next player a sarf.
pub fn discard_feeds_next_player_sarf(state: &KonkanState, actor: usize, card: CardId) -> bool {
    if state.players.is_empty() {
        return false;
    }
    let next = (actor + 1) % state.players.len();
    card_enables_sarf(state, next, card)
}

/// Mixes (turn, opponent, card, sample index) into a seed for a reproducible
/// per-sample RNG. The three context fields occupy disjoint bit ranges so
/// they can't collide for any in-range combination; `sample_index` is
/// additive so consecutive samples land on related but distinct seeds.
fn derive_demand_seed(turn_index: u32, opponent: usize, card: CardId, sample_index: u32) -> u64 {
    let base = ((turn_index as u64) << 24) ^ ((opponent as u64) << 12) ^ ((card.0 as u64) << 3);
    base.wrapping_add(sample_index as u64)
}

fn coming_down_probability(state: &KonkanState, opponent: usize, card: CardId, samples: u32) -> f64 {
    if samples == 0 {
        return 0.0;
    }
    let threshold = state::effective_threshold(state);
    let mut hits = 0u32;
    for sample_index in 0..samples {
        let seed = derive_demand_seed(state.public.turn_index, opponent, card, sample_index);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut world = sample_world(state, &mut rng, opponent);
        world.players[opponent].hand.insert(card);
        let cover = solver::best_cover(world.players[opponent].hand, Objective::MinDeadwoodAtThreshold, threshold);
        if cover.success {
            hits += 1;
        }
    }
    hits as f64 / samples as f64
}

/// How much pressure the rest of the table puts on `card` if `actor` keeps
/// or discards it: `samples` is how many determinized worlds back the
/// come-down-risk average for opponents who haven't come down yet.
pub fn estimate_card_demand(state: &KonkanState, actor: usize, card: CardId, samples: u32) -> DemandEstimate {
    let mut sarf_risk = 0.0;
    let mut come_down_risk = 0.0;
    for (opponent, player) in state.players.iter().enumerate() {
        if opponent == actor {
            continue;
        }
        if player.has_come_down {
            if card_enables_sarf(state, opponent, card) {
                sarf_risk += 1.0;
            }
        } else {
            come_down_risk += coming_down_probability(state, opponent, card, samples);
        }
    }
    let exposure_pressure = progress_fraction(state) * (card.points(None) as f64 / 10.0);
    DemandEstimate { sarf_risk, come_down_risk, exposure_pressure }
}

/// Count of other standard cards in `hand` sharing `card`'s rank, one per
/// suit, across every suit (including `card`'s own).
fn set_potential_for_rank(hand: CardMask, card: CardId, rank: Rank, joker_count: u32) -> u32 {
    let other_suits = Suit::ALL
        .iter()
        .filter(|&&suit| (0..2u8).any(|copy| {
            let id = CardId::standard(suit, rank, copy);
            id != card && hand.contains(id)
        }))
        .count() as u32;
    other_suits + joker_count
}

/// Compute [`CardMetrics`] for every card currently in `player`'s hand.
/// `demand_samples` bounds how many determinized worlds back each
/// opponent's come-down-risk estimate; sampling itself only runs once the
/// round has progressed enough, or a come-down/table meld already exists, to
/// make demand pressure meaningful.
pub fn analyze_hand(state: &KonkanState, player: usize, demand_samples: u32) -> HashMap<CardId, CardMetrics> {
    let hand = state.players[player].hand;
    let threshold = state::effective_threshold(state);
    let baseline = solver::best_cover(hand, Objective::MinDeadwoodAtThreshold, threshold);
    let progress = progress_fraction(state);

    let joker_count = hand.iter().filter(|c| c.is_joker()).count() as u32;
    let opponents_down = state.players.iter().enumerate().any(|(i, p)| i != player && p.has_come_down);
    let should_sample_demand = opponents_down || progress > 0.35 || state.public.highest_laid_points > 0;

    let mut out = HashMap::new();
    for card in hand.iter() {
        let without = hand.difference(CardMask::from_ids([card]));
        let without_cover = solver::best_cover(without, Objective::MinDeadwoodAtThreshold, threshold);

        let in_baseline_cover = baseline.covered.contains(card);
        let cover_points_drop = baseline.total_points.saturating_sub(without_cover.total_points);
        let cover_cards_drop = baseline.covered_count.saturating_sub(without_cover.covered_count);

        let (set_potential, run_left, run_right, near_run, gap_bridge, duplicates_same_suit) = match card.rank() {
            Some(rank) => {
                let set_potential = set_potential_for_rank(hand, card, rank, joker_count);
                let run_left = count_consecutive(hand, card, -1);
                let run_right = count_consecutive(hand, card, 1);
                let near_run = run_left > 0 || run_right > 0;
                let gap_bridge = run_left > 0 && run_right > 0;
                let duplicates_same_suit = count_same_suit_duplicates(hand, card);
                (set_potential, run_left, run_right, near_run, gap_bridge, duplicates_same_suit)
            }
            None => (joker_count, 0, 0, true, false, 0),
        };
        let run_span = run_left + run_right + 1;
        let needs_for_run = 3u32.saturating_sub(run_span);

        let points = card.points(None);
        let exposure_factor = if near_run || in_baseline_cover { 0.5 } else { 1.0 };
        let exposure_penalty = points as f64 * progress * exposure_factor;

        let opponent_demand = if should_sample_demand {
            estimate_card_demand(state, player, card, demand_samples.max(1))
        } else {
            DemandEstimate { sarf_risk: 0.0, come_down_risk: 0.0, exposure_pressure: 0.0 }
        };

        out.insert(
            card,
            CardMetrics {
                card,
                points,
                in_baseline_cover,
                cover_points_drop,
                cover_cards_drop,
                set_potential,
                run_left,
                run_right,
                run_span,
                needs_for_run,
                gap_bridge,
                near_run,
                duplicates_same_suit,
                exposure_penalty,
                opponent_demand,
            },
        );
    }
    out
}

/// Sort `cards` ascending by `keep_value` (safest discard first), tie-broken
/// by id for determinism.
pub fn rank_cards_by_keep_value(state: &KonkanState, player: usize, cards: &[CardId], demand_samples: u32) -> Vec<CardId> {
    let metrics = analyze_hand(state, player, demand_samples);
    let mut ranked = cards.to_vec();
    ranked.sort_by(|a, b| {
        let ka = metrics.get(a).map(CardMetrics::keep_value).unwrap_or(f64::MIN);
        let kb = metrics.get(b).map(CardMetrics::keep_value).unwrap_or(f64::MIN);
        ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state::{KonkanConfig, PlayerState, PublicState};

    fn hand_of(ids: &[CardId]) -> CardMask {
        CardMask::from_ids(ids.iter().copied())
    }

    fn lone_player_state(hand: CardMask) -> KonkanState {
        let mut p0 = PlayerState::new();
        p0.hand = hand;
        let p1 = PlayerState::new();
        KonkanState {
            config: KonkanConfig::default(),
            players: vec![p0, p1],
            public: PublicState {
                draw_pile: Vec::new(),
                discard_pile: vec![CardId::standard(Suit::Spades, Rank::Two, 0)],
                turn_index: 3,
                dealer_index: 0,
                current_player: 0,
                last_discarder: None,
                winner_index: None,
                highest_laid_points: 0,
            },
            table: Vec::new(),
        }
    }

    #[test]
    fn seed_derivation_is_stable_and_distinguishes_contexts() {
        let card = CardId::standard(Suit::Hearts, Rank::Seven, 0);
        let seed1 = derive_demand_seed(3, 1, card, 0);
        let seed2 = derive_demand_seed(3, 1, card, 0);
        assert_eq!(seed1, seed2);

        let other_turn = derive_demand_seed(4, 1, card, 0);
        let other_opponent = derive_demand_seed(3, 2, card, 0);
        let other_card = derive_demand_seed(3, 1, CardId::standard(Suit::Hearts, Rank::Eight, 0), 0);
        let other_sample = derive_demand_seed(3, 1, card, 1);
        assert_ne!(seed1, other_turn);
        assert_ne!(seed1, other_opponent);
        assert_ne!(seed1, other_card);
        assert_ne!(seed1, other_sample);
    }

    #[test]
    fn isolated_high_card_with_no_cover_ranks_as_safe_to_discard() {
        let hand = hand_of(&[
            CardId::standard(Suit::Clubs, Rank::King, 0),
            CardId::standard(Suit::Spades, Rank::Two, 0),
            CardId::standard(Suit::Hearts, Rank::Four, 1),
        ]);
        let state = lone_player_state(hand);
        let metrics = analyze_hand(&state, 0, 0);
        let king = metrics.get(&CardId::standard(Suit::Clubs, Rank::King, 0)).unwrap();
        assert!(!king.in_baseline_cover);
        assert_eq!(king.run_left + king.run_right, 0);
    }

    #[test]
    fn card_completing_a_set_has_positive_cover_drop() {
        let hand = hand_of(&[
            CardId::standard(Suit::Spades, Rank::Nine, 0),
            CardId::standard(Suit::Hearts, Rank::Nine, 0),
            CardId::standard(Suit::Diamonds, Rank::Nine, 0),
            CardId::standard(Suit::Clubs, Rank::Two, 0),
        ]);
        let state = lone_player_state(hand);
        let metrics = analyze_hand(&state, 0, 0);
        let nine = metrics.get(&CardId::standard(Suit::Spades, Rank::Nine, 0)).unwrap();
        assert!(nine.in_baseline_cover);
        assert!(nine.cover_cards_drop > 0 || nine.cover_points_drop > 0);
    }
}

#[cfg(test)]
mod tests_props_analyzer {
    use super::*;
    use proptest::prelude::*;

    fn base_metrics() -> impl Strategy<Value = CardMetrics> {
        let card = CardId::standard(Suit::Spades, Rank::Seven, 0);
        (
            any::<bool>(),
            0u32..10,
            0u32..10,
            0u32..8,
            0u32..8,
            0u32..8,
            any::<bool>(),
            0u32..4,
            0.0f64..10.0,
            0.0f64..5.0,
        )
            .prop_map(
                move |(
                    in_baseline_cover,
                    cover_points_drop,
                    cover_cards_drop,
                    set_potential,
                    run_left,
                    run_right,
                    gap_bridge,
                    duplicates_same_suit,
                    exposure_penalty,
                    opponent_demand_total,
                )| CardMetrics {
                    card,
                    points: card.points(None),
                    in_baseline_cover,
                    cover_points_drop,
                    cover_cards_drop,
                    set_potential,
                    run_left,
                    run_right,
                    run_span: run_left + run_right + 1,
                    needs_for_run: 3u32.saturating_sub(run_left + run_right + 1),
                    gap_bridge,
                    near_run: run_left > 0 || run_right > 0,
                    duplicates_same_suit,
                    exposure_penalty,
                    opponent_demand: DemandEstimate {
                        sarf_risk: opponent_demand_total,
                        come_down_risk: 0.0,
                        exposure_pressure: 0.0,
                    },
                },
            )
    }

    proptest! {
        #![proptest_config(crate::engine::test_support::proptest_config())]

        /// Analyzer contract: raising any non-decreasing signal never lowers
        /// `keep_value`, and raising any non-increasing signal never raises it.
        #[test]
        fn prop_keep_value_monotone_in_each_signal(m in base_metrics()) {
            let base = m.keep_value();

            let mut with_cover = m.clone();
            with_cover.in_baseline_cover = true;
            prop_assert!(with_cover.keep_value() >= base);

            let mut more_points_drop = m.clone();
            more_points_drop.cover_points_drop += 1;
            prop_assert!(more_points_drop.keep_value() >= base);

            let mut more_cards_drop = m.clone();
            more_cards_drop.cover_cards_drop += 1;
            prop_assert!(more_cards_drop.keep_value() >= base);

            let mut more_run = m.clone();
            more_run.run_left += 1;
            more_run.run_span = more_run.run_left + more_run.run_right + 1;
            more_run.needs_for_run = 3u32.saturating_sub(more_run.run_span);
            prop_assert!(more_run.keep_value() >= base);

            let mut more_set_potential = m.clone();
            more_set_potential.set_potential += 1;
            prop_assert!(more_set_potential.keep_value() >= base);

            let mut bridged = m.clone();
            bridged.gap_bridge = true;
            prop_assert!(bridged.keep_value() >= base);

            let mut more_dupes = m.clone();
            more_dupes.duplicates_same_suit += 1;
            prop_assert!(more_dupes.keep_value() <= base);

            let mut more_exposure = m.clone();
            more_exposure.exposure_penalty += 1.0;
            prop_assert!(more_exposure.keep_value() <= base);

            let mut more_demand = m.clone();
            more_demand.opponent_demand.sarf_risk += 1.0;
            prop_assert!(more_demand.keep_value() <= base);
        }
    }
}
