//! The turn state machine: dealing, legal action generation, and applying
//! draws, discards, laydowns and sarf moves to a [`KonkanState`].

use crate::engine::analyzer;
use crate::engine::card::{CardId, NUM_CARDS};
use crate::engine::solver::{self, Objective};
use crate::engine::state::{self, KonkanConfig, KonkanState, MeldOnTable, PlayerState, PublicState, TurnPhase};
use crate::error::{KonkanError, KonkanResult};
use serde::{Deserialize, Serialize};

/// Default cap on how many discard candidates (and, by extension, laydown
/// and sarf variants) `legal_play_actions` returns.
pub const MAX_DISCARD_CHOICES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrawAction {
    Deck,
    Trash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayAction {
    pub discard: CardId,
    pub lay_down: bool,
    pub sarf_moves: Vec<(usize, CardId)>,
}

/// Deal a fresh round from a pre-ordered deck (the last element is the top
/// of the draw pile). The opener — the dealer's left-hand neighbour — is
/// dealt one extra card.
pub fn deal(config: KonkanConfig, deck_order: Vec<CardId>) -> KonkanState {
    assert_eq!(deck_order.len(), NUM_CARDS, "deck_order must carry every card identifier exactly once");
    assert!(config.num_players > 0, "num_players must be positive");

    let mut draw_pile = deck_order;
    let mut players: Vec<PlayerState> = (0..config.num_players).map(|_| PlayerState::new()).collect();
    let dealer = config.dealer_index % config.num_players;
    let opener = (dealer + 1) % config.num_players;

    for _ in 0..config.hand_size {
        for player in players.iter_mut() {
            let card = draw_pile.pop().expect("deck_order has enough cards for the configured hand size");
            player.hand.insert(card);
        }
    }
    let extra = draw_pile.pop().expect("deck_order has one extra card for the opener");
    players[opener].hand.insert(extra);

    let discard_top = draw_pile.pop().expect("deck_order leaves a card for the discard pile");

    KonkanState {
        config,
        players,
        public: PublicState {
            draw_pile,
            discard_pile: vec![discard_top],
            turn_index: 0,
            dealer_index: dealer,
            current_player: opener,
            last_discarder: None,
            winner_index: None,
            highest_laid_points: 0,
        },
        table: Vec::new(),
    }
}

fn can_draw_from_trash(state: &KonkanState, player: usize) -> bool {
    let public = &state.public;
    if public.discard_pile.is_empty() {
        return false;
    }
    if public.last_discarder == Some(player) {
        return false;
    }
    if public.turn_index == 0 && !state.config.allow_trash_first_turn {
        return false;
    }
    if state.players[player].has_come_down {
        return true;
    }
    let threshold = state::effective_threshold(state);
    let mut candidate = state.players[player].hand;
    candidate.insert(public.top_discard().expect("discard_pile was checked non-empty above"));
    solver::best_cover(candidate, Objective::MinDeadwoodAtThreshold, threshold).success
}

/// Draw actions currently open to `player`: the stock (always, as long as a
/// card can be found or recycled) and the discard pile (gated by
/// [`can_draw_from_trash`]).
pub fn legal_draw_actions(state: &KonkanState, player: usize) -> Vec<DrawAction> {
    let mut actions = Vec::new();
    if state.public.current_player != player || state.players[player].phase != TurnPhase::AwaitingDraw {
        return actions;
    }
    if !state.public.draw_pile.is_empty() || state.public.discard_pile.len() > 1 {
        actions.push(DrawAction::Deck);
    }
    if can_draw_from_trash(state, player) {
        actions.push(DrawAction::Trash);
    }
    actions
}

fn recycle_discard_pile(state: &mut KonkanState) -> KonkanResult<()> {
    if state.public.discard_pile.len() <= 1 {
        return Err(KonkanError::IllegalDraw("stock is empty and discard pile is too small to recycle".into()));
    }
    let top = state.public.discard_pile.pop().expect("length checked above");
    let mut recycled = std::mem::take(&mut state.public.discard_pile);
    recycled.reverse();
    state.public.draw_pile = recycled;
    state.public.discard_pile = vec![top];
    Ok(())
}

/// Draw a card for `player`, advancing them to the awaiting-discard phase.
/// Drawing from the stock recycles the discard pile (minus its top card)
/// first if the draw pile is empty.
pub fn apply_draw(state: &mut KonkanState, player: usize, action: DrawAction) -> KonkanResult<CardId> {
    if state.public.current_player != player {
        return Err(KonkanError::IllegalDraw("not this player's turn".into()));
    }
    if state.players[player].phase != TurnPhase::AwaitingDraw {
        return Err(KonkanError::IllegalDraw("player is not awaiting a draw".into()));
    }

    let card = match action {
        DrawAction::Deck => {
            if state.public.draw_pile.is_empty() {
                recycle_discard_pile(state)?;
            }
            state.public.draw_pile.pop().expect("recycle_discard_pile guarantees a card or errors")
        }
        DrawAction::Trash => {
            if !can_draw_from_trash(state, player) {
                return Err(KonkanError::IllegalDraw("trash card is not eligible".into()));
            }
            state.public.discard_pile.pop().expect("can_draw_from_trash checked non-empty")
        }
    };
    state.players[player].hand.insert(card);
    state.players[player].phase = TurnPhase::AwaitingDiscard;
    tracing::debug!(player, card = %card, "draw");
    Ok(card)
}

pub fn can_come_down(state: &KonkanState, player: usize) -> bool {
    if state.players[player].has_come_down {
        return false;
    }
    let threshold = state::effective_threshold(state);
    solver::best_cover(state.players[player].hand, Objective::MinDeadwoodAtThreshold, threshold).success
}

/// Lay down the best-covering set of melds for `player`'s hand, per
/// [`Objective::MinDeadwoodAtThreshold`]. Requires the awaiting-discard phase
/// and that the player hasn't already come down this round.
pub fn lay_down(state: &mut KonkanState, player: usize) -> KonkanResult<()> {
    if state.public.current_player != player || state.players[player].phase != TurnPhase::AwaitingDiscard {
        return Err(KonkanError::IllegalLaydown("not this player's discard phase".into()));
    }
    if state.players[player].has_come_down {
        return Err(KonkanError::IllegalLaydown("player has already come down".into()));
    }
    let threshold = state::effective_threshold(state);
    let hand = state.players[player].hand;
    let cover = solver::best_cover(hand, Objective::MinDeadwoodAtThreshold, threshold);
    if !cover.success {
        return Err(KonkanError::IllegalLaydown(format!(
            "best cover totals {} points, below the effective threshold of {threshold}",
            cover.total_points
        )));
    }
    for meld in cover.melds {
        state.players[player].hand = state.players[player].hand.difference(meld.cards);
        state.players[player].laid_mask = state.players[player].laid_mask.union(meld.cards);
        state.players[player].laid_points += meld.points;
        state.table.push(MeldOnTable { owner: player, meld });
    }
    state.players[player].has_come_down = true;
    state.public.highest_laid_points = state.public.highest_laid_points.max(state.players[player].laid_points);
    tracing::debug!(player, points = cover.total_points, "lay_down");
    Ok(())
}

pub fn can_sarf(state: &KonkanState, player: usize, meld_index: usize, card: CardId) -> bool {
    if state.public.current_player != player || state.players[player].phase != TurnPhase::AwaitingDiscard {
        return false;
    }
    if !state.players[player].has_come_down {
        return false;
    }
    if !state.players[player].hand.contains(card) {
        return false;
    }
    let Some(on_table) = state.table.get(meld_index) else {
        return false;
    };
    on_table.meld.classify_extension(card).is_some()
}

/// Extend a table meld with a card from `player`'s hand: either a jokerless
/// extension (grows the meld) or a joker swap (trading out the table joker
/// for the card it was standing in for, returning the joker to the actor's
/// hand). `laid_points`/`laid_mask` follow whoever currently contributes
/// each card, not meld ownership, so a joker swap moves points from the
/// meld's owner to the actor.
pub fn apply_sarf(state: &mut KonkanState, player: usize, meld_index: usize, card: CardId) -> KonkanResult<()> {
    if !can_sarf(state, player, meld_index, card) {
        return Err(KonkanError::IllegalSarf(format!("card {card} cannot extend meld {meld_index}")));
    }
    let owner = state.table[meld_index].owner;
    let existing = state.table[meld_index].meld.clone();
    let (new_meld, returned_joker) = existing
        .extend(card)
        .ok_or_else(|| KonkanError::IllegalSarf("meld rejected the extension".into()))?;

    state.players[player].hand.remove(card);
    state.players[player].laid_mask.insert(card);

    match returned_joker {
        Some(joker) => {
            let represented_points = existing.represented_rank(joker).map(|r| r.points()).unwrap_or(0);
            state.players[owner].laid_mask.remove(joker);
            state.players[owner].laid_points -= represented_points;
            state.players[player].laid_points += represented_points;
            state.players[player].hand.insert(joker);
        }
        None => {
            let delta = new_meld.points - existing.points;
            state.players[player].laid_points += delta;
        }
    }
    state.table[meld_index].meld = new_meld;
    tracing::debug!(player, meld_index, card = %card, "sarf");
    Ok(())
}

/// Discard a card, ending `player`'s turn. Declares a winner if the player
/// has already come down and is left with an empty hand.
pub fn apply_discard(state: &mut KonkanState, player: usize, card: CardId) -> KonkanResult<()> {
    if state.public.current_player != player {
        return Err(KonkanError::IllegalDiscard("not this player's turn".into()));
    }
    if state.players[player].phase != TurnPhase::AwaitingDiscard {
        return Err(KonkanError::IllegalDiscard("player must draw before discarding".into()));
    }
    if !state.players[player].hand.contains(card) {
        return Err(KonkanError::IllegalDiscard("card is not in hand".into()));
    }

    state.players[player].hand.remove(card);
    state.public.discard_pile.push(card);
    state.players[player].last_action_was_discard = true;
    state.public.last_discarder = Some(player);

    if state.players[player].has_come_down && state.players[player].hand.is_empty() {
        state.public.winner_index = Some(player);
        state.players[player].phase = TurnPhase::Complete;
        tracing::debug!(player, "round won");
        return Ok(());
    }

    state.players[player].phase = TurnPhase::AwaitingDraw;
    let next = (player + 1) % state.players.len();
    state.players[next].last_action_was_discard = false;
    state.public.current_player = next;
    state.public.turn_index += 1;
    tracing::debug!(player, card = %card, "discard");
    Ok(())
}

/// Apply a full discard-phase turn: optional laydown, then any sarf moves in
/// order, then the mandatory discard.
pub fn apply_play(state: &mut KonkanState, player: usize, action: PlayAction) -> KonkanResult<()> {
    if action.lay_down {
        lay_down(state, player)?;
    }
    for (meld_index, card) in &action.sarf_moves {
        apply_sarf(state, player, *meld_index, *card)?;
    }
    apply_discard(state, player, action.discard)
}

/// Bounded, ranked discard-phase candidates: up to `max_candidates` plain
/// discards (ranked by ascending `keep_value`, safest first); if the player
/// can come down, up to `max_candidates` laydown variants, each paired with a
/// surviving discard re-ranked over the post-laydown hand rather than reusing
/// the plain-discard ranking; and up to `max_candidates` distinct sarf
/// variants. Every candidate is validated by simulating it on a shallow
/// clone before being returned.
pub fn legal_play_actions(state: &KonkanState, player: usize, max_candidates: usize) -> Vec<PlayAction> {
    if state.public.current_player != player || state.players[player].phase != TurnPhase::AwaitingDiscard {
        return Vec::new();
    }
    let hand_cards: Vec<CardId> = state.players[player].hand.iter().collect();
    if hand_cards.is_empty() {
        return Vec::new();
    }

    let ranked = analyzer::rank_cards_by_keep_value(state, player, &hand_cards, 1);
    let discard_candidates: Vec<CardId> = ranked.into_iter().take(max_candidates).collect();

    let mut actions: Vec<PlayAction> = discard_candidates
        .iter()
        .map(|&discard| PlayAction { discard, lay_down: false, sarf_moves: Vec::new() })
        .collect();

    let threshold = state::effective_threshold(state);
    let cover = solver::best_cover(state.players[player].hand, Objective::MinDeadwoodAtThreshold, threshold);
    if !state.players[player].has_come_down && cover.success {
        let post_laydown_hand = state.players[player].hand.difference(cover.covered);
        let post_laydown_cards: Vec<CardId> = post_laydown_hand.iter().collect();
        if !post_laydown_cards.is_empty() {
            let ranked_post = analyzer::rank_cards_by_keep_value(state, player, &post_laydown_cards, 1);
            let laydown_candidates: Vec<CardId> = ranked_post.into_iter().take(max_candidates).collect();
            actions.extend(
                laydown_candidates.iter().map(|&discard| PlayAction { discard, lay_down: true, sarf_moves: Vec::new() }),
            );
        }
    }

    if state.players[player].has_come_down && !state.table.is_empty() {
        let mut seen = std::collections::HashSet::new();
        'melds: for meld_index in 0..state.table.len() {
            for &card in &hand_cards {
                if !can_sarf(state, player, meld_index, card) {
                    continue;
                }
                let remaining: Vec<CardId> = hand_cards.iter().copied().filter(|&c| c != card).collect();
                if remaining.is_empty() {
                    continue;
                }
                let ranked_remaining = analyzer::rank_cards_by_keep_value(state, player, &remaining, 1);
                let discard = ranked_remaining[0];
                if !seen.insert((meld_index, card, discard)) {
                    continue;
                }
                actions.push(PlayAction { discard, lay_down: false, sarf_moves: vec![(meld_index, card)] });
                if seen.len() >= max_candidates {
                    break 'melds;
                }
            }
        }
    }

    actions.retain(|action| {
        let mut clone = state.clone_shallow();
        apply_play(&mut clone, player, action.clone()).is_ok()
    });
    actions
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player: usize,
    pub laid_points: u32,
    pub deadwood_points: u32,
    pub net_points: i64,
    pub won: bool,
}

/// Final scores for a completed round. Requires `winner_index` to be set;
/// calling this before the round has ended is a caller error, not a rule
/// violation.
pub fn final_scores(state: &KonkanState) -> Vec<PlayerScore> {
    let winner = state.public.winner_index.expect("final_scores requires a round that has ended");
    state
        .players
        .iter()
        .enumerate()
        .map(|(player, p)| {
            let deadwood_points: u32 = p.hand.iter().map(|c| c.points(None)).sum();
            PlayerScore {
                player,
                laid_points: p.laid_points,
                deadwood_points,
                net_points: p.laid_points as i64 - deadwood_points as i64,
                won: player == winner,
            }
        })
        .collect()
}

/// One round's outcome, as recorded into a [`MatchHistory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round_number: u32,
    pub winner_index: usize,
    pub scores: Vec<PlayerScore>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlayerMatchTotal {
    pub player: usize,
    pub wins: u32,
    pub laid_points: u64,
    pub deadwood_points: u64,
    pub net_points: i64,
}

/// Accumulates [`RoundSummary`] results across a multi-round match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchHistory {
    num_players: usize,
    rounds: Vec<RoundSummary>,
    wins: Vec<u32>,
    laid_points: Vec<u64>,
    deadwood_points: Vec<u64>,
    net_points: Vec<i64>,
}

impl MatchHistory {
    pub fn new(num_players: usize) -> MatchHistory {
        assert!(num_players > 0, "num_players must be positive");
        MatchHistory {
            num_players,
            rounds: Vec::new(),
            wins: vec![0; num_players],
            laid_points: vec![0; num_players],
            deadwood_points: vec![0; num_players],
            net_points: vec![0; num_players],
        }
    }

    /// Fold one round's scores into the running totals. Panics if the round
    /// doesn't carry exactly one score per seated player — a caller bug, not
    /// a rule violation.
    pub fn record(&mut self, summary: RoundSummary) {
        assert_eq!(summary.scores.len(), self.num_players, "round summary must carry one score per seated player");
        for score in &summary.scores {
            assert!(score.player < self.num_players, "score references a player index out of range");
            self.laid_points[score.player] += score.laid_points as u64;
            self.deadwood_points[score.player] += score.deadwood_points as u64;
            self.net_points[score.player] += score.net_points;
            if score.won {
                self.wins[score.player] += 1;
            }
        }
        self.rounds.push(summary);
    }

    pub fn rounds(&self) -> &[RoundSummary] {
        &self.rounds
    }

    pub fn totals(&self) -> Vec<PlayerMatchTotal> {
        (0..self.num_players)
            .map(|player| PlayerMatchTotal {
                player,
                wins: self.wins[player],
                laid_points: self.laid_points[player],
                deadwood_points: self.deadwood_points[player],
                net_points: self.net_points[player],
            })
            .collect()
    }
}


#[cfg(test)]
mod tests_props_rules {
    use super::*;
    use crate::engine::card::CardMask;
    use proptest::prelude::*;

    /// A uniformly random ordering of the full 106-card universe, built by
    /// sorting the deck against independent random keys.
    fn permuted_deck() -> impl Strategy<Value = Vec<CardId>> {
        proptest::collection::vec(any::<u64>(), NUM_CARDS).prop_map(|keys| {
            let mut paired: Vec<(u64, CardId)> = keys.into_iter().zip(crate::engine::card::full_deck()).collect();
            paired.sort_by_key(|&(k, _)| k);
            paired.into_iter().map(|(_, c)| c).collect()
        })
    }

    proptest! {
        #![proptest_config(crate::engine::test_support::proptest_config())]

        /// Card conservation: dealing never duplicates or drops an
        /// identifier — every card lands in exactly one hand, the draw pile,
        /// or the discard pile.
        #[test]
        fn prop_deal_conserves_every_card(deck_order in permuted_deck(), num_players in 2usize..=4) {
            let mut config = KonkanConfig::default();
            config.num_players = num_players;
            let state = deal(config, deck_order);

            let mut seen = CardMask::EMPTY;
            let mut total = 0u32;
            for p in &state.players {
                prop_assert!(seen.intersection(p.hand).is_empty(), "card dealt to more than one hand");
                seen = seen.union(p.hand);
                total += p.hand.popcount();
            }
            let pile_mask = CardMask::from_ids(state.public.draw_pile.iter().copied().chain(state.public.discard_pile.iter().copied()));
            prop_assert!(seen.intersection(pile_mask).is_empty(), "a dealt card also sits in a pile");
            total += state.public.draw_pile.len() as u32 + state.public.discard_pile.len() as u32;
            prop_assert_eq!(total, NUM_CARDS as u32);
        }

        /// Rule round-trip: applying an action to a clone never perturbs the
        /// state it was cloned from.
        #[test]
        fn prop_clone_then_mutate_leaves_the_original_untouched(deck_order in permuted_deck()) {
            let mut config = KonkanConfig::default();
            config.num_players = 2;
            let state = deal(config, deck_order);
            let snapshot = state.clone_shallow();

            let mut mutated = state.clone_shallow();
            let actor = mutated.public.current_player;
            let _ = apply_draw(&mut mutated, actor, DrawAction::Deck);

            prop_assert_eq!(state, snapshot);
        }

        /// Scoring identity: after a successful laydown, `laid_points`
        /// always equals the rank-point sum of that player's cards on the
        /// table.
        #[test]
        fn prop_laid_points_matches_table_cards_after_laydown(deck_order in permuted_deck()) {
            let mut config = KonkanConfig::default();
            config.num_players = 2;
            let mut state = deal(config, deck_order);
            let actor = state.public.current_player;
            state.players[actor].phase = TurnPhase::AwaitingDiscard;

            if lay_down(&mut state, actor).is_ok() {
                let table_points: u32 = state
                    .table
                    .iter()
                    .filter(|m| m.owner == actor)
                    .flat_map(|m| m.meld.cards.iter())
                    .map(|c| {
                        let represented = state.table.iter().find_map(|m| m.meld.represented_rank(c));
                        c.points(represented)
                    })
                    .sum();
                prop_assert_eq!(state.players[actor].laid_points, table_points);
            }
        }
    }
}
