//! Information-set Monte Carlo tree search over discard/lay-down/sarf
//! actions: determinization, heuristic priors, UCB1 selection, and a
//! single-ply rollout.

use crate::engine::analyzer;
use crate::engine::card::CardId;
use crate::engine::rules::{self, DrawAction, PlayAction};
use crate::engine::state::KonkanState;
use rand::Rng;
use rand_distr::{Distribution, Gamma};
use serde::{Deserialize, Serialize};

/// Dirichlet root noise: `weight` of the prior mass is replaced by a
/// Dirichlet(`alpha`) sample over the same action set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirichletConfig {
    pub alpha: f64,
    pub weight: f64,
}

impl Default for DirichletConfig {
    fn default() -> Self {
        DirichletConfig { alpha: 0.3, weight: 0.25 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchConfig {
    pub simulations: u32,
    pub exploration_constant: f64,
    pub dirichlet: Option<DirichletConfig>,
    pub opponent_priors: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig { simulations: 64, exploration_constant: 1.0, dirichlet: None, opponent_priors: false }
    }
}

/// Heuristic opponent model used to bias root priors toward what a
/// reasonable adversary would avoid or seek out.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpponentModel {
    pub trash_penalty: f64,
    pub laydown_bonus: f64,
    pub sarf_bonus: f64,
    pub joker_penalty: f64,
}

impl Default for OpponentModel {
    fn default() -> Self {
        OpponentModel { trash_penalty: 0.12, laydown_bonus: 0.08, sarf_bonus: 0.05, joker_penalty: 0.4 }
    }
}

impl OpponentModel {
    /// Multiplicative prior adjustment for `action`, floored well above zero
    /// so no action is pruned outright by the opponent model alone.
    pub fn prior_adjustment(&self, action: &PlayAction) -> f64 {
        let points = action.discard.points(None);
        let mut adjustment = 1.0;
        adjustment -= self.trash_penalty * (points as f64 / 10.0);
        if action.discard.is_joker() {
            adjustment -= self.joker_penalty;
        }
        if action.lay_down {
            adjustment += self.laydown_bonus;
        }
        if !action.sarf_moves.is_empty() {
            adjustment += self.sarf_bonus * action.sarf_moves.len() as f64;
        }
        adjustment.max(0.05)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReport {
    pub action: PlayAction,
    pub visits: u32,
    pub mean_value: f64,
    pub prior: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub actor: usize,
    pub reports: Vec<ActionReport>,
    /// Highest-visit action, ties broken by lowest index. `None` only when
    /// the actor had no legal discard-phase action to search over.
    pub recommended_index: Option<usize>,
}

/// A deterministic, opponent-model-free desirability score for one
/// candidate action: rewards a safe discard (low `keep_value`), readiness to
/// lay down, and sarf opportunities; penalizes discarding a joker and any
/// discard that would hand the next player an immediate sarf.
fn action_heuristic_score(state: &KonkanState, actor: usize, action: &PlayAction) -> f64 {
    if analyzer::discard_feeds_next_player_sarf(state, actor, action.discard) {
        return -1000.0;
    }
    let metrics = analyzer::analyze_hand(state, actor, 1);
    let mut score = metrics.get(&action.discard).map(|m| -m.keep_value()).unwrap_or(0.0);
    if action.lay_down {
        score += 8.0;
    }
    score += action.sarf_moves.len() as f64 * 3.0;
    if action.discard.is_joker() {
        score -= 15.0;
    }
    score
}

/// Shift-and-normalize `raw` into a probability distribution, then
/// optionally fold in the opponent model and Dirichlet root noise.
fn compute_priors<R: Rng + ?Sized>(
    state: &KonkanState,
    actor: usize,
    actions: &[PlayAction],
    config: &SearchConfig,
    rng: &mut R,
) -> Vec<f64> {
    let raw: Vec<f64> = actions.iter().map(|a| action_heuristic_score(state, actor, a)).collect();
    let min = raw.iter().cloned().fold(f64::INFINITY, f64::min);
    let shifted: Vec<f64> = raw.iter().map(|v| v - min + 1.0).collect();
    let sum: f64 = shifted.iter().sum();
    let mut priors: Vec<f64> = if sum > 0.0 {
        shifted.iter().map(|v| v / sum).collect()
    } else {
        vec![1.0 / actions.len() as f64; actions.len()]
    };

    if config.opponent_priors {
        let model = OpponentModel::default();
        let adjusted: Vec<f64> = actions.iter().zip(&priors).map(|(a, p)| p * model.prior_adjustment(a)).collect();
        let adjusted_sum: f64 = adjusted.iter().sum();
        if adjusted_sum > 0.0 {
            priors = adjusted.iter().map(|v| v / adjusted_sum).collect();
        }
    }

    if let Some(dirichlet) = &config.dirichlet {
        let gamma = Gamma::new(dirichlet.alpha, 1.0).expect("dirichlet alpha must be positive");
        let samples: Vec<f64> = (0..actions.len()).map(|_| gamma.sample(rng)).collect();
        let sample_sum: f64 = samples.iter().sum();
        if sample_sum > 0.0 {
            let noise: Vec<f64> = samples.iter().map(|v| v / sample_sum).collect();
            let w = dirichlet.weight.clamp(0.0, 1.0);
            priors = priors.iter().zip(&noise).map(|(p, n)| (1.0 - w) * p + w * n).collect();
        }
    }

    priors
}

fn select_index(visits: &[u32], total_value: &[f64], priors: &[f64], total_visits: u32, exploration: f64) -> usize {
    let mut best_i = 0;
    let mut best_score = f64::NEG_INFINITY;
    for i in 0..visits.len() {
        let score = if visits[i] == 0 {
            f64::INFINITY
        } else {
            let mean = total_value[i] / visits[i] as f64;
            let explore = exploration * (((total_visits + 1) as f64).ln() / visits[i] as f64).sqrt();
            mean + explore + priors[i]
        };
        if score > best_score {
            best_score = score;
            best_i = i;
        }
    }
    best_i
}

fn choose_opponent_draw(state: &KonkanState, player: usize) -> DrawAction {
    if rules::legal_draw_actions(state, player).contains(&DrawAction::Trash) {
        DrawAction::Trash
    } else {
        DrawAction::Deck
    }
}

fn pick_best_heuristic_action(state: &KonkanState, player: usize) -> Option<PlayAction> {
    let candidates = rules::legal_play_actions(state, player, rules::MAX_DISCARD_CHOICES);
    candidates.into_iter().max_by(|a, b| {
        action_heuristic_score(state, player, a)
            .partial_cmp(&action_heuristic_score(state, player, b))
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// At most one opponent turn: draw (preferring a useful trash pickup), then
/// the best heuristic discard-phase action. A no-op if the round has already
/// ended or the opponent can't legally draw.
fn rollout_one_ply(world: &mut KonkanState, opponent: usize) {
    if world.public.winner_index.is_some() {
        return;
    }
    let draw_action = choose_opponent_draw(world, opponent);
    if rules::apply_draw(world, opponent, draw_action).is_err() {
        return;
    }
    if let Some(action) = pick_best_heuristic_action(world, opponent) {
        let _ = rules::apply_play(world, opponent, action);
    }
}

fn count_extenders(hand_cards: &[CardId]) -> u32 {
    let mut total = 0u32;
    for &card in hand_cards {
        let Some(rank) = card.rank() else { continue };
        let suit = card.suit();
        let mut duplicate = false;
        let mut run_neighbor = false;
        for &other in hand_cards {
            if other == card {
                continue;
            }
            let Some(other_rank) = other.rank() else { continue };
            if other_rank == rank {
                duplicate = true;
            }
            if let Some(s) = suit {
                let delta = other_rank.index() as i16 - rank.index() as i16;
                if other.suit() == Some(s) && (delta == 1 || delta == -1) {
                    run_neighbor = true;
                }
            }
            if duplicate && run_neighbor {
                break;
            }
        }
        total += duplicate as u32 + run_neighbor as u32;
    }
    total
}

/// Scalar reward for `player` at `state`: +1/-1 on a decided round, else a
/// normalized heuristic rewarding low deadwood, run/set extenders, and
/// having come down, penalized by raw hand size.
fn heuristic_value(state: &KonkanState, player: usize) -> f64 {
    if let Some(winner) = state.public.winner_index {
        return if winner == player { 1.0 } else { -1.0 };
    }
    let hand = state.players[player].hand;
    if hand.is_empty() {
        return 0.0;
    }
    let threshold = crate::engine::state::effective_threshold(state);
    let cover = crate::engine::solver::best_cover(hand, crate::engine::solver::Objective::MinDeadwoodAtThreshold, threshold);
    let deadwood: u32 = hand.difference(cover.covered).iter().map(|c| c.points(None)).sum();
    let hand_cards: Vec<CardId> = hand.iter().collect();
    let extenders = count_extenders(&hand_cards);

    let mut score = -(deadwood as f64) + 0.35 * extenders as f64;
    if state.players[player].has_come_down {
        score += 5.0;
    }
    score -= hand_cards.len() as f64;
    score / 100.0
}

fn simulate_one<R: Rng + ?Sized>(state: &KonkanState, actor: usize, action: &PlayAction, rng: &mut R) -> f64 {
    if analyzer::discard_feeds_next_player_sarf(state, actor, action.discard) {
        return -10.0;
    }
    let mut clone = state.clone_shallow();
    if rules::apply_play(&mut clone, actor, action.clone()).is_err() {
        return -1.0;
    }
    if let Some(winner) = clone.public.winner_index {
        return if winner == actor { 1.0 } else { -1.0 };
    }

    let next = clone.active_player();
    let mut world = analyzer::sample_world(&clone, rng, next);
    rollout_one_ply(&mut world, next);
    heuristic_value(&world, actor)
}

/// Run one search over `state`'s active player's discard-phase actions.
/// Never mutates `state`; every clone is local to this call.
#[tracing::instrument(skip(state, rng, config), fields(simulations = config.simulations))]
pub fn run_search<R: Rng + ?Sized>(state: &KonkanState, rng: &mut R, config: &SearchConfig) -> SearchResult {
    let actor = state.active_player();
    let actions = rules::legal_play_actions(state, actor, rules::MAX_DISCARD_CHOICES);
    if actions.is_empty() {
        return SearchResult { actor, reports: Vec::new(), recommended_index: None };
    }

    let priors = compute_priors(state, actor, &actions, config, rng);
    let mut visits = vec![0u32; actions.len()];
    let mut total_value = vec![0.0f64; actions.len()];

    for iteration in 0..config.simulations {
        let total_visits: u32 = visits.iter().sum();
        let i = select_index(&visits, &total_value, &priors, total_visits, config.exploration_constant);
        let value = simulate_one(state, actor, &actions[i], rng);
        visits[i] += 1;
        total_value[i] += value;
        tracing::trace!(iteration, chosen = i, value, "search iteration");
    }

    let reports: Vec<ActionReport> = actions
        .into_iter()
        .enumerate()
        .map(|(i, action)| ActionReport {
            action,
            visits: visits[i],
            mean_value: if visits[i] > 0 { total_value[i] / visits[i] as f64 } else { 0.0 },
            prior: priors[i],
        })
        .collect();

    let mut recommended_index = None;
    let mut best_visits = 0u32;
    for (i, report) in reports.iter().enumerate() {
        if recommended_index.is_none() || report.visits > best_visits {
            recommended_index = Some(i);
            best_visits = report.visits;
        }
    }

    SearchResult { actor, reports, recommended_index }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::card::{CardId, Rank, Suit};
    use crate::engine::rules::{deal, DrawAction as DA};
    use crate::engine::state::{KonkanConfig, MeldOnTable};
    use crate::engine::solver::{Meld, MeldKind};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn two_player_state() -> KonkanState {
        deal(KonkanConfig::default(), crate::engine::card::full_deck())
    }

    #[test]
    fn s7_search_is_deterministic_for_a_fixed_seed() {
        let mut state = two_player_state();
        let actor = state.public.current_player;
        rules::apply_draw(&mut state, actor, DA::Deck).unwrap();

        let config = SearchConfig { simulations: 16, ..SearchConfig::default() };
        let mut rng_a = ChaCha8Rng::seed_from_u64(42);
        let mut rng_b = ChaCha8Rng::seed_from_u64(42);
        let result_a = run_search(&state, &mut rng_a, &config);
        let result_b = run_search(&state, &mut rng_b, &config);

        assert_eq!(result_a.reports.len(), result_b.reports.len());
        for (a, b) in result_a.reports.iter().zip(result_b.reports.iter()) {
            assert_eq!(a.visits, b.visits);
            assert_eq!(a.mean_value, b.mean_value);
        }
        assert_eq!(result_a.recommended_index, result_b.recommended_index);
    }

    #[test]
    fn search_leaves_the_input_state_untouched() {
        let mut state = two_player_state();
        let actor = state.public.current_player;
        rules::apply_draw(&mut state, actor, DA::Deck).unwrap();
        let before = state.clone();

        let config = SearchConfig { simulations: 8, ..SearchConfig::default() };
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        run_search(&state, &mut rng, &config);

        assert_eq!(state, before);
    }

    #[test]
    fn priors_are_normalized_to_one() {
        let mut state = two_player_state();
        let actor = state.public.current_player;
        rules::apply_draw(&mut state, actor, DA::Deck).unwrap();
        let actions = rules::legal_play_actions(&state, actor, rules::MAX_DISCARD_CHOICES);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let priors = compute_priors(&state, actor, &actions, &SearchConfig::default(), &mut rng);
        let sum: f64 = priors.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "priors summed to {sum}");
        assert!(priors.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn s8_search_avoids_a_discard_that_feeds_the_next_players_sarf() {
        let mut state = two_player_state();
        let owner = 0usize;
        let actor = 1usize;
        let run = Meld {
            kind: MeldKind::Run,
            cards: crate::engine::card::CardMask::from_ids([
                CardId::standard(Suit::Spades, Rank::Seven, 0),
                CardId::standard(Suit::Spades, Rank::Eight, 0),
                CardId::standard(Suit::Spades, Rank::Nine, 0),
            ]),
            joker_ranks: Vec::new(),
            points: Rank::Seven.points() + Rank::Eight.points() + Rank::Nine.points(),
        };
        state.table.push(MeldOnTable { owner, meld: run });
        state.players[owner].has_come_down = true;
        state.players[owner].laid_points = state.table[0].meld.points;

        state.players[actor].has_come_down = true;
        let threatening = CardId::standard(Suit::Spades, Rank::Ten, 0);
        state.players[actor].hand.insert(threatening);
        for i in 0..8 {
            state.players[actor].hand.insert(CardId::standard(Suit::Hearts, Rank::ALL[i], 0));
        }
        state.public.current_player = actor;
        state.players[actor].phase = crate::engine::state::TurnPhase::AwaitingDiscard;

        let config = SearchConfig { simulations: 32, ..SearchConfig::default() };
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let result = run_search(&state, &mut rng, &config);
        let recommended = result.recommended_index.expect("some legal action exists");
        assert_ne!(result.reports[recommended].action.discard, threatening);
    }
}
