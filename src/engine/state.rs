//! The data model shared by the rules engine: per-player state, public table
//! state, configuration, and the whole-game snapshot.

use crate::engine::card::CardMask;
use crate::engine::solver::Meld;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnPhase {
    AwaitingDraw,
    AwaitingDiscard,
    Complete,
}

/// A meld resting on the table, tagged with the player who laid it down.
/// Sarf can still mutate `meld` (swap a joker, extend a run) after laydown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeldOnTable {
    pub owner: usize,
    pub meld: Meld,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub hand: CardMask,
    /// Cards this player has personally contributed to the table, across
    /// melds they laid down and melds they later sarfed into.
    pub laid_mask: CardMask,
    pub laid_points: u32,
    pub has_come_down: bool,
    pub phase: TurnPhase,
    pub last_action_was_discard: bool,
}

impl PlayerState {
    pub fn new() -> PlayerState {
        PlayerState {
            hand: CardMask::EMPTY,
            laid_mask: CardMask::EMPTY,
            laid_points: 0,
            has_come_down: false,
            phase: TurnPhase::AwaitingDraw,
            last_action_was_discard: false,
        }
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        PlayerState::new()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicState {
    pub draw_pile: Vec<crate::engine::card::CardId>,
    pub discard_pile: Vec<crate::engine::card::CardId>,
    pub turn_index: u32,
    pub dealer_index: usize,
    pub current_player: usize,
    pub last_discarder: Option<usize>,
    pub winner_index: Option<usize>,
    pub highest_laid_points: u32,
}

impl PublicState {
    pub fn top_discard(&self) -> Option<crate::engine::card::CardId> {
        self.discard_pile.last().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KonkanConfig {
    pub num_players: usize,
    pub hand_size: usize,
    pub come_down_points: u32,
    pub allow_trash_first_turn: bool,
    pub dealer_index: usize,
}

impl Default for KonkanConfig {
    fn default() -> Self {
        KonkanConfig {
            num_players: 2,
            hand_size: 14,
            come_down_points: 81,
            allow_trash_first_turn: false,
            dealer_index: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KonkanState {
    pub config: KonkanConfig,
    pub players: Vec<PlayerState>,
    pub public: PublicState,
    pub table: Vec<MeldOnTable>,
}

impl KonkanState {
    pub fn active_player(&self) -> usize {
        self.public.current_player
    }

    /// Every field here is owned, so a structural `Clone` is already the
    /// cheap speculative-application copy the search and action-listing code
    /// needs; this just names that intent at call sites.
    pub fn clone_shallow(&self) -> KonkanState {
        self.clone()
    }
}

/// The come-down gate a player's hand must clear to lay down. Once anyone on
/// the table has come down, later players must also beat the highest points
/// anyone has laid so far, not just the base threshold.
pub fn effective_threshold(state: &KonkanState) -> u32 {
    if state.players.iter().any(|p| p.has_come_down) {
        state.config.come_down_points.max(state.public.highest_laid_points + 1)
    } else {
        state.config.come_down_points
    }
}
