//! Dense integer card identifiers and bitmask operations over the 106-card
//! universe: two 52-card decks (ids 0..104, `copy = id / 52`) plus two printed
//! jokers (ids 104 and 105).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Total distinct card identifiers in the universe.
pub const NUM_CARDS: usize = 106;
/// First joker identifier.
pub const JOKER_LOW: u8 = 104;
/// Second joker identifier.
pub const JOKER_HIGH: u8 = 105;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Suit {
    Spades,
    Hearts,
    Diamonds,
    Clubs,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Spades, Suit::Hearts, Suit::Diamonds, Suit::Clubs];

    pub(crate) fn index(self) -> u8 {
        self as u8
    }

    fn from_index(i: u8) -> Suit {
        match i {
            0 => Suit::Spades,
            1 => Suit::Hearts,
            2 => Suit::Diamonds,
            3 => Suit::Clubs,
            _ => unreachable!("suit index out of range: {i}"),
        }
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suit::Spades => write!(f, "♠"),
            Suit::Hearts => write!(f, "♥"),
            Suit::Diamonds => write!(f, "♦"),
            Suit::Clubs => write!(f, "♣"),
        }
    }
}

/// Ace is low: it sits at index 0, directly below Two, and never wraps past King.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    Ace,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
}

impl Rank {
    pub const ALL: [Rank; 13] = [
        Rank::Ace,
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
    ];

    /// Points scored while held in hand or represented by a joker.
    pub fn points(self) -> u32 {
        match self {
            Rank::Ace => 10,
            Rank::Two => 2,
            Rank::Three => 3,
            Rank::Four => 4,
            Rank::Five => 5,
            Rank::Six => 6,
            Rank::Seven => 7,
            Rank::Eight => 8,
            Rank::Nine => 9,
            Rank::Ten => 10,
            Rank::Jack => 10,
            Rank::Queen => 10,
            Rank::King => 10,
        }
    }

    pub(crate) fn index(self) -> u8 {
        self as u8
    }

    fn from_index(i: u8) -> Rank {
        Self::ALL[i as usize]
    }

    /// Rank immediately above this one in a run, or `None` at King (no wraparound).
    pub fn succ(self) -> Option<Rank> {
        let i = self.index();
        if i + 1 < Self::ALL.len() as u8 {
            Some(Self::from_index(i + 1))
        } else {
            None
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Ace => write!(f, "A"),
            Rank::Two => write!(f, "2"),
            Rank::Three => write!(f, "3"),
            Rank::Four => write!(f, "4"),
            Rank::Five => write!(f, "5"),
            Rank::Six => write!(f, "6"),
            Rank::Seven => write!(f, "7"),
            Rank::Eight => write!(f, "8"),
            Rank::Nine => write!(f, "9"),
            Rank::Ten => write!(f, "10"),
            Rank::Jack => write!(f, "J"),
            Rank::Queen => write!(f, "Q"),
            Rank::King => write!(f, "K"),
        }
    }
}

/// The decoded identity of a [`CardId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    Standard { suit: Suit, rank: Rank, copy: u8 },
    Joker { copy: u8 },
}

/// A dense identifier in `[0, 106)` for one of the 106 physical cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CardId(pub u8);

impl CardId {
    pub fn standard(suit: Suit, rank: Rank, copy: u8) -> CardId {
        debug_assert!(copy < 2, "copy out of range: {copy}");
        CardId(copy * 52 + suit.index() * 13 + rank.index())
    }

    pub fn joker(copy: u8) -> CardId {
        debug_assert!(copy < 2, "joker copy out of range: {copy}");
        CardId(JOKER_LOW + copy)
    }

    pub fn is_joker(self) -> bool {
        self.0 >= JOKER_LOW
    }

    pub fn decode(self) -> Decoded {
        assert!((self.0 as usize) < NUM_CARDS, "card id out of range: {}", self.0);
        if self.is_joker() {
            Decoded::Joker { copy: self.0 - JOKER_LOW }
        } else {
            let copy = self.0 / 52;
            let within = self.0 % 52;
            Decoded::Standard {
                suit: Suit::from_index(within / 13),
                rank: Rank::from_index(within % 13),
                copy,
            }
        }
    }

    pub fn suit(self) -> Option<Suit> {
        match self.decode() {
            Decoded::Standard { suit, .. } => Some(suit),
            Decoded::Joker { .. } => None,
        }
    }

    pub fn rank(self) -> Option<Rank> {
        match self.decode() {
            Decoded::Standard { rank, .. } => Some(rank),
            Decoded::Joker { .. } => None,
        }
    }

    pub fn copy(self) -> u8 {
        match self.decode() {
            Decoded::Standard { copy, .. } => copy,
            Decoded::Joker { copy } => copy,
        }
    }

    /// Points this identifier scores. Jokers score 0 unless `represented_rank`
    /// is supplied (the rank they are standing in for inside a meld).
    pub fn points(self, represented_rank: Option<Rank>) -> u32 {
        match self.decode() {
            Decoded::Standard { rank, .. } => rank.points(),
            Decoded::Joker { .. } => represented_rank.map(Rank::points).unwrap_or(0),
        }
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.decode() {
            Decoded::Standard { suit, rank, .. } => write!(f, "{rank}{suit}"),
            Decoded::Joker { .. } => write!(f, "🃏"),
        }
    }
}

/// Returns every one of the 106 card identifiers, in id order.
pub fn full_deck() -> Vec<CardId> {
    (0..NUM_CARDS as u8).map(CardId).collect()
}

/// A 128-bit set of card identifiers, split into a low 64 bits (ids 0..64)
/// and a high 64 bits (ids 64..106).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CardMask {
    pub lo: u64,
    pub hi: u64,
}

impl CardMask {
    pub const EMPTY: CardMask = CardMask { lo: 0, hi: 0 };

    pub fn bit_for(id: CardId) -> CardMask {
        let i = id.0 as u32;
        if i < 64 {
            CardMask { lo: 1u64 << i, hi: 0 }
        } else {
            CardMask { lo: 0, hi: 1u64 << (i - 64) }
        }
    }

    pub fn full() -> CardMask {
        CardMask::from_ids(full_deck())
    }

    pub fn from_ids(ids: impl IntoIterator<Item = CardId>) -> CardMask {
        let mut mask = CardMask::EMPTY;
        for id in ids {
            mask.insert(id);
        }
        mask
    }

    pub fn is_empty(self) -> bool {
        self.lo == 0 && self.hi == 0
    }

    pub fn contains(self, id: CardId) -> bool {
        !(self & CardMask::bit_for(id)).is_empty()
    }

    pub fn insert(&mut self, id: CardId) {
        *self = *self | CardMask::bit_for(id);
    }

    pub fn remove(&mut self, id: CardId) {
        *self = CardMask {
            lo: self.lo & !CardMask::bit_for(id).lo,
            hi: self.hi & !CardMask::bit_for(id).hi,
        };
    }

    pub fn union(self, other: CardMask) -> CardMask {
        self | other
    }

    pub fn intersection(self, other: CardMask) -> CardMask {
        self & other
    }

    /// `self` with every card in `other` removed, whether or not it was present.
    pub fn difference(self, other: CardMask) -> CardMask {
        CardMask { lo: self.lo & !other.lo, hi: self.hi & !other.hi }
    }

    pub fn is_subset(self, other: CardMask) -> bool {
        self.difference(other).is_empty()
    }

    pub fn popcount(self) -> u32 {
        self.lo.count_ones() + self.hi.count_ones()
    }

    pub fn iter(self) -> CardMaskIter {
        CardMaskIter { lo: self.lo, hi: self.hi }
    }
}

impl std::ops::BitOr for CardMask {
    type Output = CardMask;
    fn bitor(self, rhs: CardMask) -> CardMask {
        CardMask { lo: self.lo | rhs.lo, hi: self.hi | rhs.hi }
    }
}

impl std::ops::BitAnd for CardMask {
    type Output = CardMask;
    fn bitand(self, rhs: CardMask) -> CardMask {
        CardMask { lo: self.lo & rhs.lo, hi: self.hi & rhs.hi }
    }
}

impl IntoIterator for CardMask {
    type Item = CardId;
    type IntoIter = CardMaskIter;
    fn into_iter(self) -> CardMaskIter {
        self.iter()
    }
}

pub struct CardMaskIter {
    lo: u64,
    hi: u64,
}

impl Iterator for CardMaskIter {
    type Item = CardId;

    fn next(&mut self) -> Option<CardId> {
        if self.lo != 0 {
            let i = self.lo.trailing_zeros();
            self.lo &= self.lo - 1;
            Some(CardId(i as u8))
        } else if self.hi != 0 {
            let i = self.hi.trailing_zeros();
            self.hi &= self.hi - 1;
            Some(CardId(64 + i as u8))
        } else {
            None
        }
    }
}
