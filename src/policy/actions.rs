//! Closed action set: three base strategies, three stop/size variants each, plus SKIP.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    OrbVwap,
    SmaRsiAtr,
    DonchianBreakout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Base,
    Tight,
    Wide,
}

impl Variant {
    fn stop_multiplier(&self) -> f64 {
        match self {
            Variant::Base => 1.0,
            Variant::Tight => 0.75,
            Variant::Wide => 1.5,
        }
    }

    fn size_multiplier(&self) -> f64 {
        match self {
            Variant::Base => 1.0,
            Variant::Tight => 0.5,
            Variant::Wide => 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Action {
    Trade(Strategy, Variant),
    Skip,
}

/// Static per-action parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionParams {
    pub stop_multiplier: f64,
    pub size_multiplier: f64,
}

impl Action {
    pub const COUNT: usize = 10;
    pub const SKIP_ID: u8 = 9;

    /// All actions in ascending id order
    pub const ALL: [Action; Action::COUNT] = [
        Action::Trade(Strategy::OrbVwap, Variant::Base),
        Action::Trade(Strategy::OrbVwap, Variant::Tight),
        Action::Trade(Strategy::OrbVwap, Variant::Wide),
        Action::Trade(Strategy::SmaRsiAtr, Variant::Base),
        Action::Trade(Strategy::SmaRsiAtr, Variant::Tight),
        Action::Trade(Strategy::SmaRsiAtr, Variant::Wide),
        Action::Trade(Strategy::DonchianBreakout, Variant::Base),
        Action::Trade(Strategy::DonchianBreakout, Variant::Tight),
        Action::Trade(Strategy::DonchianBreakout, Variant::Wide),
        Action::Skip,
    ];

    pub fn id(&self) -> u8 {
        match self {
            Action::Skip => Self::SKIP_ID,
            Action::Trade(strategy, variant) => {
                let s = match strategy {
                    Strategy::OrbVwap => 0,
                    Strategy::SmaRsiAtr => 1,
                    Strategy::DonchianBreakout => 2,
                };
                let v = match variant {
                    Variant::Base => 0,
                    Variant::Tight => 1,
                    Variant::Wide => 2,
                };
                s * 3 + v
            }
        }
    }

    pub fn from_id(id: u8) -> CoreResult<Self> {
        Self::ALL
            .get(id as usize)
            .copied()
            .ok_or(CoreError::UnknownAction(id))
    }

    pub fn index(&self) -> usize {
        self.id() as usize
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Action::Skip)
    }

    pub fn params(&self) -> ActionParams {
        match self {
            Action::Trade(_, variant) => ActionParams {
                stop_multiplier: variant.stop_multiplier(),
                size_multiplier: variant.size_multiplier(),
            },
            Action::Skip => ActionParams {
                stop_multiplier: 0.0,
                size_multiplier: 0.0,
            },
        }
    }
}

impl TryFrom<u8> for Action {
    type Error = CoreError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Action::from_id(id)
    }
}

impl From<Action> for u8 {
    fn from(action: Action) -> u8 {
        action.id()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Skip => write!(f, "SKIP"),
            Action::Trade(strategy, variant) => write!(f, "{:?}/{:?}", strategy, variant),
        }
    }
}
