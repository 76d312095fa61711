//! Deterministic persona engine
//!
//! Personas give each worker a recognizable voice without any model calls:
//! a draft strategy drives candidate selection, and canned rationale/remark
//! lines rotate with conversation length so repeated calls do not repeat
//! themselves verbatim. Full roster tables and draft-order rules live with
//! the caller; the engine only ever sees the candidates it is handed.

use std::sync::Arc;

use crate::protocol::{PickDecision, PickReaction, entity_name, entity_position};
use crate::service::ConversationLog;

/// Draft strategy archetypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Pass-catchers first, running backs late
    WideoutFirst,
    /// Running backs early and often
    GroundGame,
    /// Always the best candidate still on the board
    BestAvailable,
    /// Swings for ceiling, ignores floor
    HighVariance,
    /// Waits for candidates to fall past their market
    ValueHunter,
}

impl Strategy {
    /// Short label used in logs and transcripts
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::WideoutFirst => "wideout-first",
            Strategy::GroundGame => "ground-game",
            Strategy::BestAvailable => "best-available",
            Strategy::HighVariance => "high-variance",
            Strategy::ValueHunter => "value-hunter",
        }
    }

    fn position_preference(&self) -> &'static [&'static str] {
        match self {
            Strategy::WideoutFirst => &["WR", "TE", "QB"],
            Strategy::GroundGame => &["RB", "FB"],
            _ => &[],
        }
    }

    fn rationale_lines(&self) -> &'static [&'static str] {
        match self {
            Strategy::WideoutFirst => &[
                "keeps the air raid on schedule.",
                "is exactly the separator this offense needs.",
                "means we never have to run the ball again.",
            ],
            Strategy::GroundGame => &[
                "will wear defenses down four quarters at a time.",
                "is a bell cow, and bell cows win trenches.",
                "restores some respect for the running game.",
            ],
            Strategy::BestAvailable => &[
                "is simply the best name left on the board.",
                "tops every column on the sheet, easy call.",
                "was a projected round ahead of this slot.",
            ],
            Strategy::HighVariance => &[
                "is a lottery ticket worth every penny.",
                "could win a whole season single-handedly.",
                "is boom or bust, and we only write down the boom.",
            ],
            Strategy::ValueHunter => &[
                "fell way past the market, thanks for that.",
                "is free money at this point in the draft.",
                "costs nothing and returns everything.",
            ],
        }
    }

    fn remark_lines(&self) -> &'static [&'static str] {
        match self {
            Strategy::WideoutFirst => &[
                "enjoy the injury report on that one.",
                "grounded offenses finish grounded.",
            ],
            Strategy::GroundGame => &[
                "finesse picks fold in December.",
                "no blocking, no trophy.",
            ],
            Strategy::BestAvailable => &[
                "the sheet had that three rounds later.",
                "reaching already?",
            ],
            Strategy::HighVariance => &[
                "playing it safe is the real gamble.",
                "a floor pick, how thrilling.",
            ],
            Strategy::ValueHunter => &[
                "paid full retail for that, huh.",
                "the discount bin thanks you for passing.",
            ],
        }
    }
}

/// The voice behind one worker
pub trait Persona: Send + Sync {
    /// Display name shown in transcripts
    fn name(&self) -> &str;

    /// Pick from the candidates on the board
    fn decide(
        &self,
        candidates: &[String],
        roster: &[String],
        round: u32,
        log: &ConversationLog,
    ) -> PickDecision;

    /// React to another worker's pick
    fn react(
        &self,
        subject: &str,
        player: &str,
        round: u32,
        log: &ConversationLog,
    ) -> PickReaction;
}

/// Strategy-driven persona with optional rivalries
pub struct StrategyPersona {
    name: String,
    strategy: Strategy,
    rivals: Vec<String>,
}

impl StrategyPersona {
    /// Create a new persona
    pub fn new(name: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            name: name.into(),
            strategy,
            rivals: Vec::new(),
        }
    }

    /// Declare rival personas by display name; rivals always get a reaction.
    pub fn with_rivals(mut self, rivals: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.rivals = rivals.into_iter().map(Into::into).collect();
        self
    }

    /// The persona's strategy
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    fn select<'a>(&self, candidates: &'a [String]) -> Option<&'a String> {
        let preference = self.strategy.position_preference();
        if !preference.is_empty() {
            for pos in preference {
                if let Some(candidate) = candidates
                    .iter()
                    .find(|c| entity_position(c) == Some(*pos))
                {
                    return Some(candidate);
                }
            }
        }
        match self.strategy {
            Strategy::HighVariance => candidates.last(),
            Strategy::ValueHunter => candidates.get(1).or_else(|| candidates.first()),
            _ => candidates.first(),
        }
    }
}

impl Persona for StrategyPersona {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(
        &self,
        candidates: &[String],
        roster: &[String],
        round: u32,
        log: &ConversationLog,
    ) -> PickDecision {
        let open: Vec<String> = candidates
            .iter()
            .filter(|c| !roster.iter().any(|r| r == entity_name(c)))
            .cloned()
            .collect();

        let player = self
            .select(&open)
            .map(|c| entity_name(c).to_string())
            .unwrap_or_else(|| "nobody".to_string());

        let lines = self.strategy.rationale_lines();
        let line = lines[(round as usize + log.len()) % lines.len()];
        let banter = (log.len() % 2 == 0)
            .then(|| format!("{} stays undefeated.", self.strategy.label()));

        PickDecision {
            rationale: format!("{} {}", player, line),
            player,
            banter,
        }
    }

    fn react(
        &self,
        subject: &str,
        player: &str,
        round: u32,
        log: &ConversationLog,
    ) -> PickReaction {
        let rivalry = self.rivals.iter().any(|r| r == subject);
        let engaged = rivalry || (round as usize + log.len()) % 3 == 0;
        if !engaged {
            return PickReaction {
                engaged: false,
                remark: None,
            };
        }

        let lines = self.strategy.remark_lines();
        let line = lines[log.len() % lines.len()];
        PickReaction {
            engaged: true,
            remark: Some(format!("{} on {}? {}", subject, player, line)),
        }
    }
}

/// The stock five-persona room used by the demo, rivalries included.
pub fn default_roster() -> Vec<Arc<dyn Persona>> {
    vec![
        Arc::new(
            StrategyPersona::new("The Air Raid", Strategy::WideoutFirst)
                .with_rivals(["The Bulldozer"]),
        ),
        Arc::new(StrategyPersona::new("The Boardroom", Strategy::BestAvailable)
            .with_rivals(["The Moonshot"])),
        Arc::new(
            StrategyPersona::new("The Bulldozer", Strategy::GroundGame)
                .with_rivals(["The Air Raid"]),
        ),
        Arc::new(
            StrategyPersona::new("The Moonshot", Strategy::HighVariance)
                .with_rivals(["The Boardroom", "The Value Desk"]),
        ),
        Arc::new(
            StrategyPersona::new("The Value Desk", Strategy::ValueHunter)
                .with_rivals(["The Moonshot"]),
        ),
    ]
}
