//! Presentation-facing view of the game, folded from [`ConnectionEvent`]s.

use massclick_common::PlayerSession;

use crate::manager::ConnectionEvent;

const BASE_STAGES: [(u64, &str); 7] = [
    (0, "Primordial Spiral"),
    (10, "Awakening Swirl"),
    (25, "Living Helix"),
    (50, "Cosmic Spiral"),
    (100, "Flowing Entity"),
    (200, "Radiant Vortex"),
    (500, "Transcendent Spiral"),
];

const GENERATED_STAGES: usize = 50;

const MILESTONE_DESCRIPTION: &str = "The collective energy has triggered a new stage of evolution!";

/// One step of the shared object's evolution, reached when the global click
/// total passes `threshold`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvolutionStage {
    pub index: usize,
    pub threshold: u64,
    pub description: String,
}

/// The full stage table: the hand-named stages, then generated ones whose
/// gaps grow by 500 every seven stages.
pub fn evolution_stages() -> Vec<EvolutionStage> {
    let mut stages: Vec<EvolutionStage> = BASE_STAGES
        .iter()
        .enumerate()
        .map(|(index, &(threshold, description))| EvolutionStage {
            index,
            threshold,
            description: description.to_string(),
        })
        .collect();

    for _ in 0..GENERATED_STAGES {
        let index = stages.len();
        let previous = stages[index - 1].threshold;
        stages.push(EvolutionStage {
            index,
            threshold: previous + (index as u64 / 7 + 1) * 500,
            description: format!("Cosmic Spiral {}", index + 1),
        });
    }
    stages
}

/// Announcement for a newly reached stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Milestone {
    pub stage: usize,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct Scoreboard {
    stages: Vec<EvolutionStage>,
    local_clicks: u64,
    total_clicks: u64,
    player_count: u32,
    ranking: Vec<PlayerSession>,
    connected: bool,
    has_baseline: bool,
}

impl Default for Scoreboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Scoreboard {
    pub fn new() -> Self {
        Self {
            stages: evolution_stages(),
            local_clicks: 0,
            total_clicks: 0,
            player_count: 0,
            ranking: Vec::new(),
            connected: false,
            has_baseline: false,
        }
    }

    /// Count a click the user made, whether or not it reaches the server.
    pub fn record_local_click(&mut self) {
        self.local_clicks += 1;
    }

    /// Fold one event in. Returns a milestone when a state update moves the
    /// total into a higher stage; the first state only sets the baseline.
    pub fn apply(&mut self, event: &ConnectionEvent) -> Option<Milestone> {
        match event {
            ConnectionEvent::Connected { .. } => self.connected = true,
            ConnectionEvent::Disconnected { .. } => self.connected = false,
            ConnectionEvent::PlayerCountUpdate(count) => self.player_count = *count,
            ConnectionEvent::StateUpdate(state) => {
                let before = self.stage().index;
                self.total_clicks = state.total_clicks;
                self.player_count = state.active_players;
                self.ranking = state.ranking().into_iter().cloned().collect();

                if !self.has_baseline {
                    self.has_baseline = true;
                    return None;
                }
                let reached = self.stage();
                if reached.index > before {
                    return Some(Milestone {
                        stage: reached.index,
                        title: format!("Evolution: {}", reached.description),
                        description: MILESTONE_DESCRIPTION.to_string(),
                    });
                }
            }
        }
        None
    }

    /// Highest stage whose threshold the total has reached.
    pub fn stage(&self) -> &EvolutionStage {
        self.stages
            .iter()
            .rev()
            .find(|stage| self.total_clicks >= stage.threshold)
            .unwrap_or(&self.stages[0])
    }

    pub fn next_stage(&self) -> Option<&EvolutionStage> {
        self.stages.get(self.stage().index + 1)
    }

    /// Percent of the way from the current stage to the next, `0.0..=100.0`.
    pub fn progress(&self) -> f64 {
        let Some(next) = self.next_stage() else {
            return 100.0;
        };
        let current = self.stage().threshold;
        let range = (next.threshold - current) as f64;
        let done = (self.total_clicks - current) as f64;
        (done / range * 100.0).clamp(0.0, 100.0)
    }

    pub fn local_clicks(&self) -> u64 {
        self.local_clicks
    }

    pub fn total_clicks(&self) -> u64 {
        self.total_clicks
    }

    pub fn player_count(&self) -> u32 {
        self.player_count
    }

    /// Players by clicks, highest first.
    pub fn ranking(&self) -> &[PlayerSession] {
        &self.ranking
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
