use super::chain::{ChainBuilder, TransitionTable};
use super::config::GeneratorConfig;
use super::sampler::SequenceSampler;
use crate::error::GenerationAbortedError;
use crate::models::{PlayEvent, Song};
use rand::Rng;

/// Main playlist generator
pub struct PlaylistGenerator {
    config: GeneratorConfig,
}

impl PlaylistGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Build the transition table for an ascending history
    pub fn build_chain(&self, history: &[PlayEvent]) -> TransitionTable {
        ChainBuilder::new(self.config.session_gap, self.config.session_gap()).build(history)
    }

    /// Generate a playlist of the configured length starting at `seed`
    pub fn generate_playlist<R: Rng>(
        &self,
        table: &TransitionTable,
        seed: Song,
        rng: R,
    ) -> Result<Vec<Song>, GenerationAbortedError> {
        SequenceSampler::new(table, rng)
            .with_budgets(self.config.max_attempts_per_position, self.config.max_repairs)
            .generate(self.config.length, self.config.max_consecutive_by_same_artist, seed)
    }
}
