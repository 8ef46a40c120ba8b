//! Scroll trace generation
//!
//! Produces the sequence of window offsets a list view would request while a
//! user scrolls. Every offset is page aligned and leaves room for a full page
//! before the end of the source.

use crate::models::Pattern;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Probability that a jumpy trace leaves the current position
const JUMP_PROBABILITY: f64 = 0.1;

/// Pages covered by one oscillation leg
const OSCILLATION_PAGES: usize = 6;

/// Parameters for one trace
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub rows: usize,
    pub page: usize,
    pub requests: usize,
    pub pattern: Pattern,
    pub seed: u64,
}

pub struct TraceGenerator {
    config: TraceConfig,
    rng: StdRng,
}

impl TraceGenerator {
    pub fn new(config: TraceConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    /// Number of distinct page-aligned offsets
    fn pages(&self) -> usize {
        let page = self.config.page.max(1);
        (self.config.rows / page).max(1)
    }

    fn offset(&self, page_index: usize) -> usize {
        page_index * self.config.page
    }

    /// Generate the full trace of request offsets
    pub fn generate(&mut self) -> Vec<usize> {
        let pages = self.pages();
        let mut trace = Vec::with_capacity(self.config.requests);
        let mut position = match self.config.pattern {
            Pattern::Up => pages - 1,
            _ => 0,
        };
        // Oscillation state: pages left in the current leg and its direction.
        let mut leg = OSCILLATION_PAGES;
        let mut descending = true;

        for _ in 0..self.config.requests {
            trace.push(self.offset(position));
            position = match self.config.pattern {
                Pattern::Down => (position + 1) % pages,
                Pattern::Up => position.checked_sub(1).unwrap_or(pages - 1),
                Pattern::Jumpy => {
                    if self.rng.gen_bool(JUMP_PROBABILITY) {
                        self.rng.gen_range(0..pages)
                    } else {
                        (position + 1) % pages
                    }
                }
                Pattern::Oscillate => {
                    if leg == 0 {
                        descending = !descending;
                        // Down legs run one page longer so the trace drifts.
                        leg = if descending {
                            OSCILLATION_PAGES
                        } else {
                            OSCILLATION_PAGES - 1
                        };
                    }
                    leg -= 1;
                    if descending {
                        (position + 1) % pages
                    } else {
                        position.saturating_sub(1)
                    }
                }
            };
        }
        trace
    }
}
