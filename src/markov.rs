use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{Error, Result};
use crate::extract::NoteEvent;
use crate::notes::QuarterLength;

/// The definition of all types that can be used in a `Chain`. Keys are ordered so that iteration,
/// and therefore seeded sampling, is the same from run to run.
pub trait Chainable: Ord + Clone + std::fmt::Debug {}
impl<T> Chainable for T where T: Ord + Clone + std::fmt::Debug {}

/// An order-N successor table: each state (the last `order` values) maps to every value observed
/// right after it, duplicates included, so that sampling uniformly from the list reproduces the
/// observed frequencies.
#[derive(Debug, Clone)]
pub struct Chain<T: Chainable> {
    map: BTreeMap<Vec<T>, Vec<T>>,
    /// Every recorded successor across all states, in observation order.
    successors: Vec<T>,
    order: usize,
}

impl<T: Chainable> Chain<T> {
    pub fn of_order(order: usize) -> Chain<T> {
        Chain {
            map: BTreeMap::new(),
            successors: vec![],
            order,
        }
    }

    pub fn get_order(&self) -> usize {
        self.order
    }

    /// Record that `next` followed `state`.
    pub fn insert(&mut self, state: Vec<T>, next: T) {
        self.successors.push(next.clone());
        self.map.entry(state).or_default().push(next);
    }

    pub fn successors_of(&self, state: &[T]) -> Option<&[T]> {
        self.map
            .get(state)
            .map(Vec::as_slice)
            .filter(|next| !next.is_empty())
    }

    pub fn all_successors(&self) -> &[T] {
        &self.successors
    }

    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    /// Pick a successor of `state` uniformly from its observed list, or `None` when the state was
    /// never seen.
    pub fn sample<R: Rng + ?Sized>(&self, state: &[T], rng: &mut R) -> Option<T> {
        self.successors_of(state)
            .and_then(|next| next.choose(rng))
            .cloned()
    }

    /// Return some statistical information about the Markov chain.
    pub fn get_stats(&self) -> ChainStats {
        let total_states = self.map.len();
        let mut total_choices = 0;
        let mut deterministic_states = 0;
        for next in self.map.values() {
            total_choices += next.len();
            if next.iter().all(|x| *x == next[0]) {
                deterministic_states += 1;
            }
        }
        ChainStats {
            order: self.order,
            total_states,
            total_choices,
            deterministic_states,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainStats {
    pub order: usize,
    pub total_states: usize,
    pub total_choices: usize,
    /// States whose every observed successor is the same value.
    pub deterministic_states: usize,
}

impl std::fmt::Display for ChainStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let states = self.total_states.max(1) as f32;
        write!(
            f,
            "Order: {}, Total states: {}, deterministic states: {} ({:.2}%), average choices per state: {:.2}",
            self.order,
            self.total_states,
            self.deterministic_states,
            100.0 * (self.deterministic_states as f32 / states),
            self.total_choices as f32 / states,
        )
    }
}

/// Duration used when the model has never seen one.
pub const DEFAULT_DURATION: QuarterLength = QuarterLength::QUARTER;

/// Degree and duration successor tables built from one input sequence. Read-only once built.
#[derive(Debug, Clone)]
pub struct TransitionModel {
    degrees: Chain<u8>,
    durations: Chain<QuarterLength>,
    scale_degrees: Vec<u8>,
}

impl TransitionModel {
    /// Slide a window of `order + 1` notes over `events`. A window is recorded only when every note
    /// in it, successor included, has a degree in `scale_degrees`; it then contributes its last
    /// degree under the preceding `order` degrees and its last duration under the preceding
    /// `order` durations.
    pub fn build(events: &[NoteEvent], order: usize, scale_degrees: &[u8]) -> TransitionModel {
        let mut degrees = Chain::of_order(order);
        let mut durations = Chain::of_order(order);

        for window in events.windows(order + 1) {
            let window_degrees = window
                .iter()
                .map(|event| event.degree.in_scale())
                .collect::<Option<Vec<_>>>()
                .filter(|window| window.iter().all(|d| scale_degrees.contains(d)));
            let (Some(mut window_degrees), Some((last, state))) =
                (window_degrees, window.split_last())
            else {
                continue;
            };

            if let Some(next) = window_degrees.pop() {
                degrees.insert(window_degrees, next);
            }
            durations.insert(
                state.iter().map(|event| event.duration).collect(),
                last.duration,
            );
        }

        TransitionModel {
            degrees,
            durations,
            scale_degrees: scale_degrees.to_vec(),
        }
    }

    pub fn order(&self) -> usize {
        self.degrees.get_order()
    }

    pub fn scale_degrees(&self) -> &[u8] {
        &self.scale_degrees
    }

    pub fn degree_chain(&self) -> &Chain<u8> {
        &self.degrees
    }

    pub fn duration_chain(&self) -> &Chain<QuarterLength> {
        &self.durations
    }

    /// Fails only when the model can never produce a degree: nothing was recorded and there are no
    /// scale degrees to fall back on.
    pub fn validate(&self) -> Result<()> {
        if self.degrees.is_empty() && self.scale_degrees.is_empty() {
            return Err(Error::InvalidModel);
        }
        Ok(())
    }

    /// Sample the degree following `history`. Unseen histories fall back to a uniform choice over
    /// the scale degrees, not over the recorded successors.
    pub fn sample_degree<R: Rng + ?Sized>(&self, history: &[u8], rng: &mut R) -> Result<u8> {
        if let Some(degree) = self.degrees.sample(history, rng) {
            return Ok(degree);
        }
        self.scale_degrees
            .choose(rng)
            .or_else(|| self.degrees.all_successors().choose(rng))
            .copied()
            .ok_or(Error::InvalidModel)
    }

    /// Sample the duration following `history`. Unseen histories fall back to a uniform choice over
    /// every recorded duration, and to [`DEFAULT_DURATION`] when nothing was recorded.
    pub fn sample_duration<R: Rng + ?Sized>(
        &self,
        history: &[QuarterLength],
        rng: &mut R,
    ) -> QuarterLength {
        self.durations
            .sample(history, rng)
            .or_else(|| self.durations.all_successors().choose(rng).copied())
            .unwrap_or(DEFAULT_DURATION)
    }

    pub fn stats(&self) -> (ChainStats, ChainStats) {
        (self.degrees.get_stats(), self.durations.get_stats())
    }
}
