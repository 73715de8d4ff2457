//! Drawing one panel from a distribution.
//!
//! Seeded draws are reproducible: a verification seed string is hashed with
//! SHA-256 and the first eight bytes seed a `StdRng`. Unseeded draws come from
//! the operating system's CSPRNG and cannot be replayed.

use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::distribution::EPSILON;
use crate::types::Panel;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    #[error("No panels available to sample from")]
    EmptyPanels,

    #[error("Probabilities do not match the number of panels ({panels} panels, {probabilities} probabilities)")]
    LengthMismatch { panels: usize, probabilities: usize },
}

/// One draw from the distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleDraw {
    pub selected_index: usize,
    pub selected_panel: Panel,

    /// The uniform value in `[0, 1)` that decided the draw
    pub random_value: f64,
}

/// Derive a 64-bit RNG seed from a verification seed string.
pub fn derive_random_seed(seed: &str) -> u64 {
    let digest = Sha256::digest(seed.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Samples panels according to their probabilities.
#[derive(Debug, Clone)]
pub struct PanelSampler {
    panels: Vec<Panel>,
    probabilities: Vec<f64>,
    seed: Option<u64>,
}

impl PanelSampler {
    /// Probabilities need not sum to one; they are normalized here.
    pub fn new(panels: Vec<Panel>, probabilities: &[f64]) -> Self {
        Self {
            panels,
            probabilities: normalize(probabilities),
            seed: None,
        }
    }

    /// Use a deterministic generator seeded with `seed`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Use a deterministic generator derived from a verification seed string.
    pub fn with_verification_seed(self, seed: &str) -> Self {
        self.with_seed(derive_random_seed(seed))
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    /// Draw one panel.
    ///
    /// With a seed, every call returns the same draw.
    pub fn sample(&self) -> Result<SampleDraw, SamplingError> {
        self.validate()?;
        match self.seed {
            Some(seed) => Ok(self.draw(&mut StdRng::seed_from_u64(seed))),
            None => Ok(self.draw(&mut OsRng)),
        }
    }

    /// Draw `count` panels with replacement.
    ///
    /// A seeded sampler uses a single generator stream, so the sequence as a
    /// whole is reproducible while its draws are independent of each other.
    pub fn sample_multiple(&self, count: usize) -> Result<Vec<SampleDraw>, SamplingError> {
        self.validate()?;
        match self.seed {
            Some(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                Ok((0..count).map(|_| self.draw(&mut rng)).collect())
            }
            None => Ok((0..count).map(|_| self.draw(&mut OsRng)).collect()),
        }
    }

    /// Running sums of the normalized probabilities.
    pub fn cumulative_distribution(&self) -> Vec<f64> {
        self.probabilities
            .iter()
            .scan(0.0, |sum, p| {
                *sum += p;
                Some(*sum)
            })
            .collect()
    }

    fn validate(&self) -> Result<(), SamplingError> {
        if self.panels.is_empty() {
            return Err(SamplingError::EmptyPanels);
        }
        if self.panels.len() != self.probabilities.len() {
            return Err(SamplingError::LengthMismatch {
                panels: self.panels.len(),
                probabilities: self.probabilities.len(),
            });
        }
        Ok(())
    }

    fn draw<R: RngCore>(&self, rng: &mut R) -> SampleDraw {
        let random_value: f64 = rng.gen();
        let selected_index = self.select_index(random_value);
        SampleDraw {
            selected_index,
            selected_panel: self.panels[selected_index].clone(),
            random_value,
        }
    }

    /// First index whose cumulative probability exceeds `r`; the last panel otherwise.
    fn select_index(&self, r: f64) -> usize {
        let mut cumulative = 0.0;
        for (index, p) in self.probabilities.iter().enumerate() {
            cumulative += p;
            if r < cumulative {
                return index;
            }
        }
        self.panels.len() - 1
    }
}

fn normalize(probabilities: &[f64]) -> Vec<f64> {
    if probabilities.is_empty() {
        return Vec::new();
    }

    let clamped: Vec<f64> = probabilities.iter().map(|p| p.max(0.0)).collect();
    let total: f64 = clamped.iter().sum();

    if (total - 1.0).abs() < EPSILON {
        clamped
    } else if total > EPSILON {
        clamped.iter().map(|p| p / total).collect()
    } else {
        vec![1.0 / clamped.len() as f64; clamped.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn two_panels() -> Vec<Panel> {
        vec![Panel::new([1, 2, 3]), Panel::new([4, 5, 6])]
    }

    #[test]
    fn test_empty_panels_error() {
        let sampler = PanelSampler::new(vec![], &[]);
        assert_eq!(sampler.sample(), Err(SamplingError::EmptyPanels));
    }

    #[test]
    fn test_length_mismatch_error() {
        let sampler = PanelSampler::new(two_panels(), &[1.0]);
        assert_eq!(
            sampler.sample(),
            Err(SamplingError::LengthMismatch {
                panels: 2,
                probabilities: 1
            })
        );
    }

    #[test]
    fn test_normalizes_and_falls_back_to_uniform() {
        let sampler = PanelSampler::new(two_panels(), &[2.0, 6.0]);
        assert_eq!(sampler.probabilities(), &[0.25, 0.75]);

        let zeros = PanelSampler::new(two_panels(), &[0.0, 0.0]);
        assert_eq!(zeros.probabilities(), &[0.5, 0.5]);
    }

    #[test]
    fn test_cumulative_distribution() {
        let sampler = PanelSampler::new(two_panels(), &[0.6, 0.4]);
        let cdf = sampler.cumulative_distribution();
        assert_eq!(cdf.len(), 2);
        assert!((cdf[0] - 0.6).abs() < 1e-12);
        assert!((cdf[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_select_index_boundaries() {
        let sampler = PanelSampler::new(two_panels(), &[0.6, 0.4]);
        assert_eq!(sampler.select_index(0.0), 0);
        assert_eq!(sampler.select_index(0.5999), 0);
        assert_eq!(sampler.select_index(0.6), 1);
        // a draw the cumulative sum never exceeds lands on the last panel
        assert_eq!(sampler.select_index(1.0), 1);
    }

    #[test]
    fn test_same_seed_same_draw() {
        let sampler = PanelSampler::new(two_panels(), &[0.6, 0.4]).with_verification_seed("assembly-2026");
        let first = sampler.sample().unwrap();
        let second = sampler.sample().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.selected_index, usize::from(first.random_value >= 0.6));
    }

    #[test]
    fn test_derive_random_seed_is_stable() {
        assert_eq!(derive_random_seed("abc"), derive_random_seed("abc"));
        assert_ne!(derive_random_seed("abc"), derive_random_seed("abd"));
        // SHA-256("abc") starts with ba 78 16 bf 8f 01 cf ea
        assert_eq!(derive_random_seed("abc"), 0xeacf018fbf1678ba);
    }

    #[test]
    fn test_sample_multiple_is_one_stream() {
        let sampler = PanelSampler::new(two_panels(), &[0.5, 0.5]).with_seed(42);
        let draws = sampler.sample_multiple(8).unwrap();
        assert_eq!(draws.len(), 8);
        assert_eq!(draws, sampler.sample_multiple(8).unwrap());
        // the first draw of the stream is the single-sample draw
        assert_eq!(draws[0], sampler.sample().unwrap());
        assert!(draws.iter().any(|d| d.random_value != draws[0].random_value));
    }

    #[test]
    fn test_unseeded_draw_is_in_range() {
        let sampler = PanelSampler::new(two_panels(), &[0.6, 0.4]);
        let draw = sampler.sample().unwrap();
        assert!((0.0..1.0).contains(&draw.random_value));
        assert!(draw.selected_index < 2);
    }

    proptest! {
        #[test]
        fn prop_cdf_is_monotone_and_ends_at_one(
            weights in prop::collection::vec(0.0f64..10.0, 1..20)
        ) {
            let panels: Vec<Panel> = (0..weights.len() as u64).map(|i| Panel::new([i])).collect();
            let sampler = PanelSampler::new(panels, &weights);
            let cdf = sampler.cumulative_distribution();
            prop_assert!(cdf.windows(2).all(|w| w[0] <= w[1]));
            prop_assert!((cdf[cdf.len() - 1] - 1.0).abs() < 1e-9);
        }

        #[test]
        fn prop_seeded_draw_is_reproducible(
            weights in prop::collection::vec(0.0f64..10.0, 1..20),
            seed in any::<u64>()
        ) {
            let panels: Vec<Panel> = (0..weights.len() as u64).map(|i| Panel::new([i])).collect();
            let sampler = PanelSampler::new(panels, &weights).with_seed(seed);
            let first = sampler.sample().unwrap();
            prop_assert!(first.selected_index < weights.len());
            prop_assert_eq!(first, sampler.sample().unwrap());
        }

        #[test]
        fn prop_selected_panel_has_positive_weight(
            weights in prop::collection::vec(0.0f64..10.0, 2..20),
            seed in any::<u64>()
        ) {
            prop_assume!(weights.iter().sum::<f64>() > 1e-6);
            let panels: Vec<Panel> = (0..weights.len() as u64).map(|i| Panel::new([i])).collect();
            let sampler = PanelSampler::new(panels, &weights).with_seed(seed);
            let draw = sampler.sample().unwrap();
            let last = weights.len() - 1;
            prop_assert!(sampler.probabilities()[draw.selected_index] > 0.0 || draw.selected_index == last);
        }
    }
}
