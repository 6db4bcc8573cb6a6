use facematch_vision::{Embedding, FaceEncoder};
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    distance::{self, Distance},
    policy::{MatchOutcome, MatchPolicy},
    storage::{EnrollmentStore, StoreError},
};

/// Failures that end a match operation without an outcome.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Infrastructure failure; the caller may retry.
    #[error("enrollment store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    /// A stored embedding does not fit the query's space.
    #[error("enrolled face {identity_key:?} has {actual} dimensions, query has {expected}")]
    DimensionMismatch {
        identity_key: String,
        expected: usize,
        actual: usize,
    },
    /// A stored embedding holds NaN or infinite components.
    #[error("enrolled face {identity_key:?} has a non-finite embedding")]
    NonFiniteEmbedding { identity_key: String },
}

/// Runs encode, load, score and decide for one image at a time.
///
/// Holds no state between calls: every call reads a fresh snapshot from the
/// store, so repeating a query against an unchanged catalog gives the same
/// outcome.
pub struct Matcher<E, S> {
    encoder: E,
    store: S,
    policy: MatchPolicy,
}

impl<E, S> Matcher<E, S>
where
    E: FaceEncoder,
    S: EnrollmentStore,
{
    pub fn new(encoder: E, store: S) -> Self {
        Self {
            encoder,
            store,
            policy: MatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn encoder_mut(&mut self) -> &mut E {
        &mut self.encoder
    }

    /// Match raw image bytes against every enrolled face.
    ///
    /// Encoding failures are outcomes, not errors; the store is not read
    /// when encoding fails.
    pub fn match_image(&mut self, image: &[u8]) -> Result<MatchOutcome, MatchError> {
        debug!("encoding query image ({} bytes)", image.len());
        let query = match self.encoder.encode(image) {
            Ok(query) => query,
            Err(reason) => {
                warn!("encoding failed: {}", reason);
                return Ok(MatchOutcome::EncodingFailed { reason });
            }
        };
        self.match_embedding(&query)
    }

    /// Match an already-encoded query.
    pub fn match_embedding(&self, query: &Embedding) -> Result<MatchOutcome, MatchError> {
        let records = self.store.load_all().map_err(|e| {
            error!("loading enrollments failed: {}", e);
            MatchError::from(e)
        })?;
        debug!("scoring against {} enrolled face(s)", records.len());

        if let Some(bad) = records
            .iter()
            .find(|r| r.embedding.iter().any(|v| !v.is_finite()))
        {
            error!(
                "enrolled face {:?} is corrupt: non-finite embedding",
                bad.identity_key
            );
            return Err(MatchError::NonFiniteEmbedding {
                identity_key: bad.identity_key.clone(),
            });
        }

        let scores: Vec<Distance> =
            distance::distances(query.view(), &records).map_err(|e| {
                let identity_key = records[e.index].identity_key.clone();
                error!(
                    "enrolled face {:?} is corrupt or incompatible: {}",
                    identity_key, e
                );
                MatchError::DimensionMismatch {
                    identity_key,
                    expected: e.expected,
                    actual: e.actual,
                }
            })?;

        let outcome = self.policy.decide(
            records
                .iter()
                .map(|r| r.identity_key.as_str())
                .zip(scores.iter().copied()),
        );
        match &outcome {
            MatchOutcome::Matched {
                identity_key,
                distance,
            } => info!(
                "matched {:?} at distance {:.4} (threshold {:.2})",
                identity_key, distance, self.policy.threshold
            ),
            MatchOutcome::NoMatch {
                nearest_distance: Some(d),
            } => info!(
                "no match; nearest distance {:.4} (threshold {:.2})",
                d, self.policy.threshold
            ),
            MatchOutcome::NoMatch {
                nearest_distance: None,
            } => info!("no match; nothing enrolled"),
            MatchOutcome::EncodingFailed { .. } => {}
        }
        Ok(outcome)
    }
}
