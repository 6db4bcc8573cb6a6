use facematch_vision::EncodingFailure;
use serde::{Deserialize, Serialize};

use crate::distance::Distance;

/// Largest distance (exclusive) at which two embeddings are the same identity.
pub const MATCH_THRESHOLD: Distance = 0.6;

/// Terminal result of one matching operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched {
        identity_key: String,
        distance: Distance,
    },
    /// `nearest_distance` is `None` when nothing was enrolled.
    NoMatch { nearest_distance: Option<Distance> },
    EncodingFailed { reason: EncodingFailure },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }

    pub fn identity_key(&self) -> Option<&str> {
        match self {
            MatchOutcome::Matched { identity_key, .. } => Some(identity_key),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchPolicy {
    pub threshold: Distance,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            threshold: MATCH_THRESHOLD,
        }
    }
}

impl MatchPolicy {
    pub fn new(threshold: Distance) -> Self {
        Self { threshold }
    }

    /// Pick the nearest candidate and apply the threshold.
    ///
    /// Ties on the minimum go to the earliest candidate. A distance equal to
    /// the threshold is not a match. Distances must be finite.
    pub fn decide<'a, I>(&self, candidates: I) -> MatchOutcome
    where
        I: IntoIterator<Item = (&'a str, Distance)>,
    {
        let nearest = candidates
            .into_iter()
            .min_by(|(_, a), (_, b)| a.total_cmp(b));

        match nearest {
            None => MatchOutcome::NoMatch {
                nearest_distance: None,
            },
            Some((key, distance)) if distance < self.threshold => MatchOutcome::Matched {
                identity_key: key.to_string(),
                distance,
            },
            Some((_, distance)) => MatchOutcome::NoMatch {
                nearest_distance: Some(distance),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_no_match_without_distance() {
        let outcome = MatchPolicy::default().decide(Vec::<(&str, f32)>::new());
        assert_eq!(
            outcome,
            MatchOutcome::NoMatch {
                nearest_distance: None
            }
        );
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let policy = MatchPolicy::default();
        assert_eq!(
            policy.decide([("alice.jpg", 0.6)]),
            MatchOutcome::NoMatch {
                nearest_distance: Some(0.6)
            }
        );
        assert_eq!(
            policy.decide([("alice.jpg", 0.5999)]),
            MatchOutcome::Matched {
                identity_key: "alice.jpg".into(),
                distance: 0.5999
            }
        );
    }

    #[test]
    fn test_picks_minimum() {
        let outcome =
            MatchPolicy::default().decide([("a", 0.9), ("b", 0.31), ("c", 0.45), ("d", 1.7)]);
        assert_eq!(outcome.identity_key(), Some("b"));
    }

    #[test]
    fn test_tie_goes_to_first() {
        let candidates = [("z", 0.8), ("first", 0.2), ("second", 0.2), ("third", 0.2)];
        for _ in 0..10 {
            let outcome = MatchPolicy::default().decide(candidates);
            assert_eq!(outcome.identity_key(), Some("first"));
        }
    }

    #[test]
    fn test_no_match_reports_nearest() {
        let outcome = MatchPolicy::default().decide([("a", 1.2), ("b", 0.75)]);
        assert_eq!(
            outcome,
            MatchOutcome::NoMatch {
                nearest_distance: Some(0.75)
            }
        );
    }

    #[test]
    fn test_custom_threshold() {
        let policy = MatchPolicy::new(0.4);
        assert!(!policy.decide([("a", 0.5)]).is_match());
        assert!(MatchPolicy::default().decide([("a", 0.5)]).is_match());
    }

    #[test]
    fn test_outcome_json() {
        let json = serde_json::to_value(MatchOutcome::Matched {
            identity_key: "bob.png".into(),
            distance: 0.25,
        })
        .unwrap();
        assert_eq!(json["outcome"], "matched");
        assert_eq!(json["identity_key"], "bob.png");

        let json = serde_json::to_value(MatchOutcome::EncodingFailed {
            reason: EncodingFailure::NoFaceDetected,
        })
        .unwrap();
        assert_eq!(json["outcome"], "encoding_failed");
        assert_eq!(json["reason"]["kind"], "no_face_detected");
    }
}
