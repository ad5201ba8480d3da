//! Aggregate state finalizers
//!
//! An aggregate monitor's state is derived from its members' states using
//! its [`AggregationRule`] and the configured [`AggregationPolicy`]
//! precedence (default Fail > Warning > Unknown > None > Pass).

use serde::{Deserialize, Serialize};

use crate::error::DefinitionError;
use crate::models::MonitorState;

/// Rule an aggregate monitor applies to its members
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "camelCase")]
pub enum AggregationRule {
    /// The worst member state wins
    #[default]
    WorstOf,
    /// The best state that at least `state_threshold` percent of the
    /// (non-None) members are at or better than
    Percentage { state_threshold: f64 },
}

impl AggregationRule {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            AggregationRule::WorstOf => Ok(()),
            AggregationRule::Percentage { state_threshold } => {
                if *state_threshold > 0.0 && *state_threshold <= 100.0 {
                    Ok(())
                } else {
                    Err(format!(
                        "state_threshold must be in (0, 100], got {}",
                        state_threshold
                    ))
                }
            }
        }
    }
}

/// State precedence used by every finalizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationPolicy {
    /// States ordered worst first
    precedence: [MonitorState; 5],
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            precedence: MonitorState::ALL,
        }
    }
}

impl AggregationPolicy {
    /// Build a policy from a worst-first ordering that must name every state once
    pub fn from_precedence(order: &[MonitorState]) -> Result<Self, DefinitionError> {
        if order.len() != MonitorState::ALL.len() {
            return Err(DefinitionError::InvalidPrecedence(format!(
                "expected {} states, got {}",
                MonitorState::ALL.len(),
                order.len()
            )));
        }

        let mut precedence = MonitorState::ALL;
        for (i, state) in order.iter().enumerate() {
            if order[..i].contains(state) {
                return Err(DefinitionError::InvalidPrecedence(format!(
                    "state '{}' listed twice",
                    state
                )));
            }
            precedence[i] = *state;
        }

        Ok(Self { precedence })
    }

    pub fn precedence(&self) -> &[MonitorState] {
        &self.precedence
    }

    /// 0 is the worst state
    pub fn rank(&self, state: MonitorState) -> usize {
        self.precedence
            .iter()
            .position(|s| *s == state)
            .unwrap_or(self.precedence.len())
    }

    pub fn worst_of(&self, states: &[MonitorState]) -> Option<MonitorState> {
        states.iter().copied().min_by_key(|s| self.rank(*s))
    }

    /// Compute an aggregate state. A childless aggregate is `Unknown`.
    pub fn aggregate(&self, rule: &AggregationRule, members: &[MonitorState]) -> MonitorState {
        if members.is_empty() {
            return MonitorState::Unknown;
        }

        match rule {
            AggregationRule::WorstOf => self.worst_of(members).unwrap_or(MonitorState::Unknown),
            AggregationRule::Percentage { state_threshold } => {
                let mut filtered: Vec<MonitorState> = members
                    .iter()
                    .copied()
                    .filter(|s| *s != MonitorState::None)
                    .collect();
                if filtered.is_empty() {
                    return MonitorState::None;
                }

                filtered.sort_by_key(|s| self.rank(*s));
                let size = filtered.len();
                let count = ((state_threshold * size as f64) / 100.0).ceil() as usize;
                let index = size - count.clamp(1, size);
                filtered[index]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MonitorState::*;

    #[test]
    fn test_worst_of_default_precedence() {
        let policy = AggregationPolicy::default();
        let rule = AggregationRule::WorstOf;

        assert_eq!(policy.aggregate(&rule, &[Pass, Pass]), Pass);
        assert_eq!(policy.aggregate(&rule, &[Pass, None]), None);
        assert_eq!(policy.aggregate(&rule, &[None, Unknown, Pass]), Unknown);
        assert_eq!(policy.aggregate(&rule, &[Unknown, Warning]), Warning);
        assert_eq!(policy.aggregate(&rule, &[Warning, Fail, Pass]), Fail);
    }

    #[test]
    fn test_childless_aggregate_is_unknown() {
        let policy = AggregationPolicy::default();
        assert_eq!(policy.aggregate(&AggregationRule::WorstOf, &[]), Unknown);
        assert_eq!(
            policy.aggregate(&AggregationRule::Percentage { state_threshold: 80.0 }, &[]),
            Unknown
        );
    }

    #[test]
    fn test_percentage_rule() {
        let policy = AggregationPolicy::default();
        let strict = AggregationRule::Percentage { state_threshold: 80.0 };
        let lenient = AggregationRule::Percentage { state_threshold: 50.0 };
        let members = [Fail, Warning, Pass, Pass];

        assert_eq!(policy.aggregate(&strict, &members), Fail);
        assert_eq!(policy.aggregate(&lenient, &members), Pass);
        assert_eq!(policy.aggregate(&lenient, &[Fail]), Fail);
    }

    #[test]
    fn test_percentage_ignores_none_members() {
        let policy = AggregationPolicy::default();
        let rule = AggregationRule::Percentage { state_threshold: 100.0 };

        assert_eq!(policy.aggregate(&rule, &[None, Pass, Pass]), Pass);
        assert_eq!(policy.aggregate(&rule, &[None, None]), None);
    }

    #[test]
    fn test_custom_precedence() {
        let policy =
            AggregationPolicy::from_precedence(&[Unknown, Fail, Warning, None, Pass]).unwrap();
        assert_eq!(
            policy.aggregate(&AggregationRule::WorstOf, &[Fail, Unknown]),
            Unknown
        );
    }

    #[test]
    fn test_invalid_precedence() {
        assert!(AggregationPolicy::from_precedence(&[Fail, Warning]).is_err());
        assert!(AggregationPolicy::from_precedence(&[Fail, Fail, Unknown, None, Pass]).is_err());
    }

    #[test]
    fn test_rule_deserialize() {
        let rule: AggregationRule =
            serde_json::from_str(r#"{"algorithm": "percentage", "state_threshold": 80.0}"#)
                .unwrap();
        assert_eq!(rule, AggregationRule::Percentage { state_threshold: 80.0 });

        let rule: AggregationRule = serde_json::from_str(r#"{"algorithm": "worstOf"}"#).unwrap();
        assert_eq!(rule, AggregationRule::WorstOf);
    }

    #[test]
    fn test_rule_validate() {
        assert!(AggregationRule::Percentage { state_threshold: 0.0 }.validate().is_err());
        assert!(AggregationRule::Percentage { state_threshold: 101.0 }.validate().is_err());
        assert!(AggregationRule::Percentage { state_threshold: 100.0 }.validate().is_ok());
    }
}
