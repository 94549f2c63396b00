use serde::{Deserialize, Serialize};

/// Where a grouping decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Heuristic,
    Confirmed,
}

impl std::fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Heuristic => write!(f, "heuristic"),
            Self::Confirmed => write!(f, "confirmed"),
        }
    }
}

impl std::str::FromStr for DecisionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heuristic" => Ok(Self::Heuristic),
            "confirmed" => Ok(Self::Confirmed),
            _ => Err(format!("unknown decision source: {s}")),
        }
    }
}

/// Outcome of one grouping decision, whatever produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<T> {
    /// Computed locally from names, paths and timestamps.
    Heuristic(T),
    /// Returned (and parsed) from the external decision service.
    Confirmed(T),
    /// The external service failed, timed out, or answered unusably.
    Unavailable,
}

impl<T> Decision<T> {
    /// An external answer beats the heuristic; anything else leaves the
    /// heuristic in place.
    pub fn resolve(self, heuristic: T) -> (T, DecisionSource) {
        match self {
            Self::Confirmed(value) => (value, DecisionSource::Confirmed),
            Self::Heuristic(value) => (value, DecisionSource::Heuristic),
            Self::Unavailable => (heuristic, DecisionSource::Heuristic),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Decision<U> {
        match self {
            Self::Heuristic(value) => Decision::Heuristic(f(value)),
            Self::Confirmed(value) => Decision::Confirmed(f(value)),
            Self::Unavailable => Decision::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_overrides_heuristic() {
        assert_eq!(
            Decision::Confirmed(7).resolve(1),
            (7, DecisionSource::Confirmed)
        );
    }

    #[test]
    fn unavailable_falls_back_to_heuristic() {
        assert_eq!(
            Decision::<i32>::Unavailable.resolve(1),
            (1, DecisionSource::Heuristic)
        );
    }

    #[test]
    fn map_keeps_the_source() {
        let decision = Decision::Confirmed(2).map(|v| v * 10);
        assert!(decision.is_confirmed());
        assert_eq!(decision, Decision::Confirmed(20));
    }
}
