use crate::CoreError;
use std::fmt;

/// Progress of one layer chain through the build cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Unbuilt,
    Locking,
    CacheHit,
    CacheMiss,
    Extracting,
    Compressing,
    Caching,
    Done,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildPhase::Unbuilt => "unbuilt",
            BuildPhase::Locking => "locking",
            BuildPhase::CacheHit => "cache-hit",
            BuildPhase::CacheMiss => "cache-miss",
            BuildPhase::Extracting => "extracting",
            BuildPhase::Compressing => "compressing",
            BuildPhase::Caching => "caching",
            BuildPhase::Done => "done",
        };
        f.write_str(name)
    }
}

pub fn validate_transition(from: BuildPhase, to: BuildPhase) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (BuildPhase::Unbuilt, BuildPhase::Locking)
            | (
                BuildPhase::Locking,
                BuildPhase::CacheHit | BuildPhase::CacheMiss
            )
            | (BuildPhase::CacheMiss, BuildPhase::Extracting)
            | (BuildPhase::Extracting, BuildPhase::Compressing)
            | (BuildPhase::Compressing, BuildPhase::Caching)
            | (BuildPhase::CacheHit | BuildPhase::Caching, BuildPhase::Done)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use BuildPhase::*;
        for (from, to) in [
            (Unbuilt, Locking),
            (Locking, CacheHit),
            (CacheHit, Done),
            (Locking, CacheMiss),
            (CacheMiss, Extracting),
            (Extracting, Compressing),
            (Compressing, Caching),
            (Caching, Done),
        ] {
            assert!(validate_transition(from, to).is_ok(), "{from} -> {to}");
        }
    }

    #[test]
    fn invalid_transitions() {
        use BuildPhase::*;
        assert!(validate_transition(Unbuilt, Extracting).is_err());
        assert!(validate_transition(CacheHit, Compressing).is_err());
        assert!(validate_transition(Extracting, Done).is_err());
        assert!(validate_transition(Done, Locking).is_err());
        assert!(validate_transition(Done, Done).is_err());
    }

    #[test]
    fn transition_error_names_phases() {
        let err = validate_transition(BuildPhase::Done, BuildPhase::Extracting).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid build transition: done -> extracting"
        );
    }
}
