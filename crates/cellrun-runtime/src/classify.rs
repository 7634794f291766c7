//! What the runtime does with a fault escaping an action.

use cellrun_service::ExecutionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Tear down and let the host run the runtime again.
    Restart,
    /// Tear down for good.
    Stop,
    /// Hand the error to the host unchanged.
    Propagate,
}

pub fn classify(err: &ExecutionError) -> Disposition {
    match err {
        ExecutionError::Aborted => Disposition::Stop,
        ExecutionError::TriggerRestart(_) => Disposition::Propagate,
        ExecutionError::Interrupted { .. }
        | ExecutionError::TimedOut { .. }
        | ExecutionError::Failed { .. }
        | ExecutionError::Panicked { .. }
        | ExecutionError::Storage(_) => Disposition::Restart,
    }
}

/// Faults with a dedicated row in the classification, as opposed to the
/// catch-all.
pub fn is_expected(err: &ExecutionError) -> bool {
    matches!(
        err,
        ExecutionError::Aborted
            | ExecutionError::TriggerRestart(_)
            | ExecutionError::Interrupted { .. }
            | ExecutionError::TimedOut { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellrun_service::TriggerRestart;
    use std::time::Duration;

    #[test]
    fn classification_table() {
        let cases = [
            (
                ExecutionError::Interrupted {
                    service: "a".into(),
                },
                Disposition::Restart,
            ),
            (ExecutionError::Aborted, Disposition::Stop),
            (
                ExecutionError::TimedOut {
                    service: "a".into(),
                    timeout: Duration::from_secs(1),
                },
                Disposition::Restart,
            ),
            (
                ExecutionError::TriggerRestart(TriggerRestart::new("upgrade")),
                Disposition::Propagate,
            ),
            (
                ExecutionError::Failed {
                    service: "a".into(),
                    source: anyhow::anyhow!("boom"),
                },
                Disposition::Restart,
            ),
            (
                ExecutionError::Panicked {
                    service: "a".into(),
                    message: "boom".into(),
                },
                Disposition::Restart,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(classify(&err), expected, "{err}");
        }
    }

    #[test]
    fn unclassified_faults_are_not_expected() {
        assert!(is_expected(&ExecutionError::Aborted));
        assert!(!is_expected(&ExecutionError::Panicked {
            service: "a".into(),
            message: "x".into(),
        }));
    }
}
