use serde::{Deserialize, Serialize};

/// Lifecycle of a transfer run.
///
/// `Pending -> Running -> (Paused <-> Running) -> Completed | Cancelled | Failed`.
/// Only `Running` performs I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl TransferState {
    /// Returns `true` for `Completed`, `Cancelled` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Cancelled | TransferState::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Running, Failed)
                | (Paused, Running)
                | (Paused, Cancelled)
        )
    }
}

/// Snapshot of an active transfer's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub plan_id: String,
    pub state: TransferState,
    pub item_index: usize,
    pub total_items: usize,
    pub items_completed: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_file: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub speed_bps: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
}

impl TransferProgress {
    /// Returns the byte progress as a percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.bytes_transferred as f64 / self.total_bytes as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(transferred: u64, total: u64) -> TransferProgress {
        TransferProgress {
            plan_id: "p1".into(),
            state: TransferState::Running,
            item_index: 0,
            total_items: 2,
            items_completed: 0,
            current_file: String::new(),
            bytes_transferred: transferred,
            total_bytes: total,
            speed_bps: 0,
            eta_secs: None,
        }
    }

    #[test]
    fn state_serialization() {
        assert_eq!(
            serde_json::to_string(&TransferState::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(
            serde_json::from_str::<TransferState>("\"paused\"").unwrap(),
            TransferState::Paused
        );
    }

    #[test]
    fn only_running_can_complete() {
        assert!(TransferState::Running.can_transition_to(TransferState::Completed));
        assert!(!TransferState::Paused.can_transition_to(TransferState::Completed));
        assert!(!TransferState::Pending.can_transition_to(TransferState::Completed));
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [
            TransferState::Completed,
            TransferState::Cancelled,
            TransferState::Failed,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                TransferState::Pending,
                TransferState::Running,
                TransferState::Paused,
                TransferState::Completed,
                TransferState::Cancelled,
                TransferState::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn pause_resume_cycle() {
        assert!(TransferState::Running.can_transition_to(TransferState::Paused));
        assert!(TransferState::Paused.can_transition_to(TransferState::Running));
        assert!(TransferState::Paused.can_transition_to(TransferState::Cancelled));
    }

    #[test]
    fn progress_percentage() {
        assert!((progress(500, 1000).percentage() - 50.0).abs() < f64::EPSILON);
        assert!((progress(0, 0).percentage() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_omits_empty_fields() {
        let json = serde_json::to_string(&progress(1, 2)).unwrap();
        assert!(!json.contains("currentFile"));
        assert!(!json.contains("etaSecs"));
        assert!(json.contains("bytesTransferred"));
    }
}
