//! Dialysis unit summary figures.

use std::collections::HashMap;

use hms_shared::{DialysisMachine, DialysisSession, MachineStatus, SessionStatus};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialysisAnalytics {
    pub machines_total: usize,
    pub machines_by_status: HashMap<MachineStatus, usize>,
    pub sessions_total: usize,
    pub sessions_by_status: HashMap<SessionStatus, usize>,
    /// Machines in use over machines in service (0.0 when none are in service)
    pub utilization: f64,
    /// Completed sessions over sessions not cancelled
    pub completion_rate: f64,
}

impl DialysisAnalytics {
    pub fn compute(sessions: &[DialysisSession], machines: &[DialysisMachine]) -> Self {
        let mut machines_by_status = HashMap::new();
        for machine in machines {
            *machines_by_status.entry(machine.status).or_insert(0) += 1;
        }
        let mut sessions_by_status = HashMap::new();
        for session in sessions {
            *sessions_by_status.entry(session.status).or_insert(0) += 1;
        }

        let in_service = machines.len() - count(&machines_by_status, &MachineStatus::OutOfService);
        let not_cancelled = sessions.len() - count(&sessions_by_status, &SessionStatus::Cancelled);

        Self {
            machines_total: machines.len(),
            utilization: ratio(count(&machines_by_status, &MachineStatus::InUse), in_service),
            completion_rate: ratio(
                count(&sessions_by_status, &SessionStatus::Completed),
                not_cancelled,
            ),
            machines_by_status,
            sessions_total: sessions.len(),
            sessions_by_status,
        }
    }

    pub fn machines_with(&self, status: MachineStatus) -> usize {
        count(&self.machines_by_status, &status)
    }

    pub fn sessions_with(&self, status: SessionStatus) -> usize {
        count(&self.sessions_by_status, &status)
    }
}

fn count<K: Eq + std::hash::Hash>(map: &HashMap<K, usize>, key: &K) -> usize {
    map.get(key).copied().unwrap_or(0)
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
