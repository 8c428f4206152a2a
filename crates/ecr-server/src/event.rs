use serde::{Deserialize, Serialize};

/// Inbound encounter event for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcrEvent {
    pub session_id: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventKind {
    /// Creates the execution state and starts the pipeline.
    #[serde(rename_all = "camelCase")]
    EncounterStart {
        patient_id: String,
        #[serde(default)]
        encounter_id: Option<String>,
    },
    /// Closes the encounter: periodic updates stop and close-out may run.
    EncounterClose,
    /// New clinical data is available; eligibility is re-evaluated.
    DataChanged,
}

impl EcrEvent {
    pub fn encounter_start(
        session_id: impl Into<String>,
        patient_id: impl Into<String>,
        encounter_id: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kind: EventKind::EncounterStart {
                patient_id: patient_id.into(),
                encounter_id,
            },
        }
    }

    pub fn encounter_close(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            kind: EventKind::EncounterClose,
        }
    }

    pub fn data_changed(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            kind: EventKind::DataChanged,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::EncounterStart { .. } => "encounter-start",
            EventKind::EncounterClose => "encounter-close",
            EventKind::DataChanged => "data-changed",
        }
    }
}
