//! QA-JSON I/O adapters: only the fields the engine consumes or produces
//! (spec §6). The wider schema is an external collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gridqa_datatypes::{CheckOutput, ExecutionStatus, GridCheckState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaJsonFile {
    pub path: std::path::PathBuf,
    pub file_type: String,
}

pub const FILE_TYPE_SURVEY_DTMS: &str = "Survey DTMs";
pub const FILE_TYPE_COVERAGE_AREA: &str = "Coverage Area";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaJsonParam {
    pub name: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaJsonInputs {
    #[serde(default)]
    pub files: Vec<QaJsonFile>,
    #[serde(default)]
    pub params: Vec<QaJsonParam>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaJsonInfo {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaJsonExecution {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub status: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaJsonOutputs {
    pub execution: QaJsonExecution,
    pub files: Option<serde_json::Value>,
    pub count: Option<serde_json::Value>,
    pub percentage: Option<serde_json::Value>,
    pub messages: Vec<String>,
    pub data: serde_json::Value,
    pub check_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaJsonCheck {
    pub info: QaJsonInfo,
    pub inputs: QaJsonInputs,
    pub outputs: Option<QaJsonOutputs>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QaJsonDocument {
    pub checks: Vec<QaJsonCheck>,
}

fn status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Draft => "draft",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Aborted => "aborted",
    }
}

fn state_str(state: GridCheckState) -> &'static str {
    match state {
        GridCheckState::Pass => "pass",
        GridCheckState::Warning => "warning",
        GridCheckState::Fail => "fail",
    }
}

/// Serializes one check's result into the `outputs` shape the QA-JSON
/// document expects. `files`, `count`, `percentage` are always null: the
/// core does not populate them (they belong to the host application).
pub fn to_qajson_outputs(output: &CheckOutput) -> QaJsonOutputs {
    QaJsonOutputs {
        execution: QaJsonExecution {
            start: output.execution.start,
            end: output.execution.end,
            status: status_str(output.execution.status).to_string(),
            error: output.execution.error.clone(),
        },
        files: None,
        count: None,
        percentage: None,
        messages: output.messages.clone(),
        data: serde_json::to_value(&output.data).unwrap_or(serde_json::Value::Null),
        check_state: state_str(output.state).to_string(),
    }
}

/// Writes a check's result into the document in place, keyed by matching
/// `check_id` against `QaJsonCheck.info.id` — the `qajson_update_cb` of
/// spec §4.7 fires once this has been done for every check in the run.
pub fn update_check_output(document: &mut QaJsonDocument, check_id: Uuid, output: &CheckOutput) {
    if let Some(check) = document.checks.iter_mut().find(|c| c.info.id == check_id) {
        check.outputs = Some(to_qajson_outputs(output));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridqa_datatypes::{CheckData, CheckExecution};

    #[test]
    fn update_check_output_matches_by_id() {
        let id = Uuid::new_v4();
        let mut document = QaJsonDocument {
            checks: vec![QaJsonCheck {
                info: QaJsonInfo { id },
                inputs: QaJsonInputs::default(),
                outputs: None,
            }],
        };
        let output = CheckOutput {
            execution: CheckExecution::draft(),
            messages: vec!["ok".to_string()],
            data: CheckData::default(),
            state: GridCheckState::Pass,
        };
        update_check_output(&mut document, id, &output);
        let outputs = document.checks[0].outputs.as_ref().unwrap();
        assert_eq!(outputs.check_state, "pass");
        assert_eq!(outputs.messages, vec!["ok".to_string()]);
    }
}
