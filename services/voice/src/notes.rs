//! Clinical-note dictation, driven by the agent's function calls.
//!
//! Each field function appends one `Label: value` line to the note in
//! progress. `save_note` files the note away and starts a fresh one,
//! `clear_note` discards it. Saved notes live in memory only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medvoice_core::functions::FunctionCallHandler;
use medvoice_protocol::{FunctionDefinition, FunctionOutput};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

struct NoteField {
    function: &'static str,
    argument: &'static str,
    label: &'static str,
    description: &'static str,
    argument_description: &'static str,
}

const NOTE_FIELDS: [NoteField; 15] = [
    NoteField {
        function: "set_patient_name",
        argument: "name",
        label: "Patient Name",
        description: "Set the patient's name in the clinical note",
        argument_description: "The patient's full name",
    },
    NoteField {
        function: "set_date_of_birth",
        argument: "dateOfBirth",
        label: "Date of Birth",
        description: "Set the patient's date of birth in the clinical note",
        argument_description: "Patient's date of birth in MM/DD/YYYY format",
    },
    NoteField {
        function: "set_gender",
        argument: "gender",
        label: "Gender",
        description: "Set the patient's gender in the clinical note",
        argument_description: "Patient's gender",
    },
    NoteField {
        function: "set_mrn",
        argument: "mrn",
        label: "Medical Record Number",
        description: "Set the patient's medical record number in the clinical note",
        argument_description: "Patient's medical record number (MRN)",
    },
    NoteField {
        function: "set_visit_date",
        argument: "date",
        label: "Visit Date",
        description: "Set the date of visit in the clinical note",
        argument_description: "Date of visit in MM/DD/YYYY format",
    },
    NoteField {
        function: "set_visit_time",
        argument: "time",
        label: "Visit Time",
        description: "Set the time of visit in the clinical note",
        argument_description: "Time of visit in HH:MM AM/PM format",
    },
    NoteField {
        function: "set_visit_type",
        argument: "visitType",
        label: "Visit Type",
        description: "Set the type of visit in the clinical note",
        argument_description: "Type of visit, e.g. follow-up or new patient",
    },
    NoteField {
        function: "set_provider_name",
        argument: "provider",
        label: "Provider",
        description: "Set the provider's name in the clinical note",
        argument_description: "Name of the healthcare provider",
    },
    NoteField {
        function: "set_chief_complaint",
        argument: "complaint",
        label: "Chief Complaint",
        description: "Set the chief complaint in the clinical note",
        argument_description: "The patient's main complaint",
    },
    NoteField {
        function: "set_present_illness",
        argument: "illness",
        label: "Present Illness",
        description: "Set the history of present illness in the clinical note",
        argument_description: "Details of the present illness",
    },
    NoteField {
        function: "set_review_of_systems",
        argument: "systems",
        label: "Review of Systems",
        description: "Set the review of systems in the clinical note",
        argument_description: "Findings from the review of systems",
    },
    NoteField {
        function: "set_physical_exam",
        argument: "exam",
        label: "Physical Examination",
        description: "Set the physical examination findings in the clinical note",
        argument_description: "Physical examination findings",
    },
    NoteField {
        function: "set_assessment",
        argument: "assessment",
        label: "Assessment",
        description: "Set the assessment in the clinical note",
        argument_description: "Clinical assessment",
    },
    NoteField {
        function: "set_plan",
        argument: "plan",
        label: "Plan",
        description: "Set the treatment plan in the clinical note",
        argument_description: "Treatment plan",
    },
    NoteField {
        function: "other_notes",
        argument: "notes",
        label: "Other Notes",
        description: "Add any other notes to the clinical note",
        argument_description: "Additional notes",
    },
];

const SAVE_NOTE: &str = "save_note";
const CLEAR_NOTE: &str = "clear_note";

/// A note filed by `save_note`.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedNote {
    pub id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub content: String,
}

#[derive(Default)]
struct NoteState {
    current: String,
    saved: Vec<SavedNote>,
}

#[derive(Default)]
pub struct ClinicalNoteFunctions {
    state: Mutex<NoteState>,
}

impl ClinicalNoteFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The note being dictated.
    pub async fn current_note(&self) -> String {
        self.state.lock().await.current.clone()
    }

    /// Saved notes, most recent first.
    pub async fn saved_notes(&self) -> Vec<SavedNote> {
        let state = self.state.lock().await;
        state.saved.iter().rev().cloned().collect()
    }
}

#[async_trait]
impl FunctionCallHandler for ClinicalNoteFunctions {
    fn definitions(&self) -> Vec<FunctionDefinition> {
        let mut definitions: Vec<FunctionDefinition> = NOTE_FIELDS
            .iter()
            .map(|field| FunctionDefinition {
                name: field.function.to_string(),
                description: field.description.to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        (field.argument): {
                            "type": "string",
                            "description": field.argument_description,
                        }
                    },
                    "required": [field.argument],
                }),
            })
            .collect();
        for (name, description) in [
            (SAVE_NOTE, "Save the current clinical note"),
            (CLEAR_NOTE, "Clear the current clinical note"),
        ] {
            definitions.push(FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters: json!({ "type": "object", "properties": {} }),
            });
        }
        definitions
    }

    async fn call(&self, name: &str, input: &Value) -> FunctionOutput {
        let mut state = self.state.lock().await;
        match name {
            SAVE_NOTE => {
                let content = std::mem::take(&mut state.current);
                if content.is_empty() {
                    info!("Save requested for an empty note, nothing filed");
                    return FunctionOutput::Success;
                }
                let note = SavedNote {
                    id: Uuid::new_v4(),
                    saved_at: Utc::now(),
                    content,
                };
                info!(note_id = %note.id, lines = note.content.lines().count(), "Clinical note saved");
                state.saved.push(note);
                FunctionOutput::Success
            }
            CLEAR_NOTE => {
                state.current.clear();
                info!("Clinical note cleared");
                FunctionOutput::Success
            }
            _ => {
                let Some(field) = NOTE_FIELDS.iter().find(|field| field.function == name) else {
                    warn!(function = name, "Unknown function requested");
                    return FunctionOutput::Error;
                };
                let Some(value) = input.get(field.argument).and_then(Value::as_str) else {
                    warn!(function = name, argument = field.argument, "Function call is missing its argument");
                    return FunctionOutput::Error;
                };
                state.current.push_str(&format!("{}: {}\n", field.label, value));
                FunctionOutput::Success
            }
        }
    }
}
