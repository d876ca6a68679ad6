//! Receipt dialogue module: step identifiers, per-chat session state and input validation.

use chrono::NaiveDate;
use std::collections::HashMap;

/// Format accepted for the reception date (DD/MM/YYYY)
pub const RECEPTION_DATE_FORMAT: &str = "%d/%m/%Y";

/// Identifies one step of the receipt conversation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StepId {
    #[default]
    ReceptionDate,
    DeliveryNote,
    Supplier,
    MaterialType,
    MaterialObservations,
    Batch,
    Quantity,
    ProjectLead,
    GeneralObservations,
    HandlingUnit,
}

impl StepId {
    /// Field name under which the step's value is recorded
    pub fn field_name(self) -> &'static str {
        match self {
            StepId::ReceptionDate => "reception_date",
            StepId::DeliveryNote => "delivery_note",
            StepId::Supplier => "supplier",
            StepId::MaterialType => "material_type",
            StepId::MaterialObservations => "material_observations",
            StepId::Batch => "batch",
            StepId::Quantity => "quantity",
            StepId::ProjectLead => "project_lead",
            StepId::GeneralObservations => "general_observations",
            StepId::HandlingUnit => "handling_unit",
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Successor of a step
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    Step(StepId),
    Terminal,
}

/// Kind of event a step waits for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputKind {
    Text,
    Choice,
}

impl std::fmt::Display for InputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputKind::Text => f.write_str("a text message"),
            InputKind::Choice => f.write_str("a menu choice"),
        }
    }
}

/// Conversation state of one chat
#[derive(Clone, Debug, Default)]
pub struct Session {
    pub current: StepId,
    pub values: HashMap<StepId, String>,
    pub language_code: Option<String>,
    /// Set once the session has been completed and evicted from the engine
    pub finished: bool,
}

impl Session {
    pub fn new(entry: StepId, language_code: Option<&str>) -> Self {
        Self {
            current: entry,
            values: HashMap::new(),
            language_code: language_code.map(|s| s.to_string()),
            finished: false,
        }
    }

    /// Drop every collected value and go back to `entry`
    pub fn reset(&mut self, entry: StepId) {
        self.current = entry;
        self.values.clear();
    }
}

/// Validates a reception date typed by the user and returns it zero-padded
pub fn validate_reception_date(input: &str) -> Result<String, &'static str> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err("empty");
    }

    match NaiveDate::parse_from_str(trimmed, RECEPTION_DATE_FORMAT) {
        Ok(date) => Ok(date.format(RECEPTION_DATE_FORMAT).to_string()),
        Err(_) => Err("invalid_date"),
    }
}

/// Accepts any text that is not blank, kept verbatim
pub fn validate_free_text(input: &str) -> Result<String, &'static str> {
    if input.trim().is_empty() {
        return Err("empty");
    }

    Ok(input.to_string())
}
