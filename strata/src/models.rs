// src/models.rs
//
// Disease model vocabulary used by the default column tables.
//
// Each cause is a two-state SIS model (susceptible <-> infected). Only the
// state and transition names matter here; the transition dynamics themselves
// live in the simulation and are not modelled by this crate.

use std::fmt;

/// A `from -> to` transition label, rendered lowercase as `{from}_to_{to}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransitionString {
    value: String,
    from_state: String,
    to_state: String,
}

impl TransitionString {
    pub fn new(from_state: &str, to_state: &str) -> Self {
        let from_state = from_state.to_lowercase();
        let to_state = to_state.to_lowercase();
        Self {
            value: format!("{from_state}_to_{to_state}"),
            from_state,
            to_state,
        }
    }

    /// Parse the `FROM_TO_TO` form (upper-case separator), e.g.
    /// `susceptible_to_measles_TO_measles`.
    pub fn parse(raw: &str) -> Option<Self> {
        let (from, to) = raw.split_once("_TO_")?;
        if from.is_empty() || to.is_empty() {
            return None;
        }
        Some(Self::new(from, to))
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn from_state(&self) -> &str {
        &self.from_state
    }

    pub fn to_state(&self) -> &str {
        &self.to_state
    }
}

impl fmt::Display for TransitionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Susceptible-infected-susceptible cause model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SisModel {
    name: &'static str,
}

impl SisModel {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The infected state shares the cause name.
    pub fn state_name(&self) -> &'static str {
        self.name
    }

    pub fn susceptible_state_name(&self) -> String {
        format!("susceptible_to_{}", self.name)
    }

    /// Susceptible first, then infected.
    pub fn states(&self) -> Vec<String> {
        vec![self.susceptible_state_name(), self.state_name().to_string()]
    }

    /// Infection, then remission.
    pub fn transitions(&self) -> Vec<TransitionString> {
        let susceptible = self.susceptible_state_name();
        vec![
            TransitionString::new(&susceptible, self.state_name()),
            TransitionString::new(self.state_name(), &susceptible),
        ]
    }

    pub fn transition_names(&self) -> Vec<String> {
        self.transitions()
            .into_iter()
            .map(|t| t.as_str().to_string())
            .collect()
    }
}

pub const DIARRHEA: SisModel = SisModel::new("diarrheal_diseases");
pub const LRI: SisModel = SisModel::new("lower_respiratory_infections");
pub const MEASLES: SisModel = SisModel::new("measles");
pub const MODERATE_PEM: SisModel = SisModel::new("moderate_protein_energy_malnutrition");
pub const SEVERE_PEM: SisModel = SisModel::new("severe_protein_energy_malnutrition");

pub const CAUSE_MODELS: [SisModel; 5] = [DIARRHEA, LRI, MEASLES, MODERATE_PEM, SEVERE_PEM];

/// Every state across all cause models.
pub fn all_states() -> Vec<String> {
    CAUSE_MODELS.iter().flat_map(|m| m.states()).collect()
}

/// Per-state event counters the simulation emits but the results never use.
pub fn throwaway_columns() -> Vec<String> {
    all_states()
        .into_iter()
        .map(|state| format!("{state}_event_count"))
        .collect()
}
