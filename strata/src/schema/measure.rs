// src/schema/measure.rs
//
// Closed set of reportable measures.
//
// Every measure owns a default column template and a group tag. Dispatch on the
// group is an exhaustive `match`, so adding a measure forces every consumer
// (reshaper, observers, CLI) to decide how to handle it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Field holding the composite stratum key in a column template.
pub const STRATUM_FIELD: &str = "STRATUM";

/// How a measure's long table is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureGroup {
    /// Population counts; the column name itself is reported as the measure.
    Population,
    /// Deaths, YLLs, YLDs broken down by cause.
    ByCause,
    /// Person-time spent in a model state.
    StatePersonTime,
    /// Counts of model transitions.
    TransitionCount,
    /// Birth outcome counts and sums.
    Births,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    Population,
    Deaths,
    Ylls,
    Ylds,
    DiarrheaStatePersonTime,
    LriStatePersonTime,
    MeaslesStatePersonTime,
    ModeratePemStatePersonTime,
    SeverePemStatePersonTime,
    DiarrheaTransitionCount,
    LriTransitionCount,
    MeaslesTransitionCount,
    ModeratePemTransitionCount,
    SeverePemTransitionCount,
    StuntingStatePersonTime,
    WastingStatePersonTime,
    LiveBirthsCount,
    LowWeightBirthsCount,
    LowBirthWeightAndShortGestationSum,
}

impl Measure {
    pub const ALL: [Measure; 19] = [
        Measure::Population,
        Measure::Deaths,
        Measure::Ylls,
        Measure::Ylds,
        Measure::DiarrheaStatePersonTime,
        Measure::LriStatePersonTime,
        Measure::MeaslesStatePersonTime,
        Measure::ModeratePemStatePersonTime,
        Measure::SeverePemStatePersonTime,
        Measure::DiarrheaTransitionCount,
        Measure::LriTransitionCount,
        Measure::MeaslesTransitionCount,
        Measure::ModeratePemTransitionCount,
        Measure::SeverePemTransitionCount,
        Measure::StuntingStatePersonTime,
        Measure::WastingStatePersonTime,
        Measure::LiveBirthsCount,
        Measure::LowWeightBirthsCount,
        Measure::LowBirthWeightAndShortGestationSum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Measure::Population => "population",
            Measure::Deaths => "deaths",
            Measure::Ylls => "ylls",
            Measure::Ylds => "ylds",
            Measure::DiarrheaStatePersonTime => "diarrhea_state_person_time",
            Measure::LriStatePersonTime => "lri_state_person_time",
            Measure::MeaslesStatePersonTime => "measles_state_person_time",
            Measure::ModeratePemStatePersonTime => "moderate_pem_state_person_time",
            Measure::SeverePemStatePersonTime => "severe_pem_state_person_time",
            Measure::DiarrheaTransitionCount => "diarrhea_transition_count",
            Measure::LriTransitionCount => "lri_transition_count",
            Measure::MeaslesTransitionCount => "measles_transition_count",
            Measure::ModeratePemTransitionCount => "moderate_pem_transition_count",
            Measure::SeverePemTransitionCount => "severe_pem_transition_count",
            Measure::StuntingStatePersonTime => "stunting_state_person_time",
            Measure::WastingStatePersonTime => "wasting_state_person_time",
            Measure::LiveBirthsCount => "live_births_count",
            Measure::LowWeightBirthsCount => "low_weight_births_count",
            Measure::LowBirthWeightAndShortGestationSum => {
                "low_birth_weight_and_short_gestation_sum"
            }
        }
    }

    pub fn group(&self) -> MeasureGroup {
        match self {
            Measure::Population => MeasureGroup::Population,
            Measure::Deaths | Measure::Ylls | Measure::Ylds => MeasureGroup::ByCause,
            Measure::DiarrheaStatePersonTime
            | Measure::LriStatePersonTime
            | Measure::MeaslesStatePersonTime
            | Measure::ModeratePemStatePersonTime
            | Measure::SeverePemStatePersonTime
            | Measure::StuntingStatePersonTime
            | Measure::WastingStatePersonTime => MeasureGroup::StatePersonTime,
            Measure::DiarrheaTransitionCount
            | Measure::LriTransitionCount
            | Measure::MeaslesTransitionCount
            | Measure::ModeratePemTransitionCount
            | Measure::SeverePemTransitionCount => MeasureGroup::TransitionCount,
            Measure::LiveBirthsCount
            | Measure::LowWeightBirthsCount
            | Measure::LowBirthWeightAndShortGestationSum => MeasureGroup::Births,
        }
    }

    /// Column template used when the configuration does not override it.
    pub fn default_template(&self) -> &'static str {
        match self {
            Measure::Population => "total_population_{POP_STATE}",
            Measure::Deaths => {
                "death_due_to_{CAUSE_OF_DEATH}_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::Ylls => {
                "ylls_due_to_{CAUSE_OF_DEATH}_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::Ylds => {
                "ylds_due_to_{CAUSE_OF_DISABILITY}_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::DiarrheaStatePersonTime => {
                "diarrheal_diseases_{DIARRHEA_STATE}_person_time_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::LriStatePersonTime => {
                "lower_respiratory_infections_{LRI_STATE}_person_time_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::MeaslesStatePersonTime => {
                "measles_{MEASLES_STATE}_person_time_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::ModeratePemStatePersonTime => {
                "moderate_protein_energy_malnutrition_{MODERATE_PEM_STATE}_person_time_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::SeverePemStatePersonTime => {
                "severe_protein_energy_malnutrition_{SEVERE_PEM_STATE}_person_time_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::DiarrheaTransitionCount => {
                "diarrheal_diseases_{DIARRHEA_TRANSITION}_event_count_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::LriTransitionCount => {
                "lower_respiratory_infections_{LRI_TRANSITION}_event_count_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::MeaslesTransitionCount => {
                "measles_{MEASLES_TRANSITION}_event_count_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::ModeratePemTransitionCount => {
                "moderate_protein_energy_malnutrition_{MODERATE_PEM_TRANSITION}_event_count_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::SeverePemTransitionCount => {
                "severe_protein_energy_malnutrition_{SEVERE_PEM_TRANSITION}_event_count_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}_{STRATUM}"
            }
            Measure::StuntingStatePersonTime => {
                "child_stunting_{CGF_RISK_STATE_NUMERIC}_person_time_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}"
            }
            Measure::WastingStatePersonTime => {
                "child_wasting_{CGF_RISK_STATE_NUMERIC}_person_time_year_{YEAR}_sex_{SEX}_age_{AGE_GROUP}"
            }
            Measure::LiveBirthsCount => "live_births_year_{YEAR}_sex_{SEX}",
            Measure::LowWeightBirthsCount => "low_weight_births_year_{YEAR}_sex_{SEX}",
            Measure::LowBirthWeightAndShortGestationSum => {
                "low_birth_weight_and_short_gestation_sum_year_{YEAR}_sex_{SEX}"
            }
        }
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Measure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Measure::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::UnknownMeasure(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for m in Measure::ALL {
            assert_eq!(m.as_str().parse::<Measure>().unwrap(), m);
        }
    }

    #[test]
    fn unknown_name_is_unknown_measure() {
        let err = "dalys".parse::<Measure>().unwrap_err();
        assert!(matches!(err, Error::UnknownMeasure(ref m) if m == "dalys"));
    }

    #[test]
    fn serde_names_match_display() {
        let json = serde_json::to_string(&Measure::MeaslesTransitionCount).unwrap();
        assert_eq!(json, "\"measles_transition_count\"");
    }

    #[test]
    fn groups_partition_measures() {
        assert_eq!(Measure::Ylds.group(), MeasureGroup::ByCause);
        assert_eq!(
            Measure::WastingStatePersonTime.group(),
            MeasureGroup::StatePersonTime
        );
        assert_eq!(Measure::LiveBirthsCount.group(), MeasureGroup::Births);
    }
}
