// src/step.rs
//
// Step-boundary driver for the runtime half of the pipeline.
//
// On every time step the stratifier assigns and caches strata first; observers
// then run in registration order against that cached assignment. The driver
// owns the recorder so the run's metrics can be pulled once at the end.

use tracing::debug;

use crate::error::{Error, Result};
use crate::observer::{Observer, StepContext};
use crate::population::PopulationSnapshot;
use crate::recorder::MetricRecorder;
use crate::stratify::PopulationStratifier;

pub struct StepDriver {
    stratifier: PopulationStratifier,
    observers: Vec<Box<dyn Observer>>,
    recorder: MetricRecorder,
    step_size: f64,
    last_step: Option<u64>,
}

impl StepDriver {
    pub fn new(stratifier: PopulationStratifier, recorder: MetricRecorder, step_size: f64) -> Self {
        Self {
            stratifier,
            observers: Vec::new(),
            recorder,
            step_size,
            last_step: None,
        }
    }

    pub fn add_observer(&mut self, observer: impl Observer + 'static) -> &mut Self {
        self.observers.push(Box::new(observer));
        self
    }

    pub fn stratifier(&self) -> &PopulationStratifier {
        &self.stratifier
    }

    pub fn recorder(&self) -> &MetricRecorder {
        &self.recorder
    }

    pub fn into_recorder(self) -> MetricRecorder {
        self.recorder
    }

    /// Process one step. Steps must be strictly increasing.
    pub fn on_time_step(&mut self, step: u64, snapshot: &PopulationSnapshot) -> Result<()> {
        if let Some(last) = self.last_step {
            if step <= last {
                return Err(Error::config(format!(
                    "step {step} received after step {last}"
                )));
            }
        }

        let strata = self.stratifier.prepare_step(step, snapshot)?;
        let ctx = StepContext {
            step,
            step_size: self.step_size,
            snapshot,
            strata,
        };
        for observer in &mut self.observers {
            observer.observe(&ctx, &mut self.recorder)?;
        }

        self.last_step = Some(step);
        debug!(step, observers = self.observers.len(), "step observed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DimensionSpec, ResultsConfig};
    use crate::observer::{CountingObserver, Target, Weight};
    use crate::schema::{ColumnSchema, Measure};
    use crate::stratify::{Category, Source, StratificationRegistry};
    use std::sync::Arc;

    fn driver() -> StepDriver {
        let mut cfg = ResultsConfig::default();
        cfg.stratification = vec![DimensionSpec::new("sex", &["male", "female"])];
        let schema = Arc::new(ColumnSchema::new(&cfg).unwrap());

        let mut reg = StratificationRegistry::new();
        reg.register(
            "sex",
            vec![Category::equals("male"), Category::equals("female")],
            Source::column("sex"),
        )
        .unwrap();

        let mut driver = StepDriver::new(
            PopulationStratifier::new(reg),
            MetricRecorder::new(schema),
            0.5,
        );
        driver.add_observer(
            CountingObserver::new("population", Target::Measure(Measure::Population))
                .bind("POP_STATE", "alive"),
        );
        driver.add_observer(
            CountingObserver::new("person_time", Target::Standard("total_population".into()))
                .weight(Weight::StepSize),
        );
        driver
    }

    #[test]
    fn observers_accumulate_across_steps() {
        let mut d = driver();
        let pop = PopulationSnapshot::new(vec![1, 2])
            .with_column("sex", ["male", "female"])
            .unwrap()
            .with_column("alive", ["living", "dead"])
            .unwrap();
        d.on_time_step(0, &pop).unwrap();
        d.on_time_step(1, &pop).unwrap();

        let metrics = d.recorder().metrics();
        assert_eq!(metrics["total_population_living"], 2.0);
        assert_eq!(metrics["total_population_dead"], 2.0);
        assert_eq!(metrics["total_population"], 2.0);
        assert!(d.stratifier().assignment(1).is_ok());
    }

    #[test]
    fn out_of_order_step_is_rejected() {
        let mut d = driver();
        let pop = PopulationSnapshot::new(Vec::new());
        d.on_time_step(4, &pop).unwrap();
        assert!(matches!(
            d.on_time_step(4, &pop),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn stratifier_errors_stop_the_step() {
        let mut d = driver();
        let pop = PopulationSnapshot::new(vec![1])
            .with_column("alive", ["living"])
            .unwrap();
        assert!(matches!(
            d.on_time_step(0, &pop),
            Err(Error::MissingColumn { .. })
        ));
        assert_eq!(d.recorder().touched(), 0);
    }
}
