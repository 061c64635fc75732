//! Turns a ShineX `/status` sample into a three-phase AC reading.
//!
//! Every `None` in a [`CanonicalReading`] means "keep what is published";
//! that is how idle states leave energy counters or per-phase values alone
//! without the normalizer knowing the previous sample.

use crate::config::PhaseWiring;
use crate::phase::Phase;
use crate::sample::{
    RawSample, INVERTER_STATUS, OUTPUT_POWER, PV1_INPUT_POWER, PV2_INPUT_POWER,
    TOTAL_GENERATE_ENERGY,
};
use thiserror::Error;

/// Current reported by the firmware when it has no per-phase measurement.
pub const PLACEHOLDER_CURRENT: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("field {0} is missing or not numeric")]
    MissingField(&'static str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseReading {
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub voltage: Option<f64>,
    pub energy_forward: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CanonicalReading {
    pub connected: bool,
    pub total_power: Option<f64>,
    pub total_energy_forward: Option<f64>,
    pub phases: [PhaseReading; 3],
}

impl CanonicalReading {
    pub fn phase(&self, phase: Phase) -> &PhaseReading {
        &self.phases[phase.index()]
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut PhaseReading {
        &mut self.phases[phase.index()]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    wiring: PhaseWiring,
}

impl Normalizer {
    pub fn new(wiring: PhaseWiring) -> Self {
        Self { wiring }
    }

    /// Returns `Ok(None)` for the failed-fetch sample. Any other sample
    /// without a numeric inverter status is an error.
    pub fn normalize(&self, sample: &RawSample) -> Result<Option<CanonicalReading>, NormalizeError> {
        if sample.is_unknown() {
            return Ok(None);
        }
        let status = require(sample, INVERTER_STATUS)?;

        let mut reading = CanonicalReading {
            connected: status != 0.0,
            ..Default::default()
        };

        // Inverter off: no output on any phase.
        if !reading.connected {
            for phase in &mut reading.phases {
                phase.current = Some(0.0);
                phase.power = Some(0.0);
                phase.voltage = Some(0.0);
            }
            reading.total_power = Some(0.0);
            return Ok(Some(reading));
        }

        let total_energy = require(sample, TOTAL_GENERATE_ENERGY)?;

        // No DC input, the counter still has to be kept current.
        let pv1 = require(sample, PV1_INPUT_POWER)?;
        let pv2 = sample.number(PV2_INPUT_POWER).unwrap_or(0.0);
        if pv1 == 0.0 && pv2 == 0.0 {
            reading.total_energy_forward = Some(total_energy);
            reading.total_power = Some(0.0);
            return Ok(Some(reading));
        }

        for (phase, energy) in Phase::ALL.iter().zip(self.attribute_energy(sample, total_energy)?) {
            reading.phase_mut(*phase).energy_forward = Some(energy);
        }

        if total_energy > 0.0 {
            let output_power = require(sample, OUTPUT_POWER)?;
            reading.total_energy_forward = Some(total_energy);
            reading.total_power = Some(output_power);

            for phase in Phase::ALL {
                let voltage = require(sample, phase.voltage_field())?;
                let mut current = require(sample, phase.current_field())?;
                if current == PLACEHOLDER_CURRENT {
                    current = derived_current(output_power, voltage);
                }

                let target = reading.phase_mut(phase);
                target.current = Some(current);
                target.power = Some(current * voltage);
                target.voltage = Some(voltage);
            }
        }

        Ok(Some(reading))
    }

    /// Splits the lifetime energy counter over the phases. The device has no
    /// per-phase counter, so this is an even split or all on L1.
    fn attribute_energy(&self, sample: &RawSample, total: f64) -> Result<[f64; 3], NormalizeError> {
        let three_phase = match self.wiring {
            PhaseWiring::Auto => require(sample, Phase::L2.power_field())? > 0.0,
            PhaseWiring::Single => false,
            PhaseWiring::Three => true,
        };

        if three_phase {
            let share = total / 3.0;
            Ok([share, share, share])
        } else {
            Ok([total, 0.0, 0.0])
        }
    }
}

fn derived_current(output_power: f64, voltage: f64) -> f64 {
    if voltage == 0.0 {
        return 0.0;
    }
    (output_power / 3.0) / voltage
}

fn require(sample: &RawSample, field: &'static str) -> Result<f64, NormalizeError> {
    sample
        .number(field)
        .ok_or(NormalizeError::MissingField(field))
}
