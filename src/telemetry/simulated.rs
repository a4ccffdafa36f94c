use std::f64::consts::TAU;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::reading::{MAX_TEMPERATURE_C, MIN_TEMPERATURE_C};
use crate::models::{state_of_charge_from_pack, Reading, CELL_COUNT};

use super::{SourceError, TelemetrySource};

/// Shape of the synthetic signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorProfile {
    /// Simulated time advanced per sample.
    pub tick: Duration,
    pub nominal_cell_voltage: f64,
    /// Peak deviation of the slow charge/discharge wave.
    pub voltage_swing: f64,
    pub cycle_period: Duration,
    pub voltage_jitter: f64,
    pub cell_offsets: [f64; CELL_COUNT],
    pub base_temperature: f64,
    pub temperature_swing: f64,
    pub temperature_jitter: f64,
    pub base_humidity: f64,
    pub humidity_jitter: f64,
    /// Chance per tick that a spike episode begins.
    pub spike_probability: f64,
    pub spike_ticks: u32,
    pub voltage_spike: f64,
    pub temperature_spike: f64,
    pub peak_current: f64,
}

impl Default for SimulatorProfile {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            nominal_cell_voltage: 3.75,
            voltage_swing: 0.3,
            cycle_period: Duration::from_secs(600),
            voltage_jitter: 0.02,
            cell_offsets: [0.0, -0.03, 0.02],
            base_temperature: 25.0,
            temperature_swing: 3.0,
            temperature_jitter: 0.3,
            base_humidity: 45.0,
            humidity_jitter: 1.0,
            spike_probability: 0.02,
            spike_ticks: 3,
            voltage_spike: 0.9,
            temperature_spike: 20.0,
            peak_current: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Spike {
    Cell(usize),
    Temperature,
}

pub struct SimulatedSource {
    profile: SimulatorProfile,
    rng: StdRng,
    ticks: u64,
    spike: Option<(Spike, u32)>,
}

impl SimulatedSource {
    pub fn new(profile: SimulatorProfile) -> Self {
        Self::with_rng(profile, StdRng::from_entropy())
    }

    /// Same seed, same sequence of values.
    pub fn with_seed(profile: SimulatorProfile, seed: u64) -> Self {
        Self::with_rng(profile, StdRng::seed_from_u64(seed))
    }

    fn with_rng(profile: SimulatorProfile, rng: StdRng) -> Self {
        Self {
            profile,
            rng,
            ticks: 0,
            spike: None,
        }
    }

    fn phase(&self) -> f64 {
        let period = self.profile.cycle_period.as_secs_f64();
        if period <= 0.0 {
            return 0.0;
        }
        let elapsed = self.ticks as f64 * self.profile.tick.as_secs_f64();
        TAU * (elapsed % period) / period
    }

    fn jitter(&mut self, amplitude: f64) -> f64 {
        if amplitude <= 0.0 {
            0.0
        } else {
            self.rng.gen_range(-amplitude..=amplitude)
        }
    }

    fn advance_spike(&mut self) -> Option<Spike> {
        match self.spike.take() {
            Some((kind, remaining)) if remaining > 1 => {
                self.spike = Some((kind, remaining - 1));
                Some(kind)
            }
            Some((kind, _)) => Some(kind),
            None => {
                let p = self.profile.spike_probability;
                if self.profile.spike_ticks == 0 || !(p > 0.0) || !self.rng.gen_bool(p.min(1.0)) {
                    return None;
                }
                let kind = if self.rng.gen_bool(0.5) {
                    Spike::Temperature
                } else {
                    Spike::Cell(self.rng.gen_range(0..CELL_COUNT))
                };
                if self.profile.spike_ticks > 1 {
                    self.spike = Some((kind, self.profile.spike_ticks - 1));
                }
                Some(kind)
            }
        }
    }
}

impl TelemetrySource for SimulatedSource {
    fn sample(&mut self) -> Result<Reading, SourceError> {
        let phase = self.phase();
        let spike = self.advance_spike();

        let wave = phase.sin();
        let mut cells = [0.0; CELL_COUNT];
        for index in 0..CELL_COUNT {
            let base = self.profile.nominal_cell_voltage
                + self.profile.voltage_swing * wave
                + self.profile.cell_offsets[index];
            let jitter = self.jitter(self.profile.voltage_jitter);
            cells[index] = (base + jitter).max(0.0);
        }

        // Pack warms while the wave is high (charging).
        let temp_jitter = self.jitter(self.profile.temperature_jitter);
        let mut temperature =
            self.profile.base_temperature + self.profile.temperature_swing * wave + temp_jitter;

        match spike {
            Some(Spike::Cell(index)) => cells[index] += self.profile.voltage_spike,
            Some(Spike::Temperature) => temperature += self.profile.temperature_spike,
            None => {}
        }
        let temperature = temperature.clamp(MIN_TEMPERATURE_C, MAX_TEMPERATURE_C);

        let humidity_jitter = self.jitter(self.profile.humidity_jitter);
        let humidity = (self.profile.base_humidity + humidity_jitter).clamp(0.0, 100.0);

        let current = self.profile.peak_current * phase.cos();
        let soc = state_of_charge_from_pack(cells.iter().sum());

        self.ticks = self.ticks.wrapping_add(1);

        Reading::new(
            Utc::now(),
            cells,
            temperature,
            Some(humidity),
            soc,
            Some(current),
        )
        .map_err(|err| SourceError::Transient(err.to_string()))
    }

    fn describe(&self) -> String {
        format!(
            "simulated (nominal {:.2} V/cell, {}s cycle)",
            self.profile.nominal_cell_voltage,
            self.profile.cycle_period.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(reading: &Reading) -> ([f64; 3], f64, Option<f64>, f64) {
        (
            reading.cell_voltages(),
            reading.temperature(),
            reading.humidity(),
            reading.state_of_charge(),
        )
    }

    #[test]
    fn test_long_run_stays_in_domain() {
        let mut source = SimulatedSource::with_seed(SimulatorProfile::default(), 42);
        for _ in 0..2_000 {
            let reading = source.sample().unwrap();
            assert!(reading.cell_voltages().iter().all(|v| *v >= 0.0));
            assert!((0.0..=100.0).contains(&reading.state_of_charge()));
            assert!((-50.0..=150.0).contains(&reading.temperature()));
            let humidity = reading.humidity().unwrap();
            assert!((0.0..=100.0).contains(&humidity));
        }
    }

    #[test]
    fn test_seed_is_deterministic() {
        let mut a = SimulatedSource::with_seed(SimulatorProfile::default(), 7);
        let mut b = SimulatedSource::with_seed(SimulatorProfile::default(), 7);
        for _ in 0..50 {
            assert_eq!(values(&a.sample().unwrap()), values(&b.sample().unwrap()));
        }
    }

    #[test]
    fn test_spikes_exceed_default_thresholds() {
        let profile = SimulatorProfile {
            spike_probability: 1.0,
            spike_ticks: 1,
            ..SimulatorProfile::default()
        };
        let mut source = SimulatedSource::with_seed(profile, 3);
        for _ in 0..20 {
            let reading = source.sample().unwrap();
            let cell_spike = reading.cell_voltages().iter().any(|v| *v > 4.2);
            let temp_spike = reading.temperature() > 40.0;
            assert!(cell_spike || temp_spike);
        }
    }

    #[test]
    fn test_quiet_profile_has_no_spikes() {
        let profile = SimulatorProfile {
            spike_probability: 0.0,
            ..SimulatorProfile::default()
        };
        let mut source = SimulatedSource::with_seed(profile, 11);
        for _ in 0..600 {
            let reading = source.sample().unwrap();
            assert!(reading.cell_voltages().iter().all(|v| *v < 4.2));
            assert!(reading.temperature() < 40.0);
        }
    }
}
