/*
 * Copyright 2024 Oxide Computer Company
 */

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/**
 * The height (in millimetres) at which the remote service assumes the air
 * temperature around the part has stabilised.  This matches the default the
 * service itself applies.
 */
pub const STABILIZATION_HEIGHT_MM: f64 = 20.0;

const KELVIN_OFFSET: f64 = 273.15;

/**
 * Convert a temperature in degrees Celsius to kelvin.
 */
pub fn celsius_to_kelvin(c: f64) -> f64 {
    c + KELVIN_OFFSET
}

/**
 * Convert a speed in mm/s to m/s, rounded to nine decimal places.
 */
pub fn convert_speed(mm_per_sec: f64) -> f64 {
    let v = mm_per_sec / 1000.0;
    (v * 1e9).round() / 1e9
}

/**
 * Convert a volumetric speed in mm^3/s to m^3/s, rounded to twenty decimal
 * places.
 */
pub fn convert_volume_speed(mm3_per_sec: f64) -> f64 {
    let v = mm3_per_sec / 1e9;
    (v * 1e20).round() / 1e20
}

/**
 * Thermal inputs shared by simulation and optimization jobs.  Unset fields
 * leave the choice to the server and are omitted from the request.
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationInput {
    /**
     * Chamber temperature in degrees Celsius.
     */
    pub chamber_temp: Option<f32>,
    /**
     * First layer bed temperature in degrees Celsius.
     */
    pub bed_temp: Option<f32>,
}

impl SimulationInput {
    /**
     * Air temperature immediately above the build plate at the start of the
     * print, in kelvin.  We only have an opinion when there is a heated
     * chamber; the air is then assumed to sit half way between the chamber
     * and the bed.
     */
    pub fn initial_room_air_temp_kelvin(&self) -> Option<f64> {
        let chamber = f64::from(self.chamber_temp?);
        let bed = f64::from(self.bed_temp?);
        if chamber > 0.0 {
            Some(celsius_to_kelvin((chamber + bed) / 2.0))
        } else {
            None
        }
    }

    /**
     * Air temperature in the vicinity of the object once stabilised, in
     * kelvin.
     */
    pub fn object_proximity_air_temp_kelvin(&self) -> Option<f64> {
        self.chamber_temp.map(|c| celsius_to_kelvin(f64::from(c)))
    }

    pub fn stabilization_height_meters(&self) -> f64 {
        STABILIZATION_HEIGHT_MM / 1000.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRange {
    pub from: u32,
    pub to: u32,
}

impl LayerRange {
    /**
     * The first layer is never optimised; a range starting at layer 1 is sent
     * as starting from layer 2.
     */
    pub fn effective_from(&self) -> u32 {
        if self.from <= 1 {
            2
        } else {
            self.from
        }
    }
}

/**
 * Which of the two mutually exclusive ways of steering an optimization is in
 * effect.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizationMode<'a> {
    /**
     * The print priority selector offered by current servers.
     */
    Priority(&'a str),
    /**
     * The boolean "optimize outer wall" switch understood by servers that
     * predate print priorities.
     */
    OuterWall(bool),
    /**
     * Neither; the server applies its default.
     */
    Default,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationInput {
    pub priority: Option<String>,
    #[serde(default)]
    pub outer_wall: bool,
    /**
     * Send "outer_wall" instead of "priority".
     */
    #[serde(default)]
    pub use_old_method: bool,
    /**
     * Velocity bounds, in mm/s.
     */
    pub min_velocity: Option<f64>,
    pub max_velocity: Option<f64>,
    /**
     * Extruder volumetric flow rate bounds, in mm^3/s.
     */
    pub min_volumetric_speed: Option<f64>,
    pub max_volumetric_speed: Option<f64>,
    pub layers: Option<LayerRange>,
}

impl OptimizationInput {
    pub fn mode(&self) -> OptimizationMode<'_> {
        if self.use_old_method {
            OptimizationMode::OuterWall(self.outer_wall)
        } else if let Some(p) = self.priority.as_deref() {
            OptimizationMode::Priority(p)
        } else {
            OptimizationMode::Default
        }
    }

    /**
     * Switch to the legacy boolean mode; used when the server does not offer
     * any print priority options.
     */
    pub fn fall_back_to_old_method(&mut self) {
        self.use_old_method = true;
    }

    pub fn validate(&self) -> Result<()> {
        fn check_bounds(
            what: &str,
            lo: Option<f64>,
            hi: Option<f64>,
        ) -> Result<()> {
            for v in [lo, hi].into_iter().flatten() {
                if !v.is_finite() || v <= 0.0 {
                    bail!("{what} must be a positive number, not {v}");
                }
            }
            if let (Some(lo), Some(hi)) = (lo, hi) {
                if lo > hi {
                    bail!("minimum {what} {lo} exceeds maximum {hi}");
                }
            }
            Ok(())
        }

        check_bounds("velocity", self.min_velocity, self.max_velocity)?;
        check_bounds(
            "volumetric speed",
            self.min_volumetric_speed,
            self.max_volumetric_speed,
        )?;

        if let Some(l) = &self.layers {
            if l.from > l.to {
                bail!("layer range {}-{} is inverted", l.from, l.to);
            }
        }

        Ok(())
    }
}

/**
 * Everything the caller decides about a job before orchestration starts.  The
 * orchestrator never modifies this during a run.
 */
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInput {
    #[serde(default)]
    pub simulation: SimulationInput,
    pub optimization: Option<OptimizationInput>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unit_conversions() {
        assert_eq!(convert_speed(250.0), 0.25);
        assert_eq!(convert_speed(0.0001), 0.0000001);
        assert_eq!(convert_volume_speed(20.0), 0.00000002);
        assert!((celsius_to_kelvin(45.0) - 318.15).abs() < 1e-9);
    }

    #[test]
    fn air_temperatures() {
        let si = SimulationInput {
            chamber_temp: Some(40.0),
            bed_temp: Some(60.0),
        };
        let t = si.initial_room_air_temp_kelvin().unwrap();
        assert!((t - 323.15).abs() < 1e-6);
        let t = si.object_proximity_air_temp_kelvin().unwrap();
        assert!((t - 313.15).abs() < 1e-6);

        /*
         * Without a heated chamber we have no opinion on the room air.
         */
        let si = SimulationInput {
            chamber_temp: Some(0.0),
            bed_temp: Some(60.0),
        };
        assert_eq!(si.initial_room_air_temp_kelvin(), None);
        assert!(si.object_proximity_air_temp_kelvin().is_some());

        let si = SimulationInput::default();
        assert_eq!(si.initial_room_air_temp_kelvin(), None);
        assert_eq!(si.object_proximity_air_temp_kelvin(), None);
        assert_eq!(si.stabilization_height_meters(), 0.02);
    }

    #[test]
    fn exactly_one_mode() {
        let mut oi = OptimizationInput {
            priority: Some("QUALITY".into()),
            outer_wall: true,
            ..Default::default()
        };
        assert_eq!(oi.mode(), OptimizationMode::Priority("QUALITY"));

        oi.fall_back_to_old_method();
        assert_eq!(oi.mode(), OptimizationMode::OuterWall(true));

        let oi = OptimizationInput::default();
        assert_eq!(oi.mode(), OptimizationMode::Default);
    }

    #[test]
    fn layer_range_skips_first_layer() {
        assert_eq!(LayerRange { from: 1, to: 10 }.effective_from(), 2);
        assert_eq!(LayerRange { from: 5, to: 10 }.effective_from(), 5);
    }

    #[test]
    fn validation() {
        let mut oi = OptimizationInput {
            min_velocity: Some(100.0),
            max_velocity: Some(50.0),
            ..Default::default()
        };
        assert!(oi.validate().is_err());

        oi.max_velocity = Some(300.0);
        assert!(oi.validate().is_ok());

        oi.min_volumetric_speed = Some(-1.0);
        assert!(oi.validate().is_err());

        oi.min_volumetric_speed = None;
        oi.layers = Some(LayerRange { from: 9, to: 3 });
        assert!(oi.validate().is_err());
    }
}
