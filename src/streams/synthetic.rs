//! Synthetic telemetry for the sensor-backed topics.
//!
//! Each source draws from a fixed demo roster. Values wander between ticks rather
//! than jumping, so charts downstream look plausible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};

use crate::error::StreamError;

use super::{StreamSource, Topic};

struct RosterEntry {
    id: &'static str,
    name: &'static str,
    team: &'static str,
    position: &'static str,
}

const ROSTER: &[RosterEntry] = &[
    RosterEntry { id: "stl-p-01", name: "Marcus Webb", team: "Cardinals", position: "P" },
    RosterEntry { id: "stl-c-04", name: "Danny Ortiz", team: "Cardinals", position: "C" },
    RosterEntry { id: "stl-ss-11", name: "Tyler Brooks", team: "Cardinals", position: "SS" },
    RosterEntry { id: "stl-cf-22", name: "Andre Hill", team: "Cardinals", position: "CF" },
    RosterEntry { id: "chc-p-31", name: "Sam Keller", team: "Cubs", position: "P" },
    RosterEntry { id: "chc-1b-17", name: "Luis Romero", team: "Cubs", position: "1B" },
    RosterEntry { id: "chc-2b-09", name: "Cole Jensen", team: "Cubs", position: "2B" },
    RosterEntry { id: "chc-rf-44", name: "Jalen Price", team: "Cubs", position: "RF" },
];

const TEAMS: [&str; 2] = ["Cardinals", "Cubs"];

const SITUATIONS: &[&str] = &[
    "bases loaded, two outs",
    "runner on second, one out",
    "full count",
    "bases empty, no outs",
    "tying run at the plate",
];

/// Bucket a 0-100 pressure index into a label
pub fn stress_level(pressure_index: f64) -> &'static str {
    if pressure_index < 40.0 {
        "low"
    } else if pressure_index < 65.0 {
        "moderate"
    } else if pressure_index < 85.0 {
        "high"
    } else {
        "critical"
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Bounded random walk step
fn wander(rng: &mut impl Rng, value: f64, step: f64, min: f64, max: f64) -> f64 {
    (value + rng.random_range(-step..=step)).clamp(min, max)
}

/// Biometric pressure readings, nominally once per second
pub struct PressureAnalyticsSource {
    /// player id -> last pressure index
    pressure: Mutex<HashMap<&'static str, f64>>,
}

impl PressureAnalyticsSource {
    pub fn new() -> Self {
        let pressure = ROSTER.iter().map(|p| (p.id, 45.0)).collect();
        Self {
            pressure: Mutex::new(pressure),
        }
    }

    fn sample(&self) -> Value {
        let mut rng = rand::rng();
        let mut pressure = self.pressure.lock();

        let players: Vec<Value> = ROSTER
            .iter()
            .map(|p| {
                let entry = pressure.entry(p.id).or_insert(45.0);
                *entry = wander(&mut rng, *entry, 6.0, 0.0, 100.0);
                let index = round1(*entry);
                let heart_rate = (62.0 + index * 0.9 + rng.random_range(-4.0..4.0)).round();

                json!({
                    "playerId": p.id,
                    "name": p.name,
                    "team": p.team,
                    "position": p.position,
                    "pressureIndex": index,
                    "heartRate": heart_rate,
                    "stressLevel": stress_level(index),
                    "clutchFactor": round3(rng.random_range(0.5..1.5)),
                })
            })
            .collect();

        let situation = SITUATIONS[rng.random_range(0..SITUATIONS.len())];
        json!({
            "players": players,
            "gameContext": {
                "situation": situation,
                "leverageIndex": round1(rng.random_range(0.2..3.5)),
            },
        })
    }
}

impl Default for PressureAnalyticsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamSource for PressureAnalyticsSource {
    fn topic(&self) -> Topic {
        Topic::PressureAnalytics
    }

    async fn produce(&self) -> Result<Value, StreamError> {
        Ok(self.sample())
    }
}

/// Rolling performance and fatigue figures
#[derive(Default)]
pub struct PerformanceMetricsSource;

impl PerformanceMetricsSource {
    pub fn new() -> Self {
        Self
    }

    fn sample(&self) -> Value {
        let mut rng = rand::rng();
        let mut efficiency_total = 0.0;

        let players: Vec<Value> = ROSTER
            .iter()
            .map(|p| {
                let efficiency = round1(rng.random_range(55.0..98.0));
                efficiency_total += efficiency;
                let trend = match rng.random_range(0..3) {
                    0 => "down",
                    1 => "steady",
                    _ => "up",
                };

                json!({
                    "playerId": p.id,
                    "name": p.name,
                    "team": p.team,
                    "efficiency": efficiency,
                    "fatigue": round1(rng.random_range(5.0..80.0)),
                    "sprintSpeed": round1(rng.random_range(24.0..30.5)),
                    "accuracy": round3(rng.random_range(0.6..0.99)),
                    "trend": trend,
                })
            })
            .collect();

        json!({
            "players": players,
            "averageEfficiency": round1(efficiency_total / ROSTER.len() as f64),
        })
    }
}

#[async_trait]
impl StreamSource for PerformanceMetricsSource {
    fn topic(&self) -> Topic {
        Topic::PerformanceMetrics
    }

    async fn produce(&self) -> Result<Value, StreamError> {
        Ok(self.sample())
    }
}

/// Field positions at high frequency.
///
/// Coordinates are in feet on a 400 x 400 field with home plate at the origin.
pub struct PlayerTrackingSource {
    positions: Mutex<HashMap<&'static str, (f64, f64)>>,
    frame: AtomicU64,
}

const FIELD_SIZE: f64 = 400.0;

impl PlayerTrackingSource {
    pub fn new() -> Self {
        let positions = ROSTER
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, (40.0 + i as f64 * 30.0, 60.0 + i as f64 * 25.0)))
            .collect();
        Self {
            positions: Mutex::new(positions),
            frame: AtomicU64::new(0),
        }
    }

    fn sample(&self) -> Value {
        let mut rng = rand::rng();
        let mut positions = self.positions.lock();
        let frame = self.frame.fetch_add(1, Ordering::Relaxed) + 1;

        let players: Vec<Value> = ROSTER
            .iter()
            .map(|p| {
                let (x, y) = positions.entry(p.id).or_insert((FIELD_SIZE / 2.0, FIELD_SIZE / 2.0));
                let dx = rng.random_range(-1.5..=1.5);
                let dy = rng.random_range(-1.5..=1.5);
                *x = (*x + dx).clamp(0.0, FIELD_SIZE);
                *y = (*y + dy).clamp(0.0, FIELD_SIZE);

                // feet per 100ms tick -> feet per second
                let velocity = (dx * dx + dy * dy).sqrt() * 10.0;
                let heading = dy.atan2(dx).to_degrees().rem_euclid(360.0);

                json!({
                    "playerId": p.id,
                    "x": round1(*x),
                    "y": round1(*y),
                    "velocity": round1(velocity),
                    "heading": round1(heading),
                })
            })
            .collect();

        json!({
            "frame": frame,
            "players": players,
        })
    }
}

impl Default for PlayerTrackingSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamSource for PlayerTrackingSource {
    fn topic(&self) -> Topic {
        Topic::PlayerTracking
    }

    async fn produce(&self) -> Result<Value, StreamError> {
        Ok(self.sample())
    }
}

/// Team-level momentum and win probability
pub struct TeamAnalyticsSource {
    /// Home win probability, carried between ticks
    home_win_probability: Mutex<f64>,
}

impl TeamAnalyticsSource {
    pub fn new() -> Self {
        Self {
            home_win_probability: Mutex::new(0.5),
        }
    }

    fn sample(&self) -> Value {
        let mut rng = rand::rng();
        let mut home_wp = self.home_win_probability.lock();
        *home_wp = wander(&mut rng, *home_wp, 0.05, 0.02, 0.98);

        let possession = round1(rng.random_range(40.0..60.0));
        let win_probabilities = [*home_wp, 1.0 - *home_wp];
        let possessions = [possession, round1(100.0 - possession)];

        let teams: Vec<Value> = TEAMS
            .iter()
            .enumerate()
            .map(|(i, team)| {
                json!({
                    "team": team,
                    "possession": possessions[i],
                    "momentum": round1(rng.random_range(-10.0..10.0)),
                    "winProbability": round3(win_probabilities[i]),
                    "offensiveRating": round1(rng.random_range(85.0..125.0)),
                    "defensiveRating": round1(rng.random_range(85.0..125.0)),
                })
            })
            .collect();

        json!({ "teams": teams })
    }
}

impl Default for TeamAnalyticsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamSource for TeamAnalyticsSource {
    fn topic(&self) -> Topic {
        Topic::TeamAnalytics
    }

    async fn produce(&self) -> Result<Value, StreamError> {
        Ok(self.sample())
    }
}
