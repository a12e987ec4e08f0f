//! Completed matches and the scoring counters they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LEAVE_POINTS: u32 = 3;
pub const CLASSIFIED_POINTS: u32 = 3;
pub const OVERFLOW_POINTS: u32 = 1;
pub const PATTERN_POINTS: u32 = 2;
pub const DEPOT_POINTS: u32 = 1;
pub const PARTIAL_PARK_POINTS: u32 = 5;
pub const FULL_PARK_POINTS: u32 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutonScores {
    pub classified: u32,
    pub overflow: u32,
    pub pattern: u32,
    pub leave: bool,
}

impl AutonScores {
    pub fn points(&self) -> u32 {
        let leave = if self.leave { LEAVE_POINTS } else { 0 };
        weighted(&[
            (self.classified, CLASSIFIED_POINTS),
            (self.overflow, OVERFLOW_POINTS),
            (self.pattern, PATTERN_POINTS),
        ])
        .saturating_add(leave)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TeleopScores {
    pub classified: u32,
    pub overflow: u32,
    pub depot: u32,
    pub pattern: u32,
}

impl TeleopScores {
    pub fn points(&self) -> u32 {
        weighted(&[
            (self.classified, CLASSIFIED_POINTS),
            (self.overflow, OVERFLOW_POINTS),
            (self.depot, DEPOT_POINTS),
            (self.pattern, PATTERN_POINTS),
        ])
    }
}

/// Counts are user-entered, so scores saturate instead of wrapping.
fn weighted(terms: &[(u32, u32)]) -> u32 {
    terms.iter().fold(0u32, |total, &(count, points)| {
        total.saturating_add(count.saturating_mul(points))
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ParkStatus {
    #[default]
    None,
    Partial,
    Full,
}

impl ParkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParkStatus::None => "none",
            ParkStatus::Partial => "partial",
            ParkStatus::Full => "full",
        }
    }

    pub fn points(&self) -> u32 {
        match self {
            ParkStatus::None => 0,
            ParkStatus::Partial => PARTIAL_PARK_POINTS,
            ParkStatus::Full => FULL_PARK_POINTS,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MotifColor {
    Green,
    Purple,
}

impl MotifColor {
    pub fn initial(&self) -> char {
        match self {
            MotifColor::Green => 'G',
            MotifColor::Purple => 'P',
        }
    }
}

/// Three-slot colour pattern revealed at the start of a match.
pub type Motif = [MotifColor; 3];

pub fn motif_label(motif: &Motif) -> String {
    motif.iter().map(MotifColor::initial).collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShotLog {
    pub shots_attempted: u32,
    pub shots_made: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_time: Option<f64>,
}

/// One completed game attempt within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: String,
    pub match_number: u32,
    pub auton: AutonScores,
    pub teleop: TeleopScores,
    #[serde(default)]
    pub shot_logs: Vec<ShotLog>,
    #[serde(default)]
    pub cycle_times: Vec<f64>,
    pub park: ParkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motif: Option<Motif>,
    pub recorded_at: DateTime<Utc>,
}

impl Match {
    pub fn auton_points(&self) -> u32 {
        self.auton.points()
    }

    pub fn teleop_points(&self) -> u32 {
        self.teleop.points().saturating_add(self.park.points())
    }

    pub fn total_points(&self) -> u32 {
        self.auton_points().saturating_add(self.teleop_points())
    }

    pub fn shots_attempted(&self) -> u32 {
        self.shot_logs
            .iter()
            .fold(0u32, |total, s| total.saturating_add(s.shots_attempted))
    }

    pub fn shots_made(&self) -> u32 {
        self.shot_logs
            .iter()
            .fold(0u32, |total, s| total.saturating_add(s.shots_made))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_match() -> Match {
        Match {
            id: "m1".into(),
            match_number: 1,
            auton: AutonScores {
                classified: 2,
                overflow: 1,
                pattern: 1,
                leave: true,
            },
            teleop: TeleopScores {
                classified: 5,
                overflow: 2,
                depot: 3,
                pattern: 2,
            },
            shot_logs: vec![ShotLog {
                shots_attempted: 4,
                shots_made: 3,
                cycle_time: Some(11.5),
            }],
            cycle_times: vec![11.5],
            park: ParkStatus::Partial,
            motif: Some([MotifColor::Green, MotifColor::Purple, MotifColor::Purple]),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn points_follow_the_scoring_table() {
        let m = sample_match();
        // 2*3 + 1 + 2 + 3
        assert_eq!(m.auton_points(), 12);
        // 5*3 + 2 + 3 + 2*2 + partial park 5
        assert_eq!(m.teleop_points(), 29);
        assert_eq!(m.total_points(), 41);
    }

    #[test]
    fn huge_counts_saturate() {
        let mut m = sample_match();
        m.auton.classified = u32::MAX;
        m.teleop.depot = u32::MAX;
        m.teleop.pattern = u32::MAX;
        m.shot_logs[0].shots_made = u32::MAX;
        let log = m.shot_logs[0];
        m.shot_logs.push(log);

        assert_eq!(m.auton_points(), u32::MAX);
        assert_eq!(m.teleop_points(), u32::MAX);
        assert_eq!(m.total_points(), u32::MAX);
        assert_eq!(m.shots_made(), u32::MAX);
    }

    #[test]
    fn wire_format_is_camel_case() {
        let json = serde_json::to_value(sample_match()).unwrap();
        assert_eq!(json["matchNumber"], 1);
        assert_eq!(json["park"], "partial");
        assert_eq!(json["shotLogs"][0]["shotsAttempted"], 4);
        assert_eq!(json["motif"][1], "purple");
    }

    #[test]
    fn motif_label_uses_initials() {
        assert_eq!(
            motif_label(&[MotifColor::Purple, MotifColor::Green, MotifColor::Purple]),
            "PGP"
        );
    }
}
