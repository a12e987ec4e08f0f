//! The in-progress practice session aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;

use super::match_record::{AutonScores, Match, Motif, ParkStatus, ShotLog, TeleopScores};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum MatchType {
    #[default]
    #[serde(rename = "Full Game")]
    FullGame,
    Autonomous,
    Teleop,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::FullGame => "Full Game",
            MatchType::Autonomous => "Autonomous",
            MatchType::Teleop => "Teleop",
        }
    }
}

/// Counters for the match currently being scored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MatchDraft {
    pub auton: AutonScores,
    pub teleop: TeleopScores,
    pub park: ParkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motif: Option<Motif>,
    #[serde(default)]
    pub shot_logs: Vec<ShotLog>,
    #[serde(default)]
    pub cycle_times: Vec<f64>,
}

impl MatchDraft {
    fn from_match(record: &Match) -> Self {
        Self {
            auton: record.auton,
            teleop: record.teleop,
            park: record.park,
            motif: record.motif,
            shot_logs: record.shot_logs.clone(),
            cycle_times: record.cycle_times.clone(),
        }
    }

    fn apply_to(&self, record: &mut Match) {
        record.auton = self.auton;
        record.teleop = self.teleop;
        record.park = self.park;
        record.motif = self.motif;
        record.shot_logs = self.shot_logs.clone();
        record.cycle_times = self.cycle_times.clone();
    }
}

/// Side-channel holding the draft that was displaced while a completed
/// match is copied out for editing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditingMatch {
    pub index: usize,
    pub match_id: String,
    pub stashed_draft: MatchDraft,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionFormData {
    pub session_name: String,
    pub duration: String,
    pub match_type: MatchType,
    #[serde(default)]
    pub draft: MatchDraft,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub matches: Vec<Match>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editing: Option<EditingMatch>,
    /// Remote document id once the session has been written through the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl SessionFormData {
    pub fn new(session_name: impl Into<String>, match_type: MatchType) -> Self {
        Self {
            session_name: session_name.into(),
            match_type,
            ..Self::default()
        }
    }

    /// Nothing worth persisting: unnamed and without matches.
    pub fn is_blank(&self) -> bool {
        self.session_name.trim().is_empty() && self.matches.is_empty()
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    fn next_match_number(&self) -> u32 {
        self.matches
            .iter()
            .map(|m| m.match_number)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Flatten the draft into a new match, append it, and start a fresh draft.
    pub fn record_match(&mut self, recorded_at: DateTime<Utc>) -> Result<&Match, SessionError> {
        if self.is_completed {
            return Err(SessionError::Completed);
        }
        if self.is_editing() {
            return Err(SessionError::EditInProgress);
        }

        let draft = std::mem::take(&mut self.draft);
        let record = Match {
            id: Uuid::new_v4().to_string(),
            match_number: self.next_match_number(),
            auton: draft.auton,
            teleop: draft.teleop,
            shot_logs: draft.shot_logs,
            cycle_times: draft.cycle_times,
            park: draft.park,
            motif: draft.motif,
            recorded_at,
        };
        self.matches.push(record);
        Ok(&self.matches[self.matches.len() - 1])
    }

    pub fn begin_edit(&mut self, index: usize) -> Result<(), SessionError> {
        if self.is_editing() {
            return Err(SessionError::EditInProgress);
        }
        let record = self
            .matches
            .get(index)
            .ok_or(SessionError::NoSuchMatch(index))?;

        let copied = MatchDraft::from_match(record);
        let match_id = record.id.clone();
        let stashed_draft = std::mem::replace(&mut self.draft, copied);
        self.editing = Some(EditingMatch {
            index,
            match_id,
            stashed_draft,
        });
        Ok(())
    }

    /// Copy the edited draft back into its match and restore the stashed draft.
    pub fn commit_edit(&mut self) -> Result<&Match, SessionError> {
        let editing = self.editing.take().ok_or(SessionError::NotEditing)?;
        let edited = std::mem::replace(&mut self.draft, editing.stashed_draft);

        let record = self
            .matches
            .iter_mut()
            .find(|m| m.id == editing.match_id)
            .ok_or(SessionError::NoSuchMatch(editing.index))?;
        edited.apply_to(record);
        Ok(&*record)
    }

    pub fn cancel_edit(&mut self) -> Result<(), SessionError> {
        let editing = self.editing.take().ok_or(SessionError::NotEditing)?;
        self.draft = editing.stashed_draft;
        Ok(())
    }

    pub fn remove_match(&mut self, index: usize) -> Result<Match, SessionError> {
        if self.is_editing() {
            return Err(SessionError::EditInProgress);
        }
        if index >= self.matches.len() {
            return Err(SessionError::NoSuchMatch(index));
        }
        Ok(self.matches.remove(index))
    }

    pub fn best_score(&self) -> u32 {
        self.matches
            .iter()
            .map(Match::total_points)
            .max()
            .unwrap_or(0)
    }

    pub fn average_score(&self) -> f64 {
        if self.matches.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .matches
            .iter()
            .map(|m| f64::from(m.total_points()))
            .sum();
        total / self.matches.len() as f64
    }

    /// Made/attempted across every recorded match, `None` before any shot.
    pub fn shot_accuracy(&self) -> Option<f64> {
        let attempted: u64 = self
            .matches
            .iter()
            .map(|m| u64::from(m.shots_attempted()))
            .sum();
        if attempted == 0 {
            return None;
        }
        let made: u64 = self.matches.iter().map(|m| u64::from(m.shots_made())).sum();
        Some(made as f64 / attempted as f64)
    }

    pub fn average_cycle_time(&self) -> Option<f64> {
        let times: Vec<f64> = self
            .matches
            .iter()
            .flat_map(|m| m.cycle_times.iter().copied())
            .collect();
        if times.is_empty() {
            None
        } else {
            Some(times.iter().sum::<f64>() / times.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_matches(count: usize) -> SessionFormData {
        let mut session = SessionFormData::new("Practice", MatchType::FullGame);
        for n in 0..count {
            session.draft.auton.classified = n as u32 + 1;
            session.record_match(Utc::now()).unwrap();
        }
        session
    }

    #[test]
    fn match_type_serializes_with_display_names() {
        assert_eq!(
            serde_json::to_string(&MatchType::FullGame).unwrap(),
            "\"Full Game\""
        );
        let parsed: MatchType = serde_json::from_str("\"Teleop\"").unwrap();
        assert_eq!(parsed, MatchType::Teleop);
    }

    #[test]
    fn record_match_appends_and_resets_the_draft() {
        let mut session = SessionFormData::new("Practice", MatchType::FullGame);
        session.draft.teleop.classified = 4;
        session.draft.park = ParkStatus::Full;

        let recorded = session.record_match(Utc::now()).unwrap();
        assert_eq!(recorded.match_number, 1);
        assert_eq!(recorded.teleop.classified, 4);
        assert_eq!(recorded.park, ParkStatus::Full);

        assert_eq!(session.matches.len(), 1);
        assert_eq!(session.draft, MatchDraft::default());
    }

    #[test]
    fn match_numbers_survive_removal() {
        let mut session = session_with_matches(3);
        session.remove_match(1).unwrap();
        let recorded = session.record_match(Utc::now()).unwrap();
        assert_eq!(recorded.match_number, 4);
    }

    #[test]
    fn edit_swaps_the_draft_out_and_back() {
        let mut session = session_with_matches(2);
        session.draft.teleop.depot = 7;

        session.begin_edit(0).unwrap();
        assert_eq!(session.draft.auton.classified, 1);
        session.draft.auton.classified = 9;
        assert!(session.record_match(Utc::now()).is_err());

        let edited = session.commit_edit().unwrap();
        assert_eq!(edited.auton.classified, 9);
        assert_eq!(session.draft.teleop.depot, 7);
        assert!(!session.is_editing());
        assert_eq!(session.matches.len(), 2);
    }

    #[test]
    fn cancel_edit_leaves_the_match_untouched() {
        let mut session = session_with_matches(1);
        session.begin_edit(0).unwrap();
        session.draft.auton.classified = 42;
        session.cancel_edit().unwrap();
        assert_eq!(session.matches[0].auton.classified, 1);
        assert_eq!(session.draft, MatchDraft::default());
    }

    #[test]
    fn only_one_edit_at_a_time() {
        let mut session = session_with_matches(2);
        session.begin_edit(0).unwrap();
        assert!(matches!(
            session.begin_edit(1),
            Err(SessionError::EditInProgress)
        ));
        assert!(matches!(
            session.remove_match(0),
            Err(SessionError::EditInProgress)
        ));
    }

    #[test]
    fn completed_sessions_reject_new_matches() {
        let mut session = session_with_matches(1);
        session.is_completed = true;
        assert!(matches!(
            session.record_match(Utc::now()),
            Err(SessionError::Completed)
        ));
    }

    #[test]
    fn aggregates() {
        let mut session = session_with_matches(2);
        session.matches[0].shot_logs.push(ShotLog {
            shots_attempted: 4,
            shots_made: 2,
            cycle_time: None,
        });
        session.matches[1].cycle_times = vec![10.0, 14.0];

        assert_eq!(session.best_score(), 6);
        assert!((session.average_score() - 4.5).abs() < f64::EPSILON);
        assert_eq!(session.shot_accuracy(), Some(0.5));
        assert_eq!(session.average_cycle_time(), Some(12.0));
        assert_eq!(SessionFormData::default().shot_accuracy(), None);
    }
}
