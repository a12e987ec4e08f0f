pub mod match_record;
pub mod session;
pub mod team;

pub use match_record::{
    motif_label, AutonScores, Match, Motif, MotifColor, ParkStatus, ShotLog, TeleopScores,
};
pub use session::{EditingMatch, MatchDraft, MatchType, SessionFormData};
pub use team::{RemoteSession, SharedSession, Team};
