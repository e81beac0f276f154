pub mod matches;

use livescore_sdk::objects::MatchStatus as SdkMatchStatus;

/// Match status for database operations.
///
/// This is the sqlx::Type version. For wire use, see `livescore_sdk::objects::MatchStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "match_status")]
pub enum MatchStatus {
    Scheduled,
    Live,
    HalfTime,
    Finished,
    Postponed,
    Cancelled,
}

impl From<MatchStatus> for SdkMatchStatus {
    fn from(value: MatchStatus) -> Self {
        match value {
            MatchStatus::Scheduled => SdkMatchStatus::Scheduled,
            MatchStatus::Live => SdkMatchStatus::Live,
            MatchStatus::HalfTime => SdkMatchStatus::HalfTime,
            MatchStatus::Finished => SdkMatchStatus::Finished,
            MatchStatus::Postponed => SdkMatchStatus::Postponed,
            MatchStatus::Cancelled => SdkMatchStatus::Cancelled,
        }
    }
}

impl From<SdkMatchStatus> for MatchStatus {
    fn from(value: SdkMatchStatus) -> Self {
        match value {
            SdkMatchStatus::Scheduled => MatchStatus::Scheduled,
            SdkMatchStatus::Live => MatchStatus::Live,
            SdkMatchStatus::HalfTime => MatchStatus::HalfTime,
            SdkMatchStatus::Finished => MatchStatus::Finished,
            SdkMatchStatus::Postponed => MatchStatus::Postponed,
            SdkMatchStatus::Cancelled => MatchStatus::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_conversion_round_trips() {
        for status in SdkMatchStatus::ALL {
            assert_eq!(SdkMatchStatus::from(MatchStatus::from(*status)), *status);
        }
    }
}
