//! Lifecycle states and the pure decisions that drive them

use crate::types::{Acceptance, MatchPlayerRecord, QueueType};
use serde::Serialize;
use std::fmt;

pub const REASON_DECLINED: &str = "You've declined the match";
pub const REASON_ACCEPT_EXPIRED: &str = "Time for accepting the match expired";
pub const REASON_PAYMENT_EXPIRED: &str = "Time for payment expired";
pub const REASON_OPPONENT_DID_NOT_ACCEPT: &str =
    "Opponent didn't accept the match, back to matchmaking";
pub const REASON_MATCH_CANCELLED: &str =
    "Couldn't create match, match is cancelled - back to matchmaking";
pub const REASON_SCHEDULING_FAILED: &str = "Couldn't create match, match is cancelled";
pub const REASON_UNREADABLE: &str = "Match data could not be read, match is cancelled";
pub const REASON_REQUEUE_FAILED: &str = "Couldn't return you to matchmaking, please queue again";

/// Phase of one proposed match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    Formed,
    AwaitingAcceptance,
    AwaitingPayment,
    Scheduling,
    Completed,
    Declined,
    AcceptTimedOut,
    PaymentTimedOut,
    ScheduleFailed,
    /// Records could not be written or read back intact
    Aborted,
}

impl MatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchState::Completed) || self.is_rollback()
    }

    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            MatchState::Declined
                | MatchState::AcceptTimedOut
                | MatchState::PaymentTimedOut
                | MatchState::ScheduleFailed
                | MatchState::Aborted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchState::Formed => "formed",
            MatchState::AwaitingAcceptance => "awaiting_acceptance",
            MatchState::AwaitingPayment => "awaiting_payment",
            MatchState::Scheduling => "scheduling",
            MatchState::Completed => "completed",
            MatchState::Declined => "declined",
            MatchState::AcceptTimedOut => "accept_timed_out",
            MatchState::PaymentTimedOut => "payment_timed_out",
            MatchState::ScheduleFailed => "schedule_failed",
            MatchState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where acceptance stands across all players
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptanceProgress {
    AnyDeclined,
    AllAccepted,
    Waiting,
}

/// A single decline settles the outcome without waiting for the others
pub fn acceptance_progress(records: &[MatchPlayerRecord]) -> AcceptanceProgress {
    if records.iter().any(|r| r.acceptance == Acceptance::Declined) {
        AcceptanceProgress::AnyDeclined
    } else if !records.is_empty() && records.iter().all(|r| r.acceptance == Acceptance::Accepted) {
        AcceptanceProgress::AllAccepted
    } else {
        AcceptanceProgress::Waiting
    }
}

/// Players who still owe payment. Queues without payment never have any.
pub fn unpaid_players(queue: QueueType, records: &[MatchPlayerRecord]) -> Vec<&MatchPlayerRecord> {
    if !queue.requires_payment() {
        return Vec::new();
    }
    records.iter().filter(|r| !r.paid).collect()
}

/// What rollback does with one player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Back into the original queue with the original score
    Requeue { message: &'static str },
    /// Dropped from matchmaking
    Remove { message: &'static str },
}

impl Disposition {
    pub fn message(&self) -> &'static str {
        match self {
            Disposition::Requeue { message } | Disposition::Remove { message } => message,
        }
    }
}

/// Decide a player's fate for a rollback terminal; `None` for non-rollback states
pub fn disposition(terminal: MatchState, record: &MatchPlayerRecord) -> Option<Disposition> {
    let accepted = record.acceptance == Acceptance::Accepted;
    let disposition = match terminal {
        MatchState::Declined | MatchState::AcceptTimedOut => match record.acceptance {
            Acceptance::Accepted => Disposition::Requeue {
                message: REASON_OPPONENT_DID_NOT_ACCEPT,
            },
            Acceptance::Declined => Disposition::Remove {
                message: REASON_DECLINED,
            },
            Acceptance::Pending => Disposition::Remove {
                message: REASON_ACCEPT_EXPIRED,
            },
        },
        MatchState::PaymentTimedOut => {
            if record.paid || !record.queue.requires_payment() {
                Disposition::Requeue {
                    message: REASON_MATCH_CANCELLED,
                }
            } else {
                Disposition::Remove {
                    message: REASON_PAYMENT_EXPIRED,
                }
            }
        }
        MatchState::ScheduleFailed if accepted => Disposition::Requeue {
            message: REASON_MATCH_CANCELLED,
        },
        MatchState::ScheduleFailed => Disposition::Remove {
            message: REASON_SCHEDULING_FAILED,
        },
        MatchState::Aborted if record.acceptance == Acceptance::Declined => Disposition::Remove {
            message: REASON_DECLINED,
        },
        MatchState::Aborted => Disposition::Requeue {
            message: REASON_MATCH_CANCELLED,
        },
        _ => return None,
    };
    Some(disposition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Team, Ticket};

    fn record(queue: QueueType, acceptance: Acceptance, paid: bool) -> MatchPlayerRecord {
        let mut record =
            MatchPlayerRecord::from_ticket(queue, Team::A, &Ticket::new("p", 1000.0, ""));
        record.acceptance = acceptance;
        record.paid = paid;
        record
    }

    #[test]
    fn test_terminal_classification() {
        assert!(MatchState::Completed.is_terminal());
        assert!(!MatchState::Completed.is_rollback());
        assert!(MatchState::Aborted.is_rollback());
        assert!(!MatchState::AwaitingPayment.is_terminal());
        assert!(!MatchState::Formed.is_terminal());
    }

    #[test]
    fn test_decline_wins_over_pending() {
        let records = vec![
            record(QueueType::Cs2, Acceptance::Pending, false),
            record(QueueType::Cs2, Acceptance::Declined, false),
        ];
        assert_eq!(acceptance_progress(&records), AcceptanceProgress::AnyDeclined);
    }

    #[test]
    fn test_all_accepted() {
        let records = vec![
            record(QueueType::Cs2, Acceptance::Accepted, false),
            record(QueueType::Cs2, Acceptance::Accepted, false),
        ];
        assert_eq!(acceptance_progress(&records), AcceptanceProgress::AllAccepted);
        assert_eq!(acceptance_progress(&[]), AcceptanceProgress::Waiting);
    }

    #[test]
    fn test_unpaid_only_for_payment_queues() {
        let records = vec![
            record(QueueType::Lichess, Acceptance::Accepted, true),
            record(QueueType::Lichess, Acceptance::Accepted, false),
        ];
        assert_eq!(unpaid_players(QueueType::Lichess, &records).len(), 1);
        assert!(unpaid_players(QueueType::Cs2, &records).is_empty());
    }

    #[test]
    fn test_acceptance_rollback_dispositions() {
        let accepted = record(QueueType::Cs2, Acceptance::Accepted, false);
        let declined = record(QueueType::Cs2, Acceptance::Declined, false);
        let pending = record(QueueType::Cs2, Acceptance::Pending, false);

        assert_eq!(
            disposition(MatchState::Declined, &accepted),
            Some(Disposition::Requeue {
                message: REASON_OPPONENT_DID_NOT_ACCEPT
            })
        );
        assert_eq!(
            disposition(MatchState::Declined, &declined),
            Some(Disposition::Remove {
                message: REASON_DECLINED
            })
        );
        assert_eq!(
            disposition(MatchState::AcceptTimedOut, &pending),
            Some(Disposition::Remove {
                message: REASON_ACCEPT_EXPIRED
            })
        );
    }

    #[test]
    fn test_payment_rollback_drops_unpaid() {
        let unpaid = record(QueueType::Lichess, Acceptance::Accepted, false);
        let paid = record(QueueType::Lichess, Acceptance::Accepted, true);

        assert_eq!(
            disposition(MatchState::PaymentTimedOut, &unpaid),
            Some(Disposition::Remove {
                message: REASON_PAYMENT_EXPIRED
            })
        );
        assert!(matches!(
            disposition(MatchState::PaymentTimedOut, &paid),
            Some(Disposition::Requeue { .. })
        ));
    }

    #[test]
    fn test_schedule_failure_requeues_accepted() {
        let accepted = record(QueueType::Dota2, Acceptance::Accepted, false);
        assert_eq!(
            disposition(MatchState::ScheduleFailed, &accepted),
            Some(Disposition::Requeue {
                message: REASON_MATCH_CANCELLED
            })
        );
    }

    #[test]
    fn test_no_disposition_outside_rollback() {
        let accepted = record(QueueType::Cs2, Acceptance::Accepted, true);
        assert_eq!(disposition(MatchState::Completed, &accepted), None);
        assert_eq!(disposition(MatchState::AwaitingPayment, &accepted), None);
    }
}
