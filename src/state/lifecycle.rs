//! Transition tables for game and signup statuses.
//!
//! Status writes in the services go through these checks so terminal states
//! can never be re-opened, no matter which handler or sweep is asking. The
//! one deliberate exception is a re-join after a voluntary cancel, which is
//! modeled as a fresh membership rather than a transition.

use thiserror::Error;

use crate::dao::models::{GameStatus, SignupStatus};

/// A status change the lifecycle rules forbid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    /// Status the document currently holds.
    pub from: String,
    /// Status the caller asked for.
    pub to: String,
}

fn invalid(from: impl std::fmt::Debug, to: impl std::fmt::Debug) -> InvalidTransition {
    InvalidTransition {
        from: format!("{from:?}"),
        to: format!("{to:?}"),
    }
}

/// Check a game status change against the lifecycle table.
pub fn check_game_transition(
    from: GameStatus,
    to: GameStatus,
) -> Result<(), InvalidTransition> {
    use GameStatus::*;

    let allowed = match (from, to) {
        // Pre-start statuses can always be cancelled or archived, and can
        // jump straight to in-progress (early or manual start).
        (s, Cancelled | ArchivedNotPlayed | InProgress) if s.is_pre_start() => true,

        (Scheduled, Recruiting) => true,
        (Recruiting, FullyBooked | TeamSelection) => true,
        // A freed slot re-opens recruitment.
        (FullyBooked, Recruiting | TeamSelection) => true,
        (TeamSelection, TeamsFormed) => true,
        // The organizer may reshuffle teams before kick-off.
        (TeamsFormed, TeamSelection) => true,

        (InProgress, Completed) => true,

        _ => false,
    };

    if allowed && from != to {
        Ok(())
    } else {
        Err(invalid(from, to))
    }
}

/// Check a signup status change against the lifecycle table.
pub fn check_signup_transition(
    from: SignupStatus,
    to: SignupStatus,
) -> Result<(), InvalidTransition> {
    use SignupStatus::*;

    let allowed = matches!(
        (from, to),
        (Confirmed, Cancelled | Rejected) | (Waitlist, Confirmed | Cancelled | Rejected)
    );

    if allowed {
        Ok(())
    } else {
        Err(invalid(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_game_statuses_accept_nothing() {
        for terminal in [
            GameStatus::Completed,
            GameStatus::Cancelled,
            GameStatus::ArchivedNotPlayed,
        ] {
            for target in [
                GameStatus::Scheduled,
                GameStatus::Recruiting,
                GameStatus::InProgress,
                GameStatus::Completed,
                GameStatus::Cancelled,
            ] {
                assert!(check_game_transition(terminal, target).is_err());
            }
        }
    }

    #[test]
    fn only_in_progress_games_complete() {
        assert!(check_game_transition(GameStatus::InProgress, GameStatus::Completed).is_ok());
        assert!(check_game_transition(GameStatus::Recruiting, GameStatus::Completed).is_err());
    }

    #[test]
    fn freed_slot_reopens_a_full_game() {
        assert!(check_game_transition(GameStatus::FullyBooked, GameStatus::Recruiting).is_ok());
    }

    #[test]
    fn pre_start_games_archive_and_start_early() {
        for pre in [
            GameStatus::Scheduled,
            GameStatus::Recruiting,
            GameStatus::FullyBooked,
            GameStatus::TeamSelection,
            GameStatus::TeamsFormed,
        ] {
            assert!(check_game_transition(pre, GameStatus::ArchivedNotPlayed).is_ok());
            assert!(check_game_transition(pre, GameStatus::InProgress).is_ok());
        }
    }

    #[test]
    fn signups_never_leave_terminal_statuses() {
        assert!(
            check_signup_transition(SignupStatus::Cancelled, SignupStatus::Confirmed).is_err()
        );
        assert!(check_signup_transition(SignupStatus::Rejected, SignupStatus::Waitlist).is_err());
        assert!(check_signup_transition(SignupStatus::Waitlist, SignupStatus::Confirmed).is_ok());
    }
}
