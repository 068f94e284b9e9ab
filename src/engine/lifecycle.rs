//! Campaign state machine and simulated delivery outcomes.

use rand::Rng;
use std::ops::Range;
use thiserror::Error;

use crate::db::{CampaignMetrics, CampaignStatus};

/// Audience used when a campaign is sent with an empty segment
pub const DEFAULT_FALLBACK_AUDIENCE: i64 = 1000;

const DELIVERY_RATE: Range<f64> = 0.85..0.95;
const OPEN_RATE: Range<f64> = 0.15..0.40;
const CLICK_RATE: Range<f64> = 0.02..0.10;
const UNSUBSCRIBE_RATE: f64 = 0.001;
const BOUNCE_RATE: f64 = 0.02;

/// Operator actions that touch campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignAction {
    Send,
    Pause,
    Reset,
    Edit,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Campaign cannot be sent in current status")]
    NotSendable(CampaignStatus),
    #[error("Only sending campaigns can be paused")]
    NotSending(CampaignStatus),
    #[error("Cannot edit campaign that is sending or completed")]
    NotEditable(CampaignStatus),
    #[error("Cannot delete campaign that is sending or completed")]
    NotDeletable(CampaignStatus),
}

/// Check whether `action` is allowed from `status`, returning the status the
/// campaign moves to.
pub fn check_transition(
    status: CampaignStatus,
    action: CampaignAction,
) -> Result<CampaignStatus, TransitionError> {
    use CampaignStatus::*;

    match action {
        CampaignAction::Send => match status {
            Draft | Scheduled => Ok(Sending),
            other => Err(TransitionError::NotSendable(other)),
        },
        CampaignAction::Pause => match status {
            Sending => Ok(Paused),
            other => Err(TransitionError::NotSending(other)),
        },
        CampaignAction::Reset => Ok(Draft),
        CampaignAction::Edit => match status {
            Sending | Completed => Err(TransitionError::NotEditable(status)),
            other => Ok(other),
        },
        CampaignAction::Delete => match status {
            Sending | Completed => Err(TransitionError::NotDeletable(status)),
            other => Ok(other),
        },
    }
}

/// Audience a send will target
pub fn send_audience(audience_size: i64, fallback: i64) -> i64 {
    if audience_size > 0 {
        audience_size
    } else {
        fallback
    }
}

/// Fabricate the delivery funnel for a completed send.
///
/// Every stage is a floor of the previous stage times a random rate, so
/// `delivered + failed == sent` and each later count stays below its parent.
pub fn simulate_delivery<R: Rng + ?Sized>(audience: i64, rng: &mut R) -> CampaignMetrics {
    let sent = audience.max(0);
    let delivered = (sent as f64 * rng.random_range(DELIVERY_RATE)).floor() as i64;
    let opened = (delivered as f64 * rng.random_range(OPEN_RATE)).floor() as i64;
    let clicked = (opened as f64 * rng.random_range(CLICK_RATE)).floor() as i64;

    CampaignMetrics {
        audience_size: sent,
        sent,
        delivered,
        failed: sent - delivered,
        opened,
        clicked,
        unsubscribed: (opened as f64 * UNSUBSCRIBE_RATE).floor() as i64,
        bounced: (sent as f64 * BOUNCE_RATE).floor() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CampaignStatus::*;

    #[test]
    fn test_send_only_from_draft_or_scheduled() {
        assert_eq!(check_transition(Draft, CampaignAction::Send), Ok(Sending));
        assert_eq!(check_transition(Scheduled, CampaignAction::Send), Ok(Sending));
        for status in [Sending, Completed, Failed, Paused] {
            let err = check_transition(status, CampaignAction::Send).unwrap_err();
            assert_eq!(err.to_string(), "Campaign cannot be sent in current status");
        }
    }

    #[test]
    fn test_pause_only_from_sending() {
        assert_eq!(check_transition(Sending, CampaignAction::Pause), Ok(Paused));
        assert!(check_transition(Draft, CampaignAction::Pause).is_err());
        assert!(check_transition(Completed, CampaignAction::Pause).is_err());
    }

    #[test]
    fn test_reset_from_anywhere() {
        for status in CampaignStatus::ALL {
            assert_eq!(check_transition(status, CampaignAction::Reset), Ok(Draft));
        }
    }

    #[test]
    fn test_edit_and_delete_locked_while_sending_or_completed() {
        for status in [Sending, Completed] {
            assert!(check_transition(status, CampaignAction::Edit).is_err());
            assert!(check_transition(status, CampaignAction::Delete).is_err());
        }
        for status in [Draft, Scheduled, Failed, Paused] {
            assert_eq!(check_transition(status, CampaignAction::Edit), Ok(status));
            assert_eq!(check_transition(status, CampaignAction::Delete), Ok(status));
        }
    }

    #[test]
    fn test_send_audience_fallback() {
        assert_eq!(send_audience(0, DEFAULT_FALLBACK_AUDIENCE), 1000);
        assert_eq!(send_audience(2400, DEFAULT_FALLBACK_AUDIENCE), 2400);
    }

    #[test]
    fn test_simulated_funnel_invariants() {
        let mut rng = rand::rng();
        for audience in [1, 100, 1000, 5099] {
            for _ in 0..50 {
                let m = simulate_delivery(audience, &mut rng);
                assert_eq!(m.sent, audience);
                assert_eq!(m.delivered + m.failed, m.sent);
                assert!(m.opened <= m.delivered);
                assert!(m.clicked <= m.opened);
                assert!(m.unsubscribed <= m.opened);
                assert!(m.bounced <= m.sent);

                let ratio = m.delivered as f64 / m.sent as f64;
                assert!(ratio < 0.95);
                if audience >= 100 {
                    assert!(ratio >= 0.84);
                }
            }
        }
    }

    #[test]
    fn test_simulated_rates_in_range() {
        let mut rng = rand::rng();
        let m = simulate_delivery(10_000, &mut rng);
        let rates = m.rates();
        assert!((85.0..=95.0).contains(&rates.delivery_rate));
        assert!((15.0..=40.0).contains(&rates.open_rate));
        assert!((0.0..=10.0).contains(&rates.click_rate));
    }
}
