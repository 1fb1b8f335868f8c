//! Call lifecycle state machine
//!
//! Pure transition functions over a [`Call`]. Each returns the patch to
//! persist plus an outcome telling the caller what to do next; none of
//! them touch storage, money, or timers.

use callmeter_core::{
    models::{Call, CallPatch, CallStatus, ParticipantRole},
    BillingConfig,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// When billing may start without a published media track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GracePeriodPolicy {
    pub enabled: bool,
    pub duration: Duration,
}

impl GracePeriodPolicy {
    pub fn new(enabled: bool, duration: Duration) -> Self {
        Self { enabled, duration }
    }

    pub fn from_config(config: &BillingConfig) -> Self {
        Self {
            enabled: config.grace_period_enabled,
            duration: Duration::seconds(config.grace_period_secs as i64),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            duration: Duration::zero(),
        }
    }

    /// Measured from the moment the call connected, falling back to
    /// creation time for records that predate `connected_at`.
    pub fn deadline(&self, call: &Call) -> Option<DateTime<Utc>> {
        if !self.enabled {
            return None;
        }
        let anchor = call.connected_at.unwrap_or(call.created_at);
        Some(anchor + self.duration)
    }

    pub fn has_elapsed(&self, call: &Call, now: DateTime<Utc>) -> bool {
        self.deadline(call).is_some_and(|deadline| now >= deadline)
    }
}

/// Answer to "may billing start now?"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingEligibility {
    pub can_start: bool,
    /// Comma separated list of unmet conditions
    pub reason: Option<String>,
    /// True when the grace period stood in for the media signal
    pub via_grace_period: bool,
}

/// Patch to persist and what happened
#[derive(Debug, Clone, PartialEq)]
pub struct Transition<O> {
    pub patch: CallPatch,
    pub outcome: O,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub both_present: bool,
    pub became_connected: bool,
    /// Both sides are here and billing has not started yet
    pub should_check_billing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaOutcome {
    pub first_publish: bool,
    pub should_check_billing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The other party is still present, or billing never started
    Waiting,
    /// Both sides left before billing; the call is now failed
    Failed,
    /// Billing is running and must be finalized by the caller
    FinalizeRequired,
    /// Already completed or failed
    Terminal,
}

/// Call state machine
#[derive(Debug, Clone, Copy)]
pub struct CallStateMachine {
    grace: GracePeriodPolicy,
}

impl CallStateMachine {
    pub fn new(grace: GracePeriodPolicy) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> &GracePeriodPolicy {
        &self.grace
    }

    pub fn mark_joined(
        &self,
        call: &Call,
        role: ParticipantRole,
        now: DateTime<Utc>,
    ) -> Transition<JoinOutcome> {
        if call.status.is_terminal() {
            return Transition {
                patch: CallPatch::default(),
                outcome: JoinOutcome {
                    both_present: call.both_joined(),
                    became_connected: false,
                    should_check_billing: false,
                },
            };
        }

        let mut patch = if call.is_present(role) {
            CallPatch::default()
        } else {
            CallPatch::presence(role, true)
        };

        let user = call.user_joined || role == ParticipantRole::User;
        let provider = call.provider_joined || role == ParticipantRole::Provider;
        let both_present = user && provider;

        let mut became_connected = false;
        if both_present {
            if call.status == CallStatus::Created {
                patch.status = Some(CallStatus::Connected);
                patch.connected_at = Some(now);
                became_connected = true;
            } else if call.connected_at.is_none() {
                patch.connected_at = Some(now);
            }
        }

        Transition {
            patch,
            outcome: JoinOutcome {
                both_present,
                became_connected,
                should_check_billing: both_present && !call.billing_started,
            },
        }
    }

    pub fn mark_media_published(&self, call: &Call) -> Transition<MediaOutcome> {
        if call.status.is_terminal() {
            return Transition {
                patch: CallPatch::default(),
                outcome: MediaOutcome {
                    first_publish: false,
                    should_check_billing: false,
                },
            };
        }

        let first_publish = !call.media_published;
        let patch = if first_publish {
            CallPatch {
                media_published: Some(true),
                ..CallPatch::default()
            }
        } else {
            CallPatch::default()
        };

        Transition {
            patch,
            outcome: MediaOutcome {
                first_publish,
                should_check_billing: call.both_joined() && !call.billing_started,
            },
        }
    }

    pub fn mark_left(
        &self,
        call: &Call,
        role: ParticipantRole,
        now: DateTime<Utc>,
    ) -> Transition<LeaveOutcome> {
        if call.status.is_terminal() {
            return Transition {
                patch: CallPatch::default(),
                outcome: LeaveOutcome::Terminal,
            };
        }

        let mut patch = if call.is_present(role) {
            CallPatch::presence(role, false)
        } else {
            CallPatch::default()
        };

        let user = call.user_joined && role != ParticipantRole::User;
        let provider = call.provider_joined && role != ParticipantRole::Provider;

        let outcome = if call.billing_started && !call.billing_finalized {
            LeaveOutcome::FinalizeRequired
        } else if !call.billing_started && !user && !provider {
            patch.status = Some(CallStatus::Failed);
            patch.call_end_time = Some(now);
            LeaveOutcome::Failed
        } else {
            LeaveOutcome::Waiting
        };

        Transition { patch, outcome }
    }

    pub fn can_start_billing(&self, call: &Call, now: DateTime<Utc>) -> BillingEligibility {
        if call.status.is_terminal() {
            return BillingEligibility {
                can_start: false,
                reason: Some(format!("call is {}", call.status)),
                via_grace_period: false,
            };
        }

        let mut missing: Vec<&str> = Vec::new();
        if !matches!(call.status, CallStatus::Connected | CallStatus::BillingActive) {
            missing.push("call is not connected");
        }
        if call.billing_started {
            missing.push("billing already started");
        }
        if !call.user_joined {
            missing.push("user has not joined");
        }
        if !call.provider_joined {
            missing.push("provider has not joined");
        }

        let mut via_grace_period = false;
        if !call.media_published {
            if call.both_joined() && self.grace.has_elapsed(call, now) {
                via_grace_period = true;
            } else {
                missing.push("media not yet published");
            }
        }

        if missing.is_empty() {
            BillingEligibility {
                can_start: true,
                reason: None,
                via_grace_period,
            }
        } else {
            BillingEligibility {
                can_start: false,
                reason: Some(missing.join(", ")),
                via_grace_period: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callmeter_core::models::CallType;

    fn machine() -> CallStateMachine {
        CallStateMachine::new(GracePeriodPolicy::new(true, Duration::seconds(15)))
    }

    fn call() -> Call {
        Call::new("c1", "u1", "p1", CallType::Voice, Utc::now())
    }

    fn apply<O>(call: &mut Call, t: &Transition<O>) {
        call.apply(&t.patch, Utc::now());
    }

    fn joined_both(now: DateTime<Utc>) -> Call {
        let m = machine();
        let mut c = call();
        let t = m.mark_joined(&c, ParticipantRole::User, now);
        apply(&mut c, &t);
        let t = m.mark_joined(&c, ParticipantRole::Provider, now);
        apply(&mut c, &t);
        c
    }

    #[test]
    fn test_connects_when_both_join() {
        let m = machine();
        let now = Utc::now();
        let mut c = call();

        let t = m.mark_joined(&c, ParticipantRole::User, now);
        assert!(!t.outcome.both_present);
        apply(&mut c, &t);
        assert_eq!(c.status, CallStatus::Created);

        let t = m.mark_joined(&c, ParticipantRole::Provider, now);
        assert!(t.outcome.became_connected);
        assert!(t.outcome.should_check_billing);
        apply(&mut c, &t);
        assert_eq!(c.status, CallStatus::Connected);
        assert_eq!(c.connected_at, Some(now));
    }

    #[test]
    fn test_join_is_idempotent() {
        let m = machine();
        let now = Utc::now();
        let c = joined_both(now);
        let t = m.mark_joined(&c, ParticipantRole::User, now);
        assert!(t.patch.is_empty());
        assert!(!t.outcome.became_connected);
    }

    #[test]
    fn test_media_then_eligible() {
        let m = machine();
        let now = Utc::now();
        let mut c = joined_both(now);

        let e = m.can_start_billing(&c, now);
        assert!(!e.can_start);
        assert_eq!(e.reason.as_deref(), Some("media not yet published"));

        let t = m.mark_media_published(&c);
        assert!(t.outcome.first_publish);
        assert!(t.outcome.should_check_billing);
        apply(&mut c, &t);

        let e = m.can_start_billing(&c, now);
        assert!(e.can_start);
        assert!(!e.via_grace_period);
        assert!(m.mark_media_published(&c).patch.is_empty());
    }

    #[test]
    fn test_grace_period_allows_start_without_media() {
        let m = machine();
        let now = Utc::now();
        let c = joined_both(now);

        assert!(!m.can_start_billing(&c, now + Duration::seconds(14)).can_start);
        let e = m.can_start_billing(&c, now + Duration::seconds(15));
        assert!(e.can_start);
        assert!(e.via_grace_period);

        let strict = CallStateMachine::new(GracePeriodPolicy::disabled());
        assert!(!strict.can_start_billing(&c, now + Duration::hours(1)).can_start);
    }

    #[test]
    fn test_reasons_list_every_gap() {
        let m = machine();
        let e = m.can_start_billing(&call(), Utc::now());
        assert_eq!(
            e.reason.as_deref(),
            Some(
                "call is not connected, user has not joined, provider has not joined, \
                 media not yet published"
            )
        );
    }

    #[test]
    fn test_unconnected_call_is_not_eligible() {
        let m = machine();
        let now = Utc::now();
        let mut c = call();
        c.user_joined = true;
        c.provider_joined = true;
        c.media_published = true;
        assert_eq!(c.status, CallStatus::Created);

        let e = m.can_start_billing(&c, now);
        assert!(!e.can_start);
        assert_eq!(e.reason.as_deref(), Some("call is not connected"));

        c.status = CallStatus::Connected;
        assert!(m.can_start_billing(&c, now).can_start);
    }

    #[test]
    fn test_both_leave_before_billing_fails_call() {
        let m = machine();
        let now = Utc::now();
        let mut c = joined_both(now);

        let t = m.mark_left(&c, ParticipantRole::User, now);
        assert_eq!(t.outcome, LeaveOutcome::Waiting);
        apply(&mut c, &t);

        let t = m.mark_left(&c, ParticipantRole::Provider, now);
        assert_eq!(t.outcome, LeaveOutcome::Failed);
        apply(&mut c, &t);
        assert_eq!(c.status, CallStatus::Failed);
        assert!(c.call_end_time.is_some());
        assert!(!c.billing_started);

        assert_eq!(m.mark_left(&c, ParticipantRole::User, now).outcome, LeaveOutcome::Terminal);
        assert!(m.mark_joined(&c, ParticipantRole::User, now).patch.is_empty());
    }

    #[test]
    fn test_leave_during_billing_requires_finalize() {
        let m = machine();
        let now = Utc::now();
        let mut c = joined_both(now);
        c.status = CallStatus::BillingActive;
        c.billing_started = true;

        let t = m.mark_left(&c, ParticipantRole::Provider, now);
        assert_eq!(t.outcome, LeaveOutcome::FinalizeRequired);
        assert_eq!(t.patch.status, None);
    }

    #[test]
    fn test_grace_anchored_on_connection() {
        let policy = GracePeriodPolicy::new(true, Duration::seconds(15));
        let created = Utc::now();
        let mut c = Call::new("c1", "u1", "p1", CallType::Voice, created);
        assert_eq!(policy.deadline(&c), Some(created + Duration::seconds(15)));

        let connected = created + Duration::seconds(60);
        c.connected_at = Some(connected);
        assert!(!policy.has_elapsed(&c, connected + Duration::seconds(5)));
        assert!(policy.has_elapsed(&c, connected + Duration::seconds(15)));
    }
}
