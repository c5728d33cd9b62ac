//! Session configuration: delay math, tip tables, and cancellation policy.
//!
//! Every business constant lives here rather than inside the runtime, so
//! deployments can tune durations, tips, and refund fractions without code
//! changes, and tests can construct deterministic configurations.

use crate::types::{Money, PriorityClass, TipLevel};
use crate::session::SessionKind;
use std::time::Duration;

/// Delay multiplier and flat cost surcharge for one tip level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TipTerms {
    /// Factor applied to the base service duration (1.0 = unchanged)
    pub delay_multiplier: f64,
    /// Flat surcharge added to the quoted cost
    pub surcharge: Money,
}

impl TipTerms {
    /// Creates tip terms from a multiplier and surcharge
    #[must_use]
    pub const fn new(delay_multiplier: f64, surcharge: Money) -> Self {
        Self {
            delay_multiplier,
            surcharge,
        }
    }
}

/// Configuration for session creation, delay computation, and cancellation.
///
/// # Delay law
///
/// ```text
/// delay = base_duration(kind) * tip_multiplier
/// delay *= 1 - priority_bonus      (privileged ranks only)
/// delay = max(delay, min_delay)
/// ```
///
/// # Example
///
/// ```
/// use curbside_core::config::SessionConfig;
/// use curbside_core::{PriorityClass, SessionKind, TipLevel};
/// use std::time::Duration;
///
/// let config = SessionConfig::default();
/// let delay = config.service_delay(
///     SessionKind::Deliver,
///     TipLevel::Large,
///     PriorityClass::standard(),
/// );
/// assert_eq!(delay, Duration::from_secs(75)); // 300s * 0.25
/// ```
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Base service duration for parking a vehicle
    pub park_duration: Duration,
    /// Base service duration for retrieving a vehicle
    pub retrieve_duration: Duration,
    /// Base service duration for delivering a vehicle
    pub deliver_duration: Duration,
    /// Tip terms for [`TipLevel::Small`]
    pub small_tip: TipTerms,
    /// Tip terms for [`TipLevel::Medium`]
    pub medium_tip: TipTerms,
    /// Tip terms for [`TipLevel::Large`]
    pub large_tip: TipTerms,
    /// Highest rank (inclusive) that still counts as privileged
    pub privileged_max_rank: u8,
    /// Flat fraction shaved off the delay for privileged callers (0.0..1.0)
    pub priority_bonus: f64,
    /// Lower bound on any computed delay
    pub min_delay: Duration,
    /// Cancellation is refused when less than this remains before completion
    pub cancel_grace: Duration,
    /// Fraction of the charged cost refunded on cancellation
    pub cancel_refund_fraction: f64,
    /// How far past its completion time a session may sit before the expiry
    /// sweep force-completes it
    pub sweep_slack: Duration,
}

impl SessionConfig {
    /// Returns the base service duration for a session kind
    #[must_use]
    pub const fn base_duration(&self, kind: SessionKind) -> Duration {
        match kind {
            SessionKind::Park => self.park_duration,
            SessionKind::Retrieve => self.retrieve_duration,
            SessionKind::Deliver => self.deliver_duration,
        }
    }

    /// Returns the tip terms for a tip level
    #[must_use]
    pub const fn tip_terms(&self, tip: TipLevel) -> TipTerms {
        match tip {
            TipLevel::None => TipTerms::new(1.0, Money::ZERO),
            TipLevel::Small => self.small_tip,
            TipLevel::Medium => self.medium_tip,
            TipLevel::Large => self.large_tip,
        }
    }

    /// Computes the service delay for a session.
    ///
    /// Applies the tip multiplier to the kind's base duration, shaves the
    /// priority bonus for privileged ranks, and floors the result at
    /// [`min_delay`](Self::min_delay).
    #[must_use]
    pub fn service_delay(
        &self,
        kind: SessionKind,
        tip: TipLevel,
        class: PriorityClass,
    ) -> Duration {
        let base = self.base_duration(kind);
        let mut delay = base.mul_f64(self.tip_terms(tip).delay_multiplier.max(0.0));
        if class.rank() <= self.privileged_max_rank {
            delay = delay.mul_f64((1.0 - self.priority_bonus).clamp(0.0, 1.0));
        }
        delay.max(self.min_delay)
    }

    /// Computes the total amount charged for a session: quote plus tip
    /// surcharge.
    #[must_use]
    pub const fn charged_total(&self, quote: Money, tip: TipLevel) -> Money {
        quote.saturating_add(self.tip_terms(tip).surcharge)
    }

    /// Computes the partial refund issued on cancellation
    #[must_use]
    pub fn cancel_refund(&self, charged: Money) -> Money {
        charged.scaled(self.cancel_refund_fraction)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            park_duration: Duration::from_secs(30),
            retrieve_duration: Duration::from_secs(60),
            deliver_duration: Duration::from_secs(300),
            small_tip: TipTerms::new(0.75, Money::from_cents(50)),
            medium_tip: TipTerms::new(0.5, Money::from_cents(100)),
            large_tip: TipTerms::new(0.25, Money::from_cents(200)),
            privileged_max_rank: 5,
            priority_bonus: 0.25,
            min_delay: Duration::from_secs(5),
            cancel_grace: Duration::from_secs(30),
            cancel_refund_fraction: 0.75,
            sweep_slack: Duration::from_secs(60),
        }
    }
}
