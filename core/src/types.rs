//! Domain identifiers and value types.
//!
//! Newtype wrappers keep the distinct identity spaces (sessions, owners,
//! plates, lots) from being confused at call sites, and [`Money`] keeps all
//! amounts in integer cents so no floating point ever touches a balance.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session.
///
/// Session ids are random (UUID v4) rather than derived from
/// owner/plate/timestamp, so two requests for the same vehicle in the same
/// clock second can never collide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Creates a new random `SessionId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a `SessionId` from a UUID
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the player/customer who requested a session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    /// Creates an `OwnerId` from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vehicle plate, the subject of a session.
///
/// At most one active session may reference a plate at any instant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Plate(String);

impl Plate {
    /// Creates a `Plate`, normalizing to uppercase with surrounding
    /// whitespace trimmed
    pub fn new(plate: impl AsRef<str>) -> Self {
        Self(plate.as_ref().trim().to_uppercase())
    }

    /// Returns the plate as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Plate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a bounded resource (a parking lot with finite spots).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates a `ResourceId` from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Money amount in cents (avoids floating point issues)
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a new `Money` amount from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if this amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Saturating addition
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Scales the amount by a fraction, rounding down to whole cents.
    ///
    /// Negative fractions are treated as zero.
    #[must_use]
    pub fn scaled(self, fraction: f64) -> Self {
        let fraction = fraction.max(0.0);
        // Precision loss above ~2^52 cents is acceptable for game-economy sums.
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Self((self.0 as f64 * fraction).floor() as u64)
    }
}

impl std::ops::Add for Money {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Which of the owner's accounts a charge or refund goes against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Account {
    /// Cash on hand
    Cash,
    /// Bank account
    Bank,
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cash => write!(f, "cash"),
            Self::Bank => write!(f, "bank"),
        }
    }
}

/// Caller-tier ranking used to order queue service and discount delay.
///
/// Lower rank is served first. Rank 1 is conventionally VIP; rank 10 is the
/// standard customer tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriorityClass(u8);

impl PriorityClass {
    /// Creates a priority class with the given rank (lower = served first)
    #[must_use]
    pub const fn new(rank: u8) -> Self {
        Self(rank)
    }

    /// VIP tier (rank 1)
    #[must_use]
    pub const fn vip() -> Self {
        Self(1)
    }

    /// Standard tier (rank 10)
    #[must_use]
    pub const fn standard() -> Self {
        Self(10)
    }

    /// Returns the numeric rank
    #[must_use]
    pub const fn rank(&self) -> u8 {
        self.0
    }
}

impl Default for PriorityClass {
    fn default() -> Self {
        Self::standard()
    }
}

/// Tip level offered by the customer.
///
/// Larger tips shorten the computed service delay and add a flat surcharge
/// to the amount charged; the exact numbers come from
/// [`SessionConfig`](crate::config::SessionConfig).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TipLevel {
    /// No tip
    #[default]
    None,
    /// Small tip
    Small,
    /// Medium tip
    Medium,
    /// Large tip
    Large,
}

impl std::fmt::Display for TipLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Small => write!(f, "small"),
            Self::Medium => write!(f, "medium"),
            Self::Large => write!(f, "large"),
        }
    }
}
