//! Integration tests for the session lifecycle: creation, completion,
//! cancellation, refunds, hooks, and the expiry sweep.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use curbside_core::bus::{EventBus, HookDecision, Priority};
use curbside_core::config::SessionConfig;
use curbside_core::environment::Clock;
use curbside_core::error::SessionError;
use curbside_core::session::{SessionKind, SessionRequest};
use curbside_core::types::{Account, Money, OwnerId, Plate, ResourceId, TipLevel};
use curbside_runtime::{Completion, Environment, SessionManager};
use curbside_testing::{
    BusRecorder, InMemoryBank, InMemoryGarage, RecordingNotifier, SteppingClock, test_clock,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

const TOPICS: &[&str] = &[
    "park:requested",
    "park:completed",
    "park:cancelled",
    "park:refunded",
    "retrieve:requested",
    "retrieve:completed",
    "retrieve:cancelled",
    "retrieve:refunded",
    "deliver:requested",
    "deliver:completed",
    "deliver:cancelled",
    "deliver:refunded",
];

struct Harness {
    manager: SessionManager,
    bank: Arc<InMemoryBank>,
    garage: Arc<InMemoryGarage>,
    notifier: Arc<RecordingNotifier>,
    recorder: Arc<BusRecorder>,
    bus: EventBus,
}

/// Flat config: no priority bonus, so delay math matches the raw tip table.
fn flat_config() -> SessionConfig {
    SessionConfig {
        priority_bonus: 0.0,
        ..SessionConfig::default()
    }
}

fn harness_with(config: SessionConfig, clock: Arc<dyn Clock>) -> Harness {
    curbside_testing::init_tracing();
    let bus = EventBus::new();
    let recorder = BusRecorder::new();
    for topic in TOPICS {
        recorder.attach(&bus, topic);
    }

    let bank = InMemoryBank::new();
    let garage = InMemoryGarage::new();
    let notifier = RecordingNotifier::new();
    let manager = SessionManager::new(
        config,
        bus.clone(),
        Environment {
            clock,
            economy: bank.clone(),
            persistence: garage.clone(),
            notifier: notifier.clone(),
        },
    );

    Harness {
        manager,
        bank,
        garage,
        notifier,
        recorder,
        bus,
    }
}

fn harness() -> Harness {
    harness_with(flat_config(), Arc::new(test_clock()))
}

fn owner(name: &str) -> OwnerId {
    OwnerId::new(name)
}

fn seeded_owner(h: &Harness, name: &str) -> OwnerId {
    let o = owner(name);
    h.bank.seed(&o, Account::Bank, Money::from_cents(100_000));
    o
}

fn deliver_request(o: &OwnerId, plate: &str) -> SessionRequest {
    SessionRequest::new(
        SessionKind::Deliver,
        o.clone(),
        Plate::new(plate),
        Money::from_cents(500),
    )
}

async fn park_lot(h: &Harness, name: &str, capacity: usize) -> ResourceId {
    let lot = ResourceId::new(name);
    h.manager.register_lot(lot.clone(), capacity).await;
    lot
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn create_charges_tip_surcharge_and_computes_delay() {
    let h = harness();
    let o = seeded_owner(&h, "alice");

    // cost 500, large tip: +200 flat, delay 300s * 0.25 = 75s
    let id = h
        .manager
        .create_session(deliver_request(&o, "DLV001").with_tip(TipLevel::Large))
        .await
        .unwrap();

    assert_eq!(
        h.bank.balance_of(&o, Account::Bank),
        Money::from_cents(100_000 - 700)
    );

    let session = h.manager.session(id).await.unwrap();
    assert_eq!(session.charged, Money::from_cents(700));
    assert_eq!((session.completes_at - session.created_at).num_seconds(), 75);
    assert_eq!(h.recorder.count("deliver:requested"), 1);
}

#[tokio::test]
async fn completes_at_matches_delay_law() {
    let h = harness();
    let o = seeded_owner(&h, "alice");
    let lot = park_lot(&h, "downtown", 5).await;

    // base 30s * 0.5 (medium tip) = 15s, above the 5s floor
    let id = h
        .manager
        .create_session(
            SessionRequest::new(
                SessionKind::Park,
                o,
                Plate::new("PRK001"),
                Money::from_cents(250),
            )
            .with_resource(lot)
            .with_tip(TipLevel::Medium),
        )
        .await
        .unwrap();

    let session = h.manager.session(id).await.unwrap();
    assert_eq!((session.completes_at - session.created_at).num_seconds(), 15);
}

#[tokio::test]
async fn park_without_lot_is_rejected() {
    let h = harness();
    let o = seeded_owner(&h, "alice");

    let result = h
        .manager
        .create_session(SessionRequest::new(
            SessionKind::Park,
            o,
            Plate::new("PRK001"),
            Money::from_cents(250),
        ))
        .await;
    assert!(matches!(result, Err(SessionError::Validation(_))));
    assert!(h.bank.ledger().is_empty());
}

#[tokio::test]
async fn unknown_lot_is_rejected() {
    let h = harness();
    let o = seeded_owner(&h, "alice");

    let result = h
        .manager
        .create_session(
            SessionRequest::new(
                SessionKind::Park,
                o,
                Plate::new("PRK001"),
                Money::from_cents(250),
            )
            .with_resource(ResourceId::new("nowhere")),
        )
        .await;
    assert!(matches!(result, Err(SessionError::Validation(_))));
}

#[tokio::test]
async fn duplicate_plate_is_rejected() {
    let h = harness();
    let o = seeded_owner(&h, "alice");

    h.manager
        .create_session(deliver_request(&o, "DLV001"))
        .await
        .unwrap();
    let result = h
        .manager
        .create_session(deliver_request(&o, "DLV001"))
        .await;

    assert!(matches!(result, Err(SessionError::Validation(_))));
    // Only the first charge went through
    assert_eq!(h.bank.ledger().len(), 1);
}

#[tokio::test]
async fn insufficient_funds_rejected_before_any_charge() {
    let h = harness();
    let o = owner("broke");
    h.bank.seed(&o, Account::Bank, Money::from_cents(100));

    let result = h.manager.create_session(deliver_request(&o, "DLV001")).await;
    assert!(matches!(result, Err(SessionError::Collaborator { .. })));
    assert!(h.bank.ledger().is_empty());
    assert_eq!(h.manager.active_sessions().await, 0);
}

#[tokio::test]
async fn charge_failure_creates_no_session() {
    let h = harness();
    let o = seeded_owner(&h, "alice");
    h.bank.fail_charges(true);

    let result = h.manager.create_session(deliver_request(&o, "DLV001")).await;
    assert!(matches!(result, Err(SessionError::Collaborator { .. })));
    assert_eq!(h.manager.active_sessions().await, 0);
    assert_eq!(h.recorder.count("deliver:requested"), 0);
}

// ============================================================================
// Hooks
// ============================================================================

#[tokio::test]
async fn create_pre_hook_veto_blocks_before_charging() {
    let h = harness();
    let o = seeded_owner(&h, "alice");

    h.bus.register_pre_hook(
        "session:create",
        Arc::new(|payload| {
            if payload["plate"] == "BANNED1" {
                return Ok(HookDecision::Veto);
            }
            Ok(HookDecision::Continue(payload))
        }),
        Priority::High,
    );

    let result = h.manager.create_session(deliver_request(&o, "BANNED1")).await;
    assert!(matches!(result, Err(SessionError::Vetoed { .. })));
    assert!(h.bank.ledger().is_empty());

    // Other plates pass through the same hook
    h.manager
        .create_session(deliver_request(&o, "DLV001"))
        .await
        .unwrap();
}

#[tokio::test]
async fn create_pre_hook_rewrites_caller_payload() {
    let h = harness();
    let o = seeded_owner(&h, "alice");

    h.bus.register_pre_hook(
        "session:create",
        Arc::new(|mut payload| {
            payload["payload"]["escort"] = json!(true);
            Ok(HookDecision::Continue(payload))
        }),
        Priority::Normal,
    );

    let id = h
        .manager
        .create_session(deliver_request(&o, "DLV001").with_payload(json!({ "spot": 4 })))
        .await
        .unwrap();

    let session = h.manager.session(id).await.unwrap();
    assert_eq!(session.payload["escort"], json!(true));
    assert_eq!(session.payload["spot"], json!(4));
}

#[tokio::test]
async fn create_pre_hook_cannot_reprice_the_session() {
    let h = harness();
    let o = seeded_owner(&h, "alice");

    // A hook rewriting the pricing fields changes nothing; only the caller
    // payload is carried back onto the session.
    h.bus.register_pre_hook(
        "session:create",
        Arc::new(|mut payload| {
            payload["quote"] = json!(1);
            payload["tip"] = json!("none");
            payload["priority"] = json!(1);
            payload["payload"]["stamped"] = json!(true);
            Ok(HookDecision::Continue(payload))
        }),
        Priority::Normal,
    );

    let id = h
        .manager
        .create_session(
            deliver_request(&o, "DLV001")
                .with_tip(TipLevel::Large)
                .with_payload(json!({})),
        )
        .await
        .unwrap();

    // Charge and delay still come from the request: 500 + 200 surcharge,
    // 300s * 0.25
    let session = h.manager.session(id).await.unwrap();
    assert_eq!(session.charged, Money::from_cents(700));
    assert_eq!((session.completes_at - session.created_at).num_seconds(), 75);
    assert_eq!(session.payload["stamped"], json!(true));
}

#[tokio::test]
async fn cancel_pre_hook_can_veto() {
    let h = harness();
    let o = seeded_owner(&h, "alice");
    let id = h
        .manager
        .create_session(deliver_request(&o, "DLV001"))
        .await
        .unwrap();

    h.bus.register_pre_hook(
        "session:cancel",
        Arc::new(|_| Ok(HookDecision::Veto)),
        Priority::High,
    );

    let result = h.manager.cancel_session(id, &o, false).await;
    assert!(matches!(result, Err(SessionError::Vetoed { .. })));
    // Session survives a vetoed cancellation
    assert!(h.manager.session(id).await.is_some());
}

// ============================================================================
// Completion
// ============================================================================

#[tokio::test(start_paused = true)]
async fn timer_fires_and_commits_the_session() {
    let h = harness();
    let o = seeded_owner(&h, "alice");
    let lot = park_lot(&h, "downtown", 5).await;

    h.manager
        .create_session(
            SessionRequest::new(
                SessionKind::Park,
                o.clone(),
                Plate::new("PRK001"),
                Money::from_cents(250),
            )
            .with_resource(lot.clone()),
        )
        .await
        .unwrap();

    // Default park delay is 30s; paused time auto-advances through it
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert_eq!(h.manager.active_sessions().await, 0);
    assert_eq!(h.manager.lot_occupancy(&lot).await, Some((1, 5)));
    assert_eq!(h.recorder.count("park:completed"), 1);

    let stored = h.garage.state_of("PRK001").unwrap();
    assert_eq!(stored["stored"], json!(true));
    assert_eq!(h.garage.owner_of("PRK001"), Some(o));
}

#[tokio::test]
async fn complete_session_is_idempotent() {
    let h = harness();
    let o = seeded_owner(&h, "alice");
    let id = h
        .manager
        .create_session(deliver_request(&o, "DLV001"))
        .await
        .unwrap();

    assert_eq!(h.manager.complete_session(id).await, Completion::Committed);
    assert_eq!(
        h.manager.complete_session(id).await,
        Completion::AlreadyRemoved
    );
    assert_eq!(h.recorder.count("deliver:completed"), 1);
    // No refund happened anywhere
    assert_eq!(h.bank.refunded_to(&o), Money::ZERO);
}

#[tokio::test]
async fn persistence_failure_refunds_in_full_and_releases_the_spot() {
    let h = harness();
    let o = seeded_owner(&h, "alice");
    let lot = park_lot(&h, "downtown", 5).await;
    h.garage.fail_writes(true);

    let id = h
        .manager
        .create_session(
            SessionRequest::new(
                SessionKind::Park,
                o.clone(),
                Plate::new("PRK001"),
                Money::from_cents(250),
            )
            .with_resource(lot.clone()),
        )
        .await
        .unwrap();

    let outcome = h.manager.complete_session(id).await;
    assert!(matches!(outcome, Completion::Refunded { .. }));

    // Paid but not serviced never happens: the full charge came back
    assert_eq!(h.bank.balance_of(&o, Account::Bank), Money::from_cents(100_000));
    assert_eq!(h.manager.lot_occupancy(&lot).await, Some((0, 5)));
    assert_eq!(h.recorder.count("park:refunded"), 1);
    assert_eq!(h.recorder.count("park:completed"), 0);
    assert!(!h.notifier.messages_for(&o).is_empty());
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancel_refunds_three_quarters_and_clears_the_queue() {
    let h = harness();
    let o = seeded_owner(&h, "alice");
    let lot = park_lot(&h, "downtown", 5).await;

    let id = h
        .manager
        .create_session(
            SessionRequest::new(
                SessionKind::Park,
                o.clone(),
                Plate::new("PRK001"),
                Money::from_cents(1000),
            )
            .with_resource(lot.clone()),
        )
        .await
        .unwrap();
    assert_eq!(h.manager.queue_position(&lot, id).await, 1);

    let refund = h.manager.cancel_session(id, &o, false).await.unwrap();
    assert_eq!(refund, Money::from_cents(750));
    assert_eq!(
        h.bank.balance_of(&o, Account::Bank),
        Money::from_cents(100_000 - 1000 + 750)
    );
    assert_eq!(h.manager.queue_position(&lot, id).await, 0);
    assert_eq!(h.manager.active_sessions().await, 0);
    assert_eq!(h.recorder.count("park:cancelled"), 1);
}

#[tokio::test]
async fn cancel_requires_owner_or_admin() {
    let h = harness();
    let o = seeded_owner(&h, "alice");
    let stranger = owner("mallory");
    let id = h
        .manager
        .create_session(deliver_request(&o, "DLV001"))
        .await
        .unwrap();

    let result = h.manager.cancel_session(id, &stranger, false).await;
    assert!(matches!(result, Err(SessionError::Unauthorized(_))));
    assert!(h.manager.session(id).await.is_some());

    // Administrative override bypasses the ownership check
    h.manager.cancel_session(id, &stranger, true).await.unwrap();
    assert!(h.manager.session(id).await.is_none());
}

#[tokio::test]
async fn cancel_refused_inside_grace_window() {
    let h = harness();
    let o = seeded_owner(&h, "alice");
    let lot = park_lot(&h, "downtown", 5).await;

    // Medium tip parks in 15s, inside the 30s grace window
    let id = h
        .manager
        .create_session(
            SessionRequest::new(
                SessionKind::Park,
                o.clone(),
                Plate::new("PRK001"),
                Money::from_cents(250),
            )
            .with_resource(lot)
            .with_tip(TipLevel::Medium),
        )
        .await
        .unwrap();

    let result = h.manager.cancel_session(id, &o, false).await;
    assert!(matches!(result, Err(SessionError::Validation(_))));
    assert!(h.manager.session(id).await.is_some());
    assert_eq!(h.bank.refunded_to(&o), Money::ZERO);
}

#[tokio::test]
async fn cancel_of_unknown_session_reports_it() {
    let h = harness();
    let o = owner("alice");
    let result = h
        .manager
        .cancel_session(curbside_core::SessionId::new(), &o, false)
        .await;
    assert!(matches!(result, Err(SessionError::UnknownSession(_))));
}

// ============================================================================
// Expiry sweep
// ============================================================================

#[tokio::test]
async fn sweep_force_completes_sessions_whose_timer_was_lost() {
    let clock = SteppingClock::new(test_clock().now());
    let h = harness_with(flat_config(), Arc::new(clock.clone()));
    let o = seeded_owner(&h, "alice");

    let id = h
        .manager
        .create_session(deliver_request(&o, "DLV001"))
        .await
        .unwrap();

    // Simulate a lost timer: shutdown aborts it, the session stays
    h.manager.shutdown().await;
    assert!(h.manager.session(id).await.is_some());

    // Not yet overdue by more than the sweep slack
    clock.advance_secs(300);
    assert_eq!(h.manager.sweep_once().await, 0);

    // Now well past completes_at + slack
    clock.advance_secs(120);
    assert_eq!(h.manager.sweep_once().await, 1);
    assert!(h.manager.session(id).await.is_none());
    assert_eq!(h.recorder.count("deliver:completed"), 1);
}

#[tokio::test(start_paused = true)]
async fn sweeper_task_runs_periodically() {
    let clock = SteppingClock::new(test_clock().now());
    let h = harness_with(flat_config(), Arc::new(clock.clone()));
    let o = seeded_owner(&h, "alice");

    let id = h
        .manager
        .create_session(deliver_request(&o, "DLV001"))
        .await
        .unwrap();
    h.manager.shutdown().await; // lose the timer (also clears any sweeper)

    clock.advance_secs(500);
    h.manager.spawn_sweeper(Duration::from_secs(10)).await;
    tokio::time::sleep(Duration::from_secs(25)).await;

    assert!(h.manager.session(id).await.is_none());
    h.manager.shutdown().await;
}
