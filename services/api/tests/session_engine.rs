//! End-to-end lifecycle tests for the session engine over the in-memory store.
//!
//! Run with: `cargo test -p api --test session_engine`

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use boothnow_core::{
    DatabaseService, EngineError, PaymentOutcome, ReportedUsage, ReservationStatus, SessionEvent,
    SessionStatus,
};
use chrono::Duration;
use common::{CaptureCall, Harness};
use uuid::Uuid;

/// Marks the booth available with no hold, as a partner availability sync would.
async fn partner_sync_frees_booth(h: &Harness) {
    let mut booth = h.db.get_booth(h.booth.id).await.unwrap();
    booth.is_available = true;
    booth.held_by_reservation = None;
    h.db.insert_booth(booth).await;
}

#[tokio::test]
async fn fifteen_minute_session_bills_seven_fifty_and_frees_the_booth() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();

    let reservation = h
        .engine
        .reserve(user, h.booth.id, 30, Some("pi_123".to_string()))
        .await
        .unwrap();
    assert!(!h.booth_available().await);

    let session = h.engine.start(h.booth.id, reservation.id, user).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert!(!h.booth_available().await);

    h.clock.advance(Duration::minutes(15));
    let receipt = h.engine.end(session.id, user, None).await.unwrap();

    assert_eq!(receipt.amount, 7.50);
    assert_eq!(receipt.billed_minutes, 15.0);
    assert_eq!(receipt.session.status, SessionStatus::Completed);
    assert_eq!(receipt.session.total_cost, Some(7.50));
    assert_eq!(
        receipt.payment,
        PaymentOutcome::Captured {
            capture_id: "cap_pi_123".to_string()
        }
    );
    assert_eq!(
        h.payments.captures(),
        vec![CaptureCall {
            intent: "pi_123".to_string(),
            amount_minor: 750,
            currency: "usd".to_string(),
        }]
    );
    assert!(h.booth_available().await);

    let reservation = h.db.get_reservation(reservation.id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Completed);
}

#[tokio::test]
async fn ending_immediately_charges_the_minimum() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();
    let reservation = h.engine.reserve(user, h.booth.id, 10, None).await.unwrap();
    let session = h.engine.start(h.booth.id, reservation.id, user).await.unwrap();

    let receipt = h.engine.end(session.id, user, None).await.unwrap();

    assert_eq!(receipt.amount, 5.00);
    assert_eq!(receipt.payment, PaymentOutcome::NotRequired);
    assert!(h.payments.captures().is_empty());
}

#[tokio::test]
async fn reported_usage_is_echoed_but_never_billed() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();
    let reservation = h.engine.reserve(user, h.booth.id, 60, None).await.unwrap();
    let session = h.engine.start(h.booth.id, reservation.id, user).await.unwrap();
    h.clock.advance(Duration::minutes(20));

    let reported = ReportedUsage {
        total_minutes: Some(3.0),
        total_cost: Some(1.50),
    };
    let receipt = h.engine.end(session.id, user, Some(reported)).await.unwrap();

    assert_eq!(receipt.amount, 10.00);
    assert_eq!(receipt.reported, Some(reported));
}

#[tokio::test]
async fn reserving_an_occupied_booth_is_a_conflict() {
    let h = Harness::new().await;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    h.engine.reserve(first, h.booth.id, 30, None).await.unwrap();

    let err = h
        .engine
        .reserve(second, h.booth.id, 30, None)
        .await
        .unwrap_err();

    match err {
        EngineError::Conflict(message) => assert!(message.contains("currently occupied")),
        other => panic!("expected a conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn start_on_a_booth_claimed_by_someone_else_creates_no_session() {
    let h = Harness::new().await;
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let stale = h.engine.reserve(first, h.booth.id, 30, None).await.unwrap();

    // A partner sync frees the booth and someone else takes it.
    partner_sync_frees_booth(&h).await;
    let fresh = h.engine.reserve(second, h.booth.id, 30, None).await.unwrap();

    let err = h.engine.start(h.booth.id, stale.id, first).await.unwrap_err();

    assert!(matches!(err, EngineError::Conflict(_)));
    assert_eq!(h.db.session_count_for_booth(h.booth.id).await, 0);
    let booth = h.db.get_booth(h.booth.id).await.unwrap();
    assert_eq!(booth.held_by_reservation, Some(fresh.id));
}

#[tokio::test]
async fn concurrent_starts_admit_exactly_one_session() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();
    let reservation = h.engine.reserve(user, h.booth.id, 30, None).await.unwrap();

    let (a, b) = tokio::join!(
        h.engine.start(h.booth.id, reservation.id, user),
        h.engine.start(h.booth.id, reservation.id, user),
    );

    let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(winners, 1);
    let loser = if a.is_ok() { b } else { a };
    match loser.unwrap_err() {
        EngineError::Conflict(message) => assert!(message.contains("currently occupied")),
        other => panic!("expected a conflict, got {:?}", other),
    }
    assert_eq!(h.db.session_count_for_booth(h.booth.id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_starts_on_separate_tasks_leave_one_winner_and_one_conflict() {
    for _ in 0..50 {
        let h = Harness::new().await;
        let user = Uuid::new_v4();
        let reservation_id = h.engine.reserve(user, h.booth.id, 30, None).await.unwrap().id;

        let first = tokio::spawn({
            let engine = h.engine.clone();
            let booth_id = h.booth.id;
            async move { engine.start(booth_id, reservation_id, user).await }
        });
        let second = tokio::spawn({
            let engine = h.engine.clone();
            let booth_id = h.booth.id;
            async move { engine.start(booth_id, reservation_id, user).await }
        });
        let outcomes = [first.await.unwrap(), second.await.unwrap()];

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, Err(EngineError::Conflict(_)))));
        assert_eq!(h.db.session_count_for_booth(h.booth.id).await, 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_pending_reservations_racing_for_an_available_booth() {
    let h = Harness::new().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();

    // Partner syncs mark the booth free after each hold, leaving two pending
    // reservations against one available booth.
    let alice_reservation = h.engine.reserve(alice, h.booth.id, 30, None).await.unwrap();
    partner_sync_frees_booth(&h).await;
    let bob_reservation = h.engine.reserve(bob, h.booth.id, 30, None).await.unwrap();
    partner_sync_frees_booth(&h).await;

    let alice_start = tokio::spawn({
        let engine = h.engine.clone();
        let booth_id = h.booth.id;
        async move { engine.start(booth_id, alice_reservation.id, alice).await }
    });
    let bob_start = tokio::spawn({
        let engine = h.engine.clone();
        let booth_id = h.booth.id;
        async move { engine.start(booth_id, bob_reservation.id, bob).await }
    });
    let outcomes = [alice_start.await.unwrap(), bob_start.await.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, Err(EngineError::Conflict(_)))));
    assert_eq!(h.db.session_count_for_booth(h.booth.id).await, 1);
    assert!(!h.booth_available().await);
}

#[tokio::test]
async fn ending_twice_is_rejected_without_toggling_the_booth() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();
    let reservation = h.engine.reserve(user, h.booth.id, 30, None).await.unwrap();
    let session = h.engine.start(h.booth.id, reservation.id, user).await.unwrap();
    h.engine.end(session.id, user, None).await.unwrap();
    h.events.take();

    let err = h.engine.end(session.id, user, None).await.unwrap_err();

    assert!(matches!(err, EngineError::InvalidState(_)));
    assert!(h.events.take().is_empty());
    assert!(h.booth_available().await);
}

#[tokio::test]
async fn another_users_session_looks_missing() {
    let h = Harness::new().await;
    let owner = Uuid::new_v4();
    let reservation = h.engine.reserve(owner, h.booth.id, 30, None).await.unwrap();
    let session = h.engine.start(h.booth.id, reservation.id, owner).await.unwrap();

    let err = h
        .engine
        .end(session.id, Uuid::new_v4(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::NotFound(_)));
    let session = h.db.get_session(session.id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
}

#[tokio::test]
async fn lifecycle_events_are_published_in_order() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();
    let reservation = h.engine.reserve(user, h.booth.id, 30, None).await.unwrap();
    let session = h.engine.start(h.booth.id, reservation.id, user).await.unwrap();
    h.clock.advance(Duration::minutes(12));
    h.engine.end(session.id, user, None).await.unwrap();

    assert_eq!(
        h.events.take(),
        vec![
            SessionEvent::BoothAvailabilityChanged {
                booth_id: h.booth.id,
                available: false,
            },
            SessionEvent::BoothAvailabilityChanged {
                booth_id: h.booth.id,
                available: true,
            },
            SessionEvent::SessionEnded {
                session_id: session.id,
                user_id: user,
                booth_id: h.booth.id,
                total_cost: 6.00,
            },
        ]
    );
}

#[tokio::test]
async fn failed_capture_still_completes_the_session() {
    let h = Harness::new().await;
    h.payments.reject_captures();
    let user = Uuid::new_v4();
    let reservation = h
        .engine
        .reserve(user, h.booth.id, 30, Some("pi_declined".to_string()))
        .await
        .unwrap();
    let session = h.engine.start(h.booth.id, reservation.id, user).await.unwrap();
    h.clock.advance(Duration::minutes(30));

    let receipt = h.engine.end(session.id, user, None).await.unwrap();

    assert_eq!(receipt.amount, 15.00);
    assert!(matches!(receipt.payment, PaymentOutcome::Failed { .. }));
    assert_eq!(receipt.session.status, SessionStatus::Completed);
    assert!(h.booth_available().await);
}

#[tokio::test]
async fn timer_is_monotonic_and_matches_the_final_bill() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();
    let reservation = h.engine.reserve(user, h.booth.id, 60, None).await.unwrap();
    let session = h.engine.start(h.booth.id, reservation.id, user).await.unwrap();

    let mut last_cost = 0.0;
    let mut last_minutes = -1;
    for _ in 0..25 {
        h.clock.advance(Duration::seconds(90));
        let tick = h.engine.timer(session.id, user).await.unwrap();
        assert!(tick.current_cost >= last_cost);
        assert!(tick.elapsed_minutes >= last_minutes);
        last_cost = tick.current_cost;
        last_minutes = tick.elapsed_minutes;
    }
    assert_eq!(last_minutes, 37);

    let receipt = h.engine.end(session.id, user, None).await.unwrap();
    assert_eq!(receipt.amount, last_cost);
    assert_eq!(receipt.amount, 18.75);

    let after = h.engine.timer(session.id, user).await.unwrap();
    assert_eq!(after.status, SessionStatus::Completed);
    assert_eq!(after.current_cost, 18.75);
}

#[tokio::test]
async fn watchdog_caps_overdue_sessions_at_the_maximum_duration() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();
    let reservation = h
        .engine
        .reserve(user, h.booth.id, 240, Some("pi_long".to_string()))
        .await
        .unwrap();
    let session = h.engine.start(h.booth.id, reservation.id, user).await.unwrap();

    h.clock.advance(Duration::minutes(239));
    let report = h.engine.expire_overdue().await.unwrap();
    assert_eq!(report.sessions_expired, 0);

    h.clock.advance(Duration::minutes(61));
    let report = h.engine.expire_overdue().await.unwrap();
    assert_eq!(report.sessions_expired, 1);

    let closed = h.db.get_session(session.id).await.unwrap();
    assert_eq!(closed.status, SessionStatus::Completed);
    assert_eq!(closed.total_minutes, Some(240.0));
    assert_eq!(closed.total_cost, Some(120.00));
    assert_eq!(closed.end_time, Some(session.start_time + Duration::minutes(240)));
    assert_eq!(h.payments.captures()[0].amount_minor, 12_000);
    assert!(h.booth_available().await);
}

#[tokio::test]
async fn ending_past_the_maximum_bills_the_capped_duration() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();
    let reservation = h.engine.reserve(user, h.booth.id, 240, None).await.unwrap();
    let session = h.engine.start(h.booth.id, reservation.id, user).await.unwrap();

    h.clock.advance(Duration::minutes(300));
    let tick = h.engine.timer(session.id, user).await.unwrap();
    assert_eq!(tick.current_cost, 120.00);
    assert_eq!(tick.elapsed_minutes, 240);

    let receipt = h.engine.end(session.id, user, None).await.unwrap();

    assert_eq!(receipt.amount, 120.00);
    assert_eq!(receipt.billed_minutes, 240.0);
    assert_eq!(
        receipt.session.end_time,
        Some(session.start_time + Duration::minutes(240))
    );
}

#[tokio::test]
async fn stale_reservations_expire_and_release_their_hold() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();
    let reservation = h
        .engine
        .reserve(user, h.booth.id, 30, Some("pi_stale".to_string()))
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(16));
    let report = h.engine.expire_overdue().await.unwrap();

    assert_eq!(report.reservations_expired, 1);
    assert!(h.booth_available().await);
    assert_eq!(h.payments.voids(), vec!["pi_stale".to_string()]);
    let err = h.engine.start(h.booth.id, reservation.id, user).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn cancelling_a_reservation_frees_the_booth() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();
    let reservation = h
        .engine
        .reserve(user, h.booth.id, 30, Some("pi_cancel".to_string()))
        .await
        .unwrap();

    let cancelled = h.engine.cancel_reservation(user, reservation.id).await.unwrap();

    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert!(h.booth_available().await);
    assert_eq!(h.payments.voids(), vec!["pi_cancel".to_string()]);
    let again = h.engine.cancel_reservation(user, reservation.id).await;
    assert!(matches!(again, Err(EngineError::InvalidState(_))));
}

#[tokio::test]
async fn cancel_is_free_only_inside_the_grace_window() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();
    let reservation = h
        .engine
        .reserve(user, h.booth.id, 30, Some("pi_grace".to_string()))
        .await
        .unwrap();
    let session = h.engine.start(h.booth.id, reservation.id, user).await.unwrap();
    h.clock.advance(Duration::seconds(90));

    let cancelled = h.engine.cancel(session.id, user).await.unwrap();

    assert_eq!(cancelled.status, SessionStatus::Cancelled);
    assert_eq!(cancelled.total_cost, Some(0.0));
    assert!(h.payments.captures().is_empty());
    assert_eq!(h.payments.voids(), vec!["pi_grace".to_string()]);
    assert!(h.booth_available().await);

    // A second session runs past the window and has to be ended.
    let reservation = h.engine.reserve(user, h.booth.id, 30, None).await.unwrap();
    let session = h.engine.start(h.booth.id, reservation.id, user).await.unwrap();
    h.clock.advance(Duration::seconds(121));
    let err = h.engine.cancel(session.id, user).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn requested_minutes_must_fit_the_maximum() {
    let h = Harness::new().await;
    let user = Uuid::new_v4();

    for minutes in [0, -5, 241] {
        let err = h
            .engine
            .reserve(user, h.booth.id, minutes, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
    assert!(h.booth_available().await);
}

#[tokio::test]
async fn unknown_booth_is_not_found() {
    let h = Harness::new().await;
    let err = h
        .engine
        .reserve(Uuid::new_v4(), Uuid::new_v4(), 30, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}
