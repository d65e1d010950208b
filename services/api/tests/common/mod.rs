//! Shared fixtures for the integration tests: a hand-driven clock, a payment
//! processor that records calls, and an event sink.

#![allow(dead_code)]

use api_lib::adapters::InMemoryDb;
use async_trait::async_trait;
use boothnow_core::{
    Booth, Clock, EventPublisher, PaymentCapture, PaymentService, PortError, PortResult, Rates,
    SessionEngine, SessionEvent, SessionPolicy,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureCall {
    pub intent: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Records every capture and void. Can be told to reject captures.
#[derive(Default)]
pub struct RecordingPayments {
    pub captures: Mutex<Vec<CaptureCall>>,
    pub voids: Mutex<Vec<String>>,
    pub reject_captures: Mutex<bool>,
}

impl RecordingPayments {
    pub fn captures(&self) -> Vec<CaptureCall> {
        self.captures.lock().unwrap().clone()
    }

    pub fn voids(&self) -> Vec<String> {
        self.voids.lock().unwrap().clone()
    }

    pub fn reject_captures(&self) {
        *self.reject_captures.lock().unwrap() = true;
    }
}

#[async_trait]
impl PaymentService for RecordingPayments {
    async fn capture(
        &self,
        payment_intent_id: &str,
        amount_minor: i64,
        currency: &str,
    ) -> PortResult<PaymentCapture> {
        if *self.reject_captures.lock().unwrap() {
            return Err(PortError::Unexpected("card_declined".to_string()));
        }
        self.captures.lock().unwrap().push(CaptureCall {
            intent: payment_intent_id.to_string(),
            amount_minor,
            currency: currency.to_string(),
        });
        Ok(PaymentCapture {
            capture_id: format!("cap_{}", payment_intent_id),
        })
    }

    async fn void(&self, payment_intent_id: &str) -> PortResult<()> {
        self.voids.lock().unwrap().push(payment_intent_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingEvents {
    pub fn take(&self) -> Vec<SessionEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(&self, event: SessionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn default_policy() -> SessionPolicy {
    SessionPolicy {
        rates: Rates {
            rate_per_minute: 0.50,
            minimum_charge: 5.00,
            currency: "usd".to_string(),
        },
        max_session: Duration::minutes(240),
        reservation_hold: Duration::minutes(15),
        cancel_grace: Duration::seconds(120),
    }
}

/// An engine wired to in-memory collaborators, with one available booth.
pub struct Harness {
    pub engine: Arc<SessionEngine>,
    pub db: Arc<InMemoryDb>,
    pub clock: Arc<ManualClock>,
    pub payments: Arc<RecordingPayments>,
    pub events: Arc<RecordingEvents>,
    pub booth: Booth,
}

impl Harness {
    pub async fn new() -> Self {
        let db = Arc::new(InMemoryDb::new());
        let booth = db
            .seed_booth("KUBO Central", 14.5995, 120.9842, "Ayala Ave, Makati")
            .await;
        let clock = Arc::new(ManualClock::new());
        let payments = Arc::new(RecordingPayments::default());
        let events = Arc::new(RecordingEvents::default());
        let engine = Arc::new(SessionEngine::new(
            db.clone(),
            payments.clone(),
            events.clone(),
            clock.clone(),
            default_policy(),
        ));
        Self {
            engine,
            db,
            clock,
            payments,
            events,
            booth,
        }
    }

    pub async fn booth_available(&self) -> bool {
        use boothnow_core::DatabaseService;
        self.db.get_booth(self.booth.id).await.unwrap().is_available
    }
}
