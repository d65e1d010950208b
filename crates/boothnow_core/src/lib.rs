pub mod billing;
pub mod domain;
pub mod engine;
pub mod ports;

pub use billing::{compute_cost, compute_elapsed, Elapsed, Rates};
pub use domain::{
    Booth, PaymentOutcome, Receipt, ReportedUsage, Reservation, ReservationStatus, Session,
    SessionClosure, SessionStatus, TimerSnapshot,
};
pub use engine::{EngineError, EngineResult, SessionEngine, SessionPolicy, SweepReport};
pub use ports::{
    Clock, DatabaseService, EventPublisher, PaymentCapture, PaymentService, PortError,
    PortResult, SessionEvent, SystemClock,
};
