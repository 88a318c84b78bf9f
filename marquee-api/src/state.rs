use marquee_infra::{AuditDispatcher, SeatLockService, SessionRepository};

use crate::bookings::BookingCoordinator;
use crate::hub::Hub;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRepository,
    pub locks: SeatLockService,
    pub audit: AuditDispatcher,
    pub hub: Hub,
    pub coordinator: BookingCoordinator,
}
