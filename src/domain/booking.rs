//! Reservation workflow on top of the repositories.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use rand::rngs::StdRng;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::core::{
    AllocationError, ConfirmationCode, ConfirmationCodeAllocator, Hotel, HotelRepository,
    NewReservation, RandomSource, Reservation, ReservationError, ReservationRepository,
    RngSource,
};
use crate::domain::DataAccessError;
use crate::Allocation;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BookingPolicy {
    /// Allocate-then-insert rounds before a lost race is reported
    pub insert_attempts: u32,
    /// Upper bound on finding a free confirmation code for one request
    pub deadline: Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            insert_attempts: 5,
            deadline: Duration::from_secs(5),
        }
    }
}

impl From<&Allocation> for BookingPolicy {
    fn from(value: &Allocation) -> Self {
        Self {
            insert_attempts: value.insert_attempts.max(1),
            deadline: value.deadline(),
        }
    }
}

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Invalid reservation: {0}")]
    Invalid(#[from] ReservationError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("Store error: {0}")]
    Store(#[from] DataAccessError),
    #[error("No confirmation code could be allocated within {0:?}")]
    DeadlineExceeded(Duration),
}

pub struct BookingService<R = RngSource<StdRng>> {
    reservations: Arc<dyn ReservationRepository>,
    hotels: Arc<dyn HotelRepository>,
    allocator: ConfirmationCodeAllocator<R>,
    policy: BookingPolicy,
}

impl BookingService {
    pub fn from_config(
        reservations: Arc<dyn ReservationRepository>,
        hotels: Arc<dyn HotelRepository>,
        allocation: &Allocation,
    ) -> Self {
        let allocator =
            ConfirmationCodeAllocator::from_entropy().with_max_attempts(allocation.max_attempts);
        Self::new(reservations, hotels, allocator, allocation.into())
    }
}

impl<R: RandomSource> BookingService<R> {
    pub fn new(
        reservations: Arc<dyn ReservationRepository>,
        hotels: Arc<dyn HotelRepository>,
        allocator: ConfirmationCodeAllocator<R>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            reservations,
            hotels,
            allocator,
            policy,
        }
    }

    pub async fn list_available_hotels(&self) -> Result<Vec<Hotel>, BookingError> {
        Ok(self.hotels.find_available().await?)
    }

    /// All reservations, newest first
    pub async fn list_reservations(&self) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.reservations.find_all().await?)
    }

    pub async fn find_reservation(
        &self,
        code: ConfirmationCode,
    ) -> Result<Option<Reservation>, BookingError> {
        Ok(self.reservations.find_by_code(code).await?)
    }

    /// Creates a reservation under a freshly allocated confirmation code.
    ///
    /// A code taken between the existence check and the insert is never
    /// reused: each round allocates a new one. The deadline bounds allocation
    /// only. An insert, once sent, is awaited to the end so that a stored
    /// reservation is never reported as failed; the store bounds its own writes.
    pub async fn create_reservation(
        &self,
        new: NewReservation,
    ) -> Result<Reservation, BookingError> {
        Reservation::validate_new(&new)?;
        let deadline = Instant::now() + self.policy.deadline;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let code = self.allocate_until(deadline).await?;
            let mut reservation = Reservation::create(code, new.clone(), Utc::now())?;
            match self.reservations.insert(&mut reservation).await {
                Ok(()) => {
                    info!(
                        %code,
                        hotel = reservation.hotel_name(),
                        price = %reservation.total_price().to_grouped_string(),
                        "reservation created"
                    );
                    return Ok(reservation);
                }
                Err(DataAccessError::DuplicateKey(_)) if attempts < self.policy.insert_attempts => {
                    warn!(%code, attempts, "confirmation code taken before insert, retrying");
                }
                Err(DataAccessError::DuplicateKey(_)) => {
                    warn!(%code, attempts, "giving up after repeated duplicate keys");
                    return Err(AllocationError::DuplicateKeyRejected { code, attempts }.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn allocate_until(&self, deadline: Instant) -> Result<ConfirmationCode, BookingError> {
        // a store that answers at once would otherwise never let the timer fire
        if Instant::now() >= deadline {
            warn!(deadline = ?self.policy.deadline, "deadline passed between insert attempts");
            return Err(BookingError::DeadlineExceeded(self.policy.deadline));
        }
        let allocation = self.allocator.allocate(self.reservations.as_ref());
        match tokio::time::timeout_at(deadline, allocation).await {
            Ok(code) => Ok(code?),
            Err(_) => {
                warn!(deadline = ?self.policy.deadline, "no confirmation code before deadline");
                Err(BookingError::DeadlineExceeded(self.policy.deadline))
            }
        }
    }

    /// Deletes a reservation and releases its confirmation code
    pub async fn cancel_reservation(&self, code: ConfirmationCode) -> Result<bool, BookingError> {
        let Some(mut reservation) = self.reservations.find_by_code(code).await? else {
            return Ok(false);
        };
        let deleted = self.reservations.delete(&mut reservation).await?;
        if deleted {
            info!(%code, "reservation cancelled");
        }
        Ok(deleted)
    }
}
