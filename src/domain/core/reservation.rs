use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue};

use super::{ConfirmationCode, ConfirmationCodeLookup, Money};

/// Reservation repository
///
/// The confirmation code is the reservation's key. Implementations must
/// enforce its uniqueness on insert regardless of earlier existence checks.
#[async_trait]
pub trait ReservationRepository: ConfirmationCodeLookup {
    /// Stores a new reservation, failing with [`DataAccessError::DuplicateKey`]
    /// if its confirmation code is already assigned
    async fn insert(&self, entity: &mut Reservation) -> Result<(), DataAccessError>;
    /// Finds a reservation by its confirmation code
    async fn find_by_code(
        &self,
        code: ConfirmationCode,
    ) -> Result<Option<Reservation>, DataAccessError>;
    /// All reservations, newest first
    async fn find_all(&self) -> Result<Vec<Reservation>, DataAccessError>;
    /// Deletes the reservation, releasing its confirmation code
    async fn delete(&self, entity: &mut Reservation) -> Result<bool, DataAccessError>;
}

/// What a customer asks to book
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub hotel_name: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub customer_name: String,
    #[serde(default, rename = "guests_list")]
    pub guests: Vec<String>,
    pub total_price: Money,
}

/// Reservation events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationEvent {
    ReservationCreated {
        id: ConfirmationCode,
        hotel_name: String,
        check_in: NaiveDate,
        check_out: NaiveDate,
        customer_name: String,
        guests: Vec<String>,
        total_price: Money,
        created_at: DateTime<Utc>,
    },
    ReservationDeleted {
        id: ConfirmationCode,
    },
}

impl Event for ReservationEvent {
    type Id = ConfirmationCode;
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Reservation {
    #[serde(rename = "confirmation_number")]
    id: ConfirmationCode,
    hotel_name: String,
    check_in: NaiveDate,
    check_out: NaiveDate,
    customer_name: String,
    #[serde(rename = "guests_list")]
    guests: Vec<String>,
    total_price: Money,
    created_at: DateTime<Utc>,
    #[serde(skip)]
    events: EventQueue<ReservationEvent>,
}

impl Reservation {
    pub fn create(
        id: ConfirmationCode,
        new: NewReservation,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ReservationError> {
        Self::validate_new(&new)?;
        let NewReservation {
            hotel_name,
            check_in,
            check_out,
            customer_name,
            guests,
            total_price,
        } = new;
        let mut entity = Reservation {
            id,
            hotel_name: hotel_name.clone(),
            check_in,
            check_out,
            customer_name: customer_name.clone(),
            guests: guests.clone(),
            total_price,
            created_at,
            ..Default::default()
        };
        entity.events.push(ReservationEvent::ReservationCreated {
            id,
            hotel_name,
            check_in,
            check_out,
            customer_name,
            guests,
            total_price,
            created_at,
        });
        Ok(entity)
    }

    /// Records the deletion; the repository applies it
    pub fn delete(&mut self) {
        self.events
            .push(ReservationEvent::ReservationDeleted { id: self.id });
    }

    pub fn confirmation_code(&self) -> ConfirmationCode {
        self.id
    }

    pub fn hotel_name(&self) -> &str {
        &self.hotel_name
    }

    pub fn check_in(&self) -> NaiveDate {
        self.check_in
    }

    pub fn check_out(&self) -> NaiveDate {
        self.check_out
    }

    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    pub fn guests(&self) -> &[String] {
        &self.guests
    }

    pub fn total_price(&self) -> &Money {
        &self.total_price
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Checks a request before any confirmation code is spent on it
    pub fn validate_new(new: &NewReservation) -> Result<(), ReservationError> {
        Self::validate_hotel_name(&new.hotel_name)?;
        Self::validate_customer_name(&new.customer_name)?;
        Self::validate_stay(new.check_in, new.check_out)?;
        Self::validate_guests(&new.guests)
    }

    fn validate_id(&self, id: &ConfirmationCode) -> Result<(), ReservationError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(ReservationError::MismatchedId),
        }
    }

    fn validate_hotel_name(name: &str) -> Result<(), ReservationError> {
        match name.trim().is_empty() {
            true => Err(ReservationError::HotelNameIsBlank),
            false => Ok(()),
        }
    }

    fn validate_customer_name(name: &str) -> Result<(), ReservationError> {
        match name.trim().is_empty() {
            true => Err(ReservationError::CustomerNameIsBlank),
            false => Ok(()),
        }
    }

    fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<(), ReservationError> {
        if check_in >= check_out {
            return Err(ReservationError::InvalidStay);
        }
        Ok(())
    }

    fn validate_guests(guests: &[String]) -> Result<(), ReservationError> {
        if guests.iter().any(|g| g.trim().is_empty()) {
            return Err(ReservationError::GuestNameIsBlank);
        }
        Ok(())
    }
}

impl Entity for Reservation {
    type Id = ConfirmationCode;

    const ENTITY_NAME: &'static str = "reservation";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Reservation {
    type Event = ReservationEvent;
    type Error = ReservationError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            ReservationEvent::ReservationCreated {
                hotel_name,
                check_in,
                check_out,
                customer_name,
                guests,
                ..
            } => {
                Self::validate_hotel_name(hotel_name)?;
                Self::validate_customer_name(customer_name)?;
                Self::validate_stay(*check_in, *check_out)?;
                Self::validate_guests(guests)
            }
            ReservationEvent::ReservationDeleted { id } => self.validate_id(id),
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ReservationEvent::ReservationCreated {
                id,
                hotel_name,
                check_in,
                check_out,
                customer_name,
                guests,
                total_price,
                created_at,
            } => {
                let new = NewReservation {
                    hotel_name,
                    check_in,
                    check_out,
                    customer_name,
                    guests,
                    total_price,
                };
                if let Ok(entity) = Self::create(id, new, created_at) {
                    *self = entity;
                }
            }
            ReservationEvent::ReservationDeleted { id } => {
                if self.id == id {
                    self.delete();
                }
            }
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

impl PartialEq for Reservation {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.hotel_name == other.hotel_name
            && self.check_in == other.check_in
            && self.check_out == other.check_out
            && self.customer_name == other.customer_name
            && self.guests == other.guests
            && self.total_price == other.total_price
            && self.created_at == other.created_at
    }
}

impl Eq for Reservation {}

#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum ReservationError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Hotel name cannot be blank")]
    HotelNameIsBlank,
    #[display(fmt = "Customer name cannot be blank")]
    CustomerNameIsBlank,
    #[display(fmt = "Guest names cannot be blank")]
    GuestNameIsBlank,
    #[display(fmt = "Check-out must be after check-in")]
    InvalidStay,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn request() -> NewReservation {
        NewReservation {
            hotel_name: "Harbour View".to_owned(),
            check_in: date(2024, 5, 1),
            check_out: date(2024, 5, 4),
            customer_name: "Lin Wei".to_owned(),
            guests: vec!["Lin Wei".to_owned(), "Zhao Min".to_owned()],
            total_price: Money::from_cents(45000),
        }
    }

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 20, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_reservation_create() {
        let code = "XQR12345".parse().unwrap();
        let reservation = Reservation::create(code, request(), created_at()).unwrap();
        assert_eq!(reservation.confirmation_code(), code);
        assert_eq!(reservation.hotel_name(), "Harbour View");
        assert_eq!(reservation.check_out(), date(2024, 5, 4));
        assert_eq!(reservation.guests().len(), 2);
        assert!(matches!(
            reservation.peek(),
            Some(ReservationEvent::ReservationCreated { id, .. }) if *id == code
        ));
    }

    #[test]
    fn test_reservation_rejects_invalid_requests() {
        let code = ConfirmationCode::default();

        let mut blank_hotel = request();
        blank_hotel.hotel_name = "  ".to_owned();
        assert_eq!(
            Reservation::create(code, blank_hotel, created_at()).err(),
            Some(ReservationError::HotelNameIsBlank)
        );

        let mut blank_customer = request();
        blank_customer.customer_name = String::new();
        assert_eq!(
            Reservation::validate_new(&blank_customer),
            Err(ReservationError::CustomerNameIsBlank)
        );

        let mut same_day = request();
        same_day.check_out = same_day.check_in;
        assert_eq!(
            Reservation::validate_new(&same_day),
            Err(ReservationError::InvalidStay)
        );

        let mut blank_guest = request();
        blank_guest.guests.push(" ".to_owned());
        assert_eq!(
            Reservation::validate_new(&blank_guest),
            Err(ReservationError::GuestNameIsBlank)
        );
    }

    #[test]
    fn test_reservation_rebuilt_from_events() {
        let code = "ABC00042".parse().unwrap();
        let mut original = Reservation::create(code, request(), created_at()).unwrap();
        let mut rebuilt = Reservation::default();
        for event in original.pop_all() {
            rebuilt.validate(&event).unwrap();
            rebuilt.apply(event);
        }
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_delete_requires_matching_id() {
        let code = "ABC00042".parse().unwrap();
        let mut reservation = Reservation::create(code, request(), created_at()).unwrap();
        reservation.clear();
        let other = ReservationEvent::ReservationDeleted {
            id: "ZZZ99999".parse().unwrap(),
        };
        assert_eq!(
            reservation.validate(&other),
            Err(ReservationError::MismatchedId)
        );
        reservation.delete();
        assert_eq!(
            reservation.pop(),
            Some(ReservationEvent::ReservationDeleted { id: code })
        );
    }

    #[test]
    fn test_reservation_json_uses_public_field_names() {
        let code = "XQR12345".parse().unwrap();
        let reservation = Reservation::create(code, request(), created_at()).unwrap();
        let value = serde_json::to_value(&reservation).unwrap();
        assert_eq!(value["confirmation_number"], json!("XQR12345"));
        assert_eq!(value["check_in"], json!("2024-05-01"));
        assert_eq!(value["guests_list"], json!(["Lin Wei", "Zhao Min"]));
        assert_eq!(value["total_price"], json!("450.00"));
        assert!(value.get("events").is_none());
    }

    #[test]
    fn test_new_reservation_accepts_decimal_price() {
        let body = json!({
            "hotel_name": "Harbour View",
            "check_in": "2024-05-01",
            "check_out": "2024-05-03",
            "customer_name": "Lin Wei",
            "guests_list": ["Lin Wei"],
            "total_price": "300.00",
        });
        let new = serde_json::from_value::<NewReservation>(body).unwrap();
        assert_eq!(new.total_price, Money::from_cents(30000));
        assert_eq!(new.guests, ["Lin Wei"]);

        let bad = json!({
            "hotel_name": "Harbour View",
            "check_in": "2024-05-01",
            "check_out": "2024-05-03",
            "customer_name": "Lin Wei",
            "total_price": "300.001",
        });
        assert!(serde_json::from_value::<NewReservation>(bad).is_err());
    }
}
