use async_trait::async_trait;
use derive_more::{Deref, Display, Error, From, FromStr};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, EventQueue, Id};

use super::Money;

/// Hotel repository
#[async_trait]
pub trait HotelRepository: Send + Sync {
    /// Hotels currently taking reservations, ordered by name
    async fn find_available(&self) -> Result<Vec<Hotel>, DataAccessError>;
    /// Saves the hotel's pending events
    async fn save(&self, entity: &mut Hotel) -> Result<bool, DataAccessError>;
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    From,
    FromStr,
    Deref,
    Default,
)]
pub struct HotelId(u64);

impl Id for HotelId {}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HotelEvent {
    HotelCreated {
        id: HotelId,
        name: String,
        price: Money,
        available: bool,
    },
    HotelAvailabilityChanged {
        id: HotelId,
        available: bool,
    },
}

impl Event for HotelEvent {
    type Id = HotelId;
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct Hotel {
    id: HotelId,
    name: String,
    price: Money,
    available: bool,
    #[serde(skip)]
    events: EventQueue<HotelEvent>,
}

impl Hotel {
    /// New hotels start out available
    pub fn create(id: HotelId, name: String, price: Money) -> Result<Self, HotelError> {
        Self::validate_name(&name)?;
        let mut entity = Hotel {
            id,
            name: name.clone(),
            price,
            available: true,
            ..Default::default()
        };
        entity.events.push(HotelEvent::HotelCreated {
            id,
            name,
            price,
            available: true,
        });
        Ok(entity)
    }

    pub fn change_availability(&mut self, available: bool) {
        if self.available == available {
            return;
        }
        self.available = available;
        self.events.push(HotelEvent::HotelAvailabilityChanged {
            id: self.id,
            available,
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> &Money {
        &self.price
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    fn validate_id(&self, id: &HotelId) -> Result<(), HotelError> {
        match self.id == *id {
            true => Ok(()),
            false => Err(HotelError::MismatchedId),
        }
    }

    fn validate_name(name: &str) -> Result<(), HotelError> {
        match name.trim().is_empty() {
            true => Err(HotelError::NameIsBlank),
            false => Ok(()),
        }
    }
}

impl Entity for Hotel {
    type Id = HotelId;

    const ENTITY_NAME: &'static str = "hotel";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Hotel {
    type Event = HotelEvent;
    type Error = HotelError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            HotelEvent::HotelCreated { name, .. } => Self::validate_name(name),
            HotelEvent::HotelAvailabilityChanged { id, .. } => self.validate_id(id),
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            HotelEvent::HotelCreated {
                id,
                name,
                price,
                available,
            } => {
                if let Ok(mut entity) = Self::create(id, name, price) {
                    entity.change_availability(available);
                    *self = entity;
                }
            }
            HotelEvent::HotelAvailabilityChanged { id, available } => {
                if self.id == id {
                    self.change_availability(available);
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

impl PartialEq for Hotel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.price == other.price
            && self.available == other.available
    }
}

impl Eq for Hotel {}

#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum HotelError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Name cannot be blank")]
    NameIsBlank,
}
