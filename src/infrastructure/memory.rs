//! Process-local repositories. Nothing survives a restart.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::core::{
    ConfirmationCode, ConfirmationCodeLookup, Hotel, HotelId, HotelRepository, Reservation,
    ReservationRepository,
};
use crate::domain::{Aggregation, DataAccessError, Entity};

#[derive(Clone, Debug, Default)]
pub struct InMemoryReservationRepository {
    reservations: Arc<RwLock<HashMap<ConfirmationCode, Reservation>>>,
}

impl InMemoryReservationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfirmationCodeLookup for InMemoryReservationRepository {
    async fn exists_by_confirmation_code(
        &self,
        code: ConfirmationCode,
    ) -> Result<bool, DataAccessError> {
        Ok(self.reservations.read().await.contains_key(&code))
    }
}

#[async_trait]
impl ReservationRepository for InMemoryReservationRepository {
    async fn insert(&self, entity: &mut Reservation) -> Result<(), DataAccessError> {
        // the map key is the uniqueness constraint
        match self.reservations.write().await.entry(entity.id()) {
            Entry::Occupied(_) => Err(DataAccessError::DuplicateKey(entity.id().to_string())),
            Entry::Vacant(slot) => {
                entity.clear();
                slot.insert(entity.clone());
                Ok(())
            }
        }
    }

    async fn find_by_code(
        &self,
        code: ConfirmationCode,
    ) -> Result<Option<Reservation>, DataAccessError> {
        Ok(self.reservations.read().await.get(&code).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Reservation>, DataAccessError> {
        let mut all = self
            .reservations
            .read()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        all.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        Ok(all)
    }

    async fn delete(&self, entity: &mut Reservation) -> Result<bool, DataAccessError> {
        entity.clear();
        Ok(self.reservations.write().await.remove(&entity.id()).is_some())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryHotelRepository {
    hotels: Arc<RwLock<HashMap<HotelId, Hotel>>>,
}

impl InMemoryHotelRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HotelRepository for InMemoryHotelRepository {
    async fn find_available(&self) -> Result<Vec<Hotel>, DataAccessError> {
        let mut available = self
            .hotels
            .read()
            .await
            .values()
            .filter(|h| h.is_available())
            .cloned()
            .collect::<Vec<_>>();
        available.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(available)
    }

    async fn save(&self, entity: &mut Hotel) -> Result<bool, DataAccessError> {
        if entity.peek().is_none() {
            return Ok(false);
        }
        entity.clear();
        self.hotels.write().await.insert(entity.id(), entity.clone());
        Ok(true)
    }
}
