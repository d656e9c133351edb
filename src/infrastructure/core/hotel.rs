use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, ExpectedRevision};

use crate::domain::core::{Hotel, HotelEvent, HotelRepository};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::{read_category, stream_name, to_event_data};

#[derive(Clone)]
pub struct EventStoreHotelRepository {
    client: Client,
}

impl EventStoreHotelRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HotelRepository for EventStoreHotelRepository {
    async fn find_available(&self) -> Result<Vec<Hotel>, DataAccessError> {
        let mut available = read_category::<Hotel, _>(&self.client, |_| true)
            .await?
            .into_iter()
            .filter(|h| h.is_available())
            .collect::<Vec<_>>();
        available.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(available)
    }

    async fn save(&self, entity: &mut Hotel) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Hotel>(entity.id());
        let rev = match entity.peek() {
            Some(HotelEvent::HotelCreated { .. }) => ExpectedRevision::NoStream,
            Some(_) => ExpectedRevision::StreamExists,
            None => return Ok(false),
        };
        self.client
            .append_to_stream(
                &stream_name,
                &AppendToStreamOptions::default().expected_revision(rev),
                to_event_data(entity)?,
            )
            .await?;
        Ok(true)
    }
}
