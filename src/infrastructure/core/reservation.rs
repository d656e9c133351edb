use std::time::Duration;

use async_trait::async_trait;
use eventstore::{
    AppendToStreamOptions, Client, DeleteStreamOptions, ExpectedRevision, ReadStreamOptions,
    StreamPosition,
};
use tracing::debug;

use crate::domain::core::{
    ConfirmationCode, ConfirmationCodeLookup, Reservation, ReservationEvent,
    ReservationRepository,
};
use crate::domain::{Aggregation, DataAccessError, Entity};
use crate::infrastructure::{
    read_category, read_entity, stream_name, to_event_data, try_from_resolved_event,
};

const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// A reservation whose stream ends in a deletion no longer exists, even if
/// removing the stream itself has not happened yet
fn is_live(event: &ReservationEvent) -> bool {
    !matches!(event, ReservationEvent::ReservationDeleted { .. })
}

/// Reservations stored one stream per confirmation code (`reservation-XQR12345`).
///
/// Creating a reservation appends to its stream expecting no stream, so the
/// server rejects a second reservation with the same code. Writes carry their
/// own gRPC deadline.
#[derive(Clone)]
pub struct EventStoreReservationRepository {
    client: Client,
    write_deadline: Duration,
}

impl EventStoreReservationRepository {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            write_deadline: WRITE_DEADLINE,
        }
    }

    pub fn with_write_deadline(mut self, write_deadline: Duration) -> Self {
        self.write_deadline = write_deadline;
        self
    }

    fn append_options(&self, rev: ExpectedRevision) -> AppendToStreamOptions {
        AppendToStreamOptions::default()
            .expected_revision(rev)
            .deadline(self.write_deadline)
    }
}

#[async_trait]
impl ConfirmationCodeLookup for EventStoreReservationRepository {
    async fn exists_by_confirmation_code(
        &self,
        code: ConfirmationCode,
    ) -> Result<bool, DataAccessError> {
        // only the last event decides
        let options = ReadStreamOptions::default()
            .position(StreamPosition::End)
            .max_count(1);
        let mut stream = match self
            .client
            .read_stream(stream_name::<Reservation>(code), &options)
            .await
        {
            Ok(stream) => stream,
            Err(eventstore::Error::ResourceNotFound | eventstore::Error::ResourceDeleted) => {
                return Ok(false)
            }
            Err(e) => return Err(e.into()),
        };
        match stream.next().await {
            Ok(Some(last)) => Ok(is_live(&try_from_resolved_event(&last)?)),
            Ok(None)
            | Err(eventstore::Error::ResourceNotFound | eventstore::Error::ResourceDeleted) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ReservationRepository for EventStoreReservationRepository {
    async fn insert(&self, entity: &mut Reservation) -> Result<(), DataAccessError> {
        if !matches!(
            entity.peek(),
            Some(ReservationEvent::ReservationCreated { .. })
        ) {
            return Err(DataAccessError::ClientSideError(
                "reservation has no pending creation".into(),
            ));
        }
        let stream_name = stream_name::<Reservation>(entity.id());
        let events = to_event_data(entity)?;
        match self
            .client
            .append_to_stream(
                &stream_name,
                &self.append_options(ExpectedRevision::NoStream),
                events,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(eventstore::Error::WrongExpectedVersion { .. }) => {
                debug!(stream = %stream_name, "reservation stream already exists");
                Err(DataAccessError::DuplicateKey(entity.id().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_code(
        &self,
        code: ConfirmationCode,
    ) -> Result<Option<Reservation>, DataAccessError> {
        read_entity(&self.client, code, is_live).await
    }

    async fn find_all(&self) -> Result<Vec<Reservation>, DataAccessError> {
        let mut all = read_category::<Reservation, _>(&self.client, is_live).await?;
        all.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(&b.id()))
        });
        Ok(all)
    }

    async fn delete(&self, entity: &mut Reservation) -> Result<bool, DataAccessError> {
        let stream_name = stream_name::<Reservation>(entity.id());
        entity.clear();
        entity.delete();
        let events = to_event_data(entity)?;
        match self
            .client
            .append_to_stream(
                &stream_name,
                &self.append_options(ExpectedRevision::StreamExists),
                events,
            )
            .await
        {
            Ok(_) => {}
            Err(
                eventstore::Error::WrongExpectedVersion { .. }
                | eventstore::Error::ResourceNotFound
                | eventstore::Error::ResourceDeleted,
            ) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        // if this fails the reservation already reads as absent, but its code
        // stays held until the stream is gone
        self.client
            .delete_stream(
                &stream_name,
                &DeleteStreamOptions::default().deadline(self.write_deadline),
            )
            .await?;
        Ok(true)
    }
}
