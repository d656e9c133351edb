pub mod core;
pub mod memory;

use eventstore::{Client, EventData, ReadStreamOptions, ResolvedEvent};
use serde_json::{json, Value};

use crate::domain::{Aggregation, DataAccessError, Entity, Event, Id};

use std::{collections::BTreeMap, fmt::Display};

impl From<eventstore::Error> for DataAccessError {
    fn from(value: eventstore::Error) -> Self {
        match value {
            eventstore::Error::ConnectionClosed
            | eventstore::Error::Grpc { .. }
            | eventstore::Error::GrpcConnectionError(_)
            | eventstore::Error::DeadlineExceeded
            | eventstore::Error::InitializationError(_) => Self::ConnectionError(Box::new(value)),
            eventstore::Error::ServerError(_)
            | eventstore::Error::NotLeaderException(_)
            | eventstore::Error::AccessDenied
            | eventstore::Error::UnsupportedFeature
            | eventstore::Error::InternalParsingError(_)
            | eventstore::Error::InternalClientError => Self::QueryError(Box::new(value)),
            eventstore::Error::ResourceNotFound | eventstore::Error::ResourceDeleted => {
                Self::ReadError(Box::new(value))
            }
            eventstore::Error::ResourceAlreadyExists
            | eventstore::Error::WrongExpectedVersion { .. } => Self::WriteError(Box::new(value)),
            eventstore::Error::IllegalStateError(_) => Self::ClientSideError(Box::new(value)),
        }
    }
}

impl From<EventConvertError> for DataAccessError {
    fn from(value: EventConvertError) -> Self {
        DataAccessError::ClientSideError(Box::new(value))
    }
}

#[derive(Debug)]
pub struct EventConvertError;

impl std::error::Error for EventConvertError {}

impl Display for EventConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to convert event")
    }
}

impl From<serde_json::Error> for EventConvertError {
    fn from(_value: serde_json::Error) -> Self {
        EventConvertError
    }
}

/// Parses the entity id out of a `<entity>-<id>` stream name
fn entity_id<I: Id>(stream_id: &str) -> Option<I> {
    stream_id
        .split_once('-')
        .and_then(|(_, id)| id.parse::<I>().ok())
}

fn stream_name<E: Entity>(id: E::Id) -> String {
    E::ENTITY_NAME.to_owned() + "-" + &id.to_string()
}

/// Category stream maintained by the server's `$by_category` projection
fn category_stream<E: Entity>() -> String {
    "$ce-".to_owned() + E::ENTITY_NAME
}

/// Stores an event as its variant name plus its fields; the id lives in the stream name
fn from_event<E: Event>(event: E) -> Result<EventData, EventConvertError> {
    let (event_type, mut data) = match serde_json::to_value(event)? {
        Value::Object(root) => root.into_iter().next().ok_or(EventConvertError)?,
        _ => return Err(EventConvertError),
    };
    data.as_object_mut()
        .ok_or(EventConvertError)?
        .remove("id");
    Ok(EventData::json(event_type, data)?)
}

fn try_from_resolved_event<E: Event>(value: &ResolvedEvent) -> Result<E, EventConvertError> {
    // prefer the link target when reading a category stream
    let event = value
        .event
        .as_ref()
        .or(value.link.as_ref())
        .ok_or(EventConvertError)?;
    let id = entity_id::<E::Id>(&event.stream_id).ok_or(EventConvertError)?;
    let mut data: Value = serde_json::from_slice(event.data.as_ref())?;
    data.as_object_mut()
        .ok_or(EventConvertError)?
        .insert("id".to_owned(), json!(id));
    let json = json!({ &event.event_type: data });
    Ok(serde_json::from_value(json)?)
}

fn to_event_data<A: Aggregation>(entity: &mut A) -> Result<Vec<EventData>, EventConvertError> {
    entity.pop_all().into_iter().map(from_event).collect()
}

/// Rebuilds one entity from its own stream.
///
/// `None` if the stream is missing or deleted, or if `keep` rejects its last event.
async fn read_entity<A, F>(
    client: &Client,
    id: A::Id,
    keep: F,
) -> Result<Option<A>, DataAccessError>
where
    A: Aggregation,
    F: Fn(&A::Event) -> bool,
{
    let mut stream = match client
        .read_stream(stream_name::<A>(id), &Default::default())
        .await
    {
        Ok(stream) => stream,
        Err(eventstore::Error::ResourceNotFound | eventstore::Error::ResourceDeleted) => {
            return Ok(None)
        }
        Err(e) => return Err(e.into()),
    };
    let mut events = Vec::new();
    loop {
        match stream.next().await {
            Ok(Some(e)) => events.push(try_from_resolved_event::<A::Event>(&e)?),
            Ok(None) => break,
            Err(eventstore::Error::ResourceNotFound | eventstore::Error::ResourceDeleted) => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(rebuild(events, keep))
}

/// Applies events in order; `None` if there are none or `keep` rejects the last one
fn rebuild<A, F>(events: impl IntoIterator<Item = A::Event>, keep: F) -> Option<A>
where
    A: Aggregation,
    F: Fn(&A::Event) -> bool,
{
    let mut entity = A::default();
    let mut alive = false;
    let mut seen = false;
    for event in events {
        alive = keep(&event);
        seen = true;
        entity.apply(event);
    }
    entity.clear();
    (seen && alive).then_some(entity)
}

/// Rebuilds every entity of a kind from its category stream.
///
/// `keep` decides from the last event of a stream whether the entity still exists.
async fn read_category<A, F>(client: &Client, keep: F) -> Result<Vec<A>, DataAccessError>
where
    A: Aggregation,
    F: Fn(&A::Event) -> bool,
{
    let options = ReadStreamOptions::default().resolve_link_tos();
    let mut stream = match client.read_stream(category_stream::<A>(), &options).await {
        Ok(stream) => stream,
        Err(eventstore::Error::ResourceNotFound) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut entities: BTreeMap<String, (A, bool)> = BTreeMap::new();
    loop {
        match stream.next().await {
            Ok(Some(resolved)) => {
                // links to deleted streams no longer resolve
                let Some(event) = resolved.event.as_ref() else {
                    continue;
                };
                let stream_id = event.stream_id.clone();
                let event = try_from_resolved_event::<A::Event>(&resolved)?;
                let alive = keep(&event);
                let entry = entities.entry(stream_id).or_insert_with(|| (A::default(), true));
                entry.0.apply(event);
                entry.1 = alive;
            }
            Ok(None) => break,
            Err(eventstore::Error::ResourceNotFound) => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(entities
        .into_values()
        .filter(|(_, alive)| *alive)
        .map(|(mut entity, _)| {
            entity.clear();
            entity
        })
        .collect())
}
