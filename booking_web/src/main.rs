use std::{error::Error, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use booking::{
    domain::{
        booking::{BookingError, BookingService},
        core::{
            AllocationError, ConfirmationCode, Hotel, HotelRepository, NewReservation,
            Reservation, ReservationRepository,
        },
        ID_GENERATOR,
    },
    infrastructure::{
        core::{EventStoreHotelRepository, EventStoreReservationRepository},
        memory::{InMemoryHotelRepository, InMemoryReservationRepository},
    },
    BookingConfig, HotelSeed, Storage,
};
use eventstore::ClientSettings;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn, Level};

type AppState = Arc<BookingService>;

#[tokio::main]
async fn main() {
    match BookingConfig::load() {
        Ok(config) => {
            tracing_subscriber::fmt()
                .with_max_level(Level::from(&config.logger.level))
                .init();
            if let Err(error) = serve(&config).await {
                error!("application error: {}", error);
            }
        }
        Err(error) => {
            tracing_subscriber::fmt::init();
            error!("application error: {}", error)
        }
    }
}

async fn serve(config: &BookingConfig) -> Result<(), Box<dyn Error>> {
    let (reservations, hotels) = repositories(config).await?;
    let service = BookingService::from_config(reservations, hotels, &config.allocation);
    let addr = config.server.bind.parse::<SocketAddr>()?;
    info!(%addr, storage = ?config.storage, "booking server listening");
    axum::Server::bind(&addr)
        .serve(app(Arc::new(service)).into_make_service())
        .await?;
    Ok(())
}

async fn repositories(
    config: &BookingConfig,
) -> Result<(Arc<dyn ReservationRepository>, Arc<dyn HotelRepository>), Box<dyn Error>> {
    match &config.storage {
        Storage::Memory => {
            let hotels = InMemoryHotelRepository::new();
            seed_hotels(&hotels, &config.hotels).await?;
            Ok((
                Arc::new(InMemoryReservationRepository::new()),
                Arc::new(hotels),
            ))
        }
        Storage::EventStore {
            url,
            write_deadline_ms,
        } => {
            let settings = url.parse::<ClientSettings>()?;
            let client = eventstore::Client::new(settings)?;
            let reservations = EventStoreReservationRepository::new(client.clone())
                .with_write_deadline(Duration::from_millis(*write_deadline_ms));
            Ok((
                Arc::new(reservations),
                Arc::new(EventStoreHotelRepository::new(client)),
            ))
        }
    }
}

async fn seed_hotels(
    hotels: &dyn HotelRepository,
    seeds: &[HotelSeed],
) -> Result<(), Box<dyn Error>> {
    for seed in seeds {
        let id = ID_GENERATOR.generate().await;
        let mut hotel = Hotel::create(id, seed.name.clone(), seed.price)?;
        hotels.save(&mut hotel).await?;
        info!(%id, hotel = %seed.name, "hotel seeded");
    }
    Ok(())
}

fn app(service: AppState) -> Router {
    Router::new()
        .route("/hotels/", get(list_hotels))
        .route("/reservations/", post(create_reservation))
        .route("/reservations/list/", get(list_reservations))
        .route(
            "/reservations/:code/",
            get(find_reservation).delete(cancel_reservation),
        )
        .with_state(service)
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct Created {
    confirmation_number: ConfirmationCode,
}

async fn list_hotels(State(service): State<AppState>) -> Result<Json<Vec<Hotel>>, ApiError> {
    Ok(Json(service.list_available_hotels().await?))
}

async fn create_reservation(
    State(service): State<AppState>,
    body: Result<Json<NewReservation>, JsonRejection>,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    let Json(new) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let reservation = service.create_reservation(new).await?;
    Ok((
        StatusCode::CREATED,
        Json(Created {
            confirmation_number: reservation.confirmation_code(),
        }),
    ))
}

async fn list_reservations(
    State(service): State<AppState>,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    Ok(Json(service.list_reservations().await?))
}

/// A malformed code cannot belong to any reservation
fn parse_code(code: &str) -> Result<ConfirmationCode, ApiError> {
    code.parse().map_err(|_| ApiError::NotFound)
}

async fn find_reservation(
    State(service): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Reservation>, ApiError> {
    match service.find_reservation(parse_code(&code)?).await? {
        Some(reservation) => Ok(Json(reservation)),
        None => Err(ApiError::NotFound),
    }
}

async fn cancel_reservation(
    State(service): State<AppState>,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    let code = parse_code(&code)?;
    match service.cancel_reservation(code).await? {
        true => Ok(StatusCode::NO_CONTENT),
        false => Err(ApiError::NotFound),
    }
}

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound,
    Booking(BookingError),
}

impl From<BookingError> for ApiError {
    fn from(value: BookingError) -> Self {
        ApiError::Booking(value)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Booking(BookingError::Invalid(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Booking(BookingError::Allocation(
                AllocationError::DuplicateKeyRejected { .. }
                | AllocationError::ExhaustedRetries { .. },
            )) => StatusCode::CONFLICT,
            ApiError::Booking(
                BookingError::Allocation(AllocationError::StoreUnavailable(_))
                | BookingError::Store(_),
            ) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Booking(BookingError::DeadlineExceeded(_)) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(message) => message.clone(),
            ApiError::NotFound => "Reservation not found".to_owned(),
            ApiError::Booking(error) => error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(%status, error = ?self, "request failed");
        } else {
            warn!(%status, error = %self.message(), "request rejected");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}
