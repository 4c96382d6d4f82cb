use actix_web::{delete, error, get, post, put, web, HttpResponse, Responder};
use chrono::Utc;

use crate::actions;
use crate::auth::AuthenticatedUser;
use crate::error::ServiceError;
use crate::models::{ApiResponse, BookingResponse};
use crate::queue::BookingEventService;
use crate::requests::{
    parse_id, BookGuideRequest, CancelBookingRequest, NewUserRequest, RegisterGuideRequest,
    UpdateBookingStatusRequest, UpdateGuideRequest,
};
use crate::DbPool;

#[derive(Debug, serde::Serialize)]
struct RouteNotFound {
    success: bool,
    message: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(
            web::scope("/api/touristguide")
                .service(register_guide)
                .service(list_guides)
                .service(list_unavailable_guides)
                .service(get_guide_by_user)
                .service(book_guide)
                .service(cancel_booking)
                .service(get_user_bookings)
                .service(get_guide_bookings)
                .service(update_booking_status)
                .service(get_guide)
                .service(update_guide)
                .service(delete_guide),
        )
        .service(web::scope("/api/users").service(add_user).service(get_user));
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let detail = err.to_string();
        let response = match err {
            error::JsonPayloadError::ContentType => {
                HttpResponse::UnsupportedMediaType().body("Unsupported Media Type")
            }
            error::JsonPayloadError::Deserialize(ref err) => {
                HttpResponse::BadRequest().json(ApiResponse { message: err.to_string() })
            }
            _ => HttpResponse::BadRequest().json(ApiResponse { message: detail }),
        };
        error::InternalError::from_response(err, response).into()
    })
}

pub async fn route_not_found() -> HttpResponse {
    HttpResponse::NotFound().json(RouteNotFound {
        success: false,
        message: "Route not found".to_string(),
    })
}

#[get("/api/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[post("")]
async fn add_user(pool: web::Data<DbPool>, form: web::Json<NewUserRequest>) -> actix_web::Result<impl Responder> {
    let registration = form.into_inner().validate()?;

    let user = web::block(move || {
        let mut conn = pool.get()?;
        actions::insert_new_user(&mut conn, &registration)
    })
    .await??;

    Ok(HttpResponse::Created().json(user))
}

#[get("/{id}")]
async fn get_user(pool: web::Data<DbPool>, path: web::Path<String>) -> actix_web::Result<impl Responder> {
    let user_id = parse_id(&path, "Invalid user ID")?;

    let user = web::block(move || {
        let mut conn = pool.get()?;
        actions::get_user_by_id(&mut conn, user_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(user))
}

#[post("")]
async fn register_guide(
    pool: web::Data<DbPool>,
    user: AuthenticatedUser,
    form: web::Json<RegisterGuideRequest>,
) -> actix_web::Result<impl Responder> {
    let registration = form.into_inner().validate()?;

    let guide = web::block(move || {
        let mut conn = pool.get()?;
        let owner = match &registration.email {
            Some(email) => actions::get_user_by_email(&mut conn, email)?,
            None => actions::get_user_by_id(&mut conn, user.id())?,
        };
        actions::register_guide(&mut conn, &owner, &registration)
    })
    .await??;

    Ok(HttpResponse::Created().json(guide))
}

#[put("/{id}")]
async fn update_guide(
    pool: web::Data<DbPool>,
    _user: AuthenticatedUser,
    path: web::Path<String>,
    form: web::Json<UpdateGuideRequest>,
) -> actix_web::Result<impl Responder> {
    let guide_id = parse_id(&path, "Invalid guide ID")?;
    let changes = form.into_inner().validate()?;

    let guide = web::block(move || {
        let mut conn = pool.get()?;
        actions::update_guide(&mut conn, guide_id, &changes)
    })
    .await??;

    Ok(HttpResponse::Ok().json(guide))
}

#[delete("/{id}")]
async fn delete_guide(
    pool: web::Data<DbPool>,
    _user: AuthenticatedUser,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    let guide_id = parse_id(&path, "Invalid guide ID")?;

    web::block(move || {
        let mut conn = pool.get()?;
        actions::delete_guide(&mut conn, guide_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(ApiResponse {
        message: "Tourist guide deleted successfully.".to_string(),
    }))
}

#[get("/{id}")]
async fn get_guide(pool: web::Data<DbPool>, path: web::Path<String>) -> actix_web::Result<impl Responder> {
    let guide_id = parse_id(&path, "Invalid guide ID")?;

    let profile = web::block(move || {
        let mut conn = pool.get()?;
        actions::get_guide_profile(&mut conn, guide_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(profile))
}

#[get("/user/{user_id}")]
async fn get_guide_by_user(
    pool: web::Data<DbPool>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    let user_id = parse_id(&path, "Invalid user ID")?;

    let profile = web::block(move || {
        let mut conn = pool.get()?;
        actions::get_guide_profile_by_user(&mut conn, user_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(profile))
}

#[get("")]
async fn list_guides(pool: web::Data<DbPool>) -> actix_web::Result<impl Responder> {
    let guides = web::block(move || {
        let mut conn = pool.get()?;
        actions::list_guides(&mut conn, false)
    })
    .await??;

    if guides.is_empty() {
        return Err(ServiceError::not_found("No tourist guides found.").into());
    }
    Ok(HttpResponse::Ok().json(guides))
}

#[get("/unavailable/all")]
async fn list_unavailable_guides(pool: web::Data<DbPool>) -> actix_web::Result<impl Responder> {
    let guides = web::block(move || {
        let mut conn = pool.get()?;
        actions::list_guides(&mut conn, true)
    })
    .await??;

    if guides.is_empty() {
        return Err(ServiceError::not_found("No unavailable tourist guides found.").into());
    }
    Ok(HttpResponse::Ok().json(guides))
}

#[post("/book/{id}")]
async fn book_guide(
    pool: web::Data<DbPool>,
    events: web::Data<BookingEventService>,
    path: web::Path<String>,
    form: web::Json<BookGuideRequest>,
) -> actix_web::Result<impl Responder> {
    let guide_id = parse_id(&path, "Invalid IDs")?;
    let today = Utc::now().date_naive();
    let request = form.into_inner().validate(today)?;

    let booking = web::block(move || {
        let mut conn = pool.get()?;
        actions::book_guide(&mut conn, guide_id, &request, today)
    })
    .await??;

    let scheduled = booking.clone();
    let events = events.clone();
    tokio::spawn(async move {
        if let Err(e) = events.schedule_completion(&scheduled).await {
            log::error!("Failed to schedule completion of booking {}: {:?}", scheduled.id, e);
        }
    });

    Ok(HttpResponse::Created().json(BookingResponse {
        message: "Guide booked successfully.".to_string(),
        booking,
    }))
}

#[put("/cancel/{booking_id}")]
async fn cancel_booking(
    pool: web::Data<DbPool>,
    _user: AuthenticatedUser,
    path: web::Path<String>,
    body: web::Bytes,
) -> actix_web::Result<impl Responder> {
    let booking_id = parse_id(&path, "Invalid booking ID")?;

    // The body is optional; an absent reason falls back to the default.
    let request: CancelBookingRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CancelBookingRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ServiceError::validation(e.to_string()))?
    };
    let cancellation = request.into_cancellation();
    let today = Utc::now().date_naive();

    let booking = web::block(move || {
        let mut conn = pool.get()?;
        actions::cancel_booking(&mut conn, booking_id, &cancellation, today)
    })
    .await??;

    Ok(HttpResponse::Ok().json(BookingResponse {
        message: "Booking cancelled successfully.".to_string(),
        booking,
    }))
}

#[put("/bookings/{booking_id}")]
async fn update_booking_status(
    pool: web::Data<DbPool>,
    _user: AuthenticatedUser,
    path: web::Path<String>,
    form: web::Json<UpdateBookingStatusRequest>,
) -> actix_web::Result<impl Responder> {
    let booking_id = parse_id(&path, "Invalid booking ID")?;
    let (next, cancellation) = form.into_inner().into_parts();
    let today = Utc::now().date_naive();

    let booking = web::block(move || {
        let mut conn = pool.get()?;
        actions::transition_booking(&mut conn, booking_id, next, &cancellation, today)
    })
    .await??;

    Ok(HttpResponse::Ok().json(BookingResponse {
        message: format!("Booking status updated to {}.", booking.status),
        booking,
    }))
}

#[get("/bookings/user/{user_id}")]
async fn get_user_bookings(
    pool: web::Data<DbPool>,
    _user: AuthenticatedUser,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    let user_id = parse_id(&path, "Invalid user ID")?;

    let bookings = web::block(move || {
        let mut conn = pool.get()?;
        actions::bookings_for_user(&mut conn, user_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(bookings))
}

#[get("/bookings/guide/{guide_id}")]
async fn get_guide_bookings(
    pool: web::Data<DbPool>,
    _user: AuthenticatedUser,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    let guide_id = parse_id(&path, "Invalid guide ID")?;

    let bookings = web::block(move || {
        let mut conn = pool.get()?;
        actions::bookings_for_guide(&mut conn, guide_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(bookings))
}
