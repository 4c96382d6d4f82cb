use std::collections::HashMap;

use chrono::NaiveDate;
use diesel::prelude::*;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::lifecycle::{self, AvailabilityEffect};
use crate::models::{
    Booking, BookingDetails, BookingStatus, GuideChanges, GuideProfile, GuideSummary, NewBooking,
    NewTouristGuide, NewUser, TouristGuide, User, UserSummary, DEFAULT_USER_ROLE, TOURIST_GUIDE_ROLE,
};
use crate::requests::{BookingRequest, Cancellation, GuideRegistration, UserRegistration};
use crate::schema::{guide_bookings, tourist_guides, users};

type DbResult<T> = Result<T, ServiceError>;

pub fn insert_new_user(conn: &mut PgConnection, registration: &UserRegistration) -> DbResult<User> {
    let new_user = NewUser {
        id: Uuid::new_v4(),
        username: registration.username.clone(),
        email: registration.email.clone(),
        role: DEFAULT_USER_ROLE.to_owned(),
        img: registration.img.clone(),
        city: registration.city.clone(),
        country: registration.country.clone(),
        contact_number: registration.contact_number.clone(),
    };

    let user = diesel::insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result(conn)?;

    Ok(user)
}

pub fn get_user_by_id(conn: &mut PgConnection, user_id: Uuid) -> DbResult<User> {
    users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("User not found."))
}

pub fn get_user_by_email(conn: &mut PgConnection, email: &str) -> DbResult<User> {
    users::table
        .filter(users::email.eq(email))
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("User with this email not found."))
}

/// Create the guide profile of `user` and flip the user's role, atomically.
pub fn register_guide(
    conn: &mut PgConnection,
    user: &User,
    registration: &GuideRegistration,
) -> DbResult<TouristGuide> {
    let location = registration
        .location
        .clone()
        .or_else(|| user.city.clone())
        .or_else(|| user.country.clone())
        .ok_or_else(|| ServiceError::validation("Missing fields: location"))?;

    conn.transaction::<_, ServiceError, _>(|conn| {
        let existing: Vec<TouristGuide> = tourist_guides::table
            .filter(
                tourist_guides::user_id
                    .eq(user.id)
                    .or(tourist_guides::license_number.eq(&registration.license_number)),
            )
            .select(TouristGuide::as_select())
            .for_update()
            .load(conn)?;

        lifecycle::check_registration(&existing, user.id, &registration.license_number)?;

        if user.role != TOURIST_GUIDE_ROLE {
            diesel::update(users::table.find(user.id))
                .set(users::role.eq(TOURIST_GUIDE_ROLE))
                .execute(conn)?;
        }

        let new_guide = NewTouristGuide {
            id: Uuid::new_v4(),
            user_id: user.id,
            name: registration
                .name
                .clone()
                .unwrap_or_else(|| user.username.clone()),
            email: user.email.clone(),
            img: registration
                .img
                .clone()
                .or_else(|| user.img.clone())
                .unwrap_or_default(),
            location,
            language: registration.language.clone(),
            experience: registration.experience,
            contact_number: registration.contact_number.clone(),
            license_number: registration.license_number.clone(),
            category: registration.category.clone(),
            price_per_day: registration.price_per_day,
            max_group_size: registration.max_group_size,
            is_available: true,
        };

        let guide = diesel::insert_into(tourist_guides::table)
            .values(&new_guide)
            .returning(TouristGuide::as_returning())
            .get_result(conn)?;

        log::info!("User {} registered as tourist guide {}", user.id, guide.id);
        Ok(guide)
    })
}

pub fn get_guide(conn: &mut PgConnection, guide_id: Uuid) -> DbResult<TouristGuide> {
    tourist_guides::table
        .find(guide_id)
        .select(TouristGuide::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Guide not found."))
}

pub fn update_guide(
    conn: &mut PgConnection,
    guide_id: Uuid,
    changes: &GuideChanges,
) -> DbResult<TouristGuide> {
    if changes.is_empty() {
        return get_guide(conn, guide_id);
    }

    diesel::update(tourist_guides::table.find(guide_id))
        .set(changes)
        .returning(TouristGuide::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Guide not found."))
}

pub fn delete_guide(conn: &mut PgConnection, guide_id: Uuid) -> DbResult<()> {
    let deleted = diesel::delete(tourist_guides::table.find(guide_id)).execute(conn)?;
    if deleted == 0 {
        return Err(ServiceError::not_found("Guide not found."));
    }
    log::info!("Deleted tourist guide {}", guide_id);
    Ok(())
}

pub fn get_guide_profile(conn: &mut PgConnection, guide_id: Uuid) -> DbResult<GuideProfile> {
    let guide = get_guide(conn, guide_id)?;
    let mut profiles = with_owners(conn, vec![guide])?;
    profiles
        .pop()
        .ok_or_else(|| ServiceError::not_found("Guide not found."))
}

pub fn get_guide_profile_by_user(conn: &mut PgConnection, user_id: Uuid) -> DbResult<GuideProfile> {
    let guide = tourist_guides::table
        .filter(tourist_guides::user_id.eq(user_id))
        .select(TouristGuide::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Guide not found."))?;
    let mut profiles = with_owners(conn, vec![guide])?;
    profiles
        .pop()
        .ok_or_else(|| ServiceError::not_found("Guide not found."))
}

pub fn list_guides(conn: &mut PgConnection, unavailable_only: bool) -> DbResult<Vec<GuideProfile>> {
    let mut query = tourist_guides::table
        .select(TouristGuide::as_select())
        .order(tourist_guides::created_at.desc())
        .into_boxed();

    if unavailable_only {
        query = query.filter(tourist_guides::is_available.eq(false));
    }

    let guides: Vec<TouristGuide> = query.load(conn)?;
    with_owners(conn, guides)
}

fn with_owners(conn: &mut PgConnection, guides: Vec<TouristGuide>) -> DbResult<Vec<GuideProfile>> {
    let owner_ids: Vec<Uuid> = guides.iter().map(|g| g.user_id).collect();
    let owners: HashMap<Uuid, UserSummary> = load_users(conn, owner_ids)?;

    Ok(guides
        .into_iter()
        .map(|guide| GuideProfile {
            user: owners.get(&guide.user_id).cloned(),
            guide,
        })
        .collect())
}

fn load_users(conn: &mut PgConnection, ids: Vec<Uuid>) -> DbResult<HashMap<Uuid, UserSummary>> {
    let found: Vec<User> = users::table
        .filter(users::id.eq_any(ids))
        .select(User::as_select())
        .load(conn)?;

    Ok(found.iter().map(|u| (u.id, UserSummary::from(u))).collect())
}

fn lock_guide(conn: &mut PgConnection, guide_id: Uuid) -> DbResult<Option<TouristGuide>> {
    let guide = tourist_guides::table
        .find(guide_id)
        .select(TouristGuide::as_select())
        .for_update()
        .first(conn)
        .optional()?;
    Ok(guide)
}

fn lock_booking(conn: &mut PgConnection, booking_id: Uuid) -> DbResult<Booking> {
    guide_bookings::table
        .find(booking_id)
        .select(Booking::as_select())
        .for_update()
        .first(conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found("Booking not found."))
}

fn booking_guide_id(conn: &mut PgConnection, booking_id: Uuid) -> DbResult<Option<Uuid>> {
    let guide_id = guide_bookings::table
        .find(booking_id)
        .select(guide_bookings::guide_id)
        .first::<Uuid>(conn)
        .optional()?;
    Ok(guide_id)
}

// Bookings that hold the guide: confirmed ones and unanswered cancel requests.
fn holding_bookings(conn: &mut PgConnection, guide_id: Uuid) -> DbResult<Vec<Booking>> {
    let bookings = guide_bookings::table
        .filter(guide_bookings::guide_id.eq(guide_id))
        .filter(
            guide_bookings::status
                .eq(BookingStatus::Confirmed)
                .or(guide_bookings::status.eq(BookingStatus::CancelRequested)),
        )
        .select(Booking::as_select())
        .load(conn)?;
    Ok(bookings)
}

fn set_availability(conn: &mut PgConnection, guide: &TouristGuide, available: bool) -> DbResult<()> {
    if guide.is_available == available {
        return Ok(());
    }

    diesel::update(tourist_guides::table.find(guide.id))
        .set(tourist_guides::is_available.eq(available))
        .execute(conn)?;

    log::info!(
        "Guide {} is now {}",
        guide.id,
        if available { "available" } else { "unavailable" }
    );
    Ok(())
}

fn settle_availability(
    conn: &mut PgConnection,
    guide: &TouristGuide,
    effect: AvailabilityEffect,
    today: NaiveDate,
) -> DbResult<()> {
    let available = match effect {
        AvailabilityEffect::Unchanged => return Ok(()),
        AvailabilityEffect::Booked => {
            let holding = holding_bookings(conn, guide.id)?;
            lifecycle::availability_after_booking(guide.is_available, &holding, today)
        }
        AvailabilityEffect::Released => {
            let holding = holding_bookings(conn, guide.id)?;
            lifecycle::availability_after_release(guide.is_available, &holding, today)
        }
    };
    set_availability(conn, guide, available)
}

fn write_status(
    conn: &mut PgConnection,
    booking_id: Uuid,
    next: BookingStatus,
    cancellation: Option<&Cancellation>,
) -> DbResult<Booking> {
    let target = guide_bookings::table.find(booking_id);

    let booking = match cancellation {
        Some(cancellation) => diesel::update(target)
            .set((
                guide_bookings::status.eq(next),
                guide_bookings::cancellation_reason.eq(Some(cancellation.reason.clone())),
                guide_bookings::cancelled_by.eq(Some(cancellation.cancelled_by)),
            ))
            .returning(Booking::as_returning())
            .get_result(conn)?,
        None => diesel::update(target)
            .set(guide_bookings::status.eq(next))
            .returning(Booking::as_returning())
            .get_result(conn)?,
    };

    Ok(booking)
}

/// Book `guide_id` for the requested dates.
///
/// The guide row stays locked from the availability check until the booking
/// and the recomputed availability are written, so overlapping requests for
/// the same guide are decided one after the other.
pub fn book_guide(
    conn: &mut PgConnection,
    guide_id: Uuid,
    request: &BookingRequest,
    today: NaiveDate,
) -> DbResult<Booking> {
    conn.transaction::<_, ServiceError, _>(|conn| {
        let guide = lock_guide(conn, guide_id)?
            .ok_or_else(|| ServiceError::not_found("Guide not found."))?;
        get_user_by_id(conn, request.user_id)?;

        let holding = holding_bookings(conn, guide_id)?;
        if let Err(rejection) =
            lifecycle::admit_booking(&guide, &holding, &request.range, request.group_size)
        {
            log::info!("Booking of guide {} rejected: {}", guide_id, rejection);
            return Err(rejection.into());
        }

        let new_booking = NewBooking {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            guide_id,
            start_date: request.range.start(),
            end_date: request.range.end(),
            group_size: request.group_size,
            total_price: request.total_price,
            payment_method: request.payment_method,
            special_requests: request.special_requests.clone(),
            status: BookingStatus::Confirmed,
        };

        let booking = diesel::insert_into(guide_bookings::table)
            .values(&new_booking)
            .returning(Booking::as_returning())
            .get_result(conn)?;

        settle_availability(conn, &guide, AvailabilityEffect::Booked, today)?;

        log::info!(
            "Booking {} confirmed for guide {} from {} to {} ({} days)",
            booking.id,
            guide_id,
            booking.start_date,
            booking.end_date,
            request.range.days()
        );
        Ok(booking)
    })
}

/// Cancel a confirmed booking and release the guide when nothing else holds it.
pub fn cancel_booking(
    conn: &mut PgConnection,
    booking_id: Uuid,
    cancellation: &Cancellation,
    today: NaiveDate,
) -> DbResult<Booking> {
    conn.transaction::<_, ServiceError, _>(|conn| {
        let guide_id = booking_guide_id(conn, booking_id)?
            .ok_or_else(|| ServiceError::not_found("Booking not found."))?;
        let guide = lock_guide(conn, guide_id)?;
        let booking = lock_booking(conn, booking_id)?;

        lifecycle::check_cancellable(&booking)?;

        let cancelled = write_status(conn, booking_id, BookingStatus::Cancelled, Some(cancellation))?;
        if let Some(guide) = guide {
            settle_availability(conn, &guide, AvailabilityEffect::Released, today)?;
        }

        log::info!(
            "Booking {} cancelled by {:?}: {}",
            booking_id,
            cancellation.cancelled_by,
            cancellation.reason
        );
        Ok(cancelled)
    })
}

/// Move a booking along the status state machine.
pub fn transition_booking(
    conn: &mut PgConnection,
    booking_id: Uuid,
    next: BookingStatus,
    cancellation: &Cancellation,
    today: NaiveDate,
) -> DbResult<Booking> {
    conn.transaction::<_, ServiceError, _>(|conn| {
        let guide_id = booking_guide_id(conn, booking_id)?
            .ok_or_else(|| ServiceError::not_found("Booking not found."))?;
        let guide = lock_guide(conn, guide_id)?;
        let booking = lock_booking(conn, booking_id)?;
        let holding = holding_bookings(conn, guide_id)?;

        let effect = lifecycle::plan_transition(&booking, next, &holding, today)?;
        let cancellation = (next == BookingStatus::Cancelled).then_some(cancellation);
        let updated = write_status(conn, booking_id, next, cancellation)?;

        if let Some(guide) = guide {
            settle_availability(conn, &guide, effect, today)?;
        }

        log::info!("Booking {} moved from {} to {}", booking_id, booking.status, next);
        Ok(updated)
    })
}

/// Complete `booking_id` if it is confirmed and its last day is behind us.
/// Returns `None` when there was nothing to do.
pub fn complete_booking(
    conn: &mut PgConnection,
    booking_id: Uuid,
    today: NaiveDate,
) -> DbResult<Option<Booking>> {
    conn.transaction::<_, ServiceError, _>(|conn| {
        let Some(guide_id) = booking_guide_id(conn, booking_id)? else {
            return Ok(None);
        };
        let guide = lock_guide(conn, guide_id)?;
        let booking = lock_booking(conn, booking_id)?;

        if !lifecycle::is_elapsed(&booking, today) {
            return Ok(None);
        }

        let completed = write_status(conn, booking_id, BookingStatus::Completed, None)?;
        if let Some(guide) = guide {
            settle_availability(conn, &guide, AvailabilityEffect::Released, today)?;
        }

        log::info!("Booking {} completed", booking_id);
        Ok(Some(completed))
    })
}

/// Complete every confirmed booking that ended before `today`.
pub fn complete_elapsed_bookings(conn: &mut PgConnection, today: NaiveDate) -> DbResult<usize> {
    let elapsed: Vec<Uuid> = guide_bookings::table
        .filter(guide_bookings::status.eq(BookingStatus::Confirmed))
        .filter(guide_bookings::end_date.lt(today))
        .select(guide_bookings::id)
        .load(conn)?;

    let mut completed = 0;
    for booking_id in elapsed {
        match complete_booking(conn, booking_id, today) {
            Ok(Some(_)) => completed += 1,
            Ok(None) => {}
            Err(e) => log::error!("Failed to complete elapsed booking {}: {}", booking_id, e),
        }
    }
    Ok(completed)
}

pub fn bookings_for_user(conn: &mut PgConnection, user_id: Uuid) -> DbResult<Vec<BookingDetails>> {
    let bookings: Vec<Booking> = guide_bookings::table
        .filter(guide_bookings::user_id.eq(user_id))
        .order(guide_bookings::created_at.desc())
        .select(Booking::as_select())
        .load(conn)?;
    with_parties(conn, bookings)
}

pub fn bookings_for_guide(conn: &mut PgConnection, guide_id: Uuid) -> DbResult<Vec<BookingDetails>> {
    let bookings: Vec<Booking> = guide_bookings::table
        .filter(guide_bookings::guide_id.eq(guide_id))
        .order(guide_bookings::created_at.desc())
        .select(Booking::as_select())
        .load(conn)?;
    with_parties(conn, bookings)
}

fn with_parties(conn: &mut PgConnection, bookings: Vec<Booking>) -> DbResult<Vec<BookingDetails>> {
    let guide_ids: Vec<Uuid> = bookings.iter().map(|b| b.guide_id).collect();
    let user_ids: Vec<Uuid> = bookings.iter().map(|b| b.user_id).collect();

    let found: Vec<TouristGuide> = tourist_guides::table
        .filter(tourist_guides::id.eq_any(guide_ids))
        .select(TouristGuide::as_select())
        .load(conn)?;
    let guides: HashMap<Uuid, GuideSummary> =
        found.iter().map(|g| (g.id, GuideSummary::from(g))).collect();
    let customers = load_users(conn, user_ids)?;

    Ok(bookings
        .into_iter()
        .map(|booking| BookingDetails {
            guide: guides.get(&booking.guide_id).cloned(),
            user: customers.get(&booking.user_id).cloned(),
            booking,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{DateRange, Rejection};
    use crate::models::{CancelledBy, PaymentMethod};
    use chrono::{Days, Utc};

    // Runs against DATABASE_URL inside a transaction that is never committed.
    // Returns `None` (and the test passes vacuously) without a migrated database.
    fn test_connection() -> Option<PgConnection> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let mut conn = PgConnection::establish(&url).ok()?;
        diesel::sql_query("SELECT 1 FROM guide_bookings LIMIT 0")
            .execute(&mut conn)
            .ok()?;
        conn.begin_test_transaction().ok()?;
        Some(conn)
    }

    fn seed_user(conn: &mut PgConnection) -> User {
        let tag = Uuid::new_v4().simple().to_string();
        insert_new_user(
            conn,
            &UserRegistration {
                username: format!("user-{tag}"),
                email: format!("{tag}@example.com"),
                img: None,
                city: Some("Pokhara".into()),
                country: Some("Nepal".into()),
                contact_number: None,
            },
        )
        .unwrap()
    }

    fn seed_guide(conn: &mut PgConnection) -> TouristGuide {
        let owner = seed_user(conn);
        let serial = Uuid::new_v4().as_u128() % 100_000;
        let registration = GuideRegistration {
            email: None,
            name: None,
            img: None,
            location: None,
            language: "Nepali".into(),
            experience: 4,
            contact_number: "9800000000".into(),
            license_number: format!("TCB/TG(TEST)-01/{serial:05}"),
            category: vec!["Trekking".into()],
            price_per_day: 2500.0,
            max_group_size: 5,
        };
        register_guide(conn, &owner, &registration).unwrap()
    }

    fn request(user: &User, today: NaiveDate, from: u64, to: u64) -> BookingRequest {
        BookingRequest {
            user_id: user.id,
            range: DateRange::new(today + Days::new(from), today + Days::new(to)).unwrap(),
            group_size: 2,
            total_price: 5000.0,
            payment_method: PaymentMethod::Cash,
            special_requests: None,
        }
    }

    fn cancellation() -> Cancellation {
        Cancellation {
            reason: "Plans changed".into(),
            cancelled_by: CancelledBy::Guide,
        }
    }

    fn is_available(conn: &mut PgConnection, guide: &TouristGuide) -> bool {
        get_guide(conn, guide.id).unwrap().is_available
    }

    #[test]
    fn booking_holds_the_guide_until_cancelled() {
        let Some(mut conn) = test_connection() else { return };
        let today = Utc::now().date_naive();
        let guide = seed_guide(&mut conn);
        let customer = seed_user(&mut conn);

        let booking = book_guide(&mut conn, guide.id, &request(&customer, today, 10, 12), today).unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);
        assert!(!is_available(&mut conn, &guide));

        let cancelled = cancel_booking(&mut conn, booking.id, &cancellation(), today).unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("Plans changed"));
        assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Guide));
        assert!(is_available(&mut conn, &guide));
    }

    #[test]
    fn refused_cancellation_leaves_booking_and_guide_untouched() {
        let Some(mut conn) = test_connection() else { return };
        let today = Utc::now().date_naive();
        let guide = seed_guide(&mut conn);
        let customer = seed_user(&mut conn);

        let booking = book_guide(&mut conn, guide.id, &request(&customer, today, 10, 12), today).unwrap();
        transition_booking(&mut conn, booking.id, BookingStatus::CancelRequested, &cancellation(), today)
            .unwrap();

        let err = cancel_booking(&mut conn, booking.id, &cancellation(), today).unwrap_err();
        assert!(matches!(err, ServiceError::Rejected(Rejection::NotCancellable)));

        let stored = lock_booking(&mut conn, booking.id).unwrap();
        assert_eq!(stored.status, BookingStatus::CancelRequested);
        assert_eq!(stored.cancellation_reason, None);
        assert!(!is_available(&mut conn, &guide));
    }

    #[test]
    fn overlapping_booking_is_refused_and_not_stored() {
        let Some(mut conn) = test_connection() else { return };
        let today = Utc::now().date_naive();
        let guide = seed_guide(&mut conn);
        let customer = seed_user(&mut conn);

        book_guide(&mut conn, guide.id, &request(&customer, today, 10, 12), today).unwrap();
        let reopen = GuideChanges {
            is_available: Some(true),
            ..Default::default()
        };
        update_guide(&mut conn, guide.id, &reopen).unwrap();

        let err = book_guide(&mut conn, guide.id, &request(&customer, today, 12, 14), today).unwrap_err();
        assert!(matches!(err, ServiceError::Rejected(Rejection::DatesTaken)));
        assert_eq!(bookings_for_guide(&mut conn, guide.id).unwrap().len(), 1);
    }

    #[test]
    fn open_cancel_request_survives_release_of_another_booking() {
        let Some(mut conn) = test_connection() else { return };
        let today = Utc::now().date_naive();
        let guide = seed_guide(&mut conn);
        let customer = seed_user(&mut conn);

        let first = book_guide(&mut conn, guide.id, &request(&customer, today, 10, 12), today).unwrap();
        update_guide(
            &mut conn,
            guide.id,
            &GuideChanges {
                is_available: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        let second = book_guide(&mut conn, guide.id, &request(&customer, today, 20, 22), today).unwrap();
        transition_booking(&mut conn, second.id, BookingStatus::CancelRequested, &cancellation(), today)
            .unwrap();

        cancel_booking(&mut conn, first.id, &cancellation(), today).unwrap();
        assert!(!is_available(&mut conn, &guide));

        let kept = transition_booking(&mut conn, second.id, BookingStatus::Confirmed, &cancellation(), today)
            .unwrap();
        assert_eq!(kept.status, BookingStatus::Confirmed);
        assert_eq!(kept.cancellation_reason, None);
    }

    #[test]
    fn elapsed_bookings_are_completed_and_release_the_guide() {
        let Some(mut conn) = test_connection() else { return };
        let today = Utc::now().date_naive();
        let guide = seed_guide(&mut conn);
        let customer = seed_user(&mut conn);

        let booking = book_guide(&mut conn, guide.id, &request(&customer, today, 1, 2), today).unwrap();
        assert!(complete_booking(&mut conn, booking.id, today).unwrap().is_none());

        let later = today + Days::new(5);
        assert!(complete_elapsed_bookings(&mut conn, later).unwrap() >= 1);
        assert_eq!(lock_booking(&mut conn, booking.id).unwrap().status, BookingStatus::Completed);
        assert!(is_available(&mut conn, &guide));
    }
}
