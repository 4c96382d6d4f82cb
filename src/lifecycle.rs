//! Guide availability and booking lifecycle rules.
//!
//! Everything here is pure: callers load the guide and its bookings inside a
//! transaction that holds the guide row lock, ask these functions what to do,
//! and write the outcome back in the same transaction.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, TouristGuide};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Guide is currently unavailable.")]
    GuideUnavailable,

    #[error("Group size exceeds max allowed: {max}")]
    GroupSizeExceeded { max: i32 },

    #[error("Guide is already booked for the selected dates.")]
    DatesTaken,

    #[error("Only confirmed bookings can be cancelled.")]
    NotCancellable,

    #[error("Cannot change booking status from {from} to {to}.")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    #[error("A booking can only be completed once it has started.")]
    NotStarted,

    #[error("User is already registered as a tourist guide.")]
    AlreadyRegistered,

    #[error("License number is already registered.")]
    LicenseTaken,
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (end >= start).then_some(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days covered, both ends counted.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }
}

impl Booking {
    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    /// Holds its guide and is not yet over.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.status.holds_guide() && self.end_date >= today
    }
}

pub fn has_active_booking(bookings: &[Booking], today: NaiveDate) -> bool {
    bookings.iter().any(|b| b.is_active(today))
}

/// First booking holding the guide (other than `exclude`) whose dates intersect `range`.
pub fn find_conflict<'a>(
    bookings: &'a [Booking],
    range: &DateRange,
    exclude: Option<Uuid>,
) -> Option<&'a Booking> {
    bookings.iter().find(|b| {
        b.status.holds_guide()
            && Some(b.id) != exclude
            && b.range().overlaps(range)
    })
}

/// Decide whether a new booking may be created against `guide`.
///
/// `bookings` are the guide's existing bookings; only those holding the guide
/// take part in the conflict check.
pub fn admit_booking(
    guide: &TouristGuide,
    bookings: &[Booking],
    range: &DateRange,
    group_size: i32,
) -> Result<(), Rejection> {
    if !guide.is_available {
        return Err(Rejection::GuideUnavailable);
    }
    if group_size > guide.max_group_size {
        return Err(Rejection::GroupSizeExceeded {
            max: guide.max_group_size,
        });
    }
    if find_conflict(bookings, range, None).is_some() {
        return Err(Rejection::DatesTaken);
    }
    Ok(())
}

/// Availability once a booking has been confirmed. Only ever clears the flag.
pub fn availability_after_booking(current: bool, bookings: &[Booking], today: NaiveDate) -> bool {
    if has_active_booking(bookings, today) {
        false
    } else {
        current
    }
}

/// Availability once a booking has stopped holding the guide. Only ever sets the flag.
pub fn availability_after_release(current: bool, bookings: &[Booking], today: NaiveDate) -> bool {
    if has_active_booking(bookings, today) {
        current
    } else {
        true
    }
}

impl BookingStatus {
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, CancelRequested)
                | (Confirmed, Cancelled)
                | (Confirmed, Completed)
                | (CancelRequested, Confirmed)
                | (CancelRequested, Cancelled)
        )
    }

    /// Confirmed bookings hold the guide, and so do cancel requests until the
    /// guide has answered them.
    pub fn holds_guide(self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::CancelRequested)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }
}

/// What the caller must do to the guide after a status change is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityEffect {
    /// The booking now holds the guide.
    Booked,
    /// The booking no longer holds the guide.
    Released,
    Unchanged,
}

/// Validate a status change of `booking` against the state machine and its guards.
///
/// `bookings` are all bookings of the same guide, used when re-confirming.
pub fn plan_transition(
    booking: &Booking,
    next: BookingStatus,
    bookings: &[Booking],
    today: NaiveDate,
) -> Result<AvailabilityEffect, Rejection> {
    if !booking.status.can_transition_to(next) {
        return Err(Rejection::InvalidTransition {
            from: booking.status,
            to: next,
        });
    }

    match next {
        BookingStatus::Confirmed => {
            if find_conflict(bookings, &booking.range(), Some(booking.id)).is_some() {
                return Err(Rejection::DatesTaken);
            }
            Ok(AvailabilityEffect::Booked)
        }
        BookingStatus::Completed => {
            if booking.start_date > today {
                return Err(Rejection::NotStarted);
            }
            Ok(AvailabilityEffect::Released)
        }
        BookingStatus::Cancelled => Ok(AvailabilityEffect::Released),
        BookingStatus::CancelRequested | BookingStatus::Pending => Ok(AvailabilityEffect::Unchanged),
    }
}

/// The explicit cancellation action only accepts confirmed bookings.
pub fn check_cancellable(booking: &Booking) -> Result<(), Rejection> {
    if booking.status != BookingStatus::Confirmed {
        return Err(Rejection::NotCancellable);
    }
    Ok(())
}

/// Elapsed confirmed bookings can be completed without anyone asking.
pub fn is_elapsed(booking: &Booking, today: NaiveDate) -> bool {
    booking.status == BookingStatus::Confirmed && booking.end_date < today
}

/// Reject a registration that would give `user_id` a second profile or reuse a license.
pub fn check_registration(
    existing: &[TouristGuide],
    user_id: Uuid,
    license_number: &str,
) -> Result<(), Rejection> {
    if existing.iter().any(|g| g.user_id == user_id) {
        return Err(Rejection::AlreadyRegistered);
    }
    if existing.iter().any(|g| g.license_number == license_number) {
        return Err(Rejection::LicenseTaken);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PaymentMethod;
    use chrono::NaiveDateTime;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn range(start: &str, end: &str) -> DateRange {
        DateRange::new(date(start), date(end)).unwrap()
    }

    fn guide(is_available: bool, max_group_size: i32) -> TouristGuide {
        TouristGuide {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Pasang Sherpa".into(),
            email: "pasang@example.com".into(),
            img: String::new(),
            location: "Pokhara".into(),
            language: "Nepali".into(),
            experience: 6,
            contact_number: "9800000000".into(),
            license_number: "TCB/TG(PKR)-12/3456".into(),
            category: vec!["Trekking".into()],
            price_per_day: 3500.0,
            max_group_size,
            is_available,
            created_at: NaiveDateTime::default(),
        }
    }

    fn booking(guide_id: Uuid, status: BookingStatus, start: &str, end: &str) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            guide_id,
            start_date: date(start),
            end_date: date(end),
            group_size: 2,
            total_price: 7000.0,
            payment_method: PaymentMethod::Cash,
            special_requests: None,
            status,
            cancellation_reason: None,
            cancelled_by: None,
            created_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn ranges_overlap_with_inclusive_bounds() {
        let june = range("2024-06-01", "2024-06-10");
        assert!(june.overlaps(&range("2024-06-05", "2024-06-15")));
        assert!(june.overlaps(&range("2024-06-10", "2024-06-12")));
        assert!(june.overlaps(&range("2024-05-25", "2024-06-01")));
        assert!(june.overlaps(&range("2024-06-03", "2024-06-04")));
        assert!(!june.overlaps(&range("2024-06-11", "2024-06-15")));
        assert!(!june.overlaps(&range("2024-05-20", "2024-05-31")));
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(DateRange::new(date("2024-06-10"), date("2024-06-01")).is_none());
        assert_eq!(range("2024-06-01", "2024-06-01").days(), 1);
        assert_eq!(range("2024-06-01", "2024-06-10").days(), 10);
    }

    #[test]
    fn unavailable_guide_always_rejects() {
        let g = guide(false, 10);
        for (start, end, size) in [
            ("2024-06-01", "2024-06-02", 1),
            ("2030-01-01", "2030-12-31", 10),
        ] {
            assert_eq!(
                admit_booking(&g, &[], &range(start, end), size),
                Err(Rejection::GuideUnavailable)
            );
        }
    }

    #[test]
    fn group_larger_than_maximum_is_rejected() {
        let g = guide(true, 5);
        assert_eq!(
            admit_booking(&g, &[], &range("2024-06-01", "2024-06-02"), 6),
            Err(Rejection::GroupSizeExceeded { max: 5 })
        );
        assert!(admit_booking(&g, &[], &range("2024-06-01", "2024-06-02"), 5).is_ok());
    }

    #[test]
    fn overlapping_confirmed_booking_blocks_new_request() {
        let g = guide(true, 5);
        let existing = vec![booking(g.id, BookingStatus::Confirmed, "2024-06-01", "2024-06-10")];

        assert_eq!(
            admit_booking(&g, &existing, &range("2024-06-05", "2024-06-15"), 2),
            Err(Rejection::DatesTaken)
        );
        assert!(admit_booking(&g, &existing, &range("2024-06-11", "2024-06-15"), 2).is_ok());
    }

    #[test]
    fn cancelled_and_completed_bookings_do_not_conflict() {
        let g = guide(true, 5);
        let existing = vec![
            booking(g.id, BookingStatus::Cancelled, "2024-06-01", "2024-06-10"),
            booking(g.id, BookingStatus::Completed, "2024-06-01", "2024-06-10"),
        ];
        assert!(admit_booking(&g, &existing, &range("2024-06-05", "2024-06-06"), 2).is_ok());
    }

    #[test]
    fn successful_booking_marks_guide_unavailable() {
        let g = guide(true, 5);
        let today = date("2024-05-20");
        let after = vec![booking(g.id, BookingStatus::Confirmed, "2024-06-01", "2024-06-10")];
        assert!(!availability_after_booking(true, &after, today));
    }

    #[test]
    fn booking_flag_is_left_alone_without_active_bookings() {
        let g = guide(true, 5);
        let today = date("2024-07-01");
        let after = vec![booking(g.id, BookingStatus::Confirmed, "2024-06-01", "2024-06-10")];
        assert!(availability_after_booking(true, &after, today));
    }

    #[test]
    fn cancelling_last_active_booking_restores_availability() {
        let g = guide(false, 5);
        let today = date("2024-05-20");
        let after = vec![booking(g.id, BookingStatus::Cancelled, "2024-06-01", "2024-06-10")];
        assert!(availability_after_release(false, &after, today));
    }

    #[test]
    fn release_keeps_guide_held_while_other_bookings_are_active() {
        let g = guide(false, 5);
        let today = date("2024-05-20");
        let after = vec![
            booking(g.id, BookingStatus::Cancelled, "2024-06-01", "2024-06-10"),
            booking(g.id, BookingStatus::Confirmed, "2024-07-01", "2024-07-03"),
        ];
        assert!(!availability_after_release(false, &after, today));
    }

    #[test]
    fn booking_ending_today_is_still_active() {
        let b = booking(Uuid::new_v4(), BookingStatus::Confirmed, "2024-06-01", "2024-06-10");
        assert!(b.is_active(date("2024-06-10")));
        assert!(!b.is_active(date("2024-06-11")));
        assert!(is_elapsed(&b, date("2024-06-11")));
        assert!(!is_elapsed(&b, date("2024-06-10")));
    }

    #[test]
    fn only_confirmed_bookings_are_cancellable() {
        let id = Uuid::new_v4();
        for status in [
            BookingStatus::Pending,
            BookingStatus::CancelRequested,
            BookingStatus::Cancelled,
            BookingStatus::Completed,
        ] {
            let b = booking(id, status, "2024-06-01", "2024-06-10");
            assert_eq!(check_cancellable(&b), Err(Rejection::NotCancellable));
        }
        let b = booking(id, BookingStatus::Confirmed, "2024-06-01", "2024-06-10");
        assert!(check_cancellable(&b).is_ok());
    }

    #[test]
    fn open_cancel_request_keeps_holding_the_guide() {
        let mut g = guide(false, 5);
        let today = date("2024-06-20");
        let released = booking(g.id, BookingStatus::Cancelled, "2024-06-22", "2024-06-25");
        let requested = booking(g.id, BookingStatus::CancelRequested, "2024-07-01", "2024-07-03");
        let after = vec![released, requested.clone()];

        assert!(!availability_after_release(false, &after, today));

        // Even with the flag forced back on, the requested dates stay taken.
        g.is_available = true;
        assert_eq!(
            admit_booking(&g, &after, &range("2024-07-02", "2024-07-04"), 2),
            Err(Rejection::DatesTaken)
        );
        assert!(admit_booking(&g, &after, &range("2024-07-04", "2024-07-06"), 2).is_ok());

        // The guide can still decline the cancellation.
        assert_eq!(
            plan_transition(&requested, BookingStatus::Confirmed, &after, today),
            Ok(AvailabilityEffect::Booked)
        );
    }

    #[test]
    fn elapsed_cancel_request_no_longer_holds_the_guide() {
        let g = guide(false, 5);
        let after = vec![booking(g.id, BookingStatus::CancelRequested, "2024-06-01", "2024-06-03")];
        assert!(availability_after_release(false, &after, date("2024-06-04")));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use BookingStatus::*;
        for from in [Cancelled, Completed] {
            assert!(from.is_terminal());
            for to in [Pending, Confirmed, CancelRequested, Cancelled, Completed] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        assert!(!Confirmed.can_transition_to(Pending));
        assert!(Pending.can_transition_to(Confirmed));
    }

    #[test]
    fn reconfirming_checks_other_bookings_only() {
        let guide_id = Uuid::new_v4();
        let today = date("2024-05-20");
        let requested = booking(guide_id, BookingStatus::CancelRequested, "2024-06-01", "2024-06-10");
        let mut others = vec![requested.clone()];

        assert_eq!(
            plan_transition(&requested, BookingStatus::Confirmed, &others, today),
            Ok(AvailabilityEffect::Booked)
        );

        others.push(booking(guide_id, BookingStatus::Confirmed, "2024-06-08", "2024-06-12"));
        assert_eq!(
            plan_transition(&requested, BookingStatus::Confirmed, &others, today),
            Err(Rejection::DatesTaken)
        );
    }

    #[test]
    fn completion_requires_the_tour_to_have_started() {
        let b = booking(Uuid::new_v4(), BookingStatus::Confirmed, "2024-06-01", "2024-06-10");
        assert_eq!(
            plan_transition(&b, BookingStatus::Completed, &[], date("2024-05-31")),
            Err(Rejection::NotStarted)
        );
        assert_eq!(
            plan_transition(&b, BookingStatus::Completed, &[], date("2024-06-01")),
            Ok(AvailabilityEffect::Released)
        );
    }

    #[test]
    fn cancel_request_keeps_the_guide_held() {
        let b = booking(Uuid::new_v4(), BookingStatus::Confirmed, "2024-06-01", "2024-06-10");
        assert_eq!(
            plan_transition(&b, BookingStatus::CancelRequested, &[], date("2024-05-20")),
            Ok(AvailabilityEffect::Unchanged)
        );
    }

    #[test]
    fn disallowed_transition_names_both_states() {
        let b = booking(Uuid::new_v4(), BookingStatus::Cancelled, "2024-06-01", "2024-06-10");
        let err = plan_transition(&b, BookingStatus::Confirmed, &[], date("2024-05-20")).unwrap_err();
        assert_eq!(err.to_string(), "Cannot change booking status from cancelled to confirmed.");
    }

    #[test]
    fn second_profile_or_reused_license_is_a_duplicate() {
        let existing = guide(true, 5);

        assert_eq!(
            check_registration(&[existing.clone()], existing.user_id, "TCB/TG(KTM)-01/0001"),
            Err(Rejection::AlreadyRegistered)
        );
        assert_eq!(
            check_registration(&[existing.clone()], Uuid::new_v4(), &existing.license_number),
            Err(Rejection::LicenseTaken)
        );
        assert!(check_registration(&[existing], Uuid::new_v4(), "TCB/TG(KTM)-01/0001").is_ok());
    }
}
