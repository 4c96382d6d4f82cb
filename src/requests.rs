use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::lifecycle::DateRange;
use crate::models::{
    BookingStatus, CancelledBy, GuideCategory, GuideChanges, PaymentMethod, DEFAULT_MAX_GROUP_SIZE,
};

static LICENSE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^TCB/TG\([A-Z/_]+\)-\d{2}/\d{4,5}$").unwrap());

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

pub const DEFAULT_CANCELLATION_REASON: &str = "No reason provided";

pub fn is_valid_license_number(license: &str) -> bool {
    LICENSE_NUMBER.is_match(license)
}

pub fn parse_id(raw: &str, message: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw).map_err(|_| ServiceError::validation(message))
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp (reduced to its UTC date).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc().date()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn category_names(categories: &[GuideCategory]) -> Vec<String> {
    categories.iter().map(|c| c.as_str().to_owned()).collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub img: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub contact_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserRegistration {
    pub username: String,
    pub email: String,
    pub img: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub contact_number: Option<String>,
}

impl NewUserRequest {
    pub fn validate(self) -> Result<UserRegistration, ServiceError> {
        let username = non_blank(self.username)
            .ok_or_else(|| ServiceError::validation("Missing fields: username"))?;
        let email = non_blank(self.email)
            .ok_or_else(|| ServiceError::validation("Missing fields: email"))?
            .to_lowercase();
        if !EMAIL.is_match(&email) {
            return Err(ServiceError::validation("Invalid email address."));
        }
        Ok(UserRegistration {
            username,
            email,
            img: non_blank(self.img),
            city: non_blank(self.city),
            country: non_blank(self.country),
            contact_number: non_blank(self.contact_number),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterGuideRequest {
    pub email: Option<String>,
    pub name: Option<String>,
    pub img: Option<String>,
    pub location: Option<String>,
    pub language: Option<String>,
    pub experience: Option<i32>,
    pub contact_number: Option<String>,
    pub license_number: Option<String>,
    pub category: Option<Vec<GuideCategory>>,
    pub price_per_day: Option<f64>,
    pub max_group_size: Option<i32>,
}

/// Guide registration with every required field present and in range.
/// `name`, `img` and `location` fall back to the owning user's profile.
#[derive(Debug, Clone)]
pub struct GuideRegistration {
    pub email: Option<String>,
    pub name: Option<String>,
    pub img: Option<String>,
    pub location: Option<String>,
    pub language: String,
    pub experience: i32,
    pub contact_number: String,
    pub license_number: String,
    pub category: Vec<String>,
    pub price_per_day: f64,
    pub max_group_size: i32,
}

impl RegisterGuideRequest {
    pub fn validate(self) -> Result<GuideRegistration, ServiceError> {
        let language = non_blank(self.language);
        let contact_number = non_blank(self.contact_number);
        let license_number = non_blank(self.license_number);
        let category = self.category.filter(|c| !c.is_empty());

        let mut missing = Vec::new();
        if language.is_none() {
            missing.push("language");
        }
        if self.experience.is_none() {
            missing.push("experience");
        }
        if contact_number.is_none() {
            missing.push("contactNumber");
        }
        if license_number.is_none() {
            missing.push("licenseNumber");
        }
        if category.is_none() {
            missing.push("category");
        }
        if self.price_per_day.is_none() {
            missing.push("pricePerDay");
        }

        let (
            Some(language),
            Some(experience),
            Some(contact_number),
            Some(license_number),
            Some(category),
            Some(price_per_day),
        ) = (
            language,
            self.experience,
            contact_number,
            license_number,
            category,
            self.price_per_day,
        )
        else {
            return Err(ServiceError::validation(format!(
                "Missing fields: {}",
                missing.join(", ")
            )));
        };

        if !is_valid_license_number(&license_number) {
            return Err(ServiceError::validation("Invalid license number format."));
        }
        if experience < 0 {
            return Err(ServiceError::validation("Experience cannot be negative."));
        }
        if !price_per_day.is_finite() || price_per_day < 0.0 {
            return Err(ServiceError::validation("Price per day cannot be negative."));
        }
        let max_group_size = self.max_group_size.unwrap_or(DEFAULT_MAX_GROUP_SIZE);
        if max_group_size < 1 {
            return Err(ServiceError::validation("Maximum group size must be at least 1."));
        }

        Ok(GuideRegistration {
            email: non_blank(self.email).map(|e| e.to_lowercase()),
            name: non_blank(self.name),
            img: non_blank(self.img),
            location: non_blank(self.location),
            language,
            experience,
            contact_number,
            license_number,
            category: category_names(&category),
            price_per_day,
            max_group_size,
        })
    }
}

/// Profile edit. `userId` and `email` are not editable and are ignored if sent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGuideRequest {
    pub name: Option<String>,
    pub img: Option<String>,
    pub location: Option<String>,
    pub language: Option<String>,
    pub experience: Option<i32>,
    pub contact_number: Option<String>,
    pub license_number: Option<String>,
    pub category: Option<Vec<GuideCategory>>,
    pub price_per_day: Option<f64>,
    pub max_group_size: Option<i32>,
    pub is_available: Option<bool>,
}

impl UpdateGuideRequest {
    pub fn validate(self) -> Result<GuideChanges, ServiceError> {
        if let Some(license) = &self.license_number {
            if !is_valid_license_number(license) {
                return Err(ServiceError::validation("Invalid license number format."));
            }
        }
        if matches!(self.experience, Some(e) if e < 0) {
            return Err(ServiceError::validation("Experience cannot be negative."));
        }
        if matches!(self.price_per_day, Some(p) if !p.is_finite() || p < 0.0) {
            return Err(ServiceError::validation("Price per day cannot be negative."));
        }
        if matches!(self.max_group_size, Some(m) if m < 1) {
            return Err(ServiceError::validation("Maximum group size must be at least 1."));
        }
        if matches!(&self.category, Some(c) if c.is_empty()) {
            return Err(ServiceError::validation("At least one category is required."));
        }

        Ok(GuideChanges {
            name: non_blank(self.name),
            img: self.img,
            location: non_blank(self.location),
            language: non_blank(self.language),
            experience: self.experience,
            contact_number: non_blank(self.contact_number),
            license_number: self.license_number,
            category: self.category.as_deref().map(category_names),
            price_per_day: self.price_per_day,
            max_group_size: self.max_group_size,
            is_available: self.is_available,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookGuideRequest {
    pub user_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub group_size: Option<i32>,
    pub payment_method: Option<PaymentMethod>,
    pub special_requests: Option<String>,
    pub total_price: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub user_id: Uuid,
    pub range: DateRange,
    pub group_size: i32,
    pub total_price: f64,
    pub payment_method: PaymentMethod,
    pub special_requests: Option<String>,
}

impl BookGuideRequest {
    /// `today` bounds the start date; bookings in the past are refused here,
    /// before any record is read.
    pub fn validate(self, today: NaiveDate) -> Result<BookingRequest, ServiceError> {
        let user_id = self
            .user_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| ServiceError::validation("Invalid IDs"))?;

        let start = self
            .start_date
            .as_deref()
            .and_then(parse_date)
            .ok_or_else(|| ServiceError::validation("Start date is required (YYYY-MM-DD)."))?;
        let end = self
            .end_date
            .as_deref()
            .and_then(parse_date)
            .ok_or_else(|| ServiceError::validation("End date is required (YYYY-MM-DD)."))?;

        if start < today {
            return Err(ServiceError::validation("Start date cannot be in the past"));
        }
        let range = DateRange::new(start, end)
            .ok_or_else(|| ServiceError::validation("End date cannot be before start date"))?;

        let group_size = self
            .group_size
            .ok_or_else(|| ServiceError::validation("Group size is required."))?;
        if group_size < 1 {
            return Err(ServiceError::validation("Group size must be at least 1."));
        }

        let total_price = self
            .total_price
            .ok_or_else(|| ServiceError::validation("Total price is required."))?;
        if !total_price.is_finite() || total_price < 0.0 {
            return Err(ServiceError::validation("Total price cannot be negative."));
        }

        let payment_method = self
            .payment_method
            .ok_or_else(|| ServiceError::validation("Payment method is required."))?;

        Ok(BookingRequest {
            user_id,
            range,
            group_size,
            total_price,
            payment_method,
            special_requests: non_blank(self.special_requests),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingRequest {
    pub reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cancellation {
    pub reason: String,
    pub cancelled_by: CancelledBy,
}

impl CancelBookingRequest {
    pub fn into_cancellation(self) -> Cancellation {
        Cancellation {
            reason: non_blank(self.reason).unwrap_or_else(|| DEFAULT_CANCELLATION_REASON.to_owned()),
            cancelled_by: self.cancelled_by.unwrap_or(CancelledBy::User),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBookingStatusRequest {
    pub status: BookingStatus,
    pub reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
}

impl UpdateBookingStatusRequest {
    pub fn into_parts(self) -> (BookingStatus, Cancellation) {
        let cancellation = CancelBookingRequest {
            reason: self.reason,
            cancelled_by: self.cancelled_by,
        }
        .into_cancellation();
        (self.status, cancellation)
    }
}
