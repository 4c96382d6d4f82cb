use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use diesel::{
    deserialize::{self, FromSql},
    pg::{Pg, PgValue},
    serialize::{self, Output, ToSql},
    sql_types::Text,
    AsChangeset, AsExpression, FromSqlRow, Insertable, Queryable, Selectable,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::{guide_bookings, tourist_guides, users};

pub const TOURIST_GUIDE_ROLE: &str = "tourist guide";
pub const DEFAULT_USER_ROLE: &str = "user";
pub const DEFAULT_MAX_GROUP_SIZE: i32 = 5;

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub img: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub contact_number: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub img: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub contact_number: Option<String>,
}

/// The subset of a user embedded in guide and booking responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub contact_number: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            contact_number: user.contact_number.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuideCategory {
    Adventure,
    Cultural,
    Historical,
    Wildlife,
    Religious,
    #[serde(rename = "Eco-tourism")]
    EcoTourism,
    Trekking,
    #[serde(rename = "Local Experience")]
    LocalExperience,
}

impl GuideCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuideCategory::Adventure => "Adventure",
            GuideCategory::Cultural => "Cultural",
            GuideCategory::Historical => "Historical",
            GuideCategory::Wildlife => "Wildlife",
            GuideCategory::Religious => "Religious",
            GuideCategory::EcoTourism => "Eco-tourism",
            GuideCategory::Trekking => "Trekking",
            GuideCategory::LocalExperience => "Local Experience",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = tourist_guides)]
#[serde(rename_all = "camelCase")]
pub struct TouristGuide {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub img: String,
    pub location: String,
    pub language: String,
    pub experience: i32,
    pub contact_number: String,
    pub license_number: String,
    pub category: Vec<String>,
    pub price_per_day: f64,
    pub max_group_size: i32,
    pub is_available: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tourist_guides)]
pub struct NewTouristGuide {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub img: String,
    pub location: String,
    pub language: String,
    pub experience: i32,
    pub contact_number: String,
    pub license_number: String,
    pub category: Vec<String>,
    pub price_per_day: f64,
    pub max_group_size: i32,
    pub is_available: bool,
}

/// Partial profile edit. `None` leaves the column untouched.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = tourist_guides)]
pub struct GuideChanges {
    pub name: Option<String>,
    pub img: Option<String>,
    pub location: Option<String>,
    pub language: Option<String>,
    pub experience: Option<i32>,
    pub contact_number: Option<String>,
    pub license_number: Option<String>,
    pub category: Option<Vec<String>>,
    pub price_per_day: Option<f64>,
    pub max_group_size: Option<i32>,
    pub is_available: Option<bool>,
}

impl GuideChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.img.is_none()
            && self.location.is_none()
            && self.language.is_none()
            && self.experience.is_none()
            && self.contact_number.is_none()
            && self.license_number.is_none()
            && self.category.is_none()
            && self.price_per_day.is_none()
            && self.max_group_size.is_none()
            && self.is_available.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuideSummary {
    pub id: Uuid,
    pub name: String,
    pub location: String,
    pub price_per_day: f64,
    pub is_available: bool,
}

impl From<&TouristGuide> for GuideSummary {
    fn from(guide: &TouristGuide) -> Self {
        Self {
            id: guide.id,
            name: guide.name.clone(),
            location: guide.location.clone(),
            price_per_day: guide.price_per_day,
            is_available: guide.is_available,
        }
    }
}

/// A guide together with its owning user, as returned by the read endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct GuideProfile {
    #[serde(flatten)]
    pub guide: TouristGuide,
    pub user: Option<UserSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = crate::schema::sql_types::BookingStatus)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CancelRequested,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::CancelRequested => "cancel-requested",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql<crate::schema::sql_types::BookingStatus, Pg> for BookingStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let s = match *self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::CancelRequested => "CANCEL_REQUESTED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
        };
        <str as ToSql<Text, Pg>>::to_sql(s, out)
    }
}

impl FromSql<crate::schema::sql_types::BookingStatus, Pg> for BookingStatus {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match <String as FromSql<Text, Pg>>::from_sql(bytes)?.as_str() {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCEL_REQUESTED" => Ok(BookingStatus::CancelRequested),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            "COMPLETED" => Ok(BookingStatus::Completed),
            s => Err(format!("Unrecognized booking status: {}", s).into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = crate::schema::sql_types::PaymentMethod)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Esewa,
    Khalti,
    Cash,
}

impl ToSql<crate::schema::sql_types::PaymentMethod, Pg> for PaymentMethod {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let s = match *self {
            PaymentMethod::Esewa => "ESEWA",
            PaymentMethod::Khalti => "KHALTI",
            PaymentMethod::Cash => "CASH",
        };
        <str as ToSql<Text, Pg>>::to_sql(s, out)
    }
}

impl FromSql<crate::schema::sql_types::PaymentMethod, Pg> for PaymentMethod {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match <String as FromSql<Text, Pg>>::from_sql(bytes)?.as_str() {
            "ESEWA" => Ok(PaymentMethod::Esewa),
            "KHALTI" => Ok(PaymentMethod::Khalti),
            "CASH" => Ok(PaymentMethod::Cash),
            s => Err(format!("Unrecognized payment method: {}", s).into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = crate::schema::sql_types::CancelledBy)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    User,
    Guide,
}

impl ToSql<crate::schema::sql_types::CancelledBy, Pg> for CancelledBy {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let s = match *self {
            CancelledBy::User => "USER",
            CancelledBy::Guide => "GUIDE",
        };
        <str as ToSql<Text, Pg>>::to_sql(s, out)
    }
}

impl FromSql<crate::schema::sql_types::CancelledBy, Pg> for CancelledBy {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match <String as FromSql<Text, Pg>>::from_sql(bytes)?.as_str() {
            "USER" => Ok(CancelledBy::User),
            "GUIDE" => Ok(CancelledBy::Guide),
            s => Err(format!("Unrecognized canceller: {}", s).into()),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = guide_bookings)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub guide_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub group_size: i32,
    pub total_price: f64,
    pub payment_method: PaymentMethod,
    pub special_requests: Option<String>,
    pub status: BookingStatus,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = guide_bookings)]
pub struct NewBooking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub guide_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub group_size: i32,
    pub total_price: f64,
    pub payment_method: PaymentMethod,
    pub special_requests: Option<String>,
    pub status: BookingStatus,
}

/// A booking with its guide and customer, newest-first listings use this shape.
#[derive(Debug, Clone, Serialize)]
pub struct BookingDetails {
    #[serde(flatten)]
    pub booking: Booking,
    pub guide: Option<GuideSummary>,
    pub user: Option<UserSummary>,
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub message: String,
    pub booking: Booking,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub message: String,
}
