pub mod sql_types {
    #[derive(diesel::query_builder::QueryId, diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "booking_status"))]
    pub struct BookingStatus;

    #[derive(diesel::query_builder::QueryId, diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "payment_method"))]
    pub struct PaymentMethod;

    #[derive(diesel::query_builder::QueryId, diesel::sql_types::SqlType)]
    #[diesel(postgres_type(name = "cancelled_by"))]
    pub struct CancelledBy;
}

diesel::table! {
    users (id) {
        id -> Uuid,
        #[max_length = 255]
        username -> Varchar,
        #[max_length = 255]
        email -> Varchar,
        #[max_length = 64]
        role -> Varchar,
        img -> Nullable<Text>,
        #[max_length = 255]
        city -> Nullable<Varchar>,
        #[max_length = 255]
        country -> Nullable<Varchar>,
        #[max_length = 64]
        contact_number -> Nullable<Varchar>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    tourist_guides (id) {
        id -> Uuid,
        user_id -> Uuid,
        #[max_length = 255]
        name -> Varchar,
        #[max_length = 255]
        email -> Varchar,
        img -> Text,
        #[max_length = 255]
        location -> Varchar,
        #[max_length = 255]
        language -> Varchar,
        experience -> Int4,
        #[max_length = 64]
        contact_number -> Varchar,
        #[max_length = 64]
        license_number -> Varchar,
        category -> Array<Text>,
        price_per_day -> Float8,
        max_group_size -> Int4,
        is_available -> Bool,
        created_at -> Timestamp,
    }
}

diesel::table! {
    use diesel::sql_types::*;
    use super::sql_types::{BookingStatus, CancelledBy, PaymentMethod};

    guide_bookings (id) {
        id -> Uuid,
        user_id -> Uuid,
        guide_id -> Uuid,
        start_date -> Date,
        end_date -> Date,
        group_size -> Int4,
        total_price -> Float8,
        payment_method -> PaymentMethod,
        special_requests -> Nullable<Text>,
        status -> BookingStatus,
        cancellation_reason -> Nullable<Text>,
        cancelled_by -> Nullable<CancelledBy>,
        created_at -> Timestamp,
    }
}

diesel::joinable!(guide_bookings -> tourist_guides (guide_id));
diesel::joinable!(tourist_guides -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    guide_bookings,
    tourist_guides,
    users,
);
