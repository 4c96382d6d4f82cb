use std::future::{ready, Ready};

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use uuid::Uuid;

use crate::error::ServiceError;

/// Header carrying the caller's user id, set by the gateway after it has
/// verified the session.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

impl AuthenticatedUser {
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl FromRequest for AuthenticatedUser {
    type Error = ServiceError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let user = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .map(AuthenticatedUser)
            .ok_or_else(|| ServiceError::Unauthorized("You are not authenticated!".to_owned()));

        if user.is_err() {
            log::debug!("Rejected unauthenticated request to {}", req.path());
        }
        ready(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[actix_web::test]
    async fn extracts_user_from_header() {
        let id = Uuid::new_v4();
        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, id.to_string()))
            .to_http_request();
        let user = AuthenticatedUser::extract(&req).await.unwrap();
        assert_eq!(user.id(), id);
    }

    #[actix_web::test]
    async fn missing_or_malformed_identity_is_rejected() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(
            AuthenticatedUser::extract(&req).await,
            Err(ServiceError::Unauthorized(_))
        ));

        let req = TestRequest::default()
            .insert_header((USER_ID_HEADER, "not-a-user"))
            .to_http_request();
        assert!(AuthenticatedUser::extract(&req).await.is_err());
    }
}
