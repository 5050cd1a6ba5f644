use crate::auth::auth::AuthUser;
use crate::config::Config;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};
use serde_json::json;
use tracing::debug;

fn bearer_token(req: &ServiceRequest) -> Result<&str, &'static str> {
    let header = req
        .headers()
        .get("Authorization")
        .ok_or("Missing Authorization header")?
        .to_str()
        .map_err(|_| "Invalid Authorization header encoding")?;

    header
        .strip_prefix("Bearer ")
        .ok_or("Authorization header must start with Bearer")
}

fn reject(req: ServiceRequest, error: &str, details: Option<String>) -> ServiceResponse<BoxBody> {
    debug!(path = %req.path(), error, "Rejected request");
    let resp = HttpResponse::Unauthorized().json(json!({
        "error": error,
        "code": "UNAUTHORIZED",
        "details": details,
    }));
    req.into_response(resp.map_into_boxed_body())
}

/// Resolves the caller once per request; handlers pick it up as `AuthUser`.
pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("App config missing"))?;

    let user = match bearer_token(&req) {
        Ok(token) => AuthUser::from_token(token, &config.jwt_secret),
        Err(error) => return Ok(reject(req, error, None)),
    };

    match user {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.call(req).await
        }
        Err(e) => Ok(reject(req, "Invalid or expired token", Some(e))),
    }
}
