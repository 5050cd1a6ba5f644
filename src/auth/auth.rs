use crate::config::Config;
use crate::error::AttendanceError;
use crate::model::role::Role;
use crate::model::student::{GradeId, Student};
use crate::auth::jwt::verify_token;
use crate::store::CohortFilter;
use actix_web::{
    FromRequest, HttpMessage, HttpRequest, dev::Payload, error::ErrorUnauthorized, web::Data,
};
use futures::future::{Ready, ready};

/// Caller identity handed over by the session service's bearer token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,

    /// Present only for teachers assigned to a grade
    pub grade_id: Option<GradeId>,
}

impl AuthUser {
    /// Decodes and checks a raw bearer token.
    pub fn from_token(token: &str, secret: &str) -> Result<Self, String> {
        let claims = verify_token(token, secret)?;
        let role = Role::from_id(claims.role).ok_or_else(|| "Invalid role".to_string())?;
        Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.sub,
            role,
            grade_id: claims.grade_id,
        })
    }
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // auth_middleware already did the work for protected scopes
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let token = match req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
        {
            Some(t) => t,
            None => return ready(Err(ErrorUnauthorized("Missing token"))),
        };

        let config = match req.app_data::<Data<Config>>() {
            Some(c) => c,
            None => {
                return ready(Err(
                    actix_web::error::ErrorInternalServerError("Config missing"),
                ))
            }
        };

        ready(AuthUser::from_token(token, &config.jwt_secret).map_err(ErrorUnauthorized))
    }
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), AttendanceError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AttendanceError::Forbidden("Admin only".into()))
        }
    }

    pub fn require_staff(&self) -> Result<(), AttendanceError> {
        if matches!(self.role, Role::Admin | Role::Teacher) {
            Ok(())
        } else {
            Err(AttendanceError::Forbidden("Teacher/Admin only".into()))
        }
    }

    /// Detection events come from the camera service; admins may replay them.
    pub fn require_event_source(&self) -> Result<(), AttendanceError> {
        if matches!(self.role, Role::Admin | Role::System) {
            Ok(())
        } else {
            Err(AttendanceError::Forbidden("System/Admin only".into()))
        }
    }

    /// Admins see every grade, teachers only their own.
    pub fn require_grade(&self, grade_id: GradeId) -> Result<(), AttendanceError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::Teacher if self.grade_id == Some(grade_id) => Ok(()),
            _ => Err(AttendanceError::Forbidden(format!(
                "No access to grade {grade_id}"
            ))),
        }
    }

    pub fn require_student(&self, student: &Student) -> Result<(), AttendanceError> {
        self.require_grade(student.grade_id)
    }

    /// The requested grade if visible; otherwise the whole school for admins
    /// and the own grade for teachers.
    pub fn grade_scope(&self, requested: Option<GradeId>) -> Result<CohortFilter, AttendanceError> {
        if let Some(grade_id) = requested {
            self.require_grade(grade_id)?;
            return Ok(CohortFilter::Grade(grade_id));
        }
        match (self.role, self.grade_id) {
            (Role::Admin, _) => Ok(CohortFilter::All),
            (Role::Teacher, Some(grade_id)) => Ok(CohortFilter::Grade(grade_id)),
            _ => Err(AttendanceError::Forbidden("No grade assigned".into())),
        }
    }
}
