use crate::{
    api::{attendance, sms, stats},
    auth::middleware::auth_middleware,
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::{Context, Result};
use std::sync::Arc;

pub type Limiter = Governor<PeerIpKeyExtractor, NoOpMiddleware>;

/// Per-peer limiters, built once and shared by every worker.
#[derive(Clone)]
pub struct Limiters {
    pub events: Arc<Limiter>,
    pub protected: Arc<Limiter>,
}

fn build_limiter(requests_per_min: u32) -> Result<Limiter> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .with_context(|| format!("invalid rate limit: {requests_per_min}/min"))?;
    Ok(Governor::new(&cfg))
}

impl Limiters {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            events: Arc::new(build_limiter(config.rate_events_per_min)?),
            protected: Arc::new(build_limiter(config.rate_protected_per_min)?),
        })
    }
}

pub fn configure(cfg: &mut web::ServiceConfig, api_prefix: &str, limiters: &Limiters) {
    cfg.service(
        web::scope(api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(limiters.protected.clone()) // rate limiting
            .service(
                web::scope("/attendance")
                    // /attendance/events
                    .service(
                        web::resource("/events")
                            .wrap(limiters.events.clone())
                            .route(web::post().to(attendance::record_detection)),
                    )
                    // /attendance/mark
                    .service(
                        web::resource("/mark").route(web::post().to(attendance::mark_attendance)),
                    )
                    // /attendance/roster
                    .service(web::resource("/roster").route(web::get().to(attendance::day_roster)))
                    // /attendance/recent
                    .service(
                        web::resource("/recent").route(web::get().to(attendance::recent_check_ins)),
                    )
                    // /attendance/{student_id}/{date}
                    .service(
                        web::resource("/{student_id}/{date}")
                            .route(web::get().to(attendance::get_record)),
                    ),
            )
            .service(
                web::scope("/stats")
                    // /stats
                    .service(web::resource("").route(web::get().to(stats::get_stats)))
                    .service(web::resource("/daily").route(web::get().to(stats::daily_stats)))
                    .service(
                        web::resource("/students").route(web::get().to(stats::student_breakdown)),
                    )
                    // /stats/student/{id}/recent
                    .service(
                        web::resource("/student/{student_id}/recent")
                            .route(web::get().to(stats::student_recent)),
                    ),
            )
            .service(
                web::scope("/sms")
                    .service(web::resource("/test").route(web::post().to(sms::send_test)))
                    .service(web::resource("/send").route(web::post().to(sms::send_manual)))
                    .service(web::resource("/logs").route(web::get().to(sms::list_logs))),
            ),
    );
}
