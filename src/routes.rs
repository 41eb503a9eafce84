use actix_web::web;

use crate::{governance, ingress};

/// Mounts the governance REST surface under `/api/governance/*` and the
/// inference ingress under `/v1/*`, matching the verbatim paths required
/// for compatibility.
pub fn configure_api_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/api").configure(governance::rest::configure));
    cfg.service(web::scope("/v1").configure(ingress::configure));
}
