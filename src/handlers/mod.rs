pub mod health;
pub mod orders;
pub mod payments;
pub mod refunds;
pub mod webhooks;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/healthz", web::get().to(health::healthz))
        .route("/readyz", web::get().to(health::readyz))
        .route("/metrics", web::get().to(health::metrics));
    orders::configure(cfg);
    payments::configure(cfg);
    refunds::configure(cfg);
    webhooks::configure(cfg);
}
