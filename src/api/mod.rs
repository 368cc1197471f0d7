pub mod admin;
pub mod auth;
pub mod billing;
pub mod collections;
pub mod locations;
pub mod paymongo;
pub mod paymongo_client;
pub mod payments;
pub mod webhooks_paymongo;

use actix_web::web;

/// Routes reachable without a token.
pub fn public(cfg: &mut web::ServiceConfig) {
    cfg.service(auth::register)
        .service(auth::login)
        .service(locations::list_barangays)
        .service(webhooks_paymongo::paymongo_webhook)
        .service(crate::ws::collections_ws);
}

/// Routes mounted under `/api`; the caller wraps them with authentication.
pub fn protected(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .service(admin::pending_registrations)
            .service(admin::approve_registration)
            .service(admin::reject_registration)
            .service(admin::list_users)
            .service(admin::create_collector)
            .service(admin::list_collectors)
            .service(admin::assign_collector)
            .service(admin::unassign_collector)
            .service(admin::dashboard)
            .service(billing::create_plan)
            .service(billing::update_plan)
            .service(billing::admin_list_invoices)
            .service(payments::pending_payments)
            .service(payments::confirm_payment)
            .service(payments::reject_payment)
            .service(locations::create_barangay)
            .service(locations::create_subdivision)
            .service(collections::create_schedule)
            .service(collections::list_schedules)
            .service(collections::delete_schedule),
    )
    .service(auth::me)
    .service(auth::update_me)
    .service(billing::list_plans)
    .service(billing::subscribe)
    .service(billing::current_subscription)
    .service(billing::cancel_subscription)
    .service(billing::list_invoices)
    .service(billing::get_invoice)
    .service(billing::list_receipts)
    .service(payments::paymongo_checkout)
    .service(payments::gcash_payment)
    .service(payments::list_payments)
    .service(collections::weekly_schedule)
    .service(collections::today)
    .service(collections::collector_route)
    .service(collections::update_status);
}
