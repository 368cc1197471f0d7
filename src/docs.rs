use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::auth::register,
        crate::api::auth::login,
        crate::api::billing::list_plans,
        crate::api::billing::subscribe,
        crate::api::payments::paymongo_checkout,
        crate::api::payments::gcash_payment,
        crate::api::webhooks_paymongo::paymongo_webhook
    ),
    components(
        schemas(
            crate::api::auth::AddressInput,
            crate::api::auth::RegisterRequest,
            crate::api::auth::RegisterResponse,
            crate::api::auth::LoginRequest,
            crate::api::auth::AuthResponse,
            crate::api::billing::SubscribeRequest,
            crate::api::payments::CheckoutRequest,
            crate::models::SubscriptionPlan,
            crate::models::Role,
            crate::models::ApprovalStatus
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Registration and sign-in"),
        (name = "billing", description = "Plans and subscriptions"),
        (name = "payments", description = "PayMongo checkout and GCash receipts"),
        (name = "webhooks", description = "Callbacks from PayMongo")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
