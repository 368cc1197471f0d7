// src/main.rs
use actix::Actor;
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer, Responder};
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_s3::Client as S3Client;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use wastewise::api::auth::{ensure_admin, JwtKeys, JwtMiddleware};
use wastewise::api::paymongo_client::PayMongoClient;
use wastewise::config::Config;
use wastewise::mailer::Mailer;
use wastewise::ocr::MockOcr;
use wastewise::queue::{self, QueueSettings};
use wastewise::s3_utils::ReceiptStorage;
use wastewise::ws::CollectionHub;
use wastewise::{api, docs, lifecycle, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    wastewise::init_logging();

    let config = Config::from_env().map_err(std::io::Error::other)?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(std::io::Error::other)?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .map_err(std::io::Error::other)?;

    if let Some(admin) = &config.admin_bootstrap {
        if let Err(e) = ensure_admin(&pool, &admin.username, &admin.email, &admin.password).await {
            log::error!("admin bootstrap failed: {e}");
        }
    }

    let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;
    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);

    // S3-compatible endpoints (MinIO and the like) need path-style addressing.
    if let Some(endpoint) = &config.s3_endpoint {
        s3_config_builder = s3_config_builder
            .endpoint_url(endpoint)
            .force_path_style(true);
    }
    let s3_client = S3Client::from_conf(s3_config_builder.build());

    let mailer = Mailer::new(
        config.brevo_api_base.clone(),
        config.brevo_api_key.clone(),
        config.mail_sender_email.clone(),
        config.mail_sender_name.clone(),
    );
    let ocr = MockOcr::new(config.ocr_failure_rate);

    match &config.rabbitmq_url {
        Some(url) => {
            let settings = QueueSettings {
                rabbitmq_url: url.clone(),
                poll_interval_secs: config.ocr_poll_interval_secs,
                batch_size: config.ocr_batch_size,
            };
            tokio::spawn(queue::start_receipt_verification_queue(pool.clone(), ocr, settings));
        }
        None => log::warn!("RABBITMQ_URL not set, receipts are verified inline"),
    }

    if let Some(interval) = config.lifecycle_interval_secs {
        lifecycle::spawn(pool.clone(), config.lifecycle_policy(), mailer.clone(), interval);
    }

    let state = web::Data::new(AppState {
        pool,
        jwt: JwtKeys::new(config.jwt_secret.clone(), config.jwt_ttl_days),
        storage: ReceiptStorage::new(
            s3_client,
            config.s3_bucket.clone(),
            config.s3_public_base_url.clone(),
        ),
        paymongo: PayMongoClient::new(
            config.paymongo_api_base.clone(),
            config.paymongo_secret_key.clone(),
        ),
        paymongo_webhook_secret: config.paymongo_webhook_secret.clone(),
        app_base_url: config.app_base_url.clone(),
        mailer,
        ocr,
        inline_ocr: config.rabbitmq_url.is_none(),
        invoice_due_days: config.invoice_due_days,
        ws_hub: CollectionHub::new().start(),
    });

    log::info!("listening on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            .configure(api::public)
            .service(
                web::scope("/api")
                    .wrap(JwtMiddleware::new(state.jwt.clone()))
                    .configure(api::protected),
            )
    })
    .bind(&config.bind_addr)?
    .run()
    .await
}
