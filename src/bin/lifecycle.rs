// One lifecycle pass, meant for cron:
//   0 1 * * * /usr/local/bin/lifecycle
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;

use wastewise::config::JobConfig;
use wastewise::lifecycle;
use wastewise::mailer::Mailer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    wastewise::init_logging();

    let config = JobConfig::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let mailer = Mailer::new(
        config.brevo_api_base,
        config.brevo_api_key,
        config.mail_sender_email,
        config.mail_sender_name,
    );

    let today = wastewise::local_today();
    let report = lifecycle::run_once(&pool, &config.policy, today, &mailer).await?;
    log::info!("lifecycle run for {today}: {}", serde_json::to_string(&report)?);

    pool.close().await;
    Ok(())
}
