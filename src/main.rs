use std::sync::Arc;
use std::time::Duration;

use salonbook::config::AppConfig;
use salonbook::services::cron;
use salonbook::services::messaging::twilio::TwilioWhatsAppProvider;
use salonbook::services::messaging::{LogOnlyProvider, MessagingProvider};
use salonbook::state::AppState;
use salonbook::{db, observability};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    observability::init_tracing();

    let config = AppConfig::from_env();
    if config.is_production() {
        anyhow::ensure!(
            config.cron_secret.is_some(),
            "CRON_SECRET must be set when APP_ENV=production"
        );
        anyhow::ensure!(
            config.admin_token != "changeme",
            "ADMIN_TOKEN must be changed when APP_ENV=production"
        );
    }
    observability::init_metrics(config.metrics_port)?;

    let conn = db::init_db(&config.database_url)?;

    let messaging: Box<dyn MessagingProvider> = if config.twilio_account_sid.is_empty() {
        tracing::info!("TWILIO_ACCOUNT_SID not set, WhatsApp messages will only be logged");
        Box::new(LogOnlyProvider)
    } else {
        tracing::info!("using Twilio WhatsApp provider");
        Box::new(TwilioWhatsAppProvider::new(
            config.twilio_account_sid.clone(),
            config.twilio_auth_token.clone(),
            config.twilio_whatsapp_number.clone(),
            Duration::from_secs(config.notification_timeout_secs),
        )?)
    };

    let state = Arc::new(AppState::new(conn, config.clone(), messaging));

    if let Some(secs) = config.cron_interval_secs.filter(|s| *s > 0) {
        tracing::info!("running cron jobs in-process every {secs}s");
        cron::spawn_scheduler(state.clone(), Duration::from_secs(secs));
    }

    let app = salonbook::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
