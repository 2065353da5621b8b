use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context as _;
use clap::Parser;
use dotenvy::dotenv;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::Tracer, Resource};
use radiobot::{
    command::{self, register_commands},
    DiscordPlatform, Radio, SettingsStore, RECONCILE_INTERVAL,
};
use serenity::{
    all::OnlineStatus,
    client::Client,
    prelude::GatewayIntents,
};
use songbird::SerenityInit;
use tracing::{error, info};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracer(otlp_endpoint: String) -> Tracer {
    let otlp_exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(otlp_endpoint);
    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(otlp_exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::config().with_resource(Resource::new(vec![KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                "radiobot",
            )])),
        )
        .install_simple()
        .expect("Failed to install opentelemetry pipeline")
}

fn init_tracing_subscriber(otlp_endpoint: Option<String>) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(otlp_endpoint.map(|endpoint| OpenTelemetryLayer::new(init_tracer(endpoint))))
        .init();
}

#[derive(Parser)]
#[clap(version, about)]
struct Opt {
    #[clap(long, env, value_parser, default_value = "config.json")]
    config_file: PathBuf,

    /// Overrides the token stored in the config file
    #[clap(long, env)]
    discord_token: Option<String>,

    /// How long to wait for a voice connection to become ready, e.g. "30s"
    #[clap(long, env, value_parser = humantime::parse_duration, default_value = "30s")]
    ready_timeout: Duration,

    #[clap(long, env)]
    otlp_endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let started_at = Instant::now();
    dotenv().ok();

    let opt = Opt::parse();

    init_tracing_subscriber(opt.otlp_endpoint);

    let store = SettingsStore::load(&opt.config_file)?;
    let token = store.settings().resolve_token(opt.discord_token)?;
    let settings = store.into_shared();
    let ready_timeout = opt.ready_timeout;

    let framework = poise::Framework::builder()
        .setup(move |ctx, ready, framework: &poise::Framework<command::Data, anyhow::Error>| {
            Box::pin(async move {
                info!("Logged in as {}!", ready.user.tag());
                ctx.set_presence(None, OnlineStatus::Online);

                register_commands(ctx, &framework.options().commands).await;

                let manager = songbird::get(ctx)
                    .await
                    .context("Songbird Voice client placed in at initialization.")?;
                let platform = Arc::new(DiscordPlatform::new(ctx.clone(), manager));
                let radio = Arc::new(Radio::new(platform, settings, ready_timeout, started_at));
                tokio::spawn(Arc::clone(&radio).reconcile(RECONCILE_INTERVAL));

                Ok(radio)
            })
        })
        .options(poise::FrameworkOptions {
            commands: command::commands(),
            ..Default::default()
        })
        .build();

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(&token, intents)
        .framework(framework)
        .register_songbird()
        .await
        .context("Error while creating client")?;

    let shard_manager = client.shard_manager.clone();

    #[allow(clippy::redundant_pub_crate)]
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
        }
        shard_manager.shutdown_all().await;
    });

    if let Err(why) = client.start().await {
        error!("Client ended: {why:?}");
    }

    Ok(())
}
