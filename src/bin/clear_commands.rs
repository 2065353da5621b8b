use std::path::PathBuf;

use clap::Parser;
use dotenvy::dotenv;
use radiobot::SettingsStore;
use serenity::{http::Http, model::application::Command};

/// Removes every global slash command registered for the bot
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    #[arg(long, env, default_value = "config.json")]
    config_file: PathBuf,

    #[arg(long, env)]
    discord_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args = Args::parse();

    let store = SettingsStore::load(&args.config_file)?;
    let token = store.settings().resolve_token(args.discord_token)?;

    let http = Http::new(&token);
    let app = http.get_current_application_info().await?;
    http.set_application_id(app.id);

    let commands = Command::get_global_commands(&http).await?;
    if commands.is_empty() {
        println!("No global commands found.");
    } else {
        Command::set_global_commands(&http, Vec::new()).await?;
        println!("All {} global commands removed.", commands.len());
    }

    Ok(())
}
