use std::sync::Arc;

use poise::CreateReply;
use serenity::all::{Context as SerenityContext, GuildChannel};
use tracing::{error, info};

use crate::{
    core::{Invocation, Radio, RadioCommand},
    discord::DiscordPlatform,
};

pub type Data = Arc<Radio<DiscordPlatform>>;
pub type Command = poise::Command<Data, anyhow::Error>;
type Context<'a> = poise::Context<'a, Data, anyhow::Error>;

/// Set stream link to play! 🎧
#[poise::command(slash_command, rename = "set-streamlink")]
pub async fn set_streamlink(
    ctx: Context<'_>,
    #[description = "The stream link 🎵"] link: String,
) -> anyhow::Result<()> {
    respond(ctx, RadioCommand::SetStreamLink(link)).await
}

/// Set channel for playing radio 🔊
#[poise::command(slash_command, rename = "set-channel")]
pub async fn set_channel(
    ctx: Context<'_>,
    #[description = "Voice channel to join and play radio 📻"]
    #[channel_types("Voice", "Stage")]
    channel: GuildChannel,
) -> anyhow::Result<()> {
    respond(ctx, RadioCommand::SetChannel(channel.id)).await
}

/// Reload bot configuration and playback 🔄
#[poise::command(slash_command)]
pub async fn reload(ctx: Context<'_>) -> anyhow::Result<()> {
    respond(ctx, RadioCommand::Reload).await
}

/// Display bot information 📖
#[poise::command(slash_command)]
pub async fn info(ctx: Context<'_>) -> anyhow::Result<()> {
    respond(ctx, RadioCommand::Info).await
}

pub fn commands() -> Vec<Command> {
    vec![set_streamlink(), set_channel(), reload(), info()]
}

async fn respond(ctx: Context<'_>, command: RadioCommand) -> anyhow::Result<()> {
    let invocation = Invocation {
        caller: ctx.author().id,
        caller_tag: ctx.author().tag(),
        command,
    };
    let response = ctx.data().dispatch(&invocation);

    ctx.send(
        CreateReply::default()
            .content(response.content)
            .ephemeral(true),
    )
    .await?;

    if let Some(action) = response.after_reply {
        ctx.data().after_reply(action).await;
    }
    Ok(())
}

/// Replaces the bot's global slash commands with `commands`.
///
/// A failure is only logged; whatever was registered before stays in place.
pub async fn register_commands(ctx: &SerenityContext, commands: &[Command]) {
    info!("Started refreshing application global slash commands");
    match poise::builtins::register_globally(ctx, commands).await {
        Ok(()) => info!("Successfully reloaded application global slash commands"),
        Err(e) => error!("Failed to reload application global slash commands: {e:?}"),
    }
}
