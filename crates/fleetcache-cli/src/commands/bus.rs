use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use fleetcache::{CacheContext, EntityId, commands};
use tracing::info;

use crate::cli::{ListenArgs, NotifyArgs, SendArgs};
use crate::output::print_success;

const READY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn listen(ctx: &CacheContext, args: &ListenArgs) -> Result<()> {
    let command_bus = ctx.command_bus();
    let names: Vec<String> = if args.commands.is_empty() {
        commands::ALL.iter().map(|name| name.to_string()).collect()
    } else {
        args.commands.clone()
    };
    for name in names {
        let label = name.clone();
        command_bus.subscribe(name, move || info!(command = %label, "command received"));
    }

    let entity_bus = ctx.entity_bus();
    if args.entity_types.is_empty() {
        entity_bus.subscribe_all(|id| info!(entity = id, "entity updated"));
    } else {
        for entity_type in &args.entity_types {
            entity_bus.subscribe(entity_type.clone(), |id| {
                let parsed = EntityId::parse(id);
                info!(entity = id, entity_type = parsed.entity_type(), "entity updated");
            });
        }
    }

    let (commands_handle, entities_handle) = ctx.start_buses()?;
    for (handle, channel) in [
        (&commands_handle, &command_bus.config().channel),
        (&entities_handle, &entity_bus.config().channel),
    ] {
        if handle.wait_ready(READY_TIMEOUT).await {
            print_success(&format!("listening on {}", channel.cyan()));
        } else {
            println!(
                "{} {} not subscribed yet, retrying in the background",
                "…".yellow(),
                channel.cyan()
            );
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutting down listeners");
    commands_handle.shutdown().await;
    entities_handle.shutdown().await;
    Ok(())
}

pub async fn send(ctx: &CacheContext, args: &SendArgs) -> Result<()> {
    let receivers = ctx.command_bus().send(&args.command).await?;
    print_success(&format!(
        "sent {} to {} subscriber(s)",
        args.command.cyan(),
        receivers
    ));
    Ok(())
}

pub async fn notify(ctx: &CacheContext, args: &NotifyArgs) -> Result<()> {
    let id = EntityId::parse(&args.entity_id);
    if id.local_id().is_none() {
        anyhow::bail!("entity id must look like <type>-<id>, got {id}");
    }
    let receivers = ctx.entity_bus().send(id.as_str()).await?;
    print_success(&format!(
        "announced {} ({}) to {} subscriber(s)",
        id.as_str().cyan(),
        id.entity_type(),
        receivers
    ));
    Ok(())
}
