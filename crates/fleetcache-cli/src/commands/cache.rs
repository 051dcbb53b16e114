use std::time::Instant;

use anyhow::Result;
use colored::Colorize;
use fleetcache::{CacheContext, CacheError, CacheValue};

use crate::cli::{GetArgs, ScanArgs};
use crate::output::{describe_bytes, print_failure, print_success};

fn ensure_registered(ctx: &CacheContext, conn: u32) -> Result<()> {
    if ctx.registry().contains(conn) {
        Ok(())
    } else {
        Err(CacheError::UnknownConnection(conn).into())
    }
}

pub async fn get(ctx: &CacheContext, args: &GetArgs) -> Result<()> {
    ensure_registered(ctx, args.conn)?;
    let client = ctx.client();
    let value = if args.compressed {
        client.get_z(args.conn, &args.key).await
    } else {
        client.get(args.conn, &args.key).await
    };
    match value {
        CacheValue::Present(bytes) => println!("{}", describe_bytes(&bytes)),
        CacheValue::Absent => println!("{}", "(nil)".dimmed()),
    }
    Ok(())
}

pub async fn scan(ctx: &CacheContext, args: &ScanArgs) -> Result<()> {
    ensure_registered(ctx, args.conn)?;
    let keys = ctx.client().scan(args.conn, &args.pattern).await;
    for key in &keys {
        println!("{key}");
    }
    println!("{}: {}", "Keys".cyan(), keys.len());
    Ok(())
}

pub async fn status(ctx: &CacheContext) -> Result<()> {
    let ids = ctx.registry().ids();
    if ids.is_empty() {
        println!("{}", "no connections configured".yellow());
    }

    let mut failures = 0;
    for id in ids {
        let Some(conn) = ctx.registry().resolve(id) else {
            continue;
        };
        let started = Instant::now();
        match conn.ping().await {
            Ok(()) => print_success(&format!(
                "conn {} {} {}",
                id,
                conn.settings().url().cyan(),
                format!("{:?}", started.elapsed()).dimmed()
            )),
            Err(e) => {
                failures += 1;
                print_failure(&format!("conn {} {} {}", id, conn.settings().url().cyan(), e.to_string().red()));
            }
        }
    }

    for (name, bus) in [
        ("command bus", ctx.command_bus().config()),
        ("entity bus", ctx.entity_bus().config()),
    ] {
        if bus.is_configured() {
            println!("{}: {} @ {}", name.cyan(), bus.channel, bus.address);
        } else {
            println!("{}: {}", name.cyan(), "not configured".dimmed());
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} connection(s) unreachable");
    }
    Ok(())
}
