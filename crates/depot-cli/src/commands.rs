use std::io::{self, Write};
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use colored::Colorize;
use depot_dispatch::{Depot, DepotConfig, Dispatcher};
use depot_protocol::{Inbound, LineCodec};
use depot_queue::QueueError;
use depot_status::{IndexValidator, StatusLedger};
use depot_types::{Metadata, StatusUpdate, SubmissionId, Timestamp, Username};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let (config, used) =
        DepotConfig::discover(cli.config.as_deref()).context("loading configuration")?;
    match &used {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    if let Command::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let depot = Depot::open(&config).context("opening depot")?;
    match cli.command {
        Command::Enqueue(args) => cmd_enqueue(&depot, args),
        Command::Tick => cmd_tick(&depot.dispatcher),
        Command::Dispatch => cmd_dispatch(&depot.dispatcher),
        Command::Register(args) => cmd_register(&depot.ledger, args),
        Command::Update(args) => cmd_update(&depot.ledger, args),
        Command::Status(args) => cmd_status(&depot.ledger, args),
        Command::Statuses(args) => cmd_statuses(&depot.ledger, args),
        Command::Remove(args) => cmd_remove(&depot.ledger, args),
        Command::Gc(args) => {
            let max_age = args
                .max_age
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.status.gc_max_age());
            cmd_gc(&depot.ledger, max_age)
        }
        Command::Queue => cmd_queue(&depot),
        Command::Compact => {
            depot.root.compact().context("compacting store")?;
            println!("{} Store compacted.", "✓".green());
            Ok(())
        }
        Command::Verify => cmd_verify(&depot.ledger),
        Command::Worker(args) => cmd_worker(depot, &config, args),
        Command::Config => Ok(()),
    }
}

fn cmd_enqueue(depot: &Depot, args: EnqueueArgs) -> anyhow::Result<()> {
    let data = std::fs::read(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let username = Username::parse(args.user)?;
    let submission_id = SubmissionId::parse(args.id)?;
    let metadata: Metadata = args.meta.into_iter().collect();

    let request = match depot
        .queue
        .enqueue(username.clone(), submission_id.clone(), metadata, &data)
    {
        Ok(request) => request,
        Err(QueueError::DuplicateContent {
            queued_submission, ..
        }) => bail!(
            "identical content is already queued as submission {}",
            queued_submission
        ),
        Err(err) => return Err(err).context("queueing upload"),
    };
    if args.track {
        depot
            .ledger
            .register(&username, &submission_id)
            .context("registering submission")?;
    }

    println!(
        "{} Queued {} for {} ({} bytes, blob {})",
        "✓".green().bold(),
        request.submission_id.as_str().yellow(),
        request.username.as_str().bold(),
        data.len(),
        request.blob_hash.short_hex().dimmed()
    );
    Ok(())
}

/// Deliver at most one upload, writing replies to stdout.
fn deliver(dispatcher: &Dispatcher) -> anyhow::Result<u64> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut sent = 0;
    dispatcher.react_with(Inbound::QueueTick, |reply| {
        LineCodec::write_frame(&mut out, &reply)?;
        sent += 1;
        Ok(())
    })?;
    Ok(sent)
}

fn cmd_tick(dispatcher: &Dispatcher) -> anyhow::Result<()> {
    if deliver(dispatcher)? == 0 {
        eprintln!("Queue is empty.");
    }
    Ok(())
}

fn cmd_dispatch(dispatcher: &Dispatcher) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let stats = dispatcher
        .serve(&mut stdin.lock(), &mut stdout.lock())
        .context("dispatching messages")?;
    eprintln!(
        "{} {} received, {} sent",
        "✓".green(),
        stats.received,
        stats.sent
    );
    Ok(())
}

fn cmd_register(ledger: &StatusLedger, args: RegisterArgs) -> anyhow::Result<()> {
    let username = Username::parse(args.user)?;
    let submission_id = SubmissionId::parse(args.id)?;
    let info = ledger.register(&username, &submission_id)?;
    println!(
        "{} Tracking {} for {} since {}",
        "✓".green().bold(),
        info.submission_id.as_str().yellow(),
        username.as_str().bold(),
        format_time(info.registered_at())
    );
    Ok(())
}

fn cmd_update(ledger: &StatusLedger, args: UpdateArgs) -> anyhow::Result<()> {
    let mut update = StatusUpdate::new(SubmissionId::parse(args.id)?, args.message, Timestamp::now());
    if let Some(url) = args.url {
        update = update.with_publication_url(url);
    }
    if let Some(name) = args.name {
        update = update.with_display_name(name);
    }

    if ledger.record_update(&update)? {
        println!("{} Recorded.", "✓".green());
    } else {
        println!(
            "{} {} is not tracked; update ignored.",
            "!".yellow().bold(),
            update.submission_id.as_str().yellow()
        );
    }
    Ok(())
}

fn cmd_status(ledger: &StatusLedger, args: StatusArgs) -> anyhow::Result<()> {
    let submission_id = SubmissionId::parse(args.id)?;
    let username = args.user.map(Username::parse).transpose()?;
    let info = ledger.info(&submission_id, username.as_ref())?;

    println!("Submission {}", info.submission_id.as_str().yellow().bold());
    if let Some(name) = &info.display_name {
        println!("  Name: {name}");
    }
    if let Some(url) = &info.publication_url {
        println!("  URL: {}", url.blue());
    }
    println!("  Registered: {}", format_time(info.registered_at()));
    let messages = info.messages();
    if messages.is_empty() {
        println!("  No status messages yet.");
    }
    for message in messages {
        println!("  {}  {}", format_time(message.timestamp()).dimmed(), message.text());
    }
    Ok(())
}

fn cmd_statuses(ledger: &StatusLedger, args: StatusesArgs) -> anyhow::Result<()> {
    let username = Username::parse(args.user)?;
    let records = ledger.query_all(&username)?;
    if records.is_empty() {
        println!("Nothing tracked for {}.", username.as_str().bold());
        return Ok(());
    }
    for info in records {
        let latest = info
            .messages()
            .last()
            .map(|m| m.text().to_string())
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  {}  {}",
            info.submission_id.as_str().yellow(),
            format_time(info.registered_at()).dimmed(),
            latest
        );
    }
    Ok(())
}

fn cmd_remove(ledger: &StatusLedger, args: RemoveArgs) -> anyhow::Result<()> {
    let submission_id = SubmissionId::parse(args.id)?;
    let username = args.user.map(Username::parse).transpose()?;
    if ledger.remove(&submission_id, username.as_ref())? {
        println!("Stopped tracking {}", submission_id.as_str().yellow());
    } else {
        println!("{} was not tracked.", submission_id.as_str().yellow());
    }
    Ok(())
}

fn cmd_gc(ledger: &StatusLedger, max_age: Duration) -> anyhow::Result<()> {
    let removed = ledger.garbage_collect(max_age)?;
    println!(
        "{} GC: {} record(s) older than {}s removed.",
        "✓".green(),
        removed.len(),
        max_age.as_secs()
    );
    Ok(())
}

fn cmd_queue(depot: &Depot) -> anyhow::Result<()> {
    let requests = depot.queue.requests()?;
    if requests.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    for request in requests {
        println!(
            "{}  {}  {}  {}",
            format_time(request.created_at).dimmed(),
            request.blob_hash.short_hex(),
            request.username.as_str().bold(),
            request.submission_id.as_str().yellow()
        );
    }
    Ok(())
}

fn cmd_verify(ledger: &StatusLedger) -> anyhow::Result<()> {
    let report = IndexValidator::validate(&ledger.snapshot()?);
    if report.is_valid() {
        println!("{} Status indices consistent", "✓".green().bold());
        println!("  Records: {}", report.record_count);
        println!("  Owners: {}", report.owner_count);
        return Ok(());
    }
    for violation in &report.violations {
        println!(
            "  {} {:?} {}: {}",
            "✗".red(),
            violation.kind,
            violation.key.yellow(),
            violation.description
        );
    }
    bail!("{} index violation(s) found", report.violations.len())
}

fn cmd_worker(depot: Depot, config: &DepotConfig, args: WorkerArgs) -> anyhow::Result<()> {
    let tick_every = args
        .tick_ms
        .map(|ms| Duration::from_millis(ms.max(1)))
        .unwrap_or_else(|| config.worker.tick_interval());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    runtime.block_on(run_worker(
        depot,
        tick_every,
        config.worker.gc_interval(),
        config.status.gc_max_age(),
    ))
}

async fn run_worker(
    depot: Depot,
    tick_every: Duration,
    gc_every: Duration,
    max_age: Duration,
) -> anyhow::Result<()> {
    let mut ticks = tokio::time::interval(tick_every);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut gc = tokio::time::interval(gc_every);
    gc.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(?tick_every, ?gc_every, "worker started");
    let mut delivered = 0u64;
    loop {
        tokio::select! {
            _ = ticks.tick() => {
                delivered += deliver(&depot.dispatcher)?;
            }
            _ = gc.tick() => {
                match depot.ledger.garbage_collect(max_age) {
                    Ok(removed) if !removed.is_empty() => info!(removed = removed.len(), "status records collected"),
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "garbage collection failed"),
                }
            }
            signal = &mut shutdown => {
                signal.context("waiting for ctrl-c")?;
                break;
            }
        }
    }
    io::stdout().flush()?;
    info!(delivered, "worker stopped");
    Ok(())
}

/// UTC wall-clock time; raw seconds for values before the epoch or out of
/// range.
fn format_time(ts: Timestamp) -> String {
    let secs = ts.as_secs();
    if !secs.is_finite() || secs < 0.0 {
        return ts.to_string();
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9) as u32;
    match DateTime::<Utc>::from_timestamp(whole as i64, nanos) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_utc_seconds() {
        assert_eq!(format_time(Timestamp::from_secs(0.0)), "1970-01-01 00:00:00");
        assert_eq!(format_time(Timestamp::from_secs(1_700_000_000.75)), "2023-11-14 22:13:20");
    }

    #[test]
    fn out_of_range_falls_back_to_seconds() {
        let ts = Timestamp::from_secs(1e20);
        assert_eq!(format_time(ts), ts.to_string());
    }

    #[test]
    fn negative_and_non_finite_fall_back_to_seconds() {
        for secs in [-0.5, -1_700_000_000.25, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let ts = Timestamp::from_secs(secs);
            assert_eq!(format_time(ts), ts.to_string());
        }
    }
}
