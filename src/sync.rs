//! Reconciliation of a parsed feed against its Google Calendar.
//!
//! One run per feed source: resolve (or create) the calendar whose summary
//! matches the feed title, fetch existing events inside the feed's time
//! window keyed by the private feed-id tag, then decide create/update/no-op
//! per entry and flush the write queue in batches. The reconciliation path
//! never deletes events; `clean_feed` is the separate destructive path.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use std::collections::HashMap;

use crate::body::build_event_body;
use crate::diff::event_differs;
use crate::feed::OrgFeed;
use crate::gcal::{BatchOp, Calendar, CalendarBackend, EventResource, MAX_BATCH_SIZE};
use crate::location::LocationSource;
use crate::window::TimeWindow;

/// Counters reported after a reconciliation run.
#[derive(Debug, Default)]
pub struct SyncStats {
    /// Feed entries, valid or not
    pub total: usize,
    /// Entries whose title did not parse
    pub invalid: usize,
    /// Create operations enqueued
    pub created: usize,
    /// Update operations enqueued
    pub updated: usize,
    /// Entries matched to a stored event with no difference
    pub unchanged: usize,
    /// Tagged events fetched from the lookup window
    pub existing: usize,
    /// Operations that failed inside a batch
    pub failed: usize,
}

/// Find the calendar whose summary matches the feed title, creating it if
/// absent.
async fn resolve_calendar<B: CalendarBackend>(
    backend: &B,
    calendars: &[Calendar],
    summary: &str,
    tz: Tz,
    owner: &str,
) -> Result<Calendar> {
    if let Some(calendar) = calendars.iter().find(|c| c.summary == summary) {
        println!(
            "Found existing calendar \"{}\" - \"{}\"",
            calendar.id, calendar.summary
        );
        return Ok(calendar.clone());
    }

    println!("Creating new calendar \"{}\"", summary);
    let calendar = backend
        .create_calendar(summary, tz.name(), owner)
        .await
        .with_context(|| format!("Failed to create calendar \"{}\"", summary))?;
    println!(
        "Created new calendar \"{}\" - \"{}\"",
        calendar.id, calendar.summary
    );
    Ok(calendar)
}

/// Key fetched events by their feed-id tag, first-seen order winning on
/// duplicates. Untagged events are invisible to reconciliation.
fn key_by_feed_id(events: Vec<EventResource>) -> HashMap<String, EventResource> {
    let mut keyed = HashMap::new();
    for event in events {
        if let Some(feed_id) = event.feed_id() {
            keyed.entry(feed_id.to_string()).or_insert(event);
        }
    }
    keyed
}

/// Flush queued operations in batches of at most [`MAX_BATCH_SIZE`],
/// submitted in enqueue order. Partial failures inside a batch are counted,
/// not rolled back.
async fn flush_batches<B: CalendarBackend>(
    backend: &B,
    calendar_id: &str,
    ops: &[BatchOp],
) -> Result<usize> {
    let mut failed = 0;
    for chunk in ops.chunks(MAX_BATCH_SIZE) {
        println!("Submitting batch of {} operations", chunk.len());
        let outcome = backend
            .execute_batch(calendar_id, chunk)
            .await
            .context("Batch submission failed")?;
        if outcome.failed > 0 {
            eprintln!(
                "WARNING: {} of {} operations in batch failed",
                outcome.failed,
                chunk.len()
            );
        }
        failed += outcome.failed;
    }
    Ok(failed)
}

/// Run one reconciliation pass for a feed.
pub async fn sync_feed<B, L>(
    backend: &B,
    locations: &L,
    calendars: &[Calendar],
    feed: &OrgFeed,
    tz: Tz,
    owner: &str,
) -> Result<SyncStats>
where
    B: CalendarBackend,
    L: LocationSource,
{
    let mut stats = SyncStats {
        total: feed.entries.len(),
        ..Default::default()
    };

    let calendar = resolve_calendar(backend, calendars, &feed.summary, tz, owner).await?;

    let schedules = feed.entries.iter().filter_map(|e| e.schedule.as_ref());
    let window = TimeWindow::from_schedules(schedules, tz);

    println!(
        "Retrieving events in calendar \"{}\" from {} to {}",
        calendar.summary,
        window.start_rfc3339(),
        window.end_rfc3339()
    );
    let existing = key_by_feed_id(
        backend
            .list_events(&calendar.id, Some(&window))
            .await
            .context("Failed to list existing events")?,
    );
    stats.existing = existing.len();
    println!("Found {} existing tagged events", stats.existing);

    let mut ops: Vec<BatchOp> = Vec::new();

    for entry in &feed.entries {
        let Some(schedule) = &entry.schedule else {
            println!(
                "Skipping entry without a date clause: \"{}\" (published {})",
                entry.title,
                entry
                    .published
                    .map(|p| p.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string())
            );
            stats.invalid += 1;
            continue;
        };

        let location = locations.lookup(&entry.link).await;
        let body = build_event_body(entry, schedule, location);

        match existing.get(&entry.id) {
            None => {
                println!(
                    "Creating new event: {} (all-day: {})",
                    schedule.short_title, schedule.all_day
                );
                ops.push(BatchOp::Insert(body));
                stats.created += 1;
            }
            Some(stored) => {
                if event_differs(&body, stored) {
                    println!("Event has changed, updating: {}", schedule.short_title);
                    ops.push(BatchOp::Update {
                        event_id: stored.id.clone(),
                        body,
                    });
                    stats.updated += 1;
                } else {
                    stats.unchanged += 1;
                }
            }
        }
    }

    stats.failed = flush_batches(backend, &calendar.id, &ops).await?;

    // Undercounts are expected when entries were invalid; anything else is
    // worth a look but never fatal.
    if stats.created + stats.existing != stats.total {
        eprintln!(
            "WARNING: Mismatched event counts: {} feed entries, {} existing events, \
             {} created ({} invalid)",
            stats.total, stats.existing, stats.created, stats.invalid
        );
    }

    Ok(stats)
}

/// Destructive path: delete every tagged event from the feed's calendar.
/// No diffing, no window; untagged events are left alone.
pub async fn clean_feed<B: CalendarBackend>(
    backend: &B,
    calendars: &[Calendar],
    feed_summary: &str,
) -> Result<usize> {
    let Some(calendar) = calendars.iter().find(|c| c.summary == feed_summary) else {
        println!("No calendar matches \"{}\", nothing to clean", feed_summary);
        return Ok(0);
    };

    let events = backend
        .list_events(&calendar.id, None)
        .await
        .context("Failed to list events")?;

    let ops: Vec<BatchOp> = events
        .iter()
        .filter(|e| e.feed_id().is_some())
        .map(|e| BatchOp::Delete {
            event_id: e.id.clone(),
        })
        .collect();

    println!("Deleting {} events from \"{}\"", ops.len(), calendar.summary);
    let failed = flush_batches(backend, &calendar.id, &ops).await?;
    if failed > 0 {
        eprintln!(
            "WARNING: {} of {} deletes failed in \"{}\"",
            failed,
            ops.len(),
            calendar.summary
        );
    }

    Ok(ops.len() - failed)
}
