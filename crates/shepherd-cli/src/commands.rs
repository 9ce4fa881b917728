//! Command handlers.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use shepherd_core::api::{collections, GmailClient, PaymentIntent, PaymentIntentRequest, PaymentsClient};
use shepherd_core::auth::{CredentialStore, SessionData};
use shepherd_core::broadcast::{
    Broadcast, BroadcastReport, DirectMessageSender, EmailSender, MessageSender, OutgoingMessage,
    RecipientSelection,
};
use shepherd_core::config::ENV_ACCESS_TOKEN;
use shepherd_core::models::{self, Assignment, AssignmentStrategy, Checkout, Member, PipelineBoard, PipelineStage};
use shepherd_core::utils::{format_cents, format_date, format_phone, non_blank, truncate};

use crate::app::App;
use crate::progress::{self, ProgressView};
use crate::{BroadcastArgs, ChannelArg, StrategyArg};

/// Concurrent writes when applying district assignments
const MAX_CONCURRENT_WRITES: usize = 5;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn prompt_line(label: &str) -> Result<String> {
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

// ===== Session =====

pub async fn login(app: &mut App, email: Option<String>, remember: bool) -> Result<()> {
    let email = match email.or_else(|| app.config.last_user.clone()) {
        Some(e) => e,
        None => prompt_line("Email: ")?,
    };
    if email.is_empty() {
        anyhow::bail!("An account email is required");
    }

    let token = match std::env::var(ENV_ACCESS_TOKEN).ok().filter(|t| !t.trim().is_empty()) {
        Some(t) => t,
        None if CredentialStore::has_token(&email) => {
            debug!("Using remembered access token");
            CredentialStore::get_token(&email)?
        }
        None => rpassword::prompt_password("Access token: ").context("Failed to read access token")?,
    };

    // Verify the token and find who it belongs to
    let api = app.api_with_token(&token)?;
    let members = api.fetch_members().await.context("Sign-in failed")?;
    let me = members
        .iter()
        .find(|m| m.email_address().map(|e| e.eq_ignore_ascii_case(&email)).unwrap_or(false));

    let mut data = SessionData::new(
        token.clone(),
        me.and_then(Member::account_uid).unwrap_or(email.as_str()),
        email.clone(),
    );
    data.display_name = me.map(Member::full_name);

    app.session.update(data);
    app.session.save()?;
    if let Err(e) = app.cache.save_members(&members) {
        warn!(error = %e, "Failed to cache members after sign-in");
    }

    if remember {
        CredentialStore::store(&email, &token)?;
    }
    app.config.last_user = Some(email.clone());
    app.config.save()?;

    info!(email = %email, "Signed in");
    println!("Signed in as {} ({} members)", email, members.len());
    Ok(())
}

pub fn logout(app: &mut App) -> Result<()> {
    let email = app.session.data.as_ref().map(|d| d.email.clone()).or_else(|| app.config.last_user.clone());
    app.session.clear()?;
    if let Some(ref email) = email {
        if let Err(e) = CredentialStore::delete(email) {
            warn!(error = %e, "Could not remove remembered token");
        }
    }
    println!("Signed out");
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport<'a> {
    project: Option<&'a str>,
    signed_in_as: Option<&'a str>,
    session_expires: Option<String>,
    needs_refresh: bool,
    cache_encrypted: bool,
    cache: Vec<(&'static str, String)>,
}

pub fn status(app: &App, json: bool) -> Result<()> {
    let session = app.session.data.as_ref().filter(|d| !d.is_expired());
    let ages = app.cache.get_cache_ages();
    let report = StatusReport {
        project: app.config.project_id.as_deref(),
        signed_in_as: session.map(|d| d.email.as_str()),
        session_expires: session.map(|d| d.expires_at().with_timezone(&Local).format("%H:%M").to_string()),
        needs_refresh: session.map(|d| d.needs_refresh()).unwrap_or(false),
        cache_encrypted: app.cache.is_encrypted(),
        cache: ages
            .rows()
            .iter()
            .map(|&(name, age)| (name, age.clone().unwrap_or_else(|| "never".to_string())))
            .collect(),
    };

    if json {
        return print_json(&report);
    }

    println!("Project:   {}", report.project.unwrap_or("(not configured)"));
    match session {
        Some(d) => {
            println!(
                "Signed in: {} (expires {}, {}m left)",
                d.sender_name(),
                report.session_expires.as_deref().unwrap_or("?"),
                d.minutes_until_expiry()
            );
            if report.needs_refresh {
                println!("           Token expires soon; run `shepherd login` again");
            }
        }
        None => println!("Signed in: no"),
    }
    println!("Cache:     {}", if report.cache_encrypted { "encrypted" } else { "plain" });
    for (name, age) in &report.cache {
        println!("  {:<11} {}", name, age);
    }
    Ok(())
}

pub async fn sync(app: &App) -> Result<()> {
    let outcomes = app.sync_all().await?;
    let mut failed = 0;
    for outcome in &outcomes {
        match outcome.result {
            Ok(count) => println!("{:<11} {} records", outcome.collection, count),
            Err(ref e) => {
                failed += 1;
                println!("{:<11} failed: {:#}", outcome.collection, e);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} collections failed to refresh", failed, outcomes.len());
    }
    Ok(())
}

// ===== Members =====

pub async fn members(
    app: &App,
    district: Option<String>,
    ministry: Option<String>,
    search: Option<String>,
    json: bool,
) -> Result<()> {
    let all = app.members().await?;
    let ministry_record = match ministry {
        Some(ref id) => Some(
            app.ministries()
                .await?
                .into_iter()
                .find(|m| &m.id == id)
                .with_context(|| format!("Unknown ministry: {}", id))?,
        ),
        None => None,
    };

    let selected: Vec<&Member> = all
        .iter()
        .filter(|m| district.as_deref().map(|d| m.district_id.as_deref() == Some(d)).unwrap_or(true))
        .filter(|m| ministry_record.as_ref().map(|min| min.includes(m)).unwrap_or(true))
        .filter(|m| search.as_deref().map(|q| m.matches(q)).unwrap_or(true))
        .collect();

    if json {
        return print_json(&selected);
    }

    for m in &selected {
        println!(
            "{:<28} {:<32} {:<16} {}",
            truncate(&m.sort_name(), 28),
            truncate(m.email_address().unwrap_or("-"), 32),
            m.phone.as_deref().map(format_phone).unwrap_or_else(|| "-".to_string()),
            m.district_id.as_deref().unwrap_or("-"),
        );
    }
    println!("{} of {} members", selected.len(), all.len());
    Ok(())
}

// ===== Broadcast =====

fn selection(args: &BroadcastArgs) -> RecipientSelection {
    if args.all {
        RecipientSelection::All
    } else if let Some(ref id) = args.district {
        RecipientSelection::District(id.clone())
    } else if let Some(ref id) = args.ministry {
        RecipientSelection::Ministry(id.clone())
    } else {
        RecipientSelection::Members(args.member.clone())
    }
}

fn build_sender(app: &App, channel: ChannelArg) -> Result<Arc<dyn MessageSender>> {
    let session = app.session.data.as_ref().context("Not signed in; run `shepherd login`")?;
    let api = app.api()?;
    Ok(match channel {
        ChannelArg::Email => {
            let gmail = GmailClient::with_client(api.http().clone(), app.access_token()?);
            let mut sender = EmailSender::new(gmail, format!("A message from {}", app.config.org_name()));
            if let Some(address) = non_blank(app.config.email_from_address.as_deref()) {
                let name = app.config.email_from_name.as_deref().unwrap_or(app.config.org_name());
                sender = sender.with_from(name, address);
            }
            Arc::new(sender)
        }
        ChannelArg::Dm => Arc::new(DirectMessageSender::new(api.clone(), session.uid.clone(), session.sender_name())),
    })
}

pub async fn broadcast(app: &App, args: BroadcastArgs, json: bool) -> Result<()> {
    let sender = build_sender(app, args.channel)?;

    let members = app.members().await?;
    let ministries = match args.ministry {
        Some(_) => app.ministries().await?,
        None => Vec::new(),
    };
    let recipients = selection(&args).resolve(&members, &ministries);
    if recipients.is_empty() {
        anyhow::bail!("No members match the selection");
    }

    let mut options = app.config.broadcast_options();
    if let Some(size) = args.batch_size {
        options.batch_size = size;
    }
    if let Some(ms) = args.delay_ms {
        options.batch_delay = Duration::from_millis(ms);
    }

    let message = OutgoingMessage::new(args.subject.clone(), args.body.clone());
    let handle = Broadcast::new(recipients, message, options)?.spawn(sender);

    let view = if args.minimized { ProgressView::Minimized } else { ProgressView::Full };
    if !json {
        progress::follow(handle.subscribe(), view).await?;
    }
    let report = handle.wait().await?;

    if json {
        return print_json(&report);
    }
    print_report(&report);
    if !report.is_complete_success() {
        anyhow::bail!("{} deliveries failed", report.failed);
    }
    Ok(())
}

fn print_report(report: &BroadcastReport) {
    println!("Sent {} of {}", report.sent, report.total);
    if report.skipped > 0 {
        println!("Skipped {} without an address on this channel", report.skipped);
    }
    for failure in &report.failures {
        println!("  failed: {} ({})", failure.recipient, failure.error);
    }
}

// ===== Visitors =====

pub async fn visitors(app: &App, json: bool) -> Result<()> {
    let visitors = app.visitors().await?;
    let board = PipelineBoard::from_visitors(&visitors);

    if json {
        let columns: Vec<_> = board
            .columns
            .iter()
            .map(|(stage, list)| serde_json::json!({ "stage": stage, "visitors": list }))
            .collect();
        return print_json(&columns);
    }

    for (stage, column) in &board.columns {
        println!("{} ({})", stage.label(), column.len());
        for v in column {
            println!(
                "  {:<10} {:<28} {}",
                truncate(&v.id, 10),
                truncate(&v.full_name(), 28),
                v.visit_date.as_deref().map(format_date).unwrap_or_default()
            );
        }
    }
    println!("{} visitors in active follow-up", board.active_count());
    Ok(())
}

pub async fn move_visitor(app: &App, id: &str, stage: &str) -> Result<()> {
    let target = PipelineStage::parse(stage)?;
    let mut visitors = app.visitors().await?;
    let visitor = visitors
        .iter_mut()
        .find(|v| v.id == id)
        .with_context(|| format!("Unknown visitor: {}", id))?;

    let Some(patch) = models::move_visitor(visitor, target, Utc::now()) else {
        println!("{} is already in {}", visitor.full_name(), target.label());
        return Ok(());
    };

    app.api()?
        .patch_document(collections::VISITORS, id, &patch, models::STAGE_PATCH_TIMESTAMPS)
        .await?;
    println!("Moved {} from {} to {}", visitor.full_name(), visitor.stage.label(), target.label());

    visitor.stage = target;
    if let Err(e) = app.cache.save_visitors(&visitors) {
        warn!(error = %e, "Failed to update visitor cache");
    }
    Ok(())
}

// ===== Districts =====

pub async fn assign_districts(app: &App, strategy: StrategyArg, apply: bool, json: bool) -> Result<()> {
    let members = app.members().await?;
    let districts = app.districts().await?;
    let strategy = match strategy {
        StrategyArg::Postal => AssignmentStrategy::PostalCode,
        StrategyArg::Alpha => AssignmentStrategy::Alphabetical,
        StrategyArg::Affinity => AssignmentStrategy::Affinity,
    };
    let assignments = models::assign_districts(&members, &districts, &strategy);

    if json && !apply {
        return print_json(&assignments);
    }

    if !json {
        let district_name = |id: &str| {
            districts
                .iter()
                .find(|d| d.id == id)
                .map(|d| d.name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        for a in &assignments {
            println!(
                "{:<28} {} -> {}",
                truncate(&a.member_name, 28),
                a.from.as_deref().map(district_name).unwrap_or_else(|| "(none)".to_string()),
                district_name(&a.to)
            );
        }
        println!("{} members to reassign", assignments.len());
    }
    if !apply {
        return Ok(());
    }

    let mut failed = 0;
    if !assignments.is_empty() {
        let api = app.api()?;
        for chunk in assignments.chunks(MAX_CONCURRENT_WRITES) {
            let writes = chunk.iter().map(|a| async move {
                (a, api.set_member_district(&a.member_id, &a.to).await)
            });
            for (a, result) in futures::future::join_all(writes).await {
                if let Err(e) = result {
                    failed += 1;
                    warn!(member = %a.member_id, error = %e, "Failed to assign district");
                }
            }
        }

        // Local copy is out of date now
        if let Ok(fresh) = api.fetch_members().await {
            if let Err(e) = app.cache.save_members(&fresh) {
                warn!(error = %e, "Failed to refresh member cache");
            }
        }
    }

    let report = AssignmentReport::new(&assignments, failed);
    if json {
        print_json(&report)?;
    } else if !assignments.is_empty() {
        println!("Applied {} of {}", report.applied, assignments.len());
    }
    if failed > 0 {
        anyhow::bail!("{} assignments failed", failed);
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentReport<'a> {
    assignments: &'a [Assignment],
    applied: usize,
    failed: usize,
}

impl<'a> AssignmentReport<'a> {
    fn new(assignments: &'a [Assignment], failed: usize) -> Self {
        Self { assignments, applied: assignments.len() - failed, failed }
    }
}

// ===== Events =====

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutResult {
    registration_id: String,
    total_cents: i64,
    client_secret: Option<String>,
    payment_intent_id: Option<String>,
}

pub async fn checkout(
    app: &App,
    event_id: &str,
    quantity: u32,
    tip_cents: i64,
    email: Option<String>,
    json: bool,
) -> Result<()> {
    let api = app.api()?;
    let event = api.fetch_event(event_id).await?;
    let checkout = Checkout::build(&event, quantity, tip_cents)?;

    let session = app.session.data.as_ref().context("Not signed in; run `shepherd login`")?;
    let email = email.unwrap_or_else(|| session.email.clone());

    if !json {
        println!("{} ({}, {})", event.title, event.formatted_date(), event.price_display());
        for item in &checkout.line_items {
            println!(
                "  {:<32} {} x {:>3} = {}",
                truncate(&item.label, 32),
                format_cents(item.unit_amount_cents),
                item.quantity,
                format_cents(item.amount_cents)
            );
        }
        println!("  Total: {}", format_cents(checkout.total_cents()));
    }

    let mut registration = checkout.to_registration(session.sender_name(), Some(email.as_str()), None);
    let intent = if checkout.requires_payment() {
        let functions_url = non_blank(app.config.functions_url.as_deref())
            .context("Paid registration needs functions_url (or SHEPHERD_FUNCTIONS_URL)")?;
        let payments = PaymentsClient::new(api.http().clone(), functions_url).with_token(app.access_token()?);
        let intent = payments
            .create_payment_intent(&PaymentIntentRequest::from_checkout(&checkout, Some(email.as_str())))
            .await?;
        registration.payment_intent_id = Some(intent.payment_intent_id.clone());
        Some(intent)
    } else {
        None
    };

    let registration_id = api
        .create_registration(&registration)
        .await
        .with_context(|| registration_failure(intent.as_ref()))?;
    let result = CheckoutResult {
        registration_id,
        total_cents: checkout.total_cents(),
        client_secret: intent.as_ref().map(|i| i.client_secret.clone()),
        payment_intent_id: intent.map(|i| i.payment_intent_id),
    };

    if json {
        return print_json(&result);
    }
    println!("Registration {} created", result.registration_id);
    match result.payment_intent_id {
        Some(ref id) => println!("Payment intent {} awaiting confirmation", id),
        None => println!("No payment needed"),
    }
    Ok(())
}

/// Error context for a failed registration write. A payment intent created
/// beforehand is named so it can be reconciled or cancelled.
fn registration_failure(intent: Option<&PaymentIntent>) -> String {
    match intent {
        Some(intent) => format!(
            "Failed to save registration; payment intent {} was already created",
            intent.payment_intent_id
        ),
        None => "Failed to save registration".to_string(),
    }
}

// ===== Address =====

pub async fn address(app: &App, query: &str, json: bool) -> Result<()> {
    let key = non_blank(app.config.maps_api_key.as_deref())
        .context("Address lookup needs maps_api_key (or SHEPHERD_MAPS_API_KEY)")?;
    let places = app.places(key);

    let predictions = places.autocomplete(query).await?;
    let Some(top) = predictions.first() else {
        println!("No matches");
        return Ok(());
    };
    let address = places.place_address(&top.place_id).await?;

    let district = match address.zip5() {
        Some(zip) => match app.districts().await {
            Ok(districts) => districts.into_iter().find(|d| d.covers_postal_code(&zip)),
            Err(e) => {
                warn!(error = %e, "Could not load districts for suggestion");
                None
            }
        },
        None => None,
    };

    if json {
        return print_json(&serde_json::json!({
            "predictions": predictions,
            "address": address,
            "suggestedDistrict": district.as_ref().map(|d| &d.id),
        }));
    }

    for p in predictions.iter().skip(1) {
        println!("  also: {}", p.description);
    }
    println!("{}", address.one_line());
    match district {
        Some(d) => println!("Suggested district: {} ({})", d.name, d.id),
        None => println!("No district covers this address"),
    }
    Ok(())
}
