use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use clap::{Parser, Subcommand};

use outreach_engine::campaign::CampaignAction;
use outreach_engine::config::{self, OutreachConfig};
use outreach_engine::coordinator::{self, CoordinatorHandle, CoordinatorSettings};
use outreach_engine::dispatcher::{self, DispatchSettings, HaltReason};
use outreach_engine::gateway::{CommandChannelGateway, TestChannelGateway};
use outreach_engine::lock::{self, StateLock};
use outreach_engine::log::{init_tracing, parse_log_level};
use outreach_engine::pacer::Pacer;
use outreach_engine::preview;
use outreach_engine::store;
use outreach_engine::types::{
    parse_activity_type, parse_channel, parse_pipeline_stage, CampaignStatus, DispatchTarget,
    LeadUpdate, OutreachStatus,
};
use outreach_engine::{log_debug, log_info, log_warn};

#[derive(Parser)]
#[command(name = "outreach", about = "Lead outreach pipeline and campaign dispatch")]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to config file (defaults to {root}/outreach.toml).
    /// The state path resolves from the config file's parent directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log verbosity level (error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create outreach.toml and an empty state file
    Init,
    /// Show leads, pools and campaigns
    Status,
    /// Manage leads
    #[command(subcommand)]
    Lead(LeadCommand),
    /// Record or list ledger activities
    #[command(subcommand)]
    Activity(ActivityCommand),
    /// Manage lead pools
    #[command(subcommand)]
    Pool(PoolCommand),
    /// Manage campaigns
    #[command(subcommand)]
    Campaign(CampaignCommand),
    /// Run a dispatch batch against a pool's campaign
    Dispatch {
        #[arg(long)]
        pool: String,
        /// email, sms, or phone
        #[arg(long)]
        channel: String,
        /// Leads to target, in order (defaults to every active pool member)
        #[arg(long = "lead", action = clap::ArgAction::Append)]
        leads: Vec<String>,
        /// Message content handed to the gateway
        #[arg(long)]
        payload: Option<String>,
    },
    /// Gate a lead and send to the configured test destination only
    Preview {
        #[arg(long)]
        lead: String,
        #[arg(long)]
        channel: String,
        #[arg(long)]
        payload: Option<String>,
    },
}

#[derive(Subcommand)]
enum LeadCommand {
    Add {
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
    },
    Show {
        lead_id: String,
    },
    Update {
        lead_id: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Move the pipeline stage forward
        #[arg(long)]
        stage: Option<String>,
        /// Outreach event: pending, sent, opened, link-clicked, booked
        #[arg(long)]
        event: Option<String>,
    },
    Close {
        lead_id: String,
        #[arg(long)]
        reason: String,
    },
    Reset {
        lead_id: String,
    },
}

#[derive(Subcommand)]
enum ActivityCommand {
    Add {
        lead_id: String,
        #[arg(long = "type")]
        activity_type: String,
        /// Metadata entries as key=value
        #[arg(long = "meta", action = clap::ArgAction::Append)]
        meta: Vec<String>,
    },
    List {
        lead_id: String,
        #[arg(long = "type")]
        activity_type: Option<String>,
    },
}

#[derive(Subcommand)]
enum PoolCommand {
    Create {
        name: String,
        /// Ideal-customer-profile as a JSON document
        #[arg(long)]
        icp: Option<String>,
    },
    /// Move a lead into a pool
    Assign {
        pool_id: String,
        lead_id: String,
    },
    /// Assign a campaign to a pool
    Attach {
        pool_id: String,
        campaign_id: String,
    },
    /// Remove a pool's campaign
    Detach {
        pool_id: String,
    },
    /// Reset leads of a pool (defaults to every active member)
    Reset {
        pool_id: String,
        #[arg(long = "lead", action = clap::ArgAction::Append)]
        leads: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CampaignCommand {
    Create {
        name: String,
        /// Enabled channel (repeatable)
        #[arg(long = "channel", action = clap::ArgAction::Append, required = true)]
        channels: Vec<String>,
    },
    Submit { campaign_id: String },
    Approve { campaign_id: String },
    Reject {
        campaign_id: String,
        #[arg(long)]
        reason: String,
    },
    Pause { campaign_id: String },
    Resume { campaign_id: String },
    Complete { campaign_id: String },
    Archive { campaign_id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match parse_log_level(&cli.log_level) {
        Ok(level) => init_tracing(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let paths = ProjectPaths::resolve(&cli.root, cli.config.as_deref());

    let result = match cli.command {
        Commands::Init => handle_init(&paths),
        Commands::Status => handle_status(&paths).await,
        Commands::Lead(cmd) => handle_lead(&paths, cmd).await,
        Commands::Activity(cmd) => handle_activity(&paths, cmd).await,
        Commands::Pool(cmd) => handle_pool(&paths, cmd).await,
        Commands::Campaign(cmd) => handle_campaign(&paths, cmd).await,
        Commands::Dispatch {
            pool,
            channel,
            leads,
            payload,
        } => handle_dispatch(&paths, &pool, &channel, leads, payload).await,
        Commands::Preview {
            lead,
            channel,
            payload,
        } => handle_preview(&paths, &lead, &channel, payload).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

// --- Shutdown signal ---

fn shutdown_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

fn install_signal_handlers() -> Result<(), String> {
    let flag = Arc::clone(shutdown_flag());
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .map_err(|e| format!("Failed to register SIGTERM handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag)
        .map_err(|e| format!("Failed to register SIGINT handler: {}", e))?;
    Ok(())
}

// --- Session setup ---

struct ProjectPaths {
    config_file: PathBuf,
    config_base: PathBuf,
}

impl ProjectPaths {
    fn resolve(root: &Path, config: Option<&Path>) -> Self {
        match config {
            Some(p) => Self {
                config_file: p.to_path_buf(),
                config_base: p
                    .parent()
                    .filter(|d| !d.as_os_str().is_empty())
                    .unwrap_or(Path::new("."))
                    .to_path_buf(),
            },
            None => Self {
                config_file: root.join(config::CONFIG_FILE_NAME),
                config_base: root.to_path_buf(),
            },
        }
    }

    fn state_path(&self, config: &OutreachConfig) -> PathBuf {
        self.config_base.join(&config.project.state_path)
    }
}

/// A locked, loaded state with its coordinator running.
struct Session {
    config: OutreachConfig,
    coordinator: CoordinatorHandle,
    task: tokio::task::JoinHandle<()>,
    lock: StateLock,
}

impl Session {
    fn open(paths: &ProjectPaths) -> Result<Self, String> {
        let config = config::load_config_from(&paths.config_file)?;
        let state_path = paths.state_path(&config);
        let lock = lock::acquire(&state_path)?;
        log_debug!("Locked {}", lock.path().display());
        let state = store::load(&state_path)?;
        let (coordinator, task) = coordinator::spawn_coordinator(
            state,
            state_path,
            CoordinatorSettings::from_config(&config),
        );

        Ok(Self {
            config,
            coordinator,
            task,
            lock,
        })
    }

    /// Stop the coordinator, wait for its final save, then release the lock.
    async fn close(self) -> Result<(), String> {
        let Session {
            coordinator,
            task,
            lock,
            ..
        } = self;
        drop(coordinator);
        let joined = task.await;
        drop(lock);
        joined.map_err(|e| format!("Coordinator task failed: {}", e))
    }
}

// --- Handlers ---

fn handle_init(paths: &ProjectPaths) -> Result<(), String> {
    let mut created = Vec::new();

    if !paths.config_file.exists() {
        if let Some(parent) = paths.config_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
        fs::write(&paths.config_file, DEFAULT_CONFIG).map_err(|e| {
            format!("Failed to write {}: {}", paths.config_file.display(), e)
        })?;
        created.push(paths.config_file.display().to_string());
    }

    let config = config::load_config_from(&paths.config_file)?;
    let state_path = paths.state_path(&config);
    if !state_path.exists() {
        let state = store::load(&state_path)?;
        store::save(&state_path, &state)?;
        created.push(state_path.display().to_string());
    }

    if created.is_empty() {
        println!("Already initialized");
    } else {
        for path in created {
            println!("Created: {}", path);
        }
    }
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"[project]
state_path = "outreach-state.json"
lead_prefix = "LEAD"
campaign_prefix = "CMP"
pool_prefix = "POOL"

[dispatch]
pacing_ms = 1200
result_log_capacity = 100
gate_check_retries = 2
gate_retry_backoff_ms = 250

[campaigns]
requires_approval = false

[gateway]
# Each command receives a JSON request on stdin and must print
# {"reference": "..."} on success or {"error": "..."} on rejection.
# email_command = ["./bin/send-email"]
# sms_command = ["./bin/send-sms"]
# call_command = ["./bin/start-call"]
timeout_seconds = 30

[preview]
# test_email = "qa@example.com"
# test_phone = "+15550000000"
"#;

async fn handle_status(paths: &ProjectPaths) -> Result<(), String> {
    let session = Session::open(paths)?;
    let state = session.coordinator.get_snapshot().await?;

    println!("Leads: {}", state.leads.len());
    for status in [
        OutreachStatus::Idle,
        OutreachStatus::Pending,
        OutreachStatus::Sent,
        OutreachStatus::Opened,
        OutreachStatus::MeetingLinkClicked,
        OutreachStatus::MeetingBooked,
        OutreachStatus::Closed,
    ] {
        let count = state
            .leads
            .values()
            .filter(|l| l.outreach_status == status)
            .count();
        if count > 0 {
            println!("  {:<22} {}", status, count);
        }
    }

    println!("Pools: {}", state.pools.pools().count());
    for pool in state.pools.pools() {
        println!(
            "  {} {} ({} members, campaign {})",
            pool.id,
            pool.name,
            pool.members.len(),
            pool.campaign_id.as_deref().unwrap_or("-")
        );
    }

    println!("Campaigns: {}", state.campaigns.len());
    for campaign in state.campaigns.values() {
        let c = &campaign.counters;
        println!(
            "  {} {} [{}] emails {}/{} opened, sms {}, calls {}, meetings {}",
            campaign.id,
            campaign.name,
            campaign.status,
            c.emails_sent,
            c.emails_opened,
            c.sms_sent,
            c.calls_initiated,
            c.meetings_booked
        );
    }
    println!("Activities: {}", state.activities.len());

    session.close().await
}

async fn handle_lead(paths: &ProjectPaths, cmd: LeadCommand) -> Result<(), String> {
    let session = Session::open(paths)?;
    let coordinator = &session.coordinator;

    match cmd {
        LeadCommand::Add { name, email, phone } => {
            let lead = coordinator.add_lead(&name, email, phone).await?;
            println!("Added {}: {}", lead.id, lead.name);
        }
        LeadCommand::Show { lead_id } => {
            let lead = coordinator.get_lead(&lead_id).await?;
            println!("{} {}", lead.id, lead.name);
            println!("  email:    {}", lead.email.as_deref().unwrap_or("-"));
            println!("  phone:    {}", lead.phone.as_deref().unwrap_or("-"));
            println!("  stage:    {}", lead.stage);
            println!("  status:   {} ({}%)", lead.outreach_status, lead.progress());
            println!("  pool:     {}", lead.pool_id.as_deref().unwrap_or("-"));
            if !lead.notes.is_empty() {
                println!("  notes:    {}", lead.notes);
            }
            println!("  version:  {}", lead.version);
        }
        LeadCommand::Update {
            lead_id,
            email,
            phone,
            notes,
            stage,
            event,
        } => {
            let mut updates = Vec::new();
            if let Some(email) = email {
                updates.push(LeadUpdate::SetEmail(Some(email)));
            }
            if let Some(phone) = phone {
                updates.push(LeadUpdate::SetPhone(Some(phone)));
            }
            if let Some(notes) = notes {
                updates.push(LeadUpdate::SetNotes(notes));
            }
            if let Some(stage) = stage {
                updates.push(LeadUpdate::AdvanceStage(parse_pipeline_stage(&stage)?));
            }
            if let Some(event) = event {
                updates.push(parse_event(&event)?);
            }
            if updates.is_empty() {
                return Err("Nothing to update".to_string());
            }
            for update in updates {
                coordinator.update_lead(&lead_id, update, None).await?;
            }
            let lead = coordinator.get_lead(&lead_id).await?;
            println!(
                "{}: stage={} status={}",
                lead.id, lead.stage, lead.outreach_status
            );
        }
        LeadCommand::Close { lead_id, reason } => {
            coordinator
                .update_lead(&lead_id, LeadUpdate::Close(reason), None)
                .await?;
            println!("{} closed", lead_id);
        }
        LeadCommand::Reset { lead_id } => {
            coordinator
                .update_lead(&lead_id, LeadUpdate::Reset, None)
                .await?;
            println!("{} reset", lead_id);
        }
    }

    session.close().await
}

fn parse_event(s: &str) -> Result<LeadUpdate, String> {
    match s.to_lowercase().replace('_', "-").as_str() {
        "pending" => Ok(LeadUpdate::MarkPending),
        "sent" => Ok(LeadUpdate::RecordSend),
        "opened" => Ok(LeadUpdate::RecordOpen),
        "link-clicked" => Ok(LeadUpdate::RecordMeetingLinkClicked),
        "booked" => Ok(LeadUpdate::RecordMeetingBooked),
        _ => Err(format!(
            "Invalid event '{}': expected pending, sent, opened, link-clicked, or booked",
            s
        )),
    }
}

async fn handle_activity(paths: &ProjectPaths, cmd: ActivityCommand) -> Result<(), String> {
    let session = Session::open(paths)?;
    let coordinator = &session.coordinator;

    match cmd {
        ActivityCommand::Add {
            lead_id,
            activity_type,
            meta,
        } => {
            let activity_type = parse_activity_type(&activity_type)?;
            let mut metadata = serde_json::Map::new();
            for entry in meta {
                let (key, value) = entry
                    .split_once('=')
                    .ok_or_else(|| format!("Invalid metadata '{}': expected key=value", entry))?;
                metadata.insert(key.trim().to_string(), value.trim().into());
            }
            coordinator
                .append_activity(&lead_id, activity_type.clone(), metadata)
                .await?;
            println!("Recorded {} for {}", activity_type, lead_id);
        }
        ActivityCommand::List {
            lead_id,
            activity_type,
        } => {
            let filter = activity_type.as_deref().map(parse_activity_type).transpose()?;
            let activities = coordinator.query_activities(&lead_id, filter).await?;
            for activity in activities {
                let meta = serde_json::Value::Object(activity.metadata);
                println!(
                    "{} {:<24} {}",
                    activity.created_at.format("%Y-%m-%d %H:%M:%S"),
                    activity.activity_type.to_string(),
                    meta
                );
            }
        }
    }

    session.close().await
}

async fn handle_pool(paths: &ProjectPaths, cmd: PoolCommand) -> Result<(), String> {
    let session = Session::open(paths)?;
    let coordinator = &session.coordinator;

    match cmd {
        PoolCommand::Create { name, icp } => {
            let icp = match icp {
                Some(raw) => serde_json::from_str(&raw)
                    .map_err(|e| format!("Invalid --icp JSON: {}", e))?,
                None => serde_json::Value::Null,
            };
            let pool = coordinator.create_pool(&name, icp).await?;
            println!("Created {}: {}", pool.id, pool.name);
        }
        PoolCommand::Assign { pool_id, lead_id } => {
            coordinator.assign_lead(&pool_id, &lead_id).await?;
            println!("{} -> {}", lead_id, pool_id);
        }
        PoolCommand::Attach {
            pool_id,
            campaign_id,
        } => {
            coordinator.assign_campaign(&pool_id, &campaign_id).await?;
            println!("{} now runs {}", pool_id, campaign_id);
        }
        PoolCommand::Detach { pool_id } => {
            coordinator.clear_campaign(&pool_id).await?;
            println!("{} has no campaign", pool_id);
        }
        PoolCommand::Reset { pool_id, leads } => {
            let leads = if leads.is_empty() {
                let pool = coordinator.get_pool(&pool_id).await?;
                pool.members.into_iter().collect()
            } else {
                leads
            };
            let outcomes = coordinator.reset_pool(&pool_id, leads).await?;
            let mut failures = 0;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(()) => println!("  {} reset", outcome.lead_id),
                    Err(e) => {
                        failures += 1;
                        println!("  {} skipped: {}", outcome.lead_id, e);
                    }
                }
            }
            println!(
                "Reset {}/{} lead(s) in {}",
                outcomes.len() - failures,
                outcomes.len(),
                pool_id
            );
        }
    }

    session.close().await
}

async fn handle_campaign(paths: &ProjectPaths, cmd: CampaignCommand) -> Result<(), String> {
    let session = Session::open(paths)?;
    let coordinator = &session.coordinator;

    let (campaign_id, action) = match cmd {
        CampaignCommand::Create { name, channels } => {
            let channels = channels
                .iter()
                .map(|c| parse_channel(c))
                .collect::<Result<BTreeSet<_>, _>>()?;
            let campaign = coordinator.create_campaign(&name, channels).await?;
            println!(
                "Created {}: {} [{}]{}",
                campaign.id,
                campaign.name,
                campaign.status,
                if campaign.requires_approval {
                    " (requires approval)"
                } else {
                    ""
                }
            );
            return session.close().await;
        }
        CampaignCommand::Submit { campaign_id } => (campaign_id, CampaignAction::Submit),
        CampaignCommand::Approve { campaign_id } => (campaign_id, CampaignAction::Approve),
        CampaignCommand::Reject {
            campaign_id,
            reason,
        } => (campaign_id, CampaignAction::Reject(reason)),
        CampaignCommand::Pause { campaign_id } => (campaign_id, CampaignAction::Pause),
        CampaignCommand::Resume { campaign_id } => (campaign_id, CampaignAction::Resume),
        CampaignCommand::Complete { campaign_id } => (campaign_id, CampaignAction::Complete),
        CampaignCommand::Archive { campaign_id } => (campaign_id, CampaignAction::Archive),
    };

    let campaign = coordinator
        .apply_campaign_action(&campaign_id, action)
        .await?;
    println!("{} is now {}", campaign.id, campaign.status);
    if campaign.status == CampaignStatus::PendingApproval {
        println!("  awaiting approval before it can dispatch");
    }

    session.close().await
}

async fn handle_dispatch(
    paths: &ProjectPaths,
    pool_id: &str,
    channel: &str,
    leads: Vec<String>,
    payload: Option<String>,
) -> Result<(), String> {
    install_signal_handlers()?;

    let channel = parse_channel(channel)?;
    let session = Session::open(paths)?;
    let coordinator = session.coordinator.clone();

    let leads = if leads.is_empty() {
        coordinator
            .get_pool(pool_id)
            .await?
            .members
            .into_iter()
            .collect()
    } else {
        leads
    };

    let targets: Vec<DispatchTarget> = leads
        .iter()
        .map(|lead_id| {
            let target = DispatchTarget::new(lead_id.trim(), channel);
            match payload.as_deref() {
                Some(p) => target.with_payload(p),
                None => target,
            }
        })
        .collect();

    let batch = dispatcher::prepare_batch(&coordinator, pool_id, targets).await?;
    log_info!(
        "[{}] Dispatching {} {} target(s), pacing {}ms",
        batch.id,
        batch.targets.len(),
        channel,
        session.config.dispatch.pacing_ms
    );

    let gateway = Arc::new(CommandChannelGateway::new(session.config.gateway.clone()));
    let pacer = Arc::new(Pacer::new(session.config.dispatch.pacing()));
    let handle = dispatcher::spawn_batch(
        batch,
        coordinator.clone(),
        gateway,
        pacer,
        DispatchSettings::from_config(&session.config.dispatch),
    );

    // Watch for a shutdown signal and cancel the batch
    let cancel = handle.cancel_token();
    let monitor = tokio::spawn(async move {
        loop {
            if shutdown_flag().load(Ordering::Relaxed) {
                log_warn!("Shutdown requested, stopping after the current target");
                cancel.cancel();
                break;
            }
            if cancel.is_cancelled() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    });

    let joined = handle.join().await;
    monitor.abort();
    drop(coordinator);
    let summary = joined.map_err(|e| format!("Batch task failed: {}", e))?;

    println!("\n--- Batch Summary ---");
    println!("Batch: {}", summary.batch_id);
    println!(
        "Processed {}/{}: {} ok, {} denied, {} failed",
        summary.processed, summary.total, summary.ok, summary.denied, summary.failed
    );
    for result in summary.results.iter().rev() {
        let detail = result
            .provider_reference
            .as_deref()
            .or(result.error.as_deref())
            .unwrap_or("");
        println!(
            "  {} {:?} {}",
            result.target.lead_id, result.outcome, detail
        );
    }
    if summary.halt_reason == HaltReason::Cancelled {
        println!("Halted: cancelled");
    }

    session.close().await
}

async fn handle_preview(
    paths: &ProjectPaths,
    lead_id: &str,
    channel: &str,
    payload: Option<String>,
) -> Result<(), String> {
    let channel = parse_channel(channel)?;
    let session = Session::open(paths)?;

    let gateway = TestChannelGateway::from_config(&session.config.preview);
    let reference = preview::preview_target(
        &session.coordinator,
        &gateway,
        lead_id,
        channel,
        payload.as_deref(),
    )
    .await?;

    for message in gateway.outbox().await {
        println!(
            "Preview {} for {} sent to {} (ref {})",
            message.channel, message.lead_id, message.to, message.reference
        );
        if let Some(content) = message.content.filter(|c| !c.is_empty()) {
            println!("---\n{}\n---", content);
        }
    }
    log_info!("[preview][{}] done ({})", lead_id, reference);

    session.close().await
}
