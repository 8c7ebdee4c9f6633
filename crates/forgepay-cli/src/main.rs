mod display;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use forgepay_core::{
    AccountId, Evidence, Organization, OrganizationType, ProjectDraft, SettlementConfig, Trustline,
};
use forgepay_engine::{Orchestrator, SettlementError};
use forgepay_escrow::{
    EscrowClient, EscrowClientConfig, EscrowGateway, KeypairSigner, MockGateway, TESTNET_PASSPHRASE,
};
use forgepay_store::DuckStore;
use rust_decimal::Decimal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "forgepay", version, about = "Escrow-backed milestone settlement")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Settlement database file
    #[arg(long, env = "FORGEPAY_DB", default_value = "forgepay.duckdb", global = true)]
    db: PathBuf,

    /// Base URL of the escrow service
    #[arg(long, env = "ESCROW_API_URL", global = true)]
    escrow_api_url: Option<String>,

    #[arg(long, env = "ESCROW_API_KEY", hide_env_values = true, global = true)]
    escrow_api_key: Option<String>,

    #[arg(long, env = "ESCROW_TIMEOUT_SECS", default_value_t = 30, global = true)]
    escrow_timeout_secs: u64,

    #[arg(long, env = "LEDGER_NETWORK_PASSPHRASE", default_value = TESTNET_PASSPHRASE, global = true)]
    network_passphrase: String,

    /// Platform fee percentage charged on each release
    #[arg(long, env = "PLATFORM_FEE", default_value = "0", global = true)]
    platform_fee: Decimal,

    #[arg(long, env = "PLATFORM_ADDRESS", global = true)]
    platform_address: Option<AccountId>,

    /// Issuer of the settlement asset
    #[arg(long, env = "TRUSTLINE_ADDRESS", global = true)]
    trustline_address: Option<AccountId>,

    #[arg(long, env = "TRUSTLINE_DECIMALS", global = true)]
    trustline_decimals: Option<u32>,

    /// Create projects without deploying an escrow (development only)
    #[arg(long, env = "FORGEPAY_SKIP_ESCROW", global = true)]
    skip_escrow: bool,

    /// Refuse to act when a milestone's contract index can only be guessed
    #[arg(long, env = "FORGEPAY_STRICT_INDEX", global = true)]
    strict_index: bool,

    /// Secret key of the contractor wallet (approver)
    #[arg(long, env = "FORGEPAY_SIGNER_SECRET", hide = true, hide_env_values = true, global = true)]
    signer_secret: Option<String>,

    /// Secret key of the freelancer wallet (service provider)
    #[arg(long, env = "FORGEPAY_PROVIDER_SECRET", hide = true, hide_env_values = true, global = true)]
    provider_secret: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Create the settlement database
    Init,
    /// Manage organizations
    Org {
        #[command(subcommand)]
        action: OrgAction,
    },
    /// Create and inspect projects
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
    /// Move milestones through their lifecycle
    Milestone {
        #[command(subcommand)]
        action: MilestoneAction,
    },
    /// Attach proof of delivery to milestones
    Evidence {
        #[command(subcommand)]
        action: EvidenceAction,
    },
}

#[derive(Subcommand)]
enum OrgAction {
    Add {
        legal_name: String,
        /// requester (pays) or provider (does the work)
        #[arg(long = "type")]
        org_type: OrganizationType,
        #[arg(long)]
        wallet: Option<AccountId>,
        #[arg(long)]
        tax_id: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        business_type: Option<String>,
        #[arg(long)]
        industry_type: Option<String>,
    },
    /// Soft-delete an organization
    Remove { id: String },
    List,
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project from a JSON draft, deploying and funding its escrow
    Create {
        #[arg(long)]
        file: PathBuf,
    },
    /// Show a project with live escrow state
    Show { id: String },
}

#[derive(Subcommand)]
enum MilestoneAction {
    Start { id: String },
    /// Approve and complete a milestone on the contract
    Complete { id: String },
}

#[derive(Subcommand)]
enum EvidenceAction {
    Add {
        milestone_id: String,
        file_url: String,
        #[arg(long)]
        description: Option<String>,
    },
    List { milestone_id: String },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("forgepay v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<SettlementError>() {
            Some(settlement) => eprintln!("{}", settlement.user_message()),
            None => eprintln!("error: {e:#}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let g = cli.global;
    let store = Arc::new(
        DuckStore::open_persistent(&g.db)
            .with_context(|| format!("opening settlement store {}", g.db.display()))?,
    );

    match cli.command {
        Command::Init => {
            println!(
                "{} ready ({} projects, {} milestones)",
                g.db.display(),
                store.project_count()?,
                store.milestone_count()?
            );
        }
        Command::Org { action } => org(&store, action)?,
        Command::Project { action } => match action {
            ProjectAction::Create { file } => {
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let draft: ProjectDraft = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing draft {}", file.display()))?;
                let signer = signer(&g, g.signer_secret.as_deref(), "FORGEPAY_SIGNER_SECRET")?;
                let created = orchestrator(&g, store)?
                    .create_project(&draft, &signer)
                    .await?;
                display::print_created(&created);
            }
            ProjectAction::Show { id } => {
                let view = orchestrator(&g, store)?
                    .read_model()
                    .project_view(&id)
                    .await?;
                display::print_project_card(&view);
            }
        },
        Command::Milestone { action } => match action {
            MilestoneAction::Start { id } => {
                let milestone = orchestrator(&g, store)?.start_milestone(&id).await?;
                println!("{} is {}", milestone.title, milestone.status);
            }
            MilestoneAction::Complete { id } => {
                let approver = signer(&g, g.signer_secret.as_deref(), "FORGEPAY_SIGNER_SECRET")?;
                let provider =
                    signer(&g, g.provider_secret.as_deref(), "FORGEPAY_PROVIDER_SECRET")?;
                let report = orchestrator(&g, store)?
                    .complete_milestone(&id, &approver, &provider)
                    .await?;
                display::print_completion(&report);
            }
        },
        Command::Evidence { action } => match action {
            EvidenceAction::Add {
                milestone_id,
                file_url,
                description,
            } => {
                let evidence = Evidence {
                    id: Uuid::new_v4().to_string(),
                    milestone_id,
                    file_url,
                    description,
                    created_at: Utc::now(),
                };
                store.add_evidence(&evidence)?;
                println!("{}", evidence.id);
            }
            EvidenceAction::List { milestone_id } => {
                display::print_evidences(&store.evidences_for_milestone(&milestone_id)?);
            }
        },
    }
    Ok(())
}

fn org(store: &DuckStore, action: OrgAction) -> Result<()> {
    match action {
        OrgAction::Add {
            legal_name,
            org_type,
            wallet,
            tax_id,
            address,
            business_type,
            industry_type,
        } => {
            let mut org = Organization::new(legal_name, org_type);
            org.wallet_address = wallet;
            org.tax_id = tax_id;
            org.address = address;
            org.business_type = business_type;
            org.industry_type = industry_type;
            store.insert_organization(&org)?;
            println!("{}", org.id);
        }
        OrgAction::Remove { id } => {
            store.soft_delete_organization(&id)?;
            println!("{id} removed");
        }
        OrgAction::List => display::print_organizations(&store.active_organizations()?),
    }
    Ok(())
}

fn settlement_config(g: &GlobalArgs) -> Result<SettlementConfig> {
    let platform = g
        .platform_address
        .clone()
        .context("PLATFORM_ADDRESS is not set")?;
    let trustline = Trustline {
        address: g
            .trustline_address
            .clone()
            .context("TRUSTLINE_ADDRESS is not set")?,
        decimals: g.trustline_decimals,
    };
    Ok(SettlementConfig::new(platform, trustline)
        .with_platform_fee(g.platform_fee)
        .with_skip_escrow(g.skip_escrow)
        .with_strict_index_mapping(g.strict_index))
}

fn gateway(g: &GlobalArgs) -> Result<Arc<dyn EscrowGateway>> {
    match (&g.escrow_api_url, g.skip_escrow) {
        (Some(url), _) => {
            let mut config = EscrowClientConfig::new(url.as_str())
                .with_timeout(Duration::from_secs(g.escrow_timeout_secs));
            if let Some(key) = &g.escrow_api_key {
                config = config.with_api_key(key.as_str());
            }
            Ok(Arc::new(EscrowClient::new(config)?))
        }
        (None, true) => {
            warn!("ESCROW_API_URL is not set; using an in-process escrow gateway");
            Ok(Arc::new(MockGateway::new()))
        }
        (None, false) => bail!("ESCROW_API_URL is not set (or pass --skip-escrow for local use)"),
    }
}

fn orchestrator(g: &GlobalArgs, store: Arc<DuckStore>) -> Result<Orchestrator> {
    Ok(Orchestrator::new(store, gateway(g)?, settlement_config(g)?))
}

fn signer(g: &GlobalArgs, secret: Option<&str>, var: &str) -> Result<KeypairSigner> {
    let secret = secret.with_context(|| format!("{var} is not set"))?;
    KeypairSigner::from_secret(secret, &g.network_passphrase)
        .with_context(|| format!("{var} is not a valid secret key"))
}
