use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatekeeper::config::Config;
use gatekeeper::db::{self, Database};
use gatekeeper::models::{FeatureSummary, MutationTarget, Thing};
use gatekeeper::{api, Registry};

#[derive(Parser)]
#[command(name = "gk")]
#[command(about = "Feature flags with boolean, actor, group and percentage gates")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the admin HTTP API
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
    /// List persisted features
    List,
    /// Show one feature, persisted or not
    Show { key: String },
    /// Check whether a feature is enabled
    Check {
        key: String,
        /// Subject id to check against
        #[arg(long)]
        actor: Option<String>,
    },
    /// Enable a feature, fully or for one gate
    Enable {
        key: String,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Disable a feature, fully or for one gate
    Disable {
        key: String,
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Delete a feature and all its gates
    Remove { key: String },
}

#[derive(Args)]
#[group(multiple = false)]
struct TargetArgs {
    /// Actor id for the actors gate
    #[arg(long)]
    actor: Option<String>,
    /// Group name for the groups gate
    #[arg(long)]
    group: Option<String>,
    /// Percentage of actors (0-100)
    #[arg(long)]
    percentage: Option<i64>,
}

impl TargetArgs {
    /// No flag means the boolean gate.
    fn into_target(self, enable: bool) -> MutationTarget {
        if let Some(actor) = self.actor {
            MutationTarget::Actor(actor)
        } else if let Some(group) = self.group {
            MutationTarget::Group(group)
        } else if let Some(percentage) = self.percentage {
            MutationTarget::Percentage(percentage)
        } else {
            MutationTarget::Boolean(enable)
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "gatekeeper=debug,tower_http=debug".into()),
    );

    // Logs go to stderr so command output on stdout stays parseable
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_registry(config: &Config) -> anyhow::Result<Arc<Registry>> {
    let path = match &config.database {
        Some(path) => path.clone(),
        None => db::default_path()?,
    };
    let database = Database::open_with(path, config.location.clone())?;
    database.migrate()?;

    Ok(Arc::new(Registry::with_options(
        Arc::new(database),
        config.build_groups(),
        config.registry_options(),
    )))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(registry: Arc<Registry>, port: u16) -> anyhow::Result<()> {
    tracing::info!("Starting gatekeeper API on port {}", port);

    let app = api::create_router(registry);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("gatekeeper API listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::from_env()?;
    let registry = open_registry(&config)?;

    match cli.command {
        Some(Commands::Serve { port }) => serve(registry, port).await?,
        Some(Commands::List) => {
            let features = registry.all()?;
            let summaries: Vec<FeatureSummary> = features.iter().map(Into::into).collect();
            print_json(&summaries)?;
        }
        Some(Commands::Show { key }) => {
            let feature = registry.get(&key)?;
            let persisted = registry.is_persisted(&feature)?;
            print_json(&api::FeatureResponse {
                feature: feature.into(),
                persisted,
            })?;
        }
        Some(Commands::Check { key, actor }) => {
            let thing = actor.map(Thing::new);
            let enabled = registry.is_enabled(&key, thing.as_ref())?;
            print_json(&api::EnabledResponse { key, enabled })?;
        }
        Some(Commands::Enable { key, target }) => {
            let feature = registry.enable(&key, target.into_target(true))?;
            print_json(&FeatureSummary::from(feature))?;
        }
        Some(Commands::Disable { key, target }) => {
            let feature = registry.disable(&key, target.into_target(false))?;
            print_json(&FeatureSummary::from(feature))?;
        }
        Some(Commands::Remove { key }) => {
            if registry.remove(&key)? {
                println!("Removed {}", key);
            } else {
                println!("{} was not persisted", key);
            }
        }
        None => serve(registry, 3000).await?,
    }

    Ok(())
}
