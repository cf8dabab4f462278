use std::{error::Error, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use containers_menu::{
    Action, Container, ContainerRegistry, DetectedVersion, Engine, Settings,
    app::{MenuSession, Refresher},
    bindings::{find_action, label},
    config::SortColumn,
    notify::StderrNotifier,
    process::ProcessRunner,
    registry::SCRATCH_IMAGE,
};
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "containers-menu", version, about = "Inspect and control Podman containers")]
struct Cli {
    /// Container engine binary
    #[arg(long, env = "CONTAINERS_MENU_ENGINE")]
    engine: Option<String>,

    /// Terminal program plus arguments used for logs, top, shell and stats
    #[arg(long, env = "CONTAINERS_MENU_TERMINAL")]
    terminal: Option<String>,

    /// Show details and the IP address of every container
    #[arg(long, env = "CONTAINERS_MENU_EXTRA_INFO")]
    extra_info: bool,

    /// Column the engine sorts the container list by
    #[arg(long, value_enum, env = "CONTAINERS_MENU_SORT_BY")]
    sort_by: Option<SortColumn>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the container menu once
    List,
    /// Print the details of one container, including its IP address
    Details { container: String },
    /// Run an action (start, stop, restart, pause, unpause, rm, logs, top, shell, stats, inspect)
    Action {
        verb: String,
        container: String,
        /// Run the action even if the container's state does not allow it
        #[arg(long)]
        force: bool,
    },
    /// Keep the menu up to date from engine events until interrupted
    Watch,
    /// Remove all stopped containers
    Prune,
    /// Start a new detached container with a shell
    Run {
        #[arg(default_value = SCRATCH_IMAGE)]
        image: String,
    },
    /// Show the detected engine version
    Version,
}

impl Cli {
    fn settings(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            engine: self.engine.clone().unwrap_or(defaults.engine),
            terminal: self.terminal.clone().unwrap_or(defaults.terminal),
            extra_info: self.extra_info,
            sort_by: self.sort_by,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let runner = Arc::new(ProcessRunner::new(Arc::new(StderrNotifier)));
    let engine = Engine::new(runner, cli.settings());
    let registry = Arc::new(ContainerRegistry::new(engine));

    match cli.command {
        Commands::List => {
            let refresher = Refresher::new(registry);
            refresher.refresh().await;
            print!("{}", refresher.state().read().await.render());
        }

        Commands::Details { container } => {
            let mut target = find_container(&registry, &container).await?;
            target.inspect().await?;
            println!("{}", target.details());
        }

        Commands::Action {
            verb,
            container,
            force,
        } => {
            let action = find_action(&verb).ok_or_else(|| format!("unknown action {verb}"))?;
            let mut target = find_container(&registry, &container).await?;
            if !target.actions().contains(action) {
                let message = format!(
                    "{} is not available while {} is {}",
                    label(action),
                    target.name,
                    target.lifecycle()
                );
                if !force {
                    return Err(message.into());
                }
                warn!("{message}, running it anyway");
            }
            target.perform(action).await?;
            if action == Action::Inspect {
                println!("{}", target.details());
            }
        }

        Commands::Watch => watch(registry).await?,

        Commands::Prune => registry.prune().await?,

        Commands::Run { image } => {
            let id = registry.run_scratch(&image).await?;
            println!("{id}");
        }

        Commands::Version => {
            let binary = registry.engine().binary();
            match registry.version().discover().await? {
                detected @ DetectedVersion::Known(version) => {
                    println!("{binary} {version} ({:?} layout)", detected.layout())
                }
                DetectedVersion::Legacy => println!("{binary} version unknown (Legacy layout)"),
            }
        }
    }
    Ok(())
}

async fn find_container(
    registry: &ContainerRegistry,
    wanted: &str,
) -> Result<Container, Box<dyn Error>> {
    registry
        .list_containers()
        .await?
        .into_iter()
        .find(|c| c.name == wanted || (wanted.len() >= 3 && c.id.starts_with(wanted)))
        .ok_or_else(|| format!("no container named {wanted}").into())
}

async fn watch(registry: Arc<ContainerRegistry>) -> Result<(), Box<dyn Error>> {
    let mut session = MenuSession::new(registry);
    session.open().await?;
    let state = session.state();

    let mut shown = 0;
    let mut interval = time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("closing menu");
                break;
            }
            _ = interval.tick() => {
                let state = state.read().await;
                if state.generation != shown {
                    shown = state.generation;
                    print!("{}", state.render());
                    println!();
                }
                if !session.is_watching() {
                    warn!("event stream ended");
                    break;
                }
            }
        }
    }
    session.close().await;
    Ok(())
}
