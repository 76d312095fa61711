//! Choros CLI - drive a demo session against a live worker pool

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use choros_core::capabilities::Capabilities;
use choros_core::config::ChorosConfig;
use choros_core::persona::default_roster;
use choros_core::protocol::entity_name;
use choros_pool::orchestrator::TurnContext;
use choros_pool::session::SessionRegistry;

#[derive(Parser)]
#[command(name = "choros")]
#[command(about = "Choros persona worker pool CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo draft session end to end
    Demo {
        /// Number of rounds to run
        #[arg(short, long, default_value_t = 2)]
        rounds: u32,

        /// Maximum reactions gathered per pick
        #[arg(long, default_value_t = 2)]
        max_reactions: usize,
    },
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("choros {}", env!("CARGO_PKG_VERSION"));
            println!("choros-core {}", choros_core::VERSION);
            println!("choros-pool {}", choros_pool::VERSION);
        }
        Commands::Demo {
            rounds,
            max_reactions,
        } => run_demo(rounds, max_reactions).await?,
    }

    Ok(())
}

/// The demo board; real deployments bring their own candidate tables.
fn demo_board() -> Vec<String> {
    [
        "A. Vance (WR)",
        "R. Okafor (RB)",
        "D. Whitfield (QB)",
        "M. Castellanos (TE)",
        "J. Ellison (WR)",
        "T. Brackett (RB)",
        "C. Mbeki (WR)",
        "S. Delgado (RB)",
        "K. Yamada (QB)",
        "P. Rourke (TE)",
        "L. Fontaine (WR)",
        "E. Abara (RB)",
        "N. Kowalski (WR)",
        "G. Tupola (RB)",
        "B. Hollis (QB)",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

async fn run_demo(rounds: u32, max_reactions: usize) -> Result<()> {
    let config = ChorosConfig::load()?;
    let capabilities = Capabilities::detect(&config.worker);
    info!(bind_host = %capabilities.bind_host, managed = capabilities.managed_hosting, "capabilities probed");

    let roster = default_roster();
    let names: Vec<String> = roster.iter().map(|p| p.name().to_string()).collect();
    let registry = SessionRegistry::new(config, capabilities, roster);

    let session = registry.open().await?;
    println!("session {} open, {} workers\n", session.id(), session.worker_ids().len());

    let mut available = demo_board();
    let mut team_rosters: Vec<Vec<String>> = vec![Vec::new(); names.len()];

    for round in 1..=rounds {
        println!("── round {} ──", round);

        for worker_id in session.worker_ids() {
            if available.is_empty() {
                break;
            }

            let ctx = TurnContext {
                candidates: available.clone(),
                roster: team_rosters[worker_id].clone(),
                round,
            };

            let (player, line) = match session.request_decision(worker_id, &ctx).await {
                Some(decision) => {
                    let mut line = decision.rationale.clone();
                    if let Some(banter) = &decision.banter {
                        line.push_str(&format!(" ({})", banter));
                    }
                    (decision.player, line)
                }
                None => {
                    // Local synchronous fallback: the degraded worker never
                    // stalls the room
                    let player = entity_name(&available[0]).to_string();
                    (player.clone(), format!("{} (fallback pick)", player))
                }
            };

            println!("{}: {}", names[worker_id], line);
            available.retain(|c| entity_name(c) != player);
            team_rosters[worker_id].push(player.clone());

            let mut reactions = 0;
            for other_id in session.worker_ids() {
                if other_id == worker_id || reactions >= max_reactions {
                    continue;
                }
                if let Some(reaction) = session
                    .request_reaction(other_id, &names[worker_id], &player, round)
                    .await
                {
                    if reaction.engaged {
                        if let Some(remark) = reaction.remark {
                            println!("  {}: {}", names[other_id], remark);
                            reactions += 1;
                        }
                    }
                }
            }
        }
        println!();
    }

    println!("── results ──");
    for (worker_id, team) in team_rosters.iter().enumerate() {
        println!("{}: {}", names[worker_id], team.join(", "));
    }

    registry.close(session.id()).await;
    println!("\nsession closed, ports released");
    Ok(())
}
