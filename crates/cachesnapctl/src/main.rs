//! cachesnapctl - CLI client for the cachesnap daemon.
//!
//! Talks to cachesnapd over its Unix socket.

mod commands;
mod rpc_client;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cachesnapctl")]
#[command(about = "Snapshot-lifecycle orchestrator for managed cache clusters", long_about = None)]
#[command(version)]
struct Cli {
    /// Daemon socket path (overrides discovery)
    #[arg(long, global = true)]
    socket: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status and counters
    Status,

    /// Manage per-cluster backup policies
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },

    /// Trigger and inspect snapshots
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },

    /// Start a cross-region snapshot copy
    Copy {
        /// Source snapshot id (must be available)
        snapshot_id: String,

        /// Region to copy into
        target_region: String,
    },

    /// Drive blue-green restores
    Restore {
        #[command(subcommand)]
        command: RestoreCommands,
    },

    /// Delete a cluster (refused while a restore targets it)
    Decommission {
        cluster_id: String,
    },
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Show the policy for one cluster
    Get { cluster_id: String },

    /// Create or replace a policy (validated daemon-side)
    Set {
        cluster_id: String,

        /// Automatic snapshot retention in days (1-35)
        #[arg(long)]
        retention: u8,

        /// Snapshot window as HH:MM+MINUTESm, e.g. 03:30+90m
        #[arg(long, default_value = "03:00+60m")]
        window: String,

        /// Reserved-memory percent for the snapshot fork
        #[arg(long, default_value_t = 25)]
        reserved_memory: u8,

        /// DR region completed snapshots are replicated to
        #[arg(long)]
        copy_to_region: Option<String>,

        /// Cluster tier: staging or production
        #[arg(long, default_value = "staging")]
        tier: String,
    },

    /// List all stored policies
    List,

    /// Remove the policy for one cluster
    Remove { cluster_id: String },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Trigger a manual snapshot
    Trigger {
        cluster_id: String,

        /// Why the snapshot is being taken
        #[arg(long, default_value = "manual request")]
        reason: String,
    },

    /// Take a pre-change snapshot ahead of a classified change
    Prechange {
        cluster_id: String,

        /// Change kind: deploy, parameter-change, or version-upgrade
        #[arg(long)]
        change: String,
    },

    /// List tracked snapshots
    List {
        /// Only this cluster
        #[arg(long)]
        cluster: Option<String>,
    },

    /// Delete a snapshot on the control plane
    Delete { snapshot_id: String },
}

#[derive(Subcommand)]
enum RestoreCommands {
    /// Begin a blue-green restore from a snapshot
    Begin {
        /// Cluster id to create (the green side)
        #[arg(long)]
        target: String,

        /// Source snapshot id
        #[arg(long)]
        snapshot: String,

        /// Node type for the new cluster
        #[arg(long, default_value = "cache.r6g.large")]
        node_type: String,

        #[arg(long)]
        multi_az: bool,
    },

    /// Record the warm-up validation signal
    Confirm { restore_id: String },

    /// Cut traffic over to the restored cluster
    Cutover { restore_id: String },

    /// Abort an in-flight restore
    Abort { restore_id: String },

    /// List active restores
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = cli.socket.as_deref();

    match cli.command {
        Commands::Status => commands::status(socket).await,
        Commands::Policy { command } => match command {
            PolicyCommands::Get { cluster_id } => commands::policy_get(socket, &cluster_id).await,
            PolicyCommands::Set {
                cluster_id,
                retention,
                window,
                reserved_memory,
                copy_to_region,
                tier,
            } => {
                commands::policy_set(
                    socket,
                    &cluster_id,
                    retention,
                    &window,
                    reserved_memory,
                    copy_to_region,
                    &tier,
                )
                .await
            }
            PolicyCommands::List => commands::policy_list(socket).await,
            PolicyCommands::Remove { cluster_id } => {
                commands::policy_remove(socket, &cluster_id).await
            }
        },
        Commands::Snapshot { command } => match command {
            SnapshotCommands::Trigger { cluster_id, reason } => {
                commands::snapshot_trigger(socket, &cluster_id, &reason).await
            }
            SnapshotCommands::Prechange { cluster_id, change } => {
                commands::snapshot_prechange(socket, &cluster_id, &change).await
            }
            SnapshotCommands::List { cluster } => commands::snapshot_list(socket, cluster).await,
            SnapshotCommands::Delete { snapshot_id } => {
                commands::snapshot_delete(socket, &snapshot_id).await
            }
        },
        Commands::Copy {
            snapshot_id,
            target_region,
        } => commands::copy(socket, &snapshot_id, &target_region).await,
        Commands::Restore { command } => match command {
            RestoreCommands::Begin {
                target,
                snapshot,
                node_type,
                multi_az,
            } => commands::restore_begin(socket, &target, &snapshot, &node_type, multi_az).await,
            RestoreCommands::Confirm { restore_id } => {
                commands::restore_confirm(socket, &restore_id).await
            }
            RestoreCommands::Cutover { restore_id } => {
                commands::restore_cutover(socket, &restore_id).await
            }
            RestoreCommands::Abort { restore_id } => {
                commands::restore_abort(socket, &restore_id).await
            }
            RestoreCommands::List => commands::restore_list(socket).await,
        },
        Commands::Decommission { cluster_id } => commands::decommission(socket, &cluster_id).await,
    }
}
