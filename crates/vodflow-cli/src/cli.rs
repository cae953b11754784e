//! Command line surface of the `vodflow` operator tool.

use clap::{Parser, Subcommand};

/// Inspect and maintain VOD work orders.
#[derive(Debug, Parser)]
#[command(name = "vodflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Redis URL of the work order store.
    #[arg(long, global = true, env = "VODFLOW_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Key prefix the orchestrator writes under.
    #[arg(long, global = true, env = "VODFLOW_REDIS_KEY_PREFIX", default_value = "vodflow")]
    pub key_prefix: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Workflow definition checks.
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Persisted work orders.
    Orders {
        #[command(subcommand)]
        action: OrdersAction,
    },

    /// Counts of open work orders and their tasks, as JSON.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum WorkflowAction {
    /// Load a workflow definition and print its task template.
    Validate {
        /// File path, file:// URL or http(s):// URL.
        #[arg(long, env = "VODFLOW_WORKFLOW_LOCATION")]
        location: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum OrdersAction {
    /// One line per open work order.
    List,

    /// Print a work order record as JSON.
    Show { id: String },

    /// Remove a work order.
    Delete { id: String },
}
