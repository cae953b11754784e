mod cli;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vodflow_core::config::{RedisStoreConfig, StoreConfig};
use vodflow_core::domain::{
    DependencyGraph, Task, TaskStatus, TaskType, WorkOrder, WorkOrderId, WorkOrderRecord,
};
use vodflow_core::ports::SystemClock;
use vodflow_core::workflow::{WorkflowLoader, WorkflowSource};
use vodflow_core::{WorkOrderCounts, WorkOrderManager};

use cli::{Cli, Command, OrdersAction, WorkflowAction};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Workflow {
            action: WorkflowAction::Validate { location },
        } => validate_workflow(&location).await,
        Command::Orders { action } => {
            let manager = open_manager(cli.redis_url, cli.key_prefix).await?;
            match action {
                OrdersAction::List => list_orders(&manager).await,
                OrdersAction::Show { id } => show_order(&manager, &id).await,
                OrdersAction::Delete { id } => delete_order(&manager, &id).await,
            }
        }
        Command::Status => {
            let manager = open_manager(cli.redis_url, cli.key_prefix).await?;
            let open = manager.get_open_work_orders().await?;
            let counts = WorkOrderCounts::from_orders(&open);
            println!("{}", serde_json::to_string_pretty(&counts)?);
            Ok(())
        }
    }
}

async fn open_manager(redis_url: Option<String>, key_prefix: String) -> Result<WorkOrderManager> {
    let Some(url) = redis_url else {
        bail!("--redis-url (or VODFLOW_REDIS_URL) is required for this command");
    };
    let store = StoreConfig::Redis(RedisStoreConfig {
        key_prefix,
        ..RedisStoreConfig::new(url)
    })
    .open()
    .await
    .context("opening the work order store")?;
    Ok(WorkOrderManager::new(store, Arc::new(SystemClock)))
}

async fn validate_workflow(location: &str) -> Result<()> {
    let source: WorkflowSource = location.parse()?;
    let loader = WorkflowLoader::new(source);
    let tasks = loader
        .get_tasks()
        .await
        .with_context(|| format!("workflow at {} is invalid", loader.source()))?;
    info!(source = %loader.source(), tasks = tasks.len(), "workflow definition is valid");
    for line in describe_template(tasks)? {
        println!("{line}");
    }
    Ok(())
}

/// One line per task type in start order: what it waits for, what waits for it.
fn describe_template(tasks: &[Task]) -> Result<Vec<String>> {
    let graph = DependencyGraph::from_tasks(tasks);
    let order = graph
        .topological_order()
        .map_err(|on_cycle| anyhow!("task type {on_cycle} is on a dependency cycle"))?;
    let names = |types: Vec<TaskType>| {
        types.iter().map(|t| t.as_str().to_string()).collect::<Vec<_>>().join(", ")
    };
    Ok(order
        .iter()
        .map(|task_type| {
            format!(
                "{:<24} after [{}] before [{}]",
                task_type.as_str(),
                names(graph.dependencies_of(task_type)),
                names(graph.dependents_of(task_type)),
            )
        })
        .collect())
}

async fn list_orders(manager: &WorkOrderManager) -> Result<()> {
    let open = manager.get_open_work_orders().await?;
    if open.is_empty() {
        println!("no open work orders");
        return Ok(());
    }
    for order in &open {
        println!("{}", summary_line(order));
    }
    Ok(())
}

async fn show_order(manager: &WorkOrderManager, id: &str) -> Result<()> {
    let id = WorkOrderId::new(id);
    let Some(order) = manager.get_work_order(&id).await? else {
        bail!("work order {id} not found");
    };
    let record = WorkOrderRecord::from(&order);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn delete_order(manager: &WorkOrderManager, id: &str) -> Result<()> {
    let id = WorkOrderId::new(id);
    if manager.delete_work_order(&id).await? {
        println!("deleted {id}");
        Ok(())
    } else {
        bail!("work order {id} not found")
    }
}

fn summary_line(order: &WorkOrder) -> String {
    let done = order
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .count();
    let flag = if order.is_stuck() { "STUCK" } else { "" };
    format!(
        "{:<32} {:<6} {}/{} {:<5} {} {}",
        order.id.as_str(),
        order.status.to_string(),
        done,
        order.tasks.len(),
        flag,
        order.updated_at.to_rfc3339(),
        order.source,
    )
}
