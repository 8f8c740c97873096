//! Command-line interface for plancontrol.
//!
//! Provides commands for seeding plan executions, registering interrupts
//! against them and inspecting plan, node and interrupt state in the
//! SQLite execution store.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use crate::adapters::{LoggingRuntime, TracingObserver};
use crate::config::{self, ResolvedConfig};
use crate::core::{ExecutionStore, InterruptService, SqliteExecutionStore};
use crate::domain::{InterruptRequest, InterruptType, NodeExecution, PlanExecution, Status};

/// plancontrol - Interrupt processing for orchestrated plan executions
#[derive(Parser, Debug)]
#[command(name = "plancontrol")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seed a running plan execution with nodes
    CreatePlan {
        /// Plan name
        name: String,

        /// Number of leaf nodes
        #[arg(short, long, default_value = "1")]
        leaves: usize,

        /// Number of parent nodes (leaves are spread across them)
        #[arg(short, long, default_value = "0")]
        parents: usize,

        /// Initial status of the leaf nodes
        #[arg(long, default_value = "RUNNING", value_parser = Status::from_str)]
        leaf_status: Status,
    },

    /// Register and apply an interrupt
    Interrupt {
        /// Interrupt type (e.g. PAUSE_ALL, resume-all, RETRY)
        #[arg(value_parser = InterruptType::from_str)]
        interrupt_type: InterruptType,

        /// Plan execution ID
        plan_execution_id: String,

        /// Node execution ID (for node-scoped interrupts)
        #[arg(short, long)]
        node: Option<String>,

        /// Parameters as key=value (values parsed as JSON when possible)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },

    /// Show a plan execution, its nodes and their interrupt histories
    Status {
        /// Plan execution ID
        plan_execution_id: String,
    },

    /// List interrupts of a plan execution
    Interrupts {
        /// Plan execution ID
        plan_execution_id: String,

        /// Only registered or processing interrupts
        #[arg(long)]
        active: bool,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Parse `key=value`, reading the value as JSON and falling back to a string
fn parse_param(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected key=value, got '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("Empty parameter name in '{}'", s));
    }

    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.trim().to_string(), value))
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::CreatePlan {
                name,
                leaves,
                parents,
                leaf_status,
            } => create_plan(&name, leaves, parents, leaf_status).await,
            Commands::Interrupt {
                interrupt_type,
                plan_execution_id,
                node,
                params,
            } => register_interrupt(interrupt_type, &plan_execution_id, node, params).await,
            Commands::Status { plan_execution_id } => show_status(&plan_execution_id).await,
            Commands::Interrupts {
                plan_execution_id,
                active,
            } => list_interrupts(&plan_execution_id, active).await,
            Commands::Config => show_config().await,
        }
    }
}

/// Open the configured execution store, creating its directory if needed
fn open_store(cfg: &ResolvedConfig) -> Result<Arc<SqliteExecutionStore>> {
    if let Some(parent) = cfg.database.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let store = SqliteExecutionStore::open(&cfg.database)
        .with_context(|| format!("Failed to open execution store: {}", cfg.database.display()))?;
    Ok(Arc::new(store))
}

/// Seed a plan execution
async fn create_plan(name: &str, leaves: usize, parents: usize, leaf_status: Status) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;

    let plan = PlanExecution::new(name);
    store.save_plan_execution(&plan).await?;

    let mut parent_ids = Vec::new();
    for i in 0..parents {
        let parent = NodeExecution::parent(&plan.id, format!("{}-group-{}", name, i + 1), Status::Running);
        store.save_node_execution(&parent).await?;
        parent_ids.push(parent.id);
    }

    for i in 0..leaves {
        let mut leaf = NodeExecution::leaf(&plan.id, format!("{}-step-{}", name, i + 1), leaf_status);
        if !parent_ids.is_empty() {
            leaf = leaf.with_parent(parent_ids[i % parent_ids.len()].clone());
        }
        store.save_node_execution(&leaf).await?;
    }

    println!("{}", plan.id);
    eprintln!(
        "[Plan '{}' created with {} leaf and {} parent nodes]",
        name, leaves, parents
    );
    Ok(())
}

/// Register and apply an interrupt
async fn register_interrupt(
    interrupt_type: InterruptType,
    plan_execution_id: &str,
    node: Option<String>,
    params: Vec<(String, Value)>,
) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;

    let service = InterruptService::builder(store)
        .runtime(Arc::new(LoggingRuntime::new()))
        .observer(Arc::new(TracingObserver))
        .retry_policy(cfg.store_retry.clone())
        .channel(cfg.channel.clone())
        .build();

    let mut request = InterruptRequest::new(interrupt_type, plan_execution_id)
        .with_parameters(params.into_iter().collect::<Map<String, Value>>());
    if let Some(node_id) = node {
        request = request.for_node(node_id);
    }

    let interrupt = service.register_interrupt(request).await?;

    println!("{}", interrupt.id);
    eprintln!(
        "[{} interrupt {}: {}]",
        interrupt.interrupt_type, interrupt.id, interrupt.state
    );
    Ok(())
}

/// Show plan, nodes and effect histories
async fn show_status(plan_execution_id: &str) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;

    let plan = store
        .get_plan_execution(plan_execution_id)
        .await
        .with_context(|| format!("Failed to load plan execution {}", plan_execution_id))?;
    let nodes = store.fetch_node_executions(plan_execution_id).await?;

    println!("Plan ID: {}", plan.id);
    println!("Name: {}", plan.name);
    println!("Status: {}", plan.status);
    println!("Updated: {}", plan.last_updated_at);
    println!("\nNodes:");

    if nodes.is_empty() {
        println!("  (none)");
    }
    for node in &nodes {
        println!(
            "  {:<38} {:<20} {:<7} {:<14} retries={}",
            node.id,
            node.name,
            node.mode,
            node.status,
            node.retry_count
        );
        for effect in &node.interrupt_histories {
            println!(
                "    <- {} {} at {}",
                effect.interrupt_type, effect.interrupt_id, effect.applied_at_millis
            );
        }
    }

    Ok(())
}

/// List interrupts of a plan
async fn list_interrupts(plan_execution_id: &str, active_only: bool) -> Result<()> {
    let cfg = config::config()?;
    let store = open_store(cfg)?;

    let interrupts = if active_only {
        store.get_active_interrupts(plan_execution_id).await?
    } else {
        store.list_interrupts(plan_execution_id).await?
    };

    if interrupts.is_empty() {
        println!("No interrupts found");
        return Ok(());
    }

    println!(
        "{:<38} {:<14} {:<24} {:<38}",
        "INTERRUPT ID", "TYPE", "STATE", "NODE"
    );
    println!("{}", "-".repeat(116));

    for interrupt in interrupts {
        println!(
            "{:<38} {:<14} {:<24} {:<38}",
            interrupt.id,
            interrupt.interrupt_type,
            interrupt.state,
            interrupt.node_execution_id.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("plancontrol configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.database.display());
    println!();
    println!("Store retry:");
    println!("  Max attempts:  {}", cfg.store_retry.max_attempts);
    println!("  Initial delay: {}ms", cfg.store_retry.initial_delay_ms);
    println!("  Max delay:     {}ms", cfg.store_retry.max_delay_ms);
    println!();
    println!("Wait/notify channel: {}", cfg.channel);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param_json_and_string() {
        assert_eq!(
            parse_param("attempts=3").unwrap(),
            ("attempts".to_string(), Value::from(3))
        );
        assert_eq!(
            parse_param("region=eu-west").unwrap(),
            ("region".to_string(), Value::String("eu-west".to_string()))
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn test_interrupt_command_parses() {
        let cli = Cli::try_parse_from([
            "plancontrol",
            "interrupt",
            "mark-failed",
            "plan-1",
            "--node",
            "node-1",
            "--param",
            "reason=\"timeout\"",
        ])
        .unwrap();

        match cli.command {
            Commands::Interrupt {
                interrupt_type,
                node,
                params,
                ..
            } => {
                assert_eq!(interrupt_type, InterruptType::MarkFailed);
                assert_eq!(node.as_deref(), Some("node-1"));
                assert_eq!(params[0].1, Value::String("timeout".to_string()));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
