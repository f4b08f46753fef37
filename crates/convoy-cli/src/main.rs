use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use convoy_core::approval::{ApprovalCategory, ApprovalStatus};
use convoy_core::config::OrchestrationConfig;
use convoy_core::convoy::{ConvoyConfig, ConvoyId, ConvoyStatus};
use convoy_core::task::{TaskConfig, TaskId, TaskStatus};
use convoy_core::telemetry::{TelemetryConfig, init_telemetry};
use convoy_engine::{ConvoyFilter, Orchestrator, TaskFilter};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "convoy",
    about = "Durable task and convoy orchestration with agent safety limits"
)]
struct Cli {
    /// Path to convoy.toml.
    #[arg(long, default_value = "convoy.toml")]
    config: PathBuf,

    /// Hooks root holding all persisted state. Overrides HOOKS_PATH.
    #[arg(long)]
    hooks: Option<String>,

    /// Directory for the JSONL transcript of engine events.
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Output JSON-structured logs to console.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tasks.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },
    /// Manage convoys.
    Convoy {
        #[command(subcommand)]
        action: ConvoyAction,
    },
    /// Hourly spend ledger.
    Budget {
        #[command(subcommand)]
        action: BudgetAction,
    },
    /// Running-agent registry.
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Per-task iteration ceilings.
    Iteration {
        #[command(subcommand)]
        action: IterationAction,
    },
    /// Human approval queue.
    Approval {
        #[command(subcommand)]
        action: ApprovalAction,
    },
    /// Reset the working tree by one revision.
    Rollback {
        #[arg(long)]
        reason: String,
    },
    /// Show dashboard: tasks, convoys, budget, agents, approvals.
    Status,
}

#[derive(Subcommand)]
enum TaskAction {
    /// Create a task.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        desc: String,
        #[arg(long)]
        iteration: Option<String>,
        /// Dependency task ids (repeatable).
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        #[arg(long, default_value = "0")]
        priority: i32,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// List tasks.
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        iteration: Option<String>,
        #[arg(long)]
        convoy: Option<String>,
    },
    /// Show a task as JSON.
    Show { id: String },
    Assign {
        id: String,
        #[arg(long)]
        agent: String,
    },
    Unassign { id: String },
    Start { id: String },
    Complete {
        id: String,
        #[arg(long)]
        result: Option<String>,
    },
    Fail {
        id: String,
        #[arg(long)]
        reason: String,
    },
    Cancel {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    Retry { id: String },
    /// Add a dependency to a pending or blocked task.
    Depend {
        id: String,
        #[arg(long = "on")]
        on: String,
    },
    /// Show the next task ready to be assigned.
    Next {
        #[arg(long)]
        iteration: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConvoyAction {
    /// Create a convoy, optionally with inline tasks.
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        desc: String,
        #[arg(long)]
        iteration: Option<String>,
        /// Dependency convoy ids (repeatable).
        #[arg(long = "depends-on")]
        depends_on: Vec<String>,
        /// Existing task ids to adopt (repeatable).
        #[arg(long = "task-id")]
        task_ids: Vec<String>,
        /// Names of new member tasks (repeatable).
        #[arg(long = "task")]
        tasks: Vec<String>,
        #[arg(long, default_value = "0")]
        priority: i32,
        #[arg(long)]
        agent_type: Option<String>,
    },
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        iteration: Option<String>,
    },
    Show { id: String },
    Start { id: String },
    Complete { id: String },
    Fail {
        id: String,
        #[arg(long)]
        reason: String,
    },
    Cancel {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    Retry { id: String },
    /// Show the next convoy ready to run.
    Next {
        #[arg(long)]
        iteration: Option<String>,
    },
    /// Attach an existing task to a convoy.
    AddTask {
        id: String,
        #[arg(long)]
        task: String,
    },
}

#[derive(Subcommand)]
enum BudgetAction {
    Status,
    /// Ask whether an estimated cost fits in the current window.
    Check { estimate: f64 },
    /// Record actual spend.
    Record {
        amount: f64,
        #[arg(long, default_value = "")]
        desc: String,
    },
    /// Pause all spending until resumed or approved.
    Pause {
        #[arg(long)]
        reason: String,
    },
    Resume,
}

#[derive(Subcommand)]
enum AgentAction {
    Register {
        id: String,
        #[arg(long, default_value = "")]
        agent_type: String,
    },
    Unregister { id: String },
    List,
    /// Drop registrations older than the configured TTL.
    Sweep,
    /// Exit non-zero if the parallel-agent limit is reached.
    CanSpawn,
}

#[derive(Subcommand)]
enum IterationAction {
    Check { task: String },
    Increment { task: String },
    Reset { task: String },
}

#[derive(Subcommand)]
enum ApprovalAction {
    Request {
        #[arg(long)]
        reason: String,
        /// budget, iteration, rollback or other. Inferred from the reason if omitted.
        #[arg(long)]
        category: Option<String>,
        /// Task the request refers to.
        #[arg(long)]
        task: Option<String>,
    },
    List {
        #[arg(long)]
        status: Option<String>,
    },
    Status { id: String },
    Approve {
        id: String,
        #[arg(long)]
        notes: Option<String>,
    },
    Reject {
        id: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(&TelemetryConfig {
        json_logs: cli.json_logs,
        trace_dir: cli.trace_dir.clone(),
        ..TelemetryConfig::default()
    })?;

    let config = OrchestrationConfig::load(&cli.config)?
        .with_env_overrides()
        .with_hooks_override(cli.hooks.as_deref());
    tracing::debug!(
        hooks = %config.hooks_path.display(),
        vcs = %config.vcs.program,
        "opening orchestrator"
    );
    let orch = Orchestrator::open(&config)
        .context(format!("failed to open hooks root {}", config.hooks_path.display()))?;

    match cli.command {
        Commands::Task { action } => cmd_task(&orch, action),
        Commands::Convoy { action } => cmd_convoy(&orch, action),
        Commands::Budget { action } => cmd_budget(&orch, action),
        Commands::Agent { action } => cmd_agent(&orch, action),
        Commands::Iteration { action } => cmd_iteration(&orch, action),
        Commands::Approval { action } => cmd_approval(&orch, action),
        Commands::Rollback { reason } => cmd_rollback(&orch, &reason),
        Commands::Status => cmd_status(&orch),
    }
}

fn parse_task_status(label: &str) -> Result<TaskStatus> {
    TaskStatus::from_label(label).with_context(|| {
        let all: Vec<_> = TaskStatus::ALL.iter().map(|s| s.label()).collect();
        format!("unknown task status '{label}'. Use: {}", all.join(", "))
    })
}

fn parse_convoy_status(label: &str) -> Result<ConvoyStatus> {
    ConvoyStatus::from_label(label).with_context(|| {
        let all: Vec<_> = ConvoyStatus::ALL.iter().map(|s| s.label()).collect();
        format!("unknown convoy status '{label}'. Use: {}", all.join(", "))
    })
}

fn cmd_task(orch: &Orchestrator, action: TaskAction) -> Result<()> {
    let tasks = &orch.tasks;

    match action {
        TaskAction::Add {
            name,
            desc,
            iteration,
            depends_on,
            priority,
            max_iterations,
        } => {
            let mut config = TaskConfig::new(name)
                .with_description(desc)
                .with_dependencies(depends_on.into_iter().map(TaskId))
                .with_priority(priority);
            config.iteration = iteration;
            config.max_iterations = max_iterations;
            let task = tasks.create_task(config)?;
            println!("Created {} ({}): {}", task.id, task.status, task.name);
        }
        TaskAction::List {
            status,
            iteration,
            convoy,
        } => {
            let filter = TaskFilter {
                status: status.as_deref().map(parse_task_status).transpose()?,
                iteration,
                convoy: convoy.map(ConvoyId),
            };
            let list = tasks.list_tasks(&filter)?;
            if list.is_empty() {
                println!("No tasks found.");
            } else {
                println!(
                    "{:<10} {:<12} {:<4} {:<6} {:<12} {:<12} NAME",
                    "ID", "STATUS", "PRI", "TRY", "AGENT", "CONVOY"
                );
                println!("{}", "-".repeat(78));
                for t in list {
                    println!(
                        "{:<10} {:<12} {:<4} {:<6} {:<12} {:<12} {}",
                        t.id,
                        t.status.label(),
                        t.priority,
                        format!("{}/{}", t.attempts.count, t.attempts.ceiling),
                        t.assigned_agent.as_deref().unwrap_or("-"),
                        t.convoy_id.as_ref().map(|c| c.as_str()).unwrap_or("-"),
                        t.name
                    );
                }
            }
        }
        TaskAction::Show { id } => {
            let task = tasks.get_task(&TaskId(id))?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }
        TaskAction::Assign { id, agent } => {
            let task = tasks.assign_task(&TaskId(id), &agent)?;
            println!("Assigned {} to {agent}", task.id);
        }
        TaskAction::Unassign { id } => {
            let task = tasks.unassign_task(&TaskId(id))?;
            println!("Unassigned {}", task.id);
        }
        TaskAction::Start { id } => {
            let task = tasks.start_task(&TaskId(id))?;
            println!("Started {}: {}", task.id, task.name);
        }
        TaskAction::Complete { id, result } => {
            let task = tasks.complete_task(&TaskId(id), result)?;
            println!("Completed {}: {}", task.id, task.name);
        }
        TaskAction::Fail { id, reason } => {
            let task = tasks.fail_task(&TaskId(id), &reason)?;
            println!(
                "Failed {} (attempt {}/{})",
                task.id, task.attempts.count, task.attempts.ceiling
            );
        }
        TaskAction::Cancel { id, reason } => {
            let task = tasks.cancel_task(&TaskId(id), reason)?;
            println!("Cancelled {}", task.id);
        }
        TaskAction::Retry { id } => {
            let task = tasks.retry_task(&TaskId(id))?;
            println!("Retrying {}: {}", task.id, task.name);
        }
        TaskAction::Depend { id, on } => {
            let task = tasks.add_dependency(&TaskId(id), &TaskId(on))?;
            println!("{} now depends on {:?} ({})", task.id, task.dependencies, task.status);
        }
        TaskAction::Next { iteration } => match tasks.next_ready_task(iteration.as_deref())? {
            Some(task) => println!("{} (priority {}): {}", task.id, task.priority, task.name),
            None => println!("No ready tasks."),
        },
    }

    Ok(())
}

fn cmd_convoy(orch: &Orchestrator, action: ConvoyAction) -> Result<()> {
    let convoys = &orch.convoys;

    match action {
        ConvoyAction::Create {
            name,
            desc,
            iteration,
            depends_on,
            task_ids,
            tasks,
            priority,
            agent_type,
        } => {
            let mut config = ConvoyConfig::new(name)
                .with_dependencies(depends_on.into_iter().map(ConvoyId))
                .with_priority(priority);
            config.description = desc;
            config.iteration = iteration;
            config.agent_type = agent_type;
            config.task_ids = task_ids.into_iter().map(TaskId).collect();
            for task_name in tasks {
                config = config.with_task(TaskConfig::new(task_name));
            }
            let convoy = convoys.create_convoy(config)?;
            println!(
                "Created {} ({}) with {} task(s): {}",
                convoy.id,
                convoy.status,
                convoy.tasks.len(),
                convoy.name
            );
        }
        ConvoyAction::List { status, iteration } => {
            let filter = ConvoyFilter {
                status: status.as_deref().map(parse_convoy_status).transpose()?,
                iteration,
            };
            let list = convoys.list_convoys(&filter)?;
            if list.is_empty() {
                println!("No convoys found.");
            } else {
                println!(
                    "{:<12} {:<12} {:<4} {:<16} NAME",
                    "ID", "STATUS", "PRI", "DONE"
                );
                println!("{}", "-".repeat(66));
                for c in list {
                    println!(
                        "{:<12} {:<12} {:<4} {:<16} {}",
                        c.id,
                        c.status.label(),
                        c.priority,
                        format!(
                            "{}/{} ({:.0}%)",
                            c.progress.completed,
                            c.progress.total,
                            c.progress.percent_complete()
                        ),
                        c.name
                    );
                }
            }
        }
        ConvoyAction::Show { id } => {
            let convoy = convoys.get_convoy(&ConvoyId(id))?;
            println!("{}", serde_json::to_string_pretty(&convoy)?);
        }
        ConvoyAction::Start { id } => {
            let convoy = convoys.start_convoy(&ConvoyId(id))?;
            println!("Started {}", convoy.id);
        }
        ConvoyAction::Complete { id } => {
            let convoy = convoys.complete_convoy(&ConvoyId(id))?;
            println!("Completed {}: {}", convoy.id, convoy.name);
        }
        ConvoyAction::Fail { id, reason } => {
            let convoy = convoys.fail_convoy(&ConvoyId(id), &reason)?;
            println!("Failed {}", convoy.id);
        }
        ConvoyAction::Cancel { id, reason } => {
            let convoy = convoys.cancel_convoy(&ConvoyId(id), reason)?;
            println!("Cancelled {}", convoy.id);
        }
        ConvoyAction::Retry { id } => {
            let convoy = convoys.retry_convoy(&ConvoyId(id))?;
            println!("Retrying {}", convoy.id);
        }
        ConvoyAction::Next { iteration } => {
            match convoys.next_ready_convoy(iteration.as_deref())? {
                Some(c) => println!("{} ({}, priority {}): {}", c.id, c.status, c.priority, c.name),
                None => println!("No ready convoys."),
            }
        }
        ConvoyAction::AddTask { id, task } => {
            let convoy = convoys.add_task_to_convoy(&ConvoyId(id), &TaskId(task))?;
            println!("{} now has {} task(s)", convoy.id, convoy.tasks.len());
        }
    }

    Ok(())
}

fn print_budget(status: &convoy_engine::BudgetStatus) {
    println!(
        "  Spent this hour: ${:.2} / ${:.2} (remaining ${:.2})",
        status.spent_this_hour, status.hourly_limit_usd, status.remaining
    );
    let mins = (status.window_resets_at - Utc::now()).num_minutes().max(0);
    println!("  Window resets:   in {mins} min");
    if status.paused {
        println!(
            "  PAUSED:          {}",
            status.pause_reason.as_deref().unwrap_or("no reason recorded")
        );
    }
}

fn cmd_budget(orch: &Orchestrator, action: BudgetAction) -> Result<()> {
    let safety = &orch.safety;
    match action {
        BudgetAction::Status => {
            let status = safety.budget_status()?;
            println!("=== Budget ===");
            print_budget(&status);
            println!(
                "  Last 24h:        ${:.2} across {} entries",
                status.spent_in_log, status.entries_in_log
            );
        }
        BudgetAction::Check { estimate } => {
            if safety.check_budget(estimate)? {
                println!("OK: ${estimate:.2} fits in this hour's budget");
            } else {
                anyhow::bail!("${estimate:.2} does not fit in this hour's budget");
            }
        }
        BudgetAction::Record { amount, desc } => {
            let status = safety.record_cost(amount, &desc)?;
            println!("Recorded ${amount:.2}");
            print_budget(&status);
        }
        BudgetAction::Pause { reason } => {
            safety.pause_operations(&reason)?;
            println!("Operations paused: {reason}");
        }
        BudgetAction::Resume => {
            safety.resume_operations()?;
            println!("Operations resumed");
        }
    }
    Ok(())
}

fn cmd_agent(orch: &Orchestrator, action: AgentAction) -> Result<()> {
    let safety = &orch.safety;
    match action {
        AgentAction::Register { id, agent_type } => {
            let active = safety.register_agent(&id, &agent_type)?;
            println!(
                "Registered {id} ({active}/{} active)",
                safety.limits().max_parallel_agents
            );
        }
        AgentAction::Unregister { id } => {
            if safety.unregister_agent(&id)? {
                println!("Unregistered {id}");
            } else {
                println!("{id} was not registered");
            }
        }
        AgentAction::List => {
            let agents = safety.list_active_agents()?;
            if agents.is_empty() {
                println!("No active agents.");
            } else {
                println!("{:<24} {:<16} STARTED", "ID", "TYPE");
                println!("{}", "-".repeat(64));
                for a in agents {
                    println!(
                        "{:<24} {:<16} {}",
                        a.agent_id,
                        a.agent_type,
                        a.started_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
        AgentAction::Sweep => {
            let swept = safety.sweep_stale_agents(Utc::now())?;
            println!("Dropped {} stale registration(s)", swept.len());
        }
        AgentAction::CanSpawn => {
            if !safety.can_spawn_agent()? {
                anyhow::bail!(
                    "parallel agent limit ({}) reached",
                    safety.limits().max_parallel_agents
                );
            }
            println!("OK");
        }
    }
    Ok(())
}

fn cmd_iteration(orch: &Orchestrator, action: IterationAction) -> Result<()> {
    let safety = &orch.safety;
    match action {
        IterationAction::Check { task } => {
            let id = TaskId(task);
            let info = safety.iteration_info(&id)?;
            if safety.check_iteration_limit(&id)? {
                println!("{id}: {}/{} iterations, {} left", info.count, info.ceiling, info.remaining());
            } else {
                anyhow::bail!("{id}: iteration ceiling reached ({}/{})", info.count, info.ceiling);
            }
        }
        IterationAction::Increment { task } => {
            let info = safety.increment_iteration(&TaskId(task.clone()))?;
            println!("{task}: {}/{} iterations", info.count, info.ceiling);
        }
        IterationAction::Reset { task } => {
            safety.reset_iterations(&TaskId(task.clone()))?;
            println!("{task}: iterations reset");
        }
    }
    Ok(())
}

fn cmd_approval(orch: &Orchestrator, action: ApprovalAction) -> Result<()> {
    let safety = &orch.safety;
    match action {
        ApprovalAction::Request {
            reason,
            category,
            task,
        } => {
            let category = category
                .as_deref()
                .map(|c| {
                    ApprovalCategory::from_label(c).with_context(|| {
                        format!("unknown category '{c}'. Use: budget, iteration, rollback, other")
                    })
                })
                .transpose()?;
            let mut context = BTreeMap::new();
            if let Some(task) = task {
                context.insert(
                    convoy_core::approval::TASK_ID_CONTEXT_KEY.to_string(),
                    serde_json::Value::String(task),
                );
            }
            let request = safety.request_human_approval(&reason, context, category)?;
            println!("Requested {} ({}): {}", request.id, request.category, request.reason);
        }
        ApprovalAction::List { status } => {
            let status = status
                .as_deref()
                .map(|s| {
                    ApprovalStatus::from_label(s).with_context(|| {
                        format!("unknown status '{s}'. Use: pending, approved, rejected, expired")
                    })
                })
                .transpose()?;
            let requests = safety.list_approvals(status)?;
            if requests.is_empty() {
                println!("No approval requests.");
            } else {
                println!("{:<44} {:<10} {:<10} REASON", "ID", "CATEGORY", "STATUS");
                println!("{}", "-".repeat(90));
                for r in requests {
                    println!("{:<44} {:<10} {:<10} {}", r.id, r.category, r.status, r.reason);
                }
            }
        }
        ApprovalAction::Status { id } => {
            let request = safety.get_approval_status(&id)?;
            println!("{}", serde_json::to_string_pretty(&request)?);
        }
        ApprovalAction::Approve { id, notes } => {
            let request = safety.resolve_approval(&id, true, notes)?;
            println!("Approved {} ({})", request.id, request.category);
        }
        ApprovalAction::Reject { id, notes } => {
            let request = safety.resolve_approval(&id, false, notes)?;
            println!("Rejected {} ({})", request.id, request.category);
        }
    }
    Ok(())
}

fn cmd_rollback(orch: &Orchestrator, reason: &str) -> Result<()> {
    let record = orch.safety.rollback(reason)?;
    if !record.success {
        anyhow::bail!("rollback failed: {}", record.message);
    }
    println!(
        "Rolled back {} -> {}",
        record.before_revision.as_deref().unwrap_or("?"),
        record.after_revision.as_deref().unwrap_or("?")
    );
    for file in &record.changed_files {
        println!("  {file}");
    }
    Ok(())
}

fn cmd_status(orch: &Orchestrator) -> Result<()> {
    let counts = orch.tasks.status_counts()?;

    println!("=== Convoy Status ===\n");
    println!("Task counts:");
    for (status, count) in &counts {
        println!("  {status:<20} {count}");
    }
    let total: usize = counts.values().sum();
    println!("  {:<20} {total}", "total");

    let convoys = orch.convoys.list_convoys(&ConvoyFilter::default())?;
    let open = convoys.iter().filter(|c| !c.status.is_terminal()).count();
    println!("\nConvoys: {open} open of {}", convoys.len());

    let status = orch.safety.safety_status()?;
    println!("\nBudget:");
    print_budget(&status.budget);
    println!(
        "\nAgents:    {}/{} active",
        status.active_agents, status.max_parallel_agents
    );
    println!("Approvals: {} pending", status.pending_approvals);
    if let Some(rb) = &status.last_rollback {
        println!(
            "Last rollback: {} ({}) {}",
            rb.timestamp.format("%Y-%m-%d %H:%M"),
            if rb.success { "ok" } else { "failed" },
            rb.reason
        );
    }

    Ok(())
}
