use crate::{
    api::{Backend, HttpBackend},
    cli::args::{Cli, Command, FindingAction, TaskAction, UserAction},
    config::{ClientConfig, ConfigLoader},
    core::{
        aggregator,
        errors::FetchError,
        models::{Finding, Task, User},
        normalize::{collect_records, collect_with, findings_from_export, identity_from_record, FromRecord},
        retriever::ScopedRetriever,
        session::{Credentials, Scope, SessionContext},
    },
    storage::FileTokenStore,
    ui::{printer, progress::StatusLine},
    utils::logging,
};
use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shape written by `findings export`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FindingExport {
    task_id: u64,
    results: Vec<Finding>,
}

pub async fn run(cli: Cli) -> Result<()> {
    // Initialize logging
    let level = logging::level_from_cli(&cli);
    logging::init(level)?;

    // Load configuration; the command line wins over file and environment
    let config = ConfigLoader::load_with_custom_path(cli.config.as_deref(), cli.base_url.clone())?;
    tracing::info!("Using backend at {}", config.server.base_url);

    let backend = Arc::new(HttpBackend::new(&config.server)?);
    let mut context = SessionContext::resume(open_store(&config)?)
        .context("Failed to read stored session")?;

    match cli.command {
        Command::Login { username, password } => {
            let token = backend.login(&username, &password).await?;
            let info = backend.user_info(&token).await?;
            let (name, role) = identity_from_record(&info);
            let name = if name.is_empty() { username } else { name };

            let session = context.set_session(Credentials { token, username: name, role })?;
            println!("Logged in as {} ({})", session.username, session.role.as_str());
        }
        Command::Logout => {
            if let Some(session) = context.session() {
                if let Err(e) = backend.logout(session).await {
                    tracing::warn!("Server-side logout failed: {}", e);
                }
            }
            context.clear_session()?;
            println!("Logged out");
        }
        Command::Whoami => match context.session() {
            Some(session) if context.is_authenticated() => {
                println!("{} ({})", session.username, session.role.as_str())
            }
            _ => println!("Not logged in"),
        },
        Command::Dashboard { date, json } => {
            let session = context.require()?;
            let scope = Scope::resolve(&session);
            let retriever = ScopedRetriever::new(Arc::clone(&backend), config.retrieval.fanout_concurrency);
            let cancel = cancel_on_ctrl_c();

            let status = StatusLine::new(json);
            status.start(&format!("Retrieving {} scope data...", scope.as_str()));
            let fetched = retriever.fetch_dashboard(&session, scope, &cancel).await;
            status.finish();
            let (tasks, findings) = fetched.map_err(explain)?;

            let snapshot = match date {
                Some(reference) => aggregator::aggregate(scope, &tasks, &findings, reference, &Local),
                None => aggregator::aggregate_now(scope, &tasks, &findings),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}", printer::render_dashboard(&snapshot));
            }
        }
        Command::Tasks { action } => {
            let session = context.require()?;
            match action.unwrap_or(TaskAction::List) {
                TaskAction::List => {
                    let retriever = ScopedRetriever::new(Arc::clone(&backend), config.retrieval.fanout_concurrency);
                    let cancel = cancel_on_ctrl_c();
                    let tasks = retriever
                        .fetch_tasks(&session, Scope::resolve(&session), &cancel)
                        .await
                        .map_err(explain)?;
                    println!("{}", printer::render_tasks(&tasks));
                }
                TaskAction::Show { id } => {
                    let raw = backend.task_detail(&session, id).await.map_err(explain)?;
                    let task = Task::from_record(&raw)
                        .with_context(|| format!("Task {} came back without its identity fields", id))?;
                    println!("{}", printer::render_task_detail(&task));
                }
                TaskAction::Create { target, template } => {
                    let status = StatusLine::new(false);
                    match backend.create_task(&session, &target, &template).await.map_err(explain)? {
                        Some(id) => status.print_success(&format!("Created task {} for {}", id, target)),
                        None => status.print_success(&format!("Created task for {}", target)),
                    }
                }
                TaskAction::Delete { id } => {
                    backend.delete_task(&session, id).await.map_err(explain)?;
                    StatusLine::new(false).print_success(&format!("Deleted task {}", id));
                }
            }
        }
        Command::Findings { task, action } => {
            let session = context.require()?;
            match (action, task) {
                (Some(FindingAction::Show { id }), _) => {
                    let raw = backend.finding_detail(&session, id).await.map_err(explain)?;
                    let finding = Finding::from_record(&raw)
                        .with_context(|| format!("Finding {} came back without its identity fields", id))?;
                    println!("{}", printer::render_finding_detail(&finding));
                }
                (Some(FindingAction::Export { task_id, output }), _) => {
                    let raw = backend.export_findings(&session, task_id).await.map_err(explain)?;
                    let export = FindingExport {
                        task_id,
                        results: findings_from_export(&raw, task_id),
                    };
                    let text = serde_json::to_string_pretty(&export)?;
                    match output {
                        Some(path) => {
                            std::fs::write(&path, text)
                                .with_context(|| format!("Failed to write export to {:?}", path))?;
                            StatusLine::new(false).print_success(&format!(
                                "Exported {} findings of task {} to {}",
                                export.results.len(),
                                task_id,
                                path.display()
                            ));
                        }
                        None => println!("{}", text),
                    }
                }
                (None, Some(task)) => {
                    let records = backend
                        .list_task_findings(&session, task)
                        .await
                        .map_err(explain)?;
                    let findings: Vec<Finding> =
                        collect_with(&records, |raw| Finding::from_record_in_task(raw, task));
                    println!("{}", printer::render_findings(&findings));
                }
                (None, None) => {
                    let scope = Scope::resolve(&session);
                    let retriever = ScopedRetriever::new(Arc::clone(&backend), config.retrieval.fanout_concurrency);
                    let cancel = cancel_on_ctrl_c();

                    let status = StatusLine::new(false);
                    status.start(&format!("Retrieving {} scope findings...", scope.as_str()));
                    // The self scope reaches findings through the caller's tasks.
                    let fetched = match scope {
                        Scope::Own => match retriever.fetch_tasks(&session, scope, &cancel).await {
                            Ok(tasks) => retriever.fetch_findings(&session, scope, &tasks, &cancel).await,
                            Err(err) => Err(err),
                        },
                        Scope::All => retriever.fetch_findings(&session, scope, &[], &cancel).await,
                    };
                    status.finish();

                    let findings = fetched.map_err(explain)?;
                    println!("{}", printer::render_findings(&findings));
                }
            }
        }
        Command::Users { action } => {
            let session = context.require_admin()?;
            let status = StatusLine::new(false);
            match action.unwrap_or(UserAction::List) {
                UserAction::List => {
                    let records = backend.list_users(&session).await.map_err(explain)?;
                    let users: Vec<User> = collect_records(&records);
                    println!("{}", printer::render_users(&users));
                }
                UserAction::Add { username, password, role } => {
                    backend
                        .register_user(&session, &username, &password, role)
                        .await
                        .map_err(explain)?;
                    status.print_success(&format!("Added {} ({})", username, role.as_str()));
                }
                UserAction::Delete { id } => {
                    backend.delete_user(&session, id).await.map_err(explain)?;
                    status.print_success(&format!("Deleted user {}", id));
                }
                UserAction::SetRole { id, role } => {
                    backend.update_user_role(&session, id, role).await.map_err(explain)?;
                    status.print_success(&format!("User {} is now {}", id, role.as_str()));
                }
                UserAction::ResetPassword { id, password } => {
                    backend
                        .reset_user_password(&session, id, &password)
                        .await
                        .map_err(explain)?;
                    status.print_success(&format!("Password reset for user {}", id));
                }
            }
        }
    }

    Ok(())
}

fn open_store(config: &ClientConfig) -> Result<FileTokenStore> {
    let path = config
        .session
        .store_path
        .clone()
        .or_else(FileTokenStore::default_path)
        .context("No config directory available; set session.store_path")?;
    let store = FileTokenStore::new(path);
    tracing::debug!("Session store: {:?}", store.path());
    Ok(store)
}

/// Token cancelled when the user hits Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling outstanding requests");
            trigger.cancel();
        }
    });
    cancel
}

fn explain(err: FetchError) -> anyhow::Error {
    if err.is_authorization() {
        anyhow::Error::new(err).context("Session rejected by the server; run `vfdash login` again")
    } else {
        anyhow::Error::new(err)
    }
}
