use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::models::Role;

#[derive(Parser, Debug, Clone)]
#[command(name = "vfdash", version, about = "Dashboard client for the vulnerability scan platform")]
pub struct Cli {
    /// Verbose human output
    #[arg(short = 'v', long = "verbose", global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Debug logs (implies verbose)
    #[arg(short = 'd', long = "debug", global = true, action = ArgAction::SetTrue)]
    pub debug: bool,

    /// Config file to use instead of the default search path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Override `server.base_url`
    #[arg(long = "base-url", global = true)]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Authenticate and store the session
    Login {
        #[arg(short = 'u', long)]
        username: String,
        #[arg(short = 'p', long)]
        password: String,
    },
    /// Drop the stored session
    Logout,
    /// Show the current identity
    Whoami,
    /// Task count, severity histogram and 7-day trend
    Dashboard {
        /// Reference day for the trend window (defaults to today)
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Print the snapshot as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// List, create or delete scan tasks
    Tasks {
        #[command(subcommand)]
        action: Option<TaskAction>,
    },
    /// Findings visible to the caller, or those of one task
    Findings {
        /// Only this task's findings
        #[arg(short = 't', long = "task")]
        task: Option<u64>,
        #[command(subcommand)]
        action: Option<FindingAction>,
    },
    /// Manage user accounts (admin only)
    Users {
        #[command(subcommand)]
        action: Option<UserAction>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum TaskAction {
    List,
    /// Show one task
    Show {
        id: u64,
    },
    Create {
        #[arg(long)]
        target: String,
        #[arg(long)]
        template: String,
    },
    Delete {
        id: u64,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum FindingAction {
    /// Show one finding with its detail
    Show {
        id: u64,
    },
    /// Export a task's findings as JSON
    Export {
        task_id: u64,
        /// Write to this file instead of stdout
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum UserAction {
    List,
    /// Register a new account
    Add {
        #[arg(short = 'u', long)]
        username: String,
        #[arg(short = 'p', long)]
        password: String,
        #[arg(long, value_parser = parse_role, default_value = "user")]
        role: Role,
    },
    Delete {
        id: u64,
    },
    /// Change an account's role
    SetRole {
        id: u64,
        #[arg(value_parser = parse_role)]
        role: Role,
    },
    ResetPassword {
        id: u64,
        #[arg(short = 'p', long)]
        password: String,
    },
}

/// Strict on input: only `admin` and `user` are accepted.
fn parse_role(raw: &str) -> Result<Role, String> {
    match raw.trim().to_lowercase().as_str() {
        "admin" => Ok(Role::Admin),
        "user" => Ok(Role::User),
        other => Err(format!("unknown role {:?}, expected admin or user", other)),
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}
