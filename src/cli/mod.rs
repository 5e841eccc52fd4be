//! `suite-core` command line: drives the orchestrator the way a host would,
//! plus the maintenance actions an operator needs.

use clap::{Parser, Subcommand};

use crate::component::{EnsureOutcome, PresenceState};
use crate::config::SuiteConfig;
use crate::orchestrator::{EventOutcome, HostEvent, Orchestrator};
use crate::store::Notice;

#[derive(Parser, Debug)]
#[command(name = "suite-core", version, about = "Shared-component presence and sync")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the "extensions loaded" pass: install, update or retire as needed
    Sync,

    /// Show the installed component, active siblings and pending notices
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,

        /// Leave pending notices in place
        #[arg(long)]
        keep_notices: bool,
    },

    /// Mark a sibling extension active and notify the orchestrator
    Activate {
        /// Sibling slug (e.g. "post-gaps")
        slug: String,
    },

    /// Mark a sibling extension inactive and notify the orchestrator
    Deactivate {
        /// Sibling slug (e.g. "post-gaps")
        slug: String,
    },

    /// Install the component now; it will not be retired automatically
    Install,

    /// Delete the component; refused while any sibling is active
    Remove,

    /// Back up, delete and freshly install the component
    Reinstall,

    /// Fetch every remote file and test the components directory, without installing
    Probe {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the menu the active siblings would build
    Menu,
}

/// Run a command against the environment-configured orchestrator.
pub async fn run_command(cmd: Command) -> anyhow::Result<()> {
    let config = SuiteConfig::from_env()?;
    let orchestrator = Orchestrator::from_config(config)?;

    match cmd {
        Command::Sync => {
            let outcome = orchestrator.handle(HostEvent::ExtensionsLoaded).await;
            report_event(&outcome)
        }
        Command::Status { json, keep_notices } => cmd_status(&orchestrator, json, keep_notices),
        Command::Activate { slug } => cmd_activate(&orchestrator, &slug).await,
        Command::Deactivate { slug } => cmd_deactivate(&orchestrator, &slug).await,
        Command::Install => report_ensure(&orchestrator.install_manually().await),
        Command::Remove => {
            orchestrator.remove()?;
            println!("Removed {}.", orchestrator.config().slug);
            Ok(())
        }
        Command::Reinstall => report_ensure(&orchestrator.force_reinstall().await),
        Command::Probe { json } => cmd_probe(&orchestrator, json).await,
        Command::Menu => {
            print!("{}", orchestrator.build_menu()?.render_outline());
            Ok(())
        }
    }
}

fn report_event(outcome: &EventOutcome) -> anyhow::Result<()> {
    match outcome {
        EventOutcome::Ensured(ensure) => report_ensure(ensure),
        EventOutcome::Unavailable { reason } => {
            anyhow::bail!("Activation state unavailable: {reason}")
        }
        other => {
            println!("{other}");
            Ok(())
        }
    }
}

fn report_ensure(outcome: &EnsureOutcome) -> anyhow::Result<()> {
    match outcome {
        EnsureOutcome::InstallFailed { .. } | EnsureOutcome::StateUnavailable { .. } => {
            anyhow::bail!("{outcome}")
        }
        _ => {
            println!("{outcome}");
            Ok(())
        }
    }
}

fn cmd_status(orchestrator: &Orchestrator, json: bool, keep_notices: bool) -> anyhow::Result<()> {
    let status = orchestrator.status()?;
    let siblings = orchestrator.active_siblings()?;
    let notices = if keep_notices {
        Vec::new()
    } else {
        orchestrator.take_notices()?
    };

    if json {
        let value = serde_json::json!({
            "slug": orchestrator.config().slug,
            "state": orchestrator.state(),
            "component": status,
            "activeSiblings": siblings,
            "notices": notices,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let config = orchestrator.config();
    println!("{} ({})", config.title, config.slug);
    match orchestrator.state() {
        PresenceState::Absent => println!("  State: not installed"),
        PresenceState::Retired => println!("  State: installed, inactive"),
        PresenceState::Installing => println!("  State: installing"),
        PresenceState::Installed(_) => println!("  State: active"),
        PresenceState::Updating(_) => println!("  State: updating"),
    }
    if let Some(status) = status {
        println!("  Version: {}", status.version);
        println!("  Source: {}", status.source);
        println!("  Installed: {}", status.installed_at.format("%Y-%m-%d %H:%M:%S UTC"));
        match status.last_update_check {
            Some(at) => println!("  Last check: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
            None => println!("  Last check: never"),
        }
        println!(
            "  Auto-retire: {}",
            if status.auto_generated { "yes" } else { "no" }
        );
    }

    if siblings.is_empty() {
        println!("\nNo sibling extensions active.");
    } else {
        println!("\nActive siblings:");
        for sibling in &siblings {
            println!("  {:<24} {}", sibling.slug, sibling.name);
        }
    }

    if !notices.is_empty() {
        println!("\nNotices:");
        for notice in &notices {
            println!("  {}", describe_notice(notice));
        }
    }
    Ok(())
}

fn describe_notice(notice: &Notice) -> String {
    match notice {
        Notice::Updated { version } => format!("Updated to version {version}."),
        Notice::Retired => "Deactivated: no sibling extension needs it.".to_string(),
        Notice::Installed => "Installed and activated.".to_string(),
        Notice::RemoteUnavailable => {
            "Remote source unreachable; using the installed or local copy.".to_string()
        }
        Notice::InstallFailed => {
            "Install failed from both the remote and the local fallback.".to_string()
        }
        Notice::SyncFailed => "An update was available but could not be applied.".to_string(),
    }
}

async fn cmd_activate(orchestrator: &Orchestrator, slug: &str) -> anyhow::Result<()> {
    require_sibling(orchestrator, slug)?;
    orchestrator.host().activate(slug)?;
    println!("Activated {slug}.");
    report_event(&orchestrator.handle(HostEvent::SiblingActivated(slug.to_string())).await)
}

async fn cmd_deactivate(orchestrator: &Orchestrator, slug: &str) -> anyhow::Result<()> {
    require_sibling(orchestrator, slug)?;
    orchestrator.host().deactivate(slug)?;
    println!("Deactivated {slug}.");
    report_event(&orchestrator.handle(HostEvent::SiblingDeactivated(slug.to_string())).await)
}

fn require_sibling(orchestrator: &Orchestrator, slug: &str) -> anyhow::Result<()> {
    let siblings = &orchestrator.config().siblings;
    if siblings.iter().any(|s| s.slug == slug) {
        return Ok(());
    }
    let known: Vec<_> = siblings.iter().map(|s| s.slug.as_str()).collect();
    anyhow::bail!("Unknown sibling '{}'. Known: {}", slug, known.join(", "))
}

async fn cmd_probe(orchestrator: &Orchestrator, json: bool) -> anyhow::Result<()> {
    let report = orchestrator.probe_remote().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{:<24} {:<6} {:>8}  SHA256", "RESOURCE", "STATUS", "BYTES");
        println!("{}", "-".repeat(100));
        for r in &report.resources {
            if r.ok {
                println!(
                    "{:<24} {:<6} {:>8}  {}",
                    r.path,
                    "ok",
                    r.size.unwrap_or(0),
                    r.sha256.as_deref().unwrap_or("")
                );
            } else {
                println!(
                    "{:<24} {:<6} {:>8}  {}",
                    r.path,
                    "FAIL",
                    "-",
                    r.error.as_deref().unwrap_or("")
                );
            }
        }
        match &report.filesystem_error {
            None => println!("\nComponents directory is writable."),
            Some(e) => println!("\nComponents directory is NOT writable: {e}"),
        }
    }

    if !report.healthy() {
        anyhow::bail!("Probe found problems");
    }
    Ok(())
}
