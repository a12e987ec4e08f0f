use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};

use teamtrack_lib::events::{AppEvent, EventSink, ToastLevel};
use teamtrack_lib::export::{create_share_link, csv_file_name, export_csv, resolve_link};
use teamtrack_lib::identity::Principal;
use teamtrack_lib::models::{MatchType, ParkStatus, SessionFormData};
use teamtrack_lib::preferences::Theme;
use teamtrack_lib::session::SessionCoordinator;
use teamtrack_lib::timer::MatchPhase;
use teamtrack_lib::utils::logging::init_logging;
use teamtrack_lib::{default_data_dir, AppState};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Where local storage, settings and the session database live.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Signed-in user id. Without it, guest mode decides who owns writes.
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the current session and match clock.
    Status,
    /// Discard the current session and start a new one.
    New {
        name: String,
        #[arg(short, long, value_enum, default_value_t = MatchKind::FullGame)]
        match_type: MatchKind,
    },
    /// Forget the session stored on this device.
    Clear,
    /// Start (or resume) the match clock and follow it.
    Run {
        /// Stop following after this many seconds; the clock keeps running.
        #[arg(short, long)]
        seconds: Option<u64>,
        #[arg(short, long, value_enum)]
        match_type: Option<MatchKind>,
    },
    Pause,
    /// Jump from the controller pickup countdown straight to teleop.
    Skip,
    /// Reset the match clock, keeping the session.
    Reset,
    /// Score the current draft and record it as a match.
    Record(ScoreArgs),
    /// Remove a recorded match by its position (1-based).
    Remove { position: usize },
    /// Write the session as CSV.
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a share link for the current session.
    Share,
    /// Show the session behind a share link.
    Open { url: String },
    /// Save the session remotely and clear it from this device.
    Complete {
        #[arg(short, long)]
        team: Option<String>,
    },
    /// List remotely stored sessions for the current user or a team.
    Sessions {
        #[arg(short, long)]
        team: Option<String>,
    },
    #[command(subcommand)]
    Teams(TeamCommands),
    /// Turn guest mode on or off.
    Guest {
        #[arg(value_enum)]
        mode: Toggle,
    },
    /// Show or change the theme.
    Theme { theme: Option<String> },
}

#[derive(Subcommand, Debug)]
enum TeamCommands {
    List,
    Create { name: String },
    Add { team: String, member: String },
    Remove { team: String, member: String },
    Delete { team: String },
}

#[derive(clap::Args, Debug)]
struct ScoreArgs {
    #[arg(long, default_value_t = 0)]
    auton_classified: u32,
    #[arg(long, default_value_t = 0)]
    auton_overflow: u32,
    #[arg(long, default_value_t = 0)]
    auton_pattern: u32,
    #[arg(long)]
    leave: bool,
    #[arg(long, default_value_t = 0)]
    teleop_classified: u32,
    #[arg(long, default_value_t = 0)]
    teleop_overflow: u32,
    #[arg(long, default_value_t = 0)]
    teleop_depot: u32,
    #[arg(long, default_value_t = 0)]
    teleop_pattern: u32,
    #[arg(long, value_enum, default_value_t = ParkKind::None)]
    park: ParkKind,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum MatchKind {
    FullGame,
    Autonomous,
    Teleop,
}

impl From<MatchKind> for MatchType {
    fn from(kind: MatchKind) -> Self {
        match kind {
            MatchKind::FullGame => MatchType::FullGame,
            MatchKind::Autonomous => MatchType::Autonomous,
            MatchKind::Teleop => MatchType::Teleop,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ParkKind {
    None,
    Partial,
    Full,
}

impl From<ParkKind> for ParkStatus {
    fn from(kind: ParkKind) -> Self {
        match kind {
            ParkKind::None => ParkStatus::None,
            ParkKind::Partial => ParkStatus::Partial,
            ParkKind::Full => ParkStatus::Full,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Toggle {
    On,
    Off,
}

/// Prints toasts to stderr and, when following a match, each new clock value.
#[derive(Default)]
struct ConsoleSink {
    follow_clock: bool,
    last_clock: Mutex<Option<(MatchPhase, String)>>,
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: AppEvent) {
        match event {
            AppEvent::Toast { level, message } => match level {
                ToastLevel::Info => eprintln!("{message}"),
                ToastLevel::Warning => eprintln!("warning: {message}"),
                ToastLevel::Error => eprintln!("error: {message}"),
            },
            AppEvent::PhaseChanged { to, .. } if self.follow_clock => {
                println!("-- {}", to.as_str());
            }
            AppEvent::TimerStateChanged { snapshot } if self.follow_clock => {
                let current = (snapshot.state.phase, snapshot.clock);
                let mut last = match self.last_clock.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if last.as_ref() != Some(&current) {
                    println!("{:>6}  {}", current.1, current.0.as_str());
                    *last = Some(current);
                }
            }
            _ => {}
        }
    }
}

fn require_owner(principal: Option<&Principal>) -> Result<&str> {
    match principal {
        Some(principal) => Ok(principal.owner_id()),
        None => bail!("sign in with --user or turn on guest mode first"),
    }
}

fn print_session(form: &SessionFormData) {
    let name = if form.session_name.trim().is_empty() {
        "(unnamed)"
    } else {
        form.session_name.as_str()
    };
    println!("{} [{}]", name, form.match_type.as_str());
    for record in &form.matches {
        println!(
            "  #{:<3} auton {:>3}  teleop {:>3}  park {:<7}  total {:>3}",
            record.match_number,
            record.auton_points(),
            record.teleop_points(),
            record.park.as_str(),
            record.total_points()
        );
    }
    if !form.matches.is_empty() {
        println!(
            "  best {}  average {:.1}",
            form.best_score(),
            form.average_score()
        );
    }
}

async fn follow(session: &SessionCoordinator, seconds: Option<u64>) {
    let deadline = seconds.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    let mut poll = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {
                let state = session.timer_state().await;
                if state.phase == MatchPhase::Ended || !state.is_active() {
                    break;
                }
                if deadline.is_some_and(|deadline| tokio::time::Instant::now() >= deadline) {
                    break;
                }
            }
        }
    }
}

async fn run_command(
    state: &AppState,
    principal: Option<Principal>,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Guest { mode } => {
            state.identity.set_guest_mode(mode == Toggle::On)?;
            println!("guest mode {}", if mode == Toggle::On { "on" } else { "off" });
            return Ok(());
        }
        Commands::Theme { theme } => {
            if let Some(raw) = theme {
                let theme: Theme = raw.parse().map_err(anyhow::Error::msg)?;
                state.preferences.set_theme(theme)?;
            }
            println!("{}", state.preferences.theme().as_str());
            return Ok(());
        }
        Commands::Open { url } => {
            let shared = resolve_link(&state.gateway, &url).await?;
            print_session(&shared);
            return Ok(());
        }
        Commands::Sessions { team } => {
            let sessions = match team {
                Some(team) => state.gateway.list_sessions_by_team(&team).await?,
                None => {
                    let owner = require_owner(principal.as_ref())?;
                    state.gateway.list_sessions_by_owner(owner).await?
                }
            };
            for session in sessions {
                println!(
                    "{}  {}  {} matches  {}",
                    session.id,
                    session.updated_at.format("%Y-%m-%d %H:%M"),
                    session.data.matches.len(),
                    session.data.session_name
                );
            }
            return Ok(());
        }
        Commands::Teams(team_command) => {
            let owner = require_owner(principal.as_ref())?;
            return run_team_command(state, owner, team_command).await;
        }
        _ => {}
    }

    let session = state.mount_session().await;
    let result = run_session_command(state, &session, principal, command).await;
    session.shutdown().await;
    result
}

async fn run_team_command(state: &AppState, owner: &str, command: TeamCommands) -> Result<()> {
    let gateway = &state.gateway;
    match command {
        TeamCommands::List => {
            for team in gateway.list_teams_for_member(owner).await? {
                println!("{}  {}  ({} members)", team.id, team.name, team.member_ids.len());
            }
        }
        TeamCommands::Create { name } => {
            let team = gateway.create_team(&name, owner).await?;
            println!("{}", team.id);
        }
        TeamCommands::Add { team, member } => {
            let team = gateway.add_member(&team, &member).await?;
            println!("{}: {}", team.name, team.member_ids.join(", "));
        }
        TeamCommands::Remove { team, member } => {
            let team = gateway.remove_member(&team, &member).await?;
            println!("{}: {}", team.name, team.member_ids.join(", "));
        }
        TeamCommands::Delete { team } => {
            if !gateway.delete_team(&team).await? {
                bail!("no team {team}");
            }
        }
    }
    Ok(())
}

async fn run_session_command(
    state: &AppState,
    session: &SessionCoordinator,
    principal: Option<Principal>,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Status => {
            print_session(&session.form().await);
            let snapshot = session.snapshot().await;
            let running = if snapshot.state.running { "running" } else { "stopped" };
            println!(
                "{} {} ({running}), session time {}s",
                snapshot.clock,
                snapshot.state.phase.as_str(),
                snapshot.state.session_elapsed
            );
        }
        Commands::New { name, match_type } => {
            session.new_session(&name, match_type.into()).await;
            println!("started {name}");
        }
        Commands::Clear => {
            session.new_session("", MatchType::default()).await;
            session.flush().await;
            println!("cleared");
        }
        Commands::Run {
            seconds,
            match_type,
        } => {
            if let Some(kind) = match_type {
                session.set_match_type(kind.into()).await?;
            }
            session.start_timer().await?;
            follow(session, seconds).await;
        }
        Commands::Pause => {
            let paused = session.pause_timer().await;
            println!("paused at {}", paused.timer);
        }
        Commands::Skip => {
            session.skip_to_teleop().await?;
        }
        Commands::Reset => {
            session.reset_timer().await;
        }
        Commands::Record(score) => {
            session
                .update(|form| {
                    let draft = &mut form.draft;
                    draft.auton.classified = score.auton_classified;
                    draft.auton.overflow = score.auton_overflow;
                    draft.auton.pattern = score.auton_pattern;
                    draft.auton.leave = score.leave;
                    draft.teleop.classified = score.teleop_classified;
                    draft.teleop.overflow = score.teleop_overflow;
                    draft.teleop.depot = score.teleop_depot;
                    draft.teleop.pattern = score.teleop_pattern;
                    draft.park = score.park.into();
                })
                .await?;
            let record = session.record_match().await?;
            println!("match {}: {} pts", record.match_number, record.total_points());
        }
        Commands::Remove { position } => {
            let Some(index) = position.checked_sub(1) else {
                bail!("positions start at 1");
            };
            let removed = session.remove_match(index).await?;
            println!("removed match {}", removed.match_number);
        }
        Commands::Export { output } => {
            let form = session.form().await;
            let path = output.unwrap_or_else(|| PathBuf::from(csv_file_name(&form, Utc::now())));
            std::fs::write(&path, export_csv(&form))
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("{}", path.display());
        }
        Commands::Share => {
            let form = session.form().await;
            let owner = principal
                .as_ref()
                .filter(|principal| principal.is_authenticated())
                .map(Principal::owner_id);
            let base = state.settings.settings().share_base_url;
            println!("{}", create_share_link(&state.gateway, owner, &base, &form).await?);
        }
        Commands::Complete { team } => {
            let owner = require_owner(principal.as_ref())?;
            let stored = session.complete_session(owner, team.as_deref()).await?;
            println!("{}", stored.id);
        }
        other => bail!("{other:?} does not act on the current session"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse();
    let data_dir = args.data_dir.unwrap_or_else(default_data_dir);
    let events = Arc::new(ConsoleSink {
        follow_clock: matches!(args.command, Commands::Run { .. }),
        ..ConsoleSink::default()
    });

    let state = AppState::open(&data_dir, events)?;
    let principal = state.identity.principal(args.user.as_deref())?;
    run_command(&state, principal, args.command).await
}
