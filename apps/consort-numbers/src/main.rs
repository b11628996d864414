//! # Consort Numbers
//!
//! A standalone CLI that syncs a single number between simulated devices.
//! Every device owns an in-memory store and its own handle on a shared
//! in-memory cloud folder, and syncs through a `SyncSession`: leech on first
//! sync, merge afterwards.
//!
//! ```text
//! object: "the-number"  (entity "Number")  →  { number: Int }
//! ```
//!
//! Concurrent edits resolve property by property, the later save winning.
//! A concurrent delete wins over any update.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::*;
use consort_cloud::MemoryCloudFileSystem;
use consort_core::{properties, GlobalId};
use consort_engine::{MergeReport, SyncConfig, SyncError, SyncSession};
use consort_store::{LocalSave, MemoryLocalStore};
use tracing_subscriber::EnvFilter;

const ENSEMBLE: &str = "numbers";
const NUMBER_ID: &str = "the-number";

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "consort-numbers")]
#[command(about = "Sync a number between devices through a shared cloud folder")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: one device sets a number, another picks it up and changes it
    Demo,
    /// Two devices change the number concurrently; the later save wins
    Conflict,
    /// One device deletes while another updates; the delete wins
    DeleteWins,
    /// A device goes offline, keeps editing, then comes back and catches up
    Offline,
}

// ─── Device: a simulated install with its own store ────────────────────────

struct Device {
    name: String,
    store: MemoryLocalStore,
    cloud: MemoryCloudFileSystem,
    session: SyncSession,
}

impl Device {
    async fn open(name: &str, cloud: &MemoryCloudFileSystem) -> Result<Self, SyncError> {
        let store = MemoryLocalStore::new();
        let cloud = cloud.connect();
        let session = SyncSession::open(
            SyncConfig::new(ENSEMBLE),
            Arc::new(store.clone()),
            Arc::new(cloud.clone()),
        )
        .await?;
        Ok(Self {
            name: name.to_string(),
            store,
            cloud,
            session,
        })
    }

    fn number(&self) -> Option<i64> {
        self.store
            .get(&GlobalId::new(NUMBER_ID))
            .and_then(|o| o.get("number").and_then(|v| v.as_int()))
    }

    /// Save a new value, inserting the object if this device has none.
    fn set(&self, value: i64, at: i64) -> Result<(), SyncError> {
        let id = GlobalId::new(NUMBER_ID);
        let save = if self.store.get(&id).is_some() {
            LocalSave::new().patch(id, properties([("number", value)]))
        } else {
            LocalSave::new().put(id, "Number", properties([("number", value)]))
        };
        self.store.save(save.at(at))?;
        step(&format!("{}: number = {}  (saved at t={})", self.name, value, at));
        Ok(())
    }

    fn delete(&self, at: i64) -> Result<(), SyncError> {
        self.store
            .save(LocalSave::new().delete(GlobalId::new(NUMBER_ID)).at(at))?;
        step(&format!("{}: number deleted  (saved at t={})", self.name, at));
        Ok(())
    }

    /// Leech on first use, merge afterwards.
    async fn sync(&self) -> Result<MergeReport, SyncError> {
        if !self.session.is_leeched() {
            self.session.leech().await?;
        }
        let report = self.session.merge().await?;
        sync_line(&self.name, &report);
        Ok(report)
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn sync_line(name: &str, report: &MergeReport) {
    let detail = if report.is_noop() {
        "nothing to do".dimmed().to_string()
    } else {
        format!(
            "up {} / applied {} / conflicts {}",
            report.uploaded, report.applied, report.conflicts_resolved
        )
    };
    println!(
        "  {} {} {} {}",
        name.bright_magenta(),
        "◀──sync──▶".bright_cyan(),
        "cloud".bright_magenta(),
        detail
    );
}

fn show_devices(devices: &[&Device]) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    for device in devices {
        let value = match device.number() {
            Some(n) => n.to_string().bright_white().to_string(),
            None => "(none)".dimmed().to_string(),
        };
        let line = format!("{:<12} number = {}", device.name, value);
        println!("  │ {:<42} │", line);
    }
    println!("  └{}┘", border);
}

fn converged(devices: &[&Device]) -> bool {
    let first = devices.first().map(|d| d.number());
    let same = devices.iter().all(|d| Some(d.number()) == first);
    if same {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL DEVICES CONVERGED".bright_green().bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED".bright_red().bold()
        );
    }
    same
}

// ─── Scenarios ─────────────────────────────────────────────────────────────

async fn run_demo() -> Result<bool, SyncError> {
    header("DEMO: Set, Sync, Change, Sync");
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open("device-A", &cloud).await?;
    let b = Device::open("device-B", &cloud).await?;

    section("Phase 1: both devices join the ensemble");
    a.sync().await?;
    b.sync().await?;

    section("Phase 2: A sets the number");
    a.set(5, 1)?;
    a.sync().await?;
    b.sync().await?;
    show_devices(&[&a, &b]);

    section("Phase 3: B changes it");
    b.set(7, 2)?;
    b.sync().await?;
    a.sync().await?;
    show_devices(&[&a, &b]);

    Ok(converged(&[&a, &b]))
}

async fn run_conflict() -> Result<bool, SyncError> {
    header("CONFLICT: Concurrent Changes, Later Save Wins");
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open("device-A", &cloud).await?;
    let b = Device::open("device-B", &cloud).await?;

    section("Phase 1: agree on 5");
    a.sync().await?;
    b.sync().await?;
    a.set(5, 1)?;
    a.sync().await?;
    b.sync().await?;
    show_devices(&[&a, &b]);

    section("Phase 2: both change the number without syncing");
    a.set(7, 10)?;
    b.set(9, 20)?;
    show_devices(&[&a, &b]);

    section("Phase 3: sync A, then B, then A");
    a.sync().await?;
    b.sync().await?;
    a.sync().await?;
    show_devices(&[&a, &b]);
    step(&format!(
        "number = {:?} (B saved later, so 9 wins)",
        a.number()
    ));

    Ok(converged(&[&a, &b]))
}

async fn run_delete_wins() -> Result<bool, SyncError> {
    header("DELETE WINS: Concurrent Delete and Update");
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open("device-A", &cloud).await?;
    let b = Device::open("device-B", &cloud).await?;

    section("Phase 1: agree on 5");
    a.sync().await?;
    b.sync().await?;
    a.set(5, 1)?;
    a.sync().await?;
    b.sync().await?;

    section("Phase 2: A deletes, B updates later");
    a.delete(10)?;
    b.set(11, 20)?;

    section("Phase 3: sync A, then B, then A");
    a.sync().await?;
    b.sync().await?;
    a.sync().await?;
    show_devices(&[&a, &b]);
    step("the delete wins even though the update was saved later");

    Ok(converged(&[&a, &b]) && a.number().is_none())
}

async fn run_offline() -> Result<bool, SyncError> {
    header("OFFLINE: Edit Offline, Reconnect, Catch Up");
    let cloud = MemoryCloudFileSystem::new();
    let a = Device::open("device-A", &cloud).await?;
    let b = Device::open("device-B", &cloud).await?;
    let c = Device::open("device-C", &cloud).await?;

    section("Phase 1: three devices join and agree on 1");
    a.sync().await?;
    b.sync().await?;
    c.sync().await?;
    a.set(1, 1)?;
    for device in [&a, &b, &c] {
        device.sync().await?;
    }
    show_devices(&[&a, &b, &c]);

    section("Phase 2: C loses its connection");
    c.cloud.set_offline(true);
    a.set(2, 10)?;
    a.sync().await?;
    b.sync().await?;
    c.set(3, 15)?;
    match c.sync().await {
        Ok(_) => step("device-C: sync unexpectedly succeeded"),
        Err(e) => step(&format!(
            "device-C: sync failed ({}), retryable = {}",
            e.to_string().bright_red(),
            e.is_retryable()
        )),
    }
    b.set(4, 20)?;
    b.sync().await?;
    show_devices(&[&a, &b, &c]);

    section("Phase 3: C reconnects, everyone syncs twice");
    c.cloud.set_offline(false);
    for _ in 0..2 {
        for device in [&c, &a, &b] {
            device.sync().await?;
        }
    }
    show_devices(&[&a, &b, &c]);
    step(&format!("number = {:?} (B's save at t=20 is the latest)", a.number()));

    Ok(converged(&[&a, &b, &c]))
}

// ─── Entry point ───────────────────────────────────────────────────────────

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        match cli.command {
            Commands::Demo => run_demo().await,
            Commands::Conflict => run_conflict().await,
            Commands::DeleteWins => run_delete_wins().await,
            Commands::Offline => run_offline().await,
        }
    });

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {}", "error:".bright_red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
