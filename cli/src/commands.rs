use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use aura_analysis::{
    AnalysisScheduler, DiagnosticsTranslator, Document, SchedulerEvent, SweepReport,
};
use aura_client::{BackendApi, ChatOptions, ProtocolClient, Session};
use aura_config::AuraConfig;
use aura_tools::GitClient;

/// Connect, or fail with the same status text an editor would show.
async fn connect(config: &AuraConfig) -> Result<Session> {
    let endpoint = config
        .connection
        .endpoint()
        .context("invalid connection.endpoint")?;
    let client = ProtocolClient::new(config.connection.clone());
    let session = Session::with_socket(endpoint, client);
    if let Err(err) = session.connect().await {
        tracing::debug!("Connect failed: {err}");
        bail!("{}", session.report().await);
    }
    Ok(session)
}

pub async fn ping(config: &AuraConfig) -> Result<()> {
    let session = connect(config).await?;
    let report = session.client().probe().await?;
    println!("{}", session.report().await);
    println!(
        "  modules loaded: {}, requests processed: {}, uptime: {:.0}s",
        report.modules_loaded, report.requests_processed, report.uptime
    );
    session.disconnect().await;
    Ok(())
}

pub async fn status(config: &AuraConfig) -> Result<()> {
    let session = connect(config).await?;
    let api = BackendApi::new(session.client().clone());
    let status = api.status().await?;
    println!(
        "service: {}",
        if status.service_running { "running" } else { "stopped" }
    );
    for (module, healthy) in &status.modules_health {
        println!("  {module}: {}", if *healthy { "ok" } else { "unhealthy" });
    }
    session.disconnect().await;
    Ok(())
}

pub async fn analyze(config: &AuraConfig, files: Vec<PathBuf>) -> Result<()> {
    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        documents.push(Document::detect(path, text));
    }

    let session = connect(config).await?;
    let translator = Arc::new(DiagnosticsTranslator::new());
    let backend = Arc::new(BackendApi::new(session.client().clone()));
    let (scheduler, mut events) =
        AnalysisScheduler::new(config.analysis.clone(), backend, Arc::clone(&translator));

    let progress = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SchedulerEvent::Skipped { path, reason } => {
                    eprintln!("skipped {}: {reason}", path.display());
                }
                SchedulerEvent::Failed { path, error } => {
                    eprintln!("failed {}: {error}", path.display());
                }
                SchedulerEvent::SweepProgress { processed, total } => {
                    tracing::info!("Analyzed {processed}/{total}");
                }
                other => tracing::debug!(event = ?other, "Scheduler event"),
            }
        }
    });

    let report = scheduler.sweep(documents).await;
    scheduler.dispose();
    drop(scheduler);
    let _ = tokio::time::timeout(Duration::from_secs(1), progress).await;

    let snapshot = translator.snapshot();
    for (path, annotations) in snapshot.files() {
        for annotation in annotations.iter() {
            println!("{}", annotation.display_with_path(path));
        }
    }
    println!("{}", sweep_summary(&report, &snapshot.status_string()));
    session.disconnect().await;

    if report.failed > 0 {
        bail!("{} of {} files failed to analyze", report.failed, report.total);
    }
    Ok(())
}

fn sweep_summary(report: &SweepReport, status: &str) -> String {
    format!(
        "{} analyzed, {} skipped, {} failed, {} discarded ({status})",
        report.analyzed, report.skipped, report.failed, report.discarded
    )
}

pub async fn chat(config: &AuraConfig, prompt: &str) -> Result<()> {
    let session = connect(config).await?;
    let api = BackendApi::new(session.client().clone());
    let completion = api.chat(prompt, &ChatOptions::default()).await?;
    println!("{}", completion.content);
    session.disconnect().await;
    Ok(())
}

pub async fn commit(config: &AuraConfig, all: bool, dry_run: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read the working directory")?;
    let git = GitClient::new(cwd, &config.vcs);
    if !git.is_repository().await? {
        bail!("{} is not inside a git work tree", git.workdir().display());
    }
    if all {
        git.stage_all().await?;
    }
    let diff = git.staged_diff().await?;
    if diff.trim().is_empty() {
        bail!("nothing staged to commit (use --all to stage every change)");
    }

    let session = connect(config).await?;
    let api = BackendApi::new(session.client().clone());
    let suggestion = api.generate_commit(false, Some(&diff)).await?;
    session.disconnect().await;

    println!("{}", suggestion.message);
    if dry_run {
        return Ok(());
    }
    match git.commit(&suggestion.message).await? {
        Some(hash) => println!("committed {hash}"),
        None => println!("committed"),
    }
    Ok(())
}
