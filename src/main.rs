use anyhow::Context;
use clap::Parser;
use staged_etl::adapters::{LocalObjectStore, PgExecutor};
use staged_etl::core::{ObjectStore, RequestStatus};
use staged_etl::domain::credentials::CredentialSet;
use staged_etl::domain::ports::CredentialProvider;
use staged_etl::utils::error::{ErrorKind, FailureClass};
use staged_etl::utils::logger::{self, LogOptions};
use staged_etl::utils::monitor::SystemMonitor;
use staged_etl::utils::validation::Validate;
use staged_etl::{
    CliConfig, EnvCredentialProvider, EtlError, FileCredentialProvider, MergeScript, PipelineFile, PipelineRunner,
    RunPlan,
};
use std::sync::Arc;

const EXIT_CONFIG: i32 = 78;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<EtlError>() {
            Some(etl) => {
                tracing::error!("❌ {} (kind: {}, class: {})", etl, etl.kind(), etl.class());
                eprintln!("❌ {}", etl);
                eprintln!("💡 建議: {}", etl.recovery_suggestion());
                match (etl.kind(), etl.class()) {
                    (ErrorKind::Config, _) => EXIT_CONFIG,
                    (_, FailureClass::Transient) => 75,
                    _ => 1,
                }
            }
            None => {
                tracing::error!("❌ {:#}", e);
                eprintln!("❌ {:#}", e);
                1
            }
        },
    };
    std::process::exit(code);
}

async fn run(cli: CliConfig) -> anyhow::Result<i32> {
    let pipeline = match PipelineFile::from_file(&cli.config) {
        Ok(p) => p,
        Err(e) => {
            // logger 尚未初始化
            eprintln!("❌ {}", e);
            return Ok(EXIT_CONFIG);
        }
    };

    let log_file = cli
        .log_dir
        .as_ref()
        .map(|dir| logger::log_file_path(dir, cli.log_name(&pipeline.pipeline.name), chrono::Local::now()));
    logger::init_logger(&LogOptions {
        verbose: cli.verbose,
        json: cli.json_logs,
        file: log_file.clone(),
    })
    .context("cannot initialise logging")?;

    tracing::info!("Starting staged-etl pipeline {}", pipeline.pipeline.name);
    if let Some(path) = &log_file {
        tracing::info!("📝 Logging to {}", path.display());
    }
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    cli.validate()?;
    pipeline.validate()?;
    let plan = pipeline.plan()?;
    if let Some(selected) = cli.selected_runs() {
        if let Some(unknown) = selected.iter().find(|name| plan.request(name).is_none()) {
            return Err(EtlError::InvalidConfigValueError {
                field: "--run".to_string(),
                value: unknown.clone(),
                reason: "no run with this name in the pipeline config".to_string(),
            }
            .into());
        }
    }

    let provider: Arc<dyn CredentialProvider> = match &cli.credentials {
        Some(path) => Arc::new(FileCredentialProvider::new(path)),
        None => Arc::new(EnvCredentialProvider::new()),
    };

    if cli.dry_run {
        print_scripts(&cli, &pipeline, &plan, provider.as_ref()).await;
        return Ok(0);
    }

    let creds = provider.credentials().await?;
    let executor = Arc::new(PgExecutor::connect_lazy(&creds.db));

    if let Some(dir) = &cli.local_storage {
        tracing::info!("📁 Staging into local directory {}", dir.display());
        let store = Arc::new(LocalObjectStore::new(dir));
        return execute(&cli, &pipeline, &plan, store, executor, provider).await;
    }
    stage_to_s3(&cli, &pipeline, &plan, &creds, executor, provider).await
}

#[cfg(feature = "aws")]
async fn stage_to_s3(
    cli: &CliConfig,
    pipeline: &PipelineFile,
    plan: &RunPlan,
    creds: &CredentialSet,
    executor: Arc<PgExecutor>,
    provider: Arc<dyn CredentialProvider>,
) -> anyhow::Result<i32> {
    let store = staged_etl::adapters::S3ObjectStore::from_credentials(creds, cli.s3_endpoint.as_deref()).await;
    execute(cli, pipeline, plan, Arc::new(store), executor, provider).await
}

#[cfg(not(feature = "aws"))]
async fn stage_to_s3(
    _cli: &CliConfig,
    _pipeline: &PipelineFile,
    _plan: &RunPlan,
    _creds: &CredentialSet,
    _executor: Arc<PgExecutor>,
    _provider: Arc<dyn CredentialProvider>,
) -> anyhow::Result<i32> {
    Err(EtlError::config("built without S3 support; pass --local-storage DIR").into())
}

async fn execute<S: ObjectStore>(
    cli: &CliConfig,
    pipeline: &PipelineFile,
    plan: &RunPlan,
    store: Arc<S>,
    executor: Arc<PgExecutor>,
    provider: Arc<dyn CredentialProvider>,
) -> anyhow::Result<i32> {
    if cli.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }
    let runner = PipelineRunner::new(store, executor, provider, pipeline.load.options())
        .with_http_client(pipeline.http_client()?)
        .with_concurrency(pipeline.pipeline.concurrent_requests)
        .with_monitor(SystemMonitor::new(cli.monitor));

    let report = runner.run_schedule(plan, cli.selected_runs()).await;

    for request in &report.requests {
        match request.status {
            RequestStatus::Completed => println!("✅ {}", request.name),
            RequestStatus::Failed => println!("❌ {}", request.name),
            RequestStatus::NotStarted => println!(
                "⏸️ {} (not started, {} failed)",
                request.name,
                request.blocked_by.as_deref().unwrap_or("an earlier run")
            ),
        }
        for outcome in &request.outcomes {
            println!("   {:<20} {:?} {}", outcome.table, outcome.status, outcome.summary());
            if let Some(err) = &outcome.error {
                println!("   {:<20} {} {} while {}: {}", "", err.kind, err.class, err.stage, err.message);
            }
        }
    }

    let code = report.exit_code();
    tracing::info!("Finished with exit code {}", code);
    Ok(code)
}

/// 只輸出 SQL，不碰 storage 或 warehouse
async fn print_scripts(cli: &CliConfig, pipeline: &PipelineFile, plan: &RunPlan, provider: &dyn CredentialProvider) {
    let creds: Option<CredentialSet> = match provider.credentials().await {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!("⚠️ Credentials unavailable, using placeholders: {}", e);
            None
        }
    };
    let storage = creds.as_ref().map(|c| c.storage());
    let role = creds
        .as_ref()
        .map(|c| c.redshift_iam_role.clone())
        .unwrap_or_else(|| "<redshift-iam-role>".to_string());
    let max_rejected = pipeline.load.reject_policy().max_rejected();

    for request in plan.ordered() {
        if let Some(selected) = cli.selected_runs() {
            if !selected.contains(&request.name) {
                continue;
            }
        }
        println!("-- run {}", request.name);
        for table in plan.tables_for(request) {
            let location = match &storage {
                Some(storage) => table.object_location(storage),
                None => staged_etl::domain::table::ObjectLocation::new("<bucket>", table.object_file.clone()),
            };
            println!("-- table {} ({})", table.name, table.source.describe());
            println!("{}\n", MergeScript::for_table(table, &location, &role, max_rejected).render());
        }
    }
}
