use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use themedex_core::{
	api::{self, ApiState, AuthVerifier},
	catalog::CatalogStore,
	config::{ApiConfig, WorkerConfig},
	job::{JobRunner, Queue, RunnerConfig},
	marketplace,
	preview::PreviewRenderer,
	storage::{ObjectStore, ObjectStoreConfig},
	workers,
};

mod keys;
mod utils;

#[derive(Parser)]
#[command(name = "themedex")]
#[command(about = "Ingestion and search backend for editor color themes", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the HTTP API server
	Api(ApiArgs),

	/// Start the worker process
	Workers(WorkerArgs),

	/// Generate an RSA key pair for signing API tokens
	GenerateKeyset(keys::GenerateKeysetArgs),

	/// Mint a signed API token
	GenerateJwt(keys::GenerateJwtArgs),
}

#[derive(clap::Args)]
struct ApiArgs {
	#[arg(long, default_value = "0.0.0.0")]
	host: String,

	#[arg(long, default_value_t = 8080)]
	port: u16,

	#[arg(long, env = "DATABASE_URL")]
	database_url: String,

	/// PEM file holding the RSA public key bearer tokens are verified with
	#[arg(long, default_value = "key.rsa.pub")]
	public_key_path: PathBuf,

	#[arg(long, default_value = "localhost:8080")]
	issuer: String,
}

#[derive(clap::Args)]
struct WorkerArgs {
	#[arg(long, env = "DATABASE_URL")]
	database_url: String,

	/// Scratch space for per-job downloads
	#[arg(long, default_value = "/tmp")]
	dir: PathBuf,

	#[arg(long, default_value = "http://s3.localhost.localstack.cloud:4566")]
	object_store_endpoint: String,

	#[arg(long, default_value = "images")]
	object_store_bucket: String,

	#[arg(long, default_value = "us-east-1")]
	object_store_region: String,

	#[arg(long, default_value = "test")]
	object_store_access_key_id: String,

	#[arg(long, default_value = "test")]
	object_store_access_key_secret: String,

	#[arg(long, default_value = "http://s3.localhost.localstack.cloud:4566/images")]
	cdn_base_url: String,

	/// Keep per-job scratch directories around for debugging
	#[arg(long)]
	disable_cleanup: bool,

	/// Maximum number of extensions per scan, 0 for all
	#[arg(long, default_value_t = 0)]
	max_extensions: u64,

	/// Minutes between periodic delta scans
	#[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..=5))]
	scan_interval_minutes: u64,

	/// Command line of the preview renderer
	#[arg(long, default_value = "npx vscodethemes")]
	renderer_command: String,

	/// Working directory the renderer runs in
	#[arg(long, default_value = "cli")]
	renderer_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	use tracing_subscriber::{fmt, prelude::*, EnvFilter};

	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with(fmt::layer())
		.init();

	match Cli::parse().command {
		Commands::Api(args) => {
			run_api(ApiConfig {
				host: args.host,
				port: args.port,
				database_url: args.database_url,
				public_key_path: args.public_key_path,
				issuer: args.issuer,
			})
			.await
		}
		Commands::Workers(args) => {
			run_workers(WorkerConfig {
				database_url: args.database_url,
				directory: args.dir,
				object_store: ObjectStoreConfig {
					endpoint: args.object_store_endpoint,
					bucket: args.object_store_bucket,
					region: args.object_store_region,
					access_key_id: args.object_store_access_key_id,
					access_key_secret: args.object_store_access_key_secret,
					cdn_base_url: args.cdn_base_url,
				},
				disable_cleanup: args.disable_cleanup,
				max_extensions: (args.max_extensions > 0).then_some(args.max_extensions),
				scan_interval: Duration::from_secs(args.scan_interval_minutes * 60),
				renderer_command: args.renderer_command,
				renderer_dir: args.renderer_dir,
			})
			.await
		}
		Commands::GenerateKeyset(args) => keys::generate_keyset(&args),
		Commands::GenerateJwt(args) => keys::generate_jwt(&args),
	}
}

async fn run_api(config: ApiConfig) -> anyhow::Result<()> {
	let pool = PgPoolOptions::new()
		.connect(&config.database_url)
		.await
		.context("failed to create database pool")?;

	sqlx::migrate!("../../core/migrations")
		.run(&pool)
		.await
		.context("failed to run migrations")?;

	let public_key = std::fs::read(&config.public_key_path).with_context(|| {
		format!(
			"failed to read public key from {}",
			config.public_key_path.display()
		)
	})?;
	let auth = AuthVerifier::from_rsa_pem(&public_key, &config.issuer)
		.context("failed to parse public key")?;

	let state = ApiState {
		catalog: CatalogStore::new(pool.clone()),
		queue: Queue::new(pool),
		auth: std::sync::Arc::new(auth),
	};

	let addr: SocketAddr = format!("{}:{}", config.host, config.port)
		.parse()
		.context("invalid host/port")?;
	let listener = tokio::net::TcpListener::bind(addr)
		.await
		.with_context(|| format!("failed to bind {addr}"))?;

	info!("listening on http://{addr}");

	axum::serve(listener, api::router(state))
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
		})
		.await
		.context("http server failed")
}

async fn run_workers(config: WorkerConfig) -> anyhow::Result<()> {
	let pool = PgPoolOptions::new()
		.connect(&config.database_url)
		.await
		.context("failed to create database pool")?;

	sqlx::migrate!("../../core/migrations")
		.run(&pool)
		.await
		.context("failed to run migrations")?;

	let object_store = ObjectStore::new(config.object_store.clone()).await;

	let registry = workers::register_workers(workers::WorkerDeps {
		marketplace: marketplace::Client::new(),
		http: reqwest::Client::new(),
		directory: config.directory.clone(),
		disable_cleanup: config.disable_cleanup,
		object_store,
		renderer: PreviewRenderer::from_command(
			&config.renderer_command,
			config.renderer_dir.clone(),
		),
		catalog: CatalogStore::new(pool.clone()),
	});

	let runner = JobRunner::new(
		pool,
		registry,
		RunnerConfig {
			queues: workers::queue_config(),
			..Default::default()
		},
	)
	.with_periodic_jobs(workers::periodic_jobs(
		config.scan_interval,
		config.max_extensions,
	))
	.with_error_handler(std::sync::Arc::new(workers::LogErrorHandler));

	let handle = runner.start().await.context("failed to start job runner")?;

	info!("waiting for jobs...");

	utils::wait_for_shutdown_signal().await;
	info!("received SIGINT/SIGTERM; initiating soft stop (waiting for jobs to finish)");

	// A second signal skips the grace period and cancels everything.
	{
		let handle = handle.clone();
		tokio::spawn(async move {
			utils::wait_for_shutdown_signal().await;
			info!("received SIGINT/SIGTERM again; initiating hard stop");
			handle.cancel_all();
		});
	}

	handle.stop().await;
	info!("job runner stopped");

	Ok(())
}
