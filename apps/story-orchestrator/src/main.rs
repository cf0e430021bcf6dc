use anyhow::Result;
use std::str::FromStr;
use std::sync::Arc;
use story_orchestrator::config::Config;
use story_orchestrator::gpu_gate::GpuGate;
use story_orchestrator::metrics::Metrics;
use story_orchestrator::pipeline::align::AlignStep;
use story_orchestrator::pipeline::clone::CloneStep;
use story_orchestrator::pipeline::collaborators::{FakeTtsCloner, HashedBagOfWordsEmbedding, SubprocessTtsCloner, TtsCloner};
use story_orchestrator::pipeline::scoring::ScoringWeights;
use story_orchestrator::pipeline::sequence::SequenceStep;
use story_orchestrator::pipeline::trim::TrimStep;
use story_orchestrator::pipeline::{Pipeline, StepTimeouts};
use story_orchestrator::registry::TaskRegistry;
use story_orchestrator::scheduler::Scheduler;
use story_orchestrator::AppState;
use story_orchestrator::error::OrchestratorError;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::JsonFields;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

#[tokio::main]
async fn main() -> Result<()> {
	dotenv::dotenv().ok();
	let config = Config::load();
	config.validate().map_err(anyhow::Error::msg)?;

	init_tracing(&config);

	let config = Arc::new(config);
	let registry = TaskRegistry::load(config.data_root.clone()).await?;
	let metrics = Arc::new(Metrics::new()?);
	let gpu_gate = GpuGate::new(config.gpu_permits);

	let cloner: Arc<dyn TtsCloner> = if config.fake_cloner {
		Arc::new(FakeTtsCloner::default())
	} else {
		Arc::new(SubprocessTtsCloner {
			binary: config.clone_helper_bin.clone(),
			timeout: config.subprocess_timeout,
		})
	};

	let pipeline = Arc::new(Pipeline {
		registry: registry.clone(),
		gpu_gate,
		metrics: metrics.clone(),
		timeouts: StepTimeouts {
			clone: config.step_clone_timeout,
			trim: config.step_trim_timeout,
			sequence: config.step_sequence_timeout,
			align: config.step_align_timeout,
		},
		executors: [
			Box::new(CloneStep { cloner }),
			Box::new(TrimStep),
			Box::new(SequenceStep {
				weights: ScoringWeights::default(),
				embedder: Box::new(HashedBagOfWordsEmbedding::default()),
			}),
			Box::new(AlignStep),
		],
	});

	let scheduler = Scheduler::start(config.queue_capacity, config.worker_count, pipeline, metrics.clone());

	let state = Arc::new(AppState {
		registry,
		scheduler,
		metrics,
		config: config.clone(),
	});

	let app = story_orchestrator::routes::router().with_state(state).layer(
		ServiceBuilder::new()
			.layer(axum::error_handling::HandleErrorLayer::new(|error: BoxError| async move { handle_tower_error(error).await }))
			.layer(TimeoutLayer::new(config.request_timeout))
			.layer(TraceLayer::new_for_http()),
	);

	let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
	tracing::info!(addr = %config.bind_addr, "story-orchestrator listening");

	let shutdown_token = CancellationToken::new();
	let signal_token = shutdown_token.clone();
	tokio::spawn(async move {
		wait_for_shutdown_signal().await;
		tracing::info!("shutdown signal received");
		signal_token.cancel();
	});

	let server_token = shutdown_token.clone();
	axum::serve(listener, app)
		.with_graceful_shutdown(async move { server_token.cancelled().await })
		.await?;

	tracing::info!("story-orchestrator stopped");
	Ok(())
}

async fn handle_tower_error(error: BoxError) -> OrchestratorError {
	if error.is::<tower::timeout::error::Elapsed>() {
		tracing::warn!("request timeout: {error}");
		OrchestratorError::RequestTimeout
	} else {
		tracing::error!("unhandled tower error: {error}");
		OrchestratorError::Internal(error.to_string())
	}
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {},
		_ = terminate => {},
	}
}

fn init_tracing(config: &Config) {
	let filter = config
		.rust_log
		.as_deref()
		.and_then(|s| EnvFilter::from_str(s).ok())
		.unwrap_or_else(|| EnvFilter::new("info"));

	tracing_subscriber::registry()
		.with(if config.log_json {
			Box::new(
				tracing_subscriber::fmt::layer()
					.fmt_fields(JsonFields::default())
					.event_format(tracing_subscriber::fmt::format().json().flatten_event(true).with_span_list(false))
					.with_filter(filter),
			) as Box<dyn Layer<_> + Send + Sync>
		} else {
			Box::new(tracing_subscriber::fmt::layer().event_format(tracing_subscriber::fmt::format().pretty()).with_filter(filter))
		})
		.init();
}
