//! `AppState`: the handles every HTTP handler needs, built once in `main`
//! and shared behind an `Arc` so status queries read the registry
//! directly.

use crate::config::Config;
use crate::metrics::Metrics;
use crate::scheduler::Scheduler;
use std::sync::Arc;

use crate::registry::TaskRegistry;

pub struct AppState {
	pub registry: Arc<TaskRegistry>,
	pub scheduler: Arc<Scheduler>,
	pub metrics: Arc<Metrics>,
	pub config: Arc<Config>,
}
