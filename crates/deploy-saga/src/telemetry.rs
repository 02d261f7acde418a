//! Log output setup for binaries and tests embedding the orchestrator.

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogFormat {
	/// Single-line human readable output
	#[default]
	Compact,
	/// One JSON object per line, span fields included
	Json,
}

/// Install a global subscriber writing to stderr.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Returns `false`
/// if a global subscriber was already installed, in which case nothing
/// changes.
pub fn init(format: LogFormat) -> bool {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let layer = match format {
		LogFormat::Compact => tracing_subscriber::fmt::layer()
			.compact()
			.with_target(true)
			.with_writer(std::io::stderr)
			.boxed(),
		LogFormat::Json => tracing_subscriber::fmt::layer()
			.json()
			.with_current_span(true)
			.with_span_list(false)
			.with_writer(std::io::stderr)
			.boxed(),
	};
	Registry::default()
		.with(layer.with_filter(filter))
		.try_init()
		.is_ok()
}
