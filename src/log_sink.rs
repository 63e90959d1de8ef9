// Logging setup and the operational alert channel.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::CiError;

/// Target that operational alerting subscribes to.
pub const ALERT_TARGET: &str = "ci_compliance::alert";

/// Install the global fmt subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "ci_compliance=debug,tower_http=debug"
    } else {
        "ci_compliance=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}

/// Report an engine defect on the alert channel and hand the error back.
pub fn alert_defect(component: &str, err: CiError) -> CiError {
    tracing::error!(
        target: ALERT_TARGET,
        component,
        code = err.kind().code(),
        "{err}"
    );
    err
}
