use tracing::{debug, error, info, warn};

/// Indirection over the logging sink so the core doesn't hard-wire a global
/// tracing subscriber into its call paths. The default implementation just
/// forwards to `tracing`; a deployment that wants structured shipping to a
/// different sink can swap this without touching accumulator/governance code.
pub trait GatewayLogger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

#[derive(Clone, Copy, Default)]
pub struct TracingLogger;

impl GatewayLogger for TracingLogger {
    fn debug(&self, message: &str) {
        debug!("{}", message);
    }

    fn info(&self, message: &str) {
        info!("{}", message);
    }

    fn warn(&self, message: &str) {
        warn!("{}", message);
    }

    fn error(&self, message: &str) {
        error!("{}", message);
    }
}
