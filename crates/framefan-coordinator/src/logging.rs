//! Structured render logging.

use framefan_models::RenderId;
use tracing::{error, info, warn, Span};

/// Logs render lifecycle events with the render ID and operation attached.
#[derive(Debug, Clone)]
pub struct RenderLogger {
    render_id: String,
    operation: String,
}

impl RenderLogger {
    pub fn new(render_id: &RenderId, operation: &str) -> Self {
        Self {
            render_id: render_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            render_id = %self.render_id,
            operation = %self.operation,
            "Render started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            render_id = %self.render_id,
            operation = %self.operation,
            "Render progress: {}", message
        );
    }

    /// Log an event about one chunk attempt.
    pub fn log_chunk(&self, chunk: u32, attempt: u32, message: &str) {
        info!(
            render_id = %self.render_id,
            operation = %self.operation,
            chunk,
            attempt,
            "{}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            render_id = %self.render_id,
            operation = %self.operation,
            "Render warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            render_id = %self.render_id,
            operation = %self.operation,
            "Render error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            render_id = %self.render_id,
            operation = %self.operation,
            "Render completed: {}", message
        );
    }

    pub fn render_id(&self) -> &str {
        &self.render_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the render ID, for instrumenting spawned tasks.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "render",
            render_id = %self.render_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_logger_creation() {
        let render_id = RenderId::parse("abcdef").unwrap();
        let logger = RenderLogger::new(&render_id, "dispatch");

        assert_eq!(logger.render_id(), "abcdef");
        assert_eq!(logger.operation(), "dispatch");
    }
}
