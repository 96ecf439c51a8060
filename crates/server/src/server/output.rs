use tracing::info;

/// Receives the human-readable progress lines of a server, such as
/// `Starting server on 0.0.0.0:8080...`.
pub trait Output {
    fn writeln(&self, line: &str);
}

/// Forwards progress lines to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOutput;

impl Output for TracingOutput {
    fn writeln(&self, line: &str) {
        info!("{line}");
    }
}

impl<F: Fn(&str)> Output for F {
    fn writeln(&self, line: &str) {
        self(line);
    }
}
