//! Process signals that end the daemon.

use tokio::signal;

/// Shutdown signal handlers, installed up front so no signal is missed
/// between startup and the main wait.
pub struct ShutdownSignals {
    #[cfg(unix)]
    terminate: signal::unix::Signal,
    #[cfg(unix)]
    hangup: signal::unix::Signal,
    #[cfg(unix)]
    quit: signal::unix::Signal,
}

impl ShutdownSignals {
    /// Installs handlers for SIGTERM, SIGHUP and SIGQUIT. Ctrl+C is
    /// handled on every platform.
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use signal::unix::{signal as handler, SignalKind};
            Ok(Self {
                terminate: handler(SignalKind::terminate())?,
                hangup: handler(SignalKind::hangup())?,
                quit: handler(SignalKind::quit())?,
            })
        }
        #[cfg(not(unix))]
        Ok(Self {})
    }

    /// Waits for the first shutdown signal and returns its name.
    pub async fn recv(&mut self) -> &'static str {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let unix = async {
            tokio::select! {
                _ = self.terminate.recv() => "SIGTERM",
                _ = self.hangup.recv() => "SIGHUP",
                _ = self.quit.recv() => "SIGQUIT",
            }
        };

        #[cfg(not(unix))]
        let unix = std::future::pending::<&'static str>();

        tokio::select! {
            _ = ctrl_c => "SIGINT",
            name = unix => name,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn send(signal: &str) {
        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("kill -{} {}", signal, std::process::id()))
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn hangup_and_quit_request_shutdown() {
        let mut signals = ShutdownSignals::install().unwrap();

        send("HUP");
        let name = tokio::time::timeout(Duration::from_secs(2), signals.recv())
            .await
            .unwrap();
        assert_eq!(name, "SIGHUP");

        send("QUIT");
        let name = tokio::time::timeout(Duration::from_secs(2), signals.recv())
            .await
            .unwrap();
        assert_eq!(name, "SIGQUIT");
    }
}
