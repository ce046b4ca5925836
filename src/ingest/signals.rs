// Signal handling for graceful shutdown and on-demand reports

use crate::error::{IngestError, Result};
use tokio::signal::unix::{signal, Signal as TokioSignal, SignalKind};

/// Signals the ingestor reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestSignal {
    Terminate,
    Interrupt,
    Hangup,
    /// SIGUSR1: log a status report
    Report,
}

impl IngestSignal {
    pub fn should_shutdown(&self) -> bool {
        matches!(
            self,
            IngestSignal::Terminate | IngestSignal::Interrupt | IngestSignal::Hangup
        )
    }
}

/// Listens for SIGTERM, SIGINT, SIGHUP and SIGUSR1
pub struct SignalHandler {
    sigterm: TokioSignal,
    sigint: TokioSignal,
    sighup: TokioSignal,
    sigusr1: TokioSignal,
}

impl SignalHandler {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sigterm: install(SignalKind::terminate(), "SIGTERM")?,
            sigint: install(SignalKind::interrupt(), "SIGINT")?,
            sighup: install(SignalKind::hangup(), "SIGHUP")?,
            sigusr1: install(SignalKind::user_defined1(), "SIGUSR1")?,
        })
    }

    /// Wait for the next signal
    pub async fn wait(&mut self) -> IngestSignal {
        tokio::select! {
            _ = self.sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                IngestSignal::Terminate
            }
            _ = self.sigint.recv() => {
                tracing::info!("Received SIGINT");
                IngestSignal::Interrupt
            }
            _ = self.sighup.recv() => {
                tracing::info!("Received SIGHUP");
                IngestSignal::Hangup
            }
            _ = self.sigusr1.recv() => {
                tracing::debug!("Received SIGUSR1");
                IngestSignal::Report
            }
        }
    }
}

fn install(kind: SignalKind, name: &str) -> Result<TokioSignal> {
    signal(kind).map_err(|e| IngestError::Io {
        source: e,
        context: format!("Failed to setup {} handler", name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signals() {
        assert!(IngestSignal::Terminate.should_shutdown());
        assert!(IngestSignal::Interrupt.should_shutdown());
        assert!(IngestSignal::Hangup.should_shutdown());
        assert!(!IngestSignal::Report.should_shutdown());
    }
}
