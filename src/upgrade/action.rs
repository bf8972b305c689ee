//! Delayed system actions: reboot and factory reset.
//!
//! The HTTP response goes out first; the action fires after `delay` on a
//! background task so the client sees the acknowledgement.

use super::types::SystemActionConfig;

pub struct SystemAction {
    config: SystemActionConfig,
}

impl SystemAction {
    pub fn new(config: SystemActionConfig) -> Self {
        Self { config }
    }

    /// Schedule the action on a background task and return immediately.
    pub fn trigger(&self) -> tokio::task::JoinHandle<()> {
        let config = self.config.clone();
        tracing::info!(
            "{} requested, firing in {:?}{}",
            config.name,
            config.delay,
            if config.simulate { " (simulated)" } else { "" }
        );

        tokio::spawn(async move {
            tokio::time::sleep(config.delay).await;
            fire(&config).await;
        })
    }
}

async fn fire(config: &SystemActionConfig) {
    let Some((program, args)) = config.command.split_first() else {
        tracing::info!("{}: no command configured, nothing to run", config.name);
        return;
    };

    if config.simulate {
        tracing::info!("{}: simulated, would run {}", config.name, config.command.join(" "));
        return;
    }

    tracing::warn!("{}: running {}", config.name, config.command.join(" "));
    match tokio::process::Command::new(program).args(args).status().await {
        Ok(status) if status.success() => {
            tracing::info!("{}: command finished", config.name);
        }
        Ok(status) => {
            tracing::error!("{}: command exited with {}", config.name, status);
        }
        Err(e) => {
            tracing::error!("{}: failed to run {}: {}", config.name, program, e);
        }
    }
}
