//! The agent's single polling task. Metrics, service scans and command polls
//! each keep their own cadence; a failing activity backs off on its own
//! without delaying the other two.

use async_trait::async_trait;
use fleetwatch_common::wire::{CommandResultRequest, MetricsPayload, ServiceReport};
use fleetwatch_common::CommandStatus;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::agent_modules::command::execution::execute_script;
use crate::agent_modules::command::{power_acknowledgement, reports_before_running};
use crate::agent_modules::communication::GatewayApi;
use crate::agent_modules::config::AgentConfig;
use crate::agent_modules::error::AgentError;
use crate::agent_modules::metrics::MetricsCollector;
use crate::agent_modules::service_monitor::{scan_services, PROBE_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Metrics,
    Services,
    Commands,
}

#[derive(Debug, Clone)]
struct Cadence {
    period: Duration,
    next_due: Instant,
    failures: u32,
}

impl Cadence {
    fn new(period: Duration, start: Instant) -> Self {
        Self {
            period,
            next_due: start,
            failures: 0,
        }
    }
}

/// Next-due instants for the three activities.
#[derive(Debug, Clone)]
pub struct Schedule {
    metrics: Cadence,
    services: Cadence,
    commands: Cadence,
    max_backoff: Duration,
}

impl Schedule {
    /// Everything is due immediately at `start`.
    pub fn new(config: &AgentConfig, start: Instant) -> Self {
        Self {
            metrics: Cadence::new(config.metrics_interval(), start),
            services: Cadence::new(config.services_interval(), start),
            commands: Cadence::new(config.command_poll_interval(), start),
            max_backoff: config.max_backoff(),
        }
    }

    fn cadence(&self, activity: Activity) -> &Cadence {
        match activity {
            Activity::Metrics => &self.metrics,
            Activity::Services => &self.services,
            Activity::Commands => &self.commands,
        }
    }

    fn cadence_mut(&mut self, activity: Activity) -> &mut Cadence {
        match activity {
            Activity::Metrics => &mut self.metrics,
            Activity::Services => &mut self.services,
            Activity::Commands => &mut self.commands,
        }
    }

    pub fn due_at(&self, activity: Activity) -> Instant {
        self.cadence(activity).next_due
    }

    /// Earliest due activity. Ties go to metrics, then services.
    pub fn next_due(&self) -> (Activity, Instant) {
        [Activity::Metrics, Activity::Services, Activity::Commands]
            .into_iter()
            .map(|a| (a, self.due_at(a)))
            .fold(None, |best: Option<(Activity, Instant)>, candidate| match best {
                Some(b) if b.1 <= candidate.1 => Some(b),
                _ => Some(candidate),
            })
            .unwrap_or((Activity::Metrics, self.metrics.next_due))
    }

    /// Keeps the fixed cadence, skipping slots that were missed.
    pub fn succeeded(&mut self, activity: Activity, now: Instant) {
        let cadence = self.cadence_mut(activity);
        cadence.failures = 0;
        let next = cadence.next_due + cadence.period;
        cadence.next_due = if next > now { next } else { now + cadence.period };
    }

    /// Doubles the delay per consecutive failure up to `max_backoff`.
    /// Returns the delay applied.
    pub fn failed(&mut self, activity: Activity, now: Instant) -> Duration {
        let max_backoff = self.max_backoff;
        let cadence = self.cadence_mut(activity);
        cadence.failures = cadence.failures.saturating_add(1);
        let factor = 2u32.saturating_pow(cadence.failures);
        let delay = cadence
            .period
            .saturating_mul(factor)
            .min(max_backoff.max(cadence.period));
        cadence.next_due = now + delay;
        delay
    }
}

/// Local sources of telemetry.
#[async_trait]
pub trait HostProbe: Send {
    async fn sample(&mut self) -> MetricsPayload;

    async fn services(&mut self) -> Vec<ServiceReport>;
}

pub struct LocalHost {
    collector: MetricsCollector,
    watched_services: Vec<String>,
}

impl LocalHost {
    pub fn new(collector: MetricsCollector, watched_services: Vec<String>) -> Self {
        Self {
            collector,
            watched_services,
        }
    }
}

#[async_trait]
impl HostProbe for LocalHost {
    async fn sample(&mut self) -> MetricsPayload {
        self.collector.collect().await
    }

    async fn services(&mut self) -> Vec<ServiceReport> {
        scan_services(&self.watched_services, PROBE_TIMEOUT).await
    }
}

pub struct PollLoop<G, H> {
    gateway: Arc<G>,
    host: H,
    schedule: Schedule,
    command_timeout: Duration,
    /// Results not yet accepted by the gateway, oldest first.
    unreported: VecDeque<CommandResultRequest>,
}

impl<G: GatewayApi, H: HostProbe> PollLoop<G, H> {
    pub fn new(gateway: Arc<G>, host: H, config: &AgentConfig) -> Self {
        Self {
            gateway,
            host,
            schedule: Schedule::new(config, Instant::now()),
            command_timeout: config.command_timeout(),
            unreported: VecDeque::new(),
        }
    }

    pub fn unreported(&self) -> usize {
        self.unreported.len()
    }

    /// Runs until `shutdown` flips to `true` or its sender goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Agent poll loop started.");
        loop {
            let (activity, due) = self.schedule.next_due();
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = sleep_until(due) => {}
            }

            match self.run_activity(activity).await {
                Ok(()) => self.schedule.succeeded(activity, Instant::now()),
                Err(e) => {
                    let delay = self.schedule.failed(activity, Instant::now());
                    if e.is_fatal() {
                        error!(activity = ?activity, error = %e, retry_in_secs = delay.as_secs(), "Gateway no longer accepts this agent.");
                    } else {
                        warn!(activity = ?activity, error = %e, retry_in_secs = delay.as_secs(), "Activity failed, backing off.");
                    }
                }
            }
        }
        if !self.unreported.is_empty() {
            warn!(count = self.unreported.len(), "Stopping with unreported command results.");
        }
        info!("Agent poll loop stopped.");
    }

    pub async fn run_activity(&mut self, activity: Activity) -> Result<(), AgentError> {
        match activity {
            Activity::Metrics => self.push_metrics().await,
            Activity::Services => self.push_services().await,
            Activity::Commands => self.poll_commands().await,
        }
    }

    async fn push_metrics(&mut self) -> Result<(), AgentError> {
        let payload = self.host.sample().await;
        self.gateway.push_metrics(&payload).await?;
        info!(
            cpu = payload.cpu_usage,
            memory = payload.memory.percent,
            disk = payload.disk.percent,
            "Metrics sent."
        );
        Ok(())
    }

    async fn push_services(&mut self) -> Result<(), AgentError> {
        let services = self.host.services().await;
        if services.is_empty() {
            debug!("No watched services present; nothing to send.");
            return Ok(());
        }
        self.gateway.push_services(&services).await?;
        info!(count = services.len(), "Service states sent.");
        Ok(())
    }

    /// Retries leftover results, then claims and runs new commands in
    /// creation order.
    async fn poll_commands(&mut self) -> Result<(), AgentError> {
        self.flush_results().await?;

        let commands = self.gateway.claim_commands().await?;
        let mut deferred: Option<AgentError> = None;
        for command in commands {
            info!(command_id = %command.id, command_type = %command.command_type, "Running command.");
            if reports_before_running(&command) {
                self.unreported.push_back(CommandResultRequest {
                    id: command.id,
                    output: power_acknowledgement(&command),
                    status: CommandStatus::Completed,
                });
                if let Err(e) = self.flush_results().await {
                    deferred.get_or_insert(e);
                }
                let outcome = execute_script(&command.command, self.command_timeout).await;
                if outcome.status == CommandStatus::Failed {
                    error!(command_id = %command.id, output = %outcome.output, "Power command failed after it was acknowledged.");
                }
                continue;
            }

            let outcome = execute_script(&command.command, self.command_timeout).await;
            self.unreported.push_back(CommandResultRequest {
                id: command.id,
                output: outcome.output,
                status: outcome.status,
            });
            if let Err(e) = self.flush_results().await {
                deferred.get_or_insert(e);
            }
        }

        match deferred {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stops at the first result the gateway may accept later. Results it
    /// rejects outright are dropped.
    async fn flush_results(&mut self) -> Result<(), AgentError> {
        while let Some(result) = self.unreported.front() {
            let id = result.id;
            match self.gateway.report_result(result).await {
                Ok(()) => {
                    info!(command_id = %id, "Command result reported.");
                    self.unreported.pop_front();
                }
                Err(e) if e.is_transient() || matches!(e, AgentError::Unauthorized) => {
                    return Err(e);
                }
                Err(e) => {
                    warn!(command_id = %id, error = %e, "Gateway refused command result, dropping it.");
                    self.unreported.pop_front();
                }
            }
        }
        Ok(())
    }
}
