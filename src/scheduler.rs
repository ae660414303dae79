use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::dashboard::{Dashboard, DashboardView};
use crate::error::FetchError;
use crate::fetcher::SnapshotSource;
use crate::messages::{ControlAction, DeviceSnapshot};
use crate::store::KeyValueStore;

type FetchResult = Result<Vec<DeviceSnapshot>, FetchError>;

/// Re-entrancy guard for fetch cycles. At most one fetch is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Fetching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    /// The poll interval elapsed.
    Tick,
    /// Out-of-cycle request: console refresh, control acknowledgement.
    Trigger,
    /// The outstanding fetch succeeded, failed or timed out.
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleAction {
    Dispatch,
    Drop,
    Release,
    Ignore,
}

impl CycleState {
    pub fn on(self, event: CycleEvent) -> (CycleState, CycleAction) {
        match (self, event) {
            (CycleState::Idle, CycleEvent::Tick | CycleEvent::Trigger) => {
                (CycleState::Fetching, CycleAction::Dispatch)
            }
            (CycleState::Fetching, CycleEvent::Tick | CycleEvent::Trigger) => {
                (CycleState::Fetching, CycleAction::Drop)
            }
            (CycleState::Fetching, CycleEvent::Settled) => (CycleState::Idle, CycleAction::Release),
            (CycleState::Idle, CycleEvent::Settled) => (CycleState::Idle, CycleAction::Ignore),
        }
    }
}

/// User actions and triggers delivered to a running scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Refresh,
    Select(String),
    ClearSelection,
    ResetOne(String),
    ResetAll,
    Control(String, ControlAction),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorStatus {
    pub view: DashboardView,
    pub stats: CycleStats,
}

/// Drives fetch + reconcile cycles on a fixed interval and on demand.
pub struct PollScheduler<S, K> {
    source: Arc<S>,
    dashboard: Dashboard<K>,
    interval: Duration,
    fetch_timeout: Duration,
}

/// Handle to a running scheduler. Dropping it stops the scheduler.
pub struct SchedulerHandle<K> {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Dashboard<K>>>,
    status: watch::Receiver<MonitorStatus>,
}

async fn settle(in_flight: &mut Option<BoxFuture<'static, FetchResult>>) -> FetchResult {
    match in_flight {
        Some(fetch) => fetch.await,
        None => std::future::pending().await,
    }
}

impl<S, K> PollScheduler<S, K>
where
    S: SnapshotSource,
    K: KeyValueStore + 'static,
{
    pub fn new(
        source: Arc<S>,
        dashboard: Dashboard<K>,
        interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        PollScheduler {
            source,
            dashboard,
            interval,
            fetch_timeout,
        }
    }

    /// Spawn the cycle loop. The first cycle runs immediately.
    pub fn start(self) -> SchedulerHandle<K> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (status_tx, status_rx) = watch::channel(MonitorStatus {
            view: self.dashboard.view(),
            stats: CycleStats::default(),
        });

        let task = tokio::spawn(self.run(commands_tx.clone(), commands_rx, shutdown_rx, status_tx));

        SchedulerHandle {
            commands: commands_tx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
            status: status_rx,
        }
    }

    async fn run(
        mut self,
        commands_tx: mpsc::UnboundedSender<Command>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut shutdown: oneshot::Receiver<()>,
        status: watch::Sender<MonitorStatus>,
    ) -> Dashboard<K> {
        info!("Polling every {:?}", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut state = CycleState::Idle;
        let mut in_flight = None;
        let mut stats = CycleStats::default();
        let mut controls = JoinSet::new();

        loop {
            let event = tokio::select! {
                // Shutdown is polled first so a response that is ready at the
                // same time never commits.
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => CycleEvent::Tick,
                Some(command) = commands.recv() => match self.apply_command(command, &commands_tx, &mut controls) {
                    Some(event) => event,
                    None => {
                        self.publish(&status, stats);
                        continue;
                    }
                },
                result = settle(&mut in_flight) => {
                    in_flight = None;
                    match result {
                        Ok(roster) => {
                            self.dashboard.apply_snapshot(roster);
                            stats.completed += 1;
                        }
                        Err(err) => {
                            error!("Status refresh failed: {}", err);
                            stats.failed += 1;
                        }
                    }
                    CycleEvent::Settled
                }
                Some(joined) = controls.join_next() => {
                    if let Err(err) = joined {
                        error!("Control task failed: {}", err);
                    }
                    continue;
                }
            };

            let (next, action) = state.on(event);
            state = next;
            match action {
                CycleAction::Dispatch => in_flight = Some(self.dispatch()),
                CycleAction::Drop => {
                    debug!("Cycle already in flight, dropping {:?}", event);
                    stats.dropped += 1;
                }
                CycleAction::Release | CycleAction::Ignore => {}
            }
            self.publish(&status, stats);
        }

        self.dashboard.end_session();
        if in_flight.take().is_some() {
            debug!("Discarding in-flight fetch");
        }
        if !controls.is_empty() {
            debug!("Aborting {} pending control requests", controls.len());
            controls.abort_all();
        }
        self.publish(&status, stats);
        info!("Polling stopped");
        self.dashboard
    }

    fn dispatch(&self) -> BoxFuture<'static, FetchResult> {
        let source = Arc::clone(&self.source);
        let limit = self.fetch_timeout;
        async move {
            match tokio::time::timeout(limit, source.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(limit)),
            }
        }
        .boxed()
    }

    /// Handle a command; returns the cycle event it raises, if any.
    fn apply_command(
        &mut self,
        command: Command,
        commands_tx: &mpsc::UnboundedSender<Command>,
        controls: &mut JoinSet<()>,
    ) -> Option<CycleEvent> {
        match command {
            Command::Refresh => return Some(CycleEvent::Trigger),
            Command::Select(name) => {
                self.dashboard.select(&name);
            }
            Command::ClearSelection => self.dashboard.clear_selection(),
            Command::ResetOne(name) => self.dashboard.reset_one(&name),
            Command::ResetAll => self.dashboard.reset_all(),
            Command::Control(name, action) => {
                let source = Arc::clone(&self.source);
                let commands = commands_tx.clone();
                let limit = self.fetch_timeout;
                controls.spawn(async move {
                    match tokio::time::timeout(limit, source.control(&name, action)).await {
                        Ok(Ok(())) => {
                            info!("{:?} acknowledged for {}", action, name);
                            // A closed channel means the session already ended.
                            let _ = commands.send(Command::Refresh);
                        }
                        Ok(Err(err)) => error!("{:?} for {} failed: {}", action, name, err),
                        Err(_) => error!("{:?} for {} timed out after {:?}", action, name, limit),
                    }
                });
            }
        }
        None
    }

    fn publish(&self, status: &watch::Sender<MonitorStatus>, stats: CycleStats) {
        let next = MonitorStatus {
            view: self.dashboard.view(),
            stats,
        };
        status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl<K> SchedulerHandle<K> {
    pub fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Scheduler stopped, dropping command");
        }
    }

    pub fn status(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }

    /// Stop polling and hand back the final dashboard. Only the first call
    /// returns it.
    pub async fn stop(&mut self) -> Option<Dashboard<K>> {
        let shutdown = self.shutdown.take()?;
        let _ = shutdown.send(());
        let task = self.task.take()?;
        match task.await {
            Ok(dashboard) => Some(dashboard),
            Err(err) => {
                error!("Scheduler task failed: {}", err);
                None
            }
        }
    }
}
