//! Background worker driving the engine through message passing
//!
//! An interactive front end sends [`Action`]s and receives [`Event`]s; slow
//! work (fetching, installing, running) happens on spawned tasks so the
//! front end never blocks. `Action::Abort` cancels every job in flight.

use crate::engine::Engine;
use crate::errors::{GopaError, GopaResult};
use crate::platform::InstallKey;
use crate::sandbox::ExecutionResult;
use crate::version::VersionTag;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Latest,
    ListVersions,
    /// Install the newest release and select it
    Bootstrap,
    Install { tag: String, select: bool },
    Select(InstallKey),
    Run(String),
    Abort,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Latest => "latest",
            Action::ListVersions => "list versions",
            Action::Bootstrap => "bootstrap",
            Action::Install { .. } => "install",
            Action::Select(_) => "select",
            Action::Run(_) => "run",
            Action::Abort => "abort",
        }
    }
}

#[derive(Debug)]
pub enum Event {
    Latest(VersionTag),
    VersionsListed(Vec<VersionTag>),
    Installed { key: InstallKey, selected: bool },
    Selected(InstallKey),
    RunFinished(ExecutionResult),
    Failed { action: &'static str, error: GopaError },
    /// A job stopped because of `Action::Abort`
    Aborted { action: &'static str },
}

pub struct ActionsService {}

impl ActionsService {
    /// Serve actions until the sending side closes, then wait for running jobs
    pub async fn start(
        engine: Arc<Engine>,
        event_tx: mpsc::UnboundedSender<Event>,
        rx: &mut mpsc::UnboundedReceiver<Action>,
    ) -> GopaResult<()> {
        let mut cancel = CancellationToken::new();
        let mut jobs: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                action = rx.recv() => {
                    let Some(action) = action else { break };
                    log::debug!("Worker received {:?}", action.name());

                    let job = match action {
                        Action::Abort => {
                            cancel.cancel();
                            cancel = CancellationToken::new();
                            continue;
                        }
                        Action::Select(key) => {
                            engine.select(key.clone());
                            if event_tx.send(Event::Selected(key)).is_err() {
                                break;
                            }
                            continue;
                        }
                        Action::Latest => Job::Latest,
                        Action::ListVersions => Job::ListVersions,
                        Action::Bootstrap => Job::Bootstrap,
                        Action::Install { tag, select } => Job::Install { tag, select },
                        Action::Run(source) => Job::Run(source),
                    };
                    spawn(&mut jobs, &engine, &event_tx, &cancel, job);
                }
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    if let Err(e) = joined {
                        log::warn!("Worker job ended abnormally: {}", e);
                    }
                }
            }
        }

        while let Some(joined) = jobs.join_next().await {
            if let Err(e) = joined {
                log::warn!("Worker job ended abnormally: {}", e);
            }
        }
        Ok(())
    }
}

/// Slow work that runs on its own task
#[derive(Debug)]
enum Job {
    Latest,
    ListVersions,
    Bootstrap,
    Install { tag: String, select: bool },
    Run(String),
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Job::Latest => "latest",
            Job::ListVersions => "list versions",
            Job::Bootstrap => "bootstrap",
            Job::Install { .. } => "install",
            Job::Run(_) => "run",
        }
    }
}

fn spawn(
    jobs: &mut JoinSet<()>,
    engine: &Arc<Engine>,
    event_tx: &mpsc::UnboundedSender<Event>,
    cancel: &CancellationToken,
    job: Job,
) {
    let engine = engine.clone();
    let event_tx = event_tx.clone();
    let cancel = cancel.clone();
    jobs.spawn(async move {
        let name = job.name();
        let event = match perform(&engine, job, &cancel).await {
            Ok(event) => event,
            Err(GopaError::Cancelled) => Event::Aborted { action: name },
            Err(error) => {
                log::error!("{} failed: {}", name, error);
                Event::Failed { action: name, error }
            }
        };
        if event_tx.send(event).is_err() {
            log::debug!("Event receiver closed before {} finished", name);
        }
    });
}

async fn perform(engine: &Engine, job: Job, cancel: &CancellationToken) -> GopaResult<Event> {
    match job {
        Job::Latest => Ok(Event::Latest(engine.latest(cancel).await?)),
        Job::ListVersions => Ok(Event::VersionsListed(engine.get_versions(cancel).await?)),
        Job::Bootstrap => {
            let key = engine.bootstrap(cancel).await?;
            Ok(Event::Installed { key, selected: true })
        }
        Job::Install { tag, select } => {
            let tag = engine.parse_version(&tag)?;
            let key = if select {
                engine.install_and_select(&tag, cancel).await?
            } else {
                engine.ensure_installed(&tag, cancel).await?
            };
            Ok(Event::Installed { key, selected: select })
        }
        Job::Run(source) => Ok(Event::RunFinished(engine.run(&source, cancel).await?)),
    }
}
