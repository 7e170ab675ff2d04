//! Translates OS signals into worker commands, keeping the worker loop
//! independent of the signal mechanism. Mapping: USR2 pauses, CONT resumes,
//! QUIT stops after the in-flight job, TERM and INT stop immediately.

use crate::error::Result;
use crate::worker::{WorkerCommand, WorkerHandle};

#[cfg(unix)]
pub fn spawn_signal_bridge(handle: WorkerHandle) -> Result<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::info;

    use crate::error::Error;

    let install = |kind: SignalKind| {
        signal(kind).map_err(|err| Error::Config(format!("failed to install signal handler: {err}")))
    };

    let mut usr2 = install(SignalKind::user_defined2())?;
    // SIGCONT has no named constructor.
    let mut cont = install(SignalKind::from_raw(libc::SIGCONT))?;
    let mut quit = install(SignalKind::quit())?;
    let mut term = install(SignalKind::terminate())?;
    let mut int = install(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                _ = usr2.recv() => WorkerCommand::Pause,
                _ = cont.recv() => WorkerCommand::Resume,
                _ = quit.recv() => WorkerCommand::GracefulStop,
                _ = term.recv() => WorkerCommand::ImmediateStop,
                _ = int.recv() => WorkerCommand::ImmediateStop,
            };
            info!(?command, "signal received");
            handle.send(command);
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_signal_bridge(handle: WorkerHandle) -> Result<tokio::task::JoinHandle<()>> {
    // Only ctrl-c is available off unix; map it to immediate stop.
    Ok(tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            handle.send(WorkerCommand::ImmediateStop);
        }
    }))
}
