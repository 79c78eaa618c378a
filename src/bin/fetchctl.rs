//! Minimal CLI wiring for the downloader core (SPEC_FULL §1: "CLI,
//! configuration loading... remain a non-goal", so argument parsing here is
//! deliberately hand-rolled rather than pulling in a parser crate).
//!
//! Usage: `fetchctl <url> <destination> [max-workers]`
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use swarmdl::collaborators::{InMemoryTaskManager, ReqwestHttpClient, TokioFileManager};
use swarmdl::config::ModeratorConfig;
use swarmdl::dispatch::{Listener, TokioExecutor};
use swarmdl::{DownloadEvent, Moderator, Task, TaskId, TaskState};
use tokio::sync::mpsc;

fn print_usage() {
    eprintln!("usage: fetchctl <url> <destination> [max-workers]");
}

/// Forwards terminal state transitions of one task onto a channel so
/// `main` can await completion instead of polling.
struct CompletionListener {
    task_id: TaskId,
    tx: mpsc::UnboundedSender<(TaskState, Option<String>)>,
}

impl Listener for CompletionListener {
    fn on_event(&self, event: DownloadEvent) {
        if let DownloadEvent::TaskStateChanged {
            task_id,
            state,
            message,
        } = event
        {
            if task_id == self.task_id && state.is_terminal() {
                let _ = self.tx.send((state, message));
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    swarmdl::logging::init();

    let mut args = std::env::args().skip(1);
    let (Some(url), Some(destination)) = (args.next(), args.next()) else {
        print_usage();
        return ExitCode::FAILURE;
    };
    let max_workers: usize = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(ModeratorConfig::default().max_workers);

    let config = ModeratorConfig {
        max_workers,
        ..ModeratorConfig::default()
    };

    let http = Arc::new(ReqwestHttpClient::new(
        config.connect_timeout,
        config.read_timeout,
    ));
    let file_manager = Arc::new(TokioFileManager::new());
    let task_manager = Arc::new(InMemoryTaskManager::new());
    let moderator = Moderator::new(config.clone(), http, file_manager, task_manager);

    let task = Task::new_request(
        url,
        destination,
        config.default_max_chunks,
        config.default_max_parallel_connections,
    )
    .with_resumable(true);
    let inserted = moderator.add_task(task).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    moderator.register_listener(
        Arc::new(CompletionListener {
            task_id: inserted.id,
            tx,
        }),
        Arc::new(TokioExecutor),
    );

    moderator.start();

    let progress = {
        let moderator = moderator.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                println!("{} B/s", moderator.get_speed());
            }
        })
    };

    let outcome = rx.recv().await;
    progress.abort();
    moderator.release().await;

    match outcome {
        Some((TaskState::Finished, _)) => {
            println!("finished: {}", inserted.destination);
            ExitCode::SUCCESS
        }
        Some((TaskState::Failed, message)) => {
            eprintln!("failed: {}", message.unwrap_or_default());
            ExitCode::FAILURE
        }
        _ => ExitCode::FAILURE,
    }
}
