//! Background classification thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use garbage_core::{ClassifyStage, ModelHandle};

/// Messages from the worker to the UI thread.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorkerEvent {
    Stage(ClassifyStage),
    /// Label or `Error: ...` text.
    Done(String),
}

/// A running classification. Dropping it detaches the thread.
pub(crate) struct ClassificationJob {
    rx: Receiver<WorkerEvent>,
}

impl ClassificationJob {
    /// Classify `path` on a new thread; `notify` runs after every event so the UI can repaint.
    pub(crate) fn spawn<N>(model: Arc<ModelHandle>, path: PathBuf, notify: N) -> Self
    where
        N: Fn() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let text = model.classify_text_with_progress(&path, |stage| {
                let _ = tx.send(WorkerEvent::Stage(stage));
                notify();
            });
            let _ = tx.send(WorkerEvent::Done(text));
            notify();
        });
        Self { rx }
    }

    /// Drain pending events without blocking.
    ///
    /// A worker that vanished without reporting yields a synthetic `Done` error.
    pub(crate) fn poll(&self) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    let done = matches!(event, WorkerEvent::Done(_));
                    events.push(event);
                    if done {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    events.push(WorkerEvent::Done(
                        "Error: classification worker stopped unexpectedly".to_string(),
                    ));
                    break;
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for_done(job: &ClassificationJob) -> (Vec<WorkerEvent>, String) {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = Vec::new();
        while Instant::now() < deadline {
            for event in job.poll() {
                if let WorkerEvent::Done(text) = event {
                    return (seen, text);
                }
                seen.push(event);
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("worker did not finish");
    }

    #[test]
    fn unavailable_model_yields_error_text() {
        let model = Arc::new(ModelHandle::Unavailable {
            reason: "weights missing".into(),
        });
        let job = ClassificationJob::spawn(model, PathBuf::from("bottle.jpg"), || {});
        let (stages, text) = wait_for_done(&job);
        assert!(stages.is_empty());
        assert!(text.starts_with("Error:"), "{text}");
        assert!(text.contains("weights missing"));
    }

    #[test]
    fn vanished_worker_reports_error_text() {
        let (tx, rx) = mpsc::channel::<WorkerEvent>();
        drop(tx);
        let job = ClassificationJob { rx };
        let events = job.poll();
        assert!(
            matches!(events.as_slice(), [WorkerEvent::Done(text)] if text.starts_with("Error:")),
            "{events:?}"
        );
    }

    #[test]
    fn stages_before_disconnect_are_kept() {
        let (tx, rx) = mpsc::channel();
        tx.send(WorkerEvent::Stage(ClassifyStage::Loading)).unwrap();
        drop(tx);
        let job = ClassificationJob { rx };
        let events = job.poll();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], WorkerEvent::Stage(ClassifyStage::Loading));
        assert!(matches!(&events[1], WorkerEvent::Done(text) if text.starts_with("Error:")));
    }

    #[test]
    fn notify_runs_for_every_event() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let model = Arc::new(ModelHandle::Unavailable {
            reason: "none".into(),
        });
        let job = ClassificationJob::spawn(model, PathBuf::from("can.png"), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        wait_for_done(&job);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
