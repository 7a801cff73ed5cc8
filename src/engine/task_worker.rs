//! Task worker process.
//!
//! Blocks on the shared task queue, runs each descriptor through
//! `on_task`, and sends the outcome to the submitting event worker. SIGTERM
//! is noticed within one read timeout through the flag inherited from the
//! manager; a task in progress always finishes.

use std::io;
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::ipc::{self, TaskReply, MAX_DATAGRAM};
use crate::engine::{ProcessRole, ProcessRuntime, ServerEvents};
use crate::lifecycle::CancelToken;
use crate::net::WorkerId;
use crate::task::TaskDescriptor;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) struct TaskWorkerContext<'a> {
    pub worker_id: WorkerId,
    pub master_pid: u32,
    pub events: Arc<dyn ServerEvents>,
    pub queue: &'a UnixDatagram,
    pub replies: Vec<&'a UnixDatagram>,
    pub terminate: CancelToken,
}

/// Process entry. Returns the exit status.
pub(crate) fn run(ctx: TaskWorkerContext<'_>) -> i32 {
    let token = ctx.terminate;
    if let Err(e) = ctx.queue.set_read_timeout(Some(POLL_INTERVAL)) {
        tracing::error!(error = %e, "Failed to configure task queue");
        return 1;
    }

    ctx.events.on_worker_start(Arc::new(ProcessRuntime::new(
        ProcessRole::TaskWorker,
        ctx.worker_id,
        ctx.master_pid,
    )));

    let mut buf = vec![0u8; MAX_DATAGRAM];
    while !token.is_cancelled() {
        let len = match ctx.queue.recv(&mut buf) {
            Ok(len) => len,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => {
                tracing::error!(error = %e, "Task queue failed");
                break;
            }
        };

        let descriptor: TaskDescriptor = match ipc::decode(&buf[..len]) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed task descriptor");
                continue;
            }
        };

        let (id, src_worker) = (descriptor.id, descriptor.src_worker);
        tracing::debug!(task_id = id, src_worker, class = %descriptor.class, "Running task");
        let outcome = ctx.events.on_task(descriptor);

        match ctx.replies.get(src_worker as usize) {
            Some(channel) => {
                if let Err(e) = ipc::send_reply(channel, &TaskReply { id, outcome }) {
                    tracing::warn!(task_id = id, src_worker, error = %e, "Failed to deliver task reply");
                }
            }
            None => tracing::warn!(task_id = id, src_worker, "Task came from an unknown worker"),
        }
    }

    ctx.events.on_worker_stop(ctx.worker_id);
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Registry;
    use crate::engine::event_worker::{read_replies, EventRuntime};
    use crate::engine::ipc::TaskChannels;
    use crate::net::IdAllocator;
    use crate::server::tests::small_config;
    use crate::server::Server;
    use crate::task::ErrorDescriptor;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Instant;

    type Delivered = Arc<Mutex<Vec<(&'static str, Option<Value>, Option<ErrorDescriptor>)>>>;

    fn server() -> Arc<Server> {
        Server::with_registry(small_config(), Registry::with_builtins()).unwrap()
    }

    #[test]
    fn outcomes_travel_back_to_the_submitting_worker() {
        let channels = TaskChannels::new(1).unwrap();

        // The event side and the task side each own a server, as they would
        // in separate processes.
        let event_server = server();
        let ids = Arc::new(IdAllocator::new(8).unwrap());
        let queue = channels.queue.tx.try_clone().unwrap();
        event_server.attach_runtime(Arc::new(EventRuntime::new(0, 1, ids, Some(queue))));
        let task_server = server();
        let terminate = CancelToken::new();

        let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));
        let status = std::thread::scope(|scope| {
            let worker = scope.spawn(|| {
                run(TaskWorkerContext {
                    worker_id: 1,
                    master_pid: 1,
                    events: task_server.clone(),
                    queue: &channels.queue.rx,
                    replies: channels.replies.iter().map(|c| &c.tx).collect(),
                    terminate: terminate.clone(),
                })
            });

            for (label, class) in [("echo", "EchoTask"), ("missing", "Missing")] {
                let sink = delivered.clone();
                event_server
                    .task(class, json!({"msg": "hi"}).as_object().cloned().unwrap(), move |result, error| {
                        sink.lock().unwrap().push((label, result, error));
                    })
                    .unwrap();
            }

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                let replies = channels.replies[0].rx.try_clone().unwrap();
                replies.set_nonblocking(true).unwrap();
                let replies = tokio::net::UnixDatagram::from_std(replies).unwrap();
                let events: Arc<dyn ServerEvents> = event_server.clone();
                let reader = tokio::spawn(read_replies(events, replies));

                let deadline = Instant::now() + Duration::from_secs(5);
                while delivered.lock().unwrap().len() < 2 && Instant::now() < deadline {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                reader.abort();
            });

            terminate.cancel();
            worker.join().unwrap()
        });

        assert_eq!(status, 0);
        assert_eq!(event_server.tasks_in_flight(), 0);

        let mut delivered = delivered.lock().unwrap();
        delivered.sort_by_key(|entry| entry.0);
        assert_eq!(delivered.len(), 2);

        let (_, result, error) = &delivered[0];
        assert_eq!(result, &Some(json!("hi")));
        assert!(error.is_none());

        let (_, result, error) = &delivered[1];
        assert!(result.is_none());
        let error = error.as_ref().unwrap();
        assert_eq!(error.message, "task(Missing) class not found");
        assert_eq!(error.code, 0);
    }

    #[test]
    fn cancelled_worker_stops_without_tasks() {
        let channels = TaskChannels::new(1).unwrap();
        let terminate = CancelToken::new();
        terminate.cancel();

        let status = run(TaskWorkerContext {
            worker_id: 1,
            master_pid: 1,
            events: server(),
            queue: &channels.queue.rx,
            replies: Vec::new(),
            terminate,
        });
        assert_eq!(status, 0);
    }
}
