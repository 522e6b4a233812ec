//! Controller loop of a helper.
//!
//! Every tick the controller looks at the worker pool and at each connection,
//! hands read and write tasks to the pool for connections that can make
//! progress, and dispatches queued messages to the message handler. When the
//! pool is saturated the controller enters the overloaded state and sheds
//! work until a worker frees up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::connector::connection::ConnectionState;
use crate::connector::helper::Helper;
use crate::connector::worker::WorkerPool;
use crate::connector::Side;
use crate::io::Transport;

#[derive(Debug)]
pub struct Controller {
    side: Side,
    overloaded: AtomicBool,
    running: AtomicBool,
    sleep: Duration,
}

impl Controller {
    pub fn new(side: Side, sleep: Duration) -> Self {
        Self {
            side,
            overloaded: AtomicBool::new(false),
            running: AtomicBool::new(false),
            sleep,
        }
    }

    /// Indicates if the worker pool was saturated at the last tick.
    pub fn is_overloaded(&self) -> bool {
        self.overloaded.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn sleep_time(&self) -> Duration {
        self.sleep
    }

    pub(crate) fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// Asks the loop to end once no connection is left.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Runs one control cycle.
    pub fn tick<T: Transport>(&self, helper: &Arc<Helper<T>>, pool: &Arc<WorkerPool>) {
        let full = pool.is_full();
        let mut schedule = true;

        if self.is_overloaded() {
            if !full {
                self.overloaded.store(false, Ordering::Release);
                info!(side = %self.side, "Accepting new connections and transactions again");
            }
        } else if full {
            self.overloaded.store(true, Ordering::Release);
            info!(
                side = %self.side,
                "Stop accepting new connections and transactions. Consider increasing the maximum number of threads"
            );
            schedule = false;
        }

        if schedule {
            self.control_connections(helper, pool);
        }

        self.dispatch(helper, pool);
    }

    fn control_connections<T: Transport>(&self, helper: &Helper<T>, pool: &Arc<WorkerPool>) {
        // Under overload servers keep flushing responses and clients keep
        // reading them
        let overloaded = self.is_overloaded();

        for connection in helper.connections() {
            match connection.state() {
                ConnectionState::Closed => {
                    helper.remove(connection.id());
                    continue;
                }
                ConnectionState::Closing => {
                    if !connection.is_busy() {
                        connection.close();
                    }
                    continue;
                }
                ConnectionState::Opening | ConnectionState::Open => {}
            }

            if pool.is_shutdown() {
                continue;
            }

            if connection.can_write() && (!overloaded || self.side == Side::Server) {
                if let Some(slot) = pool.try_reserve("write") {
                    let connection = Arc::clone(&connection);
                    pool.spawn(slot, move || {
                        connection.write_messages();
                    });
                }
            }

            if connection.can_read() && (!overloaded || self.side == Side::Client) {
                if let Some(slot) = pool.try_reserve("read") {
                    let connection = Arc::clone(&connection);
                    pool.spawn(slot, move || {
                        connection.read_messages();
                    });
                }
            }
        }
    }

    /// Hands the messages queued at this point to the handler, inbound first,
    /// until the pool refuses. Refused messages stay queued.
    fn dispatch<T: Transport>(&self, helper: &Arc<Helper<T>>, pool: &Arc<WorkerPool>) {
        for _ in 0..helper.queued_inbound() {
            let Some(slot) = pool.try_reserve("inbound message") else {
                return;
            };
            let Some(exchange) = helper.pop_inbound() else {
                break;
            };
            let helper = Arc::clone(helper);
            pool.spawn(slot, move || helper.handle_inbound(exchange));
        }

        for _ in 0..helper.queued_outbound() {
            let Some(slot) = pool.try_reserve("outbound message") else {
                return;
            };
            let Some(exchange) = helper.pop_outbound() else {
                break;
            };
            let helper = Arc::clone(helper);
            pool.spawn(slot, move || helper.handle_outbound(exchange));
        }
    }
}

/// Body of the controller task.
pub(crate) async fn run<T: Transport>(helper: Weak<Helper<T>>, pool: Arc<WorkerPool>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let Some(helper) = helper.upgrade() else {
            break;
        };

        let controller = helper.controller();
        if !controller.is_running() && helper.connection_count() == 0 {
            break;
        }

        controller.tick(&helper, &pool);
    }

    debug!("Controller stopped");
}
