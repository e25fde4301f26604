#![allow(dead_code)]

use std::{
    future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use recycle_pool::{CloseReason, EventSink, HandleId, Manager, ManualClock, Pool, PoolConfig};
use thiserror::Error;

#[derive(Debug)]
pub struct MockConnection {
    pub serial: usize,
    /// Simulates the driver noticing a dead socket.
    pub broken: bool,
}

#[derive(Debug, Error)]
#[error("mock driver refused to connect")]
pub struct Refused;

#[derive(Debug, Default)]
pub struct MockManager {
    opened: AtomicUsize,
    closed: AtomicUsize,
    refuse: AtomicBool,
    stall: AtomicBool,
    fail_ping: AtomicBool,
    connect_delay: Mutex<Duration>,
    ping_delay: Mutex<Duration>,
    close_delay: Mutex<Duration>,
}

impl MockManager {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }

    /// Makes every later connect take `delay` before it answers.
    pub fn slow_connect(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn slow_ping(&self, delay: Duration) {
        *self.ping_delay.lock() = delay;
    }

    pub fn slow_close(&self, delay: Duration) {
        *self.close_delay.lock() = delay;
    }
}

async fn lag(delay: &Mutex<Duration>) {
    let delay = *delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

impl Manager for MockManager {
    type Connection = MockConnection;
    type Error = Refused;

    async fn connect(&self) -> Result<MockConnection, Refused> {
        if self.stall.load(Ordering::SeqCst) {
            future::pending::<()>().await;
        }
        lag(&self.connect_delay).await;
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Refused);
        }
        let serial = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            serial,
            broken: false,
        })
    }

    async fn close(&self, _conn: MockConnection) -> Result<(), Refused> {
        lag(&self.close_delay).await;
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self, _conn: &mut MockConnection) -> bool {
        lag(&self.ping_delay).await;
        !self.fail_ping.load(Ordering::SeqCst)
    }

    fn is_broken(&self, conn: &MockConnection) -> bool {
        conn.broken
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Connect(HandleId),
    Close(HandleId, CloseReason),
    Checkout(HandleId),
    Checkin(HandleId),
}

#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, Event::Connect(_)))
            .count()
    }

    pub fn closes(&self) -> Vec<(HandleId, CloseReason)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Close(id, reason) => Some((*id, *reason)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for Recorder {
    fn on_connect(&self, id: HandleId) {
        self.events.lock().push(Event::Connect(id));
    }

    fn on_close(&self, id: HandleId, reason: CloseReason) {
        self.events.lock().push(Event::Close(id, reason));
    }

    fn on_checkout(&self, id: HandleId) {
        self.events.lock().push(Event::Checkout(id));
    }

    fn on_checkin(&self, id: HandleId) {
        self.events.lock().push(Event::Checkin(id));
    }
}

pub struct Harness {
    pub pool: Pool<MockManager>,
    pub recorder: Arc<Recorder>,
    pub clock: ManualClock,
}

pub async fn harness(config: PoolConfig) -> Harness {
    let recorder = Arc::new(Recorder::default());
    let clock = ManualClock::new();
    let pool = Pool::builder()
        .pool_config(config)
        .clock(clock.clone())
        .event_sink(recorder.clone())
        .build(MockManager::default())
        .await
        .unwrap();

    Harness {
        pool,
        recorder,
        clock,
    }
}
