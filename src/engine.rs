//! One logical benchmark client.
//!
//! An engine keeps a connection open for as long as it lives, reconnecting whenever the
//! connection fails or is closed, and drives rounds of rate-limited requests over it.
//! Responses are matched to requests by their sequence number.
//!
//! Per engine there is one listener task and one heartbeat task for the live connection, a
//! reconnect task while the connection is down, and the send loop of `send_round`, which
//! runs on the caller's task.

use crate::config::{EngineConfig, RoundConfig, STALL_WINDOW};
use crate::error::Error;
use crate::message::Message;
use crate::metrics::{
    MetricsSink, CLIENT_TO_SERVER_TIME, REQUEST_SEND, RESPONSE_RECEIVED, RESPONSE_TIME,
    SERVER_TO_CLIENT_TIME,
};
use crate::payload::{heartbeat, PayloadEncoder, Response};
use crate::progress::Progress;
use crate::ring::RingBuffer;
use crate::timing::RoundTimings;
use crate::transport::{Link, Transport};
use crate::utils::now_millis;
use futures::stream::BoxStream;
use futures::StreamExt;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal, entered by `close()`.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    /// The attempt failed and a reconnect task is retrying in the background.
    Retrying,
    /// The engine was closed.
    Closed,
}

/// Everything engines of the same run share.
#[derive(Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub transport: Arc<dyn Transport>,
    pub encoder: Arc<dyn PayloadEncoder>,
    pub metrics: Arc<dyn MetricsSink>,
    pub progress: Arc<Progress>,
}

struct ConnectionState {
    keep_alive: bool,
    phase: Phase,
    /// Present iff connected.
    socket: Option<UnboundedSender<Message>>,
    link_id: u64,
    heartbeat: Option<JoinHandle<()>>,
    pending_timings: RoundTimings,
    success_count: u64,
    recent_success_counts: RingBuffer<u64>,
    failure_count: u64,
    error_count: u64,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            keep_alive: true,
            phase: Phase::Disconnected,
            socket: None,
            link_id: 0,
            heartbeat: None,
            pending_timings: RoundTimings::new(),
            success_count: 0,
            recent_success_counts: RingBuffer::new(STALL_WINDOW),
            failure_count: 0,
            error_count: 0,
        }
    }

    /// A round is over once every request was answered, or once the success count stopped
    /// moving for a whole window while being either high enough or polled for too long.
    fn round_is_done(&self, round: &RoundConfig, polls: u32) -> bool {
        let requested = round.request_interval as u64;
        let success_ratio = if requested == 0 {
            1.0
        } else {
            self.success_count as f64 / requested as f64
        };

        let all_answered = self.pending_timings.all_complete();
        let all_succeeded = self.success_count == requested;
        let stalled = self.recent_success_counts.oldest() == Some(&self.success_count);

        all_answered
            || all_succeeded
            || (stalled && (success_ratio > round.success_threshold || polls >= round.max_polls))
    }

    fn drop_link(&mut self) {
        self.socket = None;
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }
}

struct Shared {
    id: usize,
    context: EngineContext,
    state: Mutex<ConnectionState>,
    shutdown: watch::Sender<bool>,
}

pub struct ConnectionEngine {
    shared: Arc<Shared>,
}

impl ConnectionEngine {
    pub fn new(id: usize, context: EngineContext) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                id,
                context,
                state: Mutex::new(ConnectionState::new()),
                shutdown,
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    /// Opens the connection. When the attempt fails, the failure is counted and a
    /// background task keeps retrying, so the caller is never blocked on a dead server.
    pub async fn connect(&self) -> ConnectOutcome {
        {
            let mut state = self.shared.lock();
            if !state.keep_alive {
                return ConnectOutcome::Closed;
            }
            state.phase = Phase::Connecting;
        }

        match self.shared.open_link().await {
            Ok(()) => ConnectOutcome::Connected,
            Err(Error::ConnectionClosed) if !self.shared.keep_alive() => ConnectOutcome::Closed,
            Err(err) => {
                self.shared.connect_failed(&err);
                self.shared.spawn_reconnect();
                ConnectOutcome::Retrying
            }
        }
    }

    /// Sends this engine's share of a round at the configured rate, then waits until the
    /// completion heuristic ends the round. Returns the timings of every request sent.
    pub async fn send_round(&self, client_index: usize) -> RoundTimings {
        let round = &self.shared.context.config.round;
        {
            let mut state = self.shared.lock();
            state.success_count = 0;
            state.pending_timings = RoundTimings::with_capacity(round.request_interval as usize);
            state.recent_success_counts.clear();
        }

        let mut shutdown = self.shared.shutdown.subscribe();
        if *shutdown.borrow() {
            return self.shared.round_timings();
        }

        let total_ticks = round.total_ticks();
        let batch = round.batch_size();
        let mut remaining = round.request_interval;
        let mut ticker = interval(round.tick_interval());

        debug!(
            "client {} sending {} requests, {} per tick over {} ticks",
            client_index, round.request_interval, batch, total_ticks
        );

        for _ in 0..total_ticks {
            if remaining == 0 {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return self.shared.round_timings(),
            }

            let count = batch.min(remaining);
            for _ in 0..count {
                if !self.shared.send_request() {
                    warn!(
                        "client {} lost its connection, ending the round after {} requests",
                        client_index,
                        round.request_interval - remaining
                    );
                    return self.shared.round_timings();
                }
                remaining -= 1;
            }
        }

        self.wait_for_completion(client_index, &mut shutdown).await;
        self.shared.round_timings()
    }

    async fn wait_for_completion(&self, client_index: usize, shutdown: &mut watch::Receiver<bool>) {
        let round = &self.shared.context.config.round;
        let poll_period = round.poll_period();
        let mut poll = interval_at(Instant::now() + poll_period, poll_period);
        let deadline = sleep(round.round_timeout);
        tokio::pin!(deadline);
        let mut polls = 0u32;

        loop {
            tokio::select! {
                _ = poll.tick() => {}
                _ = &mut deadline => {
                    warn!("client {} gave up waiting for responses after {:?}", client_index, round.round_timeout);
                    return;
                }
                _ = shutdown.changed() => return,
            }
            polls += 1;

            let mut state = self.shared.lock();
            if state.round_is_done(round, polls) {
                debug!(
                    "client {} done after {} polls, {}/{} succeeded",
                    client_index, polls, state.success_count, round.request_interval
                );
                return;
            }
            let success_count = state.success_count;
            state.recent_success_counts.push(success_count);
        }
    }

    /// Stops reconnecting, cancels the heartbeat and any running round, and closes the
    /// connection. The engine can't be reused afterwards.
    pub fn close(&self) {
        {
            let mut state = self.shared.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.keep_alive = false;
            state.phase = Phase::Closed;
            // Dropping the last sender makes the transport close the connection
            state.drop_link();
        }
        self.shared.shutdown.send_replace(true);
        debug!("client {} closed", self.shared.id);
    }

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    pub fn is_connected(&self) -> bool {
        self.shared.lock().socket.is_some()
    }

    pub fn success_count(&self) -> u64 {
        self.shared.lock().success_count
    }

    pub fn failure_count(&self) -> u64 {
        self.shared.lock().failure_count
    }

    pub fn error_count(&self) -> u64 {
        self.shared.lock().error_count
    }
}

impl Drop for ConnectionEngine {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn keep_alive(&self) -> bool {
        self.lock().keep_alive
    }

    fn round_timings(&self) -> RoundTimings {
        self.lock().pending_timings.clone()
    }

    async fn open_link(self: &Arc<Self>) -> Result<(), Error> {
        let Link { outbound, inbound } = self.context.transport.open().await?;

        let link_id = {
            let mut state = self.lock();
            if !state.keep_alive {
                // closed while connecting, dropping outbound closes the new connection
                return Err(Error::ConnectionClosed);
            }
            state.drop_link();
            state.link_id += 1;
            state.phase = Phase::Connected;
            state.heartbeat = Some(self.spawn_heartbeat(outbound.clone()));
            state.socket = Some(outbound);
            state.link_id
        };

        self.context.progress.connection_opened();
        info!("client {} connected", self.id);

        tokio::spawn(self.clone().listen(link_id, inbound));
        Ok(())
    }

    fn spawn_heartbeat(&self, outbound: UnboundedSender<Message>) -> JoinHandle<()> {
        let period = self.context.config.heartbeat_period();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if outbound.send(heartbeat()).is_err() {
                    break;
                }
            }
        })
    }

    async fn listen(self: Arc<Self>, link_id: u64, mut inbound: BoxStream<'static, Result<Message, Error>>) {
        while let Some(item) = inbound.next().await {
            match item {
                Ok(message) => self.handle_message(&message),
                Err(err) => {
                    self.link_lost(link_id, Some(err));
                    return;
                }
            }
        }
        self.link_lost(link_id, None);
    }

    fn handle_message(&self, message: &Message) {
        let finish = now_millis();
        let metrics = &self.context.metrics;
        metrics.timing(RESPONSE_RECEIVED, 1);

        let response = match Response::parse(message) {
            Ok(response) => response,
            Err(err) => {
                debug!("client {} ignoring message: {}", self.id, err);
                return;
            }
        };

        // Unknown sequences, the heartbeat and warm-up answers (sequence 0) and duplicates
        // all fall through here
        let record = {
            let mut state = self.lock();
            let record = state
                .pending_timings
                .complete(response.sequence, response.received_time, finish);
            if record.is_some() {
                state.success_count += 1;
            }
            record
        };
        let Some(record) = record else {
            return;
        };

        self.context.progress.request_completed();
        metrics.timing(RESPONSE_TIME, finish.saturating_sub(record.start));
        if let Some(received) = record.received {
            metrics.timing(CLIENT_TO_SERVER_TIME, received.saturating_sub(record.start));
            metrics.timing(SERVER_TO_CLIENT_TIME, finish.saturating_sub(received));
        }
    }

    // Called once per link, when its inbound stream errors or ends
    fn link_lost(self: &Arc<Self>, link_id: u64, error: Option<Error>) {
        self.context.progress.connection_lost();

        let reconnect = {
            let mut state = self.lock();
            if error.is_some() {
                state.error_count += 1;
            }
            if state.link_id == link_id {
                state.drop_link();
                if state.keep_alive {
                    state.phase = Phase::Reconnecting;
                }
            }
            state.keep_alive && state.link_id == link_id
        };

        match error {
            Some(err) => warn!("client {} connection error: {}", self.id, err),
            None => debug!("client {} connection closed", self.id),
        }

        if reconnect {
            self.spawn_reconnect();
        }
    }

    fn connect_failed(&self, err: &Error) {
        let failures = {
            let mut state = self.lock();
            state.failure_count += 1;
            if state.keep_alive {
                state.phase = Phase::Reconnecting;
            }
            state.failure_count
        };
        warn!("client {} failed to connect ({} so far): {}", self.id, failures, err);
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        let shared = self.clone();
        tokio::spawn(async move { shared.reconnect().await });
    }

    async fn reconnect(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            if *shutdown.borrow() || !self.keep_alive() {
                return;
            }

            tokio::select! {
                _ = sleep(self.context.config.reconnect_delay) => {}
                _ = shutdown.changed() => return,
            }

            match self.open_link().await {
                Ok(()) => return,
                Err(_) if !self.keep_alive() => return,
                Err(err) => self.connect_failed(&err),
            }
        }
    }

    // Returns false when there is no connection to send on
    fn send_request(&self) -> bool {
        let (socket, sequence) = {
            let mut state = self.lock();
            let Some(socket) = state.socket.clone() else {
                return false;
            };
            (socket, state.pending_timings.start_next(now_millis()))
        };

        self.context.metrics.timing(REQUEST_SEND, 1);
        socket.send(self.context.encoder.encode(sequence)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use crate::payload::{OrderEncoder, OrderRequest};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
    use tokio_stream::wrappers::UnboundedReceiverStream;

    // The server side of a mock connection
    struct Peer {
        requests: UnboundedReceiver<Message>,
        responses: UnboundedSender<Result<Message, Error>>,
    }

    struct MockTransport {
        opened: AtomicUsize,
        failures_left: AtomicUsize,
        peers: UnboundedSender<Peer>,
    }

    impl MockTransport {
        fn new(failures: usize) -> (Arc<Self>, UnboundedReceiver<Peer>) {
            let (peers, peers_rx) = unbounded_channel();
            let transport = Arc::new(Self {
                opened: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(failures),
                peers,
            });
            (transport, peers_rx)
        }
    }

    impl Transport for MockTransport {
        fn open(&self) -> BoxFuture<'_, Result<Link, Error>> {
            Box::pin(async move {
                let failing = self
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                    .is_ok();
                if failing {
                    return Err(Error::NoUpgrade);
                }

                self.opened.fetch_add(1, Ordering::SeqCst);
                let (outbound, requests) = unbounded_channel();
                let (responses, inbound) = unbounded_channel();
                let _ = self.peers.send(Peer { requests, responses });
                Ok(Link {
                    outbound,
                    inbound: UnboundedReceiverStream::new(inbound).boxed(),
                })
            })
        }
    }

    fn response(sequence: u32) -> Message {
        Message::Text(format!(
            r#"{{"c":{},"received_time":{}}}"#,
            sequence,
            now_millis()
        ))
    }

    // Answers every order the predicate accepts, optionally twice
    fn answer(mut peer: Peer, accept: impl Fn(u32) -> bool + Send + 'static, twice: bool) -> JoinHandle<usize> {
        tokio::spawn(async move {
            let mut orders = 0;
            while let Some(message) = peer.requests.recv().await {
                let Message::Binary(bytes) = message else {
                    continue;
                };
                orders += 1;
                let order = OrderRequest::decode(&bytes).unwrap();
                if accept(order.c) {
                    let _ = peer.responses.send(Ok(response(order.c)));
                    if twice {
                        let _ = peer.responses.send(Ok(response(order.c)));
                    }
                }
            }
            orders
        })
    }

    fn context(transport: Arc<MockTransport>, round: RoundConfig) -> EngineContext {
        EngineContext {
            config: EngineConfig {
                round,
                ..EngineConfig::default()
            },
            transport,
            encoder: Arc::new(OrderEncoder::default()),
            metrics: Arc::new(NoopMetrics),
            progress: Arc::new(Progress::new()),
        }
    }

    fn round(rate: u32, request_interval: u32) -> RoundConfig {
        RoundConfig {
            rate,
            request_interval,
            ..RoundConfig::default()
        }
    }

    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn test_completion_heuristic() {
        let round = round(1000, 10);
        let mut state = ConnectionState::new();
        for _ in 0..10 {
            state.pending_timings.start_next(0);
        }

        state.success_count = 9;
        assert!(!state.round_is_done(&round, 1));
        // 90% is not above the threshold
        for _ in 0..STALL_WINDOW {
            state.recent_success_counts.push(9);
        }
        assert!(!state.round_is_done(&round, 21));
        assert!(state.round_is_done(&round, round.max_polls));

        // the count moved within the window
        state.recent_success_counts.clear();
        state.recent_success_counts.push(8);
        for _ in 1..STALL_WINDOW {
            state.recent_success_counts.push(9);
        }
        assert!(!state.round_is_done(&round, round.max_polls));

        state.success_count = 10;
        assert!(state.round_is_done(&round, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_sends_exact_request_count() {
        let (transport, mut peers) = MockTransport::new(0);
        let config = round(100, 23);
        let total_ticks = config.total_ticks();
        let tick = config.tick_interval();
        let engine = ConnectionEngine::new(0, context(transport, config));

        assert_eq!(engine.connect().await, ConnectOutcome::Connected);
        let mut peer = peers.recv().await.unwrap();

        // answers every order and notes when it arrived
        let started = Instant::now();
        let responder = tokio::spawn(async move {
            let mut arrivals = Vec::new();
            while let Some(message) = peer.requests.recv().await {
                let Message::Binary(bytes) = message else {
                    continue;
                };
                arrivals.push(started.elapsed());
                let order = OrderRequest::decode(&bytes).unwrap();
                let _ = peer.responses.send(Ok(response(order.c)));
            }
            arrivals
        });

        let timings = engine.send_round(0).await;
        assert_eq!(timings.len(), 23);
        assert!(timings.all_complete());
        assert_eq!(engine.success_count(), 23);

        engine.close();
        let arrivals = responder.await.unwrap();
        assert_eq!(arrivals.len(), 23);

        // ceil(23 * 20 / 100) = 5 ticks of 5, the last one only sends the 3 left
        assert_eq!(total_ticks, 5);
        assert_eq!(arrivals.first(), Some(&Duration::ZERO));
        assert_eq!(arrivals.last(), Some(&(tick * (total_ticks - 1))));
        for k in 0..total_ticks {
            let sent = arrivals.iter().filter(|at| **at == tick * k).count();
            assert_eq!(sent, if k == total_ticks - 1 { 3 } else { 5 }, "tick {}", k);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_heartbeat_interval_still_beats() {
        let (transport, mut peers) = MockTransport::new(0);
        let mut ctx = context(transport, round(1000, 20));
        ctx.config.heartbeat_interval = Duration::ZERO;
        let engine = ConnectionEngine::new(0, ctx);

        engine.connect().await;
        let mut peer = peers.recv().await.unwrap();
        settle().await;

        assert_eq!(peer.requests.try_recv().unwrap(), heartbeat());
        assert!(engine.is_connected());
        engine.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_spread_over_ticks() {
        let (transport, mut peers) = MockTransport::new(0);
        let engine = ConnectionEngine::new(0, context(transport, round(200, 40)));
        engine.connect().await;
        let mut peer = peers.recv().await.unwrap();

        let round = tokio::spawn(async move {
            let timings = engine.send_round(0).await;
            (engine, timings)
        });

        // 10 per tick, ticks 50ms apart: the first tick fires right away
        settle().await;
        let mut first_tick = 0;
        while peer.requests.try_recv().is_ok() {
            first_tick += 1;
        }
        assert_eq!(first_tick, 10);

        sleep(Duration::from_millis(50)).await;
        let mut second_tick = 0;
        while peer.requests.try_recv().is_ok() {
            second_tick += 1;
        }
        assert_eq!(second_tick, 10);

        // nothing is answered, so the round only ends through the poll ceiling
        let (engine, timings) = round.await.unwrap();
        assert_eq!(timings.len(), 40);
        assert_eq!(timings.iter().filter(|t| t.is_complete()).count(), 0);
        engine.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_round_above_threshold_ends_early() {
        let (transport, mut peers) = MockTransport::new(0);
        let engine = ConnectionEngine::new(0, context(transport, round(1000, 20)));
        engine.connect().await;
        // 19 of 20 answered, 95%
        let _responder = answer(peers.recv().await.unwrap(), |c| c != 20, false);

        let started = Instant::now();
        let timings = engine.send_round(0).await;
        let elapsed = started.elapsed();

        assert_eq!(engine.success_count(), 19);
        assert!(!timings.all_complete());
        // the window needs 20 samples, and the 21st poll sees the count unchanged
        assert!(elapsed >= Duration::from_secs(20), "ended after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(25), "ended after {:?}", elapsed);
        engine.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_round_below_threshold_waits_for_poll_ceiling() {
        let (transport, mut peers) = MockTransport::new(0);
        let engine = ConnectionEngine::new(0, context(transport, round(1000, 20)));
        engine.connect().await;
        let _responder = answer(peers.recv().await.unwrap(), |c| c % 2 == 0, false);

        let started = Instant::now();
        engine.send_round(0).await;
        let elapsed = started.elapsed();

        assert_eq!(engine.success_count(), 10);
        assert!(elapsed >= Duration::from_secs(100), "ended after {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(102), "ended after {:?}", elapsed);
        engine.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_timeout_is_a_hard_deadline() {
        let (transport, mut peers) = MockTransport::new(0);
        let mut config = round(1000, 20);
        config.round_timeout = Duration::from_secs(5);
        let engine = ConnectionEngine::new(0, context(transport, config));
        engine.connect().await;
        let _peer = peers.recv().await.unwrap();

        let started = Instant::now();
        let timings = engine.send_round(0).await;
        assert_eq!(timings.len(), 20);
        assert!(started.elapsed() < Duration::from_secs(6));
        engine.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_responses_count_once() {
        let (transport, mut peers) = MockTransport::new(0);
        let ctx = context(transport, round(1000, 30));
        let progress = ctx.progress.clone();
        let engine = ConnectionEngine::new(0, ctx);
        engine.connect().await;
        let peer = peers.recv().await.unwrap();

        // a warm-up answer for sequence 0 must be ignored as well
        peer.responses.send(Ok(response(0))).unwrap();
        let _responder = answer(peer, |_| true, true);

        let timings = engine.send_round(0).await;
        settle().await;

        assert_eq!(timings.len(), 30);
        assert_eq!(engine.success_count(), 30);
        assert_eq!(progress.completed(), 30);
        engine.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_without_connection_ends_immediately() {
        let (transport, _peers) = MockTransport::new(0);
        let engine = ConnectionEngine::new(0, context(transport, round(1000, 20)));

        let timings = engine.send_round(0).await;
        assert!(timings.is_empty());
        assert_eq!(engine.phase(), Phase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_event_reconnects() {
        let (transport, mut peers) = MockTransport::new(0);
        let ctx = context(transport.clone(), round(1000, 20));
        let progress = ctx.progress.clone();
        let engine = ConnectionEngine::new(0, ctx);

        engine.connect().await;
        assert_eq!(progress.connected(), 1);

        // the server goes away
        drop(peers.recv().await.unwrap());
        let second = peers.recv().await.unwrap();
        settle().await;

        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
        assert_eq!(engine.phase(), Phase::Connected);
        assert!(engine.is_connected());
        assert_eq!(progress.connected(), 1);
        assert_eq!(engine.error_count(), 0);

        engine.close();
        drop(second);
        sleep(Duration::from_secs(5)).await;

        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
        assert_eq!(engine.phase(), Phase::Closed);
        assert_eq!(progress.connected(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_event_reconnects() {
        let (transport, mut peers) = MockTransport::new(0);
        let engine = ConnectionEngine::new(0, context(transport.clone(), round(1000, 20)));
        engine.connect().await;

        let first = peers.recv().await.unwrap();
        first.responses.send(Err(Error::RSVNotZero)).unwrap();
        let _second = peers.recv().await.unwrap();
        settle().await;

        assert_eq!(engine.error_count(), 1);
        assert_eq!(engine.phase(), Phase::Connected);
        assert_eq!(transport.opened.load(Ordering::SeqCst), 2);
        engine.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reconnect_after_close() {
        let (transport, mut peers) = MockTransport::new(0);
        let engine = ConnectionEngine::new(0, context(transport.clone(), round(1000, 20)));
        engine.connect().await;
        let peer = peers.recv().await.unwrap();

        engine.close();
        peer.responses.send(Err(Error::RSVNotZero)).unwrap();
        drop(peer);
        sleep(Duration::from_secs(5)).await;

        assert_eq!(transport.opened.load(Ordering::SeqCst), 1);
        assert_eq!(engine.connect().await, ConnectOutcome::Closed);
        assert_eq!(engine.phase(), Phase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_are_retried() {
        let (transport, mut peers) = MockTransport::new(2);
        let ctx = context(transport.clone(), round(1000, 20));
        let progress = ctx.progress.clone();
        let engine = ConnectionEngine::new(0, ctx);

        assert_eq!(engine.connect().await, ConnectOutcome::Retrying);
        assert!(!engine.is_connected());

        let _peer = peers.recv().await.unwrap();
        settle().await;

        assert_eq!(engine.failure_count(), 2);
        assert!(engine.is_connected());
        assert_eq!(progress.connected(), 1);
        engine.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_every_interval() {
        let (transport, mut peers) = MockTransport::new(0);
        let engine = ConnectionEngine::new(0, context(transport, round(1000, 20)));
        engine.connect().await;
        let mut peer = peers.recv().await.unwrap();

        sleep(Duration::from_millis(4_900)).await;
        assert!(peer.requests.try_recv().is_err());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(peer.requests.try_recv().unwrap(), heartbeat());

        sleep(Duration::from_secs(5)).await;
        assert_eq!(peer.requests.try_recv().unwrap(), heartbeat());

        // closing cancels the heartbeat and drops every sender
        engine.close();
        settle().await;
        sleep(Duration::from_secs(10)).await;
        assert!(peer.requests.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_running_round() {
        let (transport, mut peers) = MockTransport::new(0);
        let engine = Arc::new(ConnectionEngine::new(0, context(transport, round(1000, 5))));
        engine.connect().await;
        let peer = peers.recv().await.unwrap();

        let round = tokio::spawn({
            let engine = engine.clone();
            async move { engine.send_round(0).await }
        });
        sleep(Duration::from_secs(2)).await;

        let started = Instant::now();
        engine.close();
        let timings = round.await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(10));
        assert_eq!(timings.len(), 5);

        // answers arriving after the close are still matched without trouble
        let _ = peer.responses.send(Ok(response(1)));
        settle().await;
        assert_eq!(engine.phase(), Phase::Closed);
    }
}
