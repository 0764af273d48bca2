//! Connection lifecycle management
//!
//! [`Connection`] owns the transport, the coordinator and the dispatcher
//! thread, and moves through `Closed -> Opening -> Ready -> Closing ->
//! Closed`. Any unrecoverable transport error moves it to `Faulted`, from
//! which only `close()` leads out.
//!
//! `close()` is idempotent and infallible. The first caller to win the
//! transition into `Closing` stops the dispatcher and drops both transport
//! halves; every later or concurrent call returns immediately.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::RuntimeFlavor;

use crate::capabilities::{accepts_identity, AdapterVariant, Capabilities, DeviceInfo};
use crate::config::ConnectionConfig;
use crate::coordinator::Coordinator;
use crate::dispatcher::{DispatcherHandle, InterruptEvent, Interrupts};
use crate::error::{Error, Result};
use crate::lock;
use crate::response::Response;
use crate::state::{ConnectionState, StateCell};
use crate::transport::serial::SerialTransport;
use crate::transport::{Transport, TransportHalves};

/// Identity probe sent while opening
pub const PROBE_COMMAND: &str = "+ID";
/// Reply prefix of the identity probe
pub const PROBE_REPLY: &str = "-ID";

/// Outcome of [`Connection::open`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenStatus {
    /// Adapter answered the identity probe
    Ready(DeviceInfo),
    /// Port opened but the firmware did not answer; the adapter is most
    /// likely in bootloader (DFU) mode. The connection is `Faulted`.
    NeedsFirmwareUpdate,
    /// No Binho adapter at the configured port
    NotFound,
}

/// State shared with the dispatcher thread
pub(crate) struct Shared {
    pub(crate) state: StateCell,
    pub(crate) coordinator: Coordinator,
    pub(crate) interrupts: Interrupts,
}

/// A connection to one adapter
pub struct Connection {
    config: ConnectionConfig,
    transport: Mutex<Box<dyn Transport>>,
    shared: Arc<Shared>,
    dispatcher: Mutex<Option<DispatcherHandle>>,
    info: Mutex<Option<DeviceInfo>>,
}

impl Connection {
    /// Create a closed connection over `transport`
    pub fn new(config: ConnectionConfig, transport: Box<dyn Transport>) -> Self {
        let shared = Shared {
            state: StateCell::default(),
            coordinator: Coordinator::new(config.late_reply_grace()),
            interrupts: Interrupts::new(config.interrupt_queue_capacity),
        };
        Self {
            config,
            transport: Mutex::new(transport),
            shared: Arc::new(shared),
            dispatcher: Mutex::new(None),
            info: Mutex::new(None),
        }
    }

    /// Create a closed connection to the serial port named in `config`
    pub fn serial(config: ConnectionConfig) -> Self {
        let transport = SerialTransport::from_config(&config);
        Self::new(config, Box::new(transport))
    }

    /// Settings this connection was created with
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Port path or transport name
    pub fn port(&self) -> &str {
        &self.config.port
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Identity of the adapter, once `open()` succeeded
    pub fn device_info(&self) -> Option<DeviceInfo> {
        lock(&self.info).clone()
    }

    /// Device info, provided the adapter exposes all of `required`
    pub fn require(&self, required: Capabilities) -> Result<DeviceInfo> {
        let info = self.device_info().ok_or(Error::NotConnected {
            state: self.state(),
        })?;
        info.require(required)?;
        Ok(info)
    }

    /// Open the port, start the dispatcher and probe the adapter's identity
    pub async fn open(&self) -> Result<OpenStatus> {
        let state = &self.shared.state;
        if !state.transition(ConnectionState::Closed, ConnectionState::Opening) {
            return Err(Error::InvalidArgument(format!(
                "connection to {} is already {}",
                self.port(),
                state.get()
            )));
        }

        if !accepts_identity(self.config.identity.as_ref()) {
            log::info!("{}: not a Binho adapter", self.port());
            state.transition(ConnectionState::Opening, ConnectionState::Closed);
            return Ok(OpenStatus::NotFound);
        }

        let opened = {
            let mut transport = lock(&self.transport);
            log::debug!("Opening {}", transport.name());
            transport.open()
        };
        let TransportHalves { mut reader, writer } = match opened {
            Ok(Some(halves)) => halves,
            Ok(None) => {
                state.transition(ConnectionState::Opening, ConnectionState::Closed);
                return Ok(OpenStatus::NotFound);
            }
            Err(e) => {
                state.transition(ConnectionState::Opening, ConnectionState::Closed);
                return Err(e);
            }
        };

        match reader.drain() {
            Ok(0) => {}
            Ok(n) => log::debug!("{}: discarded {} stale bytes", self.port(), n),
            Err(e) => {
                state.transition(ConnectionState::Opening, ConnectionState::Closed);
                return Err(e);
            }
        }

        self.shared.interrupts.queue().reopen();
        self.shared.coordinator.attach_writer(writer);
        match DispatcherHandle::spawn(self.port(), reader, Arc::clone(&self.shared)) {
            Ok(handle) => *lock(&self.dispatcher) = Some(handle),
            Err(e) => {
                self.release();
                state.transition(ConnectionState::Opening, ConnectionState::Closed);
                return Err(e);
            }
        }

        // A close() racing with open() may have run before the halves were installed
        if state.get() != ConnectionState::Opening {
            self.release();
            return Err(Error::NotConnected { state: state.get() });
        }

        self.probe().await
    }

    async fn probe(&self) -> Result<OpenStatus> {
        let state = &self.shared.state;
        let variant = AdapterVariant::from_identity(self.config.identity.as_ref());

        let probed = self
            .shared
            .coordinator
            .execute(
                state,
                &[ConnectionState::Opening],
                PROBE_COMMAND,
                PROBE_REPLY,
                self.config.probe_timeout(),
            )
            .await;

        match probed {
            Ok(response) => {
                let info = DeviceInfo::new(response.into_payload(), variant);
                *lock(&self.info) = Some(info.clone());
                if !state.transition(ConnectionState::Opening, ConnectionState::Ready) {
                    *lock(&self.info) = None;
                    return Err(Error::NotConnected { state: state.get() });
                }
                log::info!(
                    "{} found on {} (Device ID: {})",
                    variant.product_name(),
                    self.port(),
                    info.device_id
                );
                Ok(OpenStatus::Ready(info))
            }
            Err(e @ (Error::Timeout { .. } | Error::UnexpectedResponse { .. })) => {
                log::warn!(
                    "{}: identity probe failed ({}), adapter is probably in DFU mode",
                    self.port(),
                    e
                );
                state.fault();
                Ok(OpenStatus::NeedsFirmwareUpdate)
            }
            Err(e) => {
                state.fault();
                Err(e)
            }
        }
    }

    /// Shut the connection down and release the port
    ///
    /// Safe to call any number of times from any thread, including from an
    /// interrupt handler. Never fails.
    ///
    /// Joining the dispatcher thread blocks for up to `shutdown_join_ms`.
    /// On a multi-threaded tokio runtime the wait runs under
    /// [`tokio::task::block_in_place`]; on a current-thread runtime it
    /// blocks the runtime for that long.
    pub fn close(&self) {
        let Some(previous) = self.shared.state.transition_from_any(
            &[
                ConnectionState::Opening,
                ConnectionState::Ready,
                ConnectionState::Faulted,
            ],
            ConnectionState::Closing,
        ) else {
            return;
        };
        log::debug!("Closing {} (was {})", self.port(), previous);

        self.release();
        *lock(&self.info) = None;
        self.shared
            .state
            .transition(ConnectionState::Closing, ConnectionState::Closed);
        log::info!("Closed {}", self.port());
    }

    /// Stop the dispatcher and drop both transport halves
    fn release(&self) {
        self.shared.interrupts.queue().close();

        let dispatcher = lock(&self.dispatcher).take();
        if let Some(dispatcher) = dispatcher {
            let wait = self.config.shutdown_join();
            let stop = move || dispatcher.stop(wait);
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(stop)
                }
                _ => stop(),
            }
        }

        self.shared.coordinator.fail_pending(Error::NotConnected {
            state: self.state(),
        });
        if let Some(writer) = self.shared.coordinator.detach_writer() {
            drop(writer);
            log::debug!("{}: transport released", self.port());
        }
    }

    /// Send `command` and wait up to `timeout` for a reply starting with `expected`
    ///
    /// `expected` is `-OK` for commands that return no data, or the data
    /// prefix (e.g. `-SPI0 CLK`). On success the returned response's payload
    /// is the text following the prefix.
    pub async fn execute(
        &self,
        command: &str,
        expected: &str,
        timeout: Duration,
    ) -> Result<Response> {
        self.shared
            .coordinator
            .execute(
                &self.shared.state,
                &[ConnectionState::Ready],
                command,
                expected,
                timeout,
            )
            .await
    }

    /// [`execute`](Self::execute) with the configured default timeout
    pub async fn request(&self, command: &str, expected: &str) -> Result<Response> {
        self.execute(command, expected, self.config.command_timeout())
            .await
    }

    /// Transport error that faulted the connection, cleared on the next open
    pub fn last_fault(&self) -> Option<Error> {
        self.shared.coordinator.fault()
    }

    /// Number of commands awaiting a reply (never more than one)
    pub fn outstanding_exchanges(&self) -> usize {
        self.shared.coordinator.outstanding()
    }

    /// Call `handler` on the dispatcher thread for every interrupt from `source`
    ///
    /// Handlers must return quickly; they run inline with the read loop.
    pub fn register_interrupt_handler<F>(&self, source: impl Into<String>, handler: F)
    where
        F: Fn(&InterruptEvent) + Send + Sync + 'static,
    {
        self.shared.interrupts.register(source, Arc::new(handler));
    }

    /// Route interrupts from `source` back to the queue
    pub fn unregister_interrupt_handler(&self, source: &str) -> bool {
        self.shared.interrupts.unregister(source)
    }

    /// Wait for the next queued interrupt
    ///
    /// Returns `None` once the connection is closed or faulted and the
    /// queue has been drained.
    pub async fn next_interrupt(&self) -> Option<InterruptEvent> {
        self.shared.interrupts.queue().pop().await
    }

    /// Take a queued interrupt without waiting
    pub fn try_next_interrupt(&self) -> Option<InterruptEvent> {
        self.shared.interrupts.queue().try_pop()
    }

    /// Interrupts discarded because the queue overflowed
    pub fn dropped_interrupts(&self) -> u64 {
        self.shared.interrupts.queue().dropped()
    }

    /// Close the connection when the process receives Ctrl-C or SIGTERM
    ///
    /// The task holds only a weak reference, so it does not keep the
    /// connection alive.
    pub fn close_on_signal(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let connection = Arc::downgrade(self);
        tokio::spawn(async move {
            wait_for_termination().await;
            if let Some(connection) = connection.upgrade() {
                log::info!("Termination requested, closing {}", connection.port());
                connection.close();
            }
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                log::warn!("cannot watch SIGTERM: {}", e);
                ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("cannot watch Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ACK;
    use crate::testing::{Reply, ScriptedTransport};
    use std::time::Instant;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            command_timeout_ms: 200,
            probe_timeout_ms: 100,
            late_reply_grace_ms: 200,
            read_poll_ms: 5,
            shutdown_join_ms: 500,
            ..ConnectionConfig::new("scripted")
        }
    }

    async fn open_scripted(
        config: ConnectionConfig,
    ) -> (Arc<Connection>, crate::testing::ScriptHandle) {
        let (transport, handle) = ScriptedTransport::new();
        handle.reply("+ID", Reply::lines(&["-ID 0xC59BB495504E5336362E3120FF042D2C"]));
        let conn = Arc::new(Connection::new(config, Box::new(transport)));
        let status = conn.open().await.unwrap();
        assert!(matches!(status, OpenStatus::Ready(_)), "{:?}", status);
        (conn, handle)
    }

    #[tokio::test]
    async fn test_open_probes_identity() {
        let (conn, handle) = open_scripted(test_config()).await;
        assert_eq!(conn.state(), ConnectionState::Ready);

        let info = conn.device_info().unwrap();
        assert_eq!(info.device_id, "0xC59BB495504E5336362E3120FF042D2C");
        assert_eq!(info.variant, AdapterVariant::Nova);
        assert!(conn.require(Capabilities::SPI).is_ok());
        assert_eq!(handle.written(), ["+ID"]);
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let (conn, _handle) = open_scripted(test_config()).await;
        assert!(matches!(
            conn.open().await,
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_scenario_clock_frequency() {
        let (conn, handle) = open_scripted(test_config()).await;
        handle.reply("SPI0 CLK ?", Reply::lines(&["-SPI0 CLK 1000000"]));

        let response = conn.request("SPI0 CLK ?", "-SPI0 CLK").await.unwrap();
        assert_eq!(response.payload(), Some("1000000"));
    }

    #[tokio::test]
    async fn test_scenario_begin_busy() {
        let (conn, handle) = open_scripted(test_config()).await;
        handle.reply("SPI0 BEGIN", Reply::lines(&["-ERR BUSY"]));

        let err = conn.request("SPI0 BEGIN", ACK).await.unwrap_err();
        assert_eq!(
            err,
            Error::UnexpectedResponse {
                expected: "-OK".into(),
                actual: "-ERR BUSY".into()
            }
        );
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_timeout_then_recovery() {
        let (conn, handle) = open_scripted(test_config()).await;
        handle.reply("IO0 VALUE ?", Reply::Silent);
        handle.reply("+PING", Reply::lines(&["-OK"]));

        let err = conn
            .execute("IO0 VALUE ?", "-IO0 VALUE", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(conn.state(), ConnectionState::Ready);

        conn.request("+PING", ACK).await.unwrap();
    }

    #[tokio::test]
    async fn test_late_reply_is_not_taken_by_next_command() {
        let (conn, handle) = open_scripted(test_config()).await;
        // Both replies would satisfy an ACK-expecting command
        handle.reply(
            "SPI0 BEGIN",
            Reply::delayed(Duration::from_millis(60), &["-ERR BUSY"]),
        );
        handle.reply("SPI0 END", Reply::lines(&["-OK"]));

        let err = conn
            .execute("SPI0 BEGIN", ACK, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        let response = conn.request("SPI0 END", ACK).await.unwrap();
        assert_eq!(response.raw(), "-OK");
        assert_eq!(handle.written(), ["+ID", "SPI0 BEGIN", "SPI0 END"]);
    }

    #[tokio::test]
    async fn test_slow_reply_after_grace_is_still_discarded() {
        // Grace below the command timeout is raised to it
        let config = ConnectionConfig {
            late_reply_grace_ms: 50,
            ..test_config()
        };
        let (conn, handle) = open_scripted(config).await;
        handle.reply(
            "IO0 VALUE ?",
            Reply::delayed(Duration::from_millis(120), &["-OK"]),
        );
        handle.reply("SPI0 BEGIN", Reply::lines(&["-ERR BUSY"]));

        let err = conn
            .execute("IO0 VALUE ?", "-IO0 VALUE", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));

        let err = conn.request("SPI0 BEGIN", ACK).await.unwrap_err();
        assert_eq!(
            err,
            Error::UnexpectedResponse {
                expected: ACK.into(),
                actual: "-ERR BUSY".into()
            }
        );
    }

    #[tokio::test]
    async fn test_fifo_admission() {
        let (conn, handle) = open_scripted(test_config()).await;
        handle.reply(
            "+PING",
            Reply::delayed(Duration::from_millis(40), &["-OK"]),
        );
        for pin in 0..5 {
            handle.reply(&format!("IO{} VALUE 1", pin), Reply::lines(&["-OK"]));
        }

        let first = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.request("+PING", ACK).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let mut callers = Vec::new();
        for pin in 0..5 {
            let conn = conn.clone();
            callers.push(tokio::spawn(async move {
                conn.request(&format!("IO{} VALUE 1", pin), ACK).await
            }));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        first.await.unwrap().unwrap();
        for caller in callers {
            caller.await.unwrap().unwrap();
        }
        assert_eq!(
            handle.written(),
            [
                "+ID",
                "+PING",
                "IO0 VALUE 1",
                "IO1 VALUE 1",
                "IO2 VALUE 1",
                "IO3 VALUE 1",
                "IO4 VALUE 1"
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_one_outstanding() {
        let (conn, handle) = open_scripted(test_config()).await;
        for n in 0..8 {
            handle.reply(
                &format!("IO{} VALUE ?", n % 5),
                Reply::delayed(Duration::from_millis(3), &[&format!("-IO{} VALUE 0", n % 5)]),
            );
        }

        let monitor = {
            let conn = conn.clone();
            tokio::spawn(async move {
                let mut max = 0;
                let deadline = Instant::now() + Duration::from_millis(150);
                while Instant::now() < deadline {
                    max = max.max(conn.outstanding_exchanges());
                    tokio::task::yield_now().await;
                }
                max
            })
        };

        let mut callers = Vec::new();
        for n in 0..8 {
            let conn = conn.clone();
            callers.push(tokio::spawn(async move {
                let pin = n % 5;
                conn.request(&format!("IO{} VALUE ?", pin), &format!("-IO{} VALUE", pin))
                    .await
            }));
        }
        for caller in callers {
            assert_eq!(caller.await.unwrap().unwrap().payload(), Some("0"));
        }

        assert!(monitor.await.unwrap() <= 1);
        assert_eq!(handle.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_order_with_interleaved_exchange() {
        let (conn, handle) = open_scripted(test_config()).await;
        handle.reply(
            "IO0 VALUE ?",
            Reply::lines(&["!IO1 1", "-IO0 VALUE 0", "!IO2 0"]),
        );

        handle.inject("!IO3 1");
        let response = conn.request("IO0 VALUE ?", "-IO0 VALUE").await.unwrap();
        assert_eq!(response.payload(), Some("0"));
        handle.inject("!IO4 1");

        let mut seen = Vec::new();
        for _ in 0..4 {
            let event = tokio::time::timeout(Duration::from_secs(1), conn.next_interrupt())
                .await
                .unwrap()
                .unwrap();
            seen.push(format!("{}={}", event.source, event.value));
        }
        assert_eq!(seen, ["IO3=1", "IO1=1", "IO2=0", "IO4=1"]);
        assert_eq!(conn.dropped_interrupts(), 0);
    }

    #[tokio::test]
    async fn test_interrupt_handler() {
        let (conn, handle) = open_scripted(test_config()).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        conn.register_interrupt_handler("IO2", move |event| {
            let _ = tx.send(event.value.clone());
        });

        handle.inject("!IO2 1");
        handle.inject("!IO1 1");
        handle.inject("!IO2 0");

        assert_eq!(rx.recv().await.as_deref(), Some("1"));
        assert_eq!(rx.recv().await.as_deref(), Some("0"));
        let queued = tokio::time::timeout(Duration::from_secs(1), conn.next_interrupt())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queued.source, "IO1");
    }

    #[tokio::test]
    async fn test_queue_overflow_counts_drops() {
        let config = ConnectionConfig {
            interrupt_queue_capacity: 2,
            ..test_config()
        };
        let (conn, handle) = open_scripted(config).await;
        handle.reply("+PING", Reply::lines(&["!IO0 1", "!IO1 1", "!IO2 1", "-OK"]));

        conn.request("+PING", ACK).await.unwrap();
        assert_eq!(conn.dropped_interrupts(), 1);
        assert_eq!(conn.try_next_interrupt().unwrap().source, "IO1");
        assert_eq!(conn.try_next_interrupt().unwrap().source, "IO2");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, handle) = open_scripted(test_config()).await;
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(handle.releases(), (1, 1));
        assert!(conn.device_info().is_none());

        let err = conn.request("+PING", ACK).await.unwrap_err();
        assert_eq!(
            err,
            Error::NotConnected {
                state: ConnectionState::Closed
            }
        );
        assert!(conn.next_interrupt().await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_close_releases_once() {
        let (conn, handle) = open_scripted(test_config()).await;
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let conn = conn.clone();
                std::thread::spawn(move || conn.close())
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(handle.releases(), (1, 1));
        assert_eq!(handle.opens(), 1);
    }

    #[tokio::test]
    async fn test_close_fails_waiting_caller() {
        let (conn, handle) = open_scripted(test_config()).await;
        handle.reply("+PING", Reply::Silent);

        let caller = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.execute("+PING", ACK, Duration::from_secs(5)).await
            })
        };
        while conn.outstanding_exchanges() == 0 {
            tokio::task::yield_now().await;
        }
        conn.close();

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_reopen_after_close() {
        let (conn, handle) = open_scripted(test_config()).await;
        conn.close();
        assert!(matches!(conn.open().await.unwrap(), OpenStatus::Ready(_)));
        assert_eq!(handle.opens(), 2);
        conn.close();
        assert_eq!(handle.releases(), (2, 2));
    }

    #[tokio::test]
    async fn test_drop_releases_transport() {
        let (conn, handle) = open_scripted(test_config()).await;
        drop(conn);
        assert_eq!(handle.releases(), (1, 1));
    }

    #[tokio::test]
    async fn test_bootloader_mode() {
        let (transport, handle) = ScriptedTransport::new();
        handle.reply("+ID", Reply::Silent);
        let conn = Connection::new(test_config(), Box::new(transport));

        assert_eq!(conn.open().await.unwrap(), OpenStatus::NeedsFirmwareUpdate);
        assert_eq!(conn.state(), ConnectionState::Faulted);
        assert!(matches!(
            conn.request("+PING", ACK).await,
            Err(Error::NotConnected {
                state: ConnectionState::Faulted
            })
        ));

        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(handle.releases(), (1, 1));
    }

    #[tokio::test]
    async fn test_not_found() {
        let (transport, handle) = ScriptedTransport::absent();
        let conn = Connection::new(test_config(), Box::new(transport));
        assert_eq!(conn.open().await.unwrap(), OpenStatus::NotFound);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(handle.opens(), 0);
    }

    #[tokio::test]
    async fn test_foreign_vendor_is_not_found() {
        let (transport, handle) = ScriptedTransport::new();
        let config = ConnectionConfig {
            identity: Some(crate::config::DeviceIdentity {
                vendor_id: 0x1A86,
                product_id: Some(0x7523),
            }),
            ..test_config()
        };
        let conn = Connection::new(config, Box::new(transport));
        assert_eq!(conn.open().await.unwrap(), OpenStatus::NotFound);
        assert_eq!(handle.opens(), 0);
    }

    #[tokio::test]
    async fn test_unplug_faults_connection() {
        let (conn, handle) = open_scripted(test_config()).await;
        handle.reply("+PING", Reply::Silent);

        handle.reply("IO0 VALUE ?", Reply::lines(&["-IO0 VALUE 1"]));

        let caller = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.execute("+PING", ACK, Duration::from_secs(5)).await
            })
        };
        while conn.outstanding_exchanges() == 0 {
            tokio::task::yield_now().await;
        }
        let queued = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.request("IO0 VALUE ?", "-IO0 VALUE").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.unplug();

        let err = caller.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(queued.await.unwrap().unwrap_err(), err);
        assert_eq!(conn.last_fault(), Some(err));
        assert_eq!(conn.state(), ConnectionState::Faulted);
        assert!(conn.next_interrupt().await.is_none());
        assert!(matches!(
            conn.request("+PING", ACK).await,
            Err(Error::NotConnected { .. })
        ));

        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(handle.releases(), (1, 1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_close_from_task_on_multi_thread_runtime() {
        let (conn, handle) = open_scripted(test_config()).await;
        let closer = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.close() })
        };
        closer.await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(handle.releases(), (1, 1));
    }
}
