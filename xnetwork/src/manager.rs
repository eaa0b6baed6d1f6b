//! Manager: owns the IO buffers and coordinates the two loops.
//!
//! The manager is the caller-facing handle. It validates the stream
//! declarations, allocates every IO buffer up front (including the ACK
//! echo companions), and offers `send`, `read` and `flush`. The send and
//! receive loops run either on threads spawned by [`Manager::start`] or
//! on threads supplied by the caller through [`Manager::run_sending`] and
//! [`Manager::run_receiving`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::channel::{PING_PAYLOAD_LEN, ReceiveScheduler, SendScheduler, Shared};
use crate::config::ManagerConfig;
use crate::core::Frame;
use crate::error::{Error, Result};
use crate::iobuffer::{
    CallbackStatus, Direction, IoBuffer, IoBufferParam, ReceiveCallback, SendCallback, SendData,
    StreamTable, dispatch_all,
};
use crate::reliable::ManagerStats;
use crate::transport::Transport;

/// How a read waits for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Return `Error::Empty` right away when nothing is queued.
    NonBlocking,

    /// Wait until data arrives or the manager stops.
    Blocking,

    /// Wait at most the given duration, then return `Error::Timeout`.
    Timeout(Duration),
}

/// Multiplexes IO buffers over one transport.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use xnetwork::{IoBufferParam, Manager, ManagerConfig, MemoryTransport, ReadMode};
///
/// let (a, b) = MemoryTransport::pair();
/// let sender = Manager::new(
///     Arc::new(a),
///     &[IoBufferParam::input(1).with_ack(50, 3)],
///     &[],
///     ManagerConfig::default(),
/// )
/// .unwrap();
/// let receiver = Manager::new(
///     Arc::new(b),
///     &[],
///     &[IoBufferParam::output(1).with_ack(50, 3)],
///     ManagerConfig::default(),
/// )
/// .unwrap();
/// sender.start().unwrap();
/// receiver.start().unwrap();
///
/// sender.send(1, b"ping", None).unwrap();
/// let data = receiver
///     .read_vec(1, ReadMode::Timeout(std::time::Duration::from_secs(5)))
///     .unwrap();
/// assert_eq!(data, b"ping");
/// ```
pub struct Manager<T: Transport + 'static> {
    pub(crate) shared: Arc<Shared<T>>,
    sending: Mutex<Option<JoinHandle<()>>>,
    receiving: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport + 'static> Manager<T> {
    /// Builds a manager over `transport`.
    ///
    /// Every id must be below 128, unique among the streams of its
    /// direction, and declared in the list of its direction. Nothing is
    /// allocated unless every declaration is valid.
    pub fn new(
        transport: Arc<T>,
        inputs: &[IoBufferParam],
        outputs: &[IoBufferParam],
        config: ManagerConfig,
    ) -> Result<Self> {
        Self::with_receive_callback(transport, inputs, outputs, config, None)
    }

    /// Starts a [`ManagerBuilder`].
    pub fn builder(transport: Arc<T>) -> ManagerBuilder<T> {
        ManagerBuilder::new(transport)
    }

    fn with_receive_callback(
        transport: Arc<T>,
        inputs: &[IoBufferParam],
        outputs: &[IoBufferParam],
        config: ManagerConfig,
        receive_callback: Option<ReceiveCallback>,
    ) -> Result<Self> {
        validate(inputs, outputs, &config)?;

        let mut input_buffers = Vec::new();
        input_buffers
            .try_reserve_exact(inputs.len() + outputs.len())
            .map_err(|_| Error::Alloc)?;
        for param in inputs {
            input_buffers.push(IoBuffer::new(param.clone(), &config)?);
        }
        for param in outputs.iter().filter(|param| param.needs_ack) {
            input_buffers.push(IoBuffer::ack_echo(param)?);
        }

        let mut output_buffers = Vec::new();
        output_buffers
            .try_reserve_exact(outputs.len())
            .map_err(|_| Error::Alloc)?;
        for param in outputs {
            output_buffers.push(IoBuffer::new(param.clone(), &config)?);
        }

        let send_buffer_size = match config.send_buffer_size {
            Some(size) => size,
            None => default_send_buffer_size(&input_buffers, &config),
        };
        let receive_buffer_size = outputs
            .iter()
            .map(|param| Frame::max_encoded_len(param.element_max_size))
            .fold(config.receive_buffer_size, usize::max);

        let inputs = StreamTable::new(input_buffers)?;
        let outputs = StreamTable::new(output_buffers)?;
        info!(
            "manager created: {} inputs, {} outputs, staging {} bytes, receive {} bytes",
            inputs.len(),
            outputs.len(),
            send_buffer_size,
            receive_buffer_size
        );

        let shared = Shared::new(
            transport,
            config,
            inputs,
            outputs,
            send_buffer_size,
            receive_buffer_size,
            receive_callback,
        );
        Ok(Self {
            shared: Arc::new(shared),
            sending: Mutex::new(None),
            receiving: Mutex::new(None),
        })
    }

    /// Spawns both loops.
    pub fn start(&self) -> Result<()> {
        self.start_sending()?;
        self.start_receiving()
    }

    /// Spawns the send loop on a named thread.
    pub fn start_sending(&self) -> Result<()> {
        let sched = SendScheduler::claim(self.shared.clone())?;
        let handle = thread::Builder::new()
            .name("xnetwork-send".into())
            .spawn(move || sched.run())
            .map_err(|err| {
                warn!("cannot spawn send loop: {}", err);
                Error::Alloc
            })?;
        *self.sending.lock() = Some(handle);
        Ok(())
    }

    /// Spawns the receive loop on a named thread.
    pub fn start_receiving(&self) -> Result<()> {
        let sched = ReceiveScheduler::claim(self.shared.clone())?;
        let handle = thread::Builder::new()
            .name("xnetwork-recv".into())
            .spawn(move || sched.run())
            .map_err(|err| {
                warn!("cannot spawn receive loop: {}", err);
                Error::Alloc
            })?;
        *self.receiving.lock() = Some(handle);
        Ok(())
    }

    /// Runs the send loop on the calling thread until [`stop`](Self::stop).
    pub fn run_sending(&self) -> Result<()> {
        SendScheduler::claim(self.shared.clone())?.run();
        Ok(())
    }

    /// Runs the receive loop on the calling thread until [`stop`](Self::stop).
    pub fn run_receiving(&self) -> Result<()> {
        ReceiveScheduler::claim(self.shared.clone())?.run();
        Ok(())
    }

    /// Asks both loops to exit and wakes blocked readers.
    ///
    /// A stopped manager cannot be restarted.
    pub fn stop(&self) {
        if self.shared.is_running() {
            info!("manager stopping");
        }
        self.shared.stop();
    }

    /// Returns false once [`stop`](Self::stop) was called.
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Waits for the spawned loops to exit.
    pub fn join(&self) {
        for slot in [&self.sending, &self.receiving] {
            let handle = slot.lock().take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("scheduler thread panicked");
                }
            }
        }
    }

    /// Stops the loops, waits for them and releases every queued element.
    pub fn close(self) {
        self.stop();
        self.join();
    }

    /// Queues `data` on input stream `id`.
    ///
    /// The callback, if any, follows the element through its life: `Sent`,
    /// then `AckReceived`, `Timeout` or `Cancel`, then `Free`.
    pub fn send<'a>(
        &self,
        id: u8,
        data: impl Into<SendData<'a>>,
        callback: Option<SendCallback>,
    ) -> Result<()> {
        let buf = self.input(id)?;
        buf.try_enqueue(data.into().into_bytes(), callback)
    }

    /// Pops the oldest element of output stream `id` into `out`.
    ///
    /// Fails with `BufferSize` when `out` is too small; the element stays queued.
    pub fn read(&self, id: u8, out: &mut [u8], mode: ReadMode) -> Result<usize> {
        let buf = self.output(id)?;
        let (nonblocking, deadline) = wait_plan(mode);
        buf.pop_into(out, nonblocking, deadline, || self.shared.is_running())
    }

    /// Pops the oldest element of output stream `id`.
    pub fn read_vec(&self, id: u8, mode: ReadMode) -> Result<Vec<u8>> {
        let buf = self.output(id)?;
        let (nonblocking, deadline) = wait_plan(mode);
        buf.pop_data(nonblocking, deadline, || self.shared.is_running())
            .map(|data| data.to_vec())
    }

    /// Empties every IO buffer at once.
    ///
    /// Queued and in-flight elements are dropped with `Cancel` then `Free`;
    /// acknowledgment and throttle state is reset.
    pub fn flush(&self) {
        let shared = &self.shared;
        let _gate = shared.dispatch_gate.lock();
        let mut dropped = Vec::new();
        {
            let mut states: Vec<_> = shared
                .inputs
                .iter()
                .chain(shared.outputs.iter())
                .map(IoBuffer::lock)
                .collect();
            for state in states.iter_mut() {
                dropped.extend(state.reset());
            }
            shared.pongs.lock().clear();
        }
        debug!("flushed {} elements", dropped.len());

        let mut notes = Vec::new();
        for elem in dropped {
            elem.finish(Some(CallbackStatus::Cancel), &mut notes);
        }
        dispatch_all(notes);
    }

    /// Returns the number of elements queued on input stream `id`.
    ///
    /// ACK echo companions (`id + 128`) can be queried too.
    pub fn pending_input(&self, id: u8) -> Result<usize> {
        self.shared
            .inputs
            .get(id)
            .map(|buf| buf.lock().ring.len())
            .ok_or_else(|| Error::bad_parameter(format!("no input stream {}", id)))
    }

    /// Returns the number of elements queued on output stream `id`.
    pub fn pending_output(&self, id: u8) -> Result<usize> {
        Ok(self.output(id)?.lock().ring.len())
    }

    /// Returns true while input stream `id` waits for an acknowledgment.
    pub fn is_waiting_ack(&self, id: u8) -> Result<bool> {
        Ok(self.input(id)?.lock().ack.is_waiting())
    }

    /// Replaces the hook called for every received element.
    pub fn set_receive_callback(&self, callback: Option<ReceiveCallback>) {
        *self.shared.receive_callback.write() = callback;
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> ManagerStats {
        self.shared.stats.snapshot()
    }

    /// Returns the last round trip measured by a ping.
    pub fn estimated_latency(&self) -> Option<Duration> {
        self.shared.estimated_latency()
    }

    /// Returns the staging capacity used by the send loop.
    pub fn send_buffer_size(&self) -> usize {
        self.shared.send_buffer_size
    }

    /// Returns the receive buffer size used by the receive loop.
    pub fn receive_buffer_size(&self) -> usize {
        self.shared.receive_buffer_size
    }

    fn input(&self, id: u8) -> Result<&IoBuffer> {
        self.shared
            .inputs
            .get(id)
            .filter(|buf| buf.id() < crate::ID_MAX)
            .ok_or_else(|| Error::bad_parameter(format!("no input stream {}", id)))
    }

    fn output(&self, id: u8) -> Result<&IoBuffer> {
        self.shared
            .outputs
            .get(id)
            .ok_or_else(|| Error::bad_parameter(format!("no output stream {}", id)))
    }
}

impl<T: Transport + 'static> Drop for Manager<T> {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}

impl<T: Transport + 'static> std::fmt::Debug for Manager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("inputs", &self.shared.inputs.len())
            .field("outputs", &self.shared.outputs.len())
            .field("running", &self.shared.is_running())
            .finish()
    }
}

/// Builder for [`Manager`].
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use xnetwork::{IoBufferParam, Manager, MemoryTransport};
///
/// let (a, _b) = MemoryTransport::pair();
/// let manager = Manager::builder(Arc::new(a))
///     .input(IoBufferParam::input(10).with_ack(100, 3))
///     .output(IoBufferParam::output(20))
///     .tick_interval(std::time::Duration::from_millis(2))
///     .build()
///     .unwrap();
/// assert_eq!(manager.pending_input(10).unwrap(), 0);
/// ```
pub struct ManagerBuilder<T: Transport + 'static> {
    transport: Arc<T>,
    inputs: Vec<IoBufferParam>,
    outputs: Vec<IoBufferParam>,
    config: ManagerConfig,
    receive_callback: Option<ReceiveCallback>,
}

impl<T: Transport + 'static> ManagerBuilder<T> {
    /// Creates a builder with no streams and the default configuration.
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            inputs: Vec::new(),
            outputs: Vec::new(),
            config: ManagerConfig::default(),
            receive_callback: None,
        }
    }

    /// Declares an input stream.
    pub fn input(mut self, param: IoBufferParam) -> Self {
        self.inputs.push(param);
        self
    }

    /// Declares an output stream.
    pub fn output(mut self, param: IoBufferParam) -> Self {
        self.outputs.push(param);
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the send loop tick interval.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    /// Enables latency probes; zero disables them.
    pub fn ping_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config = self.config.with_ping_interval_ms(interval_ms);
        self
    }

    /// Installs the hook called for every received element.
    pub fn on_receive(mut self, callback: ReceiveCallback) -> Self {
        self.receive_callback = Some(callback);
        self
    }

    /// Builds the manager without starting it.
    pub fn build(self) -> Result<Manager<T>> {
        Manager::with_receive_callback(
            self.transport,
            &self.inputs,
            &self.outputs,
            self.config,
            self.receive_callback,
        )
    }
}

fn wait_plan(mode: ReadMode) -> (bool, Option<Instant>) {
    match mode {
        ReadMode::NonBlocking => (true, None),
        ReadMode::Blocking => (false, None),
        ReadMode::Timeout(timeout) => (false, Some(Instant::now() + timeout)),
    }
}

/// Checks every declaration before anything is allocated.
fn validate(
    inputs: &[IoBufferParam],
    outputs: &[IoBufferParam],
    config: &ManagerConfig,
) -> Result<()> {
    if config.tick_interval.is_zero() {
        return Err(Error::bad_parameter("tick interval must be non-zero"));
    }

    for (params, direction) in [(inputs, Direction::Input), (outputs, Direction::Output)] {
        let mut seen = [false; crate::ID_MAX as usize];
        for param in params {
            param.validate()?;
            if param.direction != direction {
                return Err(Error::bad_parameter(format!(
                    "stream {} declared as {:?} in the {:?} list",
                    param.id, param.direction, direction
                )));
            }
            if std::mem::replace(&mut seen[param.id as usize], true) {
                return Err(Error::bad_parameter(format!(
                    "stream id {} used twice",
                    param.id
                )));
            }
        }
    }

    if let Some(size) = config.send_buffer_size {
        let largest = inputs
            .iter()
            .map(|param| Frame::max_encoded_len(param.element_max_size))
            .chain(config.ping_interval.map(|_| Frame::max_encoded_len(PING_PAYLOAD_LEN)))
            .chain(outputs.iter().any(|p| p.needs_ack).then(|| Frame::max_encoded_len(0)))
            .max()
            .unwrap_or(0);
        if size < largest {
            return Err(Error::bad_parameter(format!(
                "send buffer of {} bytes cannot hold a {} byte frame",
                size, largest
            )));
        }
    }
    Ok(())
}

/// Room for one maximal frame of every input stream, plus ping and pong.
fn default_send_buffer_size(inputs: &[IoBuffer], config: &ManagerConfig) -> usize {
    let streams: usize = inputs
        .iter()
        .map(|buf| Frame::max_encoded_len(buf.param().element_max_size))
        .sum();
    let probes = if config.ping_interval.is_some() {
        2 * Frame::max_encoded_len(PING_PAYLOAD_LEN)
    } else {
        Frame::max_encoded_len(PING_PAYLOAD_LEN)
    };
    streams + probes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iobuffer::{CallbackReturn, CallbackStatus, send_callback};
    use crate::transport::MemoryTransport;

    fn memory() -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport::pair().0)
    }

    #[test]
    fn test_validation() {
        let config = ManagerConfig::default();
        assert!(matches!(
            Manager::new(memory(), &[IoBufferParam::input(128)], &[], config.clone()),
            Err(Error::BadParameter(_))
        ));
        assert!(matches!(
            Manager::new(
                memory(),
                &[IoBufferParam::input(1), IoBufferParam::input(1)],
                &[],
                config.clone()
            ),
            Err(Error::BadParameter(_))
        ));
        assert!(matches!(
            Manager::new(memory(), &[IoBufferParam::output(1)], &[], config.clone()),
            Err(Error::BadParameter(_))
        ));
        assert!(matches!(
            Manager::new(
                memory(),
                &[IoBufferParam::input(1)],
                &[],
                config.clone().with_tick_interval(Duration::ZERO)
            ),
            Err(Error::BadParameter(_))
        ));
        assert!(matches!(
            Manager::new(
                memory(),
                &[IoBufferParam::input(1).with_element_max_size(100)],
                &[],
                config.clone().with_send_buffer_size(50)
            ),
            Err(Error::BadParameter(_))
        ));

        // same id in both directions is fine
        assert!(
            Manager::new(
                memory(),
                &[IoBufferParam::input(1)],
                &[IoBufferParam::output(1)],
                config
            )
            .is_ok()
        );
    }

    #[test]
    fn test_ack_companions_created() {
        let manager = Manager::new(
            memory(),
            &[IoBufferParam::input(1)],
            &[
                IoBufferParam::output(2).with_ack(100, 3),
                IoBufferParam::output(3),
            ],
            ManagerConfig::default(),
        )
        .unwrap();
        assert_eq!(manager.pending_input(130).unwrap(), 0);
        assert!(manager.pending_input(131).is_err());
        // companions are not caller-writable
        assert!(matches!(
            manager.send(130, b"x", None),
            Err(Error::BadParameter(_))
        ));
    }

    #[test]
    fn test_buffer_sizes() {
        let manager = Manager::new(
            memory(),
            &[
                IoBufferParam::input(1).with_element_max_size(100),
                IoBufferParam::input(2).with_element_max_size(10),
            ],
            &[IoBufferParam::output(3).with_element_max_size(8000)],
            ManagerConfig::default(),
        )
        .unwrap();
        // 3+1+100, 3+1+10, plus a pong
        assert_eq!(manager.send_buffer_size(), 104 + 14 + 12);
        assert_eq!(manager.receive_buffer_size(), 3 + 2 + 8000);
    }

    #[test]
    fn test_send_errors() {
        let manager = Manager::new(
            memory(),
            &[IoBufferParam::input(1).with_capacity(1).with_element_max_size(4)],
            &[IoBufferParam::output(2)],
            ManagerConfig::default(),
        )
        .unwrap();
        assert!(matches!(
            manager.send(2, b"x", None),
            Err(Error::BadParameter(_))
        ));
        assert!(matches!(
            manager.send(1, b"too long", None),
            Err(Error::BadParameter(_))
        ));
        manager.send(1, b"ok", None).unwrap();
        assert!(matches!(manager.send(1, b"no", None), Err(Error::BufferFull)));
        assert_eq!(manager.pending_input(1).unwrap(), 1);
    }

    #[test]
    fn test_flush_cancels_everything() {
        let manager = Manager::new(
            memory(),
            &[IoBufferParam::input(1).with_ack(100, 3)],
            &[IoBufferParam::output(2)],
            ManagerConfig::default(),
        )
        .unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback = send_callback(move |_, data, status| {
            sink.lock().push((data.to_vec(), status));
            CallbackReturn::Default
        });
        manager.send(1, b"a", Some(callback.clone())).unwrap();
        manager.send(1, b"b", Some(callback)).unwrap();
        manager.shared.inputs.get(1).unwrap().lock().mark_waiting_ack(0, 10);
        manager
            .shared
            .outputs
            .get(2)
            .unwrap()
            .push_received(0, b"in", false)
            .unwrap();

        manager.flush();

        assert_eq!(manager.pending_input(1).unwrap(), 0);
        assert!(!manager.is_waiting_ack(1).unwrap());
        assert!(matches!(
            manager.read_vec(2, ReadMode::NonBlocking),
            Err(Error::Empty)
        ));
        assert_eq!(
            *events.lock(),
            vec![
                (b"a".to_vec(), CallbackStatus::Cancel),
                (b"a".to_vec(), CallbackStatus::Free),
                (b"b".to_vec(), CallbackStatus::Cancel),
                (b"b".to_vec(), CallbackStatus::Free),
            ]
        );
    }

    #[test]
    fn test_drop_releases_queued_elements() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let manager =
            Manager::new(memory(), &[IoBufferParam::input(1)], &[], ManagerConfig::default())
                .unwrap();
        manager
            .send(
                1,
                b"left".to_vec(),
                Some(send_callback(move |_, _, status| {
                    sink.lock().push(status);
                    CallbackReturn::Default
                })),
            )
            .unwrap();
        manager.close();
        assert_eq!(
            *events.lock(),
            vec![CallbackStatus::Cancel, CallbackStatus::Free]
        );
    }

    #[test]
    fn test_pending_per_direction() {
        let manager = Manager::new(
            memory(),
            &[IoBufferParam::input(5)],
            &[IoBufferParam::output(5)],
            ManagerConfig::default(),
        )
        .unwrap();
        manager.send(5, b"out", None).unwrap();
        manager
            .shared
            .outputs
            .get(5)
            .unwrap()
            .push_received(0, b"in", false)
            .unwrap();
        manager
            .shared
            .outputs
            .get(5)
            .unwrap()
            .push_received(1, b"in", false)
            .unwrap();

        assert_eq!(manager.pending_input(5).unwrap(), 1);
        assert_eq!(manager.pending_output(5).unwrap(), 2);
        assert!(manager.pending_output(6).is_err());
    }

    #[test]
    fn test_run_loops_twice_rejected() {
        let manager =
            Manager::new(memory(), &[IoBufferParam::input(1)], &[], ManagerConfig::default())
                .unwrap();
        manager.start_sending().unwrap();
        assert!(matches!(manager.run_sending(), Err(Error::AlreadyRunning)));
        manager.stop();
        manager.join();
    }

    #[test]
    fn test_stop_wakes_blocked_reader() {
        let manager = Arc::new(
            Manager::new(memory(), &[], &[IoBufferParam::output(2)], ManagerConfig::default())
                .unwrap(),
        );
        let reader = {
            let manager = manager.clone();
            thread::spawn(move || manager.read_vec(2, ReadMode::Blocking))
        };
        thread::sleep(Duration::from_millis(20));
        manager.stop();
        assert!(matches!(reader.join().unwrap(), Err(Error::Stopped)));
    }
}
