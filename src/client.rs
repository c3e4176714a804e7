//! Main [`Connection`] implementation.
//!
//! A connection owns the transport, a background reader task and an event
//! dispatch task:
//!
//! ```text
//!  caller ──request──▶ CommandHandler ──frame──▶ Transport
//!                          ▲                        │
//!                     confirm (oneshot)             ▼
//!                          └──────────────── reader task ──events──▶ dispatch task ──▶ handlers
//!                                               │
//!                                               ▼
//!                                       ConfigurationStore
//! ```
//!
//! The reader is the only task reading the transport and the only writer
//! of the store. Handlers run on the dispatch task, never on the reader.

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::commands::{CommandHandler, DEFAULT_TIMEOUT, Matched, read_error};
use crate::error::{Error, FrameError, Result};
use crate::event::{self, Event, EventKind, EventTable, Handler};
use crate::protocol::attribute::{CsapAttribute, DISABLED_KEY, MsapAttribute};
use crate::protocol::frame::Frame;
use crate::protocol::parser::{self, Confirm, Inbound, Indication};
use crate::protocol::primitive::{Primitive, RESPONSE_OFFSET, is_confirm};
use crate::protocol::slip::SlipDecoder;
use crate::store::{ConfigurationStore, key_presence, le_array};
use crate::transport::{SerialConfig, SerialTransport, Transport, TransportReader};
use crate::types::{
    AccessCycleRange, Channel, ChannelLimits, ConfigSnapshot, DataMessage, DataSent,
    DiagnosticConfig, Endpoint, FirmwareVersion, NeighborInfo, NetworkAddress, NodeAddress,
    ReceivedData, RemoteStatus, Role, ScanNeighborsDone, StackStatus,
};

/// Default capacity of the queue between reader and dispatch task.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

/// Default interval between indication polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Time to wait for the next indication of a burst before polling again.
const INDICATION_TIMEOUT: Duration = Duration::from_millis(500);

/// Consecutive failed reads after which the transport is treated as lost.
const MAX_READ_ERRORS: u32 = 8;

/// Milliseconds since the Unix epoch.
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Time to wait for each confirm.
    pub request_timeout: Duration,
    /// Capacity of the event queue. A full queue pauses the reader.
    pub event_queue_capacity: usize,
    /// Interval between indication polls, `None` to never poll.
    ///
    /// The node only releases queued indications when polled.
    pub poll_interval: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_TIMEOUT,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            poll_interval: Some(DEFAULT_POLL_INTERVAL),
        }
    }
}

impl ConnectionConfig {
    /// Sets the confirm timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the event queue capacity.
    #[must_use]
    pub const fn event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Opening,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// State shared by every handle and the background tasks.
struct Shared<T> {
    transport: Arc<tokio::sync::Mutex<T>>,
    commands: CommandHandler<T>,
    store: ConfigurationStore,
    events: Arc<EventTable>,
    state: watch::Sender<ConnectionState>,
    poll_interval: Option<Duration>,
    /// Last error the reader survived.
    last_error: Mutex<Option<Error>>,
}

impl<T: Transport> Shared<T> {
    fn ensure_open(&self) -> Result<()> {
        if *self.state.borrow() == ConnectionState::Open {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Moves `Open` to `Closing`. Returns false if someone else already did.
    fn begin_close(&self) -> bool {
        self.state.send_if_modified(|state| match state {
            ConnectionState::Opening | ConnectionState::Open => {
                *state = ConnectionState::Closing;
                true
            }
            ConnectionState::Closing | ConnectionState::Closed => false,
        })
    }

    fn record_error(&self, error: Error) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Releases everything once the reader has stopped.
    async fn finish_close(&self) -> Result<()> {
        self.commands.correlator().close();
        self.events.clear();
        self.store.clear().await;

        let result = self.transport.lock().await.disconnect().await;
        if let Err(e) = &result {
            tracing::warn!("transport disconnect failed: {}", e);
        }

        self.state.send_replace(ConnectionState::Closed);
        tracing::info!("connection closed");
        result
    }
}

/// Background task handles, aborted when the last handle is dropped.
#[derive(Default)]
struct Tasks {
    reader: Mutex<Option<JoinHandle<()>>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Tasks {
    fn take_reader(&self) -> Option<JoinHandle<()>> {
        self.reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for Tasks {
    fn drop(&mut self) {
        for slot in [&self.reader, &self.dispatch] {
            if let Some(task) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                task.abort();
            }
        }
    }
}

/// Session with a coordinator node.
///
/// Cloning yields another handle on the same session. Handlers capturing a
/// handle keep the background tasks alive until [`close`](Self::close)
/// clears the handler table.
pub struct Connection<T> {
    shared: Arc<Shared<T>>,
    tasks: Arc<Tasks>,
}

impl<T> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<T> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &*self.shared.state.borrow())
            .finish_non_exhaustive()
    }
}

impl Connection<SerialTransport> {
    /// Opens a session over a serial port.
    ///
    /// # Arguments
    ///
    /// * `port` - Serial port path (e.g., "/dev/ttyACM0")
    /// * `bitrate` - Port speed in bits per second
    pub async fn open_serial(port: impl Into<String>, bitrate: u32) -> Result<Self> {
        let config = SerialConfig::new(port).baud_rate(bitrate);
        Self::open(SerialTransport::new(config), ConnectionConfig::default()).await
    }
}

impl<T: Transport + 'static> Connection<T> {
    /// Opens a session over any transport.
    ///
    /// Connects the transport and starts the reader and dispatch tasks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportFailure`] if the transport cannot be opened.
    pub async fn open(mut transport: T, config: ConnectionConfig) -> Result<Self> {
        tracing::debug!("opening connection");
        transport.connect().await?;

        let Some(link) = transport.take_reader() else {
            let _ = transport.disconnect().await;
            return Err(Error::TransportFailure(io::Error::other(
                "transport provided no reader",
            )));
        };

        let transport = Arc::new(tokio::sync::Mutex::new(transport));
        let (state, state_rx) = watch::channel(ConnectionState::Opening);
        let (event_tx, event_rx) = mpsc::channel(config.event_queue_capacity.max(1));

        let shared = Arc::new(Shared {
            commands: CommandHandler::new(Arc::clone(&transport), config.request_timeout),
            transport,
            store: ConfigurationStore::new(),
            events: Arc::new(EventTable::new()),
            state,
            poll_interval: config.poll_interval,
            last_error: Mutex::new(None),
        });

        let dispatch = tokio::spawn(event::run_dispatch(Arc::clone(&shared.events), event_rx));
        let reader = ReaderTask::new(Arc::clone(&shared), event_tx, state_rx);
        let reader = tokio::spawn(reader.run(link));

        let tasks = Tasks::default();
        *tasks.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(reader);
        *tasks.dispatch.lock().unwrap_or_else(PoisonError::into_inner) = Some(dispatch);

        shared.state.send_replace(ConnectionState::Open);
        tracing::info!("connection open");

        Ok(Self {
            shared,
            tasks: Arc::new(tasks),
        })
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Returns true while the connection accepts requests.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Returns the last-known configuration without a round trip.
    pub async fn snapshot(&self) -> ConfigSnapshot {
        self.shared.store.snapshot().await
    }

    /// Takes the last error the reader recovered from.
    ///
    /// Malformed frames and transient read failures do not close the
    /// connection. The most recent one is kept here until taken.
    pub fn take_last_error(&self) -> Option<Error> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Closes the connection.
    ///
    /// Waits for the reader to stop, fails waiting requests with
    /// [`Error::NotConnected`], disconnects the transport and clears all
    /// handlers. Closing a closed connection is a no-op.
    pub async fn close(&self) -> Result<()> {
        if !self.shared.begin_close() {
            let mut state = self.shared.state.subscribe();
            let _ = state
                .wait_for(|state| *state == ConnectionState::Closed)
                .await;
            return Ok(());
        }

        tracing::debug!("closing connection");
        if let Some(reader) = self.tasks.take_reader() {
            if let Err(e) = reader.await {
                tracing::warn!("reader task ended abnormally: {}", e);
            }
        }
        self.shared.finish_close().await
    }

    fn commands(&self) -> Result<&CommandHandler<T>> {
        self.shared.ensure_open()?;
        Ok(&self.shared.commands)
    }

    // ==================== Node Identity ====================

    /// Reads the node address.
    pub async fn get_node_address(&self) -> Result<NodeAddress> {
        let value = self
            .commands()?
            .read_csap(CsapAttribute::NodeAddress)
            .await?;
        Ok(NodeAddress(u32_le(&value)))
    }

    /// Sets the node address and returns the address confirmed by the node.
    pub async fn set_node_address(&self, address: NodeAddress) -> Result<NodeAddress> {
        self.commands()?
            .write_csap(
                CsapAttribute::NodeAddress,
                Bytes::copy_from_slice(&address.0.to_le_bytes()),
            )
            .await?;
        self.get_node_address().await
    }

    /// Reads the node role.
    pub async fn get_role(&self) -> Result<Role> {
        let value = self
            .commands()?
            .read_csap(CsapAttribute::NodeRole)
            .await?;
        Role::from_byte(value[0])
            .ok_or_else(|| Error::protocol(format!("unknown role byte 0x{:02x}", value[0])))
    }

    /// Sets the node role and returns the role confirmed by the node.
    pub async fn set_role(&self, role: Role) -> Result<Role> {
        self.commands()?
            .write_csap(
                CsapAttribute::NodeRole,
                Bytes::copy_from_slice(&[role.to_byte()]),
            )
            .await?;
        self.get_role().await
    }

    // ==================== Network Identity ====================

    /// Reads the network address.
    pub async fn get_network_address(&self) -> Result<NetworkAddress> {
        let value = self
            .commands()?
            .read_csap(CsapAttribute::NetworkAddress)
            .await?;
        Ok(NetworkAddress::from_le_bytes([value[0], value[1], value[2]]))
    }

    /// Sets the network address and returns the address confirmed by the
    /// node.
    pub async fn set_network_address(&self, address: NetworkAddress) -> Result<NetworkAddress> {
        self.commands()?
            .write_csap(
                CsapAttribute::NetworkAddress,
                Bytes::copy_from_slice(&address.to_le_bytes()),
            )
            .await?;
        self.get_network_address().await
    }

    /// Reads the network channel.
    pub async fn get_network_channel(&self) -> Result<Channel> {
        let value = self
            .commands()?
            .read_csap(CsapAttribute::NetworkChannel)
            .await?;
        Ok(Channel(value[0]))
    }

    /// Sets the network channel and returns the channel confirmed by the
    /// node, which may differ from the requested one.
    pub async fn set_network_channel(&self, channel: Channel) -> Result<Channel> {
        self.commands()?
            .write_csap(
                CsapAttribute::NetworkChannel,
                Bytes::copy_from_slice(&[channel.0]),
            )
            .await?;
        self.get_network_channel().await
    }

    /// Reads the channel map.
    pub async fn get_channel_map(&self) -> Result<u32> {
        let value = self
            .commands()?
            .read_csap(CsapAttribute::ChannelMap)
            .await?;
        Ok(u32_le(&value))
    }

    /// Sets the channel map and returns the map confirmed by the node.
    pub async fn set_channel_map(&self, map: u32) -> Result<u32> {
        self.commands()?
            .write_csap(
                CsapAttribute::ChannelMap,
                Bytes::copy_from_slice(&map.to_le_bytes()),
            )
            .await?;
        self.get_channel_map().await
    }

    // ==================== Security Keys ====================

    /// Returns true if an authentication key is installed.
    pub async fn is_authentication_key_set(&self) -> Result<bool> {
        self.key_set(CsapAttribute::AuthenticationKey).await
    }

    /// Returns true if a cipher key is installed.
    pub async fn is_cipher_key_set(&self) -> Result<bool> {
        self.key_set(CsapAttribute::CipherKey).await
    }

    /// Installs an authentication key.
    pub async fn set_authentication_key(&self, key: &[u8; 16]) -> Result<()> {
        self.write_key(CsapAttribute::AuthenticationKey, key).await
    }

    /// Installs a cipher key.
    pub async fn set_cipher_key(&self, key: &[u8; 16]) -> Result<()> {
        self.write_key(CsapAttribute::CipherKey, key).await
    }

    /// Removes the authentication key.
    pub async fn remove_authentication_key(&self) -> Result<()> {
        self.write_key(CsapAttribute::AuthenticationKey, &DISABLED_KEY)
            .await
    }

    /// Removes the cipher key.
    pub async fn remove_cipher_key(&self) -> Result<()> {
        self.write_key(CsapAttribute::CipherKey, &DISABLED_KEY).await
    }

    async fn key_set(&self, attribute: CsapAttribute) -> Result<bool> {
        let (result, _) = self.commands()?.read_csap_raw(attribute).await?;
        key_presence(result).ok_or_else(|| read_error(attribute.attribute(), result))
    }

    async fn write_key(&self, attribute: CsapAttribute, key: &[u8; 16]) -> Result<()> {
        self.commands()?
            .write_csap(attribute, Bytes::copy_from_slice(key))
            .await?;
        // Refresh the presence flag from the node
        self.key_set(attribute).await.map(|_| ())
    }

    // ==================== Diagnostics ====================

    /// Reads the app config data.
    pub async fn get_app_config_data(&self) -> Result<DiagnosticConfig> {
        self.commands()?.read_app_config().await
    }

    /// Writes app config data and returns the configuration confirmed by
    /// the node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `data` exceeds the node's
    /// maximum app config size.
    pub async fn set_app_config_data(
        &self,
        sequence: u8,
        interval_s: u16,
        data: impl Into<Bytes>,
    ) -> Result<DiagnosticConfig> {
        let data = data.into();
        let max = usize::from(self.get_app_config_data_size().await?);
        if data.len() > max {
            return Err(Error::invalid(format!(
                "app config of {} bytes exceeds node maximum of {max}",
                data.len()
            )));
        }
        self.commands()?
            .write_app_config(sequence, interval_s, data, max)
            .await?;
        self.get_app_config_data().await
    }

    /// Reads the maximum app config size in bytes.
    pub async fn get_app_config_data_size(&self) -> Result<u8> {
        self.read_csap_u8(CsapAttribute::AppConfigDataSize).await
    }

    /// Reads the stack status.
    ///
    /// The node always reports a status, so a "not set" answer is a
    /// protocol error here rather than [`Error::AttributeUnset`].
    pub async fn get_stack_status(&self) -> Result<StackStatus> {
        let value = self
            .commands()?
            .read_msap(MsapAttribute::StackStatus)
            .await
            .map_err(|e| match e {
                Error::AttributeUnset { attribute } => {
                    Error::protocol(format!("node reported no {attribute}"))
                }
                other => other,
            })?;
        Ok(StackStatus(value[0]))
    }

    // ==================== Node Information ====================

    /// Reads the maximum transmission unit.
    pub async fn get_mtu(&self) -> Result<u8> {
        self.read_csap_u8(CsapAttribute::Mtu).await
    }

    /// Reads the number of PDU buffers.
    pub async fn get_pdu_buffer_size(&self) -> Result<u8> {
        self.read_csap_u8(CsapAttribute::PduBufferSize).await
    }

    /// Reads the scratchpad sequence number.
    pub async fn get_scratchpad_sequence(&self) -> Result<u8> {
        self.read_csap_u8(CsapAttribute::ScratchpadSequence).await
    }

    /// Reads the mesh API version.
    pub async fn get_mesh_api_version(&self) -> Result<u16> {
        self.read_csap_u16(CsapAttribute::MeshApiVersion).await
    }

    /// Reads the firmware version.
    pub async fn get_firmware_version(&self) -> Result<FirmwareVersion> {
        Ok(FirmwareVersion {
            major: self.read_csap_u16(CsapAttribute::FirmwareMajor).await?,
            minor: self.read_csap_u16(CsapAttribute::FirmwareMinor).await?,
            maintenance: self
                .read_csap_u16(CsapAttribute::FirmwareMaintenance)
                .await?,
            development: self
                .read_csap_u16(CsapAttribute::FirmwareDevelopment)
                .await?,
        })
    }

    /// Reads the usable channel range.
    pub async fn get_channel_limits(&self) -> Result<ChannelLimits> {
        let value = self
            .commands()?
            .read_csap(CsapAttribute::ChannelLimits)
            .await?;
        Ok(ChannelLimits {
            first: value[0],
            last: value[1],
        })
    }

    /// Reads the hardware magic number.
    pub async fn get_hw_magic(&self) -> Result<u16> {
        self.read_csap_u16(CsapAttribute::HwMagic).await
    }

    /// Reads the stack profile.
    pub async fn get_stack_profile(&self) -> Result<u16> {
        self.read_csap_u16(CsapAttribute::StackProfile).await
    }

    /// Reads the number of PDU buffers in use.
    pub async fn get_pdu_buffer_usage(&self) -> Result<u8> {
        self.read_msap_u8(MsapAttribute::PduBufferUsage).await
    }

    /// Reads the number of free PDU buffers.
    pub async fn get_pdu_buffer_capacity(&self) -> Result<u8> {
        self.read_msap_u8(MsapAttribute::PduBufferCapacity).await
    }

    /// Reads the remaining energy estimate.
    pub async fn get_remaining_energy(&self) -> Result<u8> {
        self.read_msap_u8(MsapAttribute::RemainingEnergy).await
    }

    /// Reads the number of routes to sinks.
    pub async fn get_route_count(&self) -> Result<u8> {
        self.read_msap_u8(MsapAttribute::RouteCount).await
    }

    /// Reads the node's system time in seconds.
    pub async fn get_system_time(&self) -> Result<u32> {
        let value = self
            .commands()?
            .read_msap(MsapAttribute::SystemTime)
            .await?;
        Ok(u32_le(&value))
    }

    // ==================== Runtime Management ====================

    /// Sets the remaining energy estimate and returns the value confirmed
    /// by the node.
    pub async fn set_remaining_energy(&self, energy: u8) -> Result<u8> {
        self.commands()?
            .write_msap(
                MsapAttribute::RemainingEnergy,
                Bytes::copy_from_slice(&[energy]),
            )
            .await?;
        self.get_remaining_energy().await
    }

    /// Returns true if the stack starts automatically after boot.
    pub async fn get_autostart(&self) -> Result<bool> {
        Ok(self.read_msap_u8(MsapAttribute::Autostart).await? != 0)
    }

    /// Enables or disables stack autostart and returns the confirmed
    /// setting.
    pub async fn set_autostart(&self, enabled: bool) -> Result<bool> {
        self.commands()?
            .write_msap(
                MsapAttribute::Autostart,
                Bytes::copy_from_slice(&[u8::from(enabled)]),
            )
            .await?;
        self.get_autostart().await
    }

    /// Reads the configured access cycle range.
    pub async fn get_access_cycle_range(&self) -> Result<AccessCycleRange> {
        self.read_access_cycles(MsapAttribute::AccessCycleRange).await
    }

    /// Sets the access cycle range and returns the range confirmed by the
    /// node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `min_ms` exceeds `max_ms`.
    pub async fn set_access_cycle_range(
        &self,
        range: AccessCycleRange,
    ) -> Result<AccessCycleRange> {
        if range.min_ms > range.max_ms {
            return Err(Error::invalid(format!(
                "access cycle minimum {}ms exceeds maximum {}ms",
                range.min_ms, range.max_ms
            )));
        }
        self.commands()?
            .write_msap(
                MsapAttribute::AccessCycleRange,
                Bytes::copy_from_slice(&range.to_le_bytes()),
            )
            .await?;
        self.get_access_cycle_range().await
    }

    /// Reads the access cycle bounds supported by the node.
    pub async fn get_access_cycle_limits(&self) -> Result<AccessCycleRange> {
        self.read_access_cycles(MsapAttribute::AccessCycleLimits).await
    }

    /// Reads the access cycle currently in use, in milliseconds.
    pub async fn get_current_access_cycle(&self) -> Result<u16> {
        let value = self
            .commands()?
            .read_msap(MsapAttribute::CurrentAccessCycle)
            .await?;
        Ok(u16::from_le_bytes([value[0], value[1]]))
    }

    /// Reads the largest scratchpad block the node accepts.
    pub async fn get_scratchpad_block_max(&self) -> Result<u8> {
        self.read_msap_u8(MsapAttribute::ScratchpadBlockMax).await
    }

    async fn read_access_cycles(&self, attribute: MsapAttribute) -> Result<AccessCycleRange> {
        let value = self.commands()?.read_msap(attribute).await?;
        Ok(AccessCycleRange::from_le_bytes([
            value[0], value[1], value[2], value[3],
        ]))
    }

    async fn read_csap_u8(&self, attribute: CsapAttribute) -> Result<u8> {
        let value = self.commands()?.read_csap(attribute).await?;
        Ok(value[0])
    }

    async fn read_csap_u16(&self, attribute: CsapAttribute) -> Result<u16> {
        let value = self.commands()?.read_csap(attribute).await?;
        Ok(u16::from_le_bytes([value[0], value[1]]))
    }

    async fn read_msap_u8(&self, attribute: MsapAttribute) -> Result<u8> {
        let value = self.commands()?.read_msap(attribute).await?;
        Ok(value[0])
    }

    // ==================== Stack Control ====================

    /// Starts the stack.
    pub async fn start_stack(&self) -> Result<()> {
        self.commands()?.start_stack().await
    }

    /// Stops the stack. The node reboots after confirming.
    pub async fn stop_stack(&self) -> Result<()> {
        self.commands()?.stop_stack().await
    }

    /// Erases the node's persistent configuration.
    pub async fn factory_reset(&self) -> Result<()> {
        self.commands()?.factory_reset().await
    }

    // ==================== Network Operations ====================

    /// Reads the sink cost.
    pub async fn get_sink_cost(&self) -> Result<u8> {
        self.commands()?.read_sink_cost().await
    }

    /// Sets the sink cost and returns the cost confirmed by the node.
    pub async fn set_sink_cost(&self, cost: u8) -> Result<u8> {
        self.commands()?.write_sink_cost(cost).await?;
        self.get_sink_cost().await
    }

    /// Reads the neighbor list.
    pub async fn get_neighbors(&self) -> Result<Vec<NeighborInfo>> {
        self.commands()?.get_neighbors().await
    }

    /// Starts a neighbor scan. Completion is reported to the
    /// [scan handler](Self::register_for_scan_neighbors_done).
    pub async fn start_scan_neighbors(&self) -> Result<()> {
        self.commands()?.scan_neighbors().await
    }

    /// Asks a node for its scratchpad status. The answer is reported to the
    /// [remote status handler](Self::register_for_remote_status).
    pub async fn request_remote_status(&self, target: NodeAddress) -> Result<()> {
        self.commands()?
            .request_remote_status(target)
            .await
    }

    /// Sends application data. Returns the node's remaining buffer
    /// capacity.
    pub async fn send_data(&self, message: DataMessage) -> Result<u8> {
        self.commands()?.send_data(message).await
    }

    // ==================== Event Registration ====================

    fn register(&self, kind: EventKind, handler: Handler) -> Result<()> {
        self.shared.ensure_open()?;
        self.shared.events.register(kind, handler);
        Ok(())
    }

    /// Registers the handler for app config changes.
    pub fn register_for_app_config_data<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(DiagnosticConfig) + Send + Sync + 'static,
    {
        self.register(
            EventKind::AppConfigChanged,
            Arc::new(move |event: Event| {
                if let Event::AppConfigChanged(config) = event {
                    handler(config);
                }
            }),
        )
    }

    /// Registers the handler for data received on `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] if `endpoint` is outside
    /// `[0, 255]`.
    pub fn register_for_data<E, F>(&self, endpoint: E, handler: F) -> Result<()>
    where
        E: TryInto<u8> + Copy + fmt::Display,
        F: Fn(ReceivedData) + Send + Sync + 'static,
    {
        let endpoint = Endpoint::new(endpoint)?;
        self.register(
            EventKind::DataReceived(endpoint),
            Arc::new(move |event: Event| {
                if let Event::DataReceived(data) = event {
                    handler(data);
                }
            }),
        )
    }

    /// Registers the handler for neighbor scan completion.
    pub fn register_for_scan_neighbors_done<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(ScanNeighborsDone) + Send + Sync + 'static,
    {
        self.register(
            EventKind::ScanNeighborsDone,
            Arc::new(move |event: Event| {
                if let Event::ScanNeighborsDone(done) = event {
                    handler(done);
                }
            }),
        )
    }

    /// Registers the handler for remote status reports.
    pub fn register_for_remote_status<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(RemoteStatus) + Send + Sync + 'static,
    {
        self.register(
            EventKind::RemoteStatus,
            Arc::new(move |event: Event| {
                if let Event::RemoteStatus(status) = event {
                    handler(status);
                }
            }),
        )
    }

    /// Registers the handler for stack status changes.
    pub fn register_for_stack_status<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(StackStatus) + Send + Sync + 'static,
    {
        self.register(
            EventKind::StackStatusChanged,
            Arc::new(move |event: Event| {
                if let Event::StackStatusChanged(status) = event {
                    handler(status);
                }
            }),
        )
    }

    /// Registers the handler for transmission reports.
    pub fn register_for_data_sent<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(DataSent) + Send + Sync + 'static,
    {
        self.register(
            EventKind::DataSent,
            Arc::new(move |event: Event| {
                if let Event::DataSent(sent) = event {
                    handler(sent);
                }
            }),
        )
    }

    /// Removes the app config handler.
    pub fn unregister_for_app_config_data(&self) -> bool {
        self.shared.events.unregister(EventKind::AppConfigChanged)
    }

    /// Removes the data handler of `endpoint`.
    pub fn unregister_for_data<E>(&self, endpoint: E) -> Result<bool>
    where
        E: TryInto<u8> + Copy + fmt::Display,
    {
        let endpoint = Endpoint::new(endpoint)?;
        Ok(self
            .shared
            .events
            .unregister(EventKind::DataReceived(endpoint)))
    }

    /// Removes the neighbor scan handler.
    pub fn unregister_for_scan_neighbors_done(&self) -> bool {
        self.shared.events.unregister(EventKind::ScanNeighborsDone)
    }

    /// Removes the remote status handler.
    pub fn unregister_for_remote_status(&self) -> bool {
        self.shared.events.unregister(EventKind::RemoteStatus)
    }

    /// Removes the stack status handler.
    pub fn unregister_for_stack_status(&self) -> bool {
        self.shared.events.unregister(EventKind::StackStatusChanged)
    }

    /// Removes the transmission report handler.
    pub fn unregister_for_data_sent(&self) -> bool {
        self.shared.events.unregister(EventKind::DataSent)
    }
}

fn u32_le(value: &[u8]) -> u32 {
    le_array::<4>(value).map_or(0, u32::from_le_bytes)
}

// ==================== Reader Task ====================

/// State of the background reader.
struct ReaderTask<T> {
    shared: Arc<Shared<T>>,
    events: mpsc::Sender<Event>,
    state: watch::Receiver<ConnectionState>,
    decoder: SlipDecoder,
    /// Last indication of a burst that announced more to come.
    burst: Option<Instant>,
    /// Frame id and send time of the outstanding poll.
    poll_pending: Option<(u8, Instant)>,
}

impl<T: Transport + 'static> ReaderTask<T> {
    fn new(
        shared: Arc<Shared<T>>,
        events: mpsc::Sender<Event>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            shared,
            events,
            state,
            decoder: SlipDecoder::new(),
            burst: None,
            poll_pending: None,
        }
    }

    async fn run(mut self, mut reader: Box<dyn TransportReader>) {
        let mut poll = self.shared.poll_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let mut read_errors = 0;
        let lost = loop {
            tokio::select! {
                biased;
                changed = self.state.changed() => {
                    let stopping = changed.is_err() || matches!(
                        *self.state.borrow_and_update(),
                        ConnectionState::Closing | ConnectionState::Closed
                    );
                    if stopping {
                        break None;
                    }
                }
                received = reader.recv() => match received {
                    Ok(chunk) => {
                        read_errors = 0;
                        self.feed(&chunk).await;
                    }
                    Err(e) if e.is_connection_lost() => break Some(e),
                    Err(e) => {
                        read_errors += 1;
                        if read_errors >= MAX_READ_ERRORS {
                            break Some(e);
                        }
                        tracing::warn!(read_errors, "read failed: {}", e);
                        self.shared.record_error(e);
                    }
                },
                () = next_tick(&mut poll) => self.poll().await,
            }
        };

        if let Some(e) = lost {
            tracing::error!("transport lost: {}", e);
            if self.shared.begin_close() {
                let _ = self.shared.finish_close().await;
            }
        }
        tracing::debug!("reader stopped");
    }

    async fn feed(&mut self, chunk: &[u8]) {
        self.decoder.feed(chunk);
        loop {
            match self.decoder.decode() {
                Ok(Some(raw)) => self.handle_frame(&raw).await,
                Ok(None) => break,
                Err(e) => self.drop_frame(e),
            }
        }
    }

    async fn handle_frame(&mut self, raw: &[u8]) {
        tracing::trace!(raw = %hex::encode(raw), "received frame");
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => return self.drop_frame(e),
        };

        // The node keeps resending until acked, even if the body is garbage
        if !is_confirm(frame.primitive_id) {
            self.acknowledge(&frame).await;
        }

        match parser::decode(&frame, current_timestamp_ms()) {
            Ok(Inbound::Confirm(confirm)) => self.handle_confirm(confirm).await,
            Ok(Inbound::Indication(indication)) => self.handle_indication(indication).await,
            Err(e) => self.drop_frame(e),
        }
    }

    fn drop_frame(&self, e: FrameError) {
        tracing::warn!("dropping frame: {}", e);
        self.shared.record_error(e.into());
    }

    /// Answers an indication, echoing its frame id and `more` flag.
    async fn acknowledge(&mut self, frame: &Frame) {
        let more = frame.payload.first().is_some_and(|&status| status != 0);
        let ack = Frame::new(
            frame.primitive_id.wrapping_add(RESPONSE_OFFSET),
            frame.frame_id,
            vec![u8::from(more)],
        );
        if let Err(e) = self.shared.commands.send_frame(&ack).await {
            tracing::warn!("failed to acknowledge indication: {}", e);
        }
        self.burst = more.then(Instant::now);
    }

    async fn handle_confirm(&mut self, confirm: Confirm) {
        let matched = self
            .shared
            .commands
            .correlator()
            .take(confirm.frame_id, confirm.primitive);

        match matched {
            Matched::Waiting(reply) => {
                if reply.is_closed() {
                    tracing::debug!(
                        primitive = ?confirm.primitive,
                        frame_id = confirm.frame_id,
                        "caller gone, discarding confirm"
                    );
                    return;
                }
                // Store first, so the caller finds its value in the snapshot
                self.shared.store.apply_confirm(&confirm).await;
                let _ = reply.send(Ok(confirm));
            }
            Matched::Internal => {
                self.poll_pending = None;
                if confirm.body.result() == 1 {
                    tracing::trace!("indications pending");
                    self.burst = Some(Instant::now());
                }
            }
            Matched::Late => {
                tracing::debug!(
                    primitive = ?confirm.primitive,
                    frame_id = confirm.frame_id,
                    "discarding late confirm"
                );
            }
            Matched::Unknown => {
                tracing::warn!(
                    primitive = ?confirm.primitive,
                    frame_id = confirm.frame_id,
                    "confirm matches no request"
                );
            }
        }
    }

    async fn handle_indication(&mut self, indication: Indication) {
        tracing::debug!(id = ?indication.id, more = indication.more, "indication");
        self.shared.store.apply_event(&indication.event).await;

        if self.events.send(indication.event).await.is_err() {
            tracing::debug!("dispatch stopped, event dropped");
        }
    }

    async fn poll(&mut self) {
        if self
            .burst
            .is_some_and(|last| last.elapsed() < INDICATION_TIMEOUT)
        {
            return;
        }
        self.burst = None;

        if let Some((frame_id, sent)) = self.poll_pending {
            if sent.elapsed() < self.shared.commands.timeout() {
                return;
            }
            tracing::debug!(frame_id, "poll unanswered");
            self.shared.commands.correlator().release(frame_id);
            self.poll_pending = None;
        }

        let allocated = self
            .shared
            .commands
            .correlator()
            .allocate_internal(Primitive::IndicationPoll);
        let frame_id = match allocated {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!("poll skipped: {}", e);
                return;
            }
        };

        let frame = Frame::new(u8::from(Primitive::IndicationPoll), frame_id, Bytes::new());
        if let Err(e) = self.shared.commands.send_frame(&frame).await {
            tracing::warn!("poll failed: {}", e);
            self.shared.commands.correlator().release(frame_id);
            return;
        }
        self.poll_pending = Some((frame_id, Instant::now()));
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
