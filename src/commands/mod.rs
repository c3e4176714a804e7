//! Request/response engine.
//!
//! [`CommandHandler`] sends requests to the node and waits for their
//! confirms. Confirms are matched by frame id and primitive in the
//! [`Correlator`]; the reader task delivers them. Node result codes are
//! translated into [`Error`] kinds here.

pub mod correlation;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::protocol::attribute::{
    CsapAttribute, MsapAttribute, app_config_result, read_result, write_result,
};
use crate::protocol::frame::Frame;
use crate::protocol::parser::{Confirm, ConfirmBody};
use crate::protocol::request::{MAX_APP_CONFIG_SIZE, Request};
use crate::transport::Transport;
use crate::types::{Attribute, DataMessage, DiagnosticConfig, NeighborInfo, NodeAddress};

pub use correlation::{Correlator, Matched};

/// Default time to wait for a confirm.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Sends requests and waits for their confirms.
pub struct CommandHandler<T> {
    transport: Arc<tokio::sync::Mutex<T>>,
    correlator: Arc<Mutex<Correlator>>,
    timeout: Duration,
}

impl<T: Transport> CommandHandler<T> {
    /// Creates a handler over a shared transport.
    #[must_use]
    pub fn new(transport: Arc<tokio::sync::Mutex<T>>, timeout: Duration) -> Self {
        Self {
            transport,
            correlator: Arc::new(Mutex::new(Correlator::new())),
            timeout,
        }
    }

    /// Returns the confirm timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Locks the correlation table.
    pub fn correlator(&self) -> MutexGuard<'_, Correlator> {
        self.correlator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes one frame to the transport.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode();
        tracing::trace!(
            primitive = frame.primitive_id,
            frame_id = frame.frame_id,
            raw = %hex::encode(&bytes),
            "sending frame"
        );
        let mut transport = self.transport.lock().await;
        transport.send(bytes).await
    }

    /// Sends a request and waits for its confirm.
    ///
    /// On timeout the frame id is quarantined so a late confirm cannot
    /// resolve a later request. A confirm the reader has already taken when
    /// the deadline passes is still delivered, never dropped after being
    /// applied.
    pub async fn request(&self, request: Request) -> Result<Confirm> {
        let primitive = request.primitive();
        let (frame_id, mut receiver) = self.correlator().allocate(primitive)?;

        let sent = match request.encode(frame_id) {
            Ok(frame) => self.send_frame(&frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            self.correlator().release(frame_id);
            return Err(e);
        }
        tracing::debug!(?primitive, frame_id, "request sent");

        let received = match tokio::time::timeout(self.timeout, &mut receiver).await {
            Ok(received) => received,
            Err(_) => {
                let abandoned = self.correlator().abandon(frame_id);
                if abandoned {
                    tracing::debug!(?primitive, frame_id, "request timed out");
                    return Err(Error::timeout(self.timeout));
                }
                // The reader took the confirm as the deadline passed
                receiver.await
            }
        };
        // Sender dropped without an answer: the table was torn down
        received.unwrap_or_else(|_| Err(Error::NotConnected))
    }

    /// Sends a request whose confirm carries only a result byte.
    async fn request_status(&self, request: Request) -> Result<u8> {
        let confirm = self.request(request).await?;
        Ok(confirm.body.result())
    }

    // ==================== Attributes ====================

    /// Reads a configuration attribute value.
    pub async fn read_csap(&self, attribute: CsapAttribute) -> Result<Bytes> {
        let (result, value) = self.read_csap_raw(attribute).await?;
        if result != read_result::OK {
            return Err(read_error(attribute.attribute(), result));
        }
        check_len(attribute.attribute(), attribute.value_len(), value)
    }

    /// Reads a configuration attribute and returns the raw result code.
    pub async fn read_csap_raw(&self, attribute: CsapAttribute) -> Result<(u8, Bytes)> {
        let confirm = self.request(Request::CsapRead(attribute)).await?;
        attribute_body(confirm, attribute as u16)
    }

    /// Writes a configuration attribute.
    pub async fn write_csap(&self, attribute: CsapAttribute, value: Bytes) -> Result<()> {
        let result = self
            .request_status(Request::CsapWrite(attribute, value))
            .await?;
        if result == write_result::OK {
            Ok(())
        } else {
            Err(write_error(attribute.attribute(), result))
        }
    }

    /// Reads a management attribute value.
    pub async fn read_msap(&self, attribute: MsapAttribute) -> Result<Bytes> {
        let confirm = self.request(Request::MsapRead(attribute)).await?;
        let (result, value) = attribute_body(confirm, attribute as u16)?;
        if result != read_result::OK {
            return Err(read_error(attribute.attribute(), result));
        }
        check_len(attribute.attribute(), attribute.value_len(), value)
    }

    /// Writes a management attribute.
    pub async fn write_msap(&self, attribute: MsapAttribute, value: Bytes) -> Result<()> {
        let result = self
            .request_status(Request::MsapWrite(attribute, value))
            .await?;
        if result == write_result::OK {
            Ok(())
        } else {
            Err(write_error(attribute.attribute(), result))
        }
    }

    // ==================== App config ====================

    /// Reads the app config data.
    pub async fn read_app_config(&self) -> Result<DiagnosticConfig> {
        let confirm = self.request(Request::AppConfigRead).await?;
        match confirm.body {
            ConfirmBody::AppConfig {
                config: Some(config),
                ..
            } => Ok(config),
            ConfirmBody::AppConfig {
                result: app_config_result::NO_CONFIG,
                ..
            } => Err(Error::AttributeUnset {
                attribute: Attribute::AppConfigData,
            }),
            ConfirmBody::AppConfig { result, .. } => Err(Error::protocol(format!(
                "app config read failed with result {result}"
            ))),
            other => Err(unexpected(&other)),
        }
    }

    /// Writes the app config data, padded to `size` bytes.
    pub async fn write_app_config(
        &self,
        sequence: u8,
        interval_s: u16,
        data: Bytes,
        size: usize,
    ) -> Result<()> {
        let result = self
            .request_status(Request::AppConfigWrite {
                sequence,
                interval_s,
                data,
                size: size.min(MAX_APP_CONFIG_SIZE),
            })
            .await?;
        match result {
            app_config_result::OK => Ok(()),
            app_config_result::NOT_A_SINK => {
                Err(Error::protocol("app config can only be written on a sink"))
            }
            app_config_result::INVALID_INTERVAL => Err(Error::invalid(format!(
                "diagnostic interval {interval_s}s rejected by node"
            ))),
            app_config_result::INVALID_SEQUENCE => Err(Error::invalid(format!(
                "app config sequence {sequence} rejected by node"
            ))),
            other => Err(Error::protocol(format!(
                "app config write failed with result {other}"
            ))),
        }
    }

    // ==================== Stack control ====================

    /// Starts the stack.
    pub async fn start_stack(&self) -> Result<()> {
        match self.request_status(Request::StackStart).await? {
            0 => Ok(()),
            flags => Err(Error::protocol(start_failure(flags))),
        }
    }

    /// Stops the stack.
    pub async fn stop_stack(&self) -> Result<()> {
        match self.request_status(Request::StackStop).await? {
            0 => Ok(()),
            1 => Err(Error::protocol("stack already stopped")),
            128 => Err(Error::protocol("stack stop denied")),
            other => Err(Error::protocol(format!(
                "stack stop failed with result {other}"
            ))),
        }
    }

    /// Resets the node to factory settings.
    pub async fn factory_reset(&self) -> Result<()> {
        match self.request_status(Request::FactoryReset).await? {
            0 => Ok(()),
            1 => Err(Error::protocol("factory reset requires the stack to be stopped")),
            3 => Err(Error::protocol("factory reset denied")),
            other => Err(Error::protocol(format!(
                "factory reset failed with result {other}"
            ))),
        }
    }

    // ==================== Network ====================

    /// Starts a neighbor scan. Completion is pushed as an event.
    pub async fn scan_neighbors(&self) -> Result<()> {
        match self.request_status(Request::ScanNeighbors).await? {
            0 => Ok(()),
            1 => Err(Error::protocol("neighbor scan requires a running stack")),
            other => Err(Error::protocol(format!(
                "neighbor scan failed with result {other}"
            ))),
        }
    }

    /// Reads the neighbor list.
    pub async fn get_neighbors(&self) -> Result<Vec<NeighborInfo>> {
        let confirm = self.request(Request::GetNeighbors).await?;
        match confirm.body {
            ConfirmBody::Neighbors(list) => Ok(list),
            other => Err(unexpected(&other)),
        }
    }

    /// Reads the sink cost.
    pub async fn read_sink_cost(&self) -> Result<u8> {
        let confirm = self.request(Request::SinkCostRead).await?;
        match confirm.body {
            ConfirmBody::SinkCost { result: 0, cost } => Ok(cost),
            ConfirmBody::SinkCost { result, .. } => Err(Error::protocol(format!(
                "sink cost read failed with result {result}"
            ))),
            other => Err(unexpected(&other)),
        }
    }

    /// Writes the sink cost.
    pub async fn write_sink_cost(&self, cost: u8) -> Result<()> {
        match self.request_status(Request::SinkCostWrite(cost)).await? {
            0 => Ok(()),
            1 => Err(Error::protocol("sink cost can only be written on a sink")),
            other => Err(Error::protocol(format!(
                "sink cost write failed with result {other}"
            ))),
        }
    }

    /// Asks a node for its scratchpad status. The report is pushed as an
    /// event.
    pub async fn request_remote_status(&self, target: NodeAddress) -> Result<()> {
        match self.request_status(Request::RemoteStatus(target)).await? {
            0 => Ok(()),
            other => Err(Error::protocol(format!(
                "remote status request failed with result {other}"
            ))),
        }
    }

    /// Sends application data. Returns the node's remaining buffer
    /// capacity.
    pub async fn send_data(&self, message: DataMessage) -> Result<u8> {
        let confirm = self.request(Request::DataTx(message)).await?;
        match confirm.body {
            ConfirmBody::DataTx {
                result: 0,
                capacity,
                ..
            } => Ok(capacity),
            ConfirmBody::DataTx { result, .. } => Err(data_tx_error(result)),
            other => Err(unexpected(&other)),
        }
    }
}

fn attribute_body(confirm: Confirm, expected: u16) -> Result<(u8, Bytes)> {
    match confirm.body {
        ConfirmBody::Attribute {
            result,
            attribute,
            value,
        } if attribute == expected => Ok((result, value)),
        ConfirmBody::Attribute { attribute, .. } => Err(Error::protocol(format!(
            "confirm for attribute {attribute}, expected {expected}"
        ))),
        other => Err(unexpected(&other)),
    }
}

fn check_len(attribute: Attribute, len: usize, value: Bytes) -> Result<Bytes> {
    if value.len() == len {
        Ok(value)
    } else {
        Err(Error::protocol(format!(
            "{attribute}: expected {len} bytes, got {}",
            value.len()
        )))
    }
}

fn unexpected(body: &ConfirmBody) -> Error {
    Error::protocol(format!("unexpected confirm body: {body:?}"))
}

/// Translates an attribute read result code.
pub(crate) fn read_error(attribute: Attribute, result: u8) -> Error {
    match result {
        read_result::NOT_SET => Error::AttributeUnset { attribute },
        read_result::STACK_NOT_STOPPED => Error::protocol(format!(
            "reading {attribute} requires the stack to be stopped"
        )),
        read_result::ACCESS_DENIED | read_result::ACCESS_DENIED_LOCKED => {
            Error::protocol(format!("access to {attribute} denied"))
        }
        other => Error::protocol(format!(
            "reading {attribute} failed with result {other}"
        )),
    }
}

/// Translates an attribute write result code.
pub(crate) fn write_error(attribute: Attribute, result: u8) -> Error {
    match result {
        write_result::INVALID_VALUE => {
            Error::invalid(format!("node rejected the value for {attribute}"))
        }
        write_result::STACK_NOT_STOPPED => Error::protocol(format!(
            "writing {attribute} requires the stack to be stopped"
        )),
        write_result::ACCESS_DENIED => Error::protocol(format!("access to {attribute} denied")),
        other => Error::protocol(format!(
            "writing {attribute} failed with result {other}"
        )),
    }
}

fn data_tx_error(result: u8) -> Error {
    match result {
        1 => Error::protocol("stack is stopped"),
        2 => Error::invalid("invalid QoS"),
        3 => Error::invalid("invalid transmit options"),
        4 => Error::protocol("node out of memory"),
        5 => Error::invalid("unknown destination"),
        6 => Error::invalid("invalid payload length"),
        9 => Error::invalid("invalid source endpoint"),
        10 => Error::protocol("data send denied"),
        other => Error::protocol(format!("data send failed with result {other}")),
    }
}

fn start_failure(flags: u8) -> String {
    let reasons: Vec<&str> = [
        (0x01, "stack already started"),
        (0x02, "network address not set"),
        (0x04, "node address not set"),
        (0x08, "role not set"),
    ]
    .iter()
    .filter(|(bit, _)| flags & bit != 0)
    .map(|&(_, reason)| reason)
    .collect();

    if reasons.is_empty() {
        format!("stack start failed with result {flags}")
    } else {
        format!("stack start failed: {}", reasons.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_mapping() {
        assert!(matches!(
            read_error(Attribute::NodeAddress, 4),
            Error::AttributeUnset {
                attribute: Attribute::NodeAddress
            }
        ));
        assert!(matches!(
            read_error(Attribute::CipherKey, 5),
            Error::Protocol { .. }
        ));
        assert!(matches!(
            read_error(Attribute::Role, 1),
            Error::Protocol { .. }
        ));
    }

    #[test]
    fn test_write_error_mapping() {
        assert!(matches!(
            write_error(Attribute::NetworkChannel, 4),
            Error::InvalidParameter { .. }
        ));
        let err = write_error(Attribute::NetworkChannel, 2);
        assert!(err.to_string().contains("stack to be stopped"));
    }

    #[test]
    fn test_start_failure_lists_reasons() {
        assert_eq!(
            start_failure(0x06),
            "stack start failed: network address not set, node address not set"
        );
        assert_eq!(start_failure(0x40), "stack start failed with result 64");
    }
}
