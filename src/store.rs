//! Last-known node configuration.
//!
//! The reader task is the only writer: it applies every decoded confirm and
//! indication before waking the waiting caller or queueing the event, so a
//! caller that gets a value back always finds the same value in the
//! snapshot.

use tokio::sync::RwLock;

use crate::event::Event;
use crate::protocol::attribute::{CsapAttribute, MsapAttribute, app_config_result, read_result};
use crate::protocol::parser::{Confirm, ConfirmBody};
use crate::protocol::primitive::Primitive;
use crate::types::{Channel, ConfigSnapshot, NetworkAddress, NodeAddress, Role, StackStatus};

/// Shared configuration snapshot.
#[derive(Debug, Default)]
pub struct ConfigurationStore {
    snapshot: RwLock<ConfigSnapshot>,
}

impl ConfigurationStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current snapshot.
    pub async fn snapshot(&self) -> ConfigSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Resets every field to unset.
    pub async fn clear(&self) {
        *self.snapshot.write().await = ConfigSnapshot::default();
    }

    /// Applies a confirm to the snapshot.
    ///
    /// Only read confirms carry values. A "not set" answer clears the field.
    pub async fn apply_confirm(&self, confirm: &Confirm) {
        match (&confirm.primitive, &confirm.body) {
            (
                Primitive::CsapAttributeRead,
                ConfirmBody::Attribute {
                    result,
                    attribute,
                    value,
                },
            ) => {
                if let Some(attribute) = CsapAttribute::from_id(*attribute) {
                    let mut snapshot = self.snapshot.write().await;
                    apply_csap(&mut snapshot, attribute, *result, value);
                }
            }
            (
                Primitive::MsapAttributeRead,
                ConfirmBody::Attribute {
                    result,
                    attribute,
                    value,
                },
            ) => {
                if *attribute == MsapAttribute::StackStatus as u16 && *result == read_result::OK {
                    if let Some(&bits) = value.first() {
                        self.snapshot.write().await.stack_status = Some(StackStatus(bits));
                    }
                }
            }
            (Primitive::AppConfigRead, ConfirmBody::AppConfig { result, config }) => {
                match *result {
                    app_config_result::OK => {
                        self.snapshot.write().await.app_config.clone_from(config);
                    }
                    app_config_result::NO_CONFIG => {
                        self.snapshot.write().await.app_config = None;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Applies a pushed event to the snapshot.
    pub async fn apply_event(&self, event: &Event) {
        match event {
            Event::AppConfigChanged(config) => {
                self.snapshot.write().await.app_config = Some(config.clone());
            }
            Event::StackStatusChanged(status) => {
                self.snapshot.write().await.stack_status = Some(*status);
            }
            _ => {}
        }
    }
}

fn apply_csap(snapshot: &mut ConfigSnapshot, attribute: CsapAttribute, result: u8, value: &[u8]) {
    match attribute {
        CsapAttribute::AuthenticationKey => {
            if let Some(set) = key_presence(result) {
                snapshot.authentication_key_set = Some(set);
            }
            return;
        }
        CsapAttribute::CipherKey => {
            if let Some(set) = key_presence(result) {
                snapshot.cipher_key_set = Some(set);
            }
            return;
        }
        _ => {}
    }

    let unset = result == read_result::NOT_SET;
    if result != read_result::OK && !unset {
        return;
    }

    match attribute {
        CsapAttribute::NodeAddress => {
            snapshot.node_address = if unset {
                None
            } else {
                le_array::<4>(value).map(|b| NodeAddress(u32::from_le_bytes(b)))
            };
        }
        CsapAttribute::NetworkAddress => {
            snapshot.network_address = if unset {
                None
            } else {
                le_array::<3>(value).map(NetworkAddress::from_le_bytes)
            };
        }
        CsapAttribute::NetworkChannel => {
            snapshot.network_channel = if unset {
                None
            } else {
                value.first().map(|&c| Channel(c))
            };
        }
        CsapAttribute::NodeRole => {
            snapshot.role = if unset {
                None
            } else {
                value.first().and_then(|&r| Role::from_byte(r))
            };
        }
        _ => {}
    }
}

/// Key presence from a key read result: keys are write-only, so a set key
/// answers "access denied" and a missing key answers "not set".
pub(crate) const fn key_presence(result: u8) -> Option<bool> {
    match result {
        read_result::ACCESS_DENIED | read_result::OK => Some(true),
        read_result::NOT_SET => Some(false),
        _ => None,
    }
}

pub(crate) fn le_array<const N: usize>(value: &[u8]) -> Option<[u8; N]> {
    value.get(..N).and_then(|bytes| bytes.try_into().ok())
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::types::DiagnosticConfig;

    fn csap_read(attribute: CsapAttribute, result: u8, value: &'static [u8]) -> Confirm {
        Confirm {
            primitive: Primitive::CsapAttributeRead,
            frame_id: 0,
            body: ConfirmBody::Attribute {
                result,
                attribute: attribute as u16,
                value: Bytes::from_static(value),
            },
        }
    }

    #[tokio::test]
    async fn test_read_confirm_fills_snapshot() {
        let store = ConfigurationStore::new();
        store
            .apply_confirm(&csap_read(CsapAttribute::NetworkAddress, 0, &[0x56, 0x34, 0x12]))
            .await;
        store
            .apply_confirm(&csap_read(CsapAttribute::NetworkChannel, 0, &[5]))
            .await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.network_address.map(u32::from), Some(0x12_3456));
        assert_eq!(snapshot.network_channel, Some(Channel(5)));
        assert_eq!(snapshot.node_address, None);
    }

    #[tokio::test]
    async fn test_not_set_clears_field() {
        let store = ConfigurationStore::new();
        store
            .apply_confirm(&csap_read(CsapAttribute::NodeAddress, 0, &[1, 0, 0, 0]))
            .await;
        assert_eq!(store.snapshot().await.node_address, Some(NodeAddress(1)));

        store
            .apply_confirm(&csap_read(CsapAttribute::NodeAddress, 4, &[]))
            .await;
        assert_eq!(store.snapshot().await.node_address, None);
    }

    #[tokio::test]
    async fn test_key_presence() {
        let store = ConfigurationStore::new();
        store
            .apply_confirm(&csap_read(CsapAttribute::CipherKey, 5, &[]))
            .await;
        store
            .apply_confirm(&csap_read(CsapAttribute::AuthenticationKey, 4, &[]))
            .await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.cipher_key_set, Some(true));
        assert_eq!(snapshot.authentication_key_set, Some(false));
    }

    #[tokio::test]
    async fn test_push_updates_app_config() {
        let store = ConfigurationStore::new();
        let config = DiagnosticConfig {
            sequence: 2,
            interval_s: 60,
            data: Bytes::from_static(b"abc"),
        };
        store
            .apply_event(&Event::AppConfigChanged(config.clone()))
            .await;
        assert_eq!(store.snapshot().await.app_config, Some(config));

        store.clear().await;
        assert_eq!(store.snapshot().await, ConfigSnapshot::default());
    }
}
