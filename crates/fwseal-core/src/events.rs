//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front-end) to follow a transfer without
//! tight coupling to the session logic.

use std::fmt;

use crate::error::SessionError;
use crate::protocol::describe_byte;
use crate::state::Phase;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by a transfer session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Phase changed.
    PhaseChanged { from: Phase, to: Phase },
    /// Local bundle verification passed.
    BundleVerified {
        version: u16,
        firmware_len: usize,
        message: String,
    },
    /// A data frame was acknowledged.
    Progress {
        frames_sent: usize,
        total_frames: usize,
        bytes_sent: usize,
        total_bytes: usize,
    },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Acknowledgment byte received from the device.
    AckReceived { byte: u8 },
    /// Bytes sent or received on the channel.
    Packet {
        direction: PacketDirection,
        packet_type: String,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// Transfer acknowledged in full.
    Complete { frames_sent: usize, bytes_sent: usize },
    /// Session aborted.
    Aborted { reason: SessionError },
    /// BOOT token sent.
    BootRequested,
}

/// Channel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving transfer events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait TransferObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &TransferEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl TransferObserver for NullObserver {
    fn on_event(&self, _event: &TransferEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl TransferObserver for TracingObserver {
    fn on_event(&self, event: &TransferEvent) {
        match event {
            TransferEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            TransferEvent::BundleVerified {
                version,
                firmware_len,
                message,
            } => {
                tracing::info!(version, firmware_len, message = %message, "Bundle verified");
            }
            TransferEvent::Progress {
                frames_sent,
                total_frames,
                bytes_sent,
                total_bytes,
            } => {
                let pct = if *total_bytes > 0 {
                    (*bytes_sent * 100) / *total_bytes
                } else {
                    100
                };
                tracing::debug!(
                    frame = %format!("{}/{}", frames_sent, total_frames),
                    progress = %format!("{}%", pct),
                    "Progress"
                );
            }
            TransferEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            TransferEvent::AckReceived { byte } => {
                tracing::trace!(ack = %describe_byte(*byte), "ACK received");
            }
            TransferEvent::Packet {
                direction,
                packet_type,
                length,
                ..
            } => {
                tracing::trace!(dir = %direction, kind = %packet_type, len = length, "Packet");
            }
            TransferEvent::Complete {
                frames_sent,
                bytes_sent,
            } => {
                tracing::info!(frames_sent, bytes_sent, "Transfer complete");
            }
            TransferEvent::Aborted { reason } => {
                tracing::error!(reason = %reason, "Transfer aborted");
            }
            TransferEvent::BootRequested => {
                tracing::info!("Boot requested");
            }
        }
    }
}
