//! XModem-1K transfer engine.
//!
//! The HL7800 loader deviates from plain XModem in how a transfer starts:
//! after `AT+WDSD` it answers with a NAK, and that NAK, not a `C` or an
//! ACK, is the signal to send packet 1. Stray ACKs before it are ignored.
//! The NAK may arrive in the same read as the `OK` answering `AT+WDSD`, so
//! the opening chunk is scanned for it.
//!
//! ```text
//! WaitForFirstNack --NAK--> SendData --ACK (final sent)--> SendEndOfFrame
//!                           ^  |  NAK: resend last frame          |
//!                           +--+  ACK: next packet          any bytes
//!                                                                 v
//!                                                             Finished
//! ```

use std::io::{self, Read, Seek, SeekFrom};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::Command;
use crate::protocol::xmodem::{DATA_SIZE, build_data_frame, control, eot_frame, read_block};

/// Transfer engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Upgrade announced, waiting for the loader's opening NAK.
    WaitForFirstNack,
    /// Streaming data packets.
    SendData,
    /// EOT sent, waiting for the loader to answer.
    SendEndOfFrame,
    /// Accept command sent; nothing left to receive.
    Finished,
}

/// What the engine wants sent after handling a received chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing to send.
    Idle,
    /// A new data packet, with the progress it represents.
    Packet {
        /// Encoded frame.
        frame: Vec<u8>,
        /// Percentage of the image sent before this packet.
        progress: u8,
        /// Sequence number of the packet.
        sequence: u8,
        /// Image offset of the payload.
        offset: u64,
        /// Image bytes in the payload, before padding.
        length: usize,
    },
    /// The previous frame, byte for byte.
    Retransmit(Vec<u8>),
    /// The end-of-transmission frame.
    EndOfTransmission(Vec<u8>),
    /// The command accepting the new firmware. The transfer is over.
    Accept(Vec<u8>),
}

/// Streams a firmware image as XModem-1K packets.
pub struct XmodemSender<R> {
    reader: Option<R>,
    size: u64,
    state: TransferState,
    offset: u64,
    sequence: u8,
    cursor: u64,
    final_sent: bool,
    last_frame: Vec<u8>,
    retries: u32,
    max_retries: Option<u32>,
}

impl<R: Read + Seek> XmodemSender<R> {
    /// Create an engine for an image of `size` bytes read from `reader`.
    pub fn new(reader: R, size: u64) -> Self {
        Self {
            reader: Some(reader),
            size,
            state: TransferState::WaitForFirstNack,
            offset: 0,
            sequence: 1,
            cursor: 0,
            final_sent: false,
            last_frame: Vec::new(),
            retries: 0,
            max_retries: None,
        }
    }

    /// Give up after `max` consecutive retransmissions of one packet.
    #[must_use]
    pub fn with_max_retries(mut self, max: Option<u32>) -> Self {
        self.max_retries = max;
        self
    }

    /// Current state.
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Image offset of the next packet to build.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Sequence number of the next packet to build.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Whether the packet reaching end of file has been sent.
    pub fn final_packet_sent(&self) -> bool {
        self.final_sent
    }

    /// The most recently transmitted frame.
    pub fn last_frame(&self) -> &[u8] {
        &self.last_frame
    }

    /// Whether the image is still open.
    pub fn is_open(&self) -> bool {
        self.reader
            .is_some()
    }

    /// Handle a chunk received from the loader.
    ///
    /// Before the transfer starts any NAK in the chunk opens it. During the
    /// data phase only the first byte is meaningful: the loader answers each
    /// frame with a single ACK or NAK.
    pub fn on_bytes(&mut self, bytes: &[u8]) -> Result<Step> {
        let Some(&first) = bytes.first() else {
            return Ok(Step::Idle);
        };

        match self.state {
            TransferState::WaitForFirstNack => {
                if bytes.contains(&control::NAK) {
                    self.start()
                } else {
                    trace!("Ignoring {} bytes while waiting for first NAK", bytes.len());
                    Ok(Step::Idle)
                }
            },
            TransferState::SendData => match first {
                control::ACK => self.on_ack(),
                control::NAK => self.on_nak(),
                other => {
                    trace!("Ignoring 0x{other:02X} during data phase");
                    Ok(Step::Idle)
                },
            },
            TransferState::SendEndOfFrame => {
                debug!("Loader answered EOT, accepting update");
                self.state = TransferState::Finished;
                self.reader = None;
                let frame = Command::UpgradeAccept.encode();
                self.last_frame = frame.clone();
                Ok(Step::Accept(frame))
            },
            TransferState::Finished => Ok(Step::Idle),
        }
    }

    fn start(&mut self) -> Result<Step> {
        debug!("First NAK received, starting transfer of {} bytes", self.size);
        self.state = TransferState::SendData;
        self.offset = 0;
        self.sequence = 1;
        self.retries = 0;
        self.seek_to(0)?;
        self.send_packet()
    }

    fn on_ack(&mut self) -> Result<Step> {
        self.retries = 0;

        if self.final_sent {
            debug!("Final packet acknowledged, sending EOT");
            self.state = TransferState::SendEndOfFrame;
            let frame = eot_frame();
            self.last_frame = frame.clone();
            return Ok(Step::EndOfTransmission(frame));
        }

        self.send_packet()
    }

    fn on_nak(&mut self) -> Result<Step> {
        if let Some(max) = self.max_retries {
            if self.retries >= max {
                return Err(Error::RetryLimit {
                    sequence: self.last_frame_sequence(),
                    retries: self.retries,
                });
            }
        }

        self.retries += 1;
        warn!(
            "NAK for packet #{}, retransmitting (attempt {})",
            self.last_frame_sequence(),
            self.retries
        );
        Ok(Step::Retransmit(self.last_frame.clone()))
    }

    fn send_packet(&mut self) -> Result<Step> {
        if self.cursor != self.offset {
            self.seek_to(self.offset)?;
        }

        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::FirmwareRead(io::Error::other("firmware image is closed")))?;

        let mut data = [0u8; DATA_SIZE];
        let read = read_block(reader, &mut data).map_err(Error::FirmwareRead)?;
        self.cursor += read as u64;

        let frame = build_data_frame(self.sequence, &data[..read]);
        let progress = self.progress();
        let (sequence, offset) = (self.sequence, self.offset);
        self.final_sent = read < DATA_SIZE || self.offset + read as u64 >= self.size;

        trace!(
            "Packet #{sequence} at offset {offset} ({read} bytes{})",
            if self.final_sent { ", final" } else { "" }
        );

        if !self.final_sent {
            self.offset += DATA_SIZE as u64;
            self.sequence = self
                .sequence
                .wrapping_add(1);
        }

        self.last_frame = frame.clone();
        Ok(Step::Packet {
            frame,
            progress,
            sequence,
            offset,
            length: read,
        })
    }

    fn seek_to(&mut self, offset: u64) -> Result<()> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::FirmwareRead(io::Error::other("firmware image is closed")))?;
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(Error::FirmwareRead)?;
        self.cursor = offset;
        Ok(())
    }

    fn progress(&self) -> u8 {
        if self.size == 0 {
            return 0;
        }
        u8::try_from((self.offset * 100 / self.size).min(100)).unwrap_or(100)
    }

    fn last_frame_sequence(&self) -> u8 {
        self.last_frame
            .get(1)
            .copied()
            .unwrap_or(self.sequence)
    }
}
