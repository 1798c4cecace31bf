// SPDX-License-Identifier: MIT OR Apache-2.0
//! A single JSONL connection to the master: dial, register, then exchange
//! [`Envelope`] lines until the stream closes.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use wf_protocol::{Envelope, JsonlCodec, MasterInfo, ProtocolError};

use crate::WorkerError;

/// An established connection to the master, past the `Register`/`RegisterAck`
/// handshake.
pub struct MasterConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    /// The id the master assigned this worker (normally echoes the proposed one).
    pub assigned_id: String,
    /// Master identity and negotiated parameters from the handshake.
    pub master: MasterInfo,
}

impl MasterConnection {
    /// Dial `addr`, send `register`, and block for the `RegisterAck`.
    ///
    /// `register` must be an [`Envelope::Register`]; any other variant is a
    /// programmer error and will be rejected by the master as an unexpected
    /// first message.
    pub async fn dial(addr: &str, register: Envelope) -> Result<Self, WorkerError> {
        let stream = TcpStream::connect(addr).await.map_err(WorkerError::Dial)?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let line = JsonlCodec::encode(&register)?;
        write_half.write_all(line.as_bytes()).await.map_err(WorkerError::Write)?;
        write_half.flush().await.map_err(WorkerError::Write)?;

        let mut buf = String::new();
        let n = reader.read_line(&mut buf).await.map_err(WorkerError::Read)?;
        if n == 0 {
            return Err(WorkerError::StreamClosed);
        }

        match JsonlCodec::decode(buf.trim_end())? {
            Envelope::RegisterAck { accepted: true, assigned_id, master, .. } => Ok(Self {
                reader,
                writer: write_half,
                assigned_id,
                master,
            }),
            Envelope::RegisterAck { accepted: false, reason, .. } => {
                Err(WorkerError::RegistrationRejected(reason.unwrap_or_else(|| "no reason given".into())))
            }
            other => Err(WorkerError::Protocol(ProtocolError::UnexpectedMessage {
                expected: "register_ack".into(),
                got: format!("{other:?}"),
            })),
        }
    }

    /// Write a single envelope to the master.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), WorkerError> {
        let line = JsonlCodec::encode(envelope)?;
        self.writer.write_all(line.as_bytes()).await.map_err(WorkerError::Write)?;
        self.writer.flush().await.map_err(WorkerError::Write)
    }

    /// Read the next envelope from the master, skipping blank lines.
    ///
    /// Returns `Ok(None)` when the master closes the stream.
    pub async fn recv(&mut self) -> Result<Option<Envelope>, WorkerError> {
        read_envelope(&mut self.reader).await
    }

    /// Split into independently-drivable read and write halves.
    ///
    /// Lets a caller run a read loop (servicing `TaskAssignment`/
    /// `HeartbeatAck`) concurrently with a write loop (periodic `Heartbeat`,
    /// outbound `TaskUpdate`) via `tokio::select!` or two spawned tasks,
    /// since [`Self::recv`]/[`Self::send`] both require `&mut self` and
    /// cannot otherwise be driven from two places at once.
    pub fn into_split(self) -> (MasterReadHalf, MasterWriteHalf) {
        (MasterReadHalf { reader: self.reader }, MasterWriteHalf { writer: self.writer })
    }
}

async fn read_envelope(reader: &mut BufReader<OwnedReadHalf>) -> Result<Option<Envelope>, WorkerError> {
    let mut buf = String::new();
    loop {
        buf.clear();
        let n = reader.read_line(&mut buf).await.map_err(WorkerError::Read)?;
        if n == 0 {
            return Ok(None);
        }
        let line = buf.trim_end();
        if line.is_empty() {
            continue;
        }
        return Ok(Some(JsonlCodec::decode(line)?));
    }
}

/// The read half of a split [`MasterConnection`].
pub struct MasterReadHalf {
    reader: BufReader<OwnedReadHalf>,
}

impl MasterReadHalf {
    /// Read the next envelope from the master, skipping blank lines.
    ///
    /// Returns `Ok(None)` when the master closes the stream.
    pub async fn recv(&mut self) -> Result<Option<Envelope>, WorkerError> {
        read_envelope(&mut self.reader).await
    }
}

/// The write half of a split [`MasterConnection`].
pub struct MasterWriteHalf {
    writer: OwnedWriteHalf,
}

impl MasterWriteHalf {
    /// Write a single envelope to the master.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), WorkerError> {
        let line = JsonlCodec::encode(envelope)?;
        self.writer.write_all(line.as_bytes()).await.map_err(WorkerError::Write)?;
        self.writer.flush().await.map_err(WorkerError::Write)
    }
}
