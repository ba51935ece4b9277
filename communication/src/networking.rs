//! Networking code for exchanging framed, serialized messages between processes.

use std::io;
use std::io::{Read, Result, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::thread::sleep;

use byteorder::{ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::initialize::Config;

// This constant is sent along immediately after establishing a TCP stream, so
// that it is easy to sniff out conduit traffic when it is multiplexed with
// other traffic on the same port.
const HANDSHAKE_MAGIC: u64 = 0xc2f1fb770118add9;

/// The largest payload a frame may carry. Longer frames are rejected before any allocation.
pub const MAX_FRAME_BYTES: usize = 1 << 28;

/// The byte order for writing message headers and stream initialization.
type ByteOrder = byteorder::BigEndian;

/// Framing data for each message, indicating its kind, the sending process, the addressed
/// recipient, and the length in bytes of the serialized payload.
// *Warning*: Adding, removing and altering fields requires to adjust the implementation below!
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct MessageHeader {
    /// kind of message, interpreted by the layer above.
    pub channel: usize,
    /// index of the process sending the message.
    pub source: usize,
    /// recipient of the message, interpreted by the layer above.
    pub target: usize,
    /// number of bytes in message.
    pub length: usize,
    /// sequence number.
    pub seqno: usize,
}

impl MessageHeader {
    /// The number of `usize` fields in [MessageHeader].
    const FIELDS: usize = 5;

    /// The number of bytes a header occupies on the wire.
    pub const BYTES: usize = std::mem::size_of::<u64>() * Self::FIELDS;

    /// Reads a header, blocking until all of its bytes are available.
    #[inline]
    pub fn read_from<R: Read>(reader: &mut R) -> Result<MessageHeader> {
        let mut buffer = [0; Self::FIELDS];
        reader.read_u64_into::<ByteOrder>(&mut buffer)?;
        Ok(MessageHeader {
            // Order must match writing order.
            channel: buffer[0] as usize,
            source: buffer[1] as usize,
            target: buffer[2] as usize,
            length: buffer[3] as usize,
            seqno: buffer[4] as usize,
        })
    }

    /// Writes the header as binary data.
    #[inline]
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buffer = [0u8; Self::BYTES];
        let mut cursor = io::Cursor::new(&mut buffer[..]);
        // Order must match reading order.
        cursor.write_u64::<ByteOrder>(self.channel as u64)?;
        cursor.write_u64::<ByteOrder>(self.source as u64)?;
        cursor.write_u64::<ByteOrder>(self.target as u64)?;
        cursor.write_u64::<ByteOrder>(self.length as u64)?;
        cursor.write_u64::<ByteOrder>(self.seqno as u64)?;

        writer.write_all(&buffer[..])
    }

    /// The number of bytes required for the header and data.
    #[inline]
    pub fn required_bytes(&self) -> usize {
        Self::BYTES + self.length
    }

    /// The header announcing the end of a stream.
    pub fn end_of_stream(source: usize) -> Self {
        MessageHeader { channel: 0, source, target: 0, length: 0, seqno: 0 }
    }

    /// True for the zero-length header that ends a stream.
    pub fn is_end_of_stream(&self) -> bool {
        self.length == 0
    }
}

fn invalid_data<E: Into<Box<dyn std::error::Error + Send + Sync>>>(error: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}

/// Serializes `payload` behind a header and writes both to `writer`.
///
/// The header's `length` field is overwritten with the payload size.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, mut header: MessageHeader, payload: &T) -> Result<MessageHeader> {
    let bytes = bincode::serialize(payload).map_err(invalid_data)?;
    if bytes.is_empty() {
        return Err(invalid_data("refusing to write an empty frame"));
    }
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(invalid_data(format!("frame of {} bytes exceeds the limit of {}", bytes.len(), MAX_FRAME_BYTES)));
    }
    header.length = bytes.len();
    header.write_to(writer)?;
    writer.write_all(&bytes[..])?;
    Ok(header)
}

/// Reads one frame, or `None` if the stream was closed with an end-of-stream header.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<(MessageHeader, T)>> {
    let header = MessageHeader::read_from(reader)?;
    if header.is_end_of_stream() {
        return Ok(None);
    }
    if header.length > MAX_FRAME_BYTES {
        return Err(invalid_data(format!("frame of {} bytes exceeds the limit of {}", header.length, MAX_FRAME_BYTES)));
    }
    let mut bytes = vec![0u8; header.length];
    reader.read_exact(&mut bytes[..])?;
    let payload = bincode::deserialize(&bytes[..]).map_err(invalid_data)?;
    Ok(Some((header, payload)))
}

fn write_handshake(stream: &mut TcpStream, process: usize) -> Result<()> {
    stream.write_u64::<ByteOrder>(HANDSHAKE_MAGIC)?;
    stream.write_u64::<ByteOrder>(process as u64)?;
    stream.flush()
}

fn read_handshake(stream: &mut TcpStream) -> Result<usize> {
    let mut buffer = [0u8; 16];
    stream.read_exact(&mut buffer)?;
    let mut cursor = io::Cursor::new(buffer);
    let magic = cursor.read_u64::<ByteOrder>()?;
    if magic != HANDSHAKE_MAGIC {
        return Err(invalid_data("received incorrect conduit handshake"));
    }
    Ok(cursor.read_u64::<ByteOrder>()? as usize)
}

/// Connects to `address`, retrying as configured, and exchanges handshakes.
///
/// Returns the stream and the process identifier announced by the peer.
pub fn connect<A: ToSocketAddrs + std::fmt::Display>(address: A, process: usize, config: &Config) -> Result<(TcpStream, usize)> {
    let mut attempt = 0;
    loop {
        match TcpStream::connect(&address) {
            Ok(mut stream) => {
                stream.set_nodelay(true)?;
                write_handshake(&mut stream, process)?;
                let remote = read_handshake(&mut stream)?;
                if config.report { println!("process {}:\tconnected to {} (process {})", process, address, remote); }
                return Ok((stream, remote));
            },
            Err(error) => {
                if attempt >= config.retries {
                    return Err(error);
                }
                attempt += 1;
                if config.report { println!("process {}:\terror connecting to {}: {}; retrying", process, address, error); }
                sleep(config.retry_delay);
            },
        }
    }
}

/// Accepts one connection from `listener` and exchanges handshakes.
///
/// Returns the stream and the process identifier announced by the peer.
pub fn accept(listener: &TcpListener, process: usize, report: bool) -> Result<(TcpStream, usize)> {
    let (mut stream, address) = listener.accept()?;
    stream.set_nodelay(true)?;
    let remote = read_handshake(&mut stream)?;
    write_handshake(&mut stream, process)?;
    if report { println!("process {}:\tconnection from {} (process {})", process, address, remote); }
    Ok((stream, remote))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_fixed() {
        let header = MessageHeader { channel: 1, source: 2, target: 3, length: 4, seqno: 5 };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), MessageHeader::BYTES);
        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 0, 1]);
        let read = MessageHeader::read_from(&mut &bytes[..]).unwrap();
        assert_eq!(read, header);
    }

    #[test]
    fn frames_end_with_zero_length_header() {
        let mut bytes = Vec::new();
        let header = MessageHeader { channel: 2, source: 0, target: 7, length: 0, seqno: 0 };
        let written = write_frame(&mut bytes, header, &vec![1u32, 2, 3]).unwrap();
        MessageHeader::end_of_stream(0).write_to(&mut bytes).unwrap();

        let mut reader = &bytes[..];
        let (read, payload) = read_frame::<_, Vec<u32>>(&mut reader).unwrap().unwrap();
        assert_eq!(read, written);
        assert_eq!(read.target, 7);
        assert_eq!(payload, vec![1, 2, 3]);
        assert!(read_frame::<_, Vec<u32>>(&mut reader).unwrap().is_none());
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut bytes = Vec::new();
        let header = MessageHeader { channel: 1, source: 0, target: 0, length: MAX_FRAME_BYTES + 1, seqno: 0 };
        header.write_to(&mut bytes).unwrap();

        let mut reader = io::Cursor::new(bytes);
        let error = read_frame::<_, Vec<u32>>(&mut reader).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn handshake_rejects_foreign_traffic() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(address).unwrap();
            stream.write_all(&[0xffu8; 16]).unwrap();
        });
        assert!(accept(&listener, 0, false).is_err());
        client.join().unwrap();
    }

    #[test]
    fn handshake_exchanges_process_identifiers() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || accept(&listener, 9, false).map(|(_, remote)| remote));
        let (_stream, remote) = connect(address.to_string(), 4, &Config::default()).unwrap();
        assert_eq!(remote, 9);
        assert_eq!(server.join().unwrap().unwrap(), 4);
    }
}
