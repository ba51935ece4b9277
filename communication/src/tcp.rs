//! Threads moving framed messages between channels and a `TcpStream`.

use std::io::{BufReader, BufWriter, Write};
use std::net::TcpStream;

use crossbeam_channel::Receiver;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::logging::{CommunicationLogger, MessageEvent, StateEvent};
use crate::networking::{read_frame, write_frame, MessageHeader};

/// A message bound for a remote process, with its routing information.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<T> {
    /// Kind of message, interpreted by the receiver.
    pub channel: usize,
    /// Recipient within the remote process.
    pub target: usize,
    /// The message itself.
    pub payload: T,
}

/// Repeatedly reads frames from a `TcpStream` and hands them to `dispatch`.
///
/// The intended communication pattern is a sequence of (header, message)^* for valid
/// messages, followed by a header for a zero length message indicating the end of stream.
/// Returns `Ok(())` after a clean end of stream, or when `dispatch` returns `false`, and an
/// error if the stream ended without being shut down or carried undecodable data.
pub fn recv_loop<T, F>(
    reader: TcpStream,
    process: usize,
    remote: usize,
    logger: Option<CommunicationLogger>,
    mut dispatch: F,
) -> std::io::Result<()>
where
    T: DeserializeOwned,
    F: FnMut(MessageHeader, T) -> bool,
{
    // Log the receive thread's start.
    logger.as_ref().map(|l| l.log(StateEvent { send: false, process, remote, start: true }));

    let mut reader = BufReader::with_capacity(1 << 16, reader);
    let result = loop {
        match read_frame::<_, T>(&mut reader) {
            Ok(Some((header, payload))) => {
                // Record message receipt.
                logger.as_ref().map(|l| l.log(MessageEvent { is_send: false, header }));
                if !dispatch(header, payload) {
                    break Ok(());
                }
            },
            Ok(None) => break Ok(()),
            Err(error) => break Err(error),
        }
    };

    // Log the receive thread's stop.
    logger.as_ref().map(|l| l.log(StateEvent { send: false, process, remote, start: false }));
    result
}

/// Repeatedly sends frames received from `source` into a `TcpStream`.
///
/// Once every sender of `source` has been dropped, writes the zero-length end-of-stream
/// header and shuts down the write half of the stream.
pub fn send_loop<T: Serialize>(
    writer: TcpStream,
    source: Receiver<Frame<T>>,
    process: usize,
    remote: usize,
    logger: Option<CommunicationLogger>,
) -> std::io::Result<()> {
    // Log the send thread's start.
    logger.as_ref().map(|l| l.log(StateEvent { send: true, process, remote, start: true }));

    let mut writer = BufWriter::with_capacity(1 << 16, writer);
    let mut seqno = 0;

    loop {
        // Only block once the buffered frames have been written out.
        let frame = match source.try_recv() {
            Ok(frame) => frame,
            Err(_) => {
                writer.flush()?;
                match source.recv() {
                    Ok(frame) => frame,
                    Err(_) => break,
                }
            },
        };
        let header = MessageHeader {
            channel: frame.channel,
            source: process,
            target: frame.target,
            length: 0,
            seqno,
        };
        let header = write_frame(&mut writer, header, &frame.payload)?;
        seqno += 1;
        // Record message sends.
        logger.as_ref().map(|l| l.log(MessageEvent { is_send: true, header }));
    }

    // Write final zero-length header.
    let header = MessageHeader::end_of_stream(process);
    header.write_to(&mut writer)?;
    writer.flush()?;
    writer.get_mut().shutdown(::std::net::Shutdown::Write)?;
    logger.as_ref().map(|l| l.log(MessageEvent { is_send: true, header }));

    // Log the send thread's stop.
    logger.as_ref().map(|l| l.log(StateEvent { send: true, process, remote, start: false }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn frames_cross_a_socket_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let receiver = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut seen = Vec::new();
            recv_loop::<String, _>(stream, 1, 0, None, |header, payload| {
                seen.push((header.target, header.seqno, payload));
                true
            }).unwrap();
            seen
        });

        let stream = TcpStream::connect(address).unwrap();
        let (send, recv) = crossbeam_channel::unbounded();
        for index in 0..3 {
            send.send(Frame { channel: 1, target: index, payload: format!("message {}", index) }).unwrap();
        }
        drop(send);
        send_loop(stream, recv, 0, 1, None).unwrap();

        let seen = receiver.join().unwrap();
        assert_eq!(seen, vec![
            (0, 0, "message 0".to_string()),
            (1, 1, "message 1".to_string()),
            (2, 2, "message 2".to_string()),
        ]);
    }

    #[test]
    fn unannounced_close_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let receiver = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            recv_loop::<String, _>(stream, 1, 0, None, |_, _| true)
        });
        drop(TcpStream::connect(address).unwrap());
        assert!(receiver.join().unwrap().is_err());
    }
}
