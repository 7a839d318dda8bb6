//! Blocking single invocation: connect with a timeout, send one frame, read
//! until the response frame is complete, decode. The socket timeouts double
//! as the per-call timeout.

use crate::buffer::Buffer;
use crate::client::InvokeArgs;
use crate::codec::{self, Request, Response};
use crate::frame;
use crate::logging;
use crate::shared::{resolve_addr, ErrorType, NetworkError, NetworkResult};
use std::io;
use std::io::Write;
use std::net::TcpStream;

/// Blocking socket errors are always fatal here; a read timeout surfaces as
/// `WouldBlock` and must not fold into `Wait`.
fn fatal(err: io::Error) -> NetworkError {
    NetworkError::Fatal(ErrorType::Io(err.kind()))
}

/// Performs one invocation and returns the decoded response.
pub fn invoke<'a, L: Into<Option<&'a logging::Logger>>>(
    args: &InvokeArgs,
    log: L,
) -> NetworkResult<Response> {
    let log = match log.into() {
        Some(log) => log.new(logging::o!()),
        None => logging::Logger::root(logging::Discard, logging::o!()),
    };

    let req = Request::new(
        &args.service,
        &args.method,
        &args.json_args,
        Some(&args.json_attach),
    )?
    .with_style(args.style);
    let snd_buf = req.encode()?;

    let addr = resolve_addr(&args.host, args.port)?;
    let stream = TcpStream::connect_timeout(&addr, args.timeout).map_err(fatal)?;
    stream.set_nodelay(true).map_err(fatal)?;
    stream.set_write_timeout(Some(args.timeout)).map_err(fatal)?;
    stream.set_read_timeout(Some(args.timeout)).map_err(fatal)?;

    logging::debug!(log, "invoking"; "peer" => %addr, "seq" => req.reqid());

    (&stream).write_all(snd_buf.peek()).map_err(fatal)?;

    let mut rcv_buf = Buffer::new(0);
    let mut reader = &stream;

    loop {
        match rcv_buf.read_from(&mut reader) {
            Ok(0) => return Err(NetworkError::Fatal(ErrorType::Disconnected)),
            Ok(_) => {}
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(fatal(err)),
        }

        if rcv_buf.readable() < frame::HEADER_SIZE {
            continue;
        }
        if !frame::is_frame(&rcv_buf) {
            return Err(NetworkError::Fatal(ErrorType::BadMagic));
        }
        if frame::remaining(&rcv_buf)? == 0 {
            break;
        }
    }

    logging::debug!(log, "response frame complete"; "bytes" => rcv_buf.readable());

    codec::decode_response(&mut rcv_buf, args.style)
}
