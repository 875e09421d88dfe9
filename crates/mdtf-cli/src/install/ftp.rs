//! Minimal FTP client (RFC 959) over `std::net` for installer downloads.
//!
//! The transfer itself runs on a worker thread while the calling thread
//! sends a periodic NOOP on the control connection; servers drop control
//! sessions that stay silent for the length of a large RETR.

use mdtf_core::domain::{FrameworkError, FrameworkResult};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const FTP_PORT: u16 = 21;

#[derive(Debug)]
pub(super) struct TransferSettings {
    pub(super) timeout: Duration,
    pub(super) keepalive: Duration,
    pub(super) block_size: usize,
}

fn protocol_error(message: impl Into<String>) -> FrameworkError {
    FrameworkError::download("INSTALL.DOWNLOAD", message)
}

#[derive(Debug)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn is_positive(&self) -> bool {
        self.code < 400
    }
}

/// Splits a control line into its reply code and whether it ends the reply.
/// `None` means the line does not start with a three-digit code.
fn parse_reply_line(line: &str) -> Option<(u16, bool)> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code: u16 = line[..3].parse().ok()?;
    match bytes.get(3) {
        None | Some(b' ') => Some((code, true)),
        Some(b'-') => Some((code, false)),
        Some(_) => None,
    }
}

/// Reads one server reply, following `NNN-` continuations until the
/// matching `NNN ` line arrives.
fn read_reply(reader: &mut impl BufRead) -> FrameworkResult<Reply> {
    let mut text = String::new();
    let mut open_code: Option<u16> = None;
    loop {
        let mut line = String::new();
        let read = reader
            .read_line(&mut line)
            .map_err(|error| protocol_error(format!("control read failed: {error}")))?;
        if read == 0 {
            return Err(protocol_error("control connection closed by the server"));
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(trimmed);
        match (open_code, parse_reply_line(trimmed)) {
            (None, Some((code, true))) => return Ok(Reply { code, text }),
            (None, Some((code, false))) => open_code = Some(code),
            (None, None) => {
                return Err(protocol_error(format!("malformed control line '{trimmed}'")));
            }
            (Some(code), Some((line_code, true))) if line_code == code => {
                return Ok(Reply { code, text });
            }
            // free-form continuation inside a multiline reply
            (Some(_), _) => {}
        }
    }
}

/// Pulls the data address out of a `227` reply. The host and port are the
/// last six integers in the text, `(h1,h2,h3,h4,p1,p2)`.
fn parse_passive_addr(text: &str) -> Option<SocketAddr> {
    let fields: Vec<u16> = text
        .split(|ch: char| !ch.is_ascii_digit())
        .filter(|field| !field.is_empty())
        .filter_map(|field| field.parse().ok())
        .collect();
    let six = fields.get(fields.len().checked_sub(6)?..)?;
    let mut octets = [0u8; 4];
    for (slot, field) in octets.iter_mut().zip(six) {
        *slot = u8::try_from(*field).ok()?;
    }
    let port = six[4].checked_mul(256)?.checked_add(six[5])?;
    Some(SocketAddr::from((octets, port)))
}

struct FtpClient {
    control: TcpStream,
    reader: BufReader<TcpStream>,
}

impl FtpClient {
    fn connect(host: &str, timeout: Duration) -> FrameworkResult<Self> {
        let addrs = (host, FTP_PORT)
            .to_socket_addrs()
            .map_err(|error| protocol_error(format!("failed to resolve '{host}': {error}")))?;
        let mut control = None;
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    control = Some(stream);
                    break;
                }
                Err(error) => last_error = Some(error),
            }
        }
        let Some(control) = control else {
            let detail = match last_error {
                Some(error) => error.to_string(),
                None => "no addresses resolved".to_string(),
            };
            return Err(protocol_error(format!("failed to connect to '{host}': {detail}")));
        };
        control
            .set_read_timeout(Some(timeout))
            .and_then(|()| control.set_write_timeout(Some(timeout)))
            .map_err(|error| protocol_error(format!("failed to set socket timeouts: {error}")))?;
        let reader = BufReader::new(
            control
                .try_clone()
                .map_err(|error| protocol_error(format!("failed to clone the control socket: {error}")))?,
        );
        let mut client = FtpClient { control, reader };
        let greeting = read_reply(&mut client.reader)?;
        if greeting.code != 220 {
            return Err(protocol_error(format!("unexpected greeting: {}", greeting.text)));
        }
        Ok(client)
    }

    fn login(&mut self) -> FrameworkResult<()> {
        let reply = self.command("USER anonymous", &[230, 331])?;
        if reply.code == 331 {
            self.command("PASS anonymous@", &[230])?;
        }
        self.command("TYPE I", &[200])?;
        Ok(())
    }

    /// Sends one command and checks the reply code. Error messages carry
    /// only the verb, so credentials never end up in diagnostics.
    fn command(&mut self, verb: &str, accepted: &[u16]) -> FrameworkResult<Reply> {
        self.control
            .write_all(format!("{verb}\r\n").as_bytes())
            .map_err(|error| {
                protocol_error(format!("failed to send '{}': {error}", first_word(verb)))
            })?;
        let reply = read_reply(&mut self.reader)?;
        if !accepted.contains(&reply.code) {
            return Err(protocol_error(format!(
                "'{}' rejected: {}",
                first_word(verb),
                reply.text
            )));
        }
        Ok(reply)
    }

    /// Advisory size lookup. Servers without SIZE answer with an error
    /// reply, which only disables the post-transfer length check.
    fn size(&mut self, file: &str) -> Option<u64> {
        self.control
            .write_all(format!("SIZE {file}\r\n").as_bytes())
            .ok()?;
        let reply = read_reply(&mut self.reader).ok()?;
        if reply.code != 213 {
            tracing::debug!(reply = %reply.text, "server does not report sizes");
            return None;
        }
        reply.text.split_whitespace().nth(1)?.parse().ok()
    }

    fn passive(&mut self) -> FrameworkResult<SocketAddr> {
        let reply = self.command("PASV", &[227])?;
        parse_passive_addr(&reply.text)
            .ok_or_else(|| protocol_error(format!("unparseable PASV reply: {}", reply.text)))
    }

    fn noop(&mut self) -> FrameworkResult<()> {
        self.command("NOOP", &[200])?;
        Ok(())
    }
}

impl Drop for FtpClient {
    fn drop(&mut self) {
        let _ = self.control.write_all(b"QUIT\r\n");
    }
}

fn first_word(verb: &str) -> &str {
    verb.split_whitespace().next().unwrap_or(verb)
}

/// Downloads `remote_dir/file` from `host` into `target`, returning the
/// byte count. Failures name the remote file they interrupted.
pub(super) fn download_file(
    host: &str,
    remote_dir: &str,
    file: &str,
    target: &Path,
    settings: &TransferSettings,
) -> FrameworkResult<u64> {
    transfer(host, remote_dir, file, target, settings).map_err(|error| {
        FrameworkError::download(
            "INSTALL.DOWNLOAD",
            format!("ftp://{host}/{remote_dir}/{file}: {}", error.message()),
        )
    })
}

fn transfer(
    host: &str,
    remote_dir: &str,
    file: &str,
    target: &Path,
    settings: &TransferSettings,
) -> FrameworkResult<u64> {
    let mut client = FtpClient::connect(host, settings.timeout)?;
    client.login()?;
    client.command(&format!("CWD {remote_dir}"), &[250])?;
    let expected = client.size(file);
    let data_addr = client.passive()?;
    let data = TcpStream::connect_timeout(&data_addr, settings.timeout).map_err(|error| {
        protocol_error(format!("data connection to {data_addr} failed: {error}"))
    })?;
    let shutdown = data
        .try_clone()
        .map_err(|error| protocol_error(format!("failed to clone the data socket: {error}")))?;
    client.command(&format!("RETR {file}"), &[125, 150])?;
    // the server opens the data stream only once RETR is accepted
    data.set_read_timeout(Some(settings.timeout))
        .and_then(|()| data.set_write_timeout(Some(settings.timeout)))
        .map_err(|error| protocol_error(format!("failed to set data timeouts: {error}")))?;

    let worker = spawn_transfer_worker(data, target.to_path_buf(), settings.block_size)?;
    let mut last_noop = Instant::now();
    while !worker.is_finished() {
        thread::sleep(Duration::from_millis(250));
        if last_noop.elapsed() >= settings.keepalive {
            if let Err(error) = client.noop() {
                let _ = shutdown.shutdown(Shutdown::Both);
                let _ = worker.join();
                return Err(error);
            }
            last_noop = Instant::now();
        }
    }
    let written = match worker.join() {
        Ok(result) => result?,
        Err(_) => return Err(protocol_error("transfer worker panicked")),
    };

    let completion = read_reply(&mut client.reader)?;
    if !completion.is_positive() {
        return Err(protocol_error(format!("transfer failed: {}", completion.text)));
    }
    if let Some(expected) = expected {
        if written != expected {
            return Err(protocol_error(format!(
                "size mismatch: the server reported {expected} bytes, received {written}"
            )));
        }
    }
    tracing::info!(file, bytes = written, "download complete");
    Ok(written)
}

fn spawn_transfer_worker(
    mut data: TcpStream,
    target: PathBuf,
    block_size: usize,
) -> FrameworkResult<JoinHandle<FrameworkResult<u64>>> {
    thread::Builder::new()
        .name("ftp-transfer".to_string())
        .spawn(move || {
            let mut output = File::create(&target).map_err(|error| {
                protocol_error(format!("failed to create '{}': {error}", target.display()))
            })?;
            let mut buffer = vec![0u8; block_size];
            let mut written = 0u64;
            loop {
                let read = data
                    .read(&mut buffer)
                    .map_err(|error| protocol_error(format!("data read failed: {error}")))?;
                if read == 0 {
                    break;
                }
                output.write_all(&buffer[..read]).map_err(|error| {
                    protocol_error(format!("failed to write '{}': {error}", target.display()))
                })?;
                written += read as u64;
            }
            output.flush().map_err(|error| {
                protocol_error(format!("failed to flush '{}': {error}", target.display()))
            })?;
            Ok(written)
        })
        .map_err(|error| protocol_error(format!("failed to spawn the transfer thread: {error}")))
}
