//! Script execution over SSH.
//!
//! ssh2 is blocking, so every network step runs on the blocking pool.
//! Prompting for a password happens between those steps on the calling
//! task, through the caller's [`CredentialCache`].

use crate::error::{SshError, SshResult};

use log::{debug, info};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use ssh2::Session;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use xenctl_xapi::credentials::{CredentialCache, SecretPrompt};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// A script to pipe into a remote shell.
#[derive(Debug)]
pub struct ScriptRequest {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Login (and sudo) password; agent, then cache/prompt when `None`
    pub password: Option<SecretString>,
    pub body: String,
    pub sudo: bool,
}

impl ScriptRequest {
    pub fn new(host: impl Into<String>, username: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            username: username.into(),
            password: None,
            body: body.into(),
            sudo: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Connect, authenticate, and run `request.body` through `sh -s`.
pub async fn run_script(
    request: ScriptRequest,
    cache: &mut CredentialCache,
    prompt: &dyn SecretPrompt,
) -> SshResult<ScriptOutput> {
    let ScriptRequest {
        host,
        port,
        username,
        password,
        body,
        sudo,
    } = request;

    let explicit = password.as_ref().map(duplicate);
    let (session, authenticated) = {
        let (host, user) = (host.clone(), username.clone());
        tokio::task::spawn_blocking(move || connect(&host, port, &user, explicit.as_ref())).await??
    };

    // No explicit password and the agent had no usable key: use the cache.
    // A rejected explicit password already failed in `connect`.
    let session = if authenticated {
        session
    } else {
        let secret = duplicate(cache.get_or_prompt(&username, &host, prompt)?);
        let user = username.clone();
        tokio::task::spawn_blocking(move || {
            session.userauth_password(&user, secret.expose_secret())?;
            if !session.authenticated() {
                return Err(SshError::auth(format!("password rejected for {user}")));
            }
            Ok(session)
        })
        .await??
    };
    info!("ssh authenticated to {}:{} as {}", host, port, username);

    let sudo_secret = match (sudo, &password) {
        (false, _) => None,
        (true, Some(p)) => Some(duplicate(p)),
        (true, None) => Some(duplicate(cache.get_or_prompt(&username, &host, prompt)?)),
    };
    let stdin = stdin_payload(sudo_secret.as_ref(), &body);

    tokio::task::spawn_blocking(move || exec(&session, remote_command(sudo), &stdin)).await?
}

fn duplicate(secret: &SecretString) -> SecretString {
    SecretString::new(secret.expose_secret().clone())
}

/// TCP connect and handshake, then try the explicit password or the agent.
/// Returns whether authentication already succeeded.
fn connect(host: &str, port: u16, user: &str, password: Option<&SecretString>) -> SshResult<(Session, bool)> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| SshError::connection(format!("cannot resolve {host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| SshError::connection(format!("no address for {host}:{port}")))?;
    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
        .map_err(|e| SshError::connection(format!("TCP connection to {addr} failed: {e}")))?;

    let mut session = Session::new().map_err(|e| SshError::handshake(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| SshError::handshake(format!("SSH handshake with {addr} failed: {e}")))?;

    match password {
        Some(p) => {
            session
                .userauth_password(user, p.expose_secret())
                .map_err(|e| SshError::auth(format!("password rejected for {user}: {e}")))?;
        }
        None => {
            if let Err(e) = session.userauth_agent(user) {
                debug!("agent authentication for {} failed: {}", user, e);
            }
        }
    }
    let authenticated = session.authenticated();
    Ok((session, authenticated))
}

fn exec(session: &Session, command: &str, stdin: &[u8]) -> SshResult<ScriptOutput> {
    let mut channel = session.channel_session()?;
    debug!("ssh exec: {}", command);
    channel.exec(command)?;

    // Both output streams share one channel window; draining them in turn
    // keeps a chatty stderr from stalling stdout and the other way round.
    session.set_blocking(false);
    let mut pipes = Pipes::new(stdin);
    let mut eof_sent = false;
    loop {
        let progress = pipes.pump(&mut channel.stream(0), &mut channel.stderr())?;
        if pipes.stdin_done() && !eof_sent {
            match channel.send_eof() {
                Ok(()) => eof_sent = true,
                Err(e) => would_block(io::Error::from(e))?,
            }
        }
        if eof_sent && channel.eof() {
            break;
        }
        if !progress {
            std::thread::sleep(IDLE_WAIT);
        }
    }
    pipes.pump(&mut channel.stream(0), &mut channel.stderr())?;
    session.set_blocking(true);
    channel.wait_close()?;

    let (stdout, stderr) = pipes.into_output();
    Ok(ScriptOutput {
        stdout,
        stderr,
        exit_status: channel.exit_status()?,
    })
}

const IDLE_WAIT: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 32 * 1024;

/// `WouldBlock` is not an error on a non-blocking session.
fn would_block(e: io::Error) -> io::Result<()> {
    if e.kind() == io::ErrorKind::WouldBlock {
        Ok(())
    } else {
        Err(e)
    }
}

/// Non-blocking stdin writer and stdout/stderr collector for one channel.
struct Pipes<'a> {
    stdin: &'a [u8],
    written: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl<'a> Pipes<'a> {
    fn new(stdin: &'a [u8]) -> Self {
        Self {
            stdin,
            written: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    fn stdin_done(&self) -> bool {
        self.written == self.stdin.len()
    }

    /// Write what the channel accepts, then read whatever either stream has.
    /// Returns whether any byte moved.
    fn pump(&mut self, out: &mut (impl Read + Write), err: &mut impl Read) -> io::Result<bool> {
        let mut progress = false;
        if !self.stdin_done() {
            match out.write(&self.stdin[self.written..]) {
                Ok(n) => {
                    self.written += n;
                    progress |= n > 0;
                }
                Err(e) => would_block(e)?,
            }
        }
        progress |= drain(out, &mut self.stdout)?;
        progress |= drain(err, &mut self.stderr)?;
        Ok(progress)
    }

    fn into_output(self) -> (String, String) {
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
        )
    }
}

/// Read until the stream would block or ends.
fn drain(stream: &mut impl Read, into: &mut Vec<u8>) -> io::Result<bool> {
    let mut buf = [0u8; READ_CHUNK];
    let mut progress = false;
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(progress),
            Ok(n) => {
                into.extend_from_slice(&buf[..n]);
                progress = true;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                would_block(e)?;
                return Ok(progress);
            }
        }
    }
}

/// `sudo -S` reads the password from the first stdin line; `-p ''` keeps
/// the prompt out of stderr.
fn remote_command(sudo: bool) -> &'static str {
    if sudo {
        "sudo -S -p '' sh -s"
    } else {
        "sh -s"
    }
}

fn stdin_payload(sudo_secret: Option<&SecretString>, body: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + 64);
    if let Some(secret) = sudo_secret {
        payload.extend_from_slice(secret.expose_secret().as_bytes());
        payload.push(b'\n');
    }
    payload.extend_from_slice(body.as_bytes());
    if !body.ends_with('\n') {
        payload.push(b'\n');
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sudo_changes_the_command() {
        assert_eq!(remote_command(false), "sh -s");
        assert_eq!(remote_command(true), "sudo -S -p '' sh -s");
    }

    #[test]
    fn secret_line_precedes_the_body() {
        let secret = SecretString::new("hunter2".into());
        let payload = stdin_payload(Some(&secret), "uname -a");
        assert_eq!(payload, b"hunter2\nuname -a\n");
        assert_eq!(stdin_payload(None, "id\n"), b"id\n");
    }

    #[test]
    fn request_defaults_to_port_22_without_sudo() {
        let req = ScriptRequest::new("10.0.0.9", "root", "true");
        assert_eq!(req.port, 22);
        assert!(!req.sudo);
        assert!(req.password.is_none());
    }

    /// Reader that hands out `data` in chunks, then blocks forever.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.data.len() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(4096).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// Stdout that never has data and accepts stdin a few bytes at a time.
    struct QuietStdout {
        accepted: Vec<u8>,
    }

    impl Read for QuietStdout {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    impl Write for QuietStdout {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.accepted.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn large_stderr_is_collected_while_stdout_is_idle() {
        let mut out = QuietStdout { accepted: Vec::new() };
        let mut err = Trickle {
            data: vec![b'e'; 4 * 1024 * 1024],
            pos: 0,
        };
        let mut pipes = Pipes::new(b"echo hi\n");
        while pipes.pump(&mut out, &mut err).unwrap() {}

        assert!(pipes.stdin_done());
        assert_eq!(out.accepted, b"echo hi\n");
        let (stdout, stderr) = pipes.into_output();
        assert!(stdout.is_empty());
        assert_eq!(stderr.len(), 4 * 1024 * 1024);
    }

    #[test]
    fn drain_stops_at_end_of_stream() {
        let mut collected = Vec::new();
        assert!(drain(&mut &b"done"[..], &mut collected).unwrap());
        assert_eq!(collected, b"done");
        assert!(!drain(&mut &b""[..], &mut collected).unwrap());
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut req = ScriptRequest::new("127.0.0.1", "root", "true");
        req.port = port;
        req.password = Some(SecretString::new("x".into()));
        let mut cache = CredentialCache::new();
        let err = run_script(req, &mut cache, &xenctl_xapi::credentials::NoPrompt)
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::SshErrorKind::ConnectionError);
        assert!(cache.is_empty());
    }
}
