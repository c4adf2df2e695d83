//! Binkp session state machine
//!
//! One `BinkSession` drives one connection from greeting to teardown. The
//! session is generic over the stream so tests can run both ends over
//! `tokio::io::duplex` instead of a real socket. All progress happens by
//! stepping an explicit [`BinkState`]; every read is bounded by a timeout
//! from [`SessionTimeouts`], and inbound frames are pumped between outbound
//! data chunks so receiving interleaves with sending.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf, split};

use binkp_common::PROTOCOL_VERSION;
use binkp_common::address::{FLAT_ZONE, FtnAddress, ftn_addresses_from_address_list};
use binkp_common::commands::BinkCommand;
use binkp_common::cram::{CramAuthenticator, create_hashed_secret};
use binkp_common::framing::{Frame, FrameError, FrameReader, FrameWriter};

use crate::callout::{CredentialSource, expected_password};
use crate::config::{AuthFailurePolicy, BinkConfig, SessionTimeouts};
use crate::file_manager::FileManager;
use crate::names::is_safe_receive_name;
use crate::net::{Dirs, Network, NetworkKind};
use crate::remote::Remote;
use crate::transfer::{DiskTransferFile, FileOffer, ReceiveFile, TransferFile};

/// Bytes of file data per frame. The frame format caps a payload at
/// `(1 << 15) - 1`; we send an even `1 << 14` per chunk.
const CHUNK_SIZE: usize = 16384;

/// Frame pumps performed in the terminal drain before teardown.
const DRAIN_ROUNDS: u32 = 5;

/// Which end of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinkSide {
    /// We placed the call and present a single network identity.
    Originating,
    /// We answered and present every configured network.
    Answering,
}

impl BinkSide {
    pub fn as_str(self) -> &'static str {
        match self {
            BinkSide::Originating => "originating",
            BinkSide::Answering => "answering",
        }
    }
}

/// Session states. The two sides walk different paths through these:
/// originating runs `SEND_PASSWORD`/`WAIT_OK`, answering runs
/// `WAIT_PWD`/`PASSWORD_ACK`; everything else is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinkState {
    ConnInit,
    WaitConn,
    SendPassword,
    WaitAddr,
    AuthRemote,
    IfSecure,
    WaitOk,
    WaitPwd,
    PasswordAck,
    TransferFiles,
    WaitEob,
    Unknown,
    FatalError,
    Done,
}

impl BinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            BinkState::ConnInit => "CONN_INIT",
            BinkState::WaitConn => "WAIT_CONN",
            BinkState::SendPassword => "SEND_PASSWORD",
            BinkState::WaitAddr => "WAIT_ADDR",
            BinkState::AuthRemote => "AUTH_REMOTE",
            BinkState::IfSecure => "IF_SECURE",
            BinkState::WaitOk => "WAIT_OK",
            BinkState::WaitPwd => "WAIT_PWD",
            BinkState::PasswordAck => "PASSWORD_ACK",
            BinkState::TransferFiles => "TRANSFER_FILES",
            BinkState::WaitEob => "WAIT_EOB",
            BinkState::Unknown => "UNKNOWN",
            BinkState::FatalError => "FATAL_ERROR",
            BinkState::Done => "DONE",
        }
    }
}

impl fmt::Display for BinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the peer's password is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthType {
    PlainText,
    CramMd5,
}

/// Errors that end a session.
///
/// `TransferIo` is special: it is raised for a single file's I/O failure and
/// the catcher abandons that one file rather than the session.
#[derive(Debug)]
pub enum SessionError {
    /// Framing violation or a command outside the protocol table
    Protocol(String),
    /// Authentication could not proceed
    Auth(String),
    /// I/O failure on one transfer file
    TransferIo(String),
    /// The awaited condition never held
    Timeout(String),
    /// Transport-level failure
    Io(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            SessionError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            SessionError::TransferIo(msg) => write!(f, "transfer file error: {}", msg),
            SessionError::Timeout(msg) => write!(f, "timed out: {}", msg),
            SessionError::Io(msg) => write!(f, "connection error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(msg) => SessionError::Io(msg),
            FrameError::ConnectionClosed => {
                SessionError::Io("connection closed mid-frame".to_string())
            }
            FrameError::IdleTimeout => SessionError::Timeout("idle".to_string()),
            FrameError::FrameTimeout => {
                SessionError::Protocol("frame did not complete within timeout".to_string())
            }
            FrameError::PayloadTooLarge { length, max } => {
                SessionError::Protocol(format!("payload of {length} bytes exceeds {max}"))
            }
            FrameError::EmptyControlFrame => {
                SessionError::Protocol("empty control frame".to_string())
            }
        }
    }
}

/// Conditions `process_frames` can wait for. `Elapsed` never holds, so the
/// pump runs until the idle timeout lapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Until {
    Elapsed,
    AddressReceived,
    PasswordReceived,
    OkReceived,
    EobReceived,
}

/// Creates the backing file for one inbound offer, given the session's
/// receive directory and the offered filename.
pub type ReceiveFileFactory = Box<dyn Fn(&Path, &str) -> Box<dyn TransferFile + Send> + Send>;

/// The standard factory: disk-backed files in the receive directory.
pub fn disk_receive_factory() -> ReceiveFileFactory {
    Box::new(|dir, filename| Box::new(DiskTransferFile::inbound(dir, filename)))
}

/// What a finished session did, for the caller's log line.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub received_files: Vec<String>,
    pub failed: bool,
    pub elapsed: Duration,
}

/// One binkp session over stream `S`.
pub struct BinkSession<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    side: BinkSide,
    config: Arc<BinkConfig>,
    credentials: Arc<dyn CredentialSource>,
    timeouts: SessionTimeouts,
    session_id: u32,
    state: BinkState,
    remote: Remote,
    cram: CramAuthenticator,
    auth_type: AuthType,
    // Both sides announced OPT CRC, so offers and M_GOT lines carry CRC32.
    crc: bool,
    secure_session: bool,
    remote_password: String,
    ok_received: bool,
    eob_received: bool,
    eob_sent: bool,
    error_received: bool,
    connection_closed: bool,
    failed: bool,
    bytes_sent: u64,
    bytes_received: u64,
    files_to_send: BTreeMap<String, Box<dyn TransferFile + Send>>,
    current_receive_file: Option<ReceiveFile>,
    // M_GET recorded during a frame pump, serviced by the state loops.
    pending_get: Option<(String, u64)>,
    file_manager: Option<FileManager>,
    factory: ReceiveFileFactory,
}

impl<S: AsyncRead + AsyncWrite + Unpin> BinkSession<S> {
    /// Session for a call we placed to `expected` on `network_name`.
    pub fn originating(
        stream: S,
        config: Arc<BinkConfig>,
        credentials: Arc<dyn CredentialSource>,
        network_name: &str,
        expected: FtnAddress,
        session_id: u32,
        factory: ReceiveFileFactory,
    ) -> BinkSession<S> {
        let remote = Remote::for_originating(Arc::clone(&config), network_name, expected);
        Self::new(stream, config, credentials, BinkSide::Originating, remote, session_id, factory)
    }

    /// Session for a call we answered; the peer identifies itself in M_ADR.
    pub fn answering(
        stream: S,
        config: Arc<BinkConfig>,
        credentials: Arc<dyn CredentialSource>,
        session_id: u32,
        factory: ReceiveFileFactory,
    ) -> BinkSession<S> {
        let remote = Remote::for_answering(Arc::clone(&config));
        Self::new(stream, config, credentials, BinkSide::Answering, remote, session_id, factory)
    }

    fn new(
        stream: S,
        config: Arc<BinkConfig>,
        credentials: Arc<dyn CredentialSource>,
        side: BinkSide,
        remote: Remote,
        session_id: u32,
        factory: ReceiveFileFactory,
    ) -> BinkSession<S> {
        let (reader, writer) = split(stream);
        let timeouts = config.session.clone();
        BinkSession {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            side,
            config,
            credentials,
            timeouts,
            session_id,
            state: BinkState::ConnInit,
            remote,
            cram: CramAuthenticator::new(),
            auth_type: AuthType::PlainText,
            crc: false,
            secure_session: true,
            remote_password: String::new(),
            ok_received: false,
            eob_received: false,
            eob_sent: false,
            error_received: false,
            connection_closed: false,
            failed: false,
            bytes_sent: 0,
            bytes_received: 0,
            files_to_send: BTreeMap::new(),
            current_receive_file: None,
            pending_get: None,
            file_manager: None,
            factory,
        }
    }

    /// Run the session to completion and tear down.
    pub async fn run(mut self) -> SessionSummary {
        let start = Instant::now();
        info!("Session {}: starting ({})", self.session_id, self.side.as_str());
        loop {
            let state = self.state;
            debug!("STATE: {}", state.as_str());
            let next = match state {
                BinkState::ConnInit => self.conn_init().await,
                BinkState::WaitConn => self.wait_conn().await,
                BinkState::SendPassword => self.send_password().await,
                BinkState::WaitAddr => self.wait_addr().await,
                BinkState::AuthRemote => self.auth_remote().await,
                BinkState::IfSecure => Ok(self.if_secure()),
                BinkState::WaitOk => self.wait_ok().await,
                BinkState::WaitPwd => self.wait_pwd().await,
                BinkState::PasswordAck => self.password_ack().await,
                BinkState::TransferFiles => self.transfer_files().await,
                BinkState::WaitEob => self.wait_eob().await,
                BinkState::Unknown => Ok(self.unknown()),
                BinkState::FatalError => self.fatal_error().await,
                BinkState::Done => break,
            };
            self.state = match next {
                Ok(next) => next,
                Err(err @ SessionError::Protocol(_)) => {
                    error!("STATE: {}: {}", state.as_str(), err);
                    if matches!(state, BinkState::Unknown | BinkState::FatalError) {
                        BinkState::Done
                    } else {
                        BinkState::Unknown
                    }
                }
                Err(err) => {
                    error!("STATE: {}: {}", state.as_str(), err);
                    if state == BinkState::FatalError {
                        BinkState::Done
                    } else {
                        BinkState::FatalError
                    }
                }
            };
            if self.error_received {
                error!("STATE: error received; ending session");
                break;
            }
            if self.connection_closed {
                break;
            }
            // Between states, let a straggling inbound frame land.
            if !matches!(self.state, BinkState::Done | BinkState::Unknown | BinkState::FatalError)
                && let Err(err) = self.process_frames(Until::Elapsed, self.timeouts.loop_pump()).await
            {
                error!("{}", err);
                self.state = BinkState::FatalError;
            }
        }
        self.teardown(start).await
    }

    // =========================================================================
    // Frame pump
    // =========================================================================

    fn condition_holds(&self, until: Until) -> bool {
        match until {
            Until::Elapsed => false,
            Until::AddressReceived => !self.remote.address_list().is_empty(),
            Until::PasswordReceived => !self.remote_password.is_empty(),
            Until::OkReceived => self.ok_received,
            Until::EobReceived => self.eob_received,
        }
    }

    /// Read and dispatch frames until `until` holds or `idle` passes with
    /// nothing arriving. Returns whether the condition held. An idle lapse is
    /// not an error; a frame that starts but stalls is.
    async fn process_frames(
        &mut self,
        until: Until,
        idle: Duration,
    ) -> Result<bool, SessionError> {
        loop {
            if self.condition_holds(until) {
                return Ok(true);
            }
            if self.error_received || self.connection_closed {
                return Ok(self.condition_holds(until));
            }
            match self.reader.read_frame_with_full_timeout(idle, self.timeouts.data_read()).await {
                Ok(Some(Frame::Command { id, args })) => self.process_command(id, &args).await?,
                Ok(Some(Frame::Data(payload))) => self.process_data(&payload).await?,
                Ok(None) => {
                    info!("Connection was closed by the other side");
                    self.connection_closed = true;
                    return Ok(self.condition_holds(until));
                }
                Err(FrameError::IdleTimeout) => return Ok(self.condition_holds(until)),
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn process_command(&mut self, id: u8, args: &str) -> Result<(), SessionError> {
        let Some(command) = BinkCommand::from_id(id) else {
            error!("RECV:  unknown command id {}: {}", id, args);
            return Err(SessionError::Protocol(format!("unknown command id {id}")));
        };
        if command == BinkCommand::Pwd {
            info!("RECV:  {}: {}", command.as_str(), "*".repeat(12));
        } else {
            info!("RECV:  {}: {}", command.as_str(), args);
        }
        match command {
            BinkCommand::Nul => self.handle_nul(args),
            BinkCommand::Adr => self.remote.set_address_list(args),
            BinkCommand::Pwd => self.handle_password(args).await?,
            BinkCommand::File => self.handle_file_offer(args),
            BinkCommand::Ok => self.ok_received = true,
            BinkCommand::Eob => self.eob_received = true,
            BinkCommand::Got => self.handle_file_got(args),
            BinkCommand::Err => {
                error!("Remote error: {}", args);
                self.error_received = true;
            }
            BinkCommand::Bsy => {
                error!("Remote busy: {}", args);
                self.error_received = true;
            }
            BinkCommand::Get => self.handle_file_get(args),
            BinkCommand::Skip => self.handle_file_skip(args),
        }
        Ok(())
    }

    fn handle_nul(&mut self, args: &str) {
        if let Some(rest) = args.strip_prefix("OPT") {
            self.process_opt(rest.trim_start());
        } else if let Some(rest) = args.strip_prefix("SYS ") {
            self.remote.set_system_name(rest);
        } else if let Some(rest) = args.strip_prefix("ZYZ ") {
            self.remote.set_sysop_name(rest);
        } else if let Some(rest) = args.strip_prefix("VER ") {
            self.remote.set_version(rest);
        } else if let Some(rest) = args.strip_prefix("LOC ") {
            debug!("Remote location: {}", rest);
        } else if args.starts_with("WWIVVER") || args.starts_with("WWIV ") {
            debug!("Remote WWIV version: {}", args);
        } else {
            debug!("Unhandled M_NUL: {}", args);
        }
    }

    fn process_opt(&mut self, opts: &str) {
        for opt in opts.split_whitespace() {
            if opt.starts_with("CRAM") {
                info!("CRAM requested by remote side");
                if let Some(dash) = opt.rfind('-') {
                    self.cram.set_challenge(&opt[dash + 1..]);
                    if self.config.cram_md5 {
                        self.auth_type = AuthType::CramMd5;
                    } else {
                        info!("CRAM-MD5 disabled in config; using plain text passwords");
                    }
                }
            } else if opt == "CRC" {
                if self.config.crc {
                    info!("Enabling CRC support");
                    self.crc = true;
                } else {
                    info!("Not enabling CRC support (disabled in config)");
                }
            } else {
                info!("Unknown OPT: '{}'", opt);
            }
        }
    }

    async fn handle_password(&mut self, password_line: &str) -> Result<(), SessionError> {
        if !password_line.starts_with("CRAM") {
            info!("Received plain text password");
            self.auth_type = AuthType::PlainText;
            self.remote_password = password_line.to_string();
            return Ok(());
        }
        let Some(hashed) = password_line.strip_prefix("CRAM-MD5-") else {
            self.send_command(
                BinkCommand::Err,
                "CRAM authentication required, no common hash function",
            )
            .await?;
            return Err(SessionError::Auth("no common hash function".to_string()));
        };
        info!("Received CRAM-MD5 hashed password");
        self.auth_type = AuthType::CramMd5;
        self.remote_password = hashed.to_string();
        Ok(())
    }

    fn handle_file_offer(&mut self, request_line: &str) {
        if let Some(mut old) = self.current_receive_file.take() {
            error!("Got M_FILE while still having an open receive file: {}", old.filename());
            if let Err(err) = old.delete() {
                error!("Failed to discard partial file: {}: {}", old.filename(), err);
            }
        }
        let Some(offer) = FileOffer::parse(request_line) else {
            error!("Malformed M_FILE: {}", request_line);
            return;
        };
        if !is_safe_receive_name(&offer.filename) {
            error!("Rejecting unsafe offered filename: {}", offer.filename);
            return;
        }
        let Some(manager) = &self.file_manager else {
            error!("M_FILE before address negotiation; ignoring: {}", request_line);
            return;
        };
        if offer.offset != 0 {
            // We hold none of the earlier bytes; the receive file still
            // needs the full declared length before it is acknowledged.
            warn!("Peer resumed {} at offset {}", offer.filename, offer.offset);
        }
        let file = (self.factory)(manager.dirs().receive_dir(), &offer.filename);
        self.current_receive_file = Some(ReceiveFile::new(file, &offer));
    }

    async fn process_data(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let Some(mut file) = self.current_receive_file.take() else {
            error!("Received a data frame with no current file");
            return Ok(());
        };
        if let Err(err) = file.write_chunk(payload) {
            let err = SessionError::TransferIo(format!("{}: {}", file.filename(), err));
            error!("Abandoning receive: {}", err);
            if let Err(err) = file.delete() {
                error!("Failed to discard partial file: {}: {}", file.filename(), err);
            }
            return Ok(());
        }
        if !file.complete() {
            self.current_receive_file = Some(file);
            return Ok(());
        }

        info!("File finished; bytes received: {}", file.length());
        let mut got_line =
            format!("{} {} {}", file.filename(), file.length(), file.timestamp());
        if self.crc && file.crc() != 0 {
            got_line += &format!(" {:08X}", file.crc());
        }
        self.bytes_received += file.length();
        let filename = file.filename().to_string();
        if let Err(err) = file.close() {
            error!("Failed to close file: {}: {}", filename, err);
        }
        if self.crc
            && file.crc() != 0
            && let Some(actual) = file.computed_crc()
            && actual != file.crc()
        {
            error!(
                "Wrong CRC32 of: {}; expected: {:08x}; actual: {:08x}",
                filename,
                file.crc(),
                actual
            );
        }
        if let Some(manager) = self.file_manager.as_mut() {
            manager.receive_file(&filename);
        }
        self.send_command(BinkCommand::Got, &got_line).await?;
        Ok(())
    }

    fn handle_file_got(&mut self, request_line: &str) {
        let mut parts = request_line.split_whitespace();
        let Some(filename) = parts.next() else {
            error!("Malformed M_GOT: {}", request_line);
            return;
        };
        let length: i64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(-1);
        let Some(mut file) = self.files_to_send.remove(filename) else {
            error!("File not found: {}", filename);
            return;
        };
        match file.file_size() {
            Ok(size) => {
                self.bytes_sent += size;
                if length >= 0 && length as u64 != size {
                    error!(
                        "NON-FATAL ERROR: Size didn't match M_GOT. M_GOT: {}; file size: {}",
                        length, size
                    );
                }
            }
            Err(err) => error!("Failed to size {}: {}", filename, err),
        }
        if let Err(err) = file.delete() {
            error!("Unable to delete file: {}: {}", filename, err);
        }
    }

    fn handle_file_get(&mut self, request_line: &str) {
        let mut parts = request_line.split_whitespace();
        let Some(filename) = parts.next() else {
            error!("Malformed M_GET: {}", request_line);
            return;
        };
        // Tokens after the name are size, timestamp, offset.
        let offset: u64 = parts.nth(2).and_then(|s| s.parse().ok()).unwrap_or(0);
        if !self.files_to_send.contains_key(filename) {
            error!("File not found: {}", filename);
            return;
        }
        self.pending_get = Some((filename.to_string(), offset));
    }

    fn handle_file_skip(&mut self, request_line: &str) {
        let Some(filename) = request_line.split_whitespace().next() else {
            error!("Malformed M_SKIP: {}", request_line);
            return;
        };
        if self.files_to_send.remove(filename).is_some() {
            info!("Remote skipped {}; keeping the local copy queued", filename);
        } else {
            error!("File not found: {}", filename);
        }
    }

    // =========================================================================
    // States
    // =========================================================================

    async fn conn_init(&mut self) -> Result<BinkState, SessionError> {
        self.process_frames(Until::Elapsed, self.timeouts.conn_init_pump()).await?;
        Ok(BinkState::WaitConn)
    }

    async fn wait_conn(&mut self) -> Result<BinkState, SessionError> {
        if self.side == BinkSide::Answering && self.config.cram_md5 {
            let challenge = self.cram.generate_challenge().to_string();
            self.send_command(BinkCommand::Nul, &format!("OPT CRAM-MD5-{challenge}")).await?;
        }
        self.send_command(BinkCommand::Nul, &format!("SYS {}", self.config.system_name)).await?;
        self.send_command(BinkCommand::Nul, &format!("ZYZ {}", self.config.sysop_name)).await?;
        let version = format!("VER binkpd/{} binkp/{}", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION);
        self.send_command(BinkCommand::Nul, &version).await?;
        self.send_command(BinkCommand::Nul, &format!("LOC {}", self.config.location)).await?;
        if self.config.crc {
            self.send_command(BinkCommand::Nul, "OPT CRC").await?;
        }
        let addresses = self.our_address_list();
        self.send_command(BinkCommand::Adr, &addresses).await?;
        // Try to process any inbound frames before leaving this state.
        self.process_frames(Until::Elapsed, self.timeouts.greeting_pump()).await?;
        Ok(BinkState::WaitAddr)
    }

    fn our_address_list(&self) -> String {
        match self.side {
            BinkSide::Answering => {
                let mut list = String::new();
                for network in &self.config.networks {
                    let Some(address) = network.announce_address() else {
                        warn!("No announce address for network: {}", network.name);
                        continue;
                    };
                    if !list.is_empty() {
                        list.push(' ');
                    }
                    list += &address.to_string();
                }
                list
            }
            BinkSide::Originating => self
                .remote
                .network()
                .and_then(Network::announce_address)
                .map(|a| a.to_string())
                .unwrap_or_default(),
        }
    }

    async fn wait_addr(&mut self) -> Result<BinkState, SessionError> {
        for _ in 0..self.timeouts.addr_poll_tries {
            if self.process_frames(Until::AddressReceived, self.timeouts.addr_poll_step()).await? {
                break;
            }
            if self.connection_closed || self.error_received {
                break;
            }
        }
        Ok(match self.side {
            BinkSide::Originating => BinkState::SendPassword,
            BinkSide::Answering => BinkState::AuthRemote,
        })
    }

    async fn send_password(&mut self) -> Result<BinkState, SessionError> {
        debug!("SendPasswd for network '{}'", self.remote.network_name());
        let Some(address) = self.remote.password_address() else {
            return Err(SessionError::Auth("no address to look up a password for".to_string()));
        };
        let password = expected_password(self.credentials.as_ref(), self.remote.domain(), &address);
        let line = match (self.auth_type, self.cram.challenge()) {
            (AuthType::CramMd5, Some(challenge)) => {
                format!("CRAM-MD5-{}", create_hashed_secret(challenge, &password))
            }
            _ => password,
        };
        self.send_command(BinkCommand::Pwd, &line).await?;
        Ok(BinkState::AuthRemote)
    }

    async fn auth_remote(&mut self) -> Result<BinkState, SessionError> {
        debug!("AuthRemote; remote address list: {}", self.remote.address_list());
        let next = match self.side {
            BinkSide::Answering => self.auth_remote_answering().await?,
            BinkSide::Originating => self.auth_remote_calling().await?,
        };
        if next != BinkState::FatalError {
            self.create_file_manager()?;
        }
        Ok(next)
    }

    async fn auth_remote_answering(&mut self) -> Result<BinkState, SessionError> {
        let known = self.config.known_link_addresses();
        let addrs = ftn_addresses_from_address_list(self.remote.address_list(), &known);
        debug!("Resolved {} link address(es)", addrs.len());
        if addrs.is_empty() {
            let msg = format!(
                "Error (NETWORKB-0004): Unable to find common nodes in: {}",
                self.remote.address_list()
            );
            self.send_command(BinkCommand::Err, &msg).await?;
            return Ok(BinkState::FatalError);
        }
        if addrs.len() == 1
            && let Some(addr) = addrs.first()
        {
            // One address: resolve the flat node or the domain directly.
            if addr.zone() == FLAT_ZONE {
                self.remote.set_wwivnet_node(addr.node(), addr.domain());
            } else if let Some(domain) = addr.domain() {
                self.remote.set_domain(domain);
            }
        }
        self.remote.set_ftn_addresses(addrs);
        Ok(BinkState::WaitPwd)
    }

    async fn auth_remote_calling(&mut self) -> Result<BinkState, SessionError> {
        let expected = self.remote.expected().map(|a| a.to_string()).unwrap_or_default();
        debug!("Expected remote address: '{}'", expected);
        if !expected.is_empty()
            && self.remote.address_list().contains(&expected.to_ascii_lowercase())
        {
            return Ok(BinkState::IfSecure);
        }
        let msg = format!(
            "Error (NETWORKB-0001): Unexpected Addresses: '{}'; expected: '{}'",
            self.remote.address_list(),
            expected
        );
        self.send_command(BinkCommand::Err, &msg).await?;
        Ok(BinkState::FatalError)
    }

    fn create_file_manager(&mut self) -> Result<(), SessionError> {
        if self.file_manager.is_some() {
            return Ok(());
        }
        let Some(network) = self.remote.network().cloned() else {
            return Err(SessionError::Protocol(format!(
                "no configured network for domain '{}'",
                self.remote.domain()
            )));
        };
        let dirs = Dirs::for_network(&network, self.session_id);
        debug!(
            "Creating file manager for network {}; receive dir: {}",
            network.name,
            dirs.receive_dir().display()
        );
        match FileManager::new(network, dirs) {
            Ok(manager) => {
                self.file_manager = Some(manager);
                Ok(())
            }
            Err(err) => {
                Err(SessionError::Io(format!("failed to create receive directory: {err}")))
            }
        }
    }

    fn if_secure(&mut self) -> BinkState {
        // We sent a password; wait for the remote to accept it.
        BinkState::WaitOk
    }

    async fn wait_ok(&mut self) -> Result<BinkState, SessionError> {
        for _ in 0..self.timeouts.password_poll_tries {
            if self.process_frames(Until::OkReceived, self.timeouts.password_poll_step()).await? {
                return Ok(BinkState::TransferFiles);
            }
            if self.connection_closed || self.error_received {
                return Ok(BinkState::FatalError);
            }
        }
        error!("M_OK never received");
        self.send_command(BinkCommand::Err, "M_OK never received. Timed out waiting for it.")
            .await?;
        Ok(BinkState::FatalError)
    }

    async fn wait_pwd(&mut self) -> Result<BinkState, SessionError> {
        if self.side != BinkSide::Answering {
            error!("WaitPwd entered on the originating side");
        }
        for _ in 0..self.timeouts.password_poll_tries {
            if self
                .process_frames(Until::PasswordReceived, self.timeouts.password_poll_step())
                .await?
            {
                break;
            }
            if self.connection_closed || self.error_received {
                break;
            }
        }
        Ok(BinkState::PasswordAck)
    }

    async fn password_ack(&mut self) -> Result<BinkState, SessionError> {
        if self.remote.ftn_addresses().is_empty() {
            error!("Unable to parse addresses");
            self.send_command(
                BinkCommand::Err,
                "Unable to find common address to validate password.",
            )
            .await?;
            return Ok(BinkState::FatalError);
        }
        let addresses: Vec<FtnAddress> = self.remote.ftn_addresses().iter().cloned().collect();
        for address in &addresses {
            debug!("Checking password for address: {}", address);
            if self.check_password(address) {
                continue;
            }
            match self.config.auth_failure {
                AuthFailurePolicy::Terminate => {
                    self.send_command(
                        BinkCommand::Err,
                        "Incorrect password received.  Please check your configuration.",
                    )
                    .await?;
                    return Ok(BinkState::FatalError);
                }
                AuthFailurePolicy::ReceiveOnly => {
                    warn!(
                        "Incorrect password from {}; continuing as an insecure session",
                        address
                    );
                    self.secure_session = false;
                }
            }
        }
        if self.secure_session {
            let text = match self.auth_type {
                AuthType::CramMd5 => "Passwords match; secure session.",
                AuthType::PlainText => "Passwords match; insecure session",
            };
            self.send_command(BinkCommand::Ok, text).await?;
        } else {
            self.send_command(BinkCommand::Ok, "insecure session").await?;
        }
        Ok(BinkState::TransferFiles)
    }

    fn check_password(&self, address: &FtnAddress) -> bool {
        let expected = expected_password(self.credentials.as_ref(), self.remote.domain(), address);
        match self.auth_type {
            AuthType::PlainText => self.remote_password == expected,
            AuthType::CramMd5 => self.cram.validate_password(&expected, &self.remote_password),
        }
    }

    async fn transfer_files(&mut self) -> Result<BinkState, SessionError> {
        debug!(
            "TransferFiles with {} on network '{}'",
            self.remote
                .password_address()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unresolved peer".to_string()),
            self.remote.network_name()
        );
        // Quickly let the inbound event loop percolate.
        self.process_frames(Until::Elapsed, self.timeouts.transfer_pump()).await?;
        let list = match &self.file_manager {
            Some(manager) if self.secure_session => {
                manager.create_transfer_file_list(&self.remote, self.crc)
            }
            Some(_) => {
                info!("Insecure session; receiving only");
                Vec::new()
            }
            None => Vec::new(),
        };
        for file in list {
            if self.connection_closed || self.error_received {
                break;
            }
            self.send_file_packet(file).await?;
        }
        debug!("After sending all file offers");
        for _ in 0..self.timeouts.transfer_drain_rounds {
            if self.connection_closed || self.error_received {
                break;
            }
            self.process_frames(Until::Elapsed, self.timeouts.transfer_pump()).await?;
            self.service_pending_get().await?;
        }
        self.maybe_send_eob().await?;
        Ok(BinkState::WaitEob)
    }

    async fn send_file_packet(
        &mut self,
        file: Box<dyn TransferFile + Send>,
    ) -> Result<(), SessionError> {
        let filename = file.filename().to_string();
        debug!("SendFilePacket: {}", filename);
        let offer = file.as_packet_data(0);
        self.files_to_send.insert(filename.clone(), file);
        self.send_command(BinkCommand::File, &offer).await?;
        self.process_frames(Until::Elapsed, self.timeouts.offer_pump()).await?;
        // An M_GET during the pump replaces the plain send with a resume.
        let resumed = self.pending_get.as_ref().is_some_and(|(name, _)| name == &filename);
        self.service_pending_get().await?;
        if !resumed && self.files_to_send.contains_key(&filename) {
            self.send_file_data(&filename, 0).await?;
        }
        Ok(())
    }

    /// Stream one queued file's data from `start`. Each chunk is followed by
    /// a short inbound pump; if the file leaves the queue mid-send (M_GOT or
    /// M_SKIP arrived), streaming stops.
    async fn send_file_data(&mut self, filename: &str, start: u64) -> Result<(), SessionError> {
        debug!("SendFileData: {} from offset {}", filename, start);
        let mut offset = start;
        loop {
            let Some(file) = self.files_to_send.get_mut(filename) else {
                return Ok(());
            };
            let size = match file.file_size() {
                Ok(size) => size,
                Err(err) => {
                    let err = SessionError::TransferIo(format!("{filename}: {err}"));
                    error!("Abandoning send: {}", err);
                    self.files_to_send.remove(filename);
                    return Ok(());
                }
            };
            if offset >= size {
                return Ok(());
            }
            let len = CHUNK_SIZE.min((size - offset) as usize);
            let chunk = match file.read_chunk(offset, len) {
                Ok(chunk) => chunk,
                Err(err) => {
                    let err = SessionError::TransferIo(format!("{filename}: {err}"));
                    error!("Abandoning send: {}", err);
                    self.files_to_send.remove(filename);
                    return Ok(());
                }
            };
            if chunk.is_empty() {
                return Ok(());
            }
            offset += chunk.len() as u64;
            self.writer.write_data(&chunk).await?;
            debug!("SEND:  data packet: {} bytes", chunk.len());
            // Check after each frame whether we have an inbound command.
            self.process_frames(Until::Elapsed, self.timeouts.chunk_pump()).await?;
        }
    }

    async fn service_pending_get(&mut self) -> Result<(), SessionError> {
        if let Some((filename, offset)) = self.pending_get.take() {
            self.send_file_data(&filename, offset).await?;
        }
        Ok(())
    }

    async fn maybe_send_eob(&mut self) -> Result<(), SessionError> {
        if self.eob_sent {
            return Ok(());
        }
        if !self.files_to_send.is_empty() {
            let names: Vec<&str> = self.files_to_send.keys().map(String::as_str).collect();
            debug!("Not sending M_EOB; still awaiting receipts for: {}", names.join(" "));
            return Ok(());
        }
        self.send_command(BinkCommand::Eob, "All files to send have been sent. Thank you.")
            .await?;
        self.eob_sent = true;
        self.process_frames(Until::Elapsed, self.timeouts.transfer_pump()).await?;
        Ok(())
    }

    async fn wait_eob(&mut self) -> Result<BinkState, SessionError> {
        debug!("WaitEob: entering; eob_received: {}", self.eob_received);
        let wait_secs =
            u64::from(self.timeouts.eob_retries) * self.timeouts.eob_step_ms / 1000;
        for _ in 1..self.timeouts.eob_retries {
            if self.eob_received && self.eob_sent {
                return Ok(BinkState::Done);
            }
            if self.connection_closed || self.error_received {
                break;
            }
            self.process_frames(Until::EobReceived, self.timeouts.eob_step()).await?;
            self.service_pending_get().await?;
            self.maybe_send_eob().await?;
            if !(self.eob_received && self.eob_sent) {
                info!("WaitEob: still waiting for M_EOB; will wait up to {} seconds", wait_secs);
            }
        }
        Ok(BinkState::Done)
    }

    fn unknown(&mut self) -> BinkState {
        BinkState::FatalError
    }

    async fn fatal_error(&mut self) -> Result<BinkState, SessionError> {
        self.failed = true;
        self.drain_frames().await;
        Ok(BinkState::Done)
    }

    /// Give the peer a few rounds to read our last frame and say anything
    /// further before the connection goes away. Errors here are moot.
    async fn drain_frames(&mut self) {
        for _ in 0..DRAIN_ROUNDS {
            if self.connection_closed || self.error_received {
                return;
            }
            if self.process_frames(Until::Elapsed, self.timeouts.drain_step()).await.is_err() {
                return;
            }
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    async fn teardown(mut self, start: Instant) -> SessionSummary {
        if let Err(err) = self.writer.shutdown().await {
            debug!("Shutdown: {}", err);
        }
        if let Some(mut file) = self.current_receive_file.take() {
            warn!("Session ended with a partial receive: {}", file.filename());
            if let Err(err) = file.close() {
                error!("Failed to close file: {}: {}", file.filename(), err);
            }
            if let Err(err) = file.delete() {
                error!("Failed to delete partial file: {}: {}", file.filename(), err);
            }
        }
        for (name, mut file) in std::mem::take(&mut self.files_to_send) {
            if let Err(err) = file.close() {
                error!("Failed to close file: {}: {}", name, err);
            }
        }
        if let Some(manager) = &self.file_manager {
            match manager.network().kind {
                NetworkKind::Flat => manager.rename_pending_files(),
                NetworkKind::Ftn => {
                    let tic_password = self.remote.password_address().and_then(|address| {
                        self.credentials.tic_password(self.remote.domain(), &address)
                    });
                    manager.rename_ftn_pending_files(tic_password.as_deref());
                }
            }
            manager.remove_receive_dir_if_empty();
        }
        let failed = self.failed || self.error_received;
        let elapsed = start.elapsed();
        let received_files = self
            .file_manager
            .map(|manager| manager.received_files().to_vec())
            .unwrap_or_default();
        info!(
            "Session {}: {}; sent {} bytes, received {} bytes in {} file(s), {:.1}s",
            self.session_id,
            if failed { "failed" } else { "finished" },
            self.bytes_sent,
            self.bytes_received,
            received_files.len(),
            elapsed.as_secs_f64()
        );
        SessionSummary {
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            received_files,
            failed,
            elapsed,
        }
    }

    async fn send_command(
        &mut self,
        command: BinkCommand,
        args: &str,
    ) -> Result<(), SessionError> {
        self.writer.write_command(command.id(), args).await?;
        if command == BinkCommand::Pwd {
            info!("SEND:  {}: {}", command.as_str(), "*".repeat(8));
        } else {
            info!("SEND:  {}: {}", command.as_str(), args);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::FidoDirs;
    use crate::transfer::InMemoryTransferFile;
    use tempfile::TempDir;
    use tokio::io::{DuplexStream, duplex};

    fn test_config() -> BinkConfig {
        let mut config: BinkConfig =
            serde_json::from_str(r#"{"system_name": "Test System", "sysop_name": "Test Sysop"}"#)
                .unwrap();
        config.session = SessionTimeouts::fast();
        config
    }

    fn memory_factory() -> ReceiveFileFactory {
        Box::new(|_dir, filename| Box::new(InMemoryTransferFile::empty(filename)))
    }

    fn answering_session(config: BinkConfig) -> (BinkSession<DuplexStream>, DuplexStream) {
        let (near, far) = duplex(65536);
        let config = Arc::new(config);
        let credentials: Arc<dyn CredentialSource> = config.clone();
        let session = BinkSession::answering(near, config, credentials, 7, memory_factory());
        (session, far)
    }

    fn originating_session(
        config: BinkConfig,
        expected: &str,
    ) -> (BinkSession<DuplexStream>, DuplexStream) {
        let (near, far) = duplex(65536);
        let config = Arc::new(config);
        let credentials: Arc<dyn CredentialSource> = config.clone();
        let session = BinkSession::originating(
            near,
            config,
            credentials,
            "wwivnet",
            expected.parse().unwrap(),
            7,
            memory_factory(),
        );
        (session, far)
    }

    fn flat_network(dir: &Path) -> Network {
        Network {
            name: "wwivnet".to_string(),
            kind: NetworkKind::Flat,
            dir: dir.to_path_buf(),
            node: 1,
            address: None,
            fido: FidoDirs::default(),
        }
    }

    fn attach_file_manager(session: &mut BinkSession<DuplexStream>, dir: &Path) {
        let network = flat_network(dir);
        let dirs = Dirs::for_network(&network, 7);
        session.file_manager = Some(FileManager::new(network, dirs).unwrap());
    }

    async fn read_command(far: &mut FrameReader<DuplexStream>) -> (u8, String) {
        match far.read_frame().await.unwrap().unwrap() {
            Frame::Command { id, args } => (id, args),
            Frame::Data(_) => panic!("expected a command frame"),
        }
    }

    #[test]
    fn test_state_names() {
        assert_eq!(BinkState::ConnInit.as_str(), "CONN_INIT");
        assert_eq!(BinkState::TransferFiles.as_str(), "TRANSFER_FILES");
        assert_eq!(BinkState::FatalError.to_string(), "FATAL_ERROR");
    }

    #[tokio::test]
    async fn test_both_sides_start_in_conn_init() {
        let (answering, _far) = answering_session(test_config());
        assert_eq!(answering.state, BinkState::ConnInit);

        let (originating, _far) = originating_session(test_config(), "20000:20000/2@wwivnet");
        assert_eq!(originating.state, BinkState::ConnInit);
    }

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            SessionError::Protocol("bad frame".to_string()).to_string(),
            "protocol violation: bad frame"
        );
        assert_eq!(SessionError::Timeout("idle".to_string()).to_string(), "timed out: idle");
    }

    #[test]
    fn test_frame_error_conversion() {
        assert!(matches!(
            SessionError::from(FrameError::FrameTimeout),
            SessionError::Protocol(_)
        ));
        assert!(matches!(
            SessionError::from(FrameError::ConnectionClosed),
            SessionError::Io(_)
        ));
    }

    #[tokio::test]
    async fn test_nul_updates_remote() {
        let (mut session, _far) = answering_session(test_config());
        session.process_command(0, "SYS Fortress BBS").await.unwrap();
        session.process_command(0, "ZYZ Alice").await.unwrap();
        session.process_command(0, "VER mailer/1.2 binkp/1.0").await.unwrap();
        assert_eq!(session.remote.system_name(), "Fortress BBS");
        assert_eq!(session.remote.sysop_name(), "Alice");
        assert_eq!(session.remote.version(), "mailer/1.2 binkp/1.0");
    }

    #[tokio::test]
    async fn test_opt_cram_and_crc() {
        let (mut session, _far) = answering_session(test_config());
        session.process_command(0, "OPT CRAM-MD5-cafe01 CRC").await.unwrap();
        assert_eq!(session.cram.challenge(), Some("cafe01"));
        assert_eq!(session.auth_type, AuthType::CramMd5);
        assert!(session.crc);
    }

    #[tokio::test]
    async fn test_opt_honors_disabled_config() {
        let mut config = test_config();
        config.crc = false;
        config.cram_md5 = false;
        let (mut session, _far) = answering_session(config);
        session.process_command(0, "OPT CRAM-MD5-cafe01 CRC").await.unwrap();
        // Challenge is remembered but neither option is enabled.
        assert_eq!(session.cram.challenge(), Some("cafe01"));
        assert_eq!(session.auth_type, AuthType::PlainText);
        assert!(!session.crc);
    }

    #[tokio::test]
    async fn test_adr_stores_lowercased_list() {
        let (mut session, _far) = answering_session(test_config());
        session.process_command(1, "21:1/151@FSXNET 1:2/3").await.unwrap();
        assert_eq!(session.remote.address_list(), "21:1/151@fsxnet 1:2/3");
    }

    #[tokio::test]
    async fn test_err_and_bsy_set_error_flag() {
        let (mut session, _far) = answering_session(test_config());
        session.process_command(7, "try again later").await.unwrap();
        assert!(session.error_received);

        let (mut session, _far) = answering_session(test_config());
        session.process_command(8, "all lines busy").await.unwrap();
        assert!(session.error_received);
    }

    #[tokio::test]
    async fn test_unknown_command_is_protocol_error() {
        let (mut session, _far) = answering_session(test_config());
        let err = session.process_command(42, "??").await.unwrap_err();
        assert!(matches!(err, SessionError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_plain_password_stored() {
        let (mut session, _far) = answering_session(test_config());
        session.process_command(2, "s3cret").await.unwrap();
        assert_eq!(session.auth_type, AuthType::PlainText);
        assert_eq!(session.remote_password, "s3cret");
    }

    #[tokio::test]
    async fn test_cram_password_stored() {
        let (mut session, _far) = answering_session(test_config());
        session.process_command(2, "CRAM-MD5-deadbeef").await.unwrap();
        assert_eq!(session.auth_type, AuthType::CramMd5);
        assert_eq!(session.remote_password, "deadbeef");
    }

    #[tokio::test]
    async fn test_unsupported_hash_rejected() {
        let (mut session, far) = answering_session(test_config());
        let err = session.process_command(2, "CRAM-SHA1-deadbeef").await.unwrap_err();
        assert!(matches!(err, SessionError::Auth(_)));

        let mut far = FrameReader::new(far);
        let (id, args) = read_command(&mut far).await;
        assert_eq!(id, BinkCommand::Err.id());
        assert_eq!(args, "CRAM authentication required, no common hash function");
    }

    #[tokio::test]
    async fn test_no_common_nodes_error_text() {
        let (mut session, far) = answering_session(test_config());
        session.process_command(1, "1:2/3@nowhere").await.unwrap();
        let next = session.auth_remote_answering().await.unwrap();
        assert_eq!(next, BinkState::FatalError);

        let mut far = FrameReader::new(far);
        let (id, args) = read_command(&mut far).await;
        assert_eq!(id, BinkCommand::Err.id());
        assert_eq!(args, "Error (NETWORKB-0004): Unable to find common nodes in: 1:2/3@nowhere");
    }

    #[tokio::test]
    async fn test_unexpected_address_error_text() {
        let (mut session, far) = originating_session(test_config(), "20000:20000/2@wwivnet");
        session.process_command(1, "20000:20000/9@wwivnet").await.unwrap();
        let next = session.auth_remote_calling().await.unwrap();
        assert_eq!(next, BinkState::FatalError);

        let mut far = FrameReader::new(far);
        let (id, args) = read_command(&mut far).await;
        assert_eq!(id, BinkCommand::Err.id());
        assert_eq!(
            args,
            "Error (NETWORKB-0001): Unexpected Addresses: '20000:20000/9@wwivnet'; \
             expected: '20000:20000/2@wwivnet'"
        );
    }

    #[tokio::test]
    async fn test_got_counts_bytes_and_removes() {
        let (mut session, _far) = answering_session(test_config());
        let file = InMemoryTransferFile::new("r1-2-3.net", b"hello", 1_700_000_000, false);
        session.files_to_send.insert("r1-2-3.net".to_string(), Box::new(file));
        session.process_command(6, "r1-2-3.net 5 1700000000").await.unwrap();
        assert!(session.files_to_send.is_empty());
        assert_eq!(session.bytes_sent, 5);
    }

    #[tokio::test]
    async fn test_got_size_mismatch_is_nonfatal() {
        let (mut session, _far) = answering_session(test_config());
        let file = InMemoryTransferFile::new("r1-2-3.net", b"hello", 1_700_000_000, false);
        session.files_to_send.insert("r1-2-3.net".to_string(), Box::new(file));
        session.process_command(6, "r1-2-3.net 3 1700000000").await.unwrap();
        // Logged but still counted and removed.
        assert!(session.files_to_send.is_empty());
        assert_eq!(session.bytes_sent, 5);
    }

    #[tokio::test]
    async fn test_skip_drops_from_queue_without_deleting() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("0000006f.su0");
        std::fs::write(&path, b"bundle bytes").unwrap();
        let file = DiskTransferFile::outbound(path.clone(), false).unwrap();

        let (mut session, _far) = answering_session(test_config());
        session.files_to_send.insert("0000006f.su0".to_string(), Box::new(file));
        session.process_command(10, "0000006f.su0 12 1700000000").await.unwrap();
        assert!(session.files_to_send.is_empty());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_get_records_pending_resume() {
        let (mut session, _far) = answering_session(test_config());
        let file = InMemoryTransferFile::new("big.zip", b"0123456789", 1_700_000_000, false);
        session.files_to_send.insert("big.zip".to_string(), Box::new(file));

        session.process_command(9, "nosuch.zip 10 1700000000 4").await.unwrap();
        assert!(session.pending_get.is_none());

        session.process_command(9, "big.zip 10 1700000000 4").await.unwrap();
        assert_eq!(session.pending_get, Some(("big.zip".to_string(), 4)));
    }

    #[tokio::test]
    async fn test_data_frame_without_open_file_is_dropped() {
        let (mut session, _far) = answering_session(test_config());
        session.process_data(b"stray bytes").await.unwrap();
        assert_eq!(session.bytes_received, 0);
    }

    #[tokio::test]
    async fn test_receive_completion_sends_got() {
        let tmp = TempDir::new().unwrap();
        let (mut session, far) = answering_session(test_config());
        attach_file_manager(&mut session, tmp.path());

        session.handle_file_offer("report.txt 5 1700000000 0");
        assert!(session.current_receive_file.is_some());
        session.process_data(b"hello").await.unwrap();
        assert!(session.current_receive_file.is_none());
        assert_eq!(session.bytes_received, 5);
        assert_eq!(session.file_manager.as_ref().unwrap().received_files(), ["report.txt"]);

        let mut far = FrameReader::new(far);
        let (id, args) = read_command(&mut far).await;
        assert_eq!(id, BinkCommand::Got.id());
        assert_eq!(args, "report.txt 5 1700000000");
    }

    #[tokio::test]
    async fn test_receive_with_crc_appends_checksum_to_got() {
        let tmp = TempDir::new().unwrap();
        let (mut session, far) = answering_session(test_config());
        attach_file_manager(&mut session, tmp.path());
        session.crc = true;

        // 3610A686 is the CRC32 of "hello".
        session.handle_file_offer("report.txt 5 1700000000 0 3610A686");
        session.process_data(b"hello").await.unwrap();

        let mut far = FrameReader::new(far);
        let (id, args) = read_command(&mut far).await;
        assert_eq!(id, BinkCommand::Got.id());
        assert_eq!(args, "report.txt 5 1700000000 3610A686");
    }

    #[tokio::test]
    async fn test_resumed_offer_needs_full_length_for_got() {
        let tmp = TempDir::new().unwrap();
        let (mut session, far) = answering_session(test_config());
        attach_file_manager(&mut session, tmp.path());

        // Offer resumed at byte 12 of 20. The fresh receive file holds
        // none of those first 12 bytes, so the tail alone earns no
        // receipt and no byte credit.
        session.handle_file_offer("big.zip 20 1700000000 12");
        session.process_data(b"89abcdef").await.unwrap();
        assert!(session.current_receive_file.is_some());
        assert_eq!(session.bytes_received, 0);
        assert!(session.file_manager.as_ref().unwrap().received_files().is_empty());

        // Only the full declared length completes the file.
        session.process_data(b"0123456789ab").await.unwrap();
        assert!(session.current_receive_file.is_none());
        assert_eq!(session.bytes_received, 20);
        assert_eq!(session.file_manager.as_ref().unwrap().received_files(), ["big.zip"]);

        let mut far = FrameReader::new(far);
        let (id, args) = read_command(&mut far).await;
        assert_eq!(id, BinkCommand::Got.id());
        assert_eq!(args, "big.zip 20 1700000000");
    }

    #[tokio::test]
    async fn test_abandoned_partial_removed_with_receive_dir() {
        let tmp = TempDir::new().unwrap();
        let (near, _far) = duplex(65536);
        let config = Arc::new(test_config());
        let credentials: Arc<dyn CredentialSource> = config.clone();
        let mut session =
            BinkSession::answering(near, config, credentials, 7, disk_receive_factory());
        let network = Network {
            name: "fsxnet".to_string(),
            kind: NetworkKind::Ftn,
            dir: tmp.path().to_path_buf(),
            node: 0,
            address: Some("21:9/99@fsxnet".to_string()),
            fido: FidoDirs::default(),
        };
        let dirs = Dirs::for_network(&network, 7);
        session.file_manager = Some(FileManager::new(network, dirs).unwrap());
        let rdir = tmp.path().join("r7");

        session.handle_file_offer("one.txt 10 1700000000 0");
        session.process_data(b"1234").await.unwrap();
        assert!(rdir.join("one.txt").exists());

        // The replacing offer abandons the first file; its partial must
        // not outlive the session in the receive directory.
        session.handle_file_offer("two.txt 3 1700000000 0");
        assert!(!rdir.join("one.txt").exists());
        session.process_data(b"abc").await.unwrap();

        let summary = session.teardown(Instant::now()).await;
        assert_eq!(summary.received_files, ["two.txt"]);
        assert!(!rdir.exists());
    }

    #[tokio::test]
    async fn test_unsafe_offer_names_rejected() {
        let tmp = TempDir::new().unwrap();
        let (mut session, _far) = answering_session(test_config());
        attach_file_manager(&mut session, tmp.path());

        session.handle_file_offer("../evil.txt 5 1700000000 0");
        assert!(session.current_receive_file.is_none());
        session.handle_file_offer("a/b.txt 5 1700000000 0");
        assert!(session.current_receive_file.is_none());
    }

    #[tokio::test]
    async fn test_offer_before_auth_ignored() {
        let (mut session, _far) = answering_session(test_config());
        session.handle_file_offer("report.txt 5 1700000000 0");
        assert!(session.current_receive_file.is_none());
    }

    #[tokio::test]
    async fn test_answering_address_list_presents_all_networks() {
        let tmp = TempDir::new().unwrap();
        let mut config = test_config();
        let mut flat = flat_network(tmp.path());
        flat.node = 5;
        config.networks.push(flat);
        let mut ftn = flat_network(tmp.path());
        ftn.name = "fsxnet".to_string();
        ftn.kind = NetworkKind::Ftn;
        ftn.address = Some("21:1/151@fsxnet".to_string());
        config.networks.push(ftn);

        let (session, _far) = answering_session(config);
        assert_eq!(session.our_address_list(), "20000:20000/5@wwivnet 21:1/151@fsxnet");
    }
}
