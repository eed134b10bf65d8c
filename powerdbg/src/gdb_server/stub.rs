//! The server: a single-client, readiness-driven event loop mapping RSP
//! commands onto one pre-selected thread target.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::packet::{self, Command, Event, PacketBuffer};
use crate::chip::{layout, Adu};
use crate::devicetree::NodeId;
use crate::error::Error;
use crate::target::{System, TargetStatus};

/// Poll tick while no resume is outstanding.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Shortened tick while waiting for a hardware trap, so the trap
/// notification goes out promptly.
const SIGNAL_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Per-request cap on memory reads; longer requests are truncated.
const MAX_MEMORY_READ: u64 = 0x1000;
/// Per-request cap on memory writes.
const MAX_MEMORY_WRITE: usize = 8;

/// The instruction gdb writes for a software breakpoint on this
/// architecture. gdb uses exactly this encoding for sw breaks, so it is
/// substituted with the attention opcode, which is what actually traps
/// here. A narrow compatibility shim tied to one compiler-emitted
/// encoding.
const SW_BREAK_OPCODE: [u8; 4] = [0x08, 0x10, 0x82, 0x7d];
/// The attention instruction, memory byte order.
const ATTN_OPCODE: [u8; 4] = [0x00, 0x02, 0x00, 0x00];

/// 16 'x' characters, the "register unavailable" placeholder.
const UNKNOWN_REGISTER: &str = "xxxxxxxxxxxxxxxx";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    /// No outstanding resume.
    Idle,
    /// A continue was issued; polling for the thread to quiesce.
    SignalWait,
}

/// A GDB remote serial protocol server over one thread target.
pub struct GdbServer<'a> {
    system: &'a mut System,
    thread: NodeId,
    listener: TcpListener,
    client: Option<TcpStream>,
    rx: PacketBuffer,
    last_response: Option<Vec<u8>>,
    state: ClientState,
    poll_interval: Duration,
}

impl<'a> GdbServer<'a> {
    /// Bind the listener and fix `thread` as the session's target for the
    /// whole lifetime of the server.
    pub fn new(system: &'a mut System, thread: NodeId, addr: SocketAddr) -> Result<Self, Error> {
        if system.probe(thread)? != TargetStatus::Enabled {
            return Err(Error::Configuration(format!(
                "{} did not probe as enabled",
                system.path(thread)
            )));
        }

        let listener = TcpListener::bind(addr).map_err(anyhow::Error::from)?;
        listener.set_nonblocking(true).map_err(anyhow::Error::from)?;
        info!(
            "GDB server for {} listening on {}",
            system.path(thread),
            listener.local_addr().map_err(anyhow::Error::from)?
        );

        Ok(GdbServer {
            system,
            thread,
            listener,
            client: None,
            rx: PacketBuffer::new(),
            last_response: None,
            state: ClientState::Idle,
            poll_interval: IDLE_POLL_INTERVAL,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr().expect("listener has an address")
    }

    /// Serve until a fatal listener error.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            self.step()?;
            std::thread::sleep(self.poll_interval);
        }
    }

    /// One event-loop iteration: accept, read, dispatch, poll. The caller
    /// owns the pacing; [GdbServer::run] sleeps the current poll interval
    /// between iterations.
    pub fn step(&mut self) -> Result<(), Error> {
        self.accept_pending()?;
        self.service_client();
        self.poll();
        Ok(())
    }

    fn accept_pending(&mut self) -> Result<(), Error> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                if self.client.is_some() {
                    // Only a single client makes sense: accept, then hang
                    // up on it.
                    info!("rejecting second client {peer}");
                    return Ok(());
                }
                info!("client connected from {peer}");
                stream.set_nonblocking(true).map_err(anyhow::Error::from)?;
                self.client = Some(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(anyhow::Error::from(e).into()),
        }
        Ok(())
    }

    fn service_client(&mut self) {
        if self.client.is_none() {
            return;
        }

        let mut incoming = Vec::new();
        let mut disconnect = false;
        {
            let stream = self.client.as_mut().unwrap();
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => {
                        disconnect = true;
                        break;
                    }
                    Ok(n) => incoming.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) => {
                        warn!("client read failed: {e}");
                        disconnect = true;
                        break;
                    }
                }
            }
        }
        if disconnect {
            self.drop_client();
            return;
        }

        if !incoming.is_empty() {
            trace!("Recv: {}", String::from_utf8_lossy(&incoming));
            if let Err(e) = self.rx.extend(&incoming) {
                warn!("{e}");
                self.send_nak();
            }
        }
        while let Some(event) = self.rx.next_event() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Ack => {}
            Event::Nak => {
                if let Some(last) = self.last_response.clone() {
                    trace!("retransmitting last response");
                    self.send_bytes(&last);
                }
            }
            Event::Corrupt => self.send_nak(),
            Event::Interrupt => self.interrupt(),
            Event::Packet(payload) => {
                self.send_ack();
                self.dispatch(&payload);
            }
        }
    }

    fn dispatch(&mut self, payload: &[u8]) {
        let command = match packet::parse_command(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("malformed packet: {e}");
                self.send_response("E01");
                return;
            }
        };
        debug!("command {command:?}");

        let response = match command {
            Command::ReadGeneralRegisters => Some(self.read_gprs()),
            Command::ReadRegister(id) => Some(self.read_special_register(id)),
            Command::ReadMemory { addr, len } => Some(self.read_memory(addr, len)),
            Command::WriteMemory { addr, data } => Some(self.write_memory(addr, &data)),
            Command::StopReason => Some("S05".to_string()),
            // Only one thread is ever addressable per session.
            Command::SetThread => Some("OK".to_string()),
            Command::Continue => self.continue_thread(),
            Command::Step => Some(self.step_thread()),
            Command::Unknown => Some(String::new()),
        };
        if let Some(payload) = response {
            self.send_response(&payload);
        }
    }

    /// All 32 GPRs, 16 hex chars each, concatenated.
    fn read_gprs(&mut self) -> String {
        let mut data = String::with_capacity(32 * 16);
        for reg in 0..32 {
            let value = self
                .system
                .thread(self.thread)
                .and_then(|mut thread| thread.read_gpr(reg));
            match value {
                Ok(value) => {
                    trace!("r{reg} = {value:#018x}");
                    data.push_str(&packet::encode_register(value));
                }
                Err(e) => {
                    error!("error reading register {reg}: {e}");
                    data.push_str(UNKNOWN_REGISTER);
                }
            }
        }
        data
    }

    fn read_special_register(&mut self, id: u64) -> String {
        let value = match id {
            // PC/NIA
            0x40 => self
                .system
                .thread(self.thread)
                .and_then(|mut thread| thread.read_nia()),
            // LR
            0x43 => self
                .system
                .thread(self.thread)
                .and_then(|mut thread| thread.read_spr(layout::SPR_LR)),
            _ => return UNKNOWN_REGISTER.to_string(),
        };
        match value {
            Ok(value) => packet::encode_register(value),
            Err(e) => {
                error!("error reading register {id:#x}: {e}");
                UNKNOWN_REGISTER.to_string()
            }
        }
    }

    fn read_memory(&mut self, addr: u64, len: u64) -> String {
        if addr == 0 {
            return "E02".to_string();
        }
        let len = if len > MAX_MEMORY_READ {
            info!("too much memory requested, truncating to {MAX_MEMORY_READ:#x}");
            MAX_MEMORY_READ
        } else {
            len
        };
        let mut data = vec![0u8; len as usize];

        if let Some(physical) = linear_map(addr) {
            let Some(adu) = Adu::first_enabled(self.system) else {
                error!("no enabled ADU target");
                return "E03".to_string();
            };
            let read = self
                .system
                .adu(adu)
                .and_then(|mut adu| adu.read(physical, &mut data));
            if let Err(e) = read {
                error!("unable to read memory: {e}");
                return "E01".to_string();
            }
        } else {
            // A virtual address: go through the thread's own view of
            // memory, a word at a time.
            for (i, chunk) in data.chunks_mut(8).enumerate() {
                let read = self
                    .system
                    .thread(self.thread)
                    .and_then(|mut thread| thread.read_mem(addr + 8 * i as u64, chunk));
                if let Err(e) = read {
                    error!("fault reading memory: {e}");
                    return "E02".to_string();
                }
            }
        }
        packet::encode_hex(&data)
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> String {
        if data.len() > MAX_MEMORY_WRITE {
            error!("memory writes are limited to {MAX_MEMORY_WRITE} bytes");
            return "E01".to_string();
        }
        let Some(physical) = linear_map(addr) else {
            error!("no virtual address support for memory writes");
            return "E01".to_string();
        };

        let bytes: &[u8] = if data == SW_BREAK_OPCODE {
            info!("breakpoint opcode detected, replacing with attn");
            let enabled = self
                .system
                .thread(self.thread)
                .and_then(|mut thread| thread.enable_attn());
            if let Err(e) = enabled {
                error!("unable to enable the attention facility: {e}");
                return "E01".to_string();
            }
            &ATTN_OPCODE
        } else {
            data
        };

        let Some(adu) = Adu::first_enabled(self.system) else {
            error!("no enabled ADU target");
            return "E01".to_string();
        };
        let written = self
            .system
            .adu(adu)
            .and_then(|mut adu| adu.write(physical, bytes));
        match written {
            Ok(()) => "OK".to_string(),
            Err(e) => {
                error!("unable to write memory: {e}");
                "E01".to_string()
            }
        }
    }

    /// `c`: resume and start polling; the trap notification comes later.
    fn continue_thread(&mut self) -> Option<String> {
        let started = self
            .system
            .thread(self.thread)
            .and_then(|mut thread| thread.start());
        match started {
            Ok(()) => {
                self.state = ClientState::SignalWait;
                self.poll_interval = SIGNAL_WAIT_POLL_INTERVAL;
                None
            }
            Err(e) => {
                error!("unable to start thread: {e}");
                Some("E01".to_string())
            }
        }
    }

    /// `s`: step one instruction synchronously and report the trap.
    fn step_thread(&mut self) -> String {
        let stepped = self
            .system
            .thread(self.thread)
            .and_then(|mut thread| thread.step(1));
        match stepped {
            Ok(()) => "S05".to_string(),
            Err(e) => {
                error!("unable to step thread: {e}");
                "E01".to_string()
            }
        }
    }

    fn interrupt(&mut self) {
        info!("interrupt");
        self.state = ClientState::Idle;
        self.poll_interval = IDLE_POLL_INTERVAL;
        let stopped = self
            .system
            .thread(self.thread)
            .and_then(|mut thread| thread.stop());
        let response = match stopped {
            Ok(()) => "S05",
            Err(e) => {
                error!("unable to stop thread: {e}");
                "E01"
            }
        };
        self.send_response(response);
    }

    /// The SignalWait poll step, run once per loop iteration.
    fn poll(&mut self) {
        if self.state != ClientState::SignalWait {
            return;
        }
        let status = match self
            .system
            .thread(self.thread)
            .and_then(|mut thread| thread.status())
        {
            Ok(status) => status,
            Err(e) => {
                warn!("unable to read thread status: {e}");
                return;
            }
        };
        if !status.quiesced() {
            return;
        }

        self.state = ClientState::Idle;
        self.poll_interval = IDLE_POLL_INTERVAL;

        if !status.active() {
            error!("thread inactive after trap");
            self.send_response("E01");
            return;
        }

        // The attention instruction has already executed; rewind the NIA
        // over it.
        let rewound = self.system.thread(self.thread).and_then(|mut thread| {
            let nia = thread.read_nia()?;
            thread.write_nia(nia - layout::TRAP_INSTRUCTION_WIDTH)
        });
        if let Err(e) = rewound {
            error!("error rewinding NIA: {e}");
        }
        self.send_response("S05");
    }

    fn send_response(&mut self, payload: &str) {
        let framed = packet::frame(payload.as_bytes());
        trace!("Send: {}", String::from_utf8_lossy(&framed));
        self.last_response = Some(framed.clone());
        self.send_bytes(&framed);
    }

    fn send_ack(&mut self) {
        trace!("Send: +");
        self.send_bytes(b"+");
    }

    fn send_nak(&mut self) {
        trace!("Send: -");
        self.send_bytes(b"-");
    }

    fn send_bytes(&mut self, bytes: &[u8]) {
        let Some(stream) = self.client.as_mut() else {
            return;
        };
        let mut written = 0;
        while written < bytes.len() {
            match stream.write(&bytes[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => {
                    warn!("client write failed: {e}");
                    self.drop_client();
                    return;
                }
            }
        }
    }

    fn drop_client(&mut self) {
        info!("client disconnected");
        self.client = None;
        self.rx = PacketBuffer::new();
        self.last_response = None;
        self.state = ClientState::Idle;
        self.poll_interval = IDLE_POLL_INTERVAL;
    }
}

/// Physical address behind a kernel linear-mapping address, if `addr` is
/// one. All 0xc... addresses are assumed to sit in the linear map; clearing
/// the top two bits yields the physical address. Page table walking for
/// arbitrary virtual addresses is a different problem.
fn linear_map(addr: u64) -> Option<u64> {
    (addr >> 60 == 0xc).then(|| addr & !(0x3 << 62))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::fake_system;

    /// Base address of /pib0/core0/thread0 in the fake system.
    const THREAD_BASE: u64 = 0x31000;

    fn serve(system: &mut System) -> GdbServer<'_> {
        let thread = system.tree().find_by_path("/pib0/core0/thread0").unwrap();
        GdbServer::new(system, thread, "127.0.0.1:0".parse().unwrap()).unwrap()
    }

    fn connect(server: &mut GdbServer<'_>) -> TcpStream {
        let client = TcpStream::connect(server.local_addr()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        server.step().unwrap();
        client
    }

    /// Drive the server a few iterations and return everything the client
    /// received.
    fn pump(server: &mut GdbServer<'_>, client: &mut TcpStream) -> Vec<u8> {
        let mut collected = Vec::new();
        for _ in 0..5 {
            server.step().unwrap();
            let mut buf = [0u8; 8192];
            loop {
                match client.read(&mut buf) {
                    Ok(0) => return collected,
                    Ok(n) => collected.extend_from_slice(&buf[..n]),
                    Err(e)
                        if e.kind() == ErrorKind::WouldBlock
                            || e.kind() == ErrorKind::TimedOut =>
                    {
                        break;
                    }
                    Err(e) => panic!("client read failed: {e}"),
                }
            }
        }
        collected
    }

    fn transact(server: &mut GdbServer<'_>, client: &mut TcpStream, payload: &str) -> Vec<u8> {
        client.write_all(&packet::frame(payload.as_bytes())).unwrap();
        pump(server, client)
    }

    fn expect_reply(received: &[u8], payload: &str) {
        let mut expected = b"+".to_vec();
        expected.extend(packet::frame(payload.as_bytes()));
        assert_eq!(
            received,
            expected,
            "expected reply {payload:?}, got {}",
            String::from_utf8_lossy(received)
        );
    }

    #[test]
    fn general_registers_come_back_big_endian() {
        let (mut system, handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        handle.set_register(THREAD_BASE + layout::THREAD_GPR, 0x0123_4567_89ab_cdef);
        handle.set_register(THREAD_BASE + layout::THREAD_GPR + 8 * 31, u64::MAX);

        let received = transact(&mut server, &mut client, "g");
        let mut expected = String::from("0123456789abcdef");
        expected.push_str(&"0".repeat(30 * 16));
        expected.push_str(&"f".repeat(16));
        expect_reply(&received, &expected);
    }

    #[test]
    fn bad_checksum_is_rejected_with_a_nak() {
        let (mut system, handle) = fake_system();
        handle.set_register(THREAD_BASE + layout::THREAD_NIA, 0xbad);
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        client.write_all(b"$p40#00").unwrap();
        let received = pump(&mut server, &mut client);
        // A nak and nothing else: the command was never dispatched.
        assert_eq!(received, b"-");
    }

    #[test]
    fn special_registers_nia_lr_and_unknown() {
        let (mut system, handle) = fake_system();
        handle.set_register(THREAD_BASE + layout::THREAD_NIA, 0x1000_0000);
        handle.set_register(
            THREAD_BASE + layout::THREAD_SPR + 8 * layout::SPR_LR,
            0x2000_0000,
        );
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(&mut server, &mut client, "p40");
        expect_reply(&received, "0000000010000000");
        let received = transact(&mut server, &mut client, "p43");
        expect_reply(&received, "0000000020000000");
        let received = transact(&mut server, &mut client, "p4a");
        expect_reply(&received, UNKNOWN_REGISTER);
    }

    #[test]
    fn linear_map_reads_go_through_the_adu() {
        let (mut system, handle) = fake_system();
        handle.load_memory(0x1_0000, &[0xaa, 0xbb, 0xcc, 0xdd]);
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(&mut server, &mut client, "mc000000000010000,4");
        expect_reply(&received, "aabbccdd");
    }

    #[test]
    fn oversized_reads_truncate_to_the_cap() {
        let (mut system, _handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(&mut server, &mut client, "mc000000000010000,2000");
        // Still a well-formed reply carrying exactly 0x1000 bytes.
        let expected = "0".repeat(0x1000 * 2);
        expect_reply(&received, &expected);
    }

    #[test]
    fn zero_addresses_are_an_error() {
        let (mut system, _handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(&mut server, &mut client, "m0,8");
        expect_reply(&received, "E02");
    }

    #[test]
    fn virtual_reads_use_the_thread_view() {
        let (mut system, handle) = fake_system();
        handle.load_memory(0x4000, &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(&mut server, &mut client, "m4000,9");
        expect_reply(&received, "010203040506070809");
    }

    #[test]
    fn breakpoint_opcode_is_substituted_with_attn() {
        let (mut system, handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(
            &mut server,
            &mut client,
            "Mc000000000020000,4:0810827d",
        );
        expect_reply(&received, "OK");

        // The backend saw the attention opcode, not gdb's original bytes.
        assert_eq!(handle.memory(0x2_0000, 4), ATTN_OPCODE);
        // And the attention facility is armed on the session thread.
        assert_eq!(
            handle.register(THREAD_BASE + layout::THREAD_MODE) & layout::MODE_ATTN,
            layout::MODE_ATTN
        );
    }

    #[test]
    fn plain_writes_keep_their_bytes() {
        let (mut system, handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(&mut server, &mut client, "Mc000000000030000,4:11223344");
        expect_reply(&received, "OK");
        assert_eq!(handle.memory(0x3_0000, 4), [0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn oversized_writes_are_refused() {
        let (mut system, _handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(
            &mut server,
            &mut client,
            "Mc000000000030000,9:112233445566778899",
        );
        expect_reply(&received, "E01");
    }

    #[test]
    fn continue_reports_the_trap_after_quiescence() {
        let (mut system, handle) = fake_system();
        handle.set_register(THREAD_BASE + layout::THREAD_NIA, 0x1004);
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        // The continue itself gets only the ack; the thread is running.
        let received = transact(&mut server, &mut client, "c");
        assert_eq!(received, b"+");

        // The poll tick is shortened while the resume is outstanding.
        assert_eq!(server.poll_interval, SIGNAL_WAIT_POLL_INTERVAL);

        // The hardware traps.
        handle.quiesce_thread(THREAD_BASE);
        let received = pump(&mut server, &mut client);
        assert_eq!(received, packet::frame(b"S05"));

        // The NIA was rewound over the attention instruction and the tick
        // restored.
        assert_eq!(handle.register(THREAD_BASE + layout::THREAD_NIA), 0x1000);
        assert_eq!(server.poll_interval, IDLE_POLL_INTERVAL);
    }

    #[test]
    fn inactive_thread_after_trap_is_an_error() {
        let (mut system, handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(&mut server, &mut client, "c");
        assert_eq!(received, b"+");

        handle.deactivate_thread(THREAD_BASE);
        let received = pump(&mut server, &mut client);
        assert_eq!(received, packet::frame(b"E01"));
    }

    #[test]
    fn single_step_reports_immediately() {
        let (mut system, _handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(&mut server, &mut client, "s");
        expect_reply(&received, "S05");
        let received = transact(&mut server, &mut client, "vCont;s");
        expect_reply(&received, "S05");
    }

    #[test]
    fn interrupt_stops_and_reports() {
        let (mut system, _handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        client.write_all(&[0x03]).unwrap();
        let received = pump(&mut server, &mut client);
        assert_eq!(received, packet::frame(b"S05"));
    }

    #[test]
    fn set_thread_and_stop_reason_acknowledge() {
        let (mut system, _handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(&mut server, &mut client, "Hg0");
        expect_reply(&received, "OK");
        let received = transact(&mut server, &mut client, "?");
        expect_reply(&received, "S05");
    }

    #[test]
    fn unknown_commands_get_an_empty_reply() {
        let (mut system, _handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(&mut server, &mut client, "qSupported:multiprocess+");
        expect_reply(&received, "");
    }

    #[test]
    fn nak_triggers_a_retransmission() {
        let (mut system, _handle) = fake_system();
        let mut server = serve(&mut system);
        let mut client = connect(&mut server);

        let received = transact(&mut server, &mut client, "?");
        expect_reply(&received, "S05");

        client.write_all(b"-").unwrap();
        let received = pump(&mut server, &mut client);
        assert_eq!(received, packet::frame(b"S05"));
    }

    #[test]
    fn second_client_is_accepted_then_closed() {
        let (mut system, _handle) = fake_system();
        let mut server = serve(&mut system);
        let mut first = connect(&mut server);

        let mut second = TcpStream::connect(server.local_addr()).unwrap();
        second
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        server.step().unwrap();

        // The second connection gets EOF straight away.
        let mut buf = [0u8; 16];
        assert_eq!(second.read(&mut buf).unwrap(), 0);

        // The first client still works.
        let received = transact(&mut server, &mut first, "?");
        expect_reply(&received, "S05");
    }
}
