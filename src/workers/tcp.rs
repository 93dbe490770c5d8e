//! TCP worker: state fan-out and the command/config/stats endpoint.
//!
//! Two listeners: the STATE port streams one frame per cycle to every
//! connected observer; the CMD port accepts any number of simultaneous
//! command clients, each with its own framing decoder. A newer client never
//! evicts an older one.
//!
//! One-shot semantics live here: beeps and flag rising edges are emitted at
//! most once per command sequence number, while the continuous motor values
//! are latched into the command mailbox every frame.

use crate::core::time::{Timestamps, now_mono_s};
use crate::core::types::{EventCmd, EventSample, EventType};
use crate::error::Error;
use crate::shared::SharedState;
use crate::sync::{RateLimiter, StopFlag};
use crate::wire::frame::{FrameRx, HEADER_SIZE, MsgType, encode_header};
use crate::wire::payload::{CmdPayload, ConfigPayload, SetpointPayload, StatePayload, StatsPayload};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Per-recv scratch size; larger bursts simply take extra reads
const RECV_CHUNK: usize = 2048;

struct CmdClient {
    stream: TcpStream,
    rx: FrameRx,
}

pub struct TcpWorker {
    sh: Arc<SharedState>,
    stop: Arc<StopFlag>,
}

impl TcpWorker {
    pub fn new(sh: Arc<SharedState>, stop: Arc<StopFlag>) -> Self {
        Self { sh, stop }
    }

    fn bind(&self, ip: &str, port: u16, what: &str) -> Result<TcpListener, Error> {
        let addr = format!("{}:{}", ip, port);
        let listener = TcpListener::bind((ip, port)).map_err(|_| Error::Bind(addr.clone()))?;
        listener
            .set_nonblocking(true)
            .map_err(|_| Error::Bind(addr.clone()))?;
        log::info!("{} server listening on {}", what, addr);
        Ok(listener)
    }

    pub fn run(self) {
        let cfg = self.sh.config();

        let state_srv = match self.bind(&cfg.bind_ip, cfg.state_port, "State") {
            Ok(l) => l,
            Err(e) => {
                log::error!("{}", e);
                self.sh.mark_fatal();
                self.stop.request_stop();
                return;
            }
        };
        let cmd_srv = match self.bind(&cfg.bind_ip, cfg.cmd_port, "Cmd") {
            Ok(l) => l,
            Err(e) => {
                log::error!("{}", e);
                self.sh.mark_fatal();
                self.stop.request_stop();
                return;
            }
        };

        let mut state_clients: Vec<TcpStream> = Vec::new();
        let mut cmd_clients: Vec<CmdClient> = Vec::new();

        // One-shot gating across all command clients
        let mut last_cmd_seq: u32 = 0;
        let mut last_cmd_flags: u8 = 0;

        let mut state_seq: u32 = 0;
        let mut stats_seq: u32 = 0;

        let mut rate = RateLimiter::new(cfg.tcp_hz);

        while !self.stop.stop_requested() {
            rate.set_hz(self.sh.config().tcp_hz);

            self.accept_state_clients(&state_srv, &mut state_clients);
            self.accept_cmd_clients(&cmd_srv, &mut cmd_clients);

            // Receive and dispatch command traffic
            cmd_clients.retain_mut(|client| {
                self.service_cmd_client(
                    client,
                    &mut last_cmd_seq,
                    &mut last_cmd_flags,
                    &mut stats_seq,
                )
            });

            // Broadcast one state frame per cycle once the board reported
            if let Some(st) = self.sh.latest_state.load() {
                state_seq = state_seq.wrapping_add(1);
                let payload = StatePayload {
                    seq: state_seq,
                    t_mono_s: now_mono_s() as f32,
                    st,
                };

                let mut frame = [0u8; HEADER_SIZE + StatePayload::SIZE];
                frame[..HEADER_SIZE]
                    .copy_from_slice(&encode_header(MsgType::State, StatePayload::SIZE as u8));
                frame[HEADER_SIZE..].copy_from_slice(&payload.encode());

                state_clients.retain_mut(|client| match client.write_all(&frame) {
                    Ok(()) => true,
                    Err(e) => {
                        log::info!("State client dropped: {}", e);
                        false
                    }
                });
            }

            rate.sleep();
        }

        log::info!("TCP worker stopped");
    }

    fn accept_state_clients(&self, srv: &TcpListener, clients: &mut Vec<TcpStream>) {
        loop {
            match srv.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        log::warn!("State client {} rejected: {}", addr, e);
                        continue;
                    }
                    log::info!("State client connected: {} ({})", addr, clients.len() + 1);
                    clients.push(stream);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::error!("State accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn accept_cmd_clients(&self, srv: &TcpListener, clients: &mut Vec<CmdClient>) {
        loop {
            match srv.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        log::warn!("Cmd client {} rejected: {}", addr, e);
                        continue;
                    }
                    log::info!("Cmd client connected: {} ({})", addr, clients.len() + 1);
                    clients.push(CmdClient {
                        stream,
                        rx: FrameRx::new(),
                    });
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::error!("Cmd accept error: {}", e);
                    break;
                }
            }
        }
    }

    /// Drain one client's socket and dispatch its frames.
    ///
    /// Returns false when the client should be dropped.
    fn service_cmd_client(
        &self,
        client: &mut CmdClient,
        last_cmd_seq: &mut u32,
        last_cmd_flags: &mut u8,
        stats_seq: &mut u32,
    ) -> bool {
        let mut buf = [0u8; RECV_CHUNK];
        loop {
            match client.stream.read(&mut buf) {
                Ok(0) => {
                    log::info!("Cmd client disconnected");
                    return false;
                }
                Ok(n) => client.rx.push_bytes(&buf[..n]),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::info!("Cmd client dropped: {}", e);
                    return false;
                }
            }
        }

        while let Some((ty, payload)) = client.rx.pop() {
            match ty {
                MsgType::Cmd => self.handle_cmd(&payload, last_cmd_seq, last_cmd_flags),
                MsgType::Setpoint => self.handle_setpoint(&payload),
                MsgType::Config => self.handle_config(&payload),
                MsgType::StatsReq => {
                    *stats_seq = stats_seq.wrapping_add(1);
                    let stats = self.build_stats(*stats_seq);
                    let mut frame = [0u8; HEADER_SIZE + StatsPayload::SIZE];
                    frame[..HEADER_SIZE].copy_from_slice(&encode_header(
                        MsgType::StatsResp,
                        StatsPayload::SIZE as u8,
                    ));
                    frame[HEADER_SIZE..].copy_from_slice(&stats.encode());
                    // best-effort; a failed reply drops the client next read
                    let _ = client.stream.write_all(&frame);
                }
                // Valid framing but not something clients may send us
                MsgType::State | MsgType::StatsResp => {
                    self.sh.tcp_frames_bad.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        true
    }

    fn handle_cmd(&self, payload: &[u8], last_seq: &mut u32, last_flags: &mut u8) {
        let Some(cmd) = CmdPayload::decode(payload) else {
            self.sh.tcp_frames_bad.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let actions = cmd.actions;

        self.sh.touch_cmd_rx(now_mono_s());

        if cmd.seq != *last_seq {
            if actions.beep_ms != 0 {
                self.sh.event_cmd_q.push_overwrite(EventCmd {
                    kind: EventType::Beep,
                    seq: cmd.seq,
                    data0: actions.beep_ms,
                    ..Default::default()
                });
            }

            let mask = self.sh.config().flag_event_mask;
            let rises = !*last_flags & actions.flags & mask;
            for bit in 0..8u8 {
                if rises & (1 << bit) != 0 {
                    self.push_sys_event(EventCmd {
                        kind: EventType::FlagRise,
                        seq: cmd.seq,
                        data0: bit,
                        data1: actions.flags,
                        ..Default::default()
                    });
                }
            }

            *last_seq = cmd.seq;
            *last_flags = actions.flags;
        }

        // Only the continuous part is latched; one-shots went to the queues
        self.sh.latest_remote_motor_cmd.store(actions.motors);
    }

    fn handle_setpoint(&self, payload: &[u8]) {
        let Some(sp) = SetpointPayload::decode(payload) else {
            self.sh.tcp_frames_bad.fetch_add(1, Ordering::Relaxed);
            return;
        };
        self.sh.touch_cmd_rx(now_mono_s());
        self.sh.latest_setpoint_cmd.store(sp);
    }

    fn handle_config(&self, payload: &[u8]) {
        let Some(p) = ConfigPayload::decode(payload) else {
            self.sh.tcp_frames_bad.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let next = self.sh.config().with_applied(&p);
        self.sh.cfg.store(Arc::new(next));
        log::info!("Config applied: key={} seq={}", p.key, p.seq);

        self.push_sys_event(EventCmd {
            kind: EventType::ConfigApplied,
            seq: p.seq,
            data0: p.key,
            ..Default::default()
        });
    }

    /// Queue a system event for the controller and mirror it to the recorder
    fn push_sys_event(&self, ev: EventCmd) {
        self.sh.sys_event_q.push_overwrite(ev);
        self.sh.sys_event_ring.push_overwrite(EventSample {
            ts: Timestamps::now(),
            ev,
        });
    }

    fn build_stats(&self, seq: u32) -> StatsPayload {
        let cfg = self.sh.config();
        StatsPayload {
            seq,
            uptime_ms: ((now_mono_s() - self.sh.start_mono_s) * 1000.0) as u32,
            usb_hz: cfg.usb_hz as f32,
            tcp_hz: cfg.tcp_hz as f32,
            ctrl_hz: cfg.ctrl_hz as f32,
            drops_state: self.sh.state_ring.drops() as u32,
            drops_cmd: self.sh.cmd_ring.drops() as u32,
            drops_event: self.sh.event_ring.drops() as u32,
            drops_sys_event: self.sh.sys_event_ring.drops() as u32,
            tcp_frames_bad: self.sh.tcp_frames_bad.load(Ordering::Relaxed),
            serial_errors: self.sh.serial_errors.load(Ordering::Relaxed),
            reserved: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::core::types::{Actions, MotorCommands};

    fn worker() -> TcpWorker {
        TcpWorker::new(
            SharedState::new(RuntimeConfig::default()),
            Arc::new(StopFlag::new()),
        )
    }

    fn cmd_bytes(seq: u32, motors: MotorCommands, beep: u8, flags: u8) -> Vec<u8> {
        CmdPayload {
            seq,
            actions: Actions {
                motors,
                beep_ms: beep,
                flags,
            },
        }
        .encode()
        .to_vec()
    }

    #[test]
    fn test_cmd_latches_motors_and_timestamps() {
        let w = worker();
        assert_eq!(w.sh.last_cmd_rx_mono_s(), 0.0);

        let motors = MotorCommands { m1: 10, m2: -10, m3: 0, m4: 5 };
        let (mut seq, mut flags) = (0u32, 0u8);
        w.handle_cmd(&cmd_bytes(1, motors, 0, 0), &mut seq, &mut flags);

        assert_eq!(w.sh.latest_remote_motor_cmd.load(), Some(motors));
        assert!(w.sh.last_cmd_rx_mono_s() > 0.0);
        assert!(w.sh.event_cmd_q.is_empty());
        assert!(w.sh.sys_event_q.is_empty());
    }

    #[test]
    fn test_beep_fires_once_per_sequence() {
        let w = worker();
        let (mut seq, mut flags) = (0u32, 0u8);
        let m = MotorCommands::ZERO;

        w.handle_cmd(&cmd_bytes(1, m, 50, 0), &mut seq, &mut flags);
        // same seq replayed: no second beep
        w.handle_cmd(&cmd_bytes(1, m, 50, 0), &mut seq, &mut flags);
        w.handle_cmd(&cmd_bytes(2, m, 50, 0), &mut seq, &mut flags);

        let mut beeps = Vec::new();
        w.sh.event_cmd_q.drain(usize::MAX, |ev| beeps.push(ev));
        assert_eq!(beeps.len(), 2);
        assert!(beeps.iter().all(|ev| ev.kind == EventType::Beep && ev.data0 == 50));
    }

    #[test]
    fn test_flag_rising_edge_with_mask() {
        let w = worker(); // default mask 0x07
        let (mut seq, mut flags) = (0u32, 0u8);
        let m = MotorCommands::ZERO;

        w.handle_cmd(&cmd_bytes(1, m, 0, 0x00), &mut seq, &mut flags);
        w.handle_cmd(&cmd_bytes(2, m, 0, 0x01), &mut seq, &mut flags);

        let ev = w.sh.sys_event_q.pop().unwrap();
        assert_eq!(ev.kind, EventType::FlagRise);
        assert_eq!(ev.data0, 0);
        assert_eq!(ev.data1, 0x01);
        assert!(w.sh.sys_event_q.is_empty());

        // held high: no repeat; bit above the mask: no event
        w.handle_cmd(&cmd_bytes(3, m, 0, 0x01), &mut seq, &mut flags);
        w.handle_cmd(&cmd_bytes(4, m, 0, 0x09), &mut seq, &mut flags);
        assert!(w.sh.sys_event_q.is_empty());

        // falling then rising again: new event
        w.handle_cmd(&cmd_bytes(5, m, 0, 0x00), &mut seq, &mut flags);
        w.handle_cmd(&cmd_bytes(6, m, 0, 0x02), &mut seq, &mut flags);
        let ev = w.sh.sys_event_q.pop().unwrap();
        assert_eq!(ev.data0, 1);
    }

    #[test]
    fn test_malformed_cmd_counted_not_latched() {
        let w = worker();
        let (mut seq, mut flags) = (0u32, 0u8);
        w.handle_cmd(&[0u8; 13], &mut seq, &mut flags);
        assert_eq!(w.sh.tcp_frames_bad.load(Ordering::Relaxed), 1);
        assert_eq!(w.sh.latest_remote_motor_cmd.load(), None);
        assert_eq!(w.sh.last_cmd_rx_mono_s(), 0.0);
    }

    #[test]
    fn test_config_frame_swaps_snapshot_and_emits_event() {
        let w = worker();
        let p = ConfigPayload {
            seq: 3,
            key: crate::config::config_key::TCP_HZ,
            v_u8: 0,
            v_u16: 50,
            v_u32: 0,
        };
        w.handle_config(&p.encode());

        assert_eq!(w.sh.config().tcp_hz, 50.0);
        let ev = w.sh.sys_event_q.pop().unwrap();
        assert_eq!(ev.kind, EventType::ConfigApplied);
        assert_eq!(ev.data0, crate::config::config_key::TCP_HZ);
        // mirrored into the recorder ring
        assert_eq!(w.sh.sys_event_ring.len(), 1);
    }

    #[test]
    fn test_setpoint_latches_and_timestamps() {
        let w = worker();
        let sp = SetpointPayload {
            seq: 1,
            sp: [1.0, 2.0, 3.0, 4.0],
            flags: 0,
        };
        w.handle_setpoint(&sp.encode());
        assert_eq!(w.sh.latest_setpoint_cmd.load(), Some(sp));
        assert!(w.sh.last_cmd_rx_mono_s() > 0.0);
    }

    #[test]
    fn test_stats_reflect_counters() {
        let w = worker();
        w.sh.tcp_frames_bad.store(4, Ordering::Relaxed);
        let stats = w.build_stats(9);
        assert_eq!(stats.seq, 9);
        assert_eq!(stats.tcp_frames_bad, 4);
        assert_eq!(stats.usb_hz, 200.0);
    }
}
