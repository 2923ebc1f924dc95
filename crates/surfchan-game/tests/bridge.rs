//! End-to-end tests: a scripted game plugin talks to a `SyncBridge` over TCP.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};
use surfchan_core::{BridgeConfig, Button, Buttons, MapSpec, StepAction, SurfError};
use surfchan_game::{HeadlessScreen, SessionState, SyncBridge};

const TELEMETRY: &str = "3:10.0,0.0,64.0,90.0,1.0,0.0,0.0,1.0,0";

/// The game server plugin side of the connection
struct Peer {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Peer {
    fn connect(addr: SocketAddr) -> Self {
        let writer = TcpStream::connect(addr).unwrap();
        writer
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let reader = BufReader::new(writer.try_clone().unwrap());
        Self { reader, writer }
    }

    fn recv(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line.trim_end_matches('\n').to_string()
    }

    fn send(&mut self, frame: &str) {
        self.writer.write_all(frame.as_bytes()).unwrap();
        self.writer.write_all(b"\n").unwrap();
        self.writer.flush().unwrap();
    }

    /// Answer the bridge's `Init` and `Start`
    fn handshake(&mut self) {
        assert_eq!(self.recv(), "1:66");
        self.send("1:127.0.0.1:9999");
        assert_eq!(self.recv(), "2:0,-128,336,90");
    }
}

fn config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.listen.port = 0;
    config.server.launch = false;
    config.client.launch = false;
    config.operator_start = false;
    config.window.poll_interval_ms = 5;
    config.observation.size = 64;
    config.maps.insert(
        "beginner".into(),
        MapSpec {
            start: [0.0, -128.0, 336.0],
            start_angle: 90.0,
            finish: [0.0, 6000.0, -1200.0],
            ground_level: 0.0,
        },
    );
    config
}

fn start(config: BridgeConfig) -> (SyncBridge, SocketAddr) {
    let bridge = SyncBridge::start(config, Arc::new(HeadlessScreen::default())).unwrap();
    let addr = bridge.listen_addr().unwrap();
    (bridge, addr)
}

fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn forward() -> StepAction {
    StepAction::new(Buttons::NONE.with(Button::Forward), 1.0, 0.0)
}

#[test]
fn test_handshake_step_and_reset() {
    let (bridge, addr) = start(config());

    let peer = std::thread::spawn(move || {
        let mut peer = Peer::connect(addr);
        peer.handshake();
        assert_eq!(peer.recv(), "3:1,f,1.0,0.0");
        peer.send(TELEMETRY);
        assert_eq!(peer.recv(), "4:");
        peer
    });

    bridge.init("beginner").unwrap();
    assert_eq!(bridge.bridge().announcements(), 1);
    assert_eq!(
        bridge.bridge().peer_address().as_deref(),
        Some("127.0.0.1:9999")
    );

    let obs = bridge.step(forward()).unwrap();
    assert_eq!(obs.telemetry.position, [10.0, 0.0, 64.0]);
    assert_eq!(obs.telemetry.angle, 90.0);
    assert_eq!(obs.telemetry.speed, 1.0);
    assert!(!obs.telemetry.crouching);
    assert_eq!((obs.image.width(), obs.image.height()), (64, 64));

    // Reset returns without any reply from the peer
    bridge.reset().unwrap();
    let _peer = peer.join().unwrap();

    assert_eq!(bridge.timings().count(), 1);
    bridge.close().unwrap();
}

#[test]
fn test_bad_frames_are_skipped() {
    let (bridge, addr) = start(config());

    let peer = std::thread::spawn(move || {
        let mut peer = Peer::connect(addr);
        peer.handshake();
        assert_eq!(peer.recv(), "3:0,,0.0,0.0");
        peer.send("");
        peer.send("nocolon");
        peer.send("99:x");
        peer.send("3:not,telemetry");
        peer.send(TELEMETRY);
        peer
    });

    bridge.init("beginner").unwrap();
    let obs = bridge.step(StepAction::idle()).unwrap();
    assert_eq!(obs.telemetry.position, [10.0, 0.0, 64.0]);
    let _peer = peer.join().unwrap();
    bridge.close().unwrap();
}

#[test]
fn test_stacked_frames_are_consumed_in_order() {
    let (bridge, addr) = start(config());

    let peer = std::thread::spawn(move || {
        let mut peer = Peer::connect(addr);
        peer.handshake();
        for x in 1..=3 {
            peer.send(&format!("3:{}.0,0.0,0.0,0.0,0.0,0.0,0.0,0.0,0", x));
        }
        peer
    });

    bridge.init("beginner").unwrap();
    let _peer = peer.join().unwrap();

    let waiters = bridge.bridge().waiters();
    eventually("stacked frames", || {
        waiters.buffered(surfchan_bridge::FrameKind::Step) == 3
    });
    assert_eq!(waiters.stacking_warnings(), 2);

    for x in [1.0, 2.0, 3.0] {
        let obs = bridge.step(StepAction::idle()).unwrap();
        assert_eq!(obs.telemetry.position[0], x);
    }
    bridge.close().unwrap();
}

#[test]
fn test_disconnect_cancels_step_and_allows_reinit() {
    let (bridge, addr) = start(config());

    let first = std::thread::spawn(move || {
        let mut peer = Peer::connect(addr);
        peer.handshake();
        assert_eq!(peer.recv(), "3:1,f,1.0,0.0");
        // Hang up instead of answering
    });

    bridge.init("beginner").unwrap();
    assert!(matches!(bridge.step(forward()), Err(SurfError::Cancelled)));
    first.join().unwrap();
    eventually("listener to come back", || {
        bridge.bridge().session_state() == SessionState::Listening
    });
    assert!(bridge.bridge().peer_address().is_none());

    let second = std::thread::spawn(move || {
        let mut peer = Peer::connect(addr);
        peer.handshake();
        assert_eq!(peer.recv(), "3:1,f,1.0,0.0");
        peer.send(TELEMETRY);
        peer
    });

    bridge.init("beginner").unwrap();
    assert_eq!(bridge.bridge().announcements(), 2);
    assert!(bridge.step(forward()).is_ok());
    let _peer = second.join().unwrap();
    bridge.close().unwrap();
}

#[test]
fn test_close_cancels_pending_step() {
    let (bridge, addr) = start(config());

    let peer = std::thread::spawn(move || {
        let mut peer = Peer::connect(addr);
        peer.handshake();
        assert_eq!(peer.recv(), "3:1,f,1.0,0.0");
        peer
    });
    bridge.init("beginner").unwrap();

    std::thread::scope(|s| {
        let pending = s.spawn(|| bridge.step(forward()));
        eventually("step to be sent", || {
            bridge
                .bridge()
                .waiters()
                .pending(surfchan_bridge::FrameKind::Step)
                == 1
        });

        let started = Instant::now();
        bridge.close().unwrap();
        assert!(matches!(pending.join().unwrap(), Err(SurfError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    });

    let _peer = peer.join().unwrap();
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn test_operator_gate() {
    let mut config = config();
    config.operator_start = true;
    let (bridge, addr) = start(config);
    let gate = bridge.start_trigger();

    let peer = std::thread::spawn(move || {
        let mut peer = Peer::connect(addr);
        assert_eq!(peer.recv(), "1:66");
        peer.send("1:127.0.0.1:9999");
        // `Start` only follows the operator signal
        assert_eq!(peer.recv(), "2:0,-128,336,90");
        peer
    });

    std::thread::scope(|s| {
        let init = s.spawn(|| bridge.init("beginner"));
        eventually("announcement", || bridge.bridge().announcements() == 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(!init.is_finished());

        gate.fire();
        init.join().unwrap().unwrap();
    });

    let _peer = peer.join().unwrap();
    bridge.close().unwrap();
}

#[test]
fn test_interrupt_cancels_init_at_gate() {
    let mut config = config();
    config.operator_start = true;
    let (bridge, addr) = start(config);

    let peer = std::thread::spawn(move || {
        let mut peer = Peer::connect(addr);
        assert_eq!(peer.recv(), "1:66");
        peer.send("1:127.0.0.1:9999");
        peer
    });

    std::thread::scope(|s| {
        let init = s.spawn(|| bridge.init("beginner"));
        eventually("announcement", || bridge.bridge().announcements() == 1);

        bridge.interrupt();
        assert!(matches!(init.join().unwrap(), Err(SurfError::Cancelled)));
    });

    let _peer = peer.join().unwrap();
    bridge.close().unwrap();
}

/// Shell script standing in for a game executable: appends its pid and argv
/// to `<path>.args`, then idles
#[cfg(target_os = "linux")]
fn fake_executable(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, "#!/bin/sh\necho \"$$ $@\" >> \"$0.args\"\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(target_os = "linux")]
fn launches(executable: &std::path::Path) -> Vec<String> {
    let mut path = executable.as_os_str().to_owned();
    path.push(".args");
    std::fs::read_to_string(path)
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(target_os = "linux")]
#[test]
fn test_init_launches_server_and_one_client() {
    let root = std::env::temp_dir().join(format!("surfchan-launch-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);
    let assets = root.join("assets");
    std::fs::create_dir_all(assets.join("maps")).unwrap();
    for name in ["mapcycle.txt", "server.cfg", "autoexec_server.cfg", "autoexec_css.cfg"] {
        std::fs::write(assets.join(name), "// staged\n").unwrap();
    }
    std::fs::write(assets.join("maps").join("surf_beginner.bsp"), "bsp").unwrap();

    let mut config = config();
    config.assets_dir = assets;
    config.server.launch = true;
    config.server.root = root.join("server");
    config.server.executable = "srcds_run".into();
    config.client.launch = true;
    config.client.root = root.join("client");
    config.client.executable = "hl2_linux".into();
    let server_exe = config.server.root.join(&config.server.executable);
    let client_exe = config.client.root.join(&config.client.executable);
    fake_executable(&server_exe);
    fake_executable(&client_exe);

    let (bridge, addr) = start(config);
    let peer = std::thread::spawn(move || {
        let mut peer = Peer::connect(addr);
        peer.handshake();
        assert_eq!(peer.recv(), "3:1,f,1.0,0.0");
        peer.send(TELEMETRY);
        peer
    });

    bridge.init("beginner").unwrap();
    eventually("server launch", || !launches(&server_exe).is_empty());
    eventually("client launch", || !launches(&client_exe).is_empty());
    assert!(bridge.step(forward()).is_ok());
    let _peer = peer.join().unwrap();

    let server = launches(&server_exe);
    assert_eq!(server.len(), 1);
    assert!(server[0].ends_with("+map surf_beginner"), "{}", server[0]);
    assert!(server[0].contains("-tickrate 66"), "{}", server[0]);

    let client = launches(&client_exe);
    assert_eq!(client.len(), 1, "{:?}", client);
    assert!(
        client[0].contains("+connect 127.0.0.1:9999 -w 128 -h 128"),
        "{}",
        client[0]
    );

    let pids: Vec<String> = [&server[0], &client[0]]
        .iter()
        .map(|line| line.split(' ').next().unwrap().to_string())
        .collect();
    bridge.close().unwrap();
    for pid in pids {
        eventually("game process to exit", || {
            !std::path::Path::new(&format!("/proc/{}", pid)).exists()
        });
    }
    let _ = std::fs::remove_dir_all(&root);
}
