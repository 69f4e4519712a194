use std::net::SocketAddr;
use std::sync::Arc;

use heapscope_runtime::{fixtures, Heap, ObjectRef};
use heapscope_server::protocol::{self, handshake_reply, read_frame, read_magic, write_magic};
use heapscope_server::{ProbeClient, ProbeServer, ProtocolError, MAGIC};
use heapscope_sweep::{ExclusionSet, OpenMode, PathId, Probe, StaticSeeds};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

struct Running {
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn spawn_server(heap: &Arc<Heap>, seeds: Vec<ObjectRef>) -> Running {
    let probe = Probe::new(Arc::clone(heap), StaticSeeds(seeds))
        .with_exclusions(ExclusionSet::parse(["^_", "Internal$"]).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server = ProbeServer::from_listener(listener, Arc::new(probe));
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_token();
    tokio::spawn(server.run());
    Running { addr, shutdown }
}

fn id(raw: u32) -> PathId {
    PathId::new(raw).unwrap()
}

#[tokio::test]
async fn handshake_then_summary() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let server = spawn_server(&heap, vec![cycle.a]).await;

    let client = ProbeClient::connect(server.addr).await.unwrap();
    let summary = client.summary();
    assert!(summary.contains("<h3>1 roots</h3>"), "{summary}");
    assert!(summary.contains("<a href=\"#node-1\" data-path=\"1\">"), "{summary}");
}

#[tokio::test]
async fn cycle_is_browsable_over_the_wire() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let server = spawn_server(&heap, vec![cycle.a]).await;
    let mut client = ProbeClient::connect(server.addr).await.unwrap();

    let a = client.open(id(1), OpenMode::Open).await.unwrap();
    assert!(a.contains("data-path=\"2\""), "{a}");
    assert!(a.contains(">42<"), "{a}");

    let b = client.open(id(2), OpenMode::Open).await.unwrap();
    assert!(
        b.contains("<a class=\"backref\" href=\"#node-1\" data-path=\"1\">"),
        "{b}"
    );
}

#[tokio::test]
async fn search_skips_excluded_roots() {
    let heap = Heap::new();
    let widgets = fixtures::widgets(&heap).unwrap();
    let server = spawn_server(&heap, vec![widgets.view, widgets.internal]).await;
    let mut client = ProbeClient::connect(server.addr).await.unwrap();

    let found = client.search("Widget").await.unwrap();
    assert_eq!(found.matches("<li>").count(), 1, "{found}");
    assert!(found.contains("WidgetView"));
    assert!(!found.contains("WidgetInternal"));
}

#[tokio::test]
async fn protocol_errors_keep_the_connection_open() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let server = spawn_server(&heap, vec![cycle.a]).await;
    let mut client = ProbeClient::connect(server.addr).await.unwrap();

    let unknown = client.open(id(404), OpenMode::Open).await.unwrap();
    assert_eq!(
        unknown,
        "<div class=\"fragment error\"><p class=\"error\">unknown path id #404</p></div>\n"
    );
    let garbage = client.request("FROBNICATE now").await.unwrap();
    assert!(garbage.contains("unknown command &quot;FROBNICATE&quot;"), "{garbage}");
    let partial = client.request("write 1 score").await.unwrap();
    assert!(partial.contains("WRITE requires a literal"), "{partial}");

    let still_alive = client.open(id(1), OpenMode::Path).await.unwrap();
    assert!(still_alive.contains(">seeds[0]<"), "{still_alive}");
}

async fn handshaken(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let magic = read_magic(&mut stream).await.unwrap();
    write_magic(&mut stream, handshake_reply(magic)).await.unwrap();
    let _summary = read_frame(&mut stream).await.unwrap();
    stream
}

#[tokio::test]
async fn invalid_utf8_gets_an_error_fragment() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let server = spawn_server(&heap, vec![cycle.a]).await;
    let mut stream = handshaken(server.addr).await;

    stream.write_all(b"SEARCH \xff\xfe\n").await.unwrap();
    let reply = read_frame(&mut stream).await.unwrap();
    assert_eq!(
        reply,
        "<div class=\"fragment error\"><p class=\"error\">command is not valid UTF-8</p></div>\n"
    );

    stream.write_all(b"OPEN 1 path\n").await.unwrap();
    let reply = read_frame(&mut stream).await.unwrap();
    assert!(reply.contains(">seeds[0]<"), "{reply}");
}

#[tokio::test]
async fn over_long_lines_are_skipped() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let server = spawn_server(&heap, vec![cycle.a]).await;
    let mut stream = handshaken(server.addr).await;

    let mut long = b"SEARCH ".to_vec();
    long.extend(std::iter::repeat(b'x').take(200 * 1024));
    long.extend_from_slice(b"\nOPEN 1 path\n");
    stream.write_all(&long).await.unwrap();

    let reply = read_frame(&mut stream).await.unwrap();
    assert!(reply.contains("command exceeds 65536 bytes"), "{reply}");
    let reply = read_frame(&mut stream).await.unwrap();
    assert!(reply.contains(">seeds[0]<"), "{reply}");
}

#[tokio::test]
async fn write_round_trips_and_invalid_targets_render_sentinel() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    heap.register_class(
        heapscope_runtime::ClassBuilder::new("Watcher").weak_field("target", "@\"B\""),
    )
    .unwrap();
    let watcher = heap.alloc_named("Watcher").unwrap();
    heap.set_ref_field(watcher, "target", Some(cycle.b)).unwrap();
    let server = spawn_server(&heap, vec![cycle.a, watcher]).await;
    let mut client = ProbeClient::connect(server.addr).await.unwrap();

    let written = client.write(id(1), "score", "100").await.unwrap();
    assert!(written.contains(">100<"), "{written}");

    // Watcher is root #2; its weak target is the node for B.
    let watcher_view = client.open(id(2), OpenMode::Open).await.unwrap();
    assert!(watcher_view.contains("(weak)"), "{watcher_view}");
    heap.dealloc(cycle.b).unwrap();

    let invalid = client.write(id(3), "ratio", "2.5").await.unwrap();
    assert!(invalid.contains("#INVALID"), "{invalid}");
    let reopened = client.open(id(2), OpenMode::Open).await.unwrap();
    assert!(
        reopened.contains("<a class=\"sentinel\" href=\"#node-3\" data-path=\"3\">#INVALID</a>"),
        "{reopened}"
    );
}

#[tokio::test]
async fn wrong_handshake_closes_the_connection() {
    let heap = Heap::new();
    let server = spawn_server(&heap, Vec::new()).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let magic = read_magic(&mut stream).await.unwrap();
    assert_eq!(magic, MAGIC);
    write_magic(&mut stream, magic).await.unwrap();
    assert!(matches!(
        read_frame(&mut stream).await,
        Err(ProtocolError::Closed | ProtocolError::Io(_))
    ));
}

#[tokio::test]
async fn sessions_are_independent() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let server = spawn_server(&heap, vec![cycle.a]).await;

    let mut first = ProbeClient::connect(server.addr).await.unwrap();
    let mut second = ProbeClient::connect(server.addr).await.unwrap();
    first.open(id(1), OpenMode::Open).await.unwrap();

    let missing = second.open(id(2), OpenMode::Open).await.unwrap();
    assert!(missing.contains("unknown path id #2"), "{missing}");
    let present = first.open(id(2), OpenMode::Open).await.unwrap();
    assert!(!present.contains("fragment error"), "{present}");
}

#[tokio::test]
async fn blank_lines_are_ignored() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let server = spawn_server(&heap, vec![cycle.a]).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let magic = read_magic(&mut stream).await.unwrap();
    write_magic(&mut stream, handshake_reply(magic)).await.unwrap();
    let _summary = read_frame(&mut stream).await.unwrap();

    stream.write_all(b"\n\r\nopen 1 path\n").await.unwrap();
    let reply = protocol::read_frame(&mut stream).await.unwrap();
    assert!(reply.contains(">seeds[0]<"), "{reply}");
}
