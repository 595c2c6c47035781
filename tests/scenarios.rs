//! End-to-end scenarios S1-S7 from spec.md §8, driven entirely through the
//! public API (`iostream::open`/`close`/`check`, the registry, and the
//! in-memory sinks).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, OnceLock};

use iostream::buffered::crc32_ieee_update;
use iostream::protocol::{OpenFlags, Options, Protocol, ProtocolDescriptor, Whence};
use iostream::registry;
use iostream::{close, open, open2, Error, InterruptCallback};

// ---- S1: simple file round-trip ----

#[test]
fn s1_simple_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s1.bin");
    let url = format!("file://{}", path.display());

    let mut out = open(&url, OpenFlags::WRITE).unwrap();
    for b in [0x01u8, 0x02, 0x03, 0x04] {
        out.w8(b);
    }
    close(out).unwrap();

    let mut input = open(&url, OpenFlags::READ).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(input.read(&mut buf).unwrap(), 4);
    assert_eq!(buf, [0x01, 0x02, 0x03, 0x04]);
    assert_eq!(input.seek(0, Whence::Cur, false).unwrap(), 4);
    assert_eq!(input.r8(), 0);
    assert!(input.feof());
}

// ---- S2: typed endian round trip into an in-memory continuous buffer ----

#[test]
fn s2_typed_endian_into_dynamic_buffer() {
    let mut dyn_buf = iostream::DynamicBuffer::new();
    dyn_buf.stream().wl32(0x1122_3344);
    dyn_buf.stream().wb32(0x1122_3344);
    let bytes = dyn_buf.close().unwrap();

    assert_eq!(
        &bytes[..8],
        &[0x44, 0x33, 0x22, 0x11, 0x11, 0x22, 0x33, 0x44]
    );
}

// ---- S3: packetised dynamic buffer ----

#[test]
fn s3_packetised_dynamic_buffer() {
    let mut dyn_buf = iostream::PacketDynamicBuffer::new();
    dyn_buf.stream().write(&[0xAA, 0xBB, 0xCC]).unwrap();
    dyn_buf.stream().write(&[0xDD]).unwrap();
    let bytes = dyn_buf.close().unwrap();

    assert_eq!(
        bytes,
        vec![
            0x00, 0x00, 0x00, 0x03, 0xAA, 0xBB, 0xCC, 0x00, 0x00, 0x00, 0x01, 0xDD,
        ]
    );
}

// ---- S4: short-seek forward on a non-seekable source ----

/// Yields bytes `0..=255` repeatedly and refuses every seek, so the
/// buffered stream's only option for a forward seek is to read-and-discard.
struct RampProtocol {
    next: u8,
}

fn ramp_open(_filename: &str, _flags: OpenFlags, _options: &Options) -> iostream::Result<Box<dyn Protocol>> {
    Ok(Box::new(RampProtocol { next: 0 }))
}

impl Protocol for RampProtocol {
    fn read(&mut self, buf: &mut [u8]) -> iostream::Result<usize> {
        for b in buf.iter_mut() {
            *b = self.next;
            self.next = self.next.wrapping_add(1);
        }
        Ok(buf.len())
    }
}

fn register_ramp() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        registry::register(
            ProtocolDescriptor::new("ramp", ramp_open)
                .readable()
                .max_packet_size(16),
        );
    });
}

#[test]
fn s4_short_seek_forward_reads_and_discards() {
    register_ramp();

    let mut stream = open("ramp://source", OpenFlags::READ).unwrap();
    let mut buf = [0u8; 10];
    stream.read(&mut buf).unwrap();
    assert_eq!(buf, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

    stream.seek(10 + 100, Whence::Set, false).unwrap();

    let mut one = [0u8; 1];
    stream.read(&mut one).unwrap();
    assert_eq!(one[0], 110);
}

// ---- S5: embedded options ----

type SeenOptions = Arc<Mutex<Option<(String, u32, u32)>>>;

fn seen_udp_options() -> &'static SeenOptions {
    static SEEN: OnceLock<SeenOptions> = OnceLock::new();
    SEEN.get_or_init(|| Arc::new(Mutex::new(None)))
}

struct FakeUdpProtocol;

fn udp_open(filename: &str, _flags: OpenFlags, options: &Options) -> iostream::Result<Box<dyn Protocol>> {
    let ttl: u32 = options.get("ttl").and_then(|v| v.parse().ok()).unwrap_or(0);
    let pkt_size: u32 = options
        .get("pkt_size")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    *seen_udp_options().lock().unwrap() = Some((filename.to_string(), ttl, pkt_size));
    Ok(Box::new(FakeUdpProtocol))
}

impl Protocol for FakeUdpProtocol {
    fn read(&mut self, _buf: &mut [u8]) -> iostream::Result<usize> {
        Ok(0)
    }
}

fn register_fake_udp() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        registry::register(
            ProtocolDescriptor::new("udp", udp_open)
                .readable()
                .max_packet_size(65536),
        );
    });
}

#[test]
fn s5_embedded_options_are_parsed_and_excised() {
    register_fake_udp();

    let stream = open2(
        "udp,ttl=7,pkt_size=1316://host:1234",
        OpenFlags::READ,
        None,
        &Options::new(),
    )
    .unwrap();
    drop(stream);

    let seen = seen_udp_options().lock().unwrap().clone().unwrap();
    assert_eq!(seen.0, "udp,host:1234");
    assert_eq!(seen.1, 7);
    assert_eq!(seen.2, 1316);
}

// ---- S6: interrupt callback aborts a stalled read ----

struct AlwaysBlocksProtocol;

fn blocks_open(
    _filename: &str,
    _flags: OpenFlags,
    _options: &Options,
) -> iostream::Result<Box<dyn Protocol>> {
    Ok(Box::new(AlwaysBlocksProtocol))
}

impl Protocol for AlwaysBlocksProtocol {
    fn read(&mut self, _buf: &mut [u8]) -> iostream::Result<usize> {
        Err(Error::WouldBlock)
    }
}

fn register_always_blocks() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        registry::register(ProtocolDescriptor::new("blocks", blocks_open).readable());
    });
}

#[test]
fn s6_interrupt_callback_aborts_a_stalled_read() {
    register_always_blocks();

    let polls = Arc::new(AtomicUsize::new(0));
    let polls2 = polls.clone();
    let interrupt: InterruptCallback = Arc::new(move || {
        polls2.fetch_add(1, Ordering::SeqCst);
        polls2.load(Ordering::SeqCst) >= 3
    });

    let mut ctx = iostream::UrlContext::open2(
        "blocks://anywhere",
        OpenFlags::READ,
        Some(interrupt),
        &Options::new(),
    )
    .unwrap();

    let mut buf = [0u8; 4096];
    let err = ctx.read(&mut buf).unwrap_err();
    assert!(matches!(err, Error::Exit));
}

// ---- S7: rewind-with-probe-data ----

#[test]
fn s7_rewind_with_probe_data_restores_offset_zero() {
    use iostream::BufferedStream;

    // A demuxer probes the first 50 bytes directly, then hands the rest of
    // the source to a buffered stream that starts reading from offset 50.
    let full: Vec<u8> = (0..200u8).collect();
    let probe: Vec<u8> = full[..50].to_vec();
    let tail_source = full[50..].to_vec();

    let mut stream = BufferedStream::new(4096, false).with_read_packet({
        let mut pos = 0usize;
        move |buf| {
            let remaining = &tail_source[pos..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            pos += n;
            Ok(n)
        }
    });
    stream.set_initial_pos(50);

    let mut consumed = [0u8; 20];
    stream.read(&mut consumed).unwrap();
    assert_eq!(consumed, full[50..70]);

    stream.rewind_with_probe_data(&probe).unwrap();

    let mut all = vec![0u8; 200];
    let n = stream.read(&mut all).unwrap();
    assert!(n >= 70);
    assert_eq!(&all[..70], &full[..70]);
}

// A rolling-checksum regression check alongside the scenario suite: the
// window must match a plain CRC-32 over the same bytes.
#[test]
fn checksum_matches_plain_crc32_over_written_bytes() {
    let mut dyn_buf = iostream::DynamicBuffer::new();
    dyn_buf.stream().init_checksum(crc32_ieee_update, 0);
    dyn_buf.stream().write(b"the quick brown fox").unwrap();
    let checksum = dyn_buf.stream().get_checksum().unwrap();
    assert_eq!(checksum, crc32_ieee_update(0, b"the quick brown fox"));
}

#[test]
fn check_reports_capabilities_without_keeping_handle_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checked.bin");
    std::fs::write(&path, b"x").unwrap();
    let url = format!("file://{}", path.display());

    let caps = iostream::check(&url, OpenFlags::READ).unwrap();
    assert!(caps.contains(OpenFlags::READ));
}
