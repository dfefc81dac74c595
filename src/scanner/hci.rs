//! Raw HCI socket backend for Tilt scanning.
//!
//! This backend uses raw Linux HCI sockets to scan for BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.
//!
//! Tilts repeat the same advertisement every few seconds, so the controller
//! is told not to filter duplicates; the relay does its own debouncing.

use super::{FRAME_CHANNEL_BUFFER_SIZE, Frame, MANUFACTURER_DATA_TYPE, ScanError};
use crate::decoder::TILT_COMPANY_ID;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_NONBLOCK, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;
const EVT_LE_META_EVENT: u8 = 0x3E;
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

/// Scan interval and window, in 0.625 ms units (100 ms each: listen continuously).
const SCAN_INTERVAL: u16 = 0x00A0;
const SCAN_WINDOW: u16 = 0x00A0;

/// Largest HCI event: header plus 255 parameter bytes.
const MAX_EVENT_LEN: usize = 3 + 255;

/// Fixed part of one advertising report: event type, address type, address, data length.
const REPORT_HEADER_LEN: usize = 1 + 1 + 6 + 1;

/// `struct sockaddr_hci` from the kernel headers.
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// `struct hci_filter` from the kernel headers.
#[repr(C)]
#[derive(Default)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    /// Pass only LE meta events.
    fn le_meta_events() -> Self {
        let mut filter = Self::default();
        filter.type_mask |= 1 << u32::from(HCI_EVENT_PKT);
        let bit = usize::from(EVT_LE_META_EVENT);
        filter.event_mask[bit / 32] |= 1 << (bit % 32);
        filter
    }
}

/// Turn a libc return value into a `ScanError` naming the failed step.
fn check(ret: isize, what: &str) -> Result<usize, ScanError> {
    if ret < 0 {
        Err(ScanError::Bluetooth(format!(
            "{what}: {}",
            io::Error::last_os_error()
        )))
    } else {
        Ok(ret as usize)
    }
}

/// A raw HCI socket bound to one controller.
struct HciSocket {
    fd: OwnedFd,
}

impl HciSocket {
    /// Open a non-blocking raw socket on controller `dev_id` (0 for hci0).
    fn open(dev_id: u16) -> Result<Self, ScanError> {
        // SAFETY: plain socket(2) call; the descriptor is owned right after.
        let raw = unsafe {
            libc::socket(
                AF_BLUETOOTH,
                SOCK_RAW | SOCK_CLOEXEC | SOCK_NONBLOCK,
                BTPROTO_HCI,
            )
        };
        check(raw as isize, "failed to create HCI socket")?;
        // SAFETY: `raw` is a fresh, valid descriptor nobody else owns.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let addr = SockaddrHci {
            hci_family: AF_BLUETOOTH as u16,
            hci_dev: dev_id,
            hci_channel: HCI_CHANNEL_RAW,
        };
        // SAFETY: `addr` is a valid sockaddr_hci for the duration of the call.
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&addr as *const SockaddrHci).cast::<sockaddr>(),
                mem::size_of::<SockaddrHci>() as socklen_t,
            )
        };
        check(ret as isize, "failed to bind HCI socket")?;

        Ok(Self { fd })
    }

    fn set_filter(&self, filter: &HciFilter) -> Result<(), ScanError> {
        // SAFETY: `filter` is a valid hci_filter for the duration of the call.
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_HCI,
                HCI_FILTER,
                (filter as *const HciFilter).cast::<c_void>(),
                mem::size_of::<HciFilter>() as socklen_t,
            )
        };
        check(ret as isize, "failed to set HCI filter").map(|_| ())
    }

    fn send_command(&self, ogf: u16, ocf: u16, params: &[u8]) -> Result<(), ScanError> {
        let packet = command_packet(ogf, ocf, params);
        // SAFETY: `packet` outlives the call and its length is passed along.
        let ret = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                packet.as_ptr().cast::<c_void>(),
                packet.len(),
            )
        };
        check(ret, "failed to send HCI command").map(|_| ())
    }

    /// Start a passive LE scan that reports every advertisement.
    fn start_passive_scan(&self) -> Result<(), ScanError> {
        let [interval_lo, interval_hi] = SCAN_INTERVAL.to_le_bytes();
        let [window_lo, window_hi] = SCAN_WINDOW.to_le_bytes();
        let parameters = [
            0x00, // passive
            interval_lo,
            interval_hi,
            window_lo,
            window_hi,
            0x00, // public own address
            0x00, // accept all advertisers
        ];
        self.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &parameters)?;
        // enable, duplicates not filtered
        self.send_command(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00])
    }
}

/// Read one packet into `buf`.
fn read_packet(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
    let ret = unsafe { libc::read(fd, buf.as_mut_ptr().cast::<c_void>(), buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Whether a read error means the controller is gone rather than busy.
fn ends_scan(error: &io::Error) -> bool {
    !matches!(
        error.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Encode an HCI command packet.
fn command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Find the iBeacon manufacturer data among the AD structures of one report.
fn ibeacon_manufacturer_data(mut ad: &[u8]) -> Option<&[u8]> {
    while let [len, rest @ ..] = ad {
        let len = usize::from(*len);
        if len == 0 || rest.len() < len {
            return None;
        }
        let (structure, tail) = rest.split_at(len);
        if let [ad_type, payload @ ..] = structure
            && *ad_type == MANUFACTURER_DATA_TYPE
            && payload.len() >= 2
            && u16::from_le_bytes([payload[0], payload[1]]) == TILT_COMPANY_ID
        {
            return Some(payload);
        }
        ad = tail;
    }
    None
}

/// Extract every iBeacon frame from an LE advertising report event.
///
/// `event` is the raw packet as read from the socket, packet type first.
/// Frames keep their company id, exactly as they appear on air.
fn advertising_frames(event: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    let [HCI_EVENT_PKT, EVT_LE_META_EVENT, _, EVT_LE_ADVERTISING_REPORT, count, reports @ ..] =
        event
    else {
        return frames;
    };

    let mut reports = reports;
    for _ in 0..*count {
        let Some(&data_len) = reports.get(REPORT_HEADER_LEN - 1) else {
            break;
        };
        let start = REPORT_HEADER_LEN;
        let end = start + usize::from(data_len);
        // Each report ends with one RSSI byte.
        let Some(ad) = reports.get(start..end) else {
            break;
        };
        if let Some(payload) = ibeacon_manufacturer_data(ad) {
            frames.push(payload.to_vec());
        }
        reports = reports.get(end + 1..).unwrap_or_default();
    }
    frames
}

/// Start scanning for iBeacon advertisements using raw HCI sockets.
///
/// One socket listens for LE meta events, a second one sends the scan
/// commands. Frames are sent through the returned channel until the
/// receiver is dropped.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (hci0)
pub async fn start_scan() -> Result<mpsc::Receiver<Frame>, ScanError> {
    let events = HciSocket::open(0)?;
    events.set_filter(&HciFilter::le_meta_events())?;

    let commands = HciSocket::open(0)?;
    commands.start_passive_scan()?;

    let events = AsyncFd::new(events.fd)
        .map_err(|e| ScanError::Bluetooth(format!("failed to register HCI socket: {e}")))?;
    let (tx, rx) = mpsc::channel(FRAME_CHANNEL_BUFFER_SIZE);

    tokio::spawn(async move {
        let _commands = commands;
        let mut buf = [0u8; MAX_EVENT_LEN];

        'events: loop {
            let Ok(mut guard) = events.readable().await else {
                break;
            };

            loop {
                let n = match guard.try_io(|fd| read_packet(fd.as_raw_fd(), &mut buf)) {
                    Ok(Ok(0)) => {
                        warn!("HCI socket closed");
                        break 'events;
                    }
                    Ok(Ok(n)) => n,
                    Ok(Err(error)) if ends_scan(&error) => {
                        warn!(%error, "HCI read failed, stopping scan");
                        break 'events;
                    }
                    Ok(Err(error)) => {
                        debug!(%error, "HCI read interrupted");
                        continue;
                    }
                    Err(_would_block) => break,
                };

                for frame in advertising_frames(&buf[..n]) {
                    if tx.send(frame).await.is_err() {
                        break 'events;
                    }
                }
            }
        }
    });

    Ok(rx)
}
