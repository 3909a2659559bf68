//! USB DFU / DfuSe (ST extension) flasher.
//!
//! Generic over [`UsbTransport`] the same way [`super::usart`] is generic
//! over [`crate::traits::transport::SerialTransport`]: every wait point is
//! an explicit control transfer or `sleep`, no async/await.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{CoreError, CoreResult, DfuState as ReportedDfuState, DfuStatus};
use crate::firmware::FirmwareImage;
use crate::traits::transport::{ControlDirection, UsbTransport};

use super::lock::{FlashHolder, FlashLock};
use super::memory_layout::MemoryLayout;
use super::options::FlashOptions;
use super::progress::{FlashStage, ProgressEvent, ProgressSink};

const DFU_DETACH: u8 = 0;
const DFU_DNLOAD: u8 = 1;
const DFU_UPLOAD: u8 = 2;
const DFU_GETSTATUS: u8 = 3;
const DFU_CLRSTATUS: u8 = 4;
const DFU_GETSTATE: u8 = 5;
const DFU_ABORT: u8 = 6;

const DFUSE_CMD_SET_ADDRESS_POINTER: u8 = 0x21;
const DFUSE_CMD_ERASE: u8 = 0x41;
const DFUSE_CMD_READ_UNPROTECT: u8 = 0x92;

const POLL_TIMEOUT_CAP_MS: u64 = 5_000;
const MANIFEST_TIMEOUT_MS: u64 = 30_000;

/// `bState` values from `DFU_GETSTATUS`, translated from the raw byte.
fn decode_state(byte: u8) -> ReportedDfuState {
    match byte {
        0 => ReportedDfuState::AppIdle,
        1 => ReportedDfuState::AppDetach,
        2 => ReportedDfuState::DfuIdle,
        3 => ReportedDfuState::DfuDnloadSync,
        4 => ReportedDfuState::DfuDnBusy,
        5 => ReportedDfuState::DfuDnloadIdle,
        6 => ReportedDfuState::DfuManifestSync,
        7 => ReportedDfuState::DfuManifest,
        8 => ReportedDfuState::DfuManifestWaitReset,
        9 => ReportedDfuState::DfuUploadIdle,
        _ => ReportedDfuState::DfuError,
    }
}

fn decode_status(byte: u8) -> DfuStatus {
    match byte {
        0x00 => DfuStatus::Ok,
        0x01 => DfuStatus::ErrTarget,
        0x02 => DfuStatus::ErrFile,
        0x03 => DfuStatus::ErrWrite,
        0x04 => DfuStatus::ErrErase,
        0x05 => DfuStatus::ErrCheckErased,
        0x06 => DfuStatus::ErrProg,
        0x07 => DfuStatus::ErrVerify,
        0x08 => DfuStatus::ErrAddress,
        0x09 => DfuStatus::ErrNotDone,
        0x0A => DfuStatus::ErrFirmware,
        0x0B => DfuStatus::ErrVendor,
        0x0C => DfuStatus::ErrUsbr,
        0x0D => DfuStatus::ErrPor,
        0x0F => DfuStatus::ErrStalledPkt,
        _ => DfuStatus::ErrUnknown,
    }
}

struct Status {
    status: DfuStatus,
    poll_timeout_ms: u32,
    state: ReportedDfuState,
}

fn get_status(transport: &mut dyn UsbTransport) -> CoreResult<Status> {
    let mut buf = [0u8; 6];
    transport.control_transfer(ControlDirection::In, DFU_GETSTATUS, 0, &mut buf)?;
    let poll_timeout_ms = u32::from_le_bytes([buf[1], buf[2], buf[3], 0]);
    Ok(Status {
        status: decode_status(buf[0]),
        poll_timeout_ms: poll_timeout_ms.min(POLL_TIMEOUT_CAP_MS as u32),
        state: decode_state(buf[4]),
    })
}

fn clear_status(transport: &mut dyn UsbTransport) -> CoreResult<()> {
    transport.control_transfer(ControlDirection::Out, DFU_CLRSTATUS, 0, &mut [])?;
    Ok(())
}

fn abort(transport: &mut dyn UsbTransport) -> CoreResult<()> {
    transport.control_transfer(ControlDirection::Out, DFU_ABORT, 0, &mut [])?;
    Ok(())
}

/// Poll `GETSTATUS` until the device reaches `wanted`, honoring the poll
/// timeout the device itself reports. A reported error status recovers via
/// `CLRSTATUS` and surfaces as [`CoreError::Dfu`].
fn wait_for_state(
    transport: &mut dyn UsbTransport,
    wanted: ReportedDfuState,
    overall_timeout_ms: u64,
) -> CoreResult<Status> {
    let deadline = Instant::now() + Duration::from_millis(overall_timeout_ms);
    loop {
        let status = get_status(transport)?;
        if status.state == wanted {
            return Ok(status);
        }
        if status.state == ReportedDfuState::DfuError {
            let state = status.state;
            let err_status = status.status;
            clear_status(transport)?;
            return Err(CoreError::Dfu {
                state,
                status: err_status,
            });
        }
        if Instant::now() >= deadline {
            return Err(CoreError::timeout(
                format!("DFU state {wanted:?}"),
                Duration::from_millis(overall_timeout_ms),
            ));
        }
        std::thread::sleep(Duration::from_millis(status.poll_timeout_ms.max(1) as u64));
    }
}

fn set_address_pointer(transport: &mut dyn UsbTransport, address: u32) -> CoreResult<()> {
    let mut payload = vec![DFUSE_CMD_SET_ADDRESS_POINTER];
    payload.extend_from_slice(&address.to_le_bytes());
    transport.control_transfer(ControlDirection::Out, DFU_DNLOAD, 0, &mut payload)?;
    wait_for_state(transport, ReportedDfuState::DfuDnloadIdle, POLL_TIMEOUT_CAP_MS)?;
    Ok(())
}

fn erase_page(transport: &mut dyn UsbTransport, address: u32) -> CoreResult<()> {
    let mut payload = vec![DFUSE_CMD_ERASE];
    payload.extend_from_slice(&address.to_le_bytes());
    transport.control_transfer(ControlDirection::Out, DFU_DNLOAD, 0, &mut payload)?;
    wait_for_state(transport, ReportedDfuState::DfuDnloadIdle, POLL_TIMEOUT_CAP_MS)?;
    Ok(())
}

/// Mass erase: the `ERASE` command with no trailing address.
fn mass_erase(transport: &mut dyn UsbTransport) -> CoreResult<()> {
    transport.control_transfer(ControlDirection::Out, DFU_DNLOAD, 0, &mut [DFUSE_CMD_ERASE])?;
    wait_for_state(transport, ReportedDfuState::DfuDnloadIdle, MANIFEST_TIMEOUT_MS)?;
    Ok(())
}

fn read_unprotect(transport: &mut dyn UsbTransport) -> CoreResult<()> {
    transport.control_transfer(
        ControlDirection::Out,
        DFU_DNLOAD,
        0,
        &mut [DFUSE_CMD_READ_UNPROTECT],
    )?;
    // Read unprotect triggers a mass erase and device reset; the device
    // will not answer GETSTATUS afterwards.
    transport.reset().ok();
    Ok(())
}

/// Plan which pages must be erased for `image`, from the interface string
/// if parseable, falling back to a single mass erase when it isn't or when
/// `options.force_full_erase` asks for one regardless.
fn plan_erase(transport: &dyn UsbTransport, image: &FirmwareImage, options: &FlashOptions) -> Option<Vec<u32>> {
    if options.force_full_erase {
        return None;
    }
    let interface_string = transport.interface_string().ok()?;
    let layout = MemoryLayout::parse(&interface_string).ok()?;
    let mut pages = Vec::new();
    for segment in &image.segments {
        for page in layout.erase_plan(segment.address, segment.data.len() as u32) {
            if !pages.contains(&page) {
                pages.push(page);
            }
        }
    }
    Some(pages)
}

/// Write one block (`wValue >= 2`) of up to `transfer_size` bytes at the
/// address pointer previously set by [`set_address_pointer`].
fn download_block(transport: &mut dyn UsbTransport, block_number: u16, data: &[u8]) -> CoreResult<()> {
    let mut payload = data.to_vec();
    transport.control_transfer(ControlDirection::Out, DFU_DNLOAD, block_number, &mut payload)?;
    wait_for_state(transport, ReportedDfuState::DfuDnloadIdle, POLL_TIMEOUT_CAP_MS)?;
    Ok(())
}

/// Read back `len` bytes starting at the current address pointer, used for
/// `FlashOptions::verify`.
fn upload_block(transport: &mut dyn UsbTransport, block_number: u16, len: usize) -> CoreResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let n = transport.control_transfer(ControlDirection::In, DFU_UPLOAD, block_number, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

/// Complete the manifestation phase: a zero-length `DNLOAD` signals "no
/// more data", then `GETSTATUS` drives the device through manifest and
/// (for manifestation-tolerant devices) back to `dfuIDLE`.
fn manifest(transport: &mut dyn UsbTransport) -> CoreResult<()> {
    transport.control_transfer(ControlDirection::Out, DFU_DNLOAD, 0, &mut [])?;
    let status = wait_for_state(transport, ReportedDfuState::DfuManifest, MANIFEST_TIMEOUT_MS);
    match status {
        Ok(_) | Err(CoreError::Timeout { .. }) => {}
        Err(e) => return Err(e),
    }
    // Some devices reset on their own once manifest completes rather than
    // reporting dfuIDLE again; either outcome is a successful manifest.
    Ok(())
}

/// Run the full DFU/DfuSe flash sequence. `cancel` is polled between
/// erase pages and between write chunks; on a cancelled run the driver
/// attempts `dfuAbort` before returning [`CoreError::Aborted`], since the
/// device may still be mid-download.
pub fn flash(
    transport: &mut dyn UsbTransport,
    image: &FirmwareImage,
    options: &FlashOptions,
    lock: &FlashLock,
    cancel: &AtomicBool,
    mut progress: impl ProgressSink,
) -> CoreResult<()> {
    let _guard = lock.acquire_guard(FlashHolder::Dfu).ok_or(CoreError::LockBusy)?;

    progress.emit(ProgressEvent::new(FlashStage::Preparing, 0, "preparing DFU flash"));

    // Clear any error state left by a previous failed attempt.
    if let Ok(status) = get_status(transport) {
        if status.state == ReportedDfuState::DfuError {
            clear_status(transport)?;
        }
    }
    abort(transport).ok();

    macro_rules! bail_if_cancelled {
        () => {
            if cancel.load(Ordering::Acquire) {
                abort(transport).ok();
                return Err(CoreError::Aborted);
            }
        };
    }

    progress.emit(ProgressEvent::new(FlashStage::Erasing, 0, "erasing"));
    match plan_erase(transport, image, options) {
        Some(pages) if !pages.is_empty() => {
            let total = pages.len();
            for (i, page) in pages.iter().enumerate() {
                bail_if_cancelled!();
                set_address_pointer(transport, *page)?;
                erase_page(transport, *page)?;
                let pct = ((i + 1) * 100 / total.max(1)) as u8;
                progress.emit(ProgressEvent::new(FlashStage::Erasing, pct, format!("erased page 0x{page:08X}")));
            }
        }
        _ => {
            mass_erase(transport)?;
            progress.emit(ProgressEvent::new(FlashStage::Erasing, 100, "mass erase complete"));
        }
    }

    let transfer_size = transport.transfer_size().max(1) as usize;
    let total_bytes = image.total_size;
    let mut written: u64 = 0;

    for segment in &image.segments {
        set_address_pointer(transport, segment.address)?;
        for (i, chunk) in segment.data.chunks(transfer_size).enumerate() {
            bail_if_cancelled!();
            // Per the DfuSe spec, block numbers 0 and 1 are reserved for
            // commands; data blocks start at 2.
            download_block(transport, (i + 2) as u16, chunk)?;
            written += chunk.len() as u64;
            let pct = if total_bytes == 0 {
                100
            } else {
                ((written * 100) / total_bytes).min(100) as u8
            };
            progress.emit(
                ProgressEvent::new(FlashStage::Flashing, pct, format!("wrote segment at 0x{:08X}", segment.address))
                    .with_bytes(written, total_bytes),
            );
        }

        if options.verify {
            set_address_pointer(transport, segment.address)?;
            for (i, chunk) in segment.data.chunks(transfer_size).enumerate() {
                let readback = upload_block(transport, (i + 2) as u16, chunk.len())?;
                if readback != chunk {
                    return Err(CoreError::VerifyFailed {
                        offset: segment.address + (i * transfer_size) as u32,
                    });
                }
            }
            progress.emit(ProgressEvent::new(FlashStage::Verifying, 100, "verified"));
        }
    }

    progress.emit(ProgressEvent::new(FlashStage::Rebooting, 0, "leaving DFU mode"));
    if options.leave_in_dfu_mode {
        progress.emit(ProgressEvent::new(FlashStage::Complete, 100, "left in DFU mode"));
        return Ok(());
    }
    manifest(transport)?;
    progress.emit(ProgressEvent::new(FlashStage::Complete, 100, "flash complete"));
    Ok(())
}
