//! End-to-end exercise of both flash drivers against in-memory mock
//! transports, covering the sync -> erase -> write -> reboot sequencing
//! that no single unit test inside either driver module spans.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;

use flightcore_lib::error::CoreResult;
use flightcore_lib::firmware::{FirmwareImage, Segment};
use flightcore_lib::flash::lock::FlashLock;
use flightcore_lib::flash::options::FlashOptions;
use flightcore_lib::flash::progress::{FlashStage, ProgressEvent};
use flightcore_lib::flash::{dfu_usb, usart};
use flightcore_lib::traits::transport::{ControlDirection, SerialTransport, UsbTransport};

/// Scripted USART bootloader: answers ACK to every command in sequence,
/// mirroring a freshly reset STM32 that syncs on the first attempt.
#[derive(Default)]
struct ScriptedBootloader {
    to_send: VecDeque<u8>,
    written: Vec<u8>,
    baud: u32,
}

impl ScriptedBootloader {
    fn queue(&mut self, bytes: &[u8]) {
        self.to_send.extend(bytes.iter().copied());
    }
}

impl SerialTransport for ScriptedBootloader {
    fn write(&mut self, data: &[u8]) -> CoreResult<()> {
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8], _timeout_ms: u64) -> CoreResult<usize> {
        let mut n = 0;
        while n < buffer.len() {
            match self.to_send.pop_front() {
                Some(b) => {
                    buffer[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> CoreResult<()> {
        self.to_send.clear();
        Ok(())
    }

    fn set_dtr(&mut self, _level: bool) -> CoreResult<()> {
        Ok(())
    }

    fn set_rts(&mut self, _level: bool) -> CoreResult<()> {
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> CoreResult<()> {
        self.baud = baud;
        Ok(())
    }
}

const ACK: u8 = 0x79;

#[test]
fn usart_flash_runs_sync_through_reboot_against_a_scripted_bootloader() {
    let mut mock = ScriptedBootloader::default();
    mock.queue(&[ACK]); // GET shortcut ack, locks in sync
                        // get_id: ACK, length=1, version byte, pid hi/lo, ACK
    mock.queue(&[ACK, 0x01, 0x31, 0x04, 0x49, ACK]);
    mock.queue(&[ACK, ACK]); // erase: command ack, mass-erase param ack
                             // write_image: one 16-byte chunk -> cmd ack, address ack, data ack
    mock.queue(&[ACK, ACK, ACK]);
    mock.queue(&[ACK, ACK]); // go: command ack, address ack

    let image = FirmwareImage::new(vec![Segment::new(0x0800_0000, vec![0xAB; 16])]).unwrap();
    let options = FlashOptions {
        no_reboot_sequence: true,
        ..FlashOptions::default()
    };
    let lock = FlashLock::new();
    let cancel = AtomicBool::new(false);
    let mut events: Vec<ProgressEvent> = Vec::new();

    usart::flash(&mut mock, &image, &options, &lock, &cancel, |e| events.push(e)).unwrap();

    assert!(events.iter().any(|e| e.state == FlashStage::Complete));
    assert!(!lock.is_held());
    assert_eq!(mock.baud, usart::BAUD_LADDER[0]);
}

/// Scripted DFU device: every `GETSTATUS` reports `dfuDNLOAD-IDLE` until a
/// manifest reply is queued, enough to drive erase/download/manifest
/// without real hardware.
struct ScriptedDfuDevice {
    status_replies: VecDeque<[u8; 6]>,
    transfers: Vec<(ControlDirection, u8, u16, Vec<u8>)>,
    interface_string: Option<String>,
}

impl ScriptedDfuDevice {
    fn new() -> Self {
        Self {
            status_replies: VecDeque::new(),
            transfers: Vec::new(),
            interface_string: None,
        }
    }

    fn queue_idle(&mut self) {
        self.status_replies.push_back([0, 0, 0, 0, 5, 0]);
    }

    fn queue_manifest(&mut self) {
        self.status_replies.push_back([0, 0, 0, 0, 7, 0]);
    }
}

impl UsbTransport for ScriptedDfuDevice {
    fn control_transfer(
        &mut self,
        direction: ControlDirection,
        request: u8,
        value: u16,
        data: &mut [u8],
    ) -> CoreResult<usize> {
        const DFU_GETSTATUS: u8 = 3;
        if request == DFU_GETSTATUS {
            let reply = self.status_replies.pop_front().unwrap_or([0, 0, 0, 0, 5, 0]);
            data.copy_from_slice(&reply);
            return Ok(6);
        }
        self.transfers.push((direction, request, value, data.to_vec()));
        Ok(data.len())
    }

    fn transfer_size(&self) -> u16 {
        2048
    }

    fn interface_string(&self) -> CoreResult<String> {
        self.interface_string
            .clone()
            .ok_or_else(|| flightcore_lib::error::CoreError::Usb("no interface string".to_string()))
    }

    fn reset(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

#[test]
fn dfu_flash_runs_erase_through_manifest_against_a_scripted_device() {
    let mut mock = ScriptedDfuDevice::new();
    mock.interface_string = Some("@Internal Flash /0x08000000/04*016Kg".to_string());
    // Initial error-state check, set_address_pointer + erase_page for the
    // single erased page, set_address_pointer + download_block for the
    // single data chunk: five dfuDNLOAD-IDLE polls, then manifest.
    for _ in 0..5 {
        mock.queue_idle();
    }
    mock.queue_manifest();

    let image = FirmwareImage::new(vec![Segment::new(0x0800_0000, vec![0xAB; 16])]).unwrap();
    let options = FlashOptions {
        verify: false,
        ..FlashOptions::default()
    };
    let lock = FlashLock::new();
    let cancel = AtomicBool::new(false);
    let mut events: Vec<ProgressEvent> = Vec::new();

    dfu_usb::flash(&mut mock, &image, &options, &lock, &cancel, |e| events.push(e)).unwrap();

    assert!(events.iter().any(|e| e.state == FlashStage::Complete));
    assert!(!lock.is_held());
}

#[test]
fn the_two_flashers_cannot_hold_the_lock_at_the_same_time() {
    let lock = FlashLock::new();
    let usart_guard = lock
        .acquire_guard(flightcore_lib::flash::lock::FlashHolder::Serial)
        .unwrap();
    assert!(lock
        .acquire_guard(flightcore_lib::flash::lock::FlashHolder::Dfu)
        .is_none());
    drop(usart_guard);
    assert!(lock
        .acquire_guard(flightcore_lib::flash::lock::FlashHolder::Dfu)
        .is_some());
}
