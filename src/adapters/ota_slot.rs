//! Inactive firmware slot adapter.
//!
//! Implements [`FirmwareSlot`] over the ESP-IDF OTA partition API.
//!
//! - **`target_os = "espidf"`**: `esp_ota_begin` / `esp_ota_write_with_offset`
//!   on the next update partition, `esp_partition_read` for verification and
//!   `esp_ota::mark_app_valid()` to confirm a new image.
//! - **`not(target_os = "espidf")`**: an in-memory partition that keeps its
//!   contents across simulated reboots, so resume can be exercised on the host.
//!
//! A fresh (non-resume) `begin` erases the whole image region up front.  A
//! resumed session therefore only programs bytes that are still erased or
//! rewrites bytes with identical data, and needs no erase of its own.

use log::{info, warn};

use crate::app::ports::{FirmwareSlot, SlotError};

#[cfg(target_os = "espidf")]
use esp_idf_sys::{self as sys, esp};

/// `OTA_WITH_SEQUENTIAL_WRITES`: open the partition without erasing it.
#[cfg(target_os = "espidf")]
const OTA_NO_ERASE: usize = 0xffff_fffe;

pub struct EspOtaSlot {
    image_size: u32,
    active: bool,
    #[cfg(target_os = "espidf")]
    partition: *const sys::esp_partition_t,
    #[cfg(target_os = "espidf")]
    handle: sys::esp_ota_handle_t,
    #[cfg(not(target_os = "espidf"))]
    sim: SimPartition,
}

/// Host stand-in for flash and the bootloader's view of it.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
struct SimPartition {
    data: Vec<u8>,
    boot_switched: bool,
    pending_verify: bool,
    rolled_back: bool,
    aborts: u32,
}

// SAFETY: the partition pointer refers to the static partition table.
#[cfg(target_os = "espidf")]
unsafe impl Send for EspOtaSlot {}

impl Default for EspOtaSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl EspOtaSlot {
    pub fn new() -> Self {
        Self {
            image_size: 0,
            active: false,
            #[cfg(target_os = "espidf")]
            partition: core::ptr::null(),
            #[cfg(target_os = "espidf")]
            handle: 0,
            #[cfg(not(target_os = "espidf"))]
            sim: SimPartition::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn check_range(&self, offset: u32, len: usize) -> Result<(), SlotError> {
        if !self.active {
            return Err(SlotError::WriteFailed);
        }
        let end = u64::from(offset) + len as u64;
        if end > u64::from(self.image_size) {
            return Err(SlotError::OutOfRange);
        }
        Ok(())
    }
}

// ── Simulation helpers ────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl EspOtaSlot {
    /// Bytes currently staged in the inactive slot.
    pub fn staged(&self) -> &[u8] {
        &self.sim.data
    }

    /// The bootloader was told to boot the staged image.
    pub fn boot_switched(&self) -> bool {
        self.sim.boot_switched
    }

    /// The running image was rejected and the previous one restored.
    pub fn rolled_back(&self) -> bool {
        self.sim.rolled_back
    }

    pub fn aborts(&self) -> u32 {
        self.sim.aborts
    }

    /// Simulate booting a freshly applied image that awaits confirmation.
    pub fn set_pending_verify(&mut self, pending: bool) {
        self.sim.pending_verify = pending;
    }

    /// Simulate a reboot: the open session is lost, flash contents stay.
    pub fn reboot(&mut self) {
        self.active = false;
    }
}

// ── FirmwareSlot: device ──────────────────────────────────────

#[cfg(target_os = "espidf")]
impl FirmwareSlot for EspOtaSlot {
    fn begin(&mut self, image_size: u32, resume: bool) -> Result<(), SlotError> {
        if self.active {
            self.abort();
        }
        let partition = unsafe { sys::esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            return Err(SlotError::NoPartition);
        }
        if image_size > unsafe { (*partition).size } {
            return Err(SlotError::OutOfRange);
        }
        let size = if resume { OTA_NO_ERASE } else { image_size as usize };
        let mut handle: sys::esp_ota_handle_t = 0;
        esp!(unsafe { sys::esp_ota_begin(partition, size, &mut handle) }).map_err(|e| {
            warn!("OtaSlot: esp_ota_begin failed: {}", e);
            SlotError::WriteFailed
        })?;
        self.partition = partition;
        self.handle = handle;
        self.image_size = image_size;
        self.active = true;
        info!("OtaSlot: session open ({} B, resume={})", image_size, resume);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), SlotError> {
        self.check_range(offset, data.len())?;
        esp!(unsafe {
            sys::esp_ota_write_with_offset(self.handle, data.as_ptr().cast(), data.len(), offset)
        })
        .map_err(|e| {
            warn!("OtaSlot: write at {} failed: {}", offset, e);
            SlotError::WriteFailed
        })
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<usize, SlotError> {
        if self.partition.is_null() {
            return Err(SlotError::NoPartition);
        }
        let len = buf.len().min(self.image_size.saturating_sub(offset) as usize);
        esp!(unsafe {
            sys::esp_partition_read(self.partition, offset as usize, buf.as_mut_ptr().cast(), len)
        })
        .map_err(|_| SlotError::ReadFailed)?;
        Ok(len)
    }

    fn set_boot(&mut self) -> Result<(), SlotError> {
        if !self.active {
            return Err(SlotError::BootSetFailed);
        }
        self.active = false;
        esp!(unsafe { sys::esp_ota_end(self.handle) }).map_err(|e| {
            warn!("OtaSlot: image rejected by esp_ota_end: {}", e);
            SlotError::BootSetFailed
        })?;
        esp!(unsafe { sys::esp_ota_set_boot_partition(self.partition) })
            .map_err(|_| SlotError::BootSetFailed)?;
        info!("OtaSlot: next boot from the updated slot");
        Ok(())
    }

    fn abort(&mut self) {
        if self.active {
            self.active = false;
            if let Err(e) = esp!(unsafe { sys::esp_ota_abort(self.handle) }) {
                warn!("OtaSlot: abort failed: {}", e);
            }
        }
    }

    fn is_pending_verify(&self) -> bool {
        let mut state: sys::esp_ota_img_states_t = 0;
        let running = unsafe { sys::esp_ota_get_running_partition() };
        esp!(unsafe { sys::esp_ota_get_state_partition(running, &mut state) }).is_ok()
            && state == sys::esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY
    }

    fn mark_valid(&mut self) -> Result<(), SlotError> {
        esp_ota::mark_app_valid();
        info!("OtaSlot: running image marked valid");
        Ok(())
    }

    fn mark_invalid(&mut self) -> Result<(), SlotError> {
        warn!("OtaSlot: running image rejected, rolling back");
        esp!(unsafe { sys::esp_ota_mark_app_invalid_rollback_and_reboot() })
            .map_err(|_| SlotError::BootSetFailed)
    }
}

// ── FirmwareSlot: host simulation ─────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl FirmwareSlot for EspOtaSlot {
    fn begin(&mut self, image_size: u32, resume: bool) -> Result<(), SlotError> {
        if image_size as usize > crate::ota::manifest::MAX_FIRMWARE_SIZE as usize {
            return Err(SlotError::OutOfRange);
        }
        if !resume || self.sim.data.len() != image_size as usize {
            self.sim.data = vec![0xFF; image_size as usize];
        }
        self.image_size = image_size;
        self.active = true;
        self.sim.boot_switched = false;
        info!("OtaSlot(sim): session open ({} B, resume={})", image_size, resume);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), SlotError> {
        self.check_range(offset, data.len())?;
        let start = offset as usize;
        self.sim.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<usize, SlotError> {
        let start = (offset as usize).min(self.sim.data.len());
        let len = buf.len().min(self.sim.data.len() - start);
        buf[..len].copy_from_slice(&self.sim.data[start..start + len]);
        Ok(len)
    }

    fn set_boot(&mut self) -> Result<(), SlotError> {
        if !self.active {
            return Err(SlotError::BootSetFailed);
        }
        self.active = false;
        self.sim.boot_switched = true;
        Ok(())
    }

    fn abort(&mut self) {
        if self.active {
            self.active = false;
            self.sim.aborts += 1;
        }
    }

    fn is_pending_verify(&self) -> bool {
        self.sim.pending_verify
    }

    fn mark_valid(&mut self) -> Result<(), SlotError> {
        self.sim.pending_verify = false;
        Ok(())
    }

    fn mark_invalid(&mut self) -> Result<(), SlotError> {
        self.sim.pending_verify = false;
        self.sim.rolled_back = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_bounded_by_the_session() {
        let mut slot = EspOtaSlot::new();
        assert_eq!(slot.write(0, &[1]), Err(SlotError::WriteFailed));
        slot.begin(8, false).unwrap();
        slot.write(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(slot.write(6, &[0; 4]), Err(SlotError::OutOfRange));
        let mut buf = [0u8; 16];
        assert_eq!(slot.read(2, &mut buf), Ok(6));
        assert_eq!(&buf[..6], &[0xFF, 0xFF, 1, 2, 3, 4]);
    }

    #[test]
    fn resume_keeps_staged_bytes() {
        let mut slot = EspOtaSlot::new();
        slot.begin(4, false).unwrap();
        slot.write(0, &[0xE9, 7]).unwrap();
        slot.reboot();
        slot.begin(4, true).unwrap();
        assert_eq!(slot.staged(), &[0xE9, 7, 0xFF, 0xFF]);
        slot.begin(4, false).unwrap();
        assert_eq!(slot.staged(), &[0xFF; 4]);
    }

    #[test]
    fn boot_switch_and_rollback() {
        let mut slot = EspOtaSlot::new();
        assert_eq!(slot.set_boot(), Err(SlotError::BootSetFailed));
        slot.begin(1, false).unwrap();
        slot.set_boot().unwrap();
        assert!(slot.boot_switched());

        slot.set_pending_verify(true);
        assert!(slot.is_pending_verify());
        slot.mark_invalid().unwrap();
        assert!(slot.rolled_back() && !slot.is_pending_verify());
    }
}
