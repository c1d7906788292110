//! virtio-mmio v2 block device: one virtqueue, no feature negotiation beyond
//! what a minimal block driver needs to see a working device.
use crate::devices::dram::Dram;
use crate::exception::Exception;
use crate::primitives::constants::VIRTIO_BASE;

/// IRQ line the device raises through the PLIC.
pub const VIRTIO_IRQ: u64 = 1;

const MAGIC_VALUE: u64 = 0x000;
const VERSION: u64 = 0x004;
const DEVICE_ID: u64 = 0x008;
const VENDOR_ID: u64 = 0x00c;
const DEVICE_FEATURES: u64 = 0x010;
const DRIVER_FEATURES: u64 = 0x020;
const GUEST_PAGE_SIZE: u64 = 0x028;
const QUEUE_SEL: u64 = 0x030;
const QUEUE_NUM_MAX: u64 = 0x034;
const QUEUE_NUM: u64 = 0x038;
const QUEUE_PFN: u64 = 0x040;
const QUEUE_READY: u64 = 0x044;
const QUEUE_NOTIFY: u64 = 0x050;
const INTERRUPT_STATUS: u64 = 0x060;
const INTERRUPT_ACK: u64 = 0x064;
const STATUS: u64 = 0x070;
const QUEUE_DESC_LOW: u64 = 0x080;
const QUEUE_DESC_HIGH: u64 = 0x084;
const QUEUE_DRIVER_LOW: u64 = 0x090;
const QUEUE_DRIVER_HIGH: u64 = 0x094;
const QUEUE_DEVICE_LOW: u64 = 0x0a0;
const QUEUE_DEVICE_HIGH: u64 = 0x0a4;

const MAGIC: u64 = 0x7472_6976;
const VENDOR: u64 = 0x554d_4551;
const BLOCK_DEVICE_ID: u64 = 2;
const QUEUE_SIZE: u64 = 8;

/// Bit set in a descriptor's flags when the device (not the driver) writes
/// the referenced buffer; clear when the driver supplies the data.
const VIRTQ_DESC_F_WRITE: u16 = 1 << 1;

/// Backing store size for the raw disk image.
pub const DISK_SIZE: usize = 4 * 1024 * 1024;
const SECTOR_SIZE: u64 = 512;

/// virtio-mmio v2 block device.
#[derive(Debug)]
pub struct Virtio {
    device_features_sel: u32,
    driver_features: u32,
    guest_page_size: u32,
    queue_sel: u32,
    queue_num: u32,
    queue_desc_low: u32,
    queue_desc_high: u32,
    queue_driver_low: u32,
    queue_driver_high: u32,
    queue_device_low: u32,
    queue_device_high: u32,
    queue_ready: u32,
    interrupt_status: u32,
    status: u32,
    notified: bool,
    disk: Vec<u8>,
}

impl Virtio {
    pub fn new() -> Self {
        Self {
            device_features_sel: 0,
            driver_features: 0,
            guest_page_size: 0,
            queue_sel: 0,
            queue_num: 0,
            queue_desc_low: 0,
            queue_desc_high: 0,
            queue_driver_low: 0,
            queue_driver_high: 0,
            queue_device_low: 0,
            queue_device_high: 0,
            queue_ready: 0,
            interrupt_status: 0,
            status: 0,
            notified: false,
            disk: vec![0; DISK_SIZE],
        }
    }

    /// Copy a raw disk image into the backing buffer, truncating if it is
    /// larger than [`DISK_SIZE`].
    pub fn load_disk_image(&mut self, image: &[u8]) {
        let len = image.len().min(self.disk.len());
        self.disk[..len].copy_from_slice(&image[..len]);
    }

    fn desc_addr(&self) -> u64 {
        ((self.queue_desc_high as u64) << 32) | self.queue_desc_low as u64
    }

    fn avail_addr(&self) -> u64 {
        ((self.queue_driver_high as u64) << 32) | self.queue_driver_low as u64
    }

    fn used_addr(&self) -> u64 {
        ((self.queue_device_high as u64) << 32) | self.queue_device_low as u64
    }

    /// `true` once since the last call if the guest has notified the queue
    /// and a transfer is waiting to be serviced.
    pub fn is_interrupting(&mut self) -> bool {
        let notified = self.notified;
        self.notified = false;
        notified
    }

    pub fn load(&self, addr: u64, size: u8) -> Result<u64, Exception> {
        if size != 32 {
            return Err(Exception::LoadAccessFault);
        }
        let value = match addr - VIRTIO_BASE {
            MAGIC_VALUE => MAGIC,
            VERSION => 2,
            DEVICE_ID => BLOCK_DEVICE_ID,
            VENDOR_ID => VENDOR,
            DEVICE_FEATURES => 0,
            QUEUE_NUM_MAX => QUEUE_SIZE,
            QUEUE_PFN => 0,
            QUEUE_READY => self.queue_ready as u64,
            INTERRUPT_STATUS => self.interrupt_status as u64,
            STATUS => self.status as u64,
            _ => 0,
        };
        Ok(value)
    }

    pub fn store(&mut self, addr: u64, size: u8, value: u64) -> Result<(), Exception> {
        if size != 32 {
            return Err(Exception::StoreAMOAccessFault);
        }
        let value32 = value as u32;
        match addr - VIRTIO_BASE {
            DEVICE_FEATURES => self.device_features_sel = value32,
            DRIVER_FEATURES => self.driver_features = value32,
            GUEST_PAGE_SIZE => self.guest_page_size = value32,
            QUEUE_SEL => self.queue_sel = value32,
            QUEUE_NUM => self.queue_num = value32,
            QUEUE_READY => self.queue_ready = value32,
            QUEUE_NOTIFY => self.notified = true,
            INTERRUPT_ACK => self.interrupt_status &= !value32,
            STATUS => self.status = value32,
            QUEUE_DESC_LOW => self.queue_desc_low = value32,
            QUEUE_DESC_HIGH => self.queue_desc_high = value32,
            QUEUE_DRIVER_LOW => self.queue_driver_low = value32,
            QUEUE_DRIVER_HIGH => self.queue_driver_high = value32,
            QUEUE_DEVICE_LOW => self.queue_device_low = value32,
            QUEUE_DEVICE_HIGH => self.queue_device_high = value32,
            _ => {}
        }
        Ok(())
    }

    /// Walk the single virtqueue's most recently submitted descriptor chain
    /// and perform the disk transfer it describes.
    ///
    /// Chain shape: desc0 is the 16-byte `virtio_blk_req` header (type,
    /// reserved, sector), desc1 is the data buffer, desc2 is the 1-byte
    /// status the device writes back. `desc1.flags & VIRTQ_DESC_F_WRITE`
    /// tells us which direction the transfer goes.
    pub fn disk_access(&mut self, dram: &mut Dram) -> Result<(), Exception> {
        let desc_addr = self.desc_addr();
        let avail_addr = self.avail_addr();
        let used_addr = self.used_addr();

        let avail_idx = dram.load(avail_addr + 2, 16)?;
        let ring_slot = (avail_idx.wrapping_sub(1)) % QUEUE_SIZE;
        let head = dram.load(avail_addr + 4 + ring_slot * 2, 16)?;

        let desc0 = desc_addr + head * 16;
        let header_addr = dram.load(desc0, 64)?;
        let desc0_next = dram.load(desc0 + 14, 16)?;
        let sector = dram.load(header_addr + 8, 64)?;

        let desc1 = desc_addr + desc0_next * 16;
        let data_addr = dram.load(desc1, 64)?;
        let data_len = dram.load(desc1 + 8, 32)?;
        let data_flags = dram.load(desc1 + 12, 16)? as u16;
        let desc1_next = dram.load(desc1 + 14, 16)?;

        let disk_offset = (sector * SECTOR_SIZE) as usize;
        let data_len = data_len as usize;

        if data_flags & VIRTQ_DESC_F_WRITE != 0 {
            // Device writes into the guest buffer: a disk read.
            let end = (disk_offset + data_len).min(self.disk.len());
            for (i, byte_addr) in (data_addr..data_addr + (end - disk_offset) as u64).enumerate() {
                dram.store(byte_addr, 8, self.disk[disk_offset + i] as u64)?;
            }
        } else {
            // Driver supplies the data: a disk write.
            let end = (disk_offset + data_len).min(self.disk.len());
            for (i, byte_addr) in (data_addr..data_addr + (end - disk_offset) as u64).enumerate() {
                self.disk[disk_offset + i] = dram.load(byte_addr, 8)? as u8;
            }
        }

        let desc2 = desc_addr + desc1_next * 16;
        let status_addr = dram.load(desc2, 64)?;
        dram.store(status_addr, 8, 0)?;

        let used_idx = dram.load(used_addr + 2, 16)?;
        let used_slot = used_idx % QUEUE_SIZE;
        dram.store(used_addr + 4 + used_slot * 8, 32, head)?;
        dram.store(used_addr + 2, 16, used_idx.wrapping_add(1))?;

        self.interrupt_status |= 1;

        Ok(())
    }
}

impl Default for Virtio {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_and_identity_registers() {
        let virtio = Virtio::new();
        assert_eq!(virtio.load(VIRTIO_BASE + MAGIC_VALUE, 32).unwrap(), MAGIC);
        assert_eq!(virtio.load(VIRTIO_BASE + VERSION, 32).unwrap(), 2);
        assert_eq!(
            virtio.load(VIRTIO_BASE + DEVICE_ID, 32).unwrap(),
            BLOCK_DEVICE_ID
        );
        assert_eq!(virtio.load(VIRTIO_BASE + VENDOR_ID, 32).unwrap(), VENDOR);
        assert_eq!(virtio.load(VIRTIO_BASE + QUEUE_NUM_MAX, 32).unwrap(), 8);
    }

    #[test]
    fn notify_latches_until_consumed() {
        let mut virtio = Virtio::new();
        virtio.store(VIRTIO_BASE + QUEUE_NOTIFY, 32, 0).unwrap();
        assert!(virtio.is_interrupting());
        assert!(!virtio.is_interrupting());
    }

    #[test]
    fn interrupt_ack_clears_status() {
        let mut virtio = Virtio::new();
        virtio.interrupt_status = 1;
        virtio
            .store(VIRTIO_BASE + INTERRUPT_ACK, 32, 1)
            .unwrap();
        assert_eq!(virtio.load(VIRTIO_BASE + INTERRUPT_STATUS, 32).unwrap(), 0);
    }

    #[test]
    fn disk_access_services_a_read_descriptor_chain() {
        use crate::primitives::constants::DRAM_BASE;

        let mut dram = Dram::new(0x2000);
        let mut virtio = Virtio::new();

        let sector: u64 = 3;
        let mut disk_image = vec![0u8; 2048];
        for (i, b) in disk_image.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        virtio.load_disk_image(&disk_image);

        let desc_addr = DRAM_BASE;
        let avail_addr = DRAM_BASE + 0x100;
        let used_addr = DRAM_BASE + 0x200;
        let header_addr = DRAM_BASE + 0x400;
        let data_addr = DRAM_BASE + 0x500;
        let status_addr = DRAM_BASE + 0x700;
        let data_len: u64 = 512;

        virtio.queue_desc_low = desc_addr as u32;
        virtio.queue_driver_low = avail_addr as u32;
        virtio.queue_device_low = used_addr as u32;

        // virtio_blk_req header: type(4) reserved(4) sector(8).
        dram.store(header_addr, 32, 0).unwrap();
        dram.store(header_addr + 4, 32, 0).unwrap();
        dram.store(header_addr + 8, 64, sector).unwrap();

        // desc0: header, chained to desc1.
        dram.store(desc_addr, 64, header_addr).unwrap();
        dram.store(desc_addr + 8, 32, 16).unwrap();
        dram.store(desc_addr + 12, 16, 0).unwrap();
        dram.store(desc_addr + 14, 16, 1).unwrap();

        // desc1: data buffer, device-writable (a disk read), chained to desc2.
        dram.store(desc_addr + 16, 64, data_addr).unwrap();
        dram.store(desc_addr + 16 + 8, 32, data_len).unwrap();
        dram
            .store(desc_addr + 16 + 12, 16, VIRTQ_DESC_F_WRITE as u64)
            .unwrap();
        dram.store(desc_addr + 16 + 14, 16, 2).unwrap();

        // desc2: status byte.
        dram.store(desc_addr + 32, 64, status_addr).unwrap();
        dram.store(desc_addr + 32 + 8, 32, 1).unwrap();
        dram.store(desc_addr + 32 + 12, 16, 0).unwrap();
        dram.store(desc_addr + 32 + 14, 16, 0).unwrap();

        // avail ring: one entry pointing at desc0.
        dram.store(avail_addr + 2, 16, 1).unwrap();
        dram.store(avail_addr + 4, 16, 0).unwrap();

        // used ring starts empty.
        dram.store(used_addr + 2, 16, 0).unwrap();

        virtio.disk_access(&mut dram).unwrap();

        let disk_offset = (sector * SECTOR_SIZE) as usize;
        for i in 0..data_len as usize {
            assert_eq!(
                dram.load(data_addr + i as u64, 8).unwrap(),
                disk_image[disk_offset + i] as u64
            );
        }
        assert_eq!(dram.load(status_addr, 8).unwrap(), 0);
        assert_eq!(dram.load(used_addr + 2, 16).unwrap(), 1);
        assert_eq!(dram.load(used_addr + 4, 32).unwrap(), 0);
        assert!(virtio.interrupt_status & 1 != 0);
    }
}
