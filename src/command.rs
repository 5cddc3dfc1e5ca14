//! Command Builder / Submitter (§4.5): turns a decoded intent (Identify,
//! Create I/O CQ/SQ, Get Log Page, Read/Write, Flush) into a byte-exact
//! [`SubmissionQueueEntry`], including PRP1/PRP2/PRP-list construction from
//! a host scatter-gather buffer.

use crate::host::HostServices;
use crate::prp::PrpPool;
use crate::queue::SubmissionQueueEntry;
use crate::request::NO_PRP_PAGE;

pub mod admin_opcode {
    pub const DELETE_IO_SQ: u8 = 0x00;
    pub const CREATE_IO_SQ: u8 = 0x01;
    pub const GET_LOG_PAGE: u8 = 0x02;
    pub const DELETE_IO_CQ: u8 = 0x04;
    pub const CREATE_IO_CQ: u8 = 0x05;
    pub const IDENTIFY: u8 = 0x06;
}

pub mod nvm_opcode {
    pub const FLUSH: u8 = 0x00;
    pub const WRITE: u8 = 0x01;
    pub const READ: u8 = 0x02;
}

pub const CNS_NAMESPACE: u32 = 0x00;
pub const CNS_CONTROLLER: u32 = 0x01;

const PRP_FLAGS: u8 = 0;

fn empty(opcode: u8, flags: u8, cid: u16, nsid: u32) -> SubmissionQueueEntry {
    let mut sqe = SubmissionQueueEntry::default();
    sqe.cdw0 = SubmissionQueueEntry::cdw0(opcode, flags, cid);
    sqe.nsid = nsid;
    sqe
}

/// Identify Controller (`cns = CNS_CONTROLLER`) or Identify Namespace
/// (`cns = CNS_NAMESPACE`, `nsid = 1`).
pub fn identify(cid: u16, nsid: u32, cns: u32, buffer_phys: u64) -> SubmissionQueueEntry {
    let mut sqe = empty(admin_opcode::IDENTIFY, PRP_FLAGS, cid, nsid);
    sqe.prp1 = buffer_phys;
    sqe.cdw10 = cns;
    sqe
}

const CQ_PC: u32 = 1 << 0;
const CQ_IEN: u32 = 1 << 1;

pub fn create_io_cq(cid: u16, qid: u16, size: u16, cq_phys: u64) -> SubmissionQueueEntry {
    let mut sqe = empty(admin_opcode::CREATE_IO_CQ, PRP_FLAGS, cid, 0);
    sqe.prp1 = cq_phys;
    sqe.cdw10 = ((size as u32 - 1) << 16) | qid as u32;
    sqe.cdw11 = CQ_PC | CQ_IEN;
    sqe
}

const SQ_PC: u32 = 1 << 0;

pub fn create_io_sq(cid: u16, qid: u16, size: u16, sq_phys: u64, cqid: u16) -> SubmissionQueueEntry {
    let mut sqe = empty(admin_opcode::CREATE_IO_SQ, PRP_FLAGS, cid, 0);
    sqe.prp1 = sq_phys;
    sqe.cdw10 = ((size as u32 - 1) << 16) | qid as u32;
    sqe.cdw11 = SQ_PC | ((cqid as u32) << 16);
    sqe
}

pub fn delete_io_sq(cid: u16, qid: u16) -> SubmissionQueueEntry {
    let mut sqe = empty(admin_opcode::DELETE_IO_SQ, PRP_FLAGS, cid, 0);
    sqe.cdw10 = qid as u32;
    sqe
}

pub fn delete_io_cq(cid: u16, qid: u16) -> SubmissionQueueEntry {
    let mut sqe = empty(admin_opcode::DELETE_IO_CQ, PRP_FLAGS, cid, 0);
    sqe.cdw10 = qid as u32;
    sqe
}

/// Fetches 512 bytes (`numdl = 127`, zero-based dword count) of log `lid`
/// into the scratch page at `prp_page_phys`.
pub fn get_log_page(cid: u16, lid: u8, prp_page_phys: u64) -> SubmissionQueueEntry {
    let mut sqe = empty(admin_opcode::GET_LOG_PAGE, PRP_FLAGS, cid, 0xFFFF_FFFF);
    sqe.prp1 = prp_page_phys;
    sqe.cdw10 = lid as u32 | (127u32 << 16);
    sqe
}

pub fn flush(cid: u16, nsid: u32) -> SubmissionQueueEntry {
    empty(nvm_opcode::FLUSH, PRP_FLAGS, cid, nsid)
}

/// Outcome of [`build_prp_list`]: which PRP fields to set and, if a list
/// page was needed, the pool index to remember in the request extension.
pub struct PrpLayout {
    pub prp1: u64,
    pub prp2: u64,
    pub prp_page: u8,
}

/// §4.5 step 3: derive PRP1/PRP2, or a PRP list page, from a host
/// scatter-gather buffer. `phys` is the physical address of the buffer's
/// first byte; `virt` its matching virtual address (used to resolve
/// subsequent 4 KiB chunks); `data_len` the transfer length in bytes.
pub fn build_prp_list<H: HostServices>(
    host: &H,
    pool: &mut PrpPool,
    virt: usize,
    phys: u64,
    data_len: u32,
) -> Option<PrpLayout> {
    const PAGE: u64 = 4096;
    let offset_in_page = phys & 0xFFF;
    let first_page_bytes = PAGE - offset_in_page;

    if (data_len as u64) <= first_page_bytes {
        return Some(PrpLayout { prp1: phys, prp2: 0, prp_page: NO_PRP_PAGE });
    }

    if (data_len as u64) <= first_page_bytes + PAGE {
        let second_virt = virt + first_page_bytes as usize;
        let mut len_hint = PAGE as u32;
        let second_phys = host.get_physical_address(second_virt, &mut len_hint);
        return Some(PrpLayout { prp1: phys, prp2: second_phys, prp_page: NO_PRP_PAGE });
    }

    let index = pool.acquire()?;
    let list_virt = pool.virt(index);
    let list_phys = pool.phys(index);
    let list: &mut [u64] = unsafe { core::slice::from_raw_parts_mut(list_virt as *mut u64, 512) };

    let mut remaining = data_len as u64 - first_page_bytes;
    let mut chunk_virt = virt + first_page_bytes as usize;
    let mut slot = 0usize;
    while remaining > 0 {
        let mut len_hint = PAGE as u32;
        let chunk_phys = host.get_physical_address(chunk_virt, &mut len_hint);
        list[slot] = chunk_phys;
        slot += 1;
        chunk_virt += PAGE as usize;
        remaining = remaining.saturating_sub(PAGE);
    }

    Some(PrpLayout { prp1: phys, prp2: list_phys, prp_page: index })
}

/// §4.5 step 4: `cdw10/11 = LBA low/high`, `cdw12 = blocks - 1`, never
/// emitting `blocks == 0` on the wire.
pub fn read_write(cid: u16, nsid: u32, is_write: bool, lba: u64, blocks: u32, prp: &PrpLayout) -> SubmissionQueueEntry {
    let opcode = if is_write { nvm_opcode::WRITE } else { nvm_opcode::READ };
    let mut sqe = empty(opcode, PRP_FLAGS, cid, nsid);
    sqe.prp1 = prp.prp1;
    sqe.prp2 = prp.prp2;
    sqe.cdw10 = (lba & 0xFFFF_FFFF) as u32;
    sqe.cdw11 = (lba >> 32) as u32;
    sqe.cdw12 = blocks.saturating_sub(1);
    sqe
}

/// CDB6/CDB10 READ/WRITE LBA and block-count decode (§4.5 step 1).
pub struct ReadWriteArgs {
    pub lba: u64,
    pub blocks: u32,
}

pub fn decode_cdb6(cdb: &[u8; 16]) -> ReadWriteArgs {
    let lba = ((cdb[1] as u64 & 0x1F) << 16) | ((cdb[2] as u64) << 8) | cdb[3] as u64;
    let count = cdb[4];
    ReadWriteArgs { lba, blocks: if count == 0 { 256 } else { count as u32 } }
}

pub fn decode_cdb10(cdb: &[u8; 16]) -> ReadWriteArgs {
    let lba = u32::from_be_bytes([cdb[2], cdb[3], cdb[4], cdb[5]]) as u64;
    let count = u16::from_be_bytes([cdb[7], cdb[8]]);
    ReadWriteArgs { lba, blocks: count as u32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read6_zero_count_means_256_blocks() {
        let cdb = [0x08, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let args = decode_cdb6(&cdb);
        assert_eq!(args.blocks, 256);
    }

    #[test]
    fn read10_decodes_big_endian_lba_and_count() {
        let mut cdb = [0u8; 16];
        cdb[0] = 0x28;
        cdb[2..6].copy_from_slice(&100u32.to_be_bytes());
        cdb[7..9].copy_from_slice(&16u16.to_be_bytes());
        let args = decode_cdb10(&cdb);
        assert_eq!(args.lba, 100);
        assert_eq!(args.blocks, 16);
    }

    #[test]
    fn read_write_sets_cdw12_to_blocks_minus_one() {
        let prp = PrpLayout { prp1: 0x1000, prp2: 0, prp_page: NO_PRP_PAGE };
        let sqe = read_write(5, 1, false, 100, 16, &prp);
        assert_eq!(sqe.cdw12, 15);
    }

    #[test]
    fn boundary_0xffff_blocks_gives_cdw12_0xfffe() {
        let prp = PrpLayout { prp1: 0x1000, prp2: 0, prp_page: NO_PRP_PAGE };
        let sqe = read_write(5, 1, false, 0, 0xFFFF, &prp);
        assert_eq!(sqe.cdw12, 0xFFFE);
    }

    #[test]
    fn create_io_cq_packs_size_and_qid() {
        let sqe = create_io_cq(1, 1, 64, 0x2000);
        assert_eq!(sqe.cdw10, (63 << 16) | 1);
        assert_eq!(sqe.cdw11 & CQ_PC, CQ_PC);
        assert_eq!(sqe.prp1, 0x2000);
    }
}
